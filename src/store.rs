use crate::{
    budget::{Budget, BudgetImputation, SourceTransaction},
    error::ErrorKind,
    ids::{
        AggregatePaymentId, BudgetId, ImputationId, ObligationId, PlanId, PurchaseId,
        TransactionId, UserId,
    },
    installment::{InstallmentPlan, LedgerEntry},
    link::{AggregatePayment, InstallmentLink},
    obligation::{Payment, RecurringObligation},
    period::PeriodWindow,
};
use log::{debug, error};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// A single row written by an operation
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    PutObligation(RecurringObligation),
    PutPlan(InstallmentPlan),
    PutLedgerEntry(LedgerEntry),
    PutAggregatePayment(AggregatePayment),
    PutLink(InstallmentLink),
    PutImputation(BudgetImputation),
}

/// All rows written by one operation. A store applies a changeset completely or
/// not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    mutations: Vec<Mutation>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("plan '{plan}' was changed concurrently (expected version {expected}, found {found})")]
    StaleWrite {
        plan: PlanId,
        expected: u64,
        found: u64,
    },
    #[error("purchase '{0}' already has an installment plan")]
    DuplicatePlan(PurchaseId),
    #[error("plan '{plan}' is already linked to payment '{payment}'")]
    DuplicateLink {
        plan: PlanId,
        payment: AggregatePaymentId,
    },
    #[error("transaction '{transaction}' is already imputed to budget '{budget}'")]
    DuplicateImputation {
        budget: BudgetId,
        transaction: TransactionId,
    },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    // Every store failure is a clash with state someone else wrote; retrying is up
    // to the caller.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Conflict
    }
}

/// The transactional record store the engine runs against.
///
/// Reads return owned records. `commit` must be atomic: either every mutation in
/// the changeset is applied or none are, and concurrent commits touching the same
/// plan must not both succeed.
pub trait RecordStore {
    fn obligation(&self, id: ObligationId) -> Result<Option<RecurringObligation>, StoreError>;
    fn payments_for(&self, id: ObligationId) -> Result<Vec<Payment>, StoreError>;
    fn plan(&self, id: PlanId) -> Result<Option<InstallmentPlan>, StoreError>;
    fn plan_for_purchase(&self, id: PurchaseId) -> Result<Option<InstallmentPlan>, StoreError>;
    fn aggregate_payment(&self, id: AggregatePaymentId)
        -> Result<Option<AggregatePayment>, StoreError>;
    fn links_for_payment(&self, id: AggregatePaymentId) -> Result<Vec<InstallmentLink>, StoreError>;
    fn budget(&self, id: BudgetId) -> Result<Option<Budget>, StoreError>;
    fn transaction(&self, id: TransactionId) -> Result<Option<SourceTransaction>, StoreError>;
    fn transactions_for(
        &self,
        user_id: UserId,
        window: &PeriodWindow,
    ) -> Result<Vec<SourceTransaction>, StoreError>;
    fn imputation(&self, id: ImputationId) -> Result<Option<BudgetImputation>, StoreError>;
    fn imputations_for(&self, id: BudgetId) -> Result<Vec<BudgetImputation>, StoreError>;
    fn commit(&mut self, changes: Changeset) -> Result<(), StoreError>;
}

impl Changeset {
    pub fn new() -> Self {
        Changeset::default()
    }

    pub fn push(&mut self, mutation: Mutation) -> &mut Self {
        self.mutations.push(mutation);
        self
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.mutations.iter()
    }
}

impl From<Mutation> for Changeset {
    fn from(mutation: Mutation) -> Self {
        Changeset {
            mutations: vec![mutation],
        }
    }
}

impl IntoIterator for Changeset {
    type Item = Mutation;
    type IntoIter = std::vec::IntoIter<Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.into_iter()
    }
}

/// A `RecordStore` held entirely in memory.
///
/// Commits are validated in full before anything is written, which gives the same
/// all-or-nothing behaviour a database transaction would. Plan writes are checked
/// against the stored `version` to catch lost updates.
#[derive(Debug, Default)]
pub struct MemoryStore {
    obligations: HashMap<ObligationId, RecurringObligation>,
    payments: Vec<Payment>,
    plans: HashMap<PlanId, InstallmentPlan>,
    entries: Vec<LedgerEntry>,
    aggregate_payments: HashMap<AggregatePaymentId, AggregatePayment>,
    links: Vec<InstallmentLink>,
    budgets: HashMap<BudgetId, Budget>,
    transactions: HashMap<TransactionId, SourceTransaction>,
    imputations: HashMap<ImputationId, BudgetImputation>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn insert_obligation(&mut self, obligation: RecurringObligation) {
        self.obligations.insert(obligation.id, obligation);
    }

    pub fn insert_payment(&mut self, payment: Payment) {
        self.payments.push(payment);
    }

    pub fn insert_budget(&mut self, budget: Budget) {
        self.budgets.insert(budget.id, budget);
    }

    pub fn insert_transaction(&mut self, transaction: SourceTransaction) {
        self.transactions.insert(transaction.id, transaction);
    }

    pub fn ledger_entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn links(&self) -> &[InstallmentLink] {
        &self.links
    }

    // Check every mutation against the stored rows and against the rows written
    // earlier in the same changeset.
    fn validate(&self, changes: &Changeset) -> Result<(), StoreError> {
        let mut versions: HashMap<PlanId, u64> = HashMap::new();
        let mut purchases: HashMap<PurchaseId, PlanId> = self
            .plans
            .values()
            .map(|p| (p.purchase_id, p.id))
            .collect();
        let mut linked: HashSet<(PlanId, AggregatePaymentId)> =
            self.links.iter().map(|l| (l.plan_id, l.payment_id)).collect();
        let mut active: HashMap<(BudgetId, TransactionId), ImputationId> = self
            .imputations
            .values()
            .filter(|i| i.is_active())
            .map(|i| ((i.budget_id, i.transaction_id), i.id))
            .collect();

        for mutation in changes.iter() {
            match mutation {
                Mutation::PutPlan(plan) => {
                    let stored = versions
                        .get(&plan.id)
                        .copied()
                        .or_else(|| self.plans.get(&plan.id).map(|p| p.version));

                    match stored {
                        Some(found) if plan.version != found + 1 => {
                            return Err(StoreError::StaleWrite {
                                plan: plan.id,
                                expected: plan.version.saturating_sub(1),
                                found,
                            });
                        }
                        None if plan.version != 0 => {
                            return Err(StoreError::StaleWrite {
                                plan: plan.id,
                                expected: plan.version.saturating_sub(1),
                                found: 0,
                            });
                        }
                        _ => {}
                    }

                    match purchases.get(&plan.purchase_id) {
                        Some(owner) if *owner != plan.id => {
                            return Err(StoreError::DuplicatePlan(plan.purchase_id));
                        }
                        _ => {
                            purchases.insert(plan.purchase_id, plan.id);
                        }
                    }

                    versions.insert(plan.id, plan.version);
                }
                Mutation::PutLink(link) => {
                    if !linked.insert((link.plan_id, link.payment_id)) {
                        return Err(StoreError::DuplicateLink {
                            plan: link.plan_id,
                            payment: link.payment_id,
                        });
                    }
                }
                Mutation::PutImputation(imputation) if imputation.is_active() => {
                    let key = (imputation.budget_id, imputation.transaction_id);
                    match active.get(&key) {
                        Some(id) if *id != imputation.id => {
                            return Err(StoreError::DuplicateImputation {
                                budget: imputation.budget_id,
                                transaction: imputation.transaction_id,
                            });
                        }
                        _ => {
                            active.insert(key, imputation.id);
                        }
                    }
                }
                Mutation::PutImputation(imputation) => {
                    let key = (imputation.budget_id, imputation.transaction_id);
                    if active.get(&key) == Some(&imputation.id) {
                        active.remove(&key);
                    }
                }
                Mutation::PutObligation(_)
                | Mutation::PutLedgerEntry(_)
                | Mutation::PutAggregatePayment(_) => {}
            }
        }

        Ok(())
    }

    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::PutObligation(o) => {
                self.obligations.insert(o.id, o);
            }
            Mutation::PutPlan(p) => {
                self.plans.insert(p.id, p);
            }
            Mutation::PutLedgerEntry(e) => self.entries.push(e),
            Mutation::PutAggregatePayment(p) => {
                self.aggregate_payments.insert(p.id, p);
            }
            Mutation::PutLink(l) => self.links.push(l),
            Mutation::PutImputation(i) => {
                self.imputations.insert(i.id, i);
            }
        }
    }
}

impl RecordStore for MemoryStore {
    fn obligation(&self, id: ObligationId) -> Result<Option<RecurringObligation>, StoreError> {
        Ok(self.obligations.get(&id).cloned())
    }

    fn payments_for(&self, id: ObligationId) -> Result<Vec<Payment>, StoreError> {
        Ok(self
            .payments
            .iter()
            .filter(|p| p.obligation_id == id)
            .cloned()
            .collect())
    }

    fn plan(&self, id: PlanId) -> Result<Option<InstallmentPlan>, StoreError> {
        Ok(self.plans.get(&id).cloned())
    }

    fn plan_for_purchase(&self, id: PurchaseId) -> Result<Option<InstallmentPlan>, StoreError> {
        Ok(self.plans.values().find(|p| p.purchase_id == id).cloned())
    }

    fn aggregate_payment(
        &self,
        id: AggregatePaymentId,
    ) -> Result<Option<AggregatePayment>, StoreError> {
        Ok(self.aggregate_payments.get(&id).cloned())
    }

    fn links_for_payment(&self, id: AggregatePaymentId) -> Result<Vec<InstallmentLink>, StoreError> {
        Ok(self
            .links
            .iter()
            .filter(|l| l.payment_id == id)
            .cloned()
            .collect())
    }

    fn budget(&self, id: BudgetId) -> Result<Option<Budget>, StoreError> {
        Ok(self.budgets.get(&id).cloned())
    }

    fn transaction(&self, id: TransactionId) -> Result<Option<SourceTransaction>, StoreError> {
        Ok(self.transactions.get(&id).cloned())
    }

    fn transactions_for(
        &self,
        user_id: UserId,
        window: &PeriodWindow,
    ) -> Result<Vec<SourceTransaction>, StoreError> {
        Ok(self
            .transactions
            .values()
            .filter(|t| t.user_id == user_id && window.contains(t.occurred_at))
            .cloned()
            .collect())
    }

    fn imputation(&self, id: ImputationId) -> Result<Option<BudgetImputation>, StoreError> {
        Ok(self.imputations.get(&id).cloned())
    }

    fn imputations_for(&self, id: BudgetId) -> Result<Vec<BudgetImputation>, StoreError> {
        Ok(self
            .imputations
            .values()
            .filter(|i| i.budget_id == id)
            .cloned()
            .collect())
    }

    fn commit(&mut self, changes: Changeset) -> Result<(), StoreError> {
        if let Err(e) = self.validate(&changes) {
            error!("rejecting changeset of {} mutation(s): {}", changes.len(), e);
            return Err(e);
        }

        debug!("committing {} mutation(s)", changes.len());

        for mutation in changes {
            self.apply(mutation);
        }

        Ok(())
    }
}
