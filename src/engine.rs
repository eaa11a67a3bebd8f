use crate::{
    budget::{self, BudgetConsumption, BudgetImputation, BudgetScope, ImputationRequest},
    config::EngineConfig,
    error::LedgerError,
    ids::{BudgetId, ImputationId, ObligationId, PlanId, TransactionId, UserId},
    installment::{InstallmentAdvance, InstallmentPlan, OpenPlan},
    link::{self, AggregatePayment, LinkOutcome},
    obligation::{ObligationState, RecurringObligation},
    store::{Changeset, Mutation, RecordStore},
};
use chrono::{DateTime, Utc};
use log::{debug, error, info};

/// The entry point for callers.
///
/// Each operation loads what it needs from the store, checks the records belong
/// to the calling user, runs the pure calculation and commits the resulting rows
/// as one changeset. A record owned by someone else is reported exactly like a
/// record that doesn't exist.
pub struct Engine<S> {
    store: S,
    config: EngineConfig,
}

impl<S: RecordStore> Engine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Engine { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn obligation_state(
        &self,
        user_id: UserId,
        id: ObligationId,
        now: DateTime<Utc>,
    ) -> Result<ObligationState, LedgerError> {
        let obligation = self.owned_obligation(user_id, id)?;
        let payments = self.store.payments_for(id)?;

        obligation.resolve(&payments, now)
    }

    /// Returns the number of periods the due date moved forward by
    pub fn roll_over_obligation(
        &mut self,
        user_id: UserId,
        id: ObligationId,
        now: DateTime<Utc>,
    ) -> Result<u32, LedgerError> {
        let mut obligation = self.owned_obligation(user_id, id)?;
        let steps = obligation.roll_over(now)?;

        if steps > 0 {
            self.store.commit(Mutation::PutObligation(obligation).into())?;
        }

        Ok(steps)
    }

    pub fn retire_obligation(
        &mut self,
        user_id: UserId,
        id: ObligationId,
    ) -> Result<RecurringObligation, LedgerError> {
        let mut obligation = self.owned_obligation(user_id, id)?;
        obligation.retire()?;

        self.store
            .commit(Mutation::PutObligation(obligation.clone()).into())?;
        info!("retired obligation '{}'", obligation.concept);

        Ok(obligation)
    }

    pub fn open_plan(&mut self, request: OpenPlan) -> Result<InstallmentPlan, LedgerError> {
        let existing = self.store.plan_for_purchase(request.purchase_id)?;
        let plan = InstallmentPlan::open(request, existing.as_ref(), &self.config)?;

        self.store.commit(Mutation::PutPlan(plan.clone()).into())?;
        info!("opened plan {} for purchase {}", plan.id, plan.purchase_id);

        Ok(plan)
    }

    /// Pay the next installment of a plan and record it in the ledger
    pub fn pay_installment(
        &mut self,
        user_id: UserId,
        plan_id: PlanId,
        now: DateTime<Utc>,
    ) -> Result<InstallmentAdvance, LedgerError> {
        let plan = self.owned_plan(user_id, plan_id)?;
        let advance = plan.record_payment(now)?;

        let mut changes = Changeset::new();
        changes
            .push(Mutation::PutPlan(advance.plan.clone()))
            .push(Mutation::PutLedgerEntry(advance.entry.clone()));
        self.store.commit(changes)?;

        debug!("plan {} is now at {}", plan_id, advance.plan.progress());

        Ok(advance)
    }

    /// Link an aggregate card payment to several plans.
    ///
    /// If the payment has been stored before, the stored copy wins and only plans
    /// not yet linked to it are advanced.
    pub fn link_payment(
        &mut self,
        user_id: UserId,
        payment: AggregatePayment,
        plan_ids: &[PlanId],
    ) -> Result<LinkOutcome, LedgerError> {
        let stored = self.store.aggregate_payment(payment.id)?;
        let is_new = stored.is_none();
        let payment = stored.unwrap_or(payment);

        let plans = plan_ids
            .iter()
            .map(|id| {
                self.store
                    .plan(*id)?
                    .ok_or_else(|| LedgerError::not_found("installment plan", id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let existing = self.store.links_for_payment(payment.id)?;
        let outcome = link::link_payment(
            user_id,
            &payment,
            &plans,
            &existing,
            self.config.link_due_rule,
        )?;

        if is_new || !outcome.links.is_empty() {
            self.store.commit(outcome.changeset())?;
        }

        info!(
            "payment {} linked to {} plan(s), {} skipped",
            payment.id,
            outcome.links.len(),
            outcome.skipped.len()
        );

        Ok(outcome)
    }

    pub fn create_imputation(
        &mut self,
        user_id: UserId,
        budget_id: BudgetId,
        transaction_id: TransactionId,
        request: ImputationRequest,
    ) -> Result<BudgetImputation, LedgerError> {
        let budget = self
            .store
            .budget(budget_id)?
            .ok_or_else(|| LedgerError::not_found("budget", budget_id))?;
        let transaction = self
            .store
            .transaction(transaction_id)?
            .ok_or_else(|| LedgerError::not_found("transaction", transaction_id))?;
        let existing = self.store.imputations_for(budget_id)?;

        let imputation =
            budget::create_imputation(user_id, &budget, &transaction, request, &existing)?;
        self.store
            .commit(Mutation::PutImputation(imputation.clone()).into())?;

        Ok(imputation)
    }

    pub fn remove_imputation(
        &mut self,
        user_id: UserId,
        id: ImputationId,
    ) -> Result<BudgetImputation, LedgerError> {
        let imputation = self
            .store
            .imputation(id)?
            .ok_or_else(|| LedgerError::not_found("imputation", id))?;

        let removed = budget::remove_imputation(user_id, &imputation)?;
        self.store
            .commit(Mutation::PutImputation(removed.clone()).into())?;

        Ok(removed)
    }

    pub fn budget_consumption(
        &self,
        user_id: UserId,
        id: BudgetId,
    ) -> Result<BudgetConsumption, LedgerError> {
        let budget = match self.store.budget(id)? {
            Some(b) if b.user_id == user_id => b,
            Some(_) => {
                error!("budget {} does not belong to {}", id, user_id);
                return Err(LedgerError::not_found("budget", id));
            }
            None => return Err(LedgerError::not_found("budget", id)),
        };

        // Only load the rows the budget's scope actually reads
        let (transactions, imputations) = match budget.scope {
            BudgetScope::Category(_) => {
                let window = budget.period.window()?;
                (self.store.transactions_for(user_id, &window)?, Vec::new())
            }
            BudgetScope::Group => (Vec::new(), self.store.imputations_for(id)?),
        };

        budget::consumption(&budget, &transactions, &imputations)
    }

    fn owned_obligation(
        &self,
        user_id: UserId,
        id: ObligationId,
    ) -> Result<RecurringObligation, LedgerError> {
        match self.store.obligation(id)? {
            Some(o) if o.user_id == user_id => Ok(o),
            Some(_) => {
                error!("obligation {} does not belong to {}", id, user_id);
                Err(LedgerError::not_found("obligation", id))
            }
            None => Err(LedgerError::not_found("obligation", id)),
        }
    }

    fn owned_plan(&self, user_id: UserId, id: PlanId) -> Result<InstallmentPlan, LedgerError> {
        match self.store.plan(id)? {
            Some(p) if p.user_id == user_id => Ok(p),
            Some(_) => {
                error!("plan {} does not belong to {}", id, user_id);
                Err(LedgerError::not_found("installment plan", id))
            }
            None => Err(LedgerError::not_found("installment plan", id)),
        }
    }
}
