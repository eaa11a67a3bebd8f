use crate::{
    config::{DueDateRule, EngineConfig},
    error::LedgerError,
    ids::{CategoryId, LedgerEntryId, PlanId, PurchaseId, UserId},
    periodicity::shift_months,
    CURRENCY_PRECISION,
};
use chrono::{DateTime, Datelike, Duration, Utc};
use log::{debug, error, trace, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A financed purchase split into equal monthly installments ("cuotas").
///
/// Two invariants hold for every plan at all times:
///
/// * `paid + remaining == term`
/// * `next_due` is `None` exactly when `remaining == 0`
///
/// Once `remaining` reaches zero the plan is settled and no longer changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentPlan {
    pub id: PlanId,
    pub user_id: UserId,
    pub purchase_id: PurchaseId,
    pub concept: String,
    /// Category that the generated ledger entries are tracked under
    pub category_id: Option<CategoryId>,
    pub principal: Decimal,
    pub term: u32,
    pub installment_amount: Decimal,
    pub paid: u32,
    pub remaining: u32,
    pub first_due: DateTime<Utc>,
    pub next_due: Option<DateTime<Utc>>,
    pub day_anchor: Option<u32>,
    /// Bumped on every change so the store can detect lost updates
    pub version: u64,
}

/// Everything needed to open a plan for a purchase
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPlan {
    pub user_id: UserId,
    pub purchase_id: PurchaseId,
    pub concept: String,
    pub category_id: Option<CategoryId>,
    pub principal: Decimal,
    pub term: u32,
    pub installment_amount: Decimal,
    pub first_due: DateTime<Utc>,
    pub day_anchor: Option<u32>,
}

/// The payment record produced when an installment is paid. It has to be stored
/// together with the updated plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub purchase_id: PurchaseId,
    pub category_id: Option<CategoryId>,
    pub concept: String,
    pub amount: Decimal,
    /// 1 based
    pub installment_number: u32,
    pub settled_at: DateTime<Utc>,
}

/// The result of paying one installment
#[derive(Debug, Clone, PartialEq)]
pub struct InstallmentAdvance {
    pub plan: InstallmentPlan,
    pub entry: LedgerEntry,
}

impl OpenPlan {
    /// Build a request whose installment amount is the principal split evenly over
    /// the term, rounded to currency precision.
    pub fn from_principal<S: Into<String>>(
        user_id: UserId,
        purchase_id: PurchaseId,
        concept: S,
        principal: Decimal,
        term: u32,
        first_due: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        if term < 1 {
            return Err(LedgerError::Validation(
                "an installment plan needs at least one installment".into(),
            ));
        }

        let installment_amount = (principal / Decimal::from(term)).round_dp(CURRENCY_PRECISION);

        Ok(OpenPlan {
            user_id,
            purchase_id,
            concept: concept.into(),
            category_id: None,
            principal,
            term,
            installment_amount,
            first_due,
            day_anchor: None,
        })
    }
}

impl InstallmentPlan {
    /// Open a new plan.
    ///
    /// `existing` is whatever plan the store already holds for the purchase. A
    /// purchase is financed by at most one plan.
    pub fn open(
        request: OpenPlan,
        existing: Option<&InstallmentPlan>,
        config: &EngineConfig,
    ) -> Result<Self, LedgerError> {
        if let Some(plan) = existing {
            error!(
                "purchase {} is already financed by plan {}",
                request.purchase_id, plan.id
            );
            return Err(LedgerError::Conflict(format!(
                "purchase '{}' already has installment plan '{}'",
                request.purchase_id, plan.id
            )));
        }

        if request.term < 1 {
            return Err(LedgerError::Validation(
                "an installment plan needs at least one installment".into(),
            ));
        }

        if request.installment_amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "installment amount must be positive, got {}",
                request.installment_amount
            )));
        }

        if request.principal <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "principal must be positive, got {}",
                request.principal
            )));
        }

        let day_anchor = match request.day_anchor {
            Some(0) => {
                return Err(LedgerError::Validation("day anchor must be at least 1".into()));
            }
            Some(day) => Some(day.min(config.max_anchor_day)),
            None => None,
        };

        // Financing charges make the total larger than the principal, never smaller.
        let total = request
            .installment_amount
            .checked_mul(Decimal::from(request.term))
            .ok_or_else(|| LedgerError::out_of_range("plan total"))?;
        if total < request.principal {
            warn!(
                "plan for purchase {} repays {} against a principal of {}",
                request.purchase_id, total, request.principal
            );
        }

        let plan = InstallmentPlan {
            id: PlanId::new(),
            user_id: request.user_id,
            purchase_id: request.purchase_id,
            concept: request.concept,
            category_id: request.category_id,
            principal: request.principal,
            term: request.term,
            installment_amount: request.installment_amount,
            paid: 0,
            remaining: request.term,
            first_due: request.first_due,
            next_due: Some(request.first_due),
            day_anchor,
            version: 0,
        };

        debug!(
            "opened plan {} for {}: {} x {} from {}",
            plan.id, plan.concept, plan.term, plan.installment_amount, plan.first_due
        );

        Ok(plan)
    }

    pub fn is_settled(&self) -> bool {
        self.remaining == 0
    }

    /// The day of month every installment falls on (clamped in short months)
    pub fn anchor_day(&self) -> u32 {
        self.day_anchor.unwrap_or_else(|| self.first_due.day())
    }

    // Plans built by `open` always fit their total in a `Decimal`; anything else
    // saturates instead of panicking.
    pub fn paid_amount(&self) -> Decimal {
        self.installment_amount.saturating_mul(Decimal::from(self.paid))
    }

    pub fn outstanding_amount(&self) -> Decimal {
        self.installment_amount.saturating_mul(Decimal::from(self.remaining))
    }

    /// E.g. "4/12" once four installments have been paid
    pub fn progress(&self) -> String {
        format!("{}/{}", self.paid, self.term)
    }

    /// Scheduled due date of installment `number` (1 based). The first installment
    /// is due on `first_due` as given; later ones fall on the anchor day.
    pub fn due_date_of(&self, number: u32) -> Option<DateTime<Utc>> {
        match number {
            0 => None,
            n if n > self.term => None,
            1 => Some(self.first_due),
            n => shift_months(self.first_due, n as i32 - 1, self.anchor_day()),
        }
    }

    /// Due dates of every installment still to be paid
    pub fn schedule(&self) -> Vec<DateTime<Utc>> {
        (self.paid + 1..=self.term)
            .filter_map(|n| self.due_date_of(n))
            .collect()
    }

    /// Pay the next installment.
    ///
    /// The plan itself is untouched; the updated copy and the ledger entry for the
    /// payment are returned so the caller can store both in one transaction.
    pub fn record_payment(&self, now: DateTime<Utc>) -> Result<InstallmentAdvance, LedgerError> {
        let mut plan = self.clone();
        plan.advance(DueDateRule::CalendarMonth)?;

        let entry = LedgerEntry {
            id: LedgerEntryId::new(),
            user_id: plan.user_id,
            plan_id: plan.id,
            purchase_id: plan.purchase_id,
            category_id: plan.category_id,
            concept: format!("{} (cuota {})", plan.concept, plan.progress()),
            amount: plan.installment_amount,
            installment_number: plan.paid,
            settled_at: now,
        };

        Ok(InstallmentAdvance { plan, entry })
    }

    /// Move the plan on by exactly one installment.
    pub(crate) fn advance(&mut self, rule: DueDateRule) -> Result<(), LedgerError> {
        if self.is_settled() {
            error!("plan {} has no installments left", self.id);
            return Err(LedgerError::Settled { plan: self.id });
        }

        let next_due = if self.remaining == 1 {
            None
        } else {
            Some(self.following_due(rule)?)
        };

        self.paid += 1;
        self.remaining -= 1;
        self.next_due = next_due;
        self.version += 1;

        debug_assert_eq!(self.paid + self.remaining, self.term);
        debug_assert_eq!(self.remaining == 0, self.next_due.is_none());

        trace!(
            "plan {} advanced to {} (next due {:?})",
            self.id,
            self.progress(),
            self.next_due
        );

        Ok(())
    }

    // The due date after the current one. Plans that track their due date
    // incrementally step on from `next_due`; plans that lost it are recomputed from
    // the schedule. Both pin later days to the anchor, so they agree.
    fn following_due(&self, rule: DueDateRule) -> Result<DateTime<Utc>, LedgerError> {
        let out_of_range =
            || LedgerError::Validation(format!("plan '{}' due dates run out of range", self.id));

        let current = match self.next_due {
            Some(due) => due,
            None => {
                trace!("plan {} has no next due date - using its schedule", self.id);
                self.due_date_of(self.paid + 1).ok_or_else(out_of_range)?
            }
        };

        let next = match rule {
            DueDateRule::CalendarMonth => shift_months(current, 1, self.anchor_day()),
            DueDateRule::ThirtyDays => current.checked_add_signed(Duration::days(30)),
        };

        next.ok_or_else(out_of_range)
    }
}
