use crate::{
    error::LedgerError,
    ids::{ObligationId, PaymentId, UserId},
    period::{PeriodStrategy, PeriodWindow},
    periodicity::Periodicity,
};
use chrono::{DateTime, Utc};
use log::{debug, trace};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A recurring commitment, e.g. a subscription or a utility bill.
///
/// Obligations are never deleted while payments point at them. Instead they are
/// retired, which keeps the payment history readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringObligation {
    pub id: ObligationId,
    pub user_id: UserId,
    pub concept: String,
    /// Nominal amount owed each period
    pub amount: Decimal,
    pub periodicity: Periodicity,
    pub next_due: Option<DateTime<Utc>>,
    pub status: ObligationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationStatus {
    Active,
    Retired,
}

/// A settled transaction applied toward an obligation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub obligation_id: ObligationId,
    pub amount: Decimal,
    pub settled_at: DateTime<Utc>,
    /// The accounting date, when it differs from the settlement date
    pub imputed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    PartiallyPaid,
    Paid,
}

/// Derived state of an obligation for its current period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObligationState {
    pub window: PeriodWindow,
    pub total_paid_in_period: Decimal,
    /// Negative when the period has been overpaid
    pub remaining_in_period: Decimal,
    pub percent_paid: Decimal,
    pub status: PaymentStatus,
    pub overdue: bool,
}

impl Payment {
    /// The instant used to decide which period a payment belongs to
    pub fn effective_at(&self) -> DateTime<Utc> {
        self.imputed_at.unwrap_or(self.settled_at)
    }
}

impl RecurringObligation {
    pub fn new<S: Into<String>>(
        user_id: UserId,
        concept: S,
        amount: Decimal,
        periodicity: Periodicity,
        next_due: Option<DateTime<Utc>>,
    ) -> Result<Self, LedgerError> {
        let concept = concept.into();

        if concept.trim().is_empty() {
            return Err(LedgerError::Validation("an obligation needs a concept".into()));
        }

        if amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "obligation amount must be positive, got {}",
                amount
            )));
        }

        Ok(RecurringObligation {
            id: ObligationId::new(),
            user_id,
            concept,
            amount,
            periodicity,
            next_due,
            status: ObligationStatus::Active,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == ObligationStatus::Active
    }

    pub fn period_strategy(&self) -> PeriodStrategy {
        PeriodStrategy::for_obligation(&self.periodicity, self.next_due)
    }

    /// Work out how much of the current period has been paid.
    ///
    /// This is a pure function of the obligation, the payments and `now`, so it is
    /// safe to call as often as a display needs. Payments that belong to another
    /// obligation, or fall outside the current period, are ignored. Callers with a
    /// long history should pre-filter with [`payments_in_window`].
    ///
    /// Fails only when the totals don't fit in a `Decimal`.
    pub fn resolve(
        &self,
        payments: &[Payment],
        now: DateTime<Utc>,
    ) -> Result<ObligationState, LedgerError> {
        let window = self.period_strategy().window(now);

        debug!(
            "resolving '{}' over {} - {}",
            self.concept, window.start, window.end
        );

        let total_paid_in_period = payments_in_window(payments, &window)
            .filter(|p| p.obligation_id == self.id)
            .inspect(|p| trace!("counting payment {} of {}", p.id, p.amount))
            .try_fold(Decimal::ZERO, |sum, p| sum.checked_add(p.amount))
            .ok_or_else(|| LedgerError::out_of_range("total paid in period"))?;

        let status = if total_paid_in_period >= self.amount {
            PaymentStatus::Paid
        } else if total_paid_in_period > Decimal::ZERO {
            PaymentStatus::PartiallyPaid
        } else {
            PaymentStatus::Pending
        };

        let percent_paid = if self.amount.is_zero() {
            Decimal::ZERO
        } else {
            total_paid_in_period
                .checked_div(self.amount)
                .and_then(|ratio| ratio.checked_mul(dec!(100)))
                .ok_or_else(|| LedgerError::out_of_range("percent paid"))?
                .round_dp(2)
        };

        let remaining_in_period = self
            .amount
            .checked_sub(total_paid_in_period)
            .ok_or_else(|| LedgerError::out_of_range("remaining in period"))?;

        let overdue = status != PaymentStatus::Paid && self.next_due.map_or(false, |due| due < now);

        Ok(ObligationState {
            window,
            total_paid_in_period,
            remaining_in_period,
            percent_paid,
            status,
            overdue,
        })
    }

    /// Move the next due date forward by whole periods until it is no longer in the
    /// past. Returns how many periods were skipped.
    ///
    /// Every step is measured from the original due date, so a due date on the 31st
    /// stays on the 31st in long months instead of sticking to the 28th after
    /// passing February.
    pub fn roll_over(&mut self, now: DateTime<Utc>) -> Result<u32, LedgerError> {
        if !self.is_active() {
            return Err(LedgerError::Conflict(format!(
                "obligation '{}' is retired",
                self.id
            )));
        }

        let (due, unit) = match (self.next_due, self.periodicity.unit()) {
            (Some(due), Some(unit)) => (due, unit),
            _ => return Ok(0),
        };

        let mut steps = 0;
        let mut next = due;
        while next < now {
            steps += 1;
            next = unit.shift(due, steps as i32).ok_or_else(|| {
                LedgerError::Validation(format!("cannot roll '{}' past {}", self.concept, next))
            })?;
        }

        if steps > 0 {
            debug!("'{}' rolled over {} period(s) to {}", self.concept, steps, next);
            self.next_due = Some(next);
        }

        Ok(steps)
    }

    pub fn retire(&mut self) -> Result<(), LedgerError> {
        if !self.is_active() {
            return Err(LedgerError::Conflict(format!(
                "obligation '{}' is already retired",
                self.id
            )));
        }

        self.status = ObligationStatus::Retired;
        Ok(())
    }
}

/// Payments whose effective instant falls within `window`
pub fn payments_in_window<'a>(
    payments: &'a [Payment],
    window: &'a PeriodWindow,
) -> impl Iterator<Item = &'a Payment> + 'a {
    payments
        .iter()
        .filter(move |p| window.contains(p.effective_at()))
}
