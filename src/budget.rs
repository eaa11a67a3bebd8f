use crate::{
    error::LedgerError,
    ids::{BudgetId, CategoryId, ImputationId, TransactionId, UserId},
    period::PeriodWindow,
    CURRENCY_PRECISION,
};
use chrono::{DateTime, Utc};
use log::{debug, error, trace};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// The period a budget covers. Older budgets are stored against a month, newer
/// ones against explicit bounds, and both have to keep working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BudgetPeriod {
    Month { year: i32, month: u32 },
    Range { start: DateTime<Utc>, end: DateTime<Utc> },
}

/// What a budget is measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "category", rename_all = "snake_case")]
pub enum BudgetScope {
    /// Every expense tagged with the category counts
    Category(CategoryId),
    /// Only transactions explicitly imputed to the budget count
    Group,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub id: BudgetId,
    pub user_id: UserId,
    pub name: String,
    pub target: Decimal,
    pub scope: BudgetScope,
    pub period: BudgetPeriod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Expense,
    Income,
}

/// A transaction as far as budgets are concerned. `amount` is always positive;
/// `kind` says which way the money moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub occurred_at: DateTime<Utc>,
    pub category_id: Option<CategoryId>,
    pub kind: TransactionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputationStatus {
    Active,
    Removed,
}

/// A (possibly partial) allocation of a transaction to a budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetImputation {
    pub id: ImputationId,
    pub user_id: UserId,
    pub budget_id: BudgetId,
    pub transaction_id: TransactionId,
    pub amount: Decimal,
    pub percent: Option<Decimal>,
    pub comment: Option<String>,
    pub status: ImputationStatus,
}

/// How much of a transaction to impute.
///
/// With only a `percent` the amount is derived from it. With both, the amount has
/// to match the percent of the transaction. With neither, the whole transaction
/// is imputed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImputationRequest {
    pub amount: Option<Decimal>,
    pub percent: Option<Decimal>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetConsumption {
    pub consumed: Decimal,
    pub percent_consumed: Decimal,
    /// Negative once the budget is overspent
    pub available: Decimal,
}

impl BudgetPeriod {
    pub fn window(&self) -> Result<PeriodWindow, LedgerError> {
        match *self {
            BudgetPeriod::Month { year, month } => PeriodWindow::month_of(year, month)
                .ok_or_else(|| LedgerError::Validation(format!("{}-{} is not a month", year, month))),
            BudgetPeriod::Range { start, end } if start <= end => Ok(PeriodWindow { start, end }),
            BudgetPeriod::Range { start, end } => Err(LedgerError::Validation(format!(
                "budget period starts ({}) after it ends ({})",
                start, end
            ))),
        }
    }
}

impl Budget {
    pub fn new<S: Into<String>>(
        user_id: UserId,
        name: S,
        target: Decimal,
        scope: BudgetScope,
        period: BudgetPeriod,
    ) -> Result<Self, LedgerError> {
        if target < Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "budget target cannot be negative, got {}",
                target
            )));
        }

        // Reject a bad period now rather than on every consumption read
        period.window()?;

        Ok(Budget {
            id: BudgetId::new(),
            user_id,
            name: name.into(),
            target,
            scope,
            period,
        })
    }
}

impl BudgetImputation {
    pub fn is_active(&self) -> bool {
        self.status == ImputationStatus::Active
    }
}

/// Impute (part of) `transaction` to `budget`.
///
/// `existing` are the imputations already stored for the budget. Only one active
/// imputation may exist per budget and transaction.
pub fn create_imputation(
    user_id: UserId,
    budget: &Budget,
    transaction: &SourceTransaction,
    request: ImputationRequest,
    existing: &[BudgetImputation],
) -> Result<BudgetImputation, LedgerError> {
    if budget.user_id != user_id {
        error!("budget {} does not belong to {}", budget.id, user_id);
        return Err(LedgerError::not_found("budget", budget.id));
    }

    if transaction.user_id != user_id {
        error!("transaction {} does not belong to {}", transaction.id, user_id);
        return Err(LedgerError::not_found("transaction", transaction.id));
    }

    if let Some(percent) = request.percent {
        if percent <= Decimal::ZERO || percent > dec!(100) {
            return Err(LedgerError::Validation(format!(
                "percent must be within (0, 100], got {}",
                percent
            )));
        }
    }

    let from_percent = match request.percent {
        Some(percent) => Some(
            percent
                .checked_div(dec!(100))
                .and_then(|ratio| transaction.amount.checked_mul(ratio))
                .ok_or_else(|| LedgerError::out_of_range("imputed amount"))?
                .round_dp(CURRENCY_PRECISION),
        ),
        None => None,
    };

    let amount = match (request.amount, from_percent) {
        (Some(amount), Some(derived)) if amount != derived => {
            return Err(LedgerError::Validation(format!(
                "amount {} does not match {}% of {}",
                amount,
                request.percent.unwrap_or_default(),
                transaction.amount
            )));
        }
        (Some(amount), _) => amount,
        (None, Some(derived)) => derived,
        (None, None) => transaction.amount,
    };

    if amount <= Decimal::ZERO {
        return Err(LedgerError::Validation(format!(
            "imputed amount must be positive, got {}",
            amount
        )));
    }

    if amount > transaction.amount {
        error!(
            "imputation of {} exceeds transaction {} of {}",
            amount, transaction.id, transaction.amount
        );
        return Err(LedgerError::Validation(format!(
            "imputed amount {} exceeds the transaction amount {}",
            amount, transaction.amount
        )));
    }

    if let Some(active) = existing
        .iter()
        .find(|i| i.is_active() && i.budget_id == budget.id && i.transaction_id == transaction.id)
    {
        return Err(LedgerError::Conflict(format!(
            "transaction '{}' is already imputed to budget '{}' by '{}'",
            transaction.id, budget.id, active.id
        )));
    }

    let imputation = BudgetImputation {
        id: ImputationId::new(),
        user_id,
        budget_id: budget.id,
        transaction_id: transaction.id,
        amount,
        percent: request.percent,
        comment: request.comment,
        status: ImputationStatus::Active,
    };

    debug!(
        "imputed {} of transaction {} to budget {}",
        imputation.amount, transaction.id, budget.id
    );

    Ok(imputation)
}

/// Soft delete an imputation. The row is kept, marked as removed.
pub fn remove_imputation(
    user_id: UserId,
    imputation: &BudgetImputation,
) -> Result<BudgetImputation, LedgerError> {
    if imputation.user_id != user_id || !imputation.is_active() {
        return Err(LedgerError::not_found("imputation", imputation.id));
    }

    let mut removed = imputation.clone();
    removed.status = ImputationStatus::Removed;

    debug!("removed imputation {}", removed.id);

    Ok(removed)
}

/// How much of a budget has been used up.
///
/// Category budgets add up the owner's expenses in the category over the budget
/// period; imputations play no part. Group budgets add up their active
/// imputations, whatever category the transactions carry.
pub fn consumption(
    budget: &Budget,
    transactions: &[SourceTransaction],
    imputations: &[BudgetImputation],
) -> Result<BudgetConsumption, LedgerError> {
    let consumed = match budget.scope {
        BudgetScope::Category(category_id) => {
            let window = budget.period.window()?;

            transactions
                .iter()
                .filter(|t| {
                    t.user_id == budget.user_id
                        && t.kind == TransactionKind::Expense
                        && t.category_id == Some(category_id)
                        && window.contains(t.occurred_at)
                })
                .inspect(|t| trace!("budget {} consumes transaction {} ({})", budget.id, t.id, t.amount))
                .try_fold(Decimal::ZERO, |sum, t| sum.checked_add(t.amount))
        }
        BudgetScope::Group => imputations
            .iter()
            .filter(|i| i.budget_id == budget.id && i.is_active())
            .inspect(|i| trace!("budget {} consumes imputation {} ({})", budget.id, i.id, i.amount))
            .try_fold(Decimal::ZERO, |sum, i| sum.checked_add(i.amount)),
    }
    .ok_or_else(|| LedgerError::out_of_range("budget consumption"))?;

    let percent_consumed = if budget.target.is_zero() {
        Decimal::ZERO
    } else {
        consumed
            .checked_div(budget.target)
            .and_then(|ratio| ratio.checked_mul(dec!(100)))
            .ok_or_else(|| LedgerError::out_of_range("percent consumed"))?
            .round_dp(2)
    };

    let available = budget
        .target
        .checked_sub(consumed)
        .ok_or_else(|| LedgerError::out_of_range("available budget"))?;

    Ok(BudgetConsumption {
        consumed,
        percent_consumed,
        available,
    })
}
