//! Reconciliation of recurring obligations, installment plans and budgets.
//!
//! Everything that works out state (which period a payment falls in, what an
//! installment plan looks like after a payment, how much of a budget is used) is a
//! pure function of its inputs and an injected `now`. The [`Engine`] wraps those
//! calculations with ownership checks and commits the rows they produce through a
//! [`RecordStore`], one changeset per operation.

mod budget;
mod config;
mod engine;
mod error;
mod ids;
mod installment;
mod link;
mod obligation;
mod period;
mod periodicity;
mod store;

pub use budget::{
    consumption as budget_consumption, create_imputation, remove_imputation, Budget,
    BudgetConsumption, BudgetImputation, BudgetPeriod, BudgetScope, ImputationRequest,
    ImputationStatus, SourceTransaction, TransactionKind,
};
pub use config::{ConfigError, DueDateRule, EngineConfig, MAX_ANCHOR_DAY};
pub use engine::Engine;
pub use error::{ErrorKind, LedgerError};
pub use ids::{
    AggregatePaymentId, BudgetId, CategoryId, ImputationId, LedgerEntryId, LinkId, ObligationId,
    PaymentId, PlanId, PurchaseId, TransactionId, UserId,
};
pub use installment::{InstallmentAdvance, InstallmentPlan, LedgerEntry, OpenPlan};
pub use link::{link_payment, AggregatePayment, CardNetwork, InstallmentLink, LinkOutcome};
pub use obligation::{
    payments_in_window, ObligationState, ObligationStatus, Payment, PaymentStatus,
    RecurringObligation,
};
pub use period::{PeriodStrategy, PeriodWindow};
pub use periodicity::{PeriodUnit, Periodicity};
pub use store::{Changeset, MemoryStore, Mutation, RecordStore, StoreError};

// This represents the number of decimal places that a currency can validly express.
// @todo Support the full range of currency precisions specified in ISO 4217.
pub const CURRENCY_PRECISION: u32 = 2;
