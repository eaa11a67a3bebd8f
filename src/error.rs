use crate::{ids::PlanId, store::StoreError};
use thiserror::Error;

/// The broad class of a failure. Callers decide what to show (or retry) based on
/// this, never on the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    TerminalState,
}

#[derive(Error, Debug, PartialEq)]
pub enum LedgerError {
    #[error("{entity} '{id}' does not exist")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("conflicting state: {0}")]
    Conflict(String),
    #[error("installment plan '{plan}' is already settled")]
    Settled { plan: PlanId },
    #[error("the record store rejected the changes")]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    // Amounts that overflow `Decimal` are reported as bad input, never panicked on
    pub(crate) fn out_of_range(what: &str) -> Self {
        LedgerError::Validation(format!("{} is out of range", what))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::Settled { .. } => ErrorKind::TerminalState,
            LedgerError::Store(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_of_settled_plan() {
        let err = LedgerError::Settled { plan: PlanId::new() };
        assert_eq!(err.kind(), ErrorKind::TerminalState);
    }

    #[test]
    fn not_found_message_names_entity() {
        let err = LedgerError::not_found("budget", "abc");
        assert_eq!(err.to_string(), "budget 'abc' does not exist");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn out_of_range_is_validation() {
        let err = LedgerError::out_of_range("plan total");
        assert_eq!(err.to_string(), "invalid input: plan total is out of range");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn stale_store_write_is_a_conflict() {
        let err = LedgerError::from(StoreError::StaleWrite {
            plan: PlanId::new(),
            expected: 2,
            found: 3,
        });
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
