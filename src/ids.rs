use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// Every record gets its own id type so that a plan id can never be handed to
// something expecting a budget id.
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                $name(uuid)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

define_id!(UserId, "usr-");
define_id!(CategoryId, "cat-");
define_id!(ObligationId, "obl-");
define_id!(PaymentId, "pay-");
define_id!(PurchaseId, "pur-");
define_id!(PlanId, "pln-");
define_id!(AggregatePaymentId, "agg-");
define_id!(LinkId, "lnk-");
define_id!(LedgerEntryId, "ent-");
define_id!(BudgetId, "bud-");
define_id!(TransactionId, "txn-");
define_id!(ImputationId, "imp-");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(PlanId::new(), PlanId::new());
    }

    #[test]
    fn display_is_prefixed() {
        let uuid = Uuid::new_v4();
        let id = BudgetId::from(uuid);
        assert_eq!(id.to_string(), format!("bud-{}", uuid));
    }

    #[test]
    fn serializes_as_bare_uuid() {
        let uuid = Uuid::new_v4();
        let json = serde_json::to_string(&PlanId::from(uuid)).unwrap();
        assert_eq!(json, format!("\"{}\"", uuid));
    }
}
