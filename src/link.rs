use crate::{
    config::DueDateRule,
    error::LedgerError,
    ids::{AggregatePaymentId, LinkId, PlanId, UserId},
    installment::InstallmentPlan,
    store::{Changeset, Mutation},
};
use chrono::{DateTime, Utc};
use log::{debug, error, trace, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Card network a statement charge was issued through. Only used for display and
/// grouping, never for any of the reconciliation maths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardNetwork {
    Visa,
    Mastercard,
    Amex,
    Diners,
    Other,
}

/// One settled payment that may cover installments of several plans, e.g. a
/// credit card statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatePayment {
    pub id: AggregatePaymentId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub settled_at: DateTime<Utc>,
    pub description: String,
    pub network: CardNetwork,
}

/// Records that an aggregate payment covered one installment of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentLink {
    pub id: LinkId,
    pub payment_id: AggregatePaymentId,
    pub plan_id: PlanId,
    pub amount: Decimal,
}

/// Everything a linking run changed. Nothing has been stored yet: the whole
/// outcome must be committed as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkOutcome {
    pub payment: AggregatePayment,
    pub links: Vec<InstallmentLink>,
    /// Plans advanced by this run, in request order
    pub plans: Vec<InstallmentPlan>,
    /// Plans that were already linked to this payment and so left alone
    pub skipped: Vec<PlanId>,
}

impl CardNetwork {
    /// Guess the network from a free text statement description
    pub fn infer(description: &str) -> Self {
        let text = description.to_lowercase();

        if text.contains("visa") {
            CardNetwork::Visa
        } else if text.contains("mastercard") || text.contains("master card") {
            CardNetwork::Mastercard
        } else if text.contains("amex") || text.contains("american express") {
            CardNetwork::Amex
        } else if text.contains("diners") {
            CardNetwork::Diners
        } else {
            CardNetwork::Other
        }
    }
}

impl AggregatePayment {
    pub fn new<S: Into<String>>(
        user_id: UserId,
        amount: Decimal,
        settled_at: DateTime<Utc>,
        description: S,
    ) -> Result<Self, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "payment amount must be positive, got {}",
                amount
            )));
        }

        let description = description.into();

        Ok(AggregatePayment {
            id: AggregatePaymentId::new(),
            user_id,
            amount,
            settled_at,
            network: CardNetwork::infer(&description),
            description,
        })
    }
}

impl LinkOutcome {
    /// Sum of the new links, saturating at `Decimal::MAX`
    pub fn attributed_total(&self) -> Decimal {
        self.links
            .iter()
            .fold(Decimal::ZERO, |sum, l| sum.saturating_add(l.amount))
    }

    /// The payment, every new link and every advanced plan, for a single commit
    pub fn changeset(&self) -> Changeset {
        let mut changes = Changeset::new();
        changes.push(Mutation::PutAggregatePayment(self.payment.clone()));

        for link in &self.links {
            changes.push(Mutation::PutLink(link.clone()));
        }
        for plan in &self.plans {
            changes.push(Mutation::PutPlan(plan.clone()));
        }

        changes
    }
}

/// Apply one aggregate payment to several installment plans at once.
///
/// Each plan that isn't linked to `payment` yet gets a link for one installment
/// and is advanced by one installment. Plans that are already linked are skipped,
/// so submitting the same request twice changes nothing the second time.
///
/// This is all or nothing. Every plan is checked before the outcome is returned,
/// and a single bad plan fails the whole request.
pub fn link_payment(
    user_id: UserId,
    payment: &AggregatePayment,
    plans: &[InstallmentPlan],
    existing: &[InstallmentLink],
    rule: DueDateRule,
) -> Result<LinkOutcome, LedgerError> {
    if plans.is_empty() {
        return Err(LedgerError::Validation(
            "at least one installment plan is required".into(),
        ));
    }

    if payment.user_id != user_id {
        error!("payment {} does not belong to {}", payment.id, user_id);
        return Err(LedgerError::not_found("aggregate payment", payment.id));
    }

    let mut seen = HashSet::new();
    if let Some(dup) = plans.iter().find(|p| !seen.insert(p.id)) {
        return Err(LedgerError::Validation(format!(
            "plan '{}' is listed more than once",
            dup.id
        )));
    }

    let linked: HashSet<PlanId> = existing
        .iter()
        .filter(|l| l.payment_id == payment.id)
        .map(|l| l.plan_id)
        .collect();

    let mut outcome = LinkOutcome {
        payment: payment.clone(),
        links: Vec::new(),
        plans: Vec::new(),
        skipped: Vec::new(),
    };

    for plan in plans {
        if plan.user_id != user_id {
            error!("plan {} does not belong to {}", plan.id, user_id);
            return Err(LedgerError::not_found("installment plan", plan.id));
        }

        if linked.contains(&plan.id) {
            debug!("plan {} is already linked to payment {} - skipping", plan.id, payment.id);
            outcome.skipped.push(plan.id);
            continue;
        }

        let mut advanced = plan.clone();
        advanced.advance(rule)?;

        trace!(
            "linking plan {} ({}) to payment {} for {}",
            plan.id,
            advanced.progress(),
            payment.id,
            plan.installment_amount
        );

        outcome.links.push(InstallmentLink {
            id: LinkId::new(),
            payment_id: payment.id,
            plan_id: plan.id,
            amount: plan.installment_amount,
        });
        outcome.plans.push(advanced);
    }

    let total = outcome.attributed_total();
    if total > payment.amount {
        warn!(
            "payment {} of {} is attributed {} across {} plan(s)",
            payment.id,
            payment.amount,
            total,
            outcome.links.len()
        );
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::EngineConfig,
        error::ErrorKind,
        ids::PurchaseId,
        installment::OpenPlan,
    };
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn plan_with_remaining(user_id: UserId, term: u32, remaining: u32, amount: Decimal) -> InstallmentPlan {
        let request = OpenPlan {
            user_id,
            purchase_id: PurchaseId::new(),
            concept: "Fridge".into(),
            category_id: None,
            principal: amount * Decimal::from(term),
            term,
            installment_amount: amount,
            first_due: at(2024, 1, 10),
            day_anchor: None,
        };
        let mut plan = InstallmentPlan::open(request, None, &EngineConfig::default()).unwrap();

        while plan.remaining > remaining {
            plan.advance(DueDateRule::CalendarMonth).unwrap();
        }
        plan
    }

    fn statement(user_id: UserId) -> AggregatePayment {
        AggregatePayment::new(user_id, dec!(500), at(2024, 6, 5), "VISA statement June").unwrap()
    }

    #[test]
    fn infer_network() {
        assert_eq!(CardNetwork::infer("Pago VISA Galicia"), CardNetwork::Visa);
        assert_eq!(CardNetwork::infer("MasterCard resumen"), CardNetwork::Mastercard);
        assert_eq!(CardNetwork::infer("American Express"), CardNetwork::Amex);
        assert_eq!(CardNetwork::infer("Diners Club"), CardNetwork::Diners);
        assert_eq!(CardNetwork::infer("transfer"), CardNetwork::Other);
    }

    #[test]
    fn new_payment_must_be_positive() {
        let result = AggregatePayment::new(UserId::new(), dec!(-1), at(2024, 1, 1), "visa");
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn link_two_plans() {
        let user = UserId::new();
        let a = plan_with_remaining(user, 12, 5, dec!(100));
        let b = plan_with_remaining(user, 24, 5, dec!(50));
        let payment = statement(user);

        let outcome =
            link_payment(user, &payment, &[a.clone(), b.clone()], &[], DueDateRule::CalendarMonth)
                .unwrap();

        assert_eq!(outcome.links.len(), 2);
        assert_eq!(outcome.plans.len(), 2);
        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.plans[0].remaining, 4);
        assert_eq!(outcome.plans[1].remaining, 4);
        assert_eq!(outcome.plans[0].paid, a.paid + 1);
        assert_eq!(outcome.links[0].amount, dec!(100));
        assert_eq!(outcome.links[1].amount, dec!(50));
        assert_eq!(outcome.attributed_total(), dec!(150));
    }

    #[test]
    fn huge_installments_saturate_attributed_total() {
        let user = UserId::new();
        let a = plan_with_remaining(user, 1, 1, Decimal::MAX);
        let b = plan_with_remaining(user, 1, 1, Decimal::MAX);

        let outcome = link_payment(user, &statement(user), &[a, b], &[], DueDateRule::CalendarMonth)
            .unwrap();
        assert_eq!(outcome.links.len(), 2);
        assert_eq!(outcome.attributed_total(), Decimal::MAX);
    }

    #[test]
    fn changeset_contains_everything() {
        let user = UserId::new();
        let a = plan_with_remaining(user, 6, 5, dec!(10));
        let b = plan_with_remaining(user, 6, 5, dec!(10));
        let payment = statement(user);

        let outcome = link_payment(user, &payment, &[a, b], &[], DueDateRule::CalendarMonth).unwrap();
        // payment + 2 links + 2 plans
        assert_eq!(outcome.changeset().len(), 5);
    }

    #[test]
    fn resubmission_is_idempotent() {
        let user = UserId::new();
        let a = plan_with_remaining(user, 12, 5, dec!(100));
        let payment = statement(user);

        let first =
            link_payment(user, &payment, &[a.clone()], &[], DueDateRule::CalendarMonth).unwrap();
        let advanced = first.plans[0].clone();

        let second = link_payment(
            user,
            &payment,
            &[advanced.clone()],
            &first.links,
            DueDateRule::CalendarMonth,
        )
        .unwrap();

        assert!(second.links.is_empty());
        assert!(second.plans.is_empty());
        assert_eq!(second.skipped, vec![advanced.id]);
    }

    #[test]
    fn resubmission_of_settling_link_is_idempotent() {
        let user = UserId::new();
        let a = plan_with_remaining(user, 3, 1, dec!(100));
        let payment = statement(user);

        let first = link_payment(user, &payment, &[a], &[], DueDateRule::CalendarMonth).unwrap();
        let settled = first.plans[0].clone();
        assert!(settled.is_settled());

        let second =
            link_payment(user, &payment, &[settled], &first.links, DueDateRule::CalendarMonth);
        assert!(second.unwrap().links.is_empty());
    }

    #[test]
    fn links_to_other_payments_do_not_count() {
        let user = UserId::new();
        let a = plan_with_remaining(user, 12, 5, dec!(100));
        let earlier = InstallmentLink {
            id: LinkId::new(),
            payment_id: AggregatePaymentId::new(),
            plan_id: a.id,
            amount: dec!(100),
        };

        let outcome =
            link_payment(user, &statement(user), &[a], &[earlier], DueDateRule::CalendarMonth)
                .unwrap();
        assert_eq!(outcome.links.len(), 1);
    }

    #[test]
    fn settled_plan_fails_everything() {
        let user = UserId::new();
        let open = plan_with_remaining(user, 12, 5, dec!(100));
        let settled = plan_with_remaining(user, 3, 0, dec!(100));

        let err = link_payment(user, &statement(user), &[open, settled], &[], DueDateRule::CalendarMonth)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TerminalState);
    }

    #[test]
    fn empty_plan_list() {
        let user = UserId::new();
        let err = link_payment(user, &statement(user), &[], &[], DueDateRule::CalendarMonth).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn duplicate_plans() {
        let user = UserId::new();
        let a = plan_with_remaining(user, 12, 5, dec!(100));

        let err = link_payment(user, &statement(user), &[a.clone(), a], &[], DueDateRule::CalendarMonth)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn foreign_plan_is_not_found() {
        let user = UserId::new();
        let mine = plan_with_remaining(user, 12, 5, dec!(100));
        let theirs = plan_with_remaining(UserId::new(), 12, 5, dec!(100));

        let err = link_payment(user, &statement(user), &[mine, theirs], &[], DueDateRule::CalendarMonth)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn foreign_payment_is_not_found() {
        let user = UserId::new();
        let mine = plan_with_remaining(user, 12, 5, dec!(100));

        let err = link_payment(user, &statement(UserId::new()), &[mine], &[], DueDateRule::CalendarMonth)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn thirty_day_rule_for_linked_payments() {
        let user = UserId::new();
        let a = plan_with_remaining(user, 12, 12, dec!(100));

        let outcome = link_payment(user, &statement(user), &[a], &[], DueDateRule::ThirtyDays).unwrap();
        assert_eq!(outcome.plans[0].next_due, Some(at(2024, 2, 9)));
    }

    #[test]
    fn calendar_rule_for_linked_payments() {
        let user = UserId::new();
        let a = plan_with_remaining(user, 12, 12, dec!(100));

        let outcome = link_payment(user, &statement(user), &[a], &[], DueDateRule::CalendarMonth).unwrap();
        assert_eq!(outcome.plans[0].next_due, Some(at(2024, 2, 10)));
    }
}
