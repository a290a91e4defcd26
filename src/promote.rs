//! Lead promotion rule.
//!
//! A prospect becomes a lead the first time they signal real interest.
//! Promotion is a one-way, at-most-once flip of the contact's kind;
//! the contact row itself (and its phone key) never moves, so a second
//! qualifying message has nothing left to do.

use crate::classify::Intent;
use crate::model::{ContactKind, Stage};

/// Whether this (stage, intent) pair signals enough interest to promote.
///
/// A bare "yes" at ownership confirmation only confirms ownership; it
/// says nothing about selling, so it never promotes. Price signals
/// promote from any live stage.
pub fn qualifies(stage: Stage, intent: Intent) -> bool {
    if stage.is_terminal() {
        return false;
    }
    match intent {
        Intent::Affirm => stage == Stage::InterestFeeler,
        Intent::PriceProvided | Intent::AskOffer => true,
        Intent::ConditionInfo => stage == Stage::PropertyCondition,
        _ => false,
    }
}

/// The kind to write for a contact after this message, if it changed.
pub fn next_kind(kind: ContactKind, stage: Stage, intent: Intent) -> Option<ContactKind> {
    match kind {
        ContactKind::Lead => None,
        ContactKind::Prospect => qualifies(stage, intent).then_some(ContactKind::Lead),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_yes_does_not_promote() {
        assert!(!qualifies(Stage::OwnershipConfirmation, Intent::Affirm));
    }

    #[test]
    fn interest_yes_promotes() {
        assert!(qualifies(Stage::InterestFeeler, Intent::Affirm));
    }

    #[test]
    fn price_signals_promote_from_any_live_stage() {
        for stage in [
            Stage::OwnershipConfirmation,
            Stage::InterestFeeler,
            Stage::PriceQualification,
            Stage::PropertyCondition,
        ] {
            assert!(qualifies(stage, Intent::PriceProvided), "{stage:?}");
            assert!(qualifies(stage, Intent::AskOffer), "{stage:?}");
        }
    }

    #[test]
    fn condition_info_promotes_only_at_condition_stage() {
        assert!(qualifies(Stage::PropertyCondition, Intent::ConditionInfo));
        assert!(!qualifies(Stage::InterestFeeler, Intent::ConditionInfo));
    }

    #[test]
    fn terminal_stages_never_promote() {
        assert!(!qualifies(Stage::OptOut, Intent::PriceProvided));
        assert!(!qualifies(Stage::Dnc, Intent::Affirm));
    }

    #[test]
    fn promotion_is_one_way() {
        assert_eq!(
            next_kind(ContactKind::Prospect, Stage::InterestFeeler, Intent::Affirm),
            Some(ContactKind::Lead)
        );
        assert_eq!(
            next_kind(ContactKind::Lead, Stage::InterestFeeler, Intent::Affirm),
            None
        );
        assert_eq!(
            next_kind(ContactKind::Prospect, Stage::OwnershipConfirmation, Intent::Affirm),
            None
        );
    }
}
