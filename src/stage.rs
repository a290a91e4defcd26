//! Stage transition table: (stage, intent) → (next stage, action).
//!
//! Total over the whole product type. The compiler checks exhaustiveness
//! of the outer stage match; each arm carries an explicit default so no
//! (stage, intent) pair is ever undefined. The default is a deliberate
//! safety behavior (hold the stage, do nothing), not unreachable code.

use serde::{Deserialize, Serialize};

use crate::classify::Intent;
use crate::model::Stage;

/// Template pool identifiers for composed replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKey {
    /// Stage 2 opener: "are you open to an offer on {Address}?"
    InterestPrompt,
    /// Stage 3 opener: ask for a ballpark asking price.
    AskPrice,
    /// Stage 4 opener: ask about property condition.
    ConditionPrompt,
    /// Stage 4 opener acknowledging a stated price first.
    ConditionAckPrompt,
    /// Short acknowledgement before human handoff.
    HandoffAck,
    /// Re-engagement text queued ~30 days out.
    FollowUp30d,
    /// Re-engagement text queued about a week out.
    FollowUpWeek,
}

impl TemplateKey {
    pub fn pool_name(self) -> &'static str {
        match self {
            TemplateKey::InterestPrompt => "interest_prompt",
            TemplateKey::AskPrice => "ask_price",
            TemplateKey::ConditionPrompt => "condition_prompt",
            TemplateKey::ConditionAckPrompt => "condition_ack_prompt",
            TemplateKey::HandoffAck => "handoff_ack",
            TemplateKey::FollowUp30d => "follow_up_30d",
            TemplateKey::FollowUpWeek => "follow_up_week",
        }
    }
}

/// What the engine should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Compose and send (or defer) an immediate reply.
    Reply(TemplateKey),
    /// Queue a re-engagement message roughly a month out; no reply now.
    FollowUp30d,
    /// Queue a re-engagement message about a week out; no reply now.
    FollowUpWeek,
    /// No reply and no follow-up.
    None,
}

impl Action {
    /// The template this action renders now, if any.
    pub fn reply_template(self) -> Option<TemplateKey> {
        match self {
            Action::Reply(key) => Some(key),
            _ => None,
        }
    }
}

/// Outcome of one table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: Stage,
    pub action: Action,
    /// Whether the conversation is now terminal (opt-out / DNC).
    pub terminal: bool,
    /// Whether this reply counts as confirmation that we reached the
    /// decision-maker on this phone. A declined-interest reply verifies
    /// ownership too: they answered for the property, they just said no.
    pub verifies_ownership: bool,
}

impl Transition {
    fn hold(stage: Stage) -> Self {
        Self {
            next: stage,
            action: Action::None,
            terminal: stage.is_terminal(),
            verifies_ownership: false,
        }
    }

    fn advance(next: Stage, action: Action) -> Self {
        Self {
            next,
            action,
            terminal: false,
            verifies_ownership: false,
        }
    }

    fn verified(mut self) -> Self {
        self.verifies_ownership = true;
        self
    }
}

/// Compute the transition for a (stage, intent) snapshot.
///
/// Idempotent with respect to the snapshot: two workers applying the
/// same (stage, intent) land on the same next stage.
pub fn transition(stage: Stage, intent: Intent) -> Transition {
    // Absorbing: no automated stage change out of OptOut/Dnc.
    if stage.is_terminal() {
        return Transition::hold(stage);
    }
    // Stage-agnostic hard stops.
    if intent == Intent::OptOut {
        return Transition {
            next: Stage::OptOut,
            action: Action::None,
            terminal: true,
            verifies_ownership: false,
        };
    }
    if intent == Intent::WrongNumber {
        return Transition {
            next: Stage::Dnc,
            action: Action::None,
            terminal: true,
            verifies_ownership: false,
        };
    }
    if intent == Intent::Delay {
        return Transition {
            next: stage,
            action: Action::FollowUpWeek,
            terminal: false,
            verifies_ownership: false,
        };
    }

    match stage {
        Stage::OwnershipConfirmation => match intent {
            Intent::Affirm => {
                Transition::advance(Stage::InterestFeeler, Action::Reply(TemplateKey::InterestPrompt))
                    .verified()
            }
            // Declining is still an answer from the decision-maker:
            // record ownership, come back in 30 days.
            Intent::Deny => {
                Transition::advance(Stage::InterestFeeler, Action::FollowUp30d).verified()
            }
            // Price talk before ownership is confirmed gets the safety
            // default; the promotion rule still sees the raw intent.
            Intent::PriceProvided
            | Intent::AskOffer
            | Intent::ConditionInfo
            | Intent::Noop => Transition::hold(stage),
            Intent::OptOut | Intent::WrongNumber | Intent::Delay => unreachable!("handled above"),
        },

        Stage::InterestFeeler => match intent {
            Intent::Affirm => {
                Transition::advance(Stage::PriceQualification, Action::Reply(TemplateKey::AskPrice))
            }
            Intent::Deny => Transition::advance(Stage::InterestFeeler, Action::FollowUp30d).verified(),
            Intent::AskOffer => Transition::advance(
                Stage::PropertyCondition,
                Action::Reply(TemplateKey::ConditionPrompt),
            ),
            Intent::PriceProvided => Transition::advance(
                Stage::PropertyCondition,
                Action::Reply(TemplateKey::ConditionAckPrompt),
            ),
            Intent::ConditionInfo | Intent::Noop => Transition::hold(stage),
            Intent::OptOut | Intent::WrongNumber | Intent::Delay => unreachable!("handled above"),
        },

        Stage::PriceQualification => match intent {
            Intent::PriceProvided => Transition::advance(
                Stage::PropertyCondition,
                Action::Reply(TemplateKey::ConditionAckPrompt),
            ),
            // "what's your offer?" and a bare "yes" both mean: run the
            // numbers, move on to condition.
            Intent::AskOffer | Intent::Affirm => Transition::advance(
                Stage::PropertyCondition,
                Action::Reply(TemplateKey::ConditionPrompt),
            ),
            Intent::Deny => {
                Transition::advance(Stage::PriceQualification, Action::FollowUp30d).verified()
            }
            Intent::ConditionInfo | Intent::Noop => Transition::hold(stage),
            Intent::OptOut | Intent::WrongNumber | Intent::Delay => unreachable!("handled above"),
        },

        // The autoresponder never advances past condition collection;
        // from here a human (or AI closer) takes over.
        Stage::PropertyCondition => match intent {
            Intent::ConditionInfo => Transition::advance(
                Stage::PropertyCondition,
                Action::Reply(TemplateKey::HandoffAck),
            ),
            Intent::Affirm
            | Intent::Deny
            | Intent::PriceProvided
            | Intent::AskOffer
            | Intent::Noop => Transition::hold(stage),
            Intent::OptOut | Intent::WrongNumber | Intent::Delay => unreachable!("handled above"),
        },

        Stage::OptOut | Stage::Dnc => unreachable!("terminal stages handled above"),
    }
}
