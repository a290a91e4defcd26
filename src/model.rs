//! Core data model: contacts, conversation events, stages, deferred sends.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// ── Stage ───────────────────────────────────────────────────────────

/// Ordinal position in the scripted qualification conversation.
///
/// The normal progression is monotonically non-decreasing; `OptOut`
/// and `Dnc` are reachable from any stage and absorbing once entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Stage 1 — confirm the texted party owns the property.
    OwnershipConfirmation,
    /// Stage 2 — gauge openness to an offer.
    InterestFeeler,
    /// Stage 3 — ask for an asking price.
    PriceQualification,
    /// Stage 4 — collect property condition, then hand off.
    PropertyCondition,
    /// Terminal: explicit opt-out.
    OptOut,
    /// Terminal: wrong number / do-not-contact.
    Dnc,
}

impl Stage {
    /// Position along the normal progression. Terminal stages sort last
    /// so monotonicity checks hold across the whole lifecycle.
    pub fn ordinal(self) -> u8 {
        match self {
            Stage::OwnershipConfirmation => 1,
            Stage::InterestFeeler => 2,
            Stage::PriceQualification => 3,
            Stage::PropertyCondition => 4,
            Stage::OptOut | Stage::Dnc => 5,
        }
    }

    /// Terminal stages disable all further automated activity.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::OptOut | Stage::Dnc)
    }

    /// Stable label used in persistence and logs.
    pub fn label(self) -> &'static str {
        match self {
            Stage::OwnershipConfirmation => "ownership_confirmation",
            Stage::InterestFeeler => "interest_feeler",
            Stage::PriceQualification => "price_qualification",
            Stage::PropertyCondition => "property_condition",
            Stage::OptOut => "opt_out",
            Stage::Dnc => "dnc",
        }
    }

    /// Parse a persisted label, defaulting unknown values to stage 1.
    pub fn parse(label: &str) -> Stage {
        match label {
            "interest_feeler" => Stage::InterestFeeler,
            "price_qualification" => Stage::PriceQualification,
            "property_condition" => Stage::PropertyCondition,
            "opt_out" => Stage::OptOut,
            "dnc" => Stage::Dnc,
            _ => Stage::OwnershipConfirmation,
        }
    }
}

// ── Contact ─────────────────────────────────────────────────────────

/// Whether a contact is still an unqualified prospect or a promoted lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactKind {
    Prospect,
    Lead,
}

/// A phone-addressable party in the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub kind: ContactKind,
    /// E.164 phone number.
    pub phone: String,
    /// Market/region tag (e.g. a metro name).
    pub market: Option<String>,
    /// Owner name as sourced; first token is used for personalization.
    pub owner_name: Option<String>,
    pub property_address: Option<String>,
    pub property_locality: Option<String>,
    /// Asking price extracted from conversation, in whole dollars.
    pub asking_price: Option<i64>,
    /// Condition keywords with short surrounding context.
    pub condition_notes: Vec<String>,
    /// Free-text timeline/motivation, if volunteered.
    pub timeline: Option<String>,
    /// 1..=5, highest urgency signalled so far.
    pub urgency: Option<u8>,
    /// 0..=100 composite qualification score, recomputed per reply.
    pub quality_score: Option<u8>,
    pub stage: Stage,
    /// Set once the contact confirms (or declines as) the decision-maker.
    pub ownership_verified: bool,
    pub opted_out: bool,
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub last_outbound_at: Option<DateTime<Utc>>,
    /// Last activity by ANY actor, human or automated. The collision
    /// guard reads this field, so it must stay actor-agnostic.
    pub last_activity_at: Option<DateTime<Utc>>,
    pub reply_count: u32,
    pub send_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    /// A fresh prospect for a first-time inbound phone.
    pub fn new_prospect(phone: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: ContactKind::Prospect,
            phone: phone.to_string(),
            market: None,
            owner_name: None,
            property_address: None,
            property_locality: None,
            asking_price: None,
            condition_notes: Vec::new(),
            timeline: None,
            urgency: None,
            quality_score: None,
            stage: Stage::OwnershipConfirmation,
            ownership_verified: false,
            opted_out: false,
            last_inbound_at: None,
            last_outbound_at: None,
            last_activity_at: None,
            reply_count: 0,
            send_count: 0,
            created_at: now,
        }
    }

    /// First name for personalization, if we have a name at all.
    pub fn first_name(&self) -> Option<&str> {
        self.owner_name
            .as_deref()
            .and_then(|n| n.split_whitespace().next())
            .filter(|s| !s.is_empty())
    }
}

/// Targeted contact update. Only the fields touched by the current
/// message are set; the store writes nothing for `None` fields, so
/// stale in-memory state never clobbers unrelated columns.
#[derive(Debug, Clone, Default)]
pub struct ContactPatch {
    pub kind: Option<ContactKind>,
    pub stage: Option<Stage>,
    pub asking_price: Option<i64>,
    pub condition_notes: Option<Vec<String>>,
    pub timeline: Option<String>,
    pub urgency: Option<u8>,
    pub quality_score: Option<u8>,
    pub ownership_verified: Option<bool>,
    pub opted_out: Option<bool>,
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub last_outbound_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub increment_reply_count: bool,
    pub increment_send_count: bool,
}

// ── Conversation events ─────────────────────────────────────────────

/// Message direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One inbound or outbound message event.
///
/// `message_id` is the provider's unique identifier and the idempotency
/// key: reprocessing the same id must be a side-effect no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEvent {
    pub id: Uuid,
    pub message_id: String,
    pub direction: Direction,
    pub from_phone: String,
    pub to_phone: String,
    pub body: String,
    pub intent: Option<String>,
    pub stage: Stage,
    pub contact_id: Uuid,
    pub contact_kind: ContactKind,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    /// Worker label that claimed this event, if any.
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
}

// ── Deferred delivery ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredStatus {
    Queued,
    Sent,
    Dropped,
}

/// An outbound reply scheduled past a quiet-hours window (or as a
/// multi-day follow-up).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredEntry {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub to_phone: String,
    pub from_phone: String,
    pub body: String,
    /// Naive to the configured business timezone.
    pub scheduled_for: NaiveDateTime,
    pub status: DeferredStatus,
    pub created_at: DateTime<Utc>,
}

// ── Inbound payload ─────────────────────────────────────────────────

/// Raw inbound event from the transport collaborator's webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundSms {
    pub message_id: String,
    pub from_phone: String,
    pub to_phone: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl InboundSms {
    /// Validate mandatory fields and normalize phones to E.164.
    ///
    /// Rejects before any state mutation; callers treat the error as a
    /// structured rejection, not a retryable failure.
    pub fn validated(mut self) -> Result<Self, ValidationError> {
        if self.message_id.trim().is_empty() {
            return Err(ValidationError::MissingField("message_id"));
        }
        if self.body.trim().is_empty() {
            return Err(ValidationError::MissingField("body"));
        }
        self.from_phone = normalize_e164(&self.from_phone, "from_phone")?;
        self.to_phone = normalize_e164(&self.to_phone, "to_phone")?;
        Ok(self)
    }
}

/// Normalize a phone number to +E.164. Bare 10-digit US numbers get a
/// leading `+1`.
pub fn normalize_e164(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    let digits = if digits.len() == 10 {
        format!("1{digits}")
    } else {
        digits
    };
    if digits.len() == 11 && digits.starts_with('1') {
        return Ok(format!("+{digits}"));
    }
    if value.trim_start().starts_with('+') && digits.len() >= 8 {
        return Ok(format!("+{digits}"));
    }
    Err(ValidationError::InvalidPhone {
        field,
        value: value.to_string(),
    })
}

/// Last ten digits of a phone number, for cross-format matching.
pub fn last_10_digits(value: &str) -> Option<String> {
    let digits: Vec<char> = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 10 {
        return None;
    }
    Some(digits[digits.len() - 10..].iter().collect())
}
