//! Urgency and lead-quality scoring.
//!
//! Both scores are cheap keyword heuristics over a single reply plus
//! the contact's accumulated qualification facts. They rank the queue
//! for human follow-up; nothing in the conversation flow branches on
//! them.

use crate::classify::Intent;

/// Keyword tiers for urgency, checked highest first.
const URGENCY_TIER_5: &[&str] = &["asap", "foreclosure", "immediately", "right away", "today"];
const URGENCY_TIER_4: &[&str] = &["emergency", "urgent", "urgently", "desperate"];
const URGENCY_TIER_3: &[&str] = &[
    "quick sale",
    "quickly",
    "soon",
    "next month",
    "within",
    "deadline",
    "relocat",
];

/// Assess urgency on a 1..=5 scale from a single message.
///
/// A positive-leaning intent floors the score at 2 even without any
/// urgency keyword.
pub fn assess_urgency(body: &str, intent: Intent) -> u8 {
    let text = body.to_lowercase();
    let keyword_tier = if URGENCY_TIER_5.iter().any(|k| text.contains(k)) {
        5
    } else if URGENCY_TIER_4.iter().any(|k| text.contains(k)) {
        4
    } else if URGENCY_TIER_3.iter().any(|k| text.contains(k)) {
        3
    } else {
        1
    };
    let intent_floor = match intent {
        Intent::Affirm | Intent::PriceProvided | Intent::AskOffer | Intent::ConditionInfo => 2,
        _ => 1,
    };
    keyword_tier.max(intent_floor)
}

/// Composite lead quality on a 0..=100 scale.
///
/// Additive: a positive intent, a known asking price, condition notes,
/// a stated timeline, and urgency each contribute independently, so a
/// fully-qualified urgent seller saturates near 100 while a bare
/// neutral reply sits near the 30-point base.
pub fn lead_quality(
    intent: Intent,
    asking_price: Option<i64>,
    condition_notes: &[String],
    timeline: Option<&str>,
    urgency: u8,
) -> u8 {
    let mut score: u32 = 30;
    if matches!(
        intent,
        Intent::Affirm | Intent::PriceProvided | Intent::AskOffer | Intent::ConditionInfo
    ) {
        score += 20;
    }
    if asking_price.is_some() {
        score += 15;
    }
    if !condition_notes.is_empty() {
        score += 10;
    }
    if timeline.is_some_and(|t| !t.trim().is_empty()) {
        score += 10;
    }
    score += u32::from(urgency.min(5)) * 3;
    score.min(100) as u8
}
