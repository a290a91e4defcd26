//! Deterministic reply composition from template pools.
//!
//! Template selection hashes (contact phone, pool name) to an index so
//! repeated renders of the same conversation state are reproducible for
//! audit, while different contacts still see varied copy. A failed
//! substitution falls back to a smaller hard-coded pool per key — never
//! a generic filler, which would stall price/condition collection.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use tracing::warn;

use crate::model::Contact;
use crate::stage::TemplateKey;

/// Token aliases accepted in templates. Multi-word tokens tolerate the
/// spellings different template authors use.
const FIRST_ALIASES: [&str; 3] = ["{First}", "{FirstName}", "{first_name}"];
const ADDRESS_ALIASES: [&str; 3] = ["{Address}", "{PropertyAddress}", "{property_address}"];
const LOCALITY_ALIASES: [&str; 3] = ["{City}", "{Locality}", "{property_city}"];

/// Message composer over named template pools.
pub struct Composer {
    pools: HashMap<TemplateKey, Vec<String>>,
}

impl Default for Composer {
    fn default() -> Self {
        Self::new(default_pools())
    }
}

impl Composer {
    pub fn new(pools: HashMap<TemplateKey, Vec<String>>) -> Self {
        Self { pools }
    }

    /// Replace or extend a pool (e.g. from operator-managed templates).
    pub fn set_pool(&mut self, key: TemplateKey, templates: Vec<String>) {
        self.pools.insert(key, templates);
    }

    /// Render the reply for `key`, personalized for `contact`.
    ///
    /// Never returns an empty string: substitution failures fall back
    /// to the hard-coded defaults for the same key.
    pub fn render(&self, key: TemplateKey, contact: &Contact) -> String {
        let pool = self.pools.get(&key).filter(|p| !p.is_empty());

        if let Some(pool) = pool {
            let template = pick(pool, &contact.phone, key.pool_name());
            if let Some(body) = substitute(template, contact) {
                return body;
            }
            warn!(
                pool = key.pool_name(),
                phone = %contact.phone,
                "Template substitution failed; using fallback pool"
            );
        }

        let fallback = fallback_pool(key);
        let template = pick(fallback, &contact.phone, key.pool_name());
        // Fallback templates carry no tokens, so substitution cannot
        // fail twice.
        substitute(template, contact).unwrap_or_else(|| template.to_string())
    }
}

/// Stable pool pick: hash of (contact identity, pool name) → index.
fn pick<'a, T: AsRef<str>>(pool: &'a [T], contact_key: &str, pool_name: &str) -> &'a str {
    let mut hasher = DefaultHasher::new();
    contact_key.hash(&mut hasher);
    pool_name.hash(&mut hasher);
    let idx = (hasher.finish() % pool.len() as u64) as usize;
    pool[idx].as_ref()
}

/// Substitute personalization tokens. Returns `None` when the template
/// still contains an unresolved token afterwards (unknown token name or
/// stray brace), which routes the caller to the fallback pool.
fn substitute(template: &str, contact: &Contact) -> Option<String> {
    let first = contact.first_name().unwrap_or("there");
    let address = contact.property_address.as_deref().unwrap_or("your property");
    let locality = contact.property_locality.as_deref().unwrap_or("");

    let mut out = template.to_string();
    for alias in FIRST_ALIASES {
        out = out.replace(alias, first);
    }
    for alias in ADDRESS_ALIASES {
        out = out.replace(alias, address);
    }
    for alias in LOCALITY_ALIASES {
        out = out.replace(alias, locality);
    }

    if out.contains('{') || out.contains('}') {
        return None;
    }

    // Empty substitutions leave double spaces; collapse them.
    let collapsed = out.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed)
}

/// Default template pools. Operators can override any of these with
/// managed templates; these ship in the binary so a fresh deploy still
/// holds a conversation.
fn default_pools() -> HashMap<TemplateKey, Vec<String>> {
    let mut pools = HashMap::new();
    pools.insert(
        TemplateKey::InterestPrompt,
        vec![
            "Great, thanks {First}! Would you be open to a cash offer on {Address} if the numbers made sense?".to_string(),
            "Appreciate it {First}. Any interest in an offer on {Address} if the price was right?".to_string(),
            "Thanks for confirming! Would you consider an offer on {Address}?".to_string(),
        ],
    );
    pools.insert(
        TemplateKey::AskPrice,
        vec![
            "Good to hear, {First}. Do you have a ballpark asking price in mind for {Address}?".to_string(),
            "Thanks {First} — what kind of number would you need to see for {Address}?".to_string(),
        ],
    );
    pools.insert(
        TemplateKey::ConditionPrompt,
        vec![
            "We'll run the numbers on our end. Quick check — what's the current condition of {Address}? Any repairs needed?".to_string(),
            "Happy to put something together. How's the condition of the property — anything needing work?".to_string(),
        ],
    );
    pools.insert(
        TemplateKey::ConditionAckPrompt,
        vec![
            "Thanks for that number, {First}. One more thing — what's the current condition of the property?".to_string(),
            "Got it, appreciate the figure. How's the condition — any repairs or updates we should know about?".to_string(),
        ],
    );
    pools.insert(
        TemplateKey::HandoffAck,
        vec![
            "Thanks {First}, that's really helpful. One of our team will follow up with you shortly.".to_string(),
            "Perfect, thank you. Someone from our team will be in touch soon with next steps.".to_string(),
        ],
    );
    pools.insert(
        TemplateKey::FollowUp30d,
        vec![
            "Hi {First}, just circling back about {Address}. Any change of plans? Happy to make an offer whenever the timing works.".to_string(),
            "Hey {First}, checking in on {Address} — still holding, or open to a conversation now?".to_string(),
        ],
    );
    pools.insert(
        TemplateKey::FollowUpWeek,
        vec![
            "Hi {First}, following up as promised about {Address}. Is now a better time?".to_string(),
            "Hey {First}, circling back on {Address} like you asked. Got a few minutes?".to_string(),
        ],
    );
    pools
}

/// Hard-coded, stage-appropriate fallbacks. Deliberately token-free so
/// they cannot themselves fail to render, and specific enough to keep
/// the conversation moving at the stage they serve.
fn fallback_pool(key: TemplateKey) -> &'static [&'static str] {
    match key {
        TemplateKey::InterestPrompt => {
            &["Thanks for confirming! Would you be open to a cash offer on the property if the numbers made sense?"]
        }
        TemplateKey::AskPrice => {
            &["Good to hear. Do you have a ballpark asking price in mind?"]
        }
        TemplateKey::ConditionPrompt => {
            &["We'll run the numbers. Quick check — what's the current condition of the property?"]
        }
        TemplateKey::ConditionAckPrompt => {
            &["Thanks for that number. What's the current condition of the property?"]
        }
        TemplateKey::HandoffAck => {
            &["Thanks, that's really helpful. One of our team will follow up shortly."]
        }
        TemplateKey::FollowUp30d => {
            &["Hi, just circling back about your property. Happy to make an offer whenever the timing works."]
        }
        TemplateKey::FollowUpWeek => {
            &["Hi, following up as promised about your property. Is now a better time?"]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const ALL_KEYS: [TemplateKey; 7] = [
        TemplateKey::InterestPrompt,
        TemplateKey::AskPrice,
        TemplateKey::ConditionPrompt,
        TemplateKey::ConditionAckPrompt,
        TemplateKey::HandoffAck,
        TemplateKey::FollowUp30d,
        TemplateKey::FollowUpWeek,
    ];

    fn contact(phone: &str) -> Contact {
        let mut c = Contact::new_prospect(phone, Utc::now());
        c.owner_name = Some("Maria Lopez".into());
        c.property_address = Some("12 Oak St".into());
        c
    }

    #[test]
    fn render_is_never_empty_for_any_key() {
        let composer = Composer::default();
        let c = contact("+15551234567");
        for key in ALL_KEYS {
            let body = composer.render(key, &c);
            assert!(!body.is_empty(), "{key:?} rendered empty");
        }
    }

    #[test]
    fn render_is_deterministic_per_contact() {
        let composer = Composer::default();
        let c = contact("+15551234567");
        let a = composer.render(TemplateKey::InterestPrompt, &c);
        let b = composer.render(TemplateKey::InterestPrompt, &c);
        assert_eq!(a, b);
    }

    #[test]
    fn render_varies_across_contacts() {
        let composer = Composer::default();
        // With a 3-template pool, some pair among a handful of phones
        // must land on different templates.
        let bodies: Vec<String> = (0..8)
            .map(|i| {
                let c = contact(&format!("+1555123456{i}"));
                composer.render(TemplateKey::InterestPrompt, &c)
            })
            .collect();
        let distinct: std::collections::HashSet<&String> = bodies.iter().collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn tokens_are_substituted() {
        let composer = Composer::default();
        let c = contact("+15551234567");
        let body = composer.render(TemplateKey::AskPrice, &c);
        assert!(body.contains("Maria") || body.contains("12 Oak St"));
        assert!(!body.contains('{'));
    }

    #[test]
    fn alias_spellings_are_accepted() {
        let mut composer = Composer::default();
        composer.set_pool(
            TemplateKey::AskPrice,
            vec!["Hi {first_name}, price for {PropertyAddress}?".to_string()],
        );
        let body = composer.render(TemplateKey::AskPrice, &contact("+15551234567"));
        assert_eq!(body, "Hi Maria, price for 12 Oak St?");
    }

    #[test]
    fn missing_fields_use_safe_defaults_without_double_spaces() {
        let composer = Composer::default();
        let bare = Contact::new_prospect("+15550000001", Utc::now());
        for key in ALL_KEYS {
            let body = composer.render(key, &bare);
            assert!(!body.contains("  "), "double space in {key:?}: {body:?}");
            assert!(!body.is_empty());
        }
    }

    #[test]
    fn empty_locality_collapses_cleanly() {
        let mut composer = Composer::default();
        composer.set_pool(
            TemplateKey::InterestPrompt,
            vec!["Selling in {City} near {Address}?".to_string()],
        );
        let body = composer.render(TemplateKey::InterestPrompt, &contact("+15551234567"));
        assert_eq!(body, "Selling in near 12 Oak St?");
        assert!(!body.contains("  "));
    }

    #[test]
    fn unknown_token_falls_back_to_stage_default() {
        let mut composer = Composer::default();
        composer.set_pool(
            TemplateKey::AskPrice,
            vec!["Hi {Nonexistent}, your price?".to_string()],
        );
        let body = composer.render(TemplateKey::AskPrice, &contact("+15551234567"));
        // Not the broken template, and still price-stage-appropriate.
        assert!(!body.contains('{'));
        assert!(body.to_lowercase().contains("price"));
    }

    #[test]
    fn empty_pool_falls_back() {
        let mut composer = Composer::default();
        composer.set_pool(TemplateKey::HandoffAck, Vec::new());
        let body = composer.render(TemplateKey::HandoffAck, &contact("+15551234567"));
        assert!(!body.is_empty());
    }

    #[test]
    fn fallbacks_are_token_free() {
        for key in ALL_KEYS {
            for t in fallback_pool(key) {
                assert!(!t.contains('{'), "fallback for {key:?} has a token");
            }
        }
    }
}
