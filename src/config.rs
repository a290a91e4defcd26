//! Engine configuration and intent vocabularies.
//!
//! Everything here is immutable once constructed and passed explicitly
//! to the components that need it, so tests can run with alternate
//! vocabularies, timezones, and quiet windows.

use std::time::Duration;

use chrono_tz::Tz;

use crate::error::ConfigError;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Label written to `processed_by` on claimed events.
    pub processed_by: String,
    /// Whether quiet hours are enforced at all.
    pub quiet_hours_enabled: bool,
    /// Local hour the quiet window starts (inclusive).
    pub quiet_start_hour: u32,
    /// Local hour the quiet window ends (exclusive). The window wraps
    /// midnight when start > end.
    pub quiet_end_hour: u32,
    /// Business timezone for the quiet window and deferred schedules.
    pub business_timezone: Tz,
    /// Whether a deferred-delivery queue is available. Without it,
    /// replies inside quiet hours are dropped (and logged as such).
    pub deferred_delivery_enabled: bool,
    /// Suppress automated replies when any actor touched the
    /// conversation within this window.
    pub collision_cooldown: Duration,
    /// Claims older than this are treated as abandoned and retried.
    pub stale_claim_timeout: Duration,
    /// Re-engagement delay after a "not interested" reply.
    pub follow_up_days: i64,
    /// Shorter re-engagement delay after a "later / not now" reply.
    pub delay_follow_up_days: i64,
    /// Worker poll interval.
    pub poll_interval: Duration,
    /// Max inbound events pulled per poll.
    pub batch_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            processed_by: "autoresponder".to_string(),
            quiet_hours_enabled: true,
            quiet_start_hour: 21,
            quiet_end_hour: 9,
            business_timezone: chrono_tz::America::Chicago,
            deferred_delivery_enabled: true,
            collision_cooldown: Duration::from_secs(30 * 60),
            stale_claim_timeout: Duration::from_secs(15 * 60),
            follow_up_days: 30,
            delay_follow_up_days: 7,
            poll_interval: Duration::from_secs(60),
            batch_limit: 50,
        }
    }
}

impl EngineConfig {
    /// Build a config from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("PROCESSED_BY_LABEL") {
            let v = v.trim().to_string();
            if !v.is_empty() {
                cfg.processed_by = v;
            }
        }
        if let Ok(v) = std::env::var("QUIET_HOURS_ENFORCED") {
            cfg.quiet_hours_enabled = parse_bool("QUIET_HOURS_ENFORCED", &v)?;
        }
        if let Ok(v) = std::env::var("QUIET_START_HOUR") {
            cfg.quiet_start_hour = parse_hour("QUIET_START_HOUR", &v)?;
        }
        if let Ok(v) = std::env::var("QUIET_END_HOUR") {
            cfg.quiet_end_hour = parse_hour("QUIET_END_HOUR", &v)?;
        }
        if let Ok(v) = std::env::var("QUIET_TZ") {
            cfg.business_timezone = v
                .parse::<Tz>()
                .map_err(|_| ConfigError::UnknownTimezone(v))?;
        }
        if let Ok(v) = std::env::var("COOLDOWN_MINUTES") {
            cfg.collision_cooldown =
                Duration::from_secs(parse_u64("COOLDOWN_MINUTES", &v)? * 60);
        }
        if let Ok(v) = std::env::var("STALE_CLAIM_SECONDS") {
            cfg.stale_claim_timeout = Duration::from_secs(parse_u64("STALE_CLAIM_SECONDS", &v)?);
        }
        if let Ok(v) = std::env::var("POLL_INTERVAL_SECONDS") {
            cfg.poll_interval = Duration::from_secs(parse_u64("POLL_INTERVAL_SECONDS", &v)?);
        }
        if let Ok(v) = std::env::var("BATCH_LIMIT") {
            cfg.batch_limit = parse_u64("BATCH_LIMIT", &v)? as usize;
        }

        Ok(cfg)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{other}'"),
        }),
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

fn parse_hour(key: &str, value: &str) -> Result<u32, ConfigError> {
    let hour = parse_u64(key, value)? as u32;
    if hour > 23 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("hour out of range: {hour}"),
        });
    }
    Ok(hour)
}

// ── Vocabularies ────────────────────────────────────────────────────

/// Keyword sets driving the intent classifier.
///
/// Word entries are matched with word boundaries; multi-word entries as
/// whole phrases. Defaults mirror the production vocabularies.
#[derive(Debug, Clone)]
pub struct Lexicons {
    pub opt_out: Vec<String>,
    pub affirm: Vec<String>,
    pub deny: Vec<String>,
    pub price_context: Vec<String>,
    pub phone_context: Vec<String>,
    pub condition: Vec<String>,
    pub wrong_number: Vec<String>,
    pub delay: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Lexicons {
    fn default() -> Self {
        Self {
            opt_out: strings(&[
                "stop",
                "unsubscribe",
                "quit",
                "cancel",
                "end",
                "opt out",
                "opt-out",
                "remove me",
            ]),
            affirm: strings(&[
                "yes",
                "yeah",
                "yep",
                "yup",
                "sure",
                "correct",
                "affirmative",
                "that's me",
                "that is me",
                "i am",
                "of course",
                "still own",
            ]),
            deny: strings(&[
                "no",
                "nope",
                "nah",
                "not interested",
                "not selling",
                "no interest",
                "dont want to sell",
                "don't want to sell",
                "not looking to sell",
                "keeping it",
            ]),
            price_context: strings(&[
                "ask",
                "asking",
                "price",
                "offer",
                "how much",
                "ballpark",
                "range",
                "worth",
            ]),
            phone_context: strings(&["call", "text", "phone", "contact", "reach"]),
            condition: strings(&[
                "condition",
                "repairs",
                "needs work",
                "renovated",
                "updated",
                "remodeled",
                "tenant",
                "tenants",
                "vacant",
                "occupied",
                "as-is",
                "roof",
                "hvac",
                "foundation",
                "plumbing",
            ]),
            wrong_number: strings(&[
                "wrong number",
                "not mine",
                "not the owner",
                "no longer own",
                "i sold",
                "sold this",
                "wrong person",
                "dont own",
                "do not own",
            ]),
            delay: strings(&[
                "later",
                "not now",
                "next week",
                "next month",
                "busy",
                "call me back",
                "reach out later",
                "follow up",
            ]),
        }
    }
}
