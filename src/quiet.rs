//! Quiet-hours gating for outbound sends.
//!
//! The quiet window is expressed in local business-timezone hours and
//! wraps across midnight (the default 21→9 window covers evening and
//! early morning). Inside the window, a reply is either deferred to the
//! window's end or dropped — and the two MUST be distinguishable from
//! the log stream alone, because a dropped message will never be sent.

use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

/// What to do with an outbound reply right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Outside the quiet window; hand to transport immediately.
    SendNow,
    /// Inside the window with deferral available. The scheduled time is
    /// naive to the business timezone.
    Defer { scheduled_for: NaiveDateTime },
    /// Inside the window with no deferral mechanism. The reply is gone.
    DropSilent,
}

impl Disposition {
    pub fn label(self) -> &'static str {
        match self {
            Disposition::SendNow => "send_now",
            Disposition::Defer { .. } => "defer",
            Disposition::DropSilent => "drop_silent",
        }
    }
}

/// Configured quiet-hours policy.
#[derive(Debug, Clone)]
pub struct QuietHours {
    pub enabled: bool,
    /// Local hour the window opens (inclusive).
    pub start_hour: u32,
    /// Local hour the window closes (exclusive).
    pub end_hour: u32,
    pub timezone: Tz,
    pub deferral_available: bool,
}

impl QuietHours {
    /// Whether `now_utc` falls inside the enforced quiet window.
    pub fn is_quiet(&self, now_utc: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let local = now_utc.with_timezone(&self.timezone);
        let hour = chrono::Timelike::hour(&local);
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            // Wraps midnight: quiet from start..24 and 0..end.
            hour >= self.start_hour || hour < self.end_hour
        }
    }

    /// Decide the disposition for a send at `now_utc`.
    pub fn evaluate(&self, now_utc: DateTime<Utc>) -> Disposition {
        if !self.is_quiet(now_utc) {
            debug!(tz = %self.timezone, "Outside quiet window");
            return Disposition::SendNow;
        }
        let local = now_utc.with_timezone(&self.timezone);

        if self.deferral_available {
            let scheduled_for = self.window_end_after(local.naive_local());
            info!(
                disposition = "defer",
                scheduled_for = %scheduled_for,
                tz = %self.timezone,
                "Inside quiet hours; deferring send"
            );
            Disposition::Defer { scheduled_for }
        } else {
            // Distinct from "defer" on purpose: this message will never
            // be sent and operators need to see that.
            warn!(
                disposition = "drop_silent",
                tz = %self.timezone,
                "Inside quiet hours with no deferred delivery; dropping reply"
            );
            Disposition::DropSilent
        }
    }

    /// The next moment the quiet window ends, at or after `local`.
    fn window_end_after(&self, local: NaiveDateTime) -> NaiveDateTime {
        let end_time = NaiveTime::from_hms_opt(self.end_hour, 0, 0)
            .unwrap_or(NaiveTime::MIN);
        let today_end = local.date().and_time(end_time);
        if local < today_end {
            today_end
        } else {
            today_end + chrono::Duration::days(1)
        }
    }

    /// Convert a business-timezone-naive schedule back to UTC, for
    /// comparing deferred entries against the current instant. An
    /// ambiguous local time (DST fold) resolves to the earlier instant.
    pub fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        match self.timezone.from_local_datetime(&local) {
            chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
            chrono::LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            chrono::LocalResult::None => {
                // Spring-forward gap; nudge an hour later.
                let shifted = local + chrono::Duration::hours(1);
                self.to_utc(shifted)
            }
        }
    }

    /// Current business-timezone-naive time, for stamping schedules.
    pub fn local_now(&self, now_utc: DateTime<Utc>) -> NaiveDateTime {
        now_utc.with_timezone(&self.timezone).naive_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn gate(enabled: bool, deferral: bool) -> QuietHours {
        QuietHours {
            enabled,
            start_hour: 21,
            end_hour: 9,
            timezone: chrono_tz::America::Chicago,
            deferral_available: deferral,
        }
    }

    /// A UTC instant at the given Chicago local hour (CST, UTC-6).
    fn chicago_winter(hour: u32) -> DateTime<Utc> {
        chrono_tz::America::Chicago
            .with_ymd_and_hms(2025, 1, 15, hour, 30, 0)
            .single()
            .expect("unambiguous winter time")
            .with_timezone(&Utc)
    }

    #[test]
    fn daytime_sends_now() {
        assert_eq!(gate(true, true).evaluate(chicago_winter(14)), Disposition::SendNow);
        assert_eq!(gate(true, true).evaluate(chicago_winter(9)), Disposition::SendNow);
        assert_eq!(gate(true, true).evaluate(chicago_winter(20)), Disposition::SendNow);
    }

    #[test]
    fn late_evening_defers_to_morning() {
        let d = gate(true, true).evaluate(chicago_winter(22));
        match d {
            Disposition::Defer { scheduled_for } => {
                assert_eq!(
                    scheduled_for,
                    NaiveDate::from_ymd_opt(2025, 1, 16)
                        .unwrap()
                        .and_hms_opt(9, 0, 0)
                        .unwrap()
                );
            }
            other => panic!("expected Defer, got {other:?}"),
        }
    }

    #[test]
    fn early_morning_defers_to_same_day() {
        let d = gate(true, true).evaluate(chicago_winter(6));
        match d {
            Disposition::Defer { scheduled_for } => {
                assert_eq!(
                    scheduled_for,
                    NaiveDate::from_ymd_opt(2025, 1, 15)
                        .unwrap()
                        .and_hms_opt(9, 0, 0)
                        .unwrap()
                );
            }
            other => panic!("expected Defer, got {other:?}"),
        }
    }

    #[test]
    fn no_deferral_drops_silently() {
        assert_eq!(
            gate(true, false).evaluate(chicago_winter(23)),
            Disposition::DropSilent
        );
    }

    #[test]
    fn disabled_gate_always_sends() {
        assert_eq!(gate(false, true).evaluate(chicago_winter(3)), Disposition::SendNow);
    }

    #[test]
    fn non_wrapping_window() {
        let g = QuietHours {
            enabled: true,
            start_hour: 12,
            end_hour: 14,
            timezone: chrono_tz::America::Chicago,
            deferral_available: true,
        };
        assert!(matches!(
            g.evaluate(chicago_winter(13)),
            Disposition::Defer { .. }
        ));
        assert_eq!(g.evaluate(chicago_winter(15)), Disposition::SendNow);
    }

    #[test]
    fn disposition_labels_are_distinct() {
        let labels = [
            Disposition::SendNow.label(),
            Disposition::Defer {
                scheduled_for: NaiveDate::from_ymd_opt(2025, 1, 1)
                    .unwrap()
                    .and_hms_opt(9, 0, 0)
                    .unwrap(),
            }
            .label(),
            Disposition::DropSilent.label(),
        ];
        let distinct: std::collections::HashSet<&str> = labels.into_iter().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn round_trip_through_utc() {
        let g = gate(true, true);
        let local = NaiveDate::from_ymd_opt(2025, 1, 16)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let utc = g.to_utc(local);
        assert_eq!(g.local_now(utc), local);
    }
}
