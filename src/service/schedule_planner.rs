//! Decides whether a car's vendor charge schedule has to be rewritten.
//!
//! The vendor only schedules on quarter hours, so every desired start is
//! quantized first; a quantized value equal to the one the car already
//! reports is never sent again.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use tracing::{debug, trace};

const SCHEDULE_STEP_MINUTES: u32 = 15;

/// Parameters of `command/set_scheduled_charging`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleChange {
    pub enable: bool,
    /// Minutes since local midnight.
    pub time_minutes: u32,
}

impl ScheduleChange {
    pub const DISABLE: ScheduleChange = ScheduleChange {
        enable: false,
        time_minutes: 0,
    };

    /// The vendor expects both values as strings.
    pub fn to_body(self) -> serde_json::Value {
        serde_json::json!({
            "enable": self.enable.to_string(),
            "time": self.time_minutes.to_string(),
        })
    }
}

/// Ceil the minute to the next quarter hour and drop seconds. Minute 60 rolls
/// into the next hour.
pub fn round_to_next_quarter_hour(start: DateTime<Utc>) -> DateTime<Utc> {
    let minute = start.minute();
    let rounded = minute.div_ceil(SCHEDULE_STEP_MINUTES) * SCHEDULE_STEP_MINUTES;
    let hour_start = start
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(start);
    let quantized = hour_start + Duration::minutes(i64::from(rounded));
    debug!(%start, %quantized, "Rounded charging start time");
    quantized
}

/// `None` when nothing has to be sent, otherwise the parameters to send.
///
/// `current` is the scheduled start the car currently reports, `tz` the zone
/// the car counts "minutes since midnight" in.
pub fn plan_schedule_change<Tz: TimeZone>(
    desired: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    current: Option<DateTime<Utc>>,
    tz: &Tz,
) -> Option<ScheduleChange> {
    trace!(?desired, %now, ?current, "plan_schedule_change");
    let desired = desired.map(round_to_next_quarter_hour);
    if desired == current {
        debug!("Correct charging start time already set");
        return None;
    }

    let Some(start) = desired else {
        debug!("Disable scheduled charging");
        return Some(ScheduleChange::DISABLE);
    };

    let until_start = start - now;
    if until_start <= Duration::zero() || until_start > Duration::hours(24) {
        debug!(
            %start,
            "Charge schedule not changed as start is in the past or more than 24 hours ahead"
        );
        return None;
    }

    let local = start.with_timezone(tz);
    let time_minutes = local.hour() * 60 + local.minute();
    Some(ScheduleChange {
        enable: true,
        time_minutes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn quantized_minutes_are_quarter_hours_and_idempotent() {
        let base = at("2024-05-01T10:00:00Z");
        for offset_secs in (0..2 * 3600).step_by(37) {
            let t = base + Duration::seconds(offset_secs);
            let q = round_to_next_quarter_hour(t);
            assert!([0, 15, 30, 45].contains(&q.minute()), "{t} -> {q}");
            assert_eq!(q.second(), 0);
            assert_eq!(round_to_next_quarter_hour(q), q);
        }
    }

    #[test]
    fn minute_overflow_rolls_into_next_hour() {
        assert_eq!(
            round_to_next_quarter_hour(at("2024-05-01T23:52:10Z")),
            at("2024-05-02T00:00:00Z")
        );
        assert_eq!(
            round_to_next_quarter_hour(at("2024-05-01T10:01:00Z")),
            at("2024-05-01T10:15:00Z")
        );
        // Seconds are dropped, not rounded.
        assert_eq!(
            round_to_next_quarter_hour(at("2024-05-01T10:30:59Z")),
            at("2024-05-01T10:30:00Z")
        );
    }

    #[test]
    fn null_start_disables_an_existing_schedule() {
        let now = at("2024-05-01T10:00:00Z");
        let current = Some(at("2024-05-01T12:00:00Z"));
        assert_eq!(
            plan_schedule_change(None, now, current, &Utc),
            Some(ScheduleChange::DISABLE)
        );
        assert_eq!(plan_schedule_change(None, now, None, &Utc), None);
    }

    #[test]
    fn start_beyond_a_day_or_in_the_past_is_left_alone() {
        let now = at("2024-05-01T10:00:00Z");
        let far = Some(now + Duration::hours(30));
        assert_eq!(plan_schedule_change(far, now, None, &Utc), None);
        let past = Some(now - Duration::minutes(20));
        assert_eq!(plan_schedule_change(past, now, None, &Utc), None);
    }

    #[test]
    fn enabling_uses_local_minutes_and_is_suppressed_once_applied() {
        let now = at("2024-05-01T10:00:00Z");
        let desired = Some(at("2024-05-01T13:07:00Z"));
        let cest = FixedOffset::east_opt(2 * 3600).unwrap();

        let change = plan_schedule_change(desired, now, None, &cest).unwrap();
        assert_eq!(
            change,
            ScheduleChange {
                enable: true,
                time_minutes: 15 * 60 + 15,
            }
        );

        let applied = Some(at("2024-05-01T13:15:00Z"));
        assert_eq!(plan_schedule_change(desired, now, applied, &cest), None);
    }

    #[test]
    fn body_uses_string_values() {
        let body = ScheduleChange {
            enable: true,
            time_minutes: 915,
        }
        .to_body();
        assert_eq!(body, serde_json::json!({"enable": "true", "time": "915"}));
    }
}
