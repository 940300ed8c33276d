//! TTL calculator
//!
//! Pure schedule computation: no clock access and no I/O, so every property
//! can be checked with fixed timestamps.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Destruction and notification times for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub destroy_at: DateTime<Utc>,
    pub notify_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<ScheduleWarning>,
}

/// Non-fatal adjustment applied while computing a schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleWarning {
    /// Lead time was negative or not shorter than the TTL and was reset to zero
    LeadTimeClamped { requested_secs: i64, ttl_secs: i64 },
}

impl std::fmt::Display for ScheduleWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LeadTimeClamped { requested_secs, ttl_secs } => write!(
                f,
                "notify lead time {}s is outside [0, {}s); no advance notice will be sent",
                requested_secs, ttl_secs
            ),
        }
    }
}

/// Rejected schedule input. Registration fails closed on these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("TTL must be positive, got {0}s")]
    NonPositiveTtl(i64),

    #[error("schedule falls outside the representable time range")]
    OutOfRange,
}

/// Compute `destroy_at = created_at + ttl` and `notify_at = destroy_at - notify_lead`.
///
/// `ttl` must be positive; callers treat a non-positive TTL as "never destroy"
/// and skip registration before getting here. A lead time outside `[0, ttl)`
/// is clamped to zero and reported through [`Schedule::warning`].
pub fn compute_schedule(
    created_at: DateTime<Utc>,
    ttl: Duration,
    notify_lead: Duration,
) -> Result<Schedule, ScheduleError> {
    if ttl <= Duration::zero() {
        return Err(ScheduleError::NonPositiveTtl(ttl.num_seconds()));
    }

    let destroy_at = created_at
        .checked_add_signed(ttl)
        .ok_or(ScheduleError::OutOfRange)?;

    let (lead, warning) = if notify_lead < Duration::zero() || notify_lead >= ttl {
        (
            Duration::zero(),
            Some(ScheduleWarning::LeadTimeClamped {
                requested_secs: notify_lead.num_seconds(),
                ttl_secs: ttl.num_seconds(),
            }),
        )
    } else {
        (notify_lead, None)
    };

    let notify_at = destroy_at
        .checked_sub_signed(lead)
        .ok_or(ScheduleError::OutOfRange)?;

    Ok(Schedule {
        destroy_at,
        notify_at,
        warning,
    })
}

/// Convert a whole number of hours, failing instead of panicking on overflow
pub fn hours(value: i64) -> Result<Duration, ScheduleError> {
    Duration::try_hours(value).ok_or(ScheduleError::OutOfRange)
}

/// Label-safe rendering of a destruction time, e.g. `20261016t1400z`
pub fn destroy_at_label(destroy_at: DateTime<Utc>) -> String {
    destroy_at.format("%Y%m%dt%H%Mz").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_basic_schedule() {
        let s = compute_schedule(t0(), Duration::hours(4), Duration::hours(1)).unwrap();
        assert_eq!(s.destroy_at, t0() + Duration::hours(4));
        assert_eq!(s.notify_at, t0() + Duration::hours(3));
        assert!(s.warning.is_none());
    }

    #[test]
    fn test_zero_lead_notifies_at_destroy_time() {
        let s = compute_schedule(t0(), Duration::hours(2), Duration::zero()).unwrap();
        assert_eq!(s.notify_at, s.destroy_at);
        assert!(s.warning.is_none());
    }

    #[test]
    fn test_lead_not_shorter_than_ttl_is_clamped() {
        let s = compute_schedule(t0(), Duration::hours(1), Duration::hours(1)).unwrap();
        assert_eq!(s.notify_at, s.destroy_at);
        assert_eq!(
            s.warning,
            Some(ScheduleWarning::LeadTimeClamped {
                requested_secs: 3600,
                ttl_secs: 3600
            })
        );

        let s = compute_schedule(t0(), Duration::hours(1), Duration::hours(5)).unwrap();
        assert_eq!(s.notify_at, s.destroy_at);
        assert!(s.warning.is_some());
    }

    #[test]
    fn test_negative_lead_is_clamped() {
        let s = compute_schedule(t0(), Duration::hours(3), Duration::minutes(-10)).unwrap();
        assert_eq!(s.notify_at, s.destroy_at);
        assert!(s.warning.unwrap().to_string().contains("-600s"));
    }

    #[test]
    fn test_non_positive_ttl_rejected() {
        assert_eq!(
            compute_schedule(t0(), Duration::zero(), Duration::zero()),
            Err(ScheduleError::NonPositiveTtl(0))
        );
        assert_eq!(
            compute_schedule(t0(), Duration::hours(-1), Duration::zero()),
            Err(ScheduleError::NonPositiveTtl(-3600))
        );
    }

    #[test]
    fn test_overflow_rejected() {
        let huge = Duration::try_days(365 * 300_000).unwrap();
        assert_eq!(
            compute_schedule(t0(), huge, Duration::zero()),
            Err(ScheduleError::OutOfRange)
        );
        assert_eq!(hours(i64::MAX), Err(ScheduleError::OutOfRange));
    }

    #[test]
    fn test_notify_never_before_creation() {
        for ttl_h in 1..48 {
            for lead_h in -2..50 {
                let s = compute_schedule(t0(), Duration::hours(ttl_h), Duration::hours(lead_h)).unwrap();
                assert_eq!(s.destroy_at, t0() + Duration::hours(ttl_h));
                assert!(s.notify_at >= t0());
                assert!(s.notify_at <= s.destroy_at);
            }
        }
    }

    #[test]
    fn test_destroy_at_label() {
        let ts = Utc.with_ymd_and_hms(2026, 10, 16, 14, 5, 59).unwrap();
        assert_eq!(destroy_at_label(ts), "20261016t1405z");
    }
}
