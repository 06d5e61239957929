//! Refresh gating for plugins whose backend data changes slowly.
//!
//! The billing plugin only queries its API once an hour and serves the
//! stored snapshot in between. The decision lives here, outside the driver,
//! so the driver stays independent of the wall clock.

use chrono::{DateTime, Timelike, Utc};

/// Decides whether an expensive backend refresh should happen now.
pub trait RefreshSchedule {
    fn should_refresh(&self, now: DateTime<Utc>, snapshot_exists: bool) -> bool;
}

/// Refreshes once an hour, at a fixed minute.
#[derive(Debug, Clone, Copy)]
pub struct HourlyAt {
    pub minute: u32,
    /// Refresh unconditionally (operator override).
    pub force: bool,
}

impl HourlyAt {
    pub fn new(minute: u32) -> Self {
        Self {
            minute: minute % 60,
            force: false,
        }
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

impl RefreshSchedule for HourlyAt {
    fn should_refresh(&self, now: DateTime<Utc>, snapshot_exists: bool) -> bool {
        self.force || !snapshot_exists || now.minute() == self.minute
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, minute, 30).unwrap()
    }

    #[test]
    fn test_refreshes_only_at_configured_minute() {
        let schedule = HourlyAt::new(0);
        assert!(schedule.should_refresh(at(0), true));
        assert!(!schedule.should_refresh(at(1), true));
        assert!(!schedule.should_refresh(at(59), true));
    }

    #[test]
    fn test_missing_snapshot_forces_refresh() {
        assert!(HourlyAt::new(0).should_refresh(at(17), false));
    }

    #[test]
    fn test_force_overrides_minute() {
        assert!(HourlyAt::new(0).forced(true).should_refresh(at(17), true));
    }

    #[test]
    fn test_minute_wraps() {
        let schedule = HourlyAt::new(75);
        assert_eq!(schedule.minute, 15);
        assert!(schedule.should_refresh(at(15), true));
    }
}
