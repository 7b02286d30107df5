use chrono::NaiveTime;

/// Shop-level scheduling parameters. The engine never decides these values,
/// it only applies them; callers load them from wherever policy lives.
#[derive(Clone, Debug)]
pub struct ScheduleConfig {
    pub opening: NaiveTime,
    pub closing: NaiveTime,
    pub lunch_start: Option<NaiveTime>,
    pub lunch_end: Option<NaiveTime>,
    /// Grid increment, and the fallback duration assumed when a capacity
    /// probe carries no service selection.
    pub slot_minutes: u32,
    pub default_service_minutes: u32,
    pub default_add_on_minutes: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            opening: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            closing: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            lunch_start: NaiveTime::from_hms_opt(12, 0, 0),
            lunch_end: NaiveTime::from_hms_opt(13, 0, 0),
            slot_minutes: 30,
            default_service_minutes: 30,
            default_add_on_minutes: 15,
        }
    }
}

impl ScheduleConfig {
    /// Opening is inclusive, closing exclusive.
    pub fn within_hours(&self, time: NaiveTime) -> bool {
        time >= self.opening && time < self.closing
    }

    pub fn in_lunch(&self, time: NaiveTime) -> bool {
        match (self.lunch_start, self.lunch_end) {
            (Some(start), Some(end)) => time >= start && time < end,
            _ => false,
        }
    }
}

/// Half-open interval overlap: `[start_a, end_a)` against `[start_b, end_b)`.
pub fn overlaps(start_a: NaiveTime, end_a: NaiveTime, start_b: NaiveTime, end_b: NaiveTime) -> bool {
    start_a < end_b && start_b < end_a
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn hours_are_inclusive_start_exclusive_end() {
        let config = ScheduleConfig::default();
        assert!(config.within_hours(t(8, 0)));
        assert!(config.within_hours(t(16, 59)));
        assert!(!config.within_hours(t(17, 0)));
        assert!(!config.within_hours(t(7, 59)));
    }

    #[test]
    fn lunch_window_is_half_open() {
        let config = ScheduleConfig::default();
        assert!(config.in_lunch(t(12, 0)));
        assert!(config.in_lunch(t(12, 59)));
        assert!(!config.in_lunch(t(13, 0)));
    }

    #[test]
    fn interval_overlap_is_half_open() {
        assert!(overlaps(t(10, 0), t(10, 45), t(10, 30), t(11, 0)));
        assert!(!overlaps(t(10, 0), t(10, 30), t(10, 30), t(11, 0)));
    }
}
