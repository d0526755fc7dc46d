//! Price estimation: a 15-minute billable floor and a 10 HUF rounding
//! grain.

/// Minimum billable time, in hours.
pub const BILLABLE_FLOOR_HOURS: f64 = 0.25;

/// Billable hours for a print: wall time with a 15-minute floor.
pub fn billable_hours(print_time_seconds: u64) -> f64 {
    (print_time_seconds as f64 / 3600.0).max(BILLABLE_FLOOR_HOURS)
}

/// Snap a raw price up to the nearest 10 HUF.
pub fn ceil_to_10(raw: f64) -> u64 {
    ((raw / 10.0).ceil() * 10.0) as u64
}

/// Estimated price in HUF for a print of the given duration at the
/// given hourly rate.
pub fn estimate_price_huf(print_time_seconds: u64, hourly_rate: u32) -> u64 {
    ceil_to_10(billable_hours(print_time_seconds) * f64::from(hourly_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_applies_to_short_prints() {
        assert_eq!(billable_hours(0), 0.25);
        assert_eq!(billable_hours(600), 0.25);
        assert_eq!(billable_hours(5400), 1.5);
    }

    #[test]
    fn snapping_is_divisible_and_never_undershoots() {
        for (seconds, rate) in [(5400u64, 900u32), (1990, 1800), (0, 800), (7321, 1250)] {
            let price = estimate_price_huf(seconds, rate);
            assert_eq!(price % 10, 0);
            assert!(price as f64 >= billable_hours(seconds) * f64::from(rate));
        }
    }

    #[test]
    fn reference_prices() {
        // 1.5 h of PETG at 900 HUF/h.
        assert_eq!(estimate_price_huf(5400, 900), 1350);
        // 1990 s of resin at 1800 HUF/h: 0.5528 h -> 995.4 -> 1000.
        assert_eq!(estimate_price_huf(1990, 1800), 1000);
        // Floor: 0 s still bills a quarter hour.
        assert_eq!(estimate_price_huf(0, 1800), 450);
    }
}
