//! Extraction of normalized print statistics from slicer output.
//!
//! FDM artifacts are G-code text carrying `M73` progress hints and
//! commented estimates. SLA artifacts expose no usable time, so the
//! print time is estimated from layer count instead.

use std::sync::LazyLock;

use regex::Regex;

static M73_REMAINING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"M73 P0 R(\d+)").expect("static regex"));

static ESTIMATED_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^;\s*estimated printing time[^=]*=\s*(.+)$").expect("static regex")
});

static FILAMENT_USED_MM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^;\s*filament used \[mm\]\s*=\s*([0-9]+(?:\.[0-9]+)?)").expect("static regex")
});

static DURATION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*([dhms])").expect("static regex"));

/// Raw statistics pulled out of an FDM G-code artifact.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct FdmStats {
    /// Print time in seconds; 0 when no time marker was found.
    pub print_time_seconds: u64,

    /// Filament length in millimeters; 0 when absent.
    pub filament_mm: f64,
}

/// Scan G-code text for print time and filament usage.
///
/// Time comes from the first `M73 P0 R<minutes>` marker, falling back to
/// the `; estimated printing time = <expr>` comment.
pub fn parse_fdm_stats(gcode: &str) -> FdmStats {
    let print_time_seconds = M73_REMAINING
        .captures(gcode)
        .and_then(|caps| caps[1].parse::<u64>().ok())
        .map(|minutes| minutes * 60)
        .or_else(|| {
            ESTIMATED_TIME
                .captures(gcode)
                .and_then(|caps| parse_duration(&caps[1]))
        })
        .unwrap_or(0);

    let filament_mm = FILAMENT_USED_MM
        .captures(gcode)
        .and_then(|caps| caps[1].parse::<f64>().ok())
        .unwrap_or(0.0);

    FdmStats {
        print_time_seconds,
        filament_mm,
    }
}

/// Parse a duration expression of the form `<int>d? <int>h? <int>m?
/// <int>s?` (whitespace tolerant). A bare integer is seconds; this
/// asymmetry is a frozen contract, not an accident.
pub fn parse_duration(expr: &str) -> Option<u64> {
    let expr = expr.trim();
    if expr.is_empty() {
        return None;
    }

    let mut total: u64 = 0;
    let mut matched = false;
    for caps in DURATION_TOKEN.captures_iter(expr) {
        let value: u64 = caps[1].parse().ok()?;
        let unit = match &caps[2] {
            "d" => 86_400,
            "h" => 3_600,
            "m" => 60,
            _ => 1,
        };
        total += value * unit;
        matched = true;
    }
    if matched {
        return Some(total);
    }

    expr.parse::<u64>().ok()
}

/// Human readable `"{h}h {m}m "` rendering with integer floor division.
/// Zero seconds renders as the empty string.
pub fn readable_time(seconds: u64) -> String {
    if seconds == 0 {
        return String::new();
    }
    format!("{}h {}m ", seconds / 3600, (seconds % 3600) / 60)
}

/// Estimate SLA print time from model height: a fixed 120 s of setup
/// plus 11 s per cured layer.
pub fn estimate_sla_seconds(object_height_mm: f64, layer_height_mm: f64) -> u64 {
    let layer = layer_height_mm.max(0.025);
    let layers = (object_height_mm / layer).ceil() as u64;
    120 + layers * 11
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn m73_marker_wins() {
        let gcode = "G1 X0\nM73 P0 R90\n; estimated printing time = 5h 0m\n";
        assert_eq!(parse_fdm_stats(gcode).print_time_seconds, 90 * 60);
    }

    #[test]
    fn falls_back_to_estimated_time_comment() {
        let gcode = "; estimated printing time = 1h 30m\n; filament used [mm] = 12450\n";
        let stats = parse_fdm_stats(gcode);
        assert_eq!(stats.print_time_seconds, 5400);
        assert_eq!(stats.filament_mm, 12450.0);
    }

    #[test]
    fn normal_mode_variant_is_matched() {
        let gcode = "; estimated printing time (normal mode) = 2h 5m\n";
        assert_eq!(parse_fdm_stats(gcode).print_time_seconds, 7500);
    }

    #[test]
    fn missing_markers_parse_as_zero() {
        let stats = parse_fdm_stats("G1 X0 Y0\n");
        assert_eq!(stats.print_time_seconds, 0);
        assert_eq!(stats.filament_mm, 0.0);
    }

    #[test]
    fn duration_grammar() {
        assert_eq!(parse_duration("1h 30m"), Some(5400));
        assert_eq!(parse_duration("90"), Some(90));
        assert_eq!(parse_duration("1d 2h 3m 4s"), Some(93_784));
        assert_eq!(parse_duration("45s"), Some(45));
        assert_eq!(parse_duration("  2h  "), Some(7200));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn readable_formatting() {
        assert_eq!(readable_time(5400), "1h 30m ");
        assert_eq!(readable_time(1990), "0h 33m ");
        assert_eq!(readable_time(0), "");
        assert_eq!(readable_time(59), "0h 0m ");
    }

    #[test]
    fn sla_estimate() {
        // ceil(8.5 / 0.05) = 170 layers -> 120 + 170 * 11 = 1990.
        assert_eq!(estimate_sla_seconds(8.5, 0.05), 1990);
        // Layer height is floored at 0.025.
        assert_eq!(estimate_sla_seconds(1.0, 0.0), estimate_sla_seconds(1.0, 0.025));
    }
}
