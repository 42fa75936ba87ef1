//! Formatting helpers for displaying operations.

use chrono::Duration;

/// Format a duration compactly (e.g., "850ms", "42s", "3m 05s", "1h 02m").
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.num_milliseconds();
    if ms < 0 {
        return "0ms".to_string();
    }
    if ms < 1_000 {
        return format!("{}ms", ms);
    }

    let secs = duration.num_seconds();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3_600 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h {:02}m", secs / 3_600, (secs % 3_600) / 60)
    }
}

/// Format a progress fraction as a whole percentage (e.g., "42%").
pub fn format_progress(progress: f64) -> String {
    let pct = if progress.is_finite() {
        (progress.clamp(0.0, 1.0) * 100.0).round()
    } else {
        0.0
    };
    format!("{}%", pct as u32)
}

/// Format an optional duration, or a dash if missing.
pub fn format_duration_opt(duration: Option<Duration>) -> String {
    match duration {
        Some(d) => format_duration(d),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::milliseconds(850)), "850ms");
        assert_eq!(format_duration(Duration::seconds(42)), "42s");
        assert_eq!(format_duration(Duration::seconds(185)), "3m 05s");
        assert_eq!(format_duration(Duration::seconds(3_720)), "1h 02m");
        assert_eq!(format_duration(Duration::seconds(-3)), "0ms");
    }

    #[test]
    fn test_format_progress() {
        assert_eq!(format_progress(0.0), "0%");
        assert_eq!(format_progress(0.425), "43%");
        assert_eq!(format_progress(1.0), "100%");
        assert_eq!(format_progress(f64::NAN), "0%");
    }

    #[test]
    fn test_format_duration_opt() {
        assert_eq!(format_duration_opt(None), "-");
    }
}
