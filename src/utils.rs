//! Formatting helpers for command output.
//!
//! - [`format_count_with_separator`] - counts with thousands separators (1,234,567)
//! - [`format_age`] - how long ago a timestamp was ("3h ago")

use chrono::{DateTime, Duration, Local};

/// Format a number with thousands separators (commas).
///
/// # Examples
/// ```
/// use awsrangeroute::utils::format_count_with_separator;
/// assert_eq!(format_count_with_separator(1000), "1,000");
/// assert_eq!(format_count_with_separator(1234567), "1,234,567");
/// ```
pub fn format_count_with_separator(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Coarse age of `time` relative to now
pub fn format_age(time: DateTime<Local>) -> String {
    format_elapsed(Local::now() - time)
}

/// Largest whole unit of `elapsed`: seconds, minutes, hours or days
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.num_seconds();
    if secs < 0 {
        "in the future".to_string()
    } else if secs < 60 {
        format!("{}s ago", secs)
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86_400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_count_with_separator() {
        assert_eq!(format_count_with_separator(0), "0");
        assert_eq!(format_count_with_separator(999), "999");
        assert_eq!(format_count_with_separator(1000), "1,000");
        assert_eq!(format_count_with_separator(12345), "12,345");
        assert_eq!(format_count_with_separator(100000), "100,000");
        assert_eq!(format_count_with_separator(1234567890), "1,234,567,890");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::seconds(0)), "0s ago");
        assert_eq!(format_elapsed(Duration::seconds(59)), "59s ago");
        assert_eq!(format_elapsed(Duration::seconds(60)), "1m ago");
        assert_eq!(format_elapsed(Duration::seconds(3599)), "59m ago");
        assert_eq!(format_elapsed(Duration::hours(5)), "5h ago");
        assert_eq!(format_elapsed(Duration::days(3)), "3d ago");
        assert_eq!(format_elapsed(Duration::seconds(-10)), "in the future");
    }

    #[test]
    fn test_format_age_recent() {
        let age = format_age(Local::now() - Duration::minutes(5));
        assert!(age == "5m ago" || age == "4m ago", "got {}", age);
    }
}
