//! Screen fragments shared by the menus. Every helper returns text with plain
//! `\n` line endings; the terminal converts them on write.

use chrono::{DateTime, Duration, Utc};

pub const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";
const RULE_WIDTH: usize = 60;

/// Blank line followed by a double-line box around `text`.
pub fn header(text: &str) -> String {
    let bar = "═".repeat(text.chars().count() + 2);
    format!("\n╔{bar}╗\n║ {text} ║\n╚{bar}╝\n")
}

pub fn rule() -> String {
    format!("{}\n", "─".repeat(RULE_WIDTH))
}

pub fn error(msg: &str) -> String {
    format!("\x1b[31m✗ {}\x1b[0m\n", msg)
}

pub fn success(msg: &str) -> String {
    format!("\x1b[32m✓ {}\x1b[0m\n", msg)
}

/// Relative timestamps for listings; older than a week shows the date.
pub fn format_time(t: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now - t;
    if elapsed < Duration::minutes(1) {
        return "just now".to_string();
    }
    if elapsed < Duration::hours(1) {
        return plural(elapsed.num_minutes(), "minute");
    }
    if elapsed < Duration::days(1) {
        return plural(elapsed.num_hours(), "hour");
    }
    if elapsed < Duration::days(7) {
        return match elapsed.num_days() {
            1 => "yesterday".to_string(),
            n => format!("{} days ago", n),
        };
    }
    t.format("%b %d, %Y").to_string()
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", n, unit)
    }
}

/// Compact duration for the online list: `42s`, `5m`, `2h 07m`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s => format!("{}h {:02}m", s / 3600, (s % 3600) / 60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn header_box_matches_text_width() {
        assert_eq!(header("Hi"), "\n╔════╗\n║ Hi ║\n╚════╝\n");
    }

    #[test]
    fn status_lines_are_coloured() {
        assert_eq!(error("nope"), "\x1b[31m✗ nope\x1b[0m\n");
        assert_eq!(success("yes"), "\x1b[32m✓ yes\x1b[0m\n");
        assert_eq!(rule().chars().count(), 61);
    }

    #[test]
    fn relative_times() {
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap();
        assert_eq!(format_time(now - Duration::seconds(30), now), "just now");
        assert_eq!(format_time(now - Duration::minutes(1), now), "1 minute ago");
        assert_eq!(format_time(now - Duration::minutes(59), now), "59 minutes ago");
        assert_eq!(format_time(now - Duration::hours(1), now), "1 hour ago");
        assert_eq!(format_time(now - Duration::hours(5), now), "5 hours ago");
        assert_eq!(format_time(now - Duration::hours(30), now), "yesterday");
        assert_eq!(format_time(now - Duration::days(3), now), "3 days ago");
        assert_eq!(format_time(now - Duration::days(10), now), "Mar 10, 2024");
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::seconds(42)), "42s");
        assert_eq!(format_duration(Duration::seconds(300)), "5m");
        assert_eq!(format_duration(Duration::seconds(7620)), "2h 07m");
        assert_eq!(format_duration(Duration::seconds(-3)), "0s");
    }
}
