//! Helpers that keep log lines single-line when they carry user input
//! (usernames, titles, peer addresses).

use std::fmt::Write;
use std::net::SocketAddr;

const MAX_PREVIEW: usize = 300;

/// Escape a string for single-line logging: `\n`, `\r`, `\t` and backslash
/// become their escaped forms, other control characters become `\xNN`.
/// Input longer than 300 characters is cut with an ellipsis.
pub fn escape_log(s: &str) -> String {
    escape_log_with_limit(s, MAX_PREVIEW)
}

pub fn escape_log_with_limit(s: &str, limit: usize) -> String {
    let mut out = String::with_capacity(s.len().min(limit) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= limit {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Remote address for log lines; `unknown` when the transport has none.
pub fn peer_label(peer: Option<SocketAddr>) -> String {
    peer.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_newlines_and_controls() {
        assert_eq!(escape_log("Line1\nLine2\r\tEnd"), "Line1\\nLine2\\r\\tEnd");
        assert_eq!(escape_log("a\\b\x1b[2J"), "a\\\\b\\x1B[2J");
    }

    #[test]
    fn truncates_long_input() {
        let long = "x".repeat(10);
        assert_eq!(escape_log_with_limit(&long, 4), "xxxx…");
        assert_eq!(escape_log(&"y".repeat(400)).chars().count(), 301);
    }

    #[test]
    fn peer_label_falls_back() {
        assert_eq!(peer_label(None), "unknown");
        assert_eq!(peer_label(Some("127.0.0.1:22".parse().unwrap())), "127.0.0.1:22");
    }
}
