//! Logging helpers for radio traffic. Modem lines can carry stray control bytes and
//! partial garbage after a resync, so everything echoed into the log goes through here first.

use std::fmt::Write;

/// Longest preview kept for a single radio line. RYLR998 payloads top out at 240 bytes.
const MAX_PREVIEW: usize = 160;

/// Escape a radio line for single-line logging:
/// - `\n` => `\\n`, `\r` => `\\r`, `\t` => `\\t`, backslash => `\\\\`
/// - other control characters => `\xNN`
///
/// Lines longer than the preview limit end with an ellipsis.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
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

/// Hex dump of the first `max` bytes, for data that is not worth decoding.
pub fn hex_preview(data: &[u8], max: usize) -> String {
    let mut out = String::with_capacity(max.min(data.len()) * 2);
    for b in data.iter().take(max) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    if data.len() > max {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_modem_line_endings() {
        let esc = escape_log("+RCV=1,3,abc,-60,7\r\n");
        assert_eq!(esc, "+RCV=1,3,abc,-60,7\\r\\n");
    }

    #[test]
    fn escapes_control_bytes_and_truncates() {
        let esc = escape_log("a\u{1}b");
        assert_eq!(esc, "a\\x01b");
        let long = "x".repeat(500);
        assert!(escape_log(&long).ends_with('…'));
    }

    #[test]
    fn hex_preview_caps_length() {
        assert_eq!(hex_preview(&[0xde, 0xad, 0xbe, 0xef], 2), "dead…");
        assert_eq!(hex_preview(&[0x01], 8), "01");
    }
}
