//! Keeps chat-supplied text (usernames, reasons) on a single log line.

/// Escape newlines, tabs, backslashes and other control characters, and cut
/// anything past 120 characters with an ellipsis.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 120; // longest platform username is 100
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
                // Represent other control chars as hex \xNN
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::escape_log;
    #[test]
    fn forged_log_lines_stay_on_one_line() {
        let name = "mallory\nINFO granted 999999 money to mallory";
        let esc = escape_log(name);
        assert!(!esc.contains('\n'));
        assert!(esc.starts_with("mallory\\nINFO"));
    }

    #[test]
    fn long_names_are_truncated() {
        let esc = escape_log(&"x".repeat(500));
        assert_eq!(esc.chars().count(), 121);
        assert!(esc.ends_with('…'));
    }

    #[test]
    fn control_chars_become_hex() {
        assert_eq!(escape_log("a\u{7}b\tc"), "a\\x07b\\tc");
    }
}
