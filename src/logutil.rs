//! Logging utilities for rendering modem transcripts on a single line.
//! CR/LF, the data terminator and other control bytes are escaped so a
//! transcript like `AT\r\r\nOK\r\n` stays readable in the log.

const MAX_PREVIEW: usize = 300; // generous for debug; adjust if needed

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
/// - other control characters => `\\xNN`
///
/// Truncates very long strings with an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        push_escaped(&mut out, ch);
    }
    out
}

/// Same as [`escape_log`] for raw bytes straight off the wire. Invalid UTF-8
/// is shown as `\xNN` per byte instead of a replacement character.
pub fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().min(MAX_PREVIEW) + 8);
    for (count, &b) in bytes.iter().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        if b.is_ascii() {
            push_escaped(&mut out, b as char);
        } else {
            use std::fmt::Write;
            let _ = write!(&mut out, "\\x{:02X}", b);
        }
    }
    out
}

fn push_escaped(out: &mut String, ch: char) {
    match ch {
        '\\' => out.push_str("\\\\"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        c if c.is_control() => {
            use std::fmt::Write;
            let _ = write!(out, "\\x{:02X}", c as u32);
        }
        c => out.push(c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_transcript_line_breaks() {
        assert_eq!(escape_log("AT\r\r\nOK\r\n"), "AT\\r\\r\\nOK\\r\\n");
    }

    #[test]
    fn escapes_terminator_and_high_bytes() {
        assert_eq!(escape_bytes(b"hi\x1A\xFF"), "hi\\x1A\\xFF");
    }

    #[test]
    fn truncates_long_previews() {
        let long = "A".repeat(MAX_PREVIEW + 10);
        let esc = escape_log(&long);
        assert!(esc.ends_with('…'));
        assert_eq!(esc.chars().count(), MAX_PREVIEW + 1);
    }
}
