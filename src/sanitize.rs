//! Text sanitation applied to every extraction result before persistence.

/// Cleans extracted text for storage: normalizes line endings, strips null
/// and control characters (tabs and newlines survive), and trims the ends.
///
/// Downstream stores reject malformed content, so every extractor routes its
/// output through here before anything is persisted.
pub fn clean_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push('\n');
            }
            '\n' | '\t' => out.push(ch),
            c if c.is_control() => {}
            '\u{FEFF}' => {}
            c => out.push(c),
        }
    }
    out.trim().to_string()
}

/// Collapses runs of whitespace into single spaces and trims the result.
pub fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim_end().to_string()
}

/// Fraction of alphabetic characters among the non-whitespace content.
///
/// Returns 0.0 for input with no non-whitespace characters.
pub fn alphabetic_ratio(input: &str) -> f32 {
    let mut total = 0usize;
    let mut alpha = 0usize;
    for ch in input.chars() {
        if ch.is_whitespace() {
            continue;
        }
        total += 1;
        if ch.is_alphabetic() {
            alpha += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    alpha as f32 / total as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_nulls_and_control_chars() {
        let cleaned = clean_text("abc\0def\u{1}ghi");
        assert_eq!(cleaned, "abcdefghi");
    }

    #[test]
    fn normalizes_line_endings() {
        let cleaned = clean_text("one\r\ntwo\rthree\n");
        assert_eq!(cleaned, "one\ntwo\nthree");
    }

    #[test]
    fn preserves_tabs_and_newlines() {
        let cleaned = clean_text("a\tb\nc");
        assert_eq!(cleaned, "a\tb\nc");
    }

    #[test]
    fn cleaning_is_idempotent() {
        let once = clean_text("  x\r\ny\0z  ");
        assert_eq!(clean_text(&once), once);
    }

    #[test]
    fn whitespace_collapse() {
        assert_eq!(collapse_whitespace("  a \n  b\t c "), "a b c");
    }

    #[test]
    fn alpha_ratio_ignores_whitespace() {
        assert!(alphabetic_ratio("ab 12") > 0.49);
        assert_eq!(alphabetic_ratio("   "), 0.0);
    }
}
