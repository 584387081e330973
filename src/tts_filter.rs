//! TTS-safe text filtering.
//!
//! Every text field that reaches a query result — chunk snippets, Q&A
//! questions/answers/context, document summaries — passes through
//! [`filter_safe_text`] before being returned, so downstream text-to-speech
//! synthesis never chokes on characters it cannot pronounce. Both the
//! chunk-mode and Q&A-mode retrieval paths call the same function; the
//! source material this crate is grounded on implemented this filter twice,
//! once per path, with identical logic — this crate keeps the one
//! implementation both paths share.

/// Replace characters the TTS engine cannot safely pronounce with a safe
/// ASCII equivalent, or drop them. Collapses the resulting whitespace.
pub fn filter_safe_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            // Dash variants.
            '\u{2010}'..='\u{2015}' | '\u{2212}' => out.push('-'),
            // Ellipsis.
            '\u{2026}' => out.push_str("..."),
            // Soft hyphen: drop entirely.
            '\u{00AD}' => {}
            // Non-breaking / narrow / thin spaces.
            '\u{00A0}' | '\u{202F}' | '\u{2009}' | '\u{2002}'..='\u{200A}' => out.push(' '),
            // Smart quotes, kept as-is (TTS engines handle these fine).
            '\u{2018}' | '\u{2019}' | '\u{201C}' | '\u{201D}' => out.push(ch),
            // Common ligatures.
            '\u{FB00}' => out.push_str("ff"),
            '\u{FB01}' => out.push_str("fi"),
            '\u{FB02}' => out.push_str("fl"),
            '\u{FB03}' => out.push_str("ffi"),
            '\u{FB04}' => out.push_str("ffl"),
            // Euro sign and bullet: kept.
            '\u{20AC}' | '\u{2022}' => out.push(ch),
            // Latin letters with diacritics and general Latin Extended
            // ranges are considered speakable.
            c if (c as u32) < 0x250 => out.push(c),
            // Basic ASCII punctuation/control already covered above by the
            // `< 0x250` arm; everything else (CJK, emoji, high-Unicode
            // symbol blocks) is replaced with a space.
            _ => out.push(' '),
        }
    }

    collapse_whitespace(&out)
}

fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut last_was_space = false;
    for ch in text.trim().chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                result.push(' ');
            }
            last_was_space = true;
        } else {
            result.push(ch);
            last_was_space = false;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dashes_and_ellipsis() {
        assert_eq!(filter_safe_text("em\u{2014}dash"), "em-dash");
        assert_eq!(filter_safe_text("wait\u{2026}"), "wait...");
    }

    #[test]
    fn drops_soft_hyphen_and_collapses_nbsp() {
        let input = "soft\u{00AD}hyphen and\u{00A0}space";
        assert_eq!(filter_safe_text(input), "softhyphen and space");
    }

    #[test]
    fn expands_ligatures() {
        assert_eq!(filter_safe_text("\u{FB01}le"), "file");
    }

    #[test]
    fn replaces_cjk_and_emoji_with_space() {
        let input = "hello \u{4e2d}\u{6587} world \u{1F600}";
        let result = filter_safe_text(input);
        assert!(!result.contains('\u{4e2d}'));
        assert!(!result.contains('\u{1F600}'));
        assert_eq!(result, "hello world");
    }

    #[test]
    fn collapses_repeated_whitespace() {
        assert_eq!(filter_safe_text("a   b\n\nc"), "a b c");
    }
}
