//! Word normalization.
//!
//! Every lookup key in the entries table goes through [`normalize_word`]:
//! ASCII letters, hyphens, and apostrophes are kept, any other run of
//! characters collapses to a single interior space, and the result is
//! trimmed and lowercased. The transform is idempotent, so normalizing a
//! stored key again is always a no-op.

/// Normalizes a raw word cell into its canonical lookup key.
///
/// `" Don't-Stop! "` becomes `"don't-stop"`. Non-ASCII text (and anything
/// else outside letters/hyphen/apostrophe) is treated as a separator, so a
/// cell with no Latin letters normalizes to the empty string.
pub fn normalize_word(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphabetic() || ch == '-' || ch == '\'' {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_letters_hyphen_apostrophe_and_lowercases() {
        assert_eq!(normalize_word(" Don't-Stop! "), "don't-stop");
        assert_eq!(normalize_word("Hello"), "hello");
        assert_eq!(normalize_word("self-evident"), "self-evident");
    }

    #[test]
    fn collapses_separator_runs_to_single_spaces() {
        assert_eq!(normalize_word("give   up"), "give up");
        assert_eq!(normalize_word("a1b2c"), "a b c");
        assert_eq!(normalize_word("word,  (noun)"), "word noun");
    }

    #[test]
    fn strips_leading_and_trailing_separators() {
        assert_eq!(normalize_word("  42 apples  "), "apples");
        assert_eq!(normalize_word("!?."), "");
        assert_eq!(normalize_word(""), "");
    }

    #[test]
    fn non_ascii_normalizes_to_empty() {
        assert_eq!(normalize_word("单词"), "");
        assert_eq!(normalize_word("café"), "caf");
    }

    #[test]
    fn idempotent_on_arbitrary_inputs() {
        for raw in [
            " Don't-Stop! ",
            "Hello, World",
            "a1b2c",
            "",
            "!?.",
            "  mixed UP case  ",
            "已加载",
        ] {
            let once = normalize_word(raw);
            assert_eq!(normalize_word(&once), once, "input: {:?}", raw);
        }
    }
}
