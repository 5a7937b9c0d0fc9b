//! Bounded rendering of captured child output for diagnostics.
//!
//! Diagnostics embed what the child wrote; a runaway program must not be
//! able to bloat the job document, so embedded text is clipped to a fixed
//! character budget with a marker suffix.

pub(super) const OUTPUT_CHAR_LIMIT: usize = 2_048;
pub(super) const TRUNCATION_SUFFIX: &str = "… [truncated]";

/// Clips `text` to [`OUTPUT_CHAR_LIMIT`] characters, marking the cut.
pub(super) fn truncate_output(text: &str) -> String {
    let mut clipped = String::with_capacity(text.len().min(OUTPUT_CHAR_LIMIT));
    let mut characters = text.chars();
    clipped.extend(characters.by_ref().take(OUTPUT_CHAR_LIMIT));
    if characters.next().is_some() {
        clipped.push_str(TRUNCATION_SUFFIX);
    }
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_returned_unchanged() {
        assert_eq!(truncate_output("NameError: name 'x' is not defined\n"),
            "NameError: name 'x' is not defined\n");
    }

    #[test]
    fn text_at_the_limit_is_not_marked() {
        let text = "x".repeat(OUTPUT_CHAR_LIMIT);
        assert_eq!(truncate_output(&text), text);
    }

    #[test]
    fn oversized_text_is_clipped_with_a_marker() {
        let clipped = truncate_output(&"x".repeat(OUTPUT_CHAR_LIMIT + 1));
        assert!(clipped.ends_with(TRUNCATION_SUFFIX));
        assert_eq!(
            clipped.chars().count(),
            OUTPUT_CHAR_LIMIT + TRUNCATION_SUFFIX.chars().count()
        );
    }

    #[test]
    fn clipping_counts_characters_not_bytes() {
        let clipped = truncate_output(&"é".repeat(OUTPUT_CHAR_LIMIT * 2));
        assert!(clipped.starts_with('é'));
        assert_eq!(
            clipped.chars().count(),
            OUTPUT_CHAR_LIMIT + TRUNCATION_SUFFIX.chars().count()
        );
    }
}
