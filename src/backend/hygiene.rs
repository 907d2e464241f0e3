//! Cleanup of raw recognizer output before it reaches the conversation.

/// Strip non-speech annotations (`[Music]`, `(laughs)`, `*cough*`) and
/// collapse runs of whitespace. An opener without its closer is kept verbatim.
pub fn strip_annotations(text: &str) -> String {
    let mut kept = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find(['[', '(', '*']) {
        kept.push_str(&rest[..pos]);
        let opener = rest[pos..].chars().next().unwrap_or('[');
        let closer = match opener {
            '[' => ']',
            '(' => ')',
            _ => '*',
        };
        let after = &rest[pos + opener.len_utf8()..];
        match after.find(closer) {
            Some(end) => {
                kept.push(' ');
                rest = &after[end + closer.len_utf8()..];
            }
            None => {
                kept.push_str(&rest[pos..]);
                rest = "";
            }
        }
    }
    kept.push_str(rest);

    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Final-transcript filter: annotation stripping plus a phrase blocklist of
/// common recognizer hallucinations, compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct TranscriptFilter {
    blocked: Vec<String>,
}

impl TranscriptFilter {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            blocked: phrases
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Returns the cleaned text, or `None` when nothing speakable remains.
    pub fn apply(&self, raw: &str) -> Option<String> {
        let cleaned = strip_annotations(raw);
        if cleaned.is_empty() {
            return None;
        }
        let lower = cleaned.to_lowercase();
        if self.blocked.iter().any(|p| *p == lower) {
            tracing::debug!(text = %cleaned, "Dropped hallucinated transcript");
            return None;
        }
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_bracketed_annotations() {
        assert_eq!(strip_annotations("[Music] hello there"), "hello there");
        assert_eq!(strip_annotations("hello (laughs) world"), "hello world");
        assert_eq!(strip_annotations("*cough* okay"), "okay");
    }

    #[test]
    fn test_keeps_unmatched_opener() {
        assert_eq!(strip_annotations("rate (per hour"), "rate (per hour");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(strip_annotations("  a   b \n c  "), "a b c");
    }

    #[test]
    fn test_annotation_only_becomes_empty() {
        assert_eq!(strip_annotations("[BLANK_AUDIO]"), "");
    }

    #[test]
    fn test_non_ascii_text_survives() {
        assert_eq!(strip_annotations("नमस्ते [noise] दोस्त"), "नमस्ते दोस्त");
    }

    #[test]
    fn test_filter_drops_blocked_phrase_case_insensitively() {
        let filter = TranscriptFilter::new(["Thank you."]);
        assert_eq!(filter.apply("thank YOU."), None);
        assert_eq!(
            filter.apply("Thank you for the help."),
            Some("Thank you for the help.".to_string())
        );
    }

    #[test]
    fn test_filter_rejects_empty_after_cleanup() {
        let filter = TranscriptFilter::default();
        assert_eq!(filter.apply("  (silence)  "), None);
    }
}
