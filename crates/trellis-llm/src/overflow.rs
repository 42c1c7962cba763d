use std::sync::OnceLock;

use regex::Regex;

/// Parse a provider context-overflow error message, e.g.
///
/// `This model's maximum context length is 8192 tokens. However, your
/// messages resulted in 9100 tokens.`
///
/// Returns `(reported prompt tokens, authoritative maximum)`. Client
/// libraries that only surface raw error text use this to build a typed
/// [`TrellisError::ContextOverflow`].
///
/// [`TrellisError::ContextOverflow`]: trellis_core::error::TrellisError::ContextOverflow
pub fn parse_overflow(error_text: &str) -> Option<(usize, usize)> {
    static REPORTED: OnceLock<Regex> = OnceLock::new();
    static MAX: OnceLock<Regex> = OnceLock::new();
    let reported = REPORTED
        .get_or_init(|| Regex::new(r"your messages resulted in (\d+)").expect("valid regex"));
    let max = MAX.get_or_init(|| Regex::new(r"maximum context length is (\d+)").expect("valid regex"));

    let reported = reported.captures(error_text)?[1].parse().ok()?;
    let max = max.captures(error_text)?[1].parse().ok()?;
    Some((reported, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_openai_style_message() {
        let text = "This model's maximum context length is 8192 tokens. \
                    However, your messages resulted in 9100 tokens. \
                    Please reduce the length of the messages.";
        assert_eq!(parse_overflow(text), Some((9100, 8192)));
    }

    #[test]
    fn test_rejects_unrelated_message() {
        assert_eq!(parse_overflow("rate limit exceeded"), None);
        assert_eq!(
            parse_overflow("maximum context length is 8192 tokens"),
            None
        );
    }
}
