//! Author and keyword filtering for fetched posts.
//!
//! Both filter sets are optional: an empty set allows everything. Matching
//! is case-insensitive. Keywords match as plain substrings, so `"python"`
//! also matches `"pythonic"`.

use serde::Serialize;
use std::collections::BTreeSet;

/// Allowed authors and required keywords.
///
/// Values are lower-cased on construction so that evaluation only has to
/// lower-case the incoming post. Handles are also trimmed; keywords are
/// kept verbatim, surrounding spaces included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterConfig {
    user_handles: BTreeSet<String>,
    keywords: BTreeSet<String>,
}

impl FilterConfig {
    pub fn new<H, K>(user_handles: H, keywords: K) -> Self
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        K: IntoIterator,
        K::Item: AsRef<str>,
    {
        Self {
            user_handles: user_handles
                .into_iter()
                .map(|h| h.as_ref().trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn user_handles(&self) -> &BTreeSet<String> {
        &self.user_handles
    }

    pub fn keywords(&self) -> &BTreeSet<String> {
        &self.keywords
    }

    /// True when neither authors nor keywords are restricted.
    pub fn is_empty(&self) -> bool {
        self.user_handles.is_empty() && self.keywords.is_empty()
    }

    /// Decide whether a post by `author_handle` with body `text` passes.
    pub fn should_process(&self, author_handle: &str, text: &str) -> bool {
        if !self.user_handles.is_empty()
            && !self.user_handles.contains(&author_handle.to_lowercase())
        {
            return false;
        }

        if !self.keywords.is_empty() {
            let text = text.to_lowercase();
            return self.keywords.iter().any(|k| text.contains(k.as_str()));
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: [&str; 0] = [];

    #[test]
    fn no_filters_accepts_everything() {
        let filter = FilterConfig::default();
        assert!(filter.is_empty());
        assert!(filter.should_process("anyone.bsky.social", ""));
        assert!(filter.should_process("someone", "whatever text"));
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let filter = FilterConfig::new(NONE, ["ai"]);
        assert!(filter.should_process("u", "This is about AI"));
        assert!(!filter.should_process("u", "Nothing relevant here"));
    }

    #[test]
    fn keyword_match_is_substring() {
        let filter = FilterConfig::new(NONE, ["python"]);
        assert!(filter.should_process("u", "pythonic"));
        assert!(filter.should_process("u", "I love PYTHON"));
    }

    #[test]
    fn keywords_are_lowercased_on_construction() {
        let filter = FilterConfig::new(NONE, ["Rust", ""]);
        assert_eq!(filter.keywords().len(), 1);
        assert!(filter.keywords().contains("rust"));
        assert!(filter.should_process("u", "rustacean news"));
    }

    #[test]
    fn keyword_whitespace_is_significant() {
        let filter = FilterConfig::new(NONE, [" ai "]);
        assert!(filter.keywords().contains(" ai "));
        assert!(!filter.should_process("u", "she said hello"));
        assert!(filter.should_process("u", "all about AI today"));
    }

    #[test]
    fn handles_are_trimmed() {
        let filter = FilterConfig::new([" User1.bsky.social "], NONE);
        assert!(filter.should_process("user1.bsky.social", "hi"));
    }

    #[test]
    fn author_filter_rejects_others() {
        let filter = FilterConfig::new(["user1.bsky.social"], NONE);
        assert!(filter.should_process("user1.bsky.social", "hi"));
        assert!(filter.should_process("User1.Bsky.Social", "hi"));
        assert!(!filter.should_process("user2.bsky.social", "hi"));
    }

    #[test]
    fn author_and_keyword_must_both_pass() {
        let filter = FilterConfig::new(["user1.bsky.social"], ["ai", "python"]);
        assert!(filter.should_process("user1.bsky.social", "Post about AI"));
        assert!(!filter.should_process("user1.bsky.social", "Post about cooking"));
        assert!(!filter.should_process("user2.bsky.social", "Post about AI"));
    }
}
