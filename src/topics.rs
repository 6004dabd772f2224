// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Topic labels: normalization and keyword extraction.

use std::collections::BTreeSet;

/// Keywords recognised in truth content.
pub const KNOWN_TOPICS: &[&str] = &[
    "faith",
    "revelation",
    "scripture",
    "prophecy",
    "truth",
    "wisdom",
    "knowledge",
    "salvation",
    "redemption",
    "covenant",
];

/// Topic assigned when content matches no keyword.
pub const DEFAULT_TOPIC: &str = "general";

/// Keyword extraction: every known topic that occurs in `content`
/// (case-insensitive), or `general` when none does.
pub fn extract_topics(content: &str) -> BTreeSet<String> {
    let lowered = content.to_lowercase();
    let found: BTreeSet<String> = KNOWN_TOPICS
        .iter()
        .filter(|topic| lowered.contains(*topic))
        .map(|topic| topic.to_string())
        .collect();

    if found.is_empty() {
        BTreeSet::from([DEFAULT_TOPIC.to_string()])
    } else {
        found
    }
}

/// Trim and lower-case caller supplied labels, dropping empties.
pub fn normalize<I, S>(topics: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    topics
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Topics to store for new content: the normalized caller set, or extracted
/// keywords when the caller gave none.
pub fn resolve<I, S>(content: &str, topics: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let given = normalize(topics);
    if given.is_empty() {
        extract_topics(content)
    } else {
        given
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_known_topics() {
        let topics = extract_topics("Faith and WISDOM go together");
        assert_eq!(
            topics.into_iter().collect::<Vec<_>>(),
            vec!["faith".to_string(), "wisdom".to_string()]
        );
    }

    #[test]
    fn test_extract_defaults_to_general() {
        let topics = extract_topics("The sky is blue");
        assert_eq!(topics, BTreeSet::from(["general".to_string()]));
    }

    #[test]
    fn test_normalize_drops_empty_and_dedups() {
        let topics = normalize(["  Faith ", "faith", "", "   ", "Covenant"]);
        assert_eq!(
            topics.into_iter().collect::<Vec<_>>(),
            vec!["covenant".to_string(), "faith".to_string()]
        );
    }

    #[test]
    fn test_resolve_prefers_caller_topics() {
        let topics = resolve("truth about wisdom", ["history"]);
        assert_eq!(topics, BTreeSet::from(["history".to_string()]));

        let topics = resolve("truth about wisdom", Vec::<String>::new());
        assert!(topics.contains("truth"));
        assert!(topics.contains("wisdom"));
    }
}
