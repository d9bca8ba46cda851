//! The web-search capability used by search-augmented leaves.

use crate::error::SearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Text inserted in place of results when a search comes back empty.
pub const NO_SEARCH_RESULTS: &str = "No search results found.";

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub link: String,
}

impl SearchResult {
    pub fn new(
        title: impl Into<String>,
        snippet: impl Into<String>,
        link: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            snippet: snippet.into(),
            link: link.into(),
        }
    }
}

/// Provider-agnostic web search.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Return at most `max_results` hits for `query`.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError>;

    /// Identifier used in logs and descriptions.
    fn name(&self) -> &str;
}

/// Render results as prompt text, one blank-line separated block per hit.
pub fn format_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return NO_SEARCH_RESULTS.to_string();
    }

    results
        .iter()
        .map(|r| format!("Title: {}\nSnippet: {}\nLink: {}", r.title, r.snippet, r.link))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_results() {
        let results = vec![
            SearchResult::new("Rust", "A language", "https://www.rust-lang.org"),
            SearchResult::new("Tokio", "An async runtime", "https://tokio.rs"),
        ];

        assert_eq!(
            format_results(&results),
            "Title: Rust\nSnippet: A language\nLink: https://www.rust-lang.org\n\n\
             Title: Tokio\nSnippet: An async runtime\nLink: https://tokio.rs"
        );
    }

    #[test]
    fn test_format_empty_results() {
        assert_eq!(format_results(&[]), NO_SEARCH_RESULTS);
    }
}
