//! Per-run key/value state.
//!
//! An [`ExecutionContext`] is created for one pipeline run, threaded through
//! the step graph by `&mut`, and dropped when the run ends. Steps read it to
//! render prompts; sequential and routing steps write their outputs into it.
//!
//! Parallel branches only ever see a shared `&ExecutionContext`. Their outputs
//! are written back by the parallel step after every branch has finished, via
//! [`merge_disjoint`](ExecutionContext::merge_disjoint), which refuses to
//! overwrite anything already present.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered mapping from context keys to text values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    values: BTreeMap<String, String>,
}

impl ExecutionContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, for seeding a run's inputs.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(key.into(), value.into())
    }

    /// Check if a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// All keys, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// All entries, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the context is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Insert every entry, failing without modifying the context if any key
    /// is already present or repeated within `entries`.
    pub fn merge_disjoint<I, K, V>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut staged: BTreeMap<String, String> = BTreeMap::new();
        for (key, value) in entries {
            let key = key.into();
            if self.values.contains_key(&key) || staged.contains_key(&key) {
                return Err(PipelineError::ContextCollision { key });
            }
            staged.insert(key, value.into());
        }
        self.values.extend(staged);
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ExecutionContext {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_returns_previous() {
        let mut ctx = ExecutionContext::new().with_value("topic", "space");
        assert_eq!(ctx.insert("topic", "oceans"), Some("space".to_string()));
        assert_eq!(ctx.get("topic"), Some("oceans"));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_merge_disjoint_inserts_all() {
        let mut ctx = ExecutionContext::new().with_value("topic", "space");
        ctx.merge_disjoint([("summary", "s"), ("questions", "q")]).unwrap();

        assert_eq!(ctx.keys().collect::<Vec<_>>(), vec!["questions", "summary", "topic"]);
    }

    #[test]
    fn test_merge_disjoint_rejects_existing_key_atomically() {
        let mut ctx = ExecutionContext::new().with_value("summary", "old");
        let err = ctx
            .merge_disjoint([("questions", "q"), ("summary", "new")])
            .unwrap_err();

        assert!(matches!(err, PipelineError::ContextCollision { ref key } if key == "summary"));
        assert_eq!(ctx.get("summary"), Some("old"));
        assert!(!ctx.contains_key("questions"));
    }

    #[test]
    fn test_merge_disjoint_rejects_repeated_key() {
        let mut ctx = ExecutionContext::new();
        assert!(ctx.merge_disjoint([("a", "1"), ("a", "2")]).is_err());
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_from_iterator() {
        let ctx: ExecutionContext = [("request", "Book me a flight")].into_iter().collect();
        assert_eq!(ctx.get("request"), Some("Book me a flight"));
    }
}
