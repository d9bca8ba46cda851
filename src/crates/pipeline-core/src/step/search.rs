//! Search-augmented generation.

use super::{LeafStep, Step, StepKind};
use crate::context::ExecutionContext;
use crate::error::{PipelineError, Result};
use crate::llm::GenerationResult;
use crate::search::{format_results, SearchProvider};
use crate::template::PromptTemplate;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Context key the formatted results are written to unless configured.
pub const DEFAULT_RESULTS_KEY: &str = "search_results";

/// Queries the search capability, writes the formatted hits into the context,
/// then makes one generation call through an inner [`LeafStep`].
///
/// The inner leaf's prompt is expected to reference the results key:
///
/// ```rust,ignore
/// let answer = LeafStep::new(
///     "search_answer",
///     model,
///     "Answer using these search results:\n{search_results}\n\nQuestion: {request}",
/// )?;
/// let step = SearchStep::new("internet_search", google, "{request}", answer)?;
/// ```
#[derive(Clone)]
pub struct SearchStep {
    name: String,
    search: Arc<dyn SearchProvider>,
    query: PromptTemplate,
    max_results: usize,
    results_key: String,
    leaf: LeafStep,
}

impl SearchStep {
    pub fn new(
        name: impl Into<String>,
        search: Arc<dyn SearchProvider>,
        query: &str,
        leaf: LeafStep,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PipelineError::configuration("step name must not be empty"));
        }
        Ok(Self {
            name,
            search,
            query: PromptTemplate::parse(query)?,
            max_results: 3,
            results_key: DEFAULT_RESULTS_KEY.to_string(),
            leaf,
        })
    }

    /// Cap the number of hits requested.
    pub fn with_max_results(mut self, max_results: usize) -> Result<Self> {
        if max_results == 0 {
            return Err(PipelineError::configuration(format!(
                "search step '{}': max_results must be at least 1",
                self.name
            )));
        }
        self.max_results = max_results;
        Ok(self)
    }

    /// Write results under a different context key.
    pub fn with_results_key(mut self, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(PipelineError::configuration(format!(
                "search step '{}': results key must not be empty",
                self.name
            )));
        }
        self.results_key = key;
        Ok(self)
    }

    pub fn results_key(&self) -> &str {
        &self.results_key
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }
}

#[async_trait]
impl Step for SearchStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::Search
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<GenerationResult> {
        let query = self.query.render(ctx, &self.name)?;
        info!(step = %self.name, provider = %self.search.name(), query = %query, "Searching");

        let results = self.search.search(&query, self.max_results).await?;
        debug!(step = %self.name, hits = results.len(), "Search finished");

        ctx.insert(self.results_key.clone(), format_results(&results));
        let result = self.leaf.generate(ctx).await?;
        Ok(result.with_metadata("search_hits", results.len()))
    }

    fn children(&self) -> Vec<(String, &dyn Step)> {
        vec![("answer".to_string(), &self.leaf as &dyn Step)]
    }

    fn produced_keys(&self) -> Vec<&str> {
        vec![self.results_key.as_str()]
    }
}

impl fmt::Debug for SearchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchStep")
            .field("name", &self.name)
            .field("search", &self.search.name())
            .field("query", &self.query.source())
            .field("max_results", &self.max_results)
            .field("results_key", &self.results_key)
            .field("leaf", &self.leaf)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GenerationError, SearchError};
    use crate::llm::{GenerationRequest, TextGenerator};
    use crate::search::{SearchResult, NO_SEARCH_RESULTS};
    use std::sync::Mutex;

    struct EchoPrompt;

    #[async_trait]
    impl TextGenerator for EchoPrompt {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> std::result::Result<GenerationResult, GenerationError> {
            Ok(GenerationResult::new(
                request.prompt_text().unwrap_or_default(),
                "echo",
            ))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct FixedSearch {
        results: std::result::Result<Vec<SearchResult>, SearchError>,
        queries: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl SearchProvider for FixedSearch {
        async fn search(
            &self,
            query: &str,
            max_results: usize,
        ) -> std::result::Result<Vec<SearchResult>, SearchError> {
            self.queries
                .lock()
                .unwrap()
                .push((query.to_string(), max_results));
            self.results.clone()
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn answer_leaf() -> LeafStep {
        LeafStep::new("answer", Arc::new(EchoPrompt), "{search_results}\nQ: {request}").unwrap()
    }

    #[tokio::test]
    async fn test_search_results_feed_the_prompt() {
        let search = Arc::new(FixedSearch {
            results: Ok(vec![SearchResult::new(
                "Weather",
                "Sunny in Paris",
                "https://example.com/paris",
            )]),
            queries: Mutex::new(Vec::new()),
        });
        let step = SearchStep::new("web", search.clone(), "{request}", answer_leaf())
            .unwrap()
            .with_max_results(5)
            .unwrap();

        let mut ctx = ExecutionContext::new().with_value("request", "Paris weather today");
        let result = step.execute(&mut ctx).await.unwrap();

        assert_eq!(
            result.text(),
            "Title: Weather\nSnippet: Sunny in Paris\nLink: https://example.com/paris\nQ: Paris weather today"
        );
        assert_eq!(result.metadata_value("search_hits"), Some(&serde_json::Value::from(1)));
        assert_eq!(
            search.queries.lock().unwrap().as_slice(),
            &[("Paris weather today".to_string(), 5)]
        );
        assert!(ctx.contains_key(DEFAULT_RESULTS_KEY));
    }

    #[tokio::test]
    async fn test_empty_results_use_placeholder_text() {
        let search = Arc::new(FixedSearch {
            results: Ok(Vec::new()),
            queries: Mutex::new(Vec::new()),
        });
        let step = SearchStep::new("web", search, "{request}", answer_leaf()).unwrap();

        let mut ctx = ExecutionContext::new().with_value("request", "obscure");
        step.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.get(DEFAULT_RESULTS_KEY), Some(NO_SEARCH_RESULTS));
    }

    #[tokio::test]
    async fn test_search_failure_propagates() {
        let search = Arc::new(FixedSearch {
            results: Err(SearchError::Transport("connection refused".into())),
            queries: Mutex::new(Vec::new()),
        });
        let step = SearchStep::new("web", search, "{request}", answer_leaf()).unwrap();

        let mut ctx = ExecutionContext::new().with_value("request", "anything");
        let err = step.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::Search(SearchError::Transport(_))));
    }

    #[test]
    fn test_zero_max_results_is_rejected() {
        let search = Arc::new(FixedSearch {
            results: Ok(Vec::new()),
            queries: Mutex::new(Vec::new()),
        });
        let step = SearchStep::new("web", search, "{request}", answer_leaf()).unwrap();
        assert!(step.with_max_results(0).unwrap_err().is_configuration());
    }
}
