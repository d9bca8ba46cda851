//! Classification-driven branch selection.
//!
//! A [`RoutingStep`] asks a classifier leaf for a label, maps the label onto a
//! closed [`LabelSet`] fixed at build time, and runs exactly one child: the
//! matching branch, or the mandatory fallback when the classifier's output is
//! empty, unparseable or outside the set.
//!
//! Classifier output is normalized before lookup:
//!
//! | Raw output | Label |
//! |------------|-------|
//! | `booker` | `booker` |
//! | `  "Info".\n` | `info` |
//! | `{"classification": "internet_search"}` | `internet_search` |
//! | `` ```json\n{"label": "reasoning"}\n``` `` | `reasoning` |
//! | `Booker\nThe user wants a hotel.` | `booker` |

use super::{ensure_no_merge_collision, LeafStep, Step, StepKind};
use crate::context::ExecutionContext;
use crate::error::{ClassificationError, PipelineError, Result};
use crate::llm::GenerationResult;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Label recorded for the fallback branch unless configured.
pub const DEFAULT_FALLBACK_LABEL: &str = "unclear";

/// Context key the chosen label is written to unless configured.
pub const DEFAULT_DECISION_KEY: &str = "decision";

/// Index of a label inside a [`LabelSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchLabel(usize);

impl BranchLabel {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Outcome of classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision {
    /// A configured branch.
    Branch(BranchLabel),
    /// The classifier's output matched no branch.
    Fallback,
}

/// The closed set of branch labels a router knows about.
///
/// Labels are stored lowercase, must be non-empty, contain no whitespace and
/// be unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    pub fn new<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for label in labels {
            let label = normalize_label(label.as_ref())?;
            if normalized.contains(&label) {
                return Err(PipelineError::configuration(format!(
                    "branch label '{}' is declared twice",
                    label
                )));
            }
            normalized.push(label);
        }
        Ok(Self { labels: normalized })
    }

    /// Map classifier output onto a label.
    pub fn classify(&self, raw: &str) -> std::result::Result<BranchLabel, ClassificationError> {
        let label = parse_classification(raw)?;
        self.lookup(&label)
            .ok_or(ClassificationError::UnknownLabel(label))
    }

    /// Find an already-normalized label.
    pub fn lookup(&self, label: &str) -> Option<BranchLabel> {
        self.labels.iter().position(|l| l == label).map(BranchLabel)
    }

    /// Text of a label. Panics if `label` came from a different set.
    pub fn label(&self, label: BranchLabel) -> &str {
        &self.labels[label.0]
    }

    pub fn contains(&self, label: &str) -> bool {
        self.lookup(label).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

fn normalize_label(label: &str) -> Result<String> {
    let label = label.trim().to_lowercase();
    if label.is_empty() || label.chars().any(char::is_whitespace) {
        return Err(PipelineError::configuration(format!(
            "invalid branch label {:?}: labels must be a single non-empty word",
            label
        )));
    }
    Ok(label)
}

/// Extract a label candidate from raw classifier output.
///
/// Strips code fences, reads the `classification` or `label` field of a JSON
/// object, otherwise takes the first non-empty line. The result is trimmed of
/// quotes, backticks, asterisks and trailing punctuation, then lowercased.
pub fn parse_classification(raw: &str) -> std::result::Result<String, ClassificationError> {
    let text = strip_code_fence(raw.trim());
    if text.is_empty() {
        return Err(ClassificationError::Empty);
    }

    let candidate = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => map
            .get("classification")
            .or_else(|| map.get("label"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClassificationError::UnknownLabel(text.to_string()))?,
        Ok(Value::String(label)) => label,
        _ => text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default()
            .to_string(),
    };

    let label = candidate
        .trim()
        .trim_start_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*'))
        .trim_end_matches(|c: char| {
            matches!(c, '"' | '\'' | '`' | '*' | '.' | ',' | '!' | '?' | ':' | ';')
        })
        .trim()
        .to_lowercase();

    if label.is_empty() {
        Err(ClassificationError::Empty)
    } else {
        Ok(label)
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = match rest.split_once('\n') {
        Some((_language, body)) => body,
        None => rest,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Runs a classifier, then exactly one branch.
///
/// The chosen label (or the fallback label) is written to the context under
/// the decision key so later steps can read it, and attached to the returned
/// result as `route` metadata.
///
/// A failing classifier call propagates: there is no output to fall back on.
/// A failing branch propagates too.
///
/// ```rust,ignore
/// let router = RoutingStep::builder("coordinator", classifier)
///     .branch("booker", Arc::new(booker))
///     .branch("info", Arc::new(info))
///     .fallback(Arc::new(unclear))
///     .build()?;
/// ```
pub struct RoutingStep {
    name: String,
    classifier: LeafStep,
    labels: LabelSet,
    branches: Vec<Arc<dyn Step>>,
    fallback: Arc<dyn Step>,
    fallback_label: String,
    decision_key: String,
}

impl RoutingStep {
    pub fn builder(name: impl Into<String>, classifier: LeafStep) -> RoutingStepBuilder {
        RoutingStepBuilder {
            name: name.into(),
            classifier,
            branches: Vec::new(),
            fallback: None,
            fallback_label: DEFAULT_FALLBACK_LABEL.to_string(),
            decision_key: DEFAULT_DECISION_KEY.to_string(),
        }
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn decision_key(&self) -> &str {
        &self.decision_key
    }

    /// Map classifier text onto a decision. Never fails.
    pub fn decide(&self, classification: &str) -> RoutingDecision {
        match self.labels.classify(classification) {
            Ok(label) => RoutingDecision::Branch(label),
            Err(reason) => {
                warn!(
                    step = %self.name,
                    reason = %reason,
                    fallback = %self.fallback_label,
                    "Classification did not match a branch, using fallback"
                );
                RoutingDecision::Fallback
            }
        }
    }

    /// Label text for a decision.
    pub fn label_of(&self, decision: RoutingDecision) -> &str {
        match decision {
            RoutingDecision::Branch(label) => self.labels.label(label),
            RoutingDecision::Fallback => &self.fallback_label,
        }
    }

    fn branch_for(&self, decision: RoutingDecision) -> &Arc<dyn Step> {
        match decision {
            RoutingDecision::Branch(label) => &self.branches[label.index()],
            RoutingDecision::Fallback => &self.fallback,
        }
    }
}

/// Builder for [`RoutingStep`].
pub struct RoutingStepBuilder {
    name: String,
    classifier: LeafStep,
    branches: Vec<(String, Arc<dyn Step>)>,
    fallback: Option<Arc<dyn Step>>,
    fallback_label: String,
    decision_key: String,
}

impl RoutingStepBuilder {
    /// Add a branch selected by `label` (case-insensitive).
    pub fn branch(mut self, label: impl Into<String>, step: Arc<dyn Step>) -> Self {
        self.branches.push((label.into(), step));
        self
    }

    /// Set the branch run when classification matches nothing. Required.
    pub fn fallback(mut self, step: Arc<dyn Step>) -> Self {
        self.fallback = Some(step);
        self
    }

    pub fn fallback_label(mut self, label: impl Into<String>) -> Self {
        self.fallback_label = label.into();
        self
    }

    pub fn decision_key(mut self, key: impl Into<String>) -> Self {
        self.decision_key = key.into();
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Configuration error when there are no branches, a label is invalid or
    /// repeated, the fallback is missing or its label collides with a branch
    /// label, or a branch merges a key equal to the decision key.
    pub fn build(self) -> Result<RoutingStep> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::configuration("step name must not be empty"));
        }
        if self.branches.is_empty() {
            return Err(PipelineError::configuration(format!(
                "routing step '{}' has no branches",
                self.name
            )));
        }
        let fallback = self.fallback.ok_or_else(|| {
            PipelineError::configuration(format!(
                "routing step '{}' has no fallback branch",
                self.name
            ))
        })?;

        let labels = LabelSet::new(self.branches.iter().map(|(label, _)| label))?;
        let fallback_label = normalize_label(&self.fallback_label)?;
        if labels.contains(&fallback_label) {
            return Err(PipelineError::configuration(format!(
                "routing step '{}': fallback label '{}' is also a branch label",
                self.name, fallback_label
            )));
        }
        if self.decision_key.trim().is_empty() {
            return Err(PipelineError::configuration(format!(
                "routing step '{}': decision key must not be empty",
                self.name
            )));
        }
        for (_, branch) in &self.branches {
            ensure_no_merge_collision(&self.name, [self.decision_key.as_str()], branch.as_ref())?;
        }
        ensure_no_merge_collision(&self.name, [self.decision_key.as_str()], fallback.as_ref())?;

        Ok(RoutingStep {
            name: self.name,
            classifier: self.classifier,
            labels,
            branches: self.branches.into_iter().map(|(_, step)| step).collect(),
            fallback,
            fallback_label,
            decision_key: self.decision_key,
        })
    }
}

#[async_trait]
impl Step for RoutingStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        StepKind::Routing
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<GenerationResult> {
        let classification = self.classifier.generate(ctx).await?;
        let decision = self.decide(classification.text());
        let label = self.label_of(decision);
        let branch = self.branch_for(decision);

        info!(step = %self.name, route = %label, branch = %branch.name(), "Routing");
        ctx.insert(self.decision_key.clone(), label);

        let result = branch.execute(ctx).await?;
        Ok(result.with_metadata("route", label))
    }

    fn children(&self) -> Vec<(String, &dyn Step)> {
        let mut children: Vec<(String, &dyn Step)> = vec![(
            "classifier".to_string(),
            &self.classifier as &dyn Step,
        )];
        children.extend(
            self.labels
                .iter()
                .zip(&self.branches)
                .map(|(label, step)| (label.to_string(), step.as_ref())),
        );
        children.push((self.fallback_label.clone(), self.fallback.as_ref()));
        children
    }

    fn produced_keys(&self) -> Vec<&str> {
        let mut keys = vec![self.decision_key.as_str()];
        keys.extend(
            self.branches
                .iter()
                .chain(std::iter::once(&self.fallback))
                .flat_map(|step| step.produced_keys()),
        );
        keys
    }
}

impl fmt::Debug for RoutingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingStep")
            .field("name", &self.name)
            .field("classifier", &self.classifier)
            .field("labels", &self.labels)
            .field("fallback_label", &self.fallback_label)
            .field("decision_key", &self.decision_key)
            .finish()
    }
}
