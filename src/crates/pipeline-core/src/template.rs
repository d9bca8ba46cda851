//! Prompt templates with `{key}` placeholders.
//!
//! Templates are parsed once, when the owning step is constructed, so a
//! malformed template is a configuration error rather than a run-time one.
//!
//! Syntax:
//! - `{key}` is replaced by the context value stored under `key`
//! - `{{` and `}}` produce literal braces (needed for JSON examples in prompts)
//! - keys may contain ASCII letters, digits, `_`, `-` and `.`
//!
//! ```rust
//! use pipeline_core::{ExecutionContext, PromptTemplate};
//!
//! let template = PromptTemplate::parse(
//!     "Respond only with JSON like {{\"classification\": \"simple\"}}.\n\n{request}",
//! ).unwrap();
//! let ctx = ExecutionContext::new().with_value("request", "What is 2 + 2?");
//!
//! assert_eq!(
//!     template.render(&ctx, "classify").unwrap(),
//!     "Respond only with JSON like {\"classification\": \"simple\"}.\n\nWhat is 2 + 2?",
//! );
//! ```

use crate::context::ExecutionContext;
use crate::error::{PipelineError, Result};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse a template.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Configuration`] on an unclosed `{`, a stray `}` or an
    /// invalid placeholder name.
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for n in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        name.push(n);
                    }
                    if !closed {
                        return Err(PipelineError::configuration(format!(
                            "unclosed '{{' in template: {:?}",
                            source
                        )));
                    }
                    let name = name.trim();
                    if !is_valid_key(name) {
                        return Err(PipelineError::configuration(format!(
                            "invalid placeholder '{{{}}}' in template (escape literal braces as '{{{{' and '}}}}')",
                            name
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(name.to_string()));
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => {
                    return Err(PipelineError::configuration(format!(
                        "unmatched '}}' in template: {:?}",
                        source
                    )));
                }
                _ => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { source, segments })
    }

    /// Render against a context.
    ///
    /// `step` names the owning step in the error if a placeholder is missing.
    pub fn render(&self, ctx: &ExecutionContext, step: &str) -> Result<String> {
        self.render_with(ctx, &[], step)
    }

    /// Render against a context, consulting `overrides` before the context.
    pub fn render_with(
        &self,
        ctx: &ExecutionContext,
        overrides: &[(&str, &str)],
        step: &str,
    ) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(key) => {
                    let value = overrides
                        .iter()
                        .find(|(k, _)| *k == key)
                        .map(|(_, v)| *v)
                        .or_else(|| ctx.get(key))
                        .ok_or_else(|| PipelineError::missing_key(step, key.as_str()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    /// Placeholder names, in order of appearance (repeats included).
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(key) => Some(key.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Check if the template reads `key`.
    pub fn references(&self, key: &str) -> bool {
        self.placeholders().any(|p| p == key)
    }

    /// The unparsed template text.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn is_valid_key(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
