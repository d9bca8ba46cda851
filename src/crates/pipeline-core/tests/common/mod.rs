//! Shared mock generators for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use pipeline_core::{GenerationError, GenerationRequest, GenerationResult, TextGenerator};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Ordered record of every call made through any [`ScriptedModel`] sharing it.
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(model name, prompt)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Model names in call order.
    pub fn models(&self) -> Vec<String> {
        self.calls().into_iter().map(|(model, _)| model).collect()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn record(&self, model: &str, prompt: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((model.to_string(), prompt.to_string()));
    }
}

/// Mock generator that replays scripted outcomes, repeating the last one once
/// the script runs out.
pub struct ScriptedModel {
    name: String,
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    last: Mutex<Result<String, GenerationError>>,
    log: CallLog,
}

impl ScriptedModel {
    pub fn new(name: &str, log: &CallLog, replies: &[&str]) -> Arc<Self> {
        Self::with_outcomes(
            name,
            log,
            replies.iter().map(|r| Ok(r.to_string())).collect(),
        )
    }

    pub fn failing(name: &str, log: &CallLog, error: GenerationError) -> Arc<Self> {
        Self::with_outcomes(name, log, vec![Err(error)])
    }

    pub fn with_outcomes(
        name: &str,
        log: &CallLog,
        outcomes: Vec<Result<String, GenerationError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(outcomes.into()),
            last: Mutex::new(Ok(String::new())),
            log: log.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for ScriptedModel {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, GenerationError> {
        self.log
            .record(&self.name, request.prompt_text().unwrap_or_default());

        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *last = next;
        }
        last.clone()
            .map(|text| GenerationResult::new(text, self.name.clone()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
