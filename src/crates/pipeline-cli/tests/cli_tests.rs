//! Integration tests for pipeline-cli
//!
//! These tests verify:
//! - The bundled pipeline files load and build
//! - Provider wiring from definitions
//! - A bundled pipeline runs end to end against a scripted model

use async_trait::async_trait;
use pipeline_cli::build_capabilities;
use pipeline_core::{
    describe_tree, load_definition, parse_definition, Capabilities, GenerationError,
    GenerationRequest, GenerationResult, PipelineDefinition, Step, StepKind, TextGenerator,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn pipelines_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../../pipelines")
}

fn load(name: &str) -> PipelineDefinition {
    load_definition(pipelines_dir().join(name)).unwrap()
}

/// Replies with the next scripted answer and records every prompt.
struct Scripted {
    replies: Mutex<Vec<&'static str>>,
    prompts: Mutex<Vec<String>>,
}

impl Scripted {
    fn new(replies: &[&'static str]) -> Arc<Self> {
        let mut replies = replies.to_vec();
        replies.reverse();
        Arc::new(Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TextGenerator for Scripted {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, GenerationError> {
        self.prompts
            .lock()
            .unwrap()
            .push(request.prompt_text().unwrap_or_default().to_string());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| GenerationError::Provider("script exhausted".into()))?;
        Ok(GenerationResult::new(reply, "scripted"))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[test]
fn test_bundled_pipelines_build() {
    let expected = [
        ("prompt_chain.yaml", StepKind::Sequential),
        ("parallel_research.yaml", StepKind::Parallel),
        ("coordinator_routing.yaml", StepKind::Routing),
        ("reflection.yaml", StepKind::ReflectiveLoop),
        ("resource_aware.yaml", StepKind::Routing),
        ("robust_location.yaml", StepKind::Sequential),
    ];

    for (file, kind) in expected {
        let definition = load(file);
        let root = definition
            .build(&Capabilities::placeholders(&definition))
            .unwrap_or_else(|e| panic!("{} failed to build: {}", file, e));
        assert_eq!(root.kind(), kind, "{}", file);
    }
}

#[test]
fn test_describe_routing_tree() {
    let definition = load("resource_aware.yaml");
    let root = definition
        .build(&Capabilities::placeholders(&definition))
        .unwrap();

    let tree = describe_tree(root.as_ref());
    assert!(tree.starts_with("router (routing)\n"));
    assert!(tree.contains("  classifier: classify (leaf)\n"));
    assert!(tree.contains("  internet_search: internet_search (search)\n"));
    assert!(tree.contains("    answer: search_answer (leaf)\n"));
    assert!(tree.contains("  other: fallback (leaf)\n"));
}

#[test]
fn test_parallel_input_key() {
    let definition = load("parallel_research.yaml");
    assert_eq!(definition.input_key, "topic");
}

#[test]
fn test_ollama_provider_needs_no_credentials() {
    let definition = parse_definition(
        r#"
name: local
providers:
  local: { kind: ollama, model: llama3.2, base_url: "http://localhost:11434" }
root: { type: leaf, name: answer, provider: local, prompt: "{input}" }
"#,
    )
    .unwrap();

    let capabilities = build_capabilities(&definition, 0).unwrap();
    assert_eq!(capabilities.generator("local").unwrap().name(), "local");
    assert!(definition.build(&capabilities).is_ok());
}

#[test]
fn test_retries_wrap_generators() {
    let definition = parse_definition(
        r#"
name: local
providers:
  local: { kind: ollama, model: llama3.2 }
root: { type: leaf, name: answer, provider: local, prompt: "{input}" }
"#,
    )
    .unwrap();

    let capabilities = build_capabilities(&definition, 2).unwrap();
    assert_eq!(
        capabilities.generator("local").unwrap().name(),
        "local (retry x3)"
    );
}

#[test]
fn test_retry_count_saturates() {
    let definition = parse_definition(
        r#"
name: local
providers:
  local: { kind: ollama, model: llama3.2 }
root: { type: leaf, name: answer, provider: local, prompt: "{input}" }
"#,
    )
    .unwrap();

    let capabilities = build_capabilities(&definition, usize::MAX).unwrap();
    assert_eq!(
        capabilities.generator("local").unwrap().name(),
        format!("local (retry x{})", usize::MAX)
    );
}

#[test]
fn test_missing_api_key_is_reported() {
    let definition = parse_definition(
        r#"
name: remote
providers:
  remote:
    kind: openai_compatible
    model: gpt-4o-mini
    api_key_env: PIPELINE_CLI_TEST_MISSING_KEY
root: { type: leaf, name: answer, provider: remote, prompt: "{input}" }
"#,
    )
    .unwrap();

    let err = build_capabilities(&definition, 0).unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("remote"));
    assert!(message.contains("PIPELINE_CLI_TEST_MISSING_KEY"));
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.yaml");
    std::fs::write(
        &path,
        r#"
name: broken
providers:
  groq: { kind: ollama, model: llama3.2 }
root:
  type: sequential
  name: empty
  steps: []
"#,
    )
    .unwrap();

    let definition = load_definition(&path).unwrap();
    let err = definition
        .build(&Capabilities::placeholders(&definition))
        .unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn test_coordinator_runs_booking_branch() {
    let definition = load("coordinator_routing.yaml");
    let model = Scripted::new(&["booker", "Booked a flight to London."]);
    let capabilities = Capabilities::new().with_generator("groq", model.clone());

    let root = definition.build(&capabilities).unwrap();
    let mut ctx = definition.initial_context(
        "Book me a flight to London.",
        Vec::<(String, String)>::new(),
    );
    let result = root.execute(&mut ctx).await.unwrap();

    assert_eq!(result.text(), "Booked a flight to London.");
    assert_eq!(ctx.get("decision"), Some("booker"));

    let prompts = model.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert!(prompts.iter().all(|p| p == "Book me a flight to London."));
}

#[tokio::test]
async fn test_prompt_chain_feeds_first_output_forward() {
    let definition = load("prompt_chain.yaml");
    let model = Scripted::new(&["CPU: 3.5 GHz octa-core", r#"{"cpu": "3.5 GHz octa-core"}"#]);
    let capabilities = Capabilities::new().with_generator("groq", model.clone());

    let root = definition.build(&capabilities).unwrap();
    let mut ctx = definition.initial_context(
        "The new laptop model features a 3.5 GHz octa-core processor.",
        Vec::<(String, String)>::new(),
    );
    let result = root.execute(&mut ctx).await.unwrap();

    assert_eq!(result.text(), r#"{"cpu": "3.5 GHz octa-core"}"#);
    let prompts = model.prompts.lock().unwrap();
    assert!(prompts[1].ends_with("CPU: 3.5 GHz octa-core"));
}

#[tokio::test]
async fn test_robust_location_falls_back_when_lookup_fails() {
    let definition = load("robust_location.yaml");
    let geocoder = Scripted::new(&[]);
    let model = Scripted::new(&["Springfield, a mid-sized town.", "You are in Springfield."]);
    let capabilities = Capabilities::new()
        .with_generator("geocoder", geocoder.clone())
        .with_generator("groq", model.clone());

    let root = definition.build(&capabilities).unwrap();
    let mut ctx = definition.initial_context(
        "742 Evergreen Terrace, Springfield",
        Vec::<(String, String)>::new(),
    );
    let result = root.execute(&mut ctx).await.unwrap();

    assert_eq!(result.text(), "You are in Springfield.");
    assert_eq!(ctx.get("primary_location_failed"), Some("true"));
    assert!(ctx
        .get("primary_location_error")
        .unwrap()
        .contains("script exhausted"));
    assert_eq!(ctx.get("location_result"), Some("Springfield, a mid-sized town."));
    assert_eq!(geocoder.prompts.lock().unwrap().len(), 1);

    let prompts = model.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].ends_with("Springfield, a mid-sized town."));
}
