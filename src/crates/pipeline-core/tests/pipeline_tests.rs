//! End-to-end behaviour of composed pipelines against scripted generators.

mod common;

use common::{CallLog, ScriptedModel};
use pipeline_core::{
    parse_definition, Capabilities, ExecutionContext, GenerationError, LeafStep, LoopState,
    ParallelStep, PipelineError, ReflectiveLoopStep, RoutingStep, SequentialStep, Step,
};
use serde_json::Value;
use std::sync::Arc;

// ============================================================================
// Sequential
// ============================================================================

#[tokio::test]
async fn test_sequential_calls_each_leaf_once_in_order() {
    let log = CallLog::new();
    let a = ScriptedModel::new("a", &log, &["alpha"]);
    let b = ScriptedModel::new("b", &log, &["beta"]);
    let c = ScriptedModel::new("c", &log, &["gamma"]);

    let chain = SequentialStep::builder("abc")
        .then("a_out", Arc::new(LeafStep::new("a", a, "{input}").unwrap()))
        .then("b_out", Arc::new(LeafStep::new("b", b, "{a_out}").unwrap()))
        .then("c_out", Arc::new(LeafStep::new("c", c, "{b_out}").unwrap()))
        .build()
        .unwrap();

    let mut ctx = ExecutionContext::new().with_value("input", "go");
    let result = chain.execute(&mut ctx).await.unwrap();

    assert_eq!(log.len(), 3);
    assert_eq!(log.models(), vec!["a", "b", "c"]);
    assert_eq!(result.text(), "gamma");
    assert_eq!(result.model(), "c");
    assert_eq!(
        log.calls()[2],
        ("c".to_string(), "beta".to_string()),
        "each stage reads the previous stage's output"
    );
}

// ============================================================================
// Parallel
// ============================================================================

#[tokio::test]
async fn test_parallel_single_failure_yields_one_entry_aggregate() {
    let log = CallLog::new();
    let ok = ScriptedModel::new("ok", &log, &["fine"]);
    let broken = ScriptedModel::failing(
        "broken",
        &log,
        GenerationError::Timeout("30s elapsed".into()),
    );

    let step = ParallelStep::new(
        "research",
        vec![
            LeafStep::new("summary", ok.clone(), "Summarize {topic}").unwrap(),
            LeafStep::new("questions", broken, "Questions about {topic}").unwrap(),
            LeafStep::new("key_terms", ok.clone(), "Key terms of {topic}").unwrap(),
        ],
        LeafStep::new("synthesis", ok, "{summary}\n{questions}\n{key_terms}").unwrap(),
    )
    .unwrap();

    let mut ctx = ExecutionContext::new().with_value("topic", "the history of space exploration");
    let err = step.execute(&mut ctx).await.unwrap_err();

    let PipelineError::Aggregate(aggregate) = err else {
        panic!("expected an aggregate error");
    };
    assert_eq!(aggregate.failures.len(), 1);
    assert_eq!(aggregate.failures[0].branch, "questions");
    assert!(matches!(
        aggregate.failures[0].error,
        PipelineError::Generation(GenerationError::Timeout(_))
    ));

    // all three branches ran, the merge did not
    assert_eq!(log.len(), 3);
    assert!(!ctx.contains_key("summary"));
}

#[tokio::test]
async fn test_parallel_success_runs_merge_with_all_outputs() {
    let log = CallLog::new();
    let model = ScriptedModel::new("m", &log, &["one", "two", "merged"]);

    let step = ParallelStep::new(
        "fanout",
        vec![
            LeafStep::new("first", model.clone(), "first {topic}").unwrap(),
            LeafStep::new("second", model.clone(), "second {topic}").unwrap(),
        ],
        LeafStep::new("merge", model, "{first} | {second}").unwrap(),
    )
    .unwrap();

    let mut ctx = ExecutionContext::new().with_value("topic", "rust");
    let result = step.execute(&mut ctx).await.unwrap();

    assert_eq!(result.text(), "merged");
    assert_eq!(log.calls()[2].1, "one | two");
}

// ============================================================================
// Routing
// ============================================================================

struct Coordinator {
    step: RoutingStep,
    log: CallLog,
}

fn coordinator(classification: &str) -> Coordinator {
    let log = CallLog::new();
    let classifier = ScriptedModel::new("classifier", &log, &[classification]);
    let booker = ScriptedModel::new("booker", &log, &["Booking handled."]);
    let info = ScriptedModel::new("info", &log, &["The capital of Italy is Rome."]);
    let unclear = ScriptedModel::new("unclear", &log, &["Could you clarify your request?"]);

    let step = RoutingStep::builder(
        "coordinator",
        LeafStep::new(
            "classify",
            classifier,
            "Analyze the user's request and reply with 'booker', 'info' or 'unclear'.\n\n{request}",
        )
        .unwrap(),
    )
    .branch("booker", Arc::new(LeafStep::new("booker", booker, "{request}").unwrap()))
    .branch("info", Arc::new(LeafStep::new("info", info, "{request}").unwrap()))
    .fallback(Arc::new(LeafStep::new("unclear", unclear, "{request}").unwrap()))
    .build()
    .unwrap();

    Coordinator { step, log }
}

#[tokio::test]
async fn test_routing_booker_request_runs_booker_only() {
    let c = coordinator("booker");
    let mut ctx = ExecutionContext::new().with_value("request", "Book me a hotel in Paris");

    let result = c.step.execute(&mut ctx).await.unwrap();

    assert_eq!(c.log.models(), vec!["classifier", "booker"]);
    assert_eq!(result.text(), "Booking handled.");
    assert_eq!(result.metadata_value("route"), Some(&Value::from("booker")));
}

#[tokio::test]
async fn test_routing_unparseable_classification_runs_fallback() {
    let c = coordinator("¯\\_(ツ)_/¯ maybe flights? maybe facts?");
    let mut ctx = ExecutionContext::new().with_value("request", "Book me a hotel in Paris");

    let result = c.step.execute(&mut ctx).await.unwrap();

    assert_eq!(c.log.models(), vec!["classifier", "unclear"]);
    assert_eq!(result.text(), "Could you clarify your request?");
    assert_eq!(ctx.get("decision"), Some("unclear"));
}

#[tokio::test]
async fn test_routing_selected_branch_failure_propagates() {
    let log = CallLog::new();
    let step = RoutingStep::builder(
        "r",
        LeafStep::new("classify", ScriptedModel::new("c", &log, &["info"]), "{q}").unwrap(),
    )
    .branch(
        "info",
        Arc::new(
            LeafStep::new(
                "info",
                ScriptedModel::failing("info", &log, GenerationError::RateLimited("quota".into())),
                "{q}",
            )
            .unwrap(),
        ),
    )
    .fallback(Arc::new(
        LeafStep::new("unclear", ScriptedModel::new("u", &log, &["?"]), "{q}").unwrap(),
    ))
    .build()
    .unwrap();

    let mut ctx = ExecutionContext::new().with_value("q", "What is the capital of Italy?");
    let err = step.execute(&mut ctx).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Generation(GenerationError::RateLimited(_))
    ));
    assert_eq!(log.models(), vec!["c", "info"]);
}

// ============================================================================
// Reflective loop
// ============================================================================

fn reflection(generator: Arc<ScriptedModel>, critic: Arc<ScriptedModel>) -> ReflectiveLoopStep {
    ReflectiveLoopStep::builder("factorial")
        .generator(generator)
        .critic(critic)
        .task("Create a Python function named `calculate_factorial`.")
        .critic_system(
            "If the code is perfect, respond with the single phrase 'CODE_IS_PERFECT'. \
             Otherwise, provide a bulleted list of your critiques.",
        )
        .sentinel("CODE_IS_PERFECT")
        .max_iterations(3)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_reflection_never_accepted_exhausts_after_three_cycles() {
    let log = CallLog::new();
    let generator = ScriptedModel::new("writer", &log, &["v1", "v2", "v3", "v4"]);
    let critic = ScriptedModel::new("reviewer", &log, &["- add a docstring"]);

    let outcome = reflection(generator, critic)
        .run(&ExecutionContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.state, LoopState::Exhausted);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.draft.text(), "v3");
    assert_eq!(
        log.models(),
        vec!["writer", "reviewer", "writer", "reviewer", "writer", "reviewer"]
    );
}

#[tokio::test]
async fn test_reflection_accepted_on_second_iteration_returns_second_draft() {
    let log = CallLog::new();
    let generator = ScriptedModel::new("writer", &log, &["v1", "v2", "v3"]);
    let critic = ScriptedModel::new(
        "reviewer",
        &log,
        &["- handle negative input", "CODE_IS_PERFECT", "- unreachable"],
    );

    let outcome = reflection(generator, critic)
        .run(&ExecutionContext::new())
        .await
        .unwrap();

    assert_eq!(outcome.state, LoopState::Accepted);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.draft.text(), "v2");
    assert_eq!(log.len(), 4);
}

#[tokio::test]
async fn test_reflection_lowercase_sentinel_does_not_accept() {
    let log = CallLog::new();
    let generator = ScriptedModel::new("writer", &log, &["v1", "v2", "v3"]);
    let critic = ScriptedModel::new("reviewer", &log, &["code_is_perfect"]);

    let outcome = reflection(generator, critic)
        .run(&ExecutionContext::new())
        .await
        .unwrap();
    assert_eq!(outcome.state, LoopState::Exhausted);
}

#[tokio::test]
async fn test_reflection_generator_failure_propagates() {
    let log = CallLog::new();
    let generator = ScriptedModel::with_outcomes(
        "writer",
        &log,
        vec![
            Ok("v1".to_string()),
            Err(GenerationError::Transport("connection reset".into())),
        ],
    );
    let critic = ScriptedModel::new("reviewer", &log, &["- needs tests"]);

    let err = reflection(generator, critic)
        .execute(&mut ExecutionContext::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Generation(GenerationError::Transport(_))
    ));
}

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn test_rerunning_a_built_graph_repeats_control_flow() {
    let c = coordinator("info");

    let mut first = ExecutionContext::new().with_value("request", "What is the capital of Italy?");
    let mut second = first.clone();

    c.step.execute(&mut first).await.unwrap();
    let first_calls = c.log.models();

    c.step.execute(&mut second).await.unwrap();
    let all_calls = c.log.models();

    assert_eq!(first_calls, vec!["classifier", "info"]);
    assert_eq!(all_calls[2..], first_calls[..]);
    assert_eq!(first, second);
}

// ============================================================================
// Declarative definitions
// ============================================================================

const PROMPT_CHAIN: &str = r#"
name: spec_to_json
providers:
  groq: { kind: openai_compatible, model: llama-3.1-8b-instant, api_key_env: GROQ_API_KEY }
root:
  type: sequential
  name: spec_to_json
  steps:
    - key: specifications
      step:
        type: leaf
        name: extract
        provider: groq
        prompt: "Extract the technical specifications from the following text:\n\n{input}"
    - key: json
      step:
        type: leaf
        name: transform
        provider: groq
        prompt: "Transform into JSON with 'cpu', 'memory' and 'storage' keys:\n\n{specifications}"
"#;

#[tokio::test]
async fn test_definition_runs_against_registered_capabilities() {
    let definition = parse_definition(PROMPT_CHAIN).unwrap();
    let log = CallLog::new();
    let model = ScriptedModel::new(
        "groq",
        &log,
        &[
            "CPU: 3.5 GHz octa-core; RAM: 16GB; Storage: 1TB NVMe SSD",
            r#"{"cpu": "3.5 GHz octa-core", "memory": "16GB", "storage": "1TB NVMe SSD"}"#,
        ],
    );
    let caps = Capabilities::new().with_generator("groq", model);

    let root = definition.build(&caps).unwrap();
    let mut ctx = definition.initial_context(
        "The new laptop model features a 3.5 GHz octa-core processor, 16GB of RAM, and a 1TB NVMe SSD.",
        std::iter::empty::<(String, String)>(),
    );
    let result = root.execute(&mut ctx).await.unwrap();

    assert!(result.text().starts_with("{\"cpu\""));
    assert_eq!(
        log.calls()[1].1,
        "Transform into JSON with 'cpu', 'memory' and 'storage' keys:\n\n\
         CPU: 3.5 GHz octa-core; RAM: 16GB; Storage: 1TB NVMe SSD"
    );
    assert_eq!(ctx.get("json"), Some(result.text()));
}
