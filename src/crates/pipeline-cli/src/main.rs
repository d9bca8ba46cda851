//! `pipeline` - validate, inspect and run declarative agent pipelines.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pipeline_cli::{build_capabilities, parse_key_value};
use pipeline_core::{describe_tree, load_definition, Capabilities, PipelineDefinition, Step};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pipeline")]
#[command(about = "Run sequential, parallel, routing and reflective LLM pipelines", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that a pipeline file parses and its step graph is valid
    Validate {
        /// Path to YAML file
        file: PathBuf,
    },

    /// Print the step tree of a pipeline
    Describe {
        /// Path to YAML file
        file: PathBuf,
    },

    /// Run a pipeline once
    Run {
        /// Path to YAML file
        file: PathBuf,

        /// Input text (read from stdin when omitted)
        #[arg(short, long)]
        input: Option<String>,

        /// Extra context values as key=value
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        set: Vec<(String, String)>,

        /// Extra attempts per generation call on transient failures
        #[arg(long, default_value_t = 0, env = "PIPELINE_RETRIES")]
        retries: usize,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate { file } => validate(&file),
        Commands::Describe { file } => describe(&file),
        Commands::Run {
            file,
            input,
            set,
            retries,
            json,
        } => run(&file, input, set, retries, json).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(file: &Path) -> Result<PipelineDefinition> {
    load_definition(file).with_context(|| format!("failed to load {}", file.display()))
}

fn validate(file: &Path) -> Result<()> {
    let definition = load(file)?;
    let root = definition
        .build(&Capabilities::placeholders(&definition))
        .context("invalid step graph")?;

    println!("✓ Pipeline is valid");
    println!("  Name: {}", definition.name);
    println!("  Root: {} ({})", root.name(), root.kind());
    println!("  Providers: {}", definition.providers.len());
    if !definition.search.is_empty() {
        println!("  Search providers: {}", definition.search.len());
    }
    println!("  Input key: {}", definition.input_key);
    Ok(())
}

fn describe(file: &Path) -> Result<()> {
    let definition = load(file)?;
    let root = definition
        .build(&Capabilities::placeholders(&definition))
        .context("invalid step graph")?;

    println!("{}", definition.name);
    if let Some(description) = &definition.description {
        println!("{}", description);
    }
    println!();
    print!("{}", describe_tree(root.as_ref()));
    Ok(())
}

async fn run(
    file: &Path,
    input: Option<String>,
    set: Vec<(String, String)>,
    retries: usize,
    json: bool,
) -> Result<()> {
    let definition = load(file)?;
    let capabilities = build_capabilities(&definition, retries)?;
    let root = definition.build(&capabilities)?;

    let input = match input {
        Some(input) => input,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read input from stdin")?;
            buf.trim_end().to_string()
        }
    };

    info!(pipeline = %definition.name, root = %root.name(), "Running pipeline");
    let mut ctx = definition.initial_context(input, set);
    let result = root.execute(&mut ctx).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.text());
        if let Some(route) = result.metadata_value("route").and_then(|v| v.as_str()) {
            eprintln!("route: {}", route);
        }
        if let Some(state) = result
            .metadata_value("reflection_state")
            .and_then(|v| v.as_str())
        {
            let iterations = result
                .metadata_value("iterations")
                .and_then(|v| v.as_u64())
                .unwrap_or_default();
            eprintln!("reflection: {} after {} iteration(s)", state, iterations);
        }
    }
    Ok(())
}
