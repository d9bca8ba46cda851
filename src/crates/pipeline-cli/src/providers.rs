//! Turn a definition's provider declarations into live clients.

use anyhow::{bail, Context, Result};
use llm::config::{OLLAMA_BASE_URL, OPENAI_BASE_URL};
use llm::search::{GoogleSearchClient, GoogleSearchConfig, GOOGLE_SEARCH_URL};
use llm::{LocalLlmConfig, OllamaClient, OpenAiCompatibleClient, RemoteLlmConfig};
use pipeline_core::{
    Capabilities, PipelineDefinition, ProviderDefinition, RetryPolicy, RetryingGenerator,
    SearchProvider, SearchProviderDefinition, TextGenerator,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_SEARCH_KEY_ENV: &str = "GOOGLE_API_KEY";
const DEFAULT_SEARCH_ENGINE_ENV: &str = "GOOGLE_CSE_ID";

/// Build a client for every provider `definition` declares.
///
/// With `retries > 0` each generator is wrapped in a [`RetryingGenerator`]
/// allowing that many extra attempts on transient failures.
///
/// # Errors
///
/// Fails when a required API key variable is unset.
pub fn build_capabilities(definition: &PipelineDefinition, retries: usize) -> Result<Capabilities> {
    let mut capabilities = Capabilities::new();

    for (name, provider) in &definition.providers {
        let mut generator = build_generator(name, provider)
            .with_context(|| format!("failed to configure provider '{}'", name))?;
        if retries > 0 {
            generator = Arc::new(RetryingGenerator::new(
                generator,
                RetryPolicy::new(retries.saturating_add(1)),
            ));
        }
        debug!(provider = %name, generator = %generator.name(), "Configured generation provider");
        capabilities = capabilities.with_generator(name.clone(), generator);
    }

    for (name, search) in &definition.search {
        let client = build_search(search)
            .with_context(|| format!("failed to configure search provider '{}'", name))?;
        capabilities = capabilities.with_search(name.clone(), client);
    }

    Ok(capabilities)
}

fn build_generator(name: &str, provider: &ProviderDefinition) -> Result<Arc<dyn TextGenerator>> {
    let generator: Arc<dyn TextGenerator> = match provider {
        ProviderDefinition::OpenaiCompatible {
            base_url,
            model,
            api_key_env,
            organization,
            timeout_secs,
        } => {
            let env_var = api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV);
            let mut config = RemoteLlmConfig::from_env(
                env_var,
                base_url.as_deref().unwrap_or(OPENAI_BASE_URL),
                model.clone(),
            )?;
            if let Some(org) = organization {
                config = config.with_organization(org.clone());
            }
            if let Some(secs) = timeout_secs {
                config = config.with_timeout(Duration::from_secs(*secs));
            }
            Arc::new(OpenAiCompatibleClient::new(config)?.with_name(name))
        }
        ProviderDefinition::Ollama {
            base_url,
            model,
            timeout_secs,
        } => {
            let mut config =
                LocalLlmConfig::new(base_url.as_deref().unwrap_or(OLLAMA_BASE_URL), model.clone());
            if let Some(secs) = timeout_secs {
                config = config.with_timeout(Duration::from_secs(*secs));
            }
            Arc::new(OllamaClient::new(config)?.with_name(name))
        }
    };
    Ok(generator)
}

fn build_search(search: &SearchProviderDefinition) -> Result<Arc<dyn SearchProvider>> {
    match search {
        SearchProviderDefinition::Google {
            api_key_env,
            engine_id_env,
            base_url,
        } => {
            let config = GoogleSearchConfig::from_env(
                api_key_env.as_deref().unwrap_or(DEFAULT_SEARCH_KEY_ENV),
                engine_id_env.as_deref().unwrap_or(DEFAULT_SEARCH_ENGINE_ENV),
            )?
            .with_base_url(base_url.as_deref().unwrap_or(GOOGLE_SEARCH_URL));
            Ok(Arc::new(GoogleSearchClient::new(config)?))
        }
    }
}

/// Parse a `key=value` pair from the command line.
pub fn parse_key_value(raw: &str) -> Result<(String, String)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected key=value, got '{}'", raw);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("empty key in '{}'", raw);
    }
    Ok((key.to_string(), value.to_string()))
}
