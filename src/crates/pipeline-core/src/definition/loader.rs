//! YAML pipeline loader with include and environment variable support
//!
//! - `$include: other.yaml` replaces the mapping it appears in with the
//!   contents of `other.yaml`, resolved relative to the including file
//! - `${VAR}` and `${VAR:default}` inside any string are replaced from the
//!   process environment (after includes are resolved)

use super::PipelineDefinition;
use crate::error::{PipelineError, Result};
use regex::Regex;
use serde_yaml::Value as YamlValue;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

const INCLUDE_KEY: &str = "$include";
const MAX_INCLUDE_DEPTH: usize = 16;

/// Load a pipeline definition from a YAML file.
pub fn load_definition<P: AsRef<Path>>(path: P) -> Result<PipelineDefinition> {
    let path = path.as_ref();
    let value = load_yaml_file(path, 0)?;
    let definition: PipelineDefinition = serde_yaml::from_value(value).map_err(|e| {
        PipelineError::configuration(format!("Invalid pipeline definition {:?}: {}", path, e))
    })?;
    debug!(path = ?path, pipeline = %definition.name, "Loaded pipeline definition");
    Ok(definition)
}

/// Parse a pipeline definition from YAML text.
///
/// Environment references are expanded. `$include` paths resolve against the
/// current directory.
pub fn parse_definition(yaml: &str) -> Result<PipelineDefinition> {
    let mut value: YamlValue = serde_yaml::from_str(yaml)
        .map_err(|e| PipelineError::configuration(format!("Failed to parse YAML: {}", e)))?;
    process_includes(&mut value, Path::new("."), 0)?;
    expand_variables(&mut value);

    serde_yaml::from_value(value)
        .map_err(|e| PipelineError::configuration(format!("Invalid pipeline definition: {}", e)))
}

fn load_yaml_file(path: &Path, depth: usize) -> Result<YamlValue> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(PipelineError::configuration(format!(
            "Includes nested deeper than {} levels at {:?} (include cycle?)",
            MAX_INCLUDE_DEPTH, path
        )));
    }

    let content = fs::read_to_string(path).map_err(|e| {
        PipelineError::configuration(format!("Failed to read YAML file {:?}: {}", path, e))
    })?;

    let mut value: YamlValue = serde_yaml::from_str(&content).map_err(|e| {
        PipelineError::configuration(format!("Failed to parse YAML file {:?}: {}", path, e))
    })?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    process_includes(&mut value, base_dir, depth)?;
    if depth == 0 {
        expand_variables(&mut value);
    }

    Ok(value)
}

fn process_includes(value: &mut YamlValue, base_dir: &Path, depth: usize) -> Result<()> {
    match value {
        YamlValue::Mapping(map) => {
            if let Some(YamlValue::String(include_path)) = map.get(INCLUDE_KEY) {
                let included = load_yaml_file(&base_dir.join(include_path), depth + 1)?;
                *value = included;
                return Ok(());
            }

            for (_, v) in map.iter_mut() {
                process_includes(v, base_dir, depth)?;
            }
        }
        YamlValue::Sequence(seq) => {
            for item in seq.iter_mut() {
                process_includes(item, base_dir, depth)?;
            }
        }
        _ => {}
    }

    Ok(())
}

fn expand_variables(value: &mut YamlValue) {
    match value {
        YamlValue::String(s) => {
            if let Some(expanded) = expand_env_in_string(s) {
                *s = expanded;
            }
        }
        YamlValue::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                expand_variables(v);
            }
        }
        YamlValue::Sequence(seq) => {
            for item in seq.iter_mut() {
                expand_variables(item);
            }
        }
        _ => {}
    }
}

fn env_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}").ok())
        .as_ref()
}

/// Expand `${VAR}` / `${VAR:default}`. Unset variables without a default
/// expand to the empty string.
fn expand_env_in_string(s: &str) -> Option<String> {
    if !s.contains("${") {
        return None;
    }

    let expanded = env_pattern()?.replace_all(s, |caps: &regex::Captures<'_>| {
        let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        env::var(&caps[1]).unwrap_or_else(|_| default_value.to_string())
    });

    Some(expanded.into_owned())
}
