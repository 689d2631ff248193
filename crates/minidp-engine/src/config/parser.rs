//! Recipe JSON parsing with environment variable substitution and
//! path-tagged shape checks.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use minidp_types::PipelineError;

use crate::config::types::Recipe;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

const KNOWN_TOP_LEVEL_FIELDS: &[&str] = &[
    "version",
    "name",
    "workspace_dir",
    "input_manifest",
    "output_manifest",
    "steps_to_run",
    "steps",
];

const KNOWN_STEP_FIELDS: &[&str] = &[
    "id",
    "type",
    "enabled",
    "params",
    "input_manifest",
    "output_manifest",
];

/// Substitute `${VAR_NAME}` patterns with environment variable values.
/// All missing variables are reported together.
pub fn substitute_env_vars(input: &str) -> Result<String, PipelineError> {
    let mut result = input.to_string();
    let mut missing = Vec::new();

    for cap in ENV_VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(val) => {
                result = result.replace(&cap[0], &val);
            }
            Err(_) => missing.push(var_name.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(PipelineError::recipe_validation(
            "<recipe text>",
            format!("missing environment variable(s): {}", missing.join(", ")),
        ));
    }

    Ok(result)
}

fn check_step_shape(step: &Value, index: usize) -> Result<(), PipelineError> {
    let path = |field: &str| format!("steps[{index}].{field}");

    let object = step.as_object().ok_or_else(|| {
        PipelineError::recipe_validation(format!("steps[{index}]"), "step must be an object")
    })?;

    for key in object.keys() {
        if !KNOWN_STEP_FIELDS.contains(&key.as_str()) {
            return Err(PipelineError::recipe_validation(
                path(key),
                "unknown step field",
            ));
        }
    }

    match object.get("type") {
        None => {
            return Err(PipelineError::recipe_validation(
                path("type"),
                "step must have a 'type'",
            ))
        }
        Some(Value::String(s)) if !s.is_empty() => {}
        Some(_) => {
            return Err(PipelineError::recipe_validation(
                path("type"),
                "'type' must be a non-empty string",
            ))
        }
    }

    if let Some(params) = object.get("params") {
        if !params.is_object() {
            return Err(PipelineError::recipe_validation(
                path("params"),
                "'params' must be an object",
            ));
        }
    }
    if let Some(enabled) = object.get("enabled") {
        if !enabled.is_boolean() {
            return Err(PipelineError::recipe_validation(
                path("enabled"),
                "'enabled' must be a boolean",
            ));
        }
    }
    if let Some(id) = object.get("id") {
        if !id.is_string() {
            return Err(PipelineError::recipe_validation(
                path("id"),
                "'id' must be a string",
            ));
        }
    }
    for field in ["input_manifest", "output_manifest"] {
        if let Some(value) = object.get(field) {
            if !value.is_string() {
                return Err(PipelineError::recipe_validation(
                    path(field),
                    format!("'{field}' must be a string path"),
                ));
            }
        }
    }

    Ok(())
}

/// Build a [`Recipe`] from a parsed JSON value.
///
/// Unknown top-level fields are ignored with a warning; unknown step-level
/// fields are rejected. Shape violations carry the JSON path of the
/// offending field.
pub fn recipe_from_value(value: Value) -> Result<Recipe, PipelineError> {
    let object = value.as_object().ok_or_else(|| {
        PipelineError::recipe_validation("<root>", "recipe must be a JSON object")
    })?;

    for key in object.keys() {
        if !KNOWN_TOP_LEVEL_FIELDS.contains(&key.as_str()) {
            tracing::warn!(field = %key, "ignoring unknown top-level recipe field");
        }
    }

    let steps = object
        .get("steps")
        .ok_or_else(|| PipelineError::recipe_validation("steps", "recipe must have 'steps'"))?;
    let steps = steps.as_array().ok_or_else(|| {
        PipelineError::recipe_validation("steps", "'steps' must be a list of steps")
    })?;
    for (index, step) in steps.iter().enumerate() {
        check_step_shape(step, index)?;
    }

    serde_json::from_value(value)
        .map_err(|e| PipelineError::recipe_validation("<recipe>", e.to_string()))
}

/// Parse a recipe from JSON text (after env var substitution).
pub fn parse_recipe_str(text: &str) -> Result<Recipe, PipelineError> {
    let substituted = substitute_env_vars(text)?;
    let value: Value = serde_json::from_str(&substituted)
        .map_err(|e| PipelineError::recipe_validation("<recipe>", format!("invalid JSON: {e}")))?;
    recipe_from_value(value)
}

/// Load a recipe from a JSON file.
pub fn load_recipe(path: impl AsRef<Path>) -> Result<Recipe, PipelineError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::recipe_validation(
            path.display().to_string(),
            format!("failed to read recipe file: {e}"),
        )
    })?;
    parse_recipe_str(&text)
}
