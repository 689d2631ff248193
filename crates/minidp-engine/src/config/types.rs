//! Parsed recipe and step descriptors.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use minidp_types::PipelineError;

/// Recipe schema version this engine writes and expects.
pub const RECIPE_VERSION: &str = "0.1";

/// Slice-style step selection (`"2:"`, `"1:4"`, `":3"`).
static SLICE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d*):(\d*)$").expect("valid slice regex"));

static INT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("valid integer regex"));

fn default_version() -> String {
    RECIPE_VERSION.to_string()
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from("./runs")
}

fn default_steps_to_run() -> String {
    "all".to_string()
}

fn default_true() -> bool {
    true
}

fn default_params() -> Value {
    Value::Object(serde_json::Map::new())
}

/// A declarative pipeline description. Constructed at recipe load and
/// immutable afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct Recipe {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,
    #[serde(default)]
    pub input_manifest: Option<PathBuf>,
    #[serde(default)]
    pub output_manifest: Option<PathBuf>,
    #[serde(
        default = "default_steps_to_run",
        deserialize_with = "deserialize_steps_to_run"
    )]
    pub steps_to_run: String,
    pub steps: Vec<RecipeStep>,
}

impl Recipe {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

/// One step of a recipe: the processor `type` plus its params and optional
/// manifest path overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecipeStep {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub processor_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_params")]
    pub params: Value,
    #[serde(default)]
    pub input_manifest: Option<PathBuf>,
    #[serde(default)]
    pub output_manifest: Option<PathBuf>,
}

impl RecipeStep {
    /// The step's id, defaulting to `step_{index}`.
    pub fn step_id(&self, index: usize) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("step_{index}"))
    }
}

/// `steps_to_run` accepts either a string or a bare integer `n` (meaning
/// `n:n+1`); both normalize to the string form.
fn deserialize_steps_to_run<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) if n.is_u64() => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected \"all\", a slice string, or a non-negative integer, got {other}"
        ))),
    }
}

/// Parse a step selection into a `(start, end)` window over `num_steps`.
///
/// Accepts the literal `"all"`, an integer `"n"` (window `n:n+1`), or a
/// slice `"a:b"` / `"a:"` / `":b"` with `0 <= a <= b <= num_steps`.
pub fn parse_steps_to_run(value: &str, num_steps: usize) -> Result<(usize, usize), PipelineError> {
    let invalid = |message: String| PipelineError::recipe_validation("steps_to_run", message);

    if value == "all" {
        return Ok((0, num_steps));
    }

    if INT_PATTERN.is_match(value) {
        let n: usize = value
            .parse()
            .map_err(|_| invalid(format!("step index '{value}' is out of range")))?;
        if n >= num_steps {
            return Err(invalid(format!(
                "step index {n} is out of range for {num_steps} step(s)"
            )));
        }
        return Ok((n, n + 1));
    }

    let captures = SLICE_PATTERN.captures(value).ok_or_else(|| {
        invalid(format!(
            "'{value}' must be 'all', an integer, or a slice like '2:', '1:4', ':3'"
        ))
    })?;

    let start = match captures.get(1).map(|m| m.as_str()) {
        Some("") | None => 0,
        Some(text) => text
            .parse()
            .map_err(|_| invalid(format!("slice bound '{text}' is out of range")))?,
    };
    let end = match captures.get(2).map(|m| m.as_str()) {
        Some("") | None => num_steps,
        Some(text) => text
            .parse()
            .map_err(|_| invalid(format!("slice bound '{text}' is out of range")))?,
    };

    if start > end || end > num_steps {
        return Err(invalid(format!(
            "slice '{value}' out of bounds for {num_steps} step(s): \
             need 0 <= start <= end <= {num_steps}"
        )));
    }

    Ok((start, end))
}
