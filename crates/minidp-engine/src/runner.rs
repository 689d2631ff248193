//! Pipeline runner: step selection, manifest stitching, execution order,
//! stats aggregation, and temp-file lifecycle.

use std::path::{Path, PathBuf};

use serde_json::Value;

use minidp_types::{CancelToken, PipelineError, Record, RunStats};

use crate::config::types::{parse_steps_to_run, Recipe};
use crate::config::validator::validate_recipe;
use crate::manifest::ManifestReader;
use crate::processor::ProcessorSpec;
use crate::registry::{self, ProcessorRegistry};

/// Per-run immutable context handed to processors. Created at the start of a
/// run, dropped at the end; processors never mutate it.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    recipe_name: String,
    workspace_dir: PathBuf,
    tmp_dir: PathBuf,
    cancel: CancelToken,
}

impl RunContext {
    /// Build a context outside the runner, e.g. to drive a processor
    /// directly from host code.
    pub fn new(
        run_id: impl Into<String>,
        recipe_name: impl Into<String>,
        workspace_dir: impl Into<PathBuf>,
        tmp_dir: impl Into<PathBuf>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            recipe_name: recipe_name.into(),
            workspace_dir: workspace_dir.into(),
            tmp_dir: tmp_dir.into(),
            cancel,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn recipe_name(&self) -> &str {
        &self.recipe_name
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    /// Emit a run log line, prefixed with the run id in brackets.
    pub fn log(&self, message: impl std::fmt::Display) {
        tracing::info!("[{}] {}", self.run_id, message);
    }
}

/// Stats for one executed step.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub step_id: String,
    pub processor_type: String,
    pub stats: RunStats,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    /// Absolute path of the final output manifest.
    pub output_manifest: PathBuf,
    pub steps: Vec<StepReport>,
}

#[derive(Debug)]
struct PlannedStep {
    absolute_index: usize,
    step_id: String,
    type_name: String,
    params: Value,
    enabled: bool,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
}

/// Executes recipes: selects the step window, stitches manifest paths,
/// builds processors from the registry, and drives them in order.
pub struct PipelineRunner<'a> {
    registry: &'a ProcessorRegistry,
    workspace_override: Option<PathBuf>,
    keep_temps: bool,
}

impl Default for PipelineRunner<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRunner<'static> {
    /// A runner over the process-wide registry.
    pub fn new() -> Self {
        Self {
            registry: registry::global(),
            workspace_override: None,
            keep_temps: false,
        }
    }
}

impl<'a> PipelineRunner<'a> {
    pub fn with_registry(registry: &'a ProcessorRegistry) -> Self {
        Self {
            registry,
            workspace_override: None,
            keep_temps: false,
        }
    }

    /// Override the recipe's workspace directory.
    pub fn workspace(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_override = Some(dir.into());
        self
    }

    /// Keep the run's temp directory after a successful run.
    pub fn keep_temps(mut self, keep: bool) -> Self {
        self.keep_temps = keep;
        self
    }

    /// Run a recipe to completion and return the absolute path of the final
    /// output manifest.
    pub fn run_recipe(&self, recipe: &Recipe) -> Result<PathBuf, PipelineError> {
        self.run_recipe_report(recipe).map(|r| r.output_manifest)
    }

    /// Run a recipe and return per-step stats alongside the output path.
    pub fn run_recipe_report(&self, recipe: &Recipe) -> Result<RunReport, PipelineError> {
        self.run_recipe_with_cancel(recipe, CancelToken::new())
    }

    /// Run a recipe under an externally cancellable token.
    pub fn run_recipe_with_cancel(
        &self,
        recipe: &Recipe,
        cancel: CancelToken,
    ) -> Result<RunReport, PipelineError> {
        validate_recipe(recipe)?;

        let workspace = self
            .workspace_override
            .clone()
            .unwrap_or_else(|| recipe.workspace_dir.clone());
        std::fs::create_dir_all(&workspace).map_err(|e| {
            PipelineError::recipe_validation(
                "workspace_dir",
                format!("cannot create workspace {}: {e}", workspace.display()),
            )
        })?;

        let run_id = new_run_id();
        let tmp_dir = workspace.join(".tmp").join(&run_id);
        let ctx = RunContext {
            run_id: run_id.clone(),
            recipe_name: recipe.display_name().to_string(),
            workspace_dir: workspace,
            tmp_dir: tmp_dir.clone(),
            cancel,
        };

        ctx.log(format!("Starting pipeline '{}'", ctx.recipe_name()));

        let (start, end) = parse_steps_to_run(&recipe.steps_to_run, recipe.steps.len())?;
        let planned = stitch_io(recipe, start, end, &tmp_dir)?;

        let enabled_count = planned.iter().filter(|p| p.enabled).count();
        if enabled_count == 0 {
            ctx.log("No steps selected; nothing to run");
            let output = recipe.input_manifest.as_deref().ok_or_else(|| {
                PipelineError::recipe_validation(
                    "steps_to_run",
                    "selection runs no steps and the recipe has no input_manifest to pass through",
                )
            })?;
            return Ok(RunReport {
                run_id,
                output_manifest: absolutize(output),
                steps: Vec::new(),
            });
        }
        ctx.log(format!("Running {enabled_count} step(s)"));

        // All paths are locked; create the temp dir only when a temp path was
        // actually allocated.
        if planned
            .iter()
            .any(|p| p.output.as_deref().is_some_and(|o| o.starts_with(&tmp_dir)))
        {
            std::fs::create_dir_all(&tmp_dir).map_err(|e| {
                PipelineError::manifest_write(&tmp_dir, format!("cannot create temp dir: {e}"))
            })?;
        }

        let mut reports = Vec::with_capacity(enabled_count);
        let mut final_output = PathBuf::new();
        for step in planned.iter().filter(|p| p.enabled) {
            ctx.cancel().check()?;
            ctx.log(format!(
                "Running step {} '{}' ({})",
                step.absolute_index, step.step_id, step.type_name
            ));

            let output = step
                .output
                .clone()
                .expect("enabled steps always have a resolved output");
            let spec = ProcessorSpec {
                step_id: step.step_id.clone(),
                type_name: step.type_name.clone(),
                params: step.params.clone(),
                input_manifest: step.input.clone(),
                output_manifest: output.clone(),
            };
            let mut processor = self.registry.create(&spec)?;

            let result = processor
                .prepare(&ctx)
                .and_then(|()| processor.process(&ctx));
            match result {
                Ok(stats) => {
                    ctx.log(format!("Step '{}' done: {stats}", step.step_id));
                    if let Err(e) = processor.finalize(&ctx, &stats) {
                        tracing::warn!(step = %step.step_id, "finalize failed: {e}");
                    }
                    reports.push(StepReport {
                        step_id: step.step_id.clone(),
                        processor_type: step.type_name.clone(),
                        stats,
                    });
                }
                Err(e) => {
                    // Best-effort finalize; the primary error wins. Temp
                    // files are retained for diagnosis.
                    if let Err(fin) = processor.finalize(&ctx, &RunStats::default()) {
                        tracing::warn!(step = %step.step_id, "finalize failed: {fin}");
                    }
                    return Err(e);
                }
            }
            final_output = output;
        }

        if !self.keep_temps && tmp_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&tmp_dir) {
                tracing::debug!("could not remove temp dir {}: {e}", tmp_dir.display());
            }
        }

        let output_manifest = absolutize(&final_output);
        ctx.log(format!(
            "Pipeline complete. Output manifest: {}",
            output_manifest.display()
        ));

        Ok(RunReport {
            run_id,
            output_manifest,
            steps: reports,
        })
    }

    /// Run the full recipe, then return the first `n` records of the final
    /// output manifest.
    pub fn preview_recipe(
        &self,
        recipe: &Recipe,
        n: usize,
    ) -> Result<Vec<Record>, PipelineError> {
        let output = self.run_recipe(recipe)?;
        let mut records = Vec::with_capacity(n);
        if n == 0 || !output.exists() {
            return Ok(records);
        }
        for item in ManifestReader::open(&output)? {
            records.push(item?);
            if records.len() >= n {
                break;
            }
        }
        Ok(records)
    }
}

fn new_run_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

fn absolutize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Resolve input/output manifest paths for the selected window.
///
/// Disabled steps are transparent slots: their resolved output equals their
/// resolved input, so the following step chains past them. The recipe-level
/// output manifest attaches to the last enabled step of the window.
fn stitch_io(
    recipe: &Recipe,
    start: usize,
    end: usize,
    tmp_dir: &Path,
) -> Result<Vec<PlannedStep>, PipelineError> {
    let window = &recipe.steps[start..end];
    let last_enabled = window
        .iter()
        .enumerate()
        .filter(|(_, s)| s.enabled)
        .map(|(offset, _)| start + offset)
        .last();

    let mut planned = Vec::with_capacity(window.len());
    let mut prev_output: Option<PathBuf> = recipe.input_manifest.clone();

    for (offset, step) in window.iter().enumerate() {
        let absolute_index = start + offset;
        let step_id = step.step_id(absolute_index);
        let input = step.input_manifest.clone().or_else(|| prev_output.clone());

        let output = if !step.enabled {
            input.clone()
        } else {
            let input = input.clone().ok_or_else(|| {
                PipelineError::recipe_validation(
                    format!("steps[{absolute_index}].input_manifest"),
                    "no input manifest: set one on the step or on the recipe",
                )
            })?;
            let temp_path = || tmp_dir.join(format!("step_{absolute_index}.jsonl"));
            let output = if let Some(explicit) = &step.output_manifest {
                explicit.clone()
            } else if Some(absolute_index) == last_enabled {
                recipe.output_manifest.clone().unwrap_or_else(temp_path)
            } else {
                temp_path()
            };
            if input == output {
                return Err(PipelineError::recipe_validation(
                    format!("steps[{absolute_index}].output_manifest"),
                    "resolved input and output manifests are the same file",
                ));
            }
            Some(output)
        };

        prev_output = output.clone();
        planned.push(PlannedStep {
            absolute_index,
            step_id,
            type_name: step.processor_type.clone(),
            params: step.params.clone(),
            enabled: step.enabled,
            input,
            output,
        });
    }

    Ok(planned)
}
