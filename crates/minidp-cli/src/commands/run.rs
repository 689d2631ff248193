use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use minidp_engine::config::{load_recipe, validate_recipe};
use minidp_engine::PipelineRunner;

/// Execute the `run` command: load, validate, and run a recipe.
pub fn execute(recipe_path: &Path, workspace: Option<PathBuf>, keep_temps: bool) -> Result<()> {
    let recipe = load_recipe(recipe_path)
        .with_context(|| format!("Failed to load recipe: {}", recipe_path.display()))?;
    validate_recipe(&recipe)?;

    tracing::info!(
        recipe = recipe.display_name(),
        steps = recipe.steps.len(),
        "Recipe validated"
    );

    let mut runner = PipelineRunner::new().keep_temps(keep_temps);
    if let Some(dir) = workspace {
        runner = runner.workspace(dir);
    }

    let report = runner
        .run_recipe_report(&recipe)
        .with_context(|| format!("Pipeline '{}' failed", recipe.display_name()))?;

    for step in &report.steps {
        println!(
            "  {} ({}): {}",
            step.step_id, step.processor_type, step.stats
        );
    }
    println!("Output: {}", report.output_manifest.display());

    Ok(())
}
