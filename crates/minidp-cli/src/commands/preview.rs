use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use minidp_engine::config::{load_recipe, validate_recipe};
use minidp_engine::PipelineRunner;

/// Execute the `preview` command: run the recipe, then print the first `n`
/// output records.
pub fn execute(recipe_path: &Path, n: usize, workspace: Option<PathBuf>) -> Result<()> {
    let recipe = load_recipe(recipe_path)
        .with_context(|| format!("Failed to load recipe: {}", recipe_path.display()))?;
    validate_recipe(&recipe)?;

    let mut runner = PipelineRunner::new();
    if let Some(dir) = workspace {
        runner = runner.workspace(dir);
    }

    let records = runner
        .preview_recipe(&recipe, n)
        .with_context(|| format!("Pipeline '{}' failed", recipe.display_name()))?;

    if records.is_empty() {
        println!("No output records.");
        return Ok(());
    }

    println!("First {} record(s):", records.len());
    for (i, record) in records.iter().enumerate() {
        println!("--- Record {} ---", i + 1);
        println!("{}", serde_json::to_string_pretty(record)?);
    }

    Ok(())
}
