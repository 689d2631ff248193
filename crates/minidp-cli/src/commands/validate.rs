use std::path::Path;

use anyhow::{Context, Result};

use minidp_engine::config::{load_recipe, validate_recipe};

/// Execute the `validate` command.
pub fn execute(recipe_path: &Path) -> Result<()> {
    let recipe = load_recipe(recipe_path)
        .with_context(|| format!("Failed to load recipe: {}", recipe_path.display()))?;
    validate_recipe(&recipe)?;

    println!("Recipe '{}' is valid.", recipe_path.display());
    println!("  Name: {}", recipe.display_name());
    println!("  Steps: {}", recipe.steps.len());

    Ok(())
}
