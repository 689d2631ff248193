//! Semantic validation for parsed recipes.

use std::collections::HashSet;

use minidp_types::PipelineError;

use crate::config::types::{parse_steps_to_run, Recipe, RECIPE_VERSION};

/// Validate a parsed recipe: steps present, unique ids, step selection in
/// bounds. An unexpected `version` warns but does not fail.
pub fn validate_recipe(recipe: &Recipe) -> Result<(), PipelineError> {
    if recipe.version != RECIPE_VERSION {
        tracing::warn!(
            version = %recipe.version,
            expected = RECIPE_VERSION,
            "unexpected recipe version"
        );
    }

    if recipe.steps.is_empty() {
        return Err(PipelineError::recipe_validation(
            "steps",
            "recipe must have at least one step",
        ));
    }

    let mut seen_ids = HashSet::new();
    for (index, step) in recipe.steps.iter().enumerate() {
        if let Some(id) = &step.id {
            if !seen_ids.insert(id.clone()) {
                return Err(PipelineError::recipe_validation(
                    format!("steps[{index}].id"),
                    format!("duplicate step id '{id}'"),
                ));
            }
        }
        if let (Some(input), Some(output)) = (&step.input_manifest, &step.output_manifest) {
            if input == output {
                return Err(PipelineError::recipe_validation(
                    format!("steps[{index}].output_manifest"),
                    "input_manifest and output_manifest must differ",
                ));
            }
        }
    }

    parse_steps_to_run(&recipe.steps_to_run, recipe.steps.len())?;

    Ok(())
}
