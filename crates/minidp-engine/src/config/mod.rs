//! Recipe model, parsing, and validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{load_recipe, recipe_from_value};
pub use types::{parse_steps_to_run, Recipe, RecipeStep, RECIPE_VERSION};
pub use validator::validate_recipe;
