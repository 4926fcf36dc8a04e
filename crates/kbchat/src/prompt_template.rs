use serde::Serialize;
use std::fs;
use std::path::Path;
use tera::{Context, Error as TeraError, Tera};

/// The system prompt shipped with the crate
pub const BUNDLED_SYSTEM_PROMPT: &str = include_str!("prompts/system.md");

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    tera.render("inline_template", &context)
}

pub fn load_prompt_file<T: Serialize>(
    template_file: impl AsRef<Path>,
    context_data: &T,
) -> Result<String, TeraError> {
    let template_content = fs::read_to_string(template_file.as_ref())
        .map_err(|e| TeraError::chain("Failed to read template file", e))?;
    load_prompt(&template_content, context_data)
}

/// Render the system prompt from `template_file`, or from the bundled
/// template when none is configured
pub fn load_system_prompt<T: Serialize>(
    template_file: Option<&Path>,
    context_data: &T,
) -> Result<String, TeraError> {
    match template_file {
        Some(path) => load_prompt_file(path, context_data),
        None => load_prompt(BUNDLED_SYSTEM_PROMPT, context_data),
    }
}
