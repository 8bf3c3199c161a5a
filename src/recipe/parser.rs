//! Recipe Loading
//!
//! Handles loading recipes from disk and turning them into rendered,
//! validated [`Recipe`]s:
//!
//! 1. Read the file (a `meta.yaml` path or the directory holding it)
//! 2. Expand templates
//! 3. Parse into a selector-preserving [`Document`]
//! 4. Select for one target and deserialize
//! 5. Validate

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::document::Document;
use super::model::Recipe;
use super::template::{self, TemplateContext};
use super::validator::{check_document, validate_recipe};
use super::writer::write_document;
use crate::environment::platform::RenderContext;
use crate::error::{Error, Result};

/// File names tried when a recipe directory is given.
const RECIPE_FILES: &[&str] = &["meta.yaml", "meta.yml"];

/// Resolves a recipe argument to the recipe file.
pub fn resolve_recipe_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        RECIPE_FILES
            .iter()
            .map(|name| path.join(name))
            .find(|candidate| candidate.is_file())
            .unwrap_or_else(|| path.join(RECIPE_FILES[0]))
    } else {
        path.to_path_buf()
    }
}

/// Reads the recipe text and returns it with the resolved file path.
pub fn read_recipe(path: &Path) -> Result<(PathBuf, String)> {
    let file = resolve_recipe_path(path);
    info!("Loading recipe from: {}", file.display());

    let text = fs::read_to_string(&file).map_err(|source| Error::Read {
        path: file.clone(),
        source,
    })?;

    debug!("Recipe content loaded ({} bytes)", text.len());
    Ok((file, text))
}

/// Templates and parses in-memory recipe text.
pub fn parse_str(text: &str, template: &TemplateContext) -> Result<Document> {
    let rendered = template::render(text, template)?;
    let doc = Document::parse(&rendered)?;
    debug!("Recipe sections: {:?}", doc.section_names());
    Ok(doc)
}

/// Templates, parses, selects and validates in-memory recipe text.
pub fn render_str(text: &str, template: &TemplateContext, ctx: &RenderContext) -> Result<Recipe> {
    let doc = parse_str(text, template)?;
    render_document(&doc, ctx)
}

/// Loads a recipe file into a document without selecting a target.
///
/// `RECIPE_DIR` is added to the template environment unless already set.
pub fn load_document(path: &Path, template: &TemplateContext) -> Result<Document> {
    let (file, text) = read_recipe(path)?;

    let mut template = template.clone();
    if let Some(dir) = file.parent() {
        if !template_has_env(&template, "RECIPE_DIR") {
            template.set_environ("RECIPE_DIR", dir.display().to_string());
        }
    }

    parse_str(&text, &template)
}

/// Loads, renders and validates a recipe for one target.
pub fn load_recipe(path: &Path, template: &TemplateContext, ctx: &RenderContext) -> Result<Recipe> {
    let doc = load_document(path, template)?;
    render_document(&doc, ctx)
}

/// Selects `doc` for `ctx`, deserializes it and validates the result.
/// Warnings are logged; errors are returned together.
pub fn render_document(doc: &Document, ctx: &RenderContext) -> Result<Recipe> {
    let mut findings = check_document(doc);

    let recipe = Recipe::from_document(&doc.select(ctx))?;
    let rendered = validate_recipe(&recipe);
    findings.errors.extend(rendered.errors);
    findings.warnings.extend(rendered.warnings);

    for warning in &findings.warnings {
        warn!("{}", warning);
    }
    if !findings.is_ok() {
        return Err(Error::Invalid(findings.errors));
    }

    info!(
        "Rendered {} {} for {}",
        recipe.package.name,
        recipe.package.version,
        ctx.label()
    );
    Ok(recipe)
}

/// Writes a document back to recipe text.
pub fn save_document(doc: &Document, path: &Path) -> Result<()> {
    fs::write(path, write_document(doc)).map_err(|source| Error::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Recipe saved to: {}", path.display());
    Ok(())
}

fn template_has_env(template: &TemplateContext, name: &str) -> bool {
    template.environ(name).is_some()
}
