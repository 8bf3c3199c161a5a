//! condarecipe - Conda Build Recipe Toolkit
//!
//! Reads conda build recipes (`meta.yaml`), renders them for a target
//! platform and interpreter, checks them, writes them back and runs
//! their test contract against an installed prefix.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`recipe`]: Selectors, templating, the document tree, versions and the rendered model
//! - [`environment`]: Target platforms and install prefixes
//! - [`harness`]: Post-install test runner
//! - [`info`]: Recipe and target summaries
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use condarecipe::environment::{Platform, PythonVersion, RenderContext};
//! use condarecipe::{load_recipe, TemplateContext};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = RenderContext::new(Platform::Linux64).with_python(PythonVersion::new(3, 6));
//!     let template = TemplateContext::from_env().with_var("version", "4.3.21");
//!
//!     let recipe = load_recipe(Path::new("recipes/conda"), &template, &ctx)?;
//!     for dep in &recipe.requirements.run {
//!         println!("{}", dep);
//!     }
//!     Ok(())
//! }
//! ```

pub mod environment;
pub mod error;
pub mod harness;
pub mod info;
pub mod recipe;

// Re-export commonly used types
pub use error::{Error, Result};
pub use harness::{Harness, TestPlan, TestReport};
pub use recipe::{load_document, load_recipe, Document, MatchSpec, Recipe, TemplateContext, Version};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "condarecipe";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "condarecipe");
    }

    #[test]
    fn test_module_exports_match_spec() {
        let spec = MatchSpec::parse("requests >=2.12.4,<=2.14.2").unwrap();
        assert_eq!(spec.name, "requests");
        assert!(spec.matches("requests", &Version::parse("2.13.0").unwrap(), "py36_0"));
    }

    #[test]
    fn test_module_exports_document() {
        let doc = Document::parse("package:\n  name: a\n").unwrap();
        assert_eq!(doc.section_names(), vec!["package"]);
    }
}
