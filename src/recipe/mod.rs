//! Recipe Module
//!
//! Provides data structures and utilities for reading, rendering and
//! writing conda build recipes.
//!
//! # Structure
//!
//! - [`selector`]: Line selector expressions (`# [win]`, `# [py<34]`)
//! - [`template`]: `{{ }}` / `{% set %}` expansion
//! - [`document`]: Selector-preserving document tree
//! - [`writer`]: Document serialization
//! - [`version`] / [`spec`]: Version ordering and dependency specifiers
//! - [`model`]: Typed rendered recipe
//! - [`validator`]: Recipe checks and multi-target lint
//! - [`parser`]: Loading and saving

pub mod document;
pub mod model;
pub mod parser;
pub mod selector;
pub mod spec;
pub mod template;
pub mod validator;
pub mod version;
pub mod writer;

pub use document::{Document, Entry, Item, Node, Scalar, ScalarStyle};
pub use model::{About, Build, DependencyKind, EntryPoint, Package, Recipe, Requirements, Source, TestSpec};
pub use parser::{load_document, load_recipe, parse_str, render_document, render_str, save_document};
pub use selector::Selector;
pub use spec::{MatchSpec, VersionSpec};
pub use template::TemplateContext;
pub use validator::{lint, LintOptions, LintReport};
pub use version::Version;
