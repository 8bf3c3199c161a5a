//! Crate Error Type
//!
//! Each subsystem reports its own error enum; [`Error`] wraps them so the
//! loading pipeline and the CLI can propagate everything with `?`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::harness::HarnessError;
use crate::recipe::document::ParseError;
use crate::recipe::selector::SelectorError;
use crate::recipe::spec::SpecError;
use crate::recipe::template::TemplateError;
use crate::recipe::validator::ValidationError;
use crate::recipe::version::VersionError;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read '{}': {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write '{}': {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("rendered recipe does not match the recipe layout: {0}")]
    Schema(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("recipe has {} problem(s):\n{}", .0.len(), join_problems(.0))]
    Invalid(Vec<ValidationError>),

    #[error("unknown platform '{0}' (expected a subdir such as linux-64, osx-64 or win-64)")]
    UnknownPlatform(String),

    #[error("invalid python version '{0}' (expected e.g. 3.6 or 36)")]
    InvalidPython(String),

    #[error(transparent)]
    Harness(#[from] HarnessError),
}

fn join_problems(problems: &[ValidationError]) -> String {
    problems
        .iter()
        .map(|p| format!("  - {}", p))
        .collect::<Vec<_>>()
        .join("\n")
}
