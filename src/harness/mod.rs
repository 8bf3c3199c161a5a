//! Test Harness Module
//!
//! Runs a recipe's test contract against an installed prefix.
//!
//! # Components
//!
//! - [`plan`]: Expands a rendered recipe into ordered checks
//! - [`command`]: Runs one shell command or import check
//! - [`engine`]: Schedules checks across worker threads
//! - [`report`]: Per-check outcomes and the final summary

pub mod command;
pub mod engine;
pub mod plan;
pub mod report;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use engine::Harness;
pub use plan::{Action, Check, CheckKind, Expectation, TestPlan};
pub use report::{CheckResult, Status, TestReport};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("install prefix does not exist: {}", .0.display())]
    MissingPrefix(PathBuf),

    #[error("working directory is not a directory: {}", .0.display())]
    MissingWorkingDir(PathBuf),

    #[error("cannot prepare test environment: {0}")]
    Environment(String),

    #[error("cannot write script for check '{check}': {source}")]
    Script { check: String, source: io::Error },

    #[error("cannot start check '{check}': {source}")]
    Spawn { check: String, source: io::Error },

    #[error("lost contact with worker: {0}")]
    Channel(String),
}
