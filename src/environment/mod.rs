//! Environment Module
//!
//! Describes where a recipe is rendered for and where it is tested:
//! target platforms with the interpreter version, and install prefixes.

pub mod platform;
pub mod prefix;

pub use platform::{Platform, PythonVersion, RenderContext, ALL_PLATFORMS, DEFAULT_LINT_PLATFORMS};
pub use prefix::{PackageRecord, Prefix};
