//! Target Platforms
//!
//! A recipe is always rendered for one target platform (a conda "subdir")
//! and, optionally, one Python interpreter version. Together they form the
//! [`RenderContext`] that selectors are evaluated against.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::Error;

/// A conda target platform, identified by its subdir name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Platform {
    Linux32,
    Linux64,
    LinuxAarch64,
    LinuxPpc64le,
    Osx64,
    OsxArm64,
    Win32,
    Win64,
    Noarch,
}

/// Every platform, in subdir order.
pub const ALL_PLATFORMS: &[Platform] = &[
    Platform::Linux32,
    Platform::Linux64,
    Platform::LinuxAarch64,
    Platform::LinuxPpc64le,
    Platform::Osx64,
    Platform::OsxArm64,
    Platform::Win32,
    Platform::Win64,
    Platform::Noarch,
];

/// Platforms rendered by default when linting.
pub const DEFAULT_LINT_PLATFORMS: &[Platform] =
    &[Platform::Linux64, Platform::Osx64, Platform::Win64];

impl Platform {
    /// Returns the platform this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            if cfg!(target_pointer_width = "32") {
                Platform::Win32
            } else {
                Platform::Win64
            }
        } else if cfg!(target_os = "macos") {
            if cfg!(target_arch = "aarch64") {
                Platform::OsxArm64
            } else {
                Platform::Osx64
            }
        } else if cfg!(target_arch = "aarch64") {
            Platform::LinuxAarch64
        } else if cfg!(target_arch = "powerpc64") {
            Platform::LinuxPpc64le
        } else if cfg!(target_pointer_width = "32") {
            Platform::Linux32
        } else {
            Platform::Linux64
        }
    }

    /// The subdir name, e.g. `linux-64`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Linux32 => "linux-32",
            Platform::Linux64 => "linux-64",
            Platform::LinuxAarch64 => "linux-aarch64",
            Platform::LinuxPpc64le => "linux-ppc64le",
            Platform::Osx64 => "osx-64",
            Platform::OsxArm64 => "osx-arm64",
            Platform::Win32 => "win-32",
            Platform::Win64 => "win-64",
            Platform::Noarch => "noarch",
        }
    }

    pub fn is_linux(&self) -> bool {
        matches!(
            self,
            Platform::Linux32 | Platform::Linux64 | Platform::LinuxAarch64 | Platform::LinuxPpc64le
        )
    }

    pub fn is_osx(&self) -> bool {
        matches!(self, Platform::Osx64 | Platform::OsxArm64)
    }

    /// True for every linux and osx target.
    pub fn is_unix(&self) -> bool {
        self.is_linux() || self.is_osx()
    }

    pub fn is_win(&self) -> bool {
        matches!(self, Platform::Win32 | Platform::Win64)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_PLATFORMS
            .iter()
            .copied()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| Error::UnknownPlatform(s.to_string()))
    }
}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A Python interpreter version as used by `py` selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PythonVersion {
    pub major: u32,
    pub minor: u32,
}

impl PythonVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// The integer bound to `py` in selectors: `27` for 2.7, `310` for 3.10.
    pub fn as_selector_int(&self) -> u32 {
        format!("{}{}", self.major, self.minor)
            .parse()
            .unwrap_or(self.major * 10 + self.minor)
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for PythonVersion {
    type Err = Error;

    /// Accepts `3.6`, `3.6.1` and the compact `36`/`310` form of `CONDA_PY`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidPython(s.to_string());
        let s = s.trim();

        if let Some((major, rest)) = s.split_once('.') {
            let minor = rest.split('.').next().unwrap_or_default();
            let major = major.parse().map_err(|_| invalid())?;
            let minor = minor.parse().map_err(|_| invalid())?;
            return Ok(Self::new(major, minor));
        }

        if s.len() < 2 || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let (major, minor) = s.split_at(1);
        Ok(Self::new(
            major.parse().map_err(|_| invalid())?,
            minor.parse().map_err(|_| invalid())?,
        ))
    }
}

impl Serialize for PythonVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The target a recipe is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RenderContext {
    pub platform: Platform,
    pub python: Option<PythonVersion>,
}

impl RenderContext {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            python: None,
        }
    }

    /// Context for the running machine, without an interpreter.
    pub fn current() -> Self {
        Self::new(Platform::current())
    }

    pub fn with_python(mut self, python: PythonVersion) -> Self {
        self.python = Some(python);
        self
    }

    /// Short label used in log and lint messages, e.g. `linux-64/py36`.
    pub fn label(&self) -> String {
        match self.python {
            Some(py) => format!("{}/py{}", self.platform, py.as_selector_int()),
            None => self.platform.to_string(),
        }
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_round_trips_through_subdir_name() {
        for platform in ALL_PLATFORMS {
            let parsed: Platform = platform.as_str().parse().unwrap();
            assert_eq!(parsed, *platform);
        }
    }

    #[test]
    fn test_platform_unknown_subdir() {
        assert!("solaris-64".parse::<Platform>().is_err());
    }

    #[test]
    fn test_platform_families() {
        assert!(Platform::Linux64.is_unix());
        assert!(Platform::OsxArm64.is_unix());
        assert!(!Platform::Win64.is_unix());
        assert!(Platform::Win32.is_win());
        assert!(!Platform::Noarch.is_unix());
        assert!(!Platform::Noarch.is_win());
    }

    #[test]
    fn test_current_platform_is_concrete() {
        assert_ne!(Platform::current(), Platform::Noarch);
    }

    #[test]
    fn test_python_version_forms() {
        assert_eq!("3.6".parse::<PythonVersion>().unwrap(), PythonVersion::new(3, 6));
        assert_eq!("3.6.1".parse::<PythonVersion>().unwrap(), PythonVersion::new(3, 6));
        assert_eq!("27".parse::<PythonVersion>().unwrap(), PythonVersion::new(2, 7));
        assert_eq!("310".parse::<PythonVersion>().unwrap(), PythonVersion::new(3, 10));
        assert!("3".parse::<PythonVersion>().is_err());
        assert!("three".parse::<PythonVersion>().is_err());
    }

    #[test]
    fn test_python_selector_int() {
        assert_eq!(PythonVersion::new(2, 7).as_selector_int(), 27);
        assert_eq!(PythonVersion::new(3, 4).as_selector_int(), 34);
        assert_eq!(PythonVersion::new(3, 10).as_selector_int(), 310);
    }

    #[test]
    fn test_render_context_label() {
        let ctx = RenderContext::new(Platform::Win64);
        assert_eq!(ctx.label(), "win-64");
        let ctx = ctx.with_python(PythonVersion::new(3, 6));
        assert_eq!(ctx.label(), "win-64/py36");
    }
}
