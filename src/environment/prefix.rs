//! Install Prefixes
//!
//! An install prefix is the root of a conda environment. Tests run against
//! one: its executables go first on `PATH` and its `conda-meta/` records say
//! which packages are installed.
//!
//! # Layout
//!
//! - unix: `bin/`, `conda-meta/<name>-<version>-<build>.json`
//! - windows: the root itself, `Scripts/` and `Library/bin/`

use std::env::{self, JoinPathsError};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::platform::Platform;
use crate::error::{Error, Result};
use crate::recipe::spec::MatchSpec;
use crate::recipe::version::Version;

/// One `conda-meta/*.json` record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub build_number: u64,
}

impl PackageRecord {
    /// True if this record satisfies `spec`. Records with unparsable
    /// versions never match a versioned spec.
    pub fn satisfies(&self, spec: &MatchSpec) -> bool {
        match Version::parse(&self.version) {
            Ok(version) => spec.matches(&self.name, &version, &self.build),
            Err(_) => spec.version.is_none() && spec.matches(&self.name, &Version::zero(), &self.build),
        }
    }
}

/// A conda environment root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    root: PathBuf,
}

impl Prefix {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The prefix of the active environment (`CONDA_PREFIX`), if any.
    pub fn from_env() -> Option<Self> {
        env::var_os("CONDA_PREFIX")
            .filter(|v| !v.is_empty())
            .map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Directories holding executables, in lookup order.
    pub fn bin_dirs(&self, platform: Platform) -> Vec<PathBuf> {
        if platform.is_win() {
            vec![
                self.root.clone(),
                self.root.join("Scripts"),
                self.root.join("Library").join("bin"),
            ]
        } else {
            vec![self.root.join("bin")]
        }
    }

    /// `PATH` with the prefix bin dirs in front of the current value.
    pub fn path_with_prefix(&self, platform: Platform) -> std::result::Result<OsString, JoinPathsError> {
        let current = env::var_os("PATH").unwrap_or_default();
        let dirs = self
            .bin_dirs(platform)
            .into_iter()
            .chain(env::split_paths(&current));
        env::join_paths(dirs)
    }

    /// The prefix interpreter.
    pub fn python_executable(&self, platform: Platform) -> PathBuf {
        if platform.is_win() {
            self.root.join("python.exe")
        } else {
            self.root.join("bin").join("python")
        }
    }

    pub fn conda_meta(&self) -> PathBuf {
        self.root.join("conda-meta")
    }

    pub fn has_conda_meta(&self) -> bool {
        self.conda_meta().is_dir()
    }

    /// Reads every installed package record. A prefix without a
    /// `conda-meta` directory has no records.
    pub fn installed_packages(&self) -> Result<Vec<PackageRecord>> {
        let meta_dir = self.conda_meta();
        if !meta_dir.is_dir() {
            debug!("No conda-meta directory in {}", self.root.display());
            return Ok(Vec::new());
        }

        let read_error = |source| Error::Read {
            path: meta_dir.clone(),
            source,
        };

        let mut files: Vec<PathBuf> = fs::read_dir(&meta_dir)
            .map_err(read_error)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        let mut records = Vec::with_capacity(files.len());
        for file in files {
            let content = fs::read_to_string(&file).map_err(|source| Error::Read {
                path: file.clone(),
                source,
            })?;
            match serde_json::from_str::<PackageRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable record {}: {}", file.display(), e),
            }
        }

        info!(
            "Found {} installed packages in {}",
            records.len(),
            self.root.display()
        );
        Ok(records)
    }

    /// Finds the installed record satisfying `spec`.
    pub fn find_installed<'a>(records: &'a [PackageRecord], spec: &MatchSpec) -> Option<&'a PackageRecord> {
        records.iter().find(|record| record.satisfies(spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_record(dir: &Path, name: &str, version: &str, build: &str) {
        let meta = dir.join("conda-meta");
        fs::create_dir_all(&meta).unwrap();
        let record = serde_json::json!({
            "name": name,
            "version": version,
            "build": build,
            "build_number": 0,
            "depends": [],
        });
        fs::write(
            meta.join(format!("{}-{}-{}.json", name, version, build)),
            record.to_string(),
        )
        .unwrap();
    }

    #[test]
    fn test_bin_dirs() {
        let prefix = Prefix::new("/opt/env");
        assert_eq!(prefix.bin_dirs(Platform::Linux64), vec![PathBuf::from("/opt/env/bin")]);

        let win = prefix.bin_dirs(Platform::Win64);
        assert_eq!(win.len(), 3);
        assert_eq!(win[0], PathBuf::from("/opt/env"));
        assert!(win[2].ends_with("Library/bin"));
    }

    #[test]
    fn test_python_executable() {
        let prefix = Prefix::new("/opt/env");
        assert_eq!(
            prefix.python_executable(Platform::Osx64),
            PathBuf::from("/opt/env/bin/python")
        );
        assert!(prefix.python_executable(Platform::Win64).ends_with("python.exe"));
    }

    #[test]
    fn test_path_with_prefix_puts_prefix_first() {
        let prefix = Prefix::new("/opt/env");
        let path = prefix.path_with_prefix(Platform::Linux64).unwrap();
        let first = env::split_paths(&path).next().unwrap();
        assert_eq!(first, PathBuf::from("/opt/env/bin"));
    }

    #[test]
    fn test_installed_packages() {
        let temp_dir = tempdir().unwrap();
        write_record(temp_dir.path(), "python", "3.6.1", "0");
        write_record(temp_dir.path(), "requests", "2.13.0", "py36_0");
        fs::write(temp_dir.path().join("conda-meta").join("history"), "").unwrap();
        fs::write(temp_dir.path().join("conda-meta").join("broken.json"), "{").unwrap();

        let prefix = Prefix::new(temp_dir.path());
        let records = prefix.installed_packages().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "python");

        let spec = MatchSpec::parse("requests >=2.12.4,<=2.14.2").unwrap();
        assert_eq!(Prefix::find_installed(&records, &spec).unwrap().version, "2.13.0");

        let spec = MatchSpec::parse("python 2.7").unwrap();
        assert!(Prefix::find_installed(&records, &spec).is_none());
    }

    #[test]
    fn test_missing_conda_meta_is_empty() {
        let temp_dir = tempdir().unwrap();
        let prefix = Prefix::new(temp_dir.path());
        assert!(prefix.exists());
        assert!(!prefix.has_conda_meta());
        assert!(prefix.installed_packages().unwrap().is_empty());
    }

    #[test]
    fn test_record_with_odd_version() {
        let record = PackageRecord {
            name: "tool".to_string(),
            version: "2017-01-01 nightly".to_string(),
            build: "0".to_string(),
            build_number: 0,
        };
        assert!(record.satisfies(&MatchSpec::parse("tool").unwrap()));
        assert!(!record.satisfies(&MatchSpec::parse("tool >=1").unwrap()));
    }
}
