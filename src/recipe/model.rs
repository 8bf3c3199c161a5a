//! Recipe Data Model
//!
//! Typed view of a rendered recipe: templates expanded and selectors applied
//! for one target.
//!
//! # Example YAML Format
//!
//! ```yaml
//! package:
//!   name: conda
//!   version: "4.3.21"
//!
//! build:
//!   number: 0
//!   entry_points:
//!     - conda = conda.cli.main:main
//!
//! requirements:
//!   run:
//!     - python
//!     - requests >=2.12.4,<=2.14.2
//!
//! test:
//!   commands:
//!     - conda --version
//! ```

use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::Document;
use super::spec::{MatchSpec, SpecError};
use crate::environment::platform::RenderContext;
use crate::error::Result;

/// A rendered recipe.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Recipe {
    #[serde(default, deserialize_with = "nullable")]
    pub package: Package,

    /// Where the sources come from; a single mapping or a list of them.
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub source: Vec<Source>,

    #[serde(default, deserialize_with = "nullable")]
    pub build: Build,

    #[serde(default, deserialize_with = "nullable")]
    pub requirements: Requirements,

    #[serde(default, deserialize_with = "nullable")]
    pub test: TestSpec,

    #[serde(default, deserialize_with = "nullable")]
    pub about: About,

    /// Menu/launcher metadata, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<Value>,

    /// Free-form metadata, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Package {
    #[serde(default, deserialize_with = "string_like")]
    pub name: String,

    /// Kept as written; checked against the version grammar by the validator.
    #[serde(default, deserialize_with = "string_like")]
    pub version: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,

    #[serde(default, deserialize_with = "opt_string_like", skip_serializing_if = "Option::is_none")]
    pub git_rev: Option<String>,

    #[serde(default, deserialize_with = "opt_string_like", skip_serializing_if = "Option::is_none")]
    pub git_tag: Option<String>,
}

impl Source {
    /// Short description used in listings.
    pub fn describe(&self) -> String {
        if let Some(url) = &self.url {
            format!("url {}", url)
        } else if let Some(git) = &self.git_url {
            match self.git_rev.as_ref().or(self.git_tag.as_ref()) {
                Some(rev) => format!("git {} @ {}", git, rev),
                None => format!("git {}", git),
            }
        } else if let Some(path) = &self.path {
            format!("path {}", path)
        } else {
            "(empty)".to_string()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Build {
    #[serde(default)]
    pub number: u64,

    /// Explicit build string; derived from the number when absent.
    #[serde(default, deserialize_with = "opt_string_like", skip_serializing_if = "Option::is_none")]
    pub string: Option<String>,

    #[serde(default, deserialize_with = "opt_string_like", skip_serializing_if = "Option::is_none")]
    pub noarch: Option<String>,

    #[serde(default, deserialize_with = "single_or_vec", skip_serializing_if = "Vec::is_empty")]
    pub script: Vec<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub skip: bool,

    /// Prefix-relative files that must ship even when unchanged.
    #[serde(default, deserialize_with = "single_or_vec", skip_serializing_if = "Vec::is_empty")]
    pub always_include_files: Vec<String>,

    /// `command = module.path:function` lines.
    #[serde(default, deserialize_with = "single_or_vec", skip_serializing_if = "Vec::is_empty")]
    pub entry_points: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Requirements {
    #[serde(default, deserialize_with = "single_or_vec", skip_serializing_if = "Vec::is_empty")]
    pub build: Vec<String>,

    #[serde(default, deserialize_with = "single_or_vec", skip_serializing_if = "Vec::is_empty")]
    pub host: Vec<String>,

    #[serde(default, deserialize_with = "single_or_vec", skip_serializing_if = "Vec::is_empty")]
    pub run: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TestSpec {
    /// Extra packages needed only to run the tests.
    #[serde(default, deserialize_with = "single_or_vec", skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,

    #[serde(default, deserialize_with = "single_or_vec", skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,

    #[serde(default, deserialize_with = "single_or_vec", skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,

    #[serde(default, deserialize_with = "single_or_vec", skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,

    #[serde(default, deserialize_with = "single_or_vec", skip_serializing_if = "Vec::is_empty")]
    pub source_files: Vec<String>,
}

impl TestSpec {
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.commands.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct About {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_family: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_url: Option<String>,
}

/// Which requirement list to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Build,
    Host,
    Run,
    /// `test.requires`
    Test,
}

impl DependencyKind {
    pub const ALL: [DependencyKind; 4] = [
        DependencyKind::Build,
        DependencyKind::Host,
        DependencyKind::Run,
        DependencyKind::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Build => "requirements.build",
            DependencyKind::Host => "requirements.host",
            DependencyKind::Run => "requirements.run",
            DependencyKind::Test => "test.requires",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A console script declared as `command = module.path:function`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub command: String,
    pub module: String,
    pub function: String,
}

impl EntryPoint {
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let (command, target) = text
            .split_once('=')
            .ok_or_else(|| format!("entry point '{}' is missing '='", text))?;
        let (module, function) = target
            .split_once(':')
            .ok_or_else(|| format!("entry point '{}' is missing ':function'", text))?;

        let (command, module, function) = (command.trim(), module.trim(), function.trim());

        if command.is_empty() || command.contains(char::is_whitespace) {
            return Err(format!("entry point '{}' has an invalid command name", text));
        }
        let is_identifier = |s: &str| {
            !s.is_empty()
                && !s.starts_with(|c: char| c.is_ascii_digit())
                && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        };
        if !module.split('.').all(is_identifier) {
            return Err(format!("entry point '{}' has an invalid module path", text));
        }
        if !function.split('.').all(is_identifier) {
            return Err(format!("entry point '{}' has an invalid function name", text));
        }

        Ok(Self {
            command: command.to_string(),
            module: module.to_string(),
            function: function.to_string(),
        })
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}:{}", self.command, self.module, self.function)
    }
}

impl Recipe {
    /// Deserializes a selected document.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let value = doc.to_yaml()?;
        Ok(serde_yaml::from_value(value)?)
    }

    /// Raw specifier strings of one requirement list.
    pub fn requirement_strings(&self, kind: DependencyKind) -> &[String] {
        match kind {
            DependencyKind::Build => &self.requirements.build,
            DependencyKind::Host => &self.requirements.host,
            DependencyKind::Run => &self.requirements.run,
            DependencyKind::Test => &self.test.requires,
        }
    }

    /// Parses one requirement list into match specs.
    pub fn dependencies(&self, kind: DependencyKind) -> std::result::Result<Vec<MatchSpec>, SpecError> {
        self.requirement_strings(kind)
            .iter()
            .map(|s| MatchSpec::parse(s))
            .collect()
    }

    pub fn entry_points(&self) -> std::result::Result<Vec<EntryPoint>, String> {
        self.build.entry_points.iter().map(|e| EntryPoint::parse(e)).collect()
    }

    /// True if `python` is a run requirement.
    pub fn uses_python(&self) -> bool {
        self.requirements
            .run
            .iter()
            .any(|r| r.split([' ', '<', '>', '=', '!', '~']).next() == Some("python"))
    }

    /// The explicit build string, or `<number>` / `py<NN>_<number>`.
    pub fn build_string(&self, ctx: &RenderContext) -> String {
        if let Some(string) = &self.build.string {
            return string.clone();
        }
        match ctx.python {
            Some(python) if self.uses_python() && self.build.noarch.is_none() => {
                format!("py{}_{}", python.as_selector_int(), self.build.number)
            }
            _ => self.build.number.to_string(),
        }
    }

    /// `name-version-build`, the package file stem.
    pub fn dist_name(&self, ctx: &RenderContext) -> String {
        format!(
            "{}-{}-{}",
            self.package.name,
            self.package.version,
            self.build_string(ctx)
        )
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Treats an explicit `null` like a missing section.
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Accepts strings and bare numbers (`version: 1`).
fn string_like<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(opt_string_like(deserializer)?.unwrap_or_default())
}

fn opt_string_like<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        other => scalar_to_string(other)
            .map(Some)
            .ok_or_else(|| de::Error::custom("expected a string")),
    }
}

/// Deserializes either a single string or a list of strings into Vec<String>.
fn single_or_vec<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::Null => Err(de::Error::custom("empty entry in list")),
                other => scalar_to_string(other)
                    .ok_or_else(|| de::Error::custom("expected a string in list")),
            })
            .collect(),
        other => scalar_to_string(other)
            .map(|s| vec![s])
            .ok_or_else(|| de::Error::custom("expected a string or a list of strings")),
    }
}

/// Deserializes a single mapping or a list of mappings.
fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Vec::new()),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(de::Error::custom))
            .collect(),
        other => serde_json::from_value(other)
            .map(|single| vec![single])
            .map_err(de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::platform::{Platform, PythonVersion};

    fn recipe(yaml: &str) -> Recipe {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_minimal_recipe() {
        let r = recipe("package:\n  name: conda\n  version: \"4.3.21\"\n");
        assert_eq!(r.package.name, "conda");
        assert_eq!(r.package.version, "4.3.21");
        assert_eq!(r.build.number, 0);
        assert!(r.source.is_empty());
        assert!(r.test.is_empty());
    }

    #[test]
    fn test_null_sections_default() {
        let r = recipe("package:\n  name: a\n  version: 1\nbuild:\ntest:\nabout:\n");
        assert_eq!(r.package.version, "1");
        assert_eq!(r.build, Build::default());
        assert_eq!(r.about, About::default());
    }

    #[test]
    fn test_source_single_or_list() {
        let single = recipe("source:\n  path: ../../\n");
        assert_eq!(single.source.len(), 1);
        assert_eq!(single.source[0].path.as_deref(), Some("../../"));
        assert_eq!(single.source[0].describe(), "path ../../");

        let many = recipe("source:\n  - url: https://example.com/a.tgz\n    sha256: ab\n  - git_url: https://example.com/r.git\n    git_rev: 1.0\n");
        assert_eq!(many.source.len(), 2);
        assert_eq!(many.source[1].git_rev.as_deref(), Some("1.0"));
        assert_eq!(many.source[1].describe(), "git https://example.com/r.git @ 1.0");
    }

    #[test]
    fn test_single_string_lists() {
        let r = recipe("requirements:\n  run: python\ntest:\n  imports: conda\n  commands: []\n");
        assert_eq!(r.requirements.run, vec!["python"]);
        assert_eq!(r.test.imports, vec!["conda"]);
        assert!(r.test.commands.is_empty());
    }

    #[test]
    fn test_list_with_empty_entry_is_rejected() {
        let result: std::result::Result<Recipe, _> = serde_yaml::from_str("requirements:\n  run:\n    - python\n    -\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_entry_point_parse() {
        let ep = EntryPoint::parse("conda = conda.cli.main:main").unwrap();
        assert_eq!(ep.command, "conda");
        assert_eq!(ep.module, "conda.cli.main");
        assert_eq!(ep.function, "main");
        assert_eq!(ep.to_string(), "conda = conda.cli.main:main");

        assert!(EntryPoint::parse("conda conda.cli.main:main").is_err());
        assert!(EntryPoint::parse("conda = conda.cli.main").is_err());
        assert!(EntryPoint::parse("conda = conda..main:main").is_err());
        assert!(EntryPoint::parse("my tool = a:b").is_err());
        assert!(EntryPoint::parse(" = a:b").is_err());
    }

    #[test]
    fn test_dependencies() {
        let r = recipe("requirements:\n  run:\n    - python\n    - requests >=2.12.4,<=2.14.2\ntest:\n  requires:\n    - pytest\n");
        let run = r.dependencies(DependencyKind::Run).unwrap();
        assert_eq!(run.len(), 2);
        assert_eq!(run[1].name, "requests");
        assert_eq!(r.dependencies(DependencyKind::Test).unwrap()[0].name, "pytest");
        assert!(r.dependencies(DependencyKind::Host).unwrap().is_empty());
    }

    #[test]
    fn test_dist_name() {
        let r = recipe("package:\n  name: conda\n  version: 4.3.21\nbuild:\n  number: 2\nrequirements:\n  run:\n    - python >=2.7\n");
        let ctx = RenderContext::new(Platform::Linux64).with_python(PythonVersion::new(3, 6));
        assert_eq!(r.dist_name(&ctx), "conda-4.3.21-py36_2");
        assert_eq!(r.dist_name(&RenderContext::new(Platform::Linux64)), "conda-4.3.21-2");

        let r = recipe("package:\n  name: tool\n  version: 1.0\nbuild:\n  string: custom_0\n");
        assert_eq!(r.dist_name(&ctx), "tool-1.0-custom_0");
    }

    #[test]
    fn test_from_document_types_plain_scalars() {
        let doc = Document::parse("package:\n  name: a\n  version: 1.10\nbuild:\n  number: 3\n  skip: true\n").unwrap();
        let r = Recipe::from_document(&doc).unwrap();
        assert_eq!(r.package.version, "1.10");
        assert_eq!(r.build.number, 3);
        assert!(r.build.skip);
    }

    #[test]
    fn test_serialize_skips_empty() {
        let r = recipe("package:\n  name: a\n  version: \"1\"\n");
        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("source").is_none());
        assert!(json["build"].get("script").is_none());
        assert_eq!(json["package"]["name"], "a");
    }
}
