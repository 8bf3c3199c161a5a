//! Test Plan
//!
//! Expands a rendered recipe into the ordered list of checks the harness
//! runs: shipped files, installed requirements, imports, then commands.

use std::fmt;
use std::path::PathBuf;

use log::debug;
use serde::Serialize;

use crate::environment::prefix::Prefix;
use crate::error::Result;
use crate::recipe::model::{DependencyKind, Recipe};
use crate::recipe::spec::MatchSpec;

/// Check families, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Files,
    Requirements,
    Imports,
    Commands,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Files => "files",
            CheckKind::Requirements => "requirements",
            CheckKind::Imports => "imports",
            CheckKind::Commands => "commands",
        }
    }

    /// Whether checks of this kind start a child process.
    pub fn spawns_process(&self) -> bool {
        matches!(self, CheckKind::Imports | CheckKind::Commands)
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a shell command must produce besides a zero exit status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Expectation {
    ExitZero,
    /// Output must name this version.
    VersionOutput(String),
    NonEmptyOutput,
}

impl Expectation {
    /// `tool --version` must report `version`; `tool info` must print
    /// something. Anything else only has to exit 0.
    pub fn for_command(command: &str, version: &str) -> Self {
        let words: Vec<&str> = command.split_whitespace().collect();
        if words.last() == Some(&"--version") {
            Expectation::VersionOutput(version.to_string())
        } else if words.get(1) == Some(&"info") {
            Expectation::NonEmptyOutput
        } else {
            Expectation::ExitZero
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    FileExists(PathBuf),
    Requirement(MatchSpec),
    Import(String),
    Shell {
        command: String,
        expectation: Expectation,
    },
}

/// One unit of the test contract.
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub id: usize,
    pub kind: CheckKind,
    pub name: String,
    pub action: Action,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestPlan {
    pub package: String,
    pub version: String,
    pub checks: Vec<Check>,
}

impl TestPlan {
    /// Builds the plan. File and requirement checks need an install
    /// prefix and are left out without one.
    pub fn from_recipe(recipe: &Recipe, prefix: Option<&Prefix>) -> Result<Self> {
        let mut plan = Self {
            package: recipe.package.name.clone(),
            version: recipe.package.version.clone(),
            checks: Vec::new(),
        };

        if let Some(prefix) = prefix {
            for file in &recipe.build.always_include_files {
                plan.push(
                    CheckKind::Files,
                    file.clone(),
                    Action::FileExists(prefix.root().join(file)),
                );
            }

            for kind in [DependencyKind::Run, DependencyKind::Test] {
                for spec in recipe.dependencies(kind)? {
                    plan.push(CheckKind::Requirements, spec.to_string(), Action::Requirement(spec));
                }
            }
        }

        for module in &recipe.test.imports {
            plan.push(
                CheckKind::Imports,
                format!("import {}", module),
                Action::Import(module.clone()),
            );
        }

        for command in &recipe.test.commands {
            let expectation = Expectation::for_command(command, &recipe.package.version);
            plan.push(
                CheckKind::Commands,
                command.clone(),
                Action::Shell {
                    command: command.clone(),
                    expectation,
                },
            );
        }

        debug!("Test plan for {}: {} checks", plan.package, plan.checks.len());
        Ok(plan)
    }

    fn push(&mut self, kind: CheckKind, name: String, action: Action) {
        let id = self.checks.len();
        self.checks.push(Check {
            id,
            kind,
            name,
            action,
        });
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Number of checks of one kind.
    pub fn count(&self, kind: CheckKind) -> usize {
        self.checks.iter().filter(|c| c.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::platform::{Platform, PythonVersion, RenderContext};
    use crate::recipe::parser::render_str;
    use crate::recipe::template::TemplateContext;

    const RECIPE: &str = r#"package:
  name: conda
  version: "4.3.21"
build:
  always_include_files:
    - bin/conda  # [unix]
    - Scripts/conda.exe  # [win]
requirements:
  run:
    - python
    - requests >=2.12.4,<=2.14.2
test:
  requires:
    - pytest
  imports:
    - conda
  commands:
    - conda --version
    - conda info
    - conda-env --help  # [unix]
"#;

    fn recipe(platform: Platform) -> Recipe {
        let ctx = RenderContext::new(platform).with_python(PythonVersion::new(3, 6));
        render_str(RECIPE, &TemplateContext::new(), &ctx).unwrap()
    }

    #[test]
    fn test_expectation_for_command() {
        assert_eq!(
            Expectation::for_command("conda --version", "4.3.21"),
            Expectation::VersionOutput("4.3.21".to_string())
        );
        assert_eq!(Expectation::for_command("conda info", "1"), Expectation::NonEmptyOutput);
        assert_eq!(Expectation::for_command("conda info --json", "1"), Expectation::NonEmptyOutput);
        assert_eq!(Expectation::for_command("conda-env --help", "1"), Expectation::ExitZero);
        assert_eq!(Expectation::for_command("info conda", "1"), Expectation::ExitZero);
    }

    #[test]
    fn test_plan_with_prefix() {
        let prefix = Prefix::new("/opt/env");
        let plan = TestPlan::from_recipe(&recipe(Platform::Linux64), Some(&prefix)).unwrap();

        assert_eq!(plan.package, "conda");
        assert_eq!(plan.count(CheckKind::Files), 1);
        assert_eq!(plan.count(CheckKind::Requirements), 3);
        assert_eq!(plan.count(CheckKind::Imports), 1);
        assert_eq!(plan.count(CheckKind::Commands), 3);

        assert_eq!(
            plan.checks[0].action,
            Action::FileExists(PathBuf::from("/opt/env/bin/conda"))
        );
        let kinds: Vec<CheckKind> = plan.checks.iter().map(|c| c.kind).collect();
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(kinds, sorted);

        for (i, check) in plan.checks.iter().enumerate() {
            assert_eq!(check.id, i);
        }
    }

    #[test]
    fn test_plan_without_prefix() {
        let plan = TestPlan::from_recipe(&recipe(Platform::Win64), None).unwrap();
        assert_eq!(plan.count(CheckKind::Files), 0);
        assert_eq!(plan.count(CheckKind::Requirements), 0);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.checks[0].name, "import conda");
        assert_eq!(plan.checks[2].to_string(), "[commands] conda info");
    }
}
