//! Recipe Validation
//!
//! Two layers of checks:
//! - Document checks run once on the parsed document: section layout,
//!   unknown keys and suspicious selectors.
//! - Recipe checks run on each rendered target: names, versions,
//!   requirement specifiers, entry points, URLs and paths.
//!
//! [`lint`] runs both across several targets and collects every problem
//! instead of stopping at the first one.

use std::collections::HashSet;
use std::fmt;

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use url::Url;

use super::document::{Document, Node};
use super::model::{DependencyKind, EntryPoint, Recipe};
use super::selector::Selector;
use super::spec::MatchSpec;
use super::template::{self, TemplateContext};
use super::version::Version;
use crate::environment::platform::{PythonVersion, RenderContext, DEFAULT_LINT_PLATFORMS};

static PACKAGE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_][a-z0-9_.\-]*$").expect("name regex is valid"));

static HEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]+$").expect("hex regex is valid"));

/// Top-level sections and the keys each one accepts.
const SECTIONS: &[(&str, &[&str])] = &[
    ("package", &["name", "version"]),
    (
        "source",
        &["path", "url", "sha256", "md5", "sha1", "git_url", "git_rev", "git_tag", "git_depth", "patches", "folder", "fn"],
    ),
    (
        "build",
        &[
            "number", "string", "noarch", "script", "skip", "always_include_files", "entry_points",
            "preserve_egg_dir", "osx_is_app", "features", "track_features", "binary_relocation",
            "has_prefix_files", "no_link", "script_env", "run_exports", "ignore_run_exports",
        ],
    ),
    ("requirements", &["build", "host", "run", "run_constrained"]),
    ("test", &["requires", "imports", "commands", "files", "source_files"]),
    (
        "about",
        &[
            "home", "license", "license_file", "license_family", "license_url", "summary", "description",
            "doc_url", "doc_source_url", "dev_url",
        ],
    ),
    ("app", &[]),
    ("extra", &[]),
];

/// A hard problem: the recipe cannot be built or tested as written.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingField(String),
    UnknownSection(String),
    NotAMapping { section: String, found: String },
    InvalidName(String),
    InvalidVersion { version: String, reason: String },
    InvalidRequirement { kind: DependencyKind, spec: String, reason: String },
    InvalidEntryPoint(String),
    EmptyEntry(String),
    InvalidUrl { field: String, url: String, reason: String },
    InvalidChecksum { field: String, value: String },
    AmbiguousSource(usize),
    AbsolutePath { field: String, path: String },
    Render { stage: String, message: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "Missing required field '{}'", field),
            Self::UnknownSection(name) => write!(f, "Unknown top-level section '{}'", name),
            Self::NotAMapping { section, found } => {
                write!(f, "Section '{}' must be a mapping, found {}", section, found)
            }
            Self::InvalidName(name) => write!(
                f,
                "Invalid package name '{}' (lowercase letters, digits, '.', '_' and '-' only)",
                name
            ),
            Self::InvalidVersion { version, reason } => {
                write!(f, "Invalid package version '{}': {}", version, reason)
            }
            Self::InvalidRequirement { kind, spec, reason } => {
                write!(f, "Invalid requirement '{}' in {}: {}", spec, kind, reason)
            }
            Self::InvalidEntryPoint(reason) => write!(f, "{}", reason),
            Self::EmptyEntry(field) => write!(f, "Empty entry in '{}'", field),
            Self::InvalidUrl { field, url, reason } => {
                write!(f, "Invalid URL in '{}' ({}): {}", field, url, reason)
            }
            Self::InvalidChecksum { field, value } => {
                write!(f, "Invalid checksum in '{}': '{}'", field, value)
            }
            Self::AmbiguousSource(index) => write!(
                f,
                "Source #{} must name exactly one of 'path', 'url' or 'git_url'",
                index + 1
            ),
            Self::AbsolutePath { field, path } => {
                write!(f, "Path in '{}' must be relative to the prefix: '{}'", field, path)
            }
            Self::Render { stage, message } => write!(f, "{} failed: {}", stage, message),
        }
    }
}

/// Errors and warnings from one round of checks.
#[derive(Debug, Default, Clone)]
pub struct Findings {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl Findings {
    fn error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks the layout of a parsed (unselected) document.
pub fn check_document(doc: &Document) -> Findings {
    let mut findings = Findings::default();
    let mut seen = HashSet::new();

    for entry in &doc.entries {
        let Some((_, known_keys)) = SECTIONS.iter().find(|(name, _)| *name == entry.key) else {
            findings.error(ValidationError::UnknownSection(entry.key.clone()));
            continue;
        };

        if entry.selector.is_none() && !seen.insert(entry.key.as_str()) {
            findings.warn(format!("Section '{}' appears more than once", entry.key));
        }

        match (&entry.value, entry.key.as_str()) {
            (Node::Map(children), _) => check_keys(&entry.key, children, known_keys, &mut findings),
            (Node::List(items), "source") => {
                for item in items {
                    match &item.value {
                        Node::Map(children) => check_keys("source", children, known_keys, &mut findings),
                        other => findings.error(ValidationError::NotAMapping {
                            section: "source".to_string(),
                            found: format!("a list containing a {}", other.kind()),
                        }),
                    }
                }
            }
            (Node::Null, _) => {}
            (other, _) => findings.error(ValidationError::NotAMapping {
                section: entry.key.clone(),
                found: format!("a {}", other.kind()),
            }),
        }
    }

    for (path, selector) in doc.selectors() {
        check_selector(&path, selector, &mut findings);
    }

    debug!(
        "Document checks: {} errors, {} warnings",
        findings.errors.len(),
        findings.warnings.len()
    );
    findings
}

fn check_keys(section: &str, children: &[super::document::Entry], known: &[&str], findings: &mut Findings) {
    if known.is_empty() {
        return;
    }
    for child in children {
        if !known.contains(&child.key.as_str()) {
            findings.warn(format!("Unknown key '{}' in section '{}'", child.key, section));
        }
    }
}

/// Flags selectors that are valid but almost certainly not what was meant.
fn check_selector(path: &str, selector: &Selector, findings: &mut Findings) {
    let text = selector.to_string();

    // `py` is bound to 27/36/310, never to a bare major version.
    let mut comparisons = Vec::new();
    collect_python_numbers(selector, &mut comparisons);
    for number in comparisons {
        if number < 10 {
            findings.warn(format!(
                "Selector [{}] on '{}' compares py with {}; py is a two or three digit value such as 27 or 36",
                text, path, number
            ));
        }
    }

    let always = DEFAULT_LINT_PLATFORMS.iter().all(|p| selector.evaluate(&RenderContext::new(*p)));
    let never = !DEFAULT_LINT_PLATFORMS.iter().any(|p| selector.evaluate(&RenderContext::new(*p)));
    if !selector.is_python_conditional() && (always || never) {
        findings.warn(format!(
            "Selector [{}] on '{}' is {} on every platform",
            text,
            path,
            if always { "true" } else { "false" }
        ));
    }
}

fn collect_python_numbers(selector: &Selector, out: &mut Vec<u32>) {
    match selector {
        Selector::Python(_, number) => out.push(*number),
        Selector::Not(inner) => collect_python_numbers(inner, out),
        Selector::And(parts) | Selector::Or(parts) => {
            for part in parts {
                collect_python_numbers(part, out);
            }
        }
        Selector::Tag(_) => {}
    }
}

/// Checks a rendered recipe.
pub fn validate_recipe(recipe: &Recipe) -> Findings {
    let mut findings = Findings::default();

    // Package
    let name = recipe.package.name.trim();
    if name.is_empty() {
        findings.error(ValidationError::MissingField("package.name".to_string()));
    } else if !PACKAGE_NAME.is_match(name) {
        findings.error(ValidationError::InvalidName(name.to_string()));
    }

    let version = recipe.package.version.trim();
    if version.is_empty() {
        findings.error(ValidationError::MissingField("package.version".to_string()));
    } else if let Err(e) = Version::parse(version) {
        findings.error(ValidationError::InvalidVersion {
            version: version.to_string(),
            reason: e.to_string(),
        });
    }

    // Sources
    for (index, source) in recipe.source.iter().enumerate() {
        let origins = [&source.path, &source.url, &source.git_url]
            .iter()
            .filter(|o| o.is_some())
            .count();
        if origins != 1 {
            findings.error(ValidationError::AmbiguousSource(index));
        }
        if let Some(url) = &source.url {
            check_url("source.url", url, &["http", "https", "ftp", "file"], &mut findings);
            if source.sha256.is_none() && source.md5.is_none() {
                findings.warn(format!("Source URL '{}' has no sha256 or md5 checksum", url));
            }
        }
        if let Some(git_url) = &source.git_url {
            if git_url.contains("://") {
                check_url("source.git_url", git_url, &["http", "https", "git", "ssh", "file"], &mut findings);
            }
        }
        check_checksum("source.sha256", source.sha256.as_deref(), 64, &mut findings);
        check_checksum("source.md5", source.md5.as_deref(), 32, &mut findings);
    }

    // Build
    for (field, values) in [
        ("build.always_include_files", &recipe.build.always_include_files),
        ("test.files", &recipe.test.files),
        ("test.source_files", &recipe.test.source_files),
    ] {
        for path in values {
            if path.trim().is_empty() {
                findings.error(ValidationError::EmptyEntry(field.to_string()));
            } else if is_absolute(path) {
                findings.error(ValidationError::AbsolutePath {
                    field: field.to_string(),
                    path: path.clone(),
                });
            }
        }
    }

    let mut commands = HashSet::new();
    for entry_point in &recipe.build.entry_points {
        match EntryPoint::parse(entry_point) {
            Ok(ep) => {
                if !commands.insert(ep.command.clone()) {
                    findings.warn(format!("Entry point command '{}' is declared twice", ep.command));
                }
            }
            Err(reason) => findings.error(ValidationError::InvalidEntryPoint(reason)),
        }
    }

    // Requirements
    for kind in DependencyKind::ALL {
        let mut names = HashSet::new();
        for spec in recipe.requirement_strings(kind) {
            match MatchSpec::parse(spec) {
                Ok(parsed) => {
                    if !names.insert(parsed.name.clone()) {
                        findings.warn(format!("'{}' is listed more than once in {}", parsed.name, kind));
                    }
                }
                Err(e) => findings.error(ValidationError::InvalidRequirement {
                    kind,
                    spec: spec.clone(),
                    reason: e.to_string(),
                }),
            }
        }
    }

    // Test
    for (field, values) in [("test.imports", &recipe.test.imports), ("test.commands", &recipe.test.commands)] {
        if values.iter().any(|v| v.trim().is_empty()) {
            findings.error(ValidationError::EmptyEntry(field.to_string()));
        }
    }
    if recipe.test.is_empty() {
        findings.warn("Recipe declares no test imports or commands".to_string());
    }

    // About
    for (field, value) in [
        ("about.home", &recipe.about.home),
        ("about.doc_url", &recipe.about.doc_url),
        ("about.dev_url", &recipe.about.dev_url),
    ] {
        if let Some(url) = value {
            check_url(field, url, &["http", "https"], &mut findings);
        }
    }
    if recipe.about.license.is_none() {
        findings.warn("about.license is not set".to_string());
    }
    if recipe.about.summary.is_none() {
        findings.warn("about.summary is not set".to_string());
    }

    findings
}

fn check_url(field: &str, url: &str, schemes: &[&str], findings: &mut Findings) {
    let invalid = |reason: String| ValidationError::InvalidUrl {
        field: field.to_string(),
        url: url.to_string(),
        reason,
    };
    match Url::parse(url) {
        Ok(parsed) if schemes.contains(&parsed.scheme()) => {}
        Ok(parsed) => findings.error(invalid(format!("unsupported URL scheme: {}", parsed.scheme()))),
        Err(e) => findings.error(invalid(format!("invalid URL format: {}", e))),
    }
}

fn check_checksum(field: &str, value: Option<&str>, len: usize, findings: &mut Findings) {
    if let Some(value) = value {
        if value.len() != len || !HEX.is_match(value) {
            findings.error(ValidationError::InvalidChecksum {
                field: field.to_string(),
                value: value.to_string(),
            });
        }
    }
}

fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
        || path.starts_with('\\')
        || path.as_bytes().get(1) == Some(&b':')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One lint finding and the targets it was seen on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Problem {
    pub severity: Severity,
    pub message: String,
    /// Target labels; empty for findings independent of the target.
    pub targets: Vec<String>,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {}", level, self.message)?;
        if !self.targets.is_empty() {
            write!(f, " [{}]", self.targets.join(", "))?;
        }
        Ok(())
    }
}

/// What to render while linting.
#[derive(Debug, Clone)]
pub struct LintOptions {
    pub targets: Vec<RenderContext>,
    pub template: TemplateContext,
}

impl LintOptions {
    /// Every platform crossed with every interpreter (or no interpreter).
    pub fn new(platforms: &[crate::environment::platform::Platform], pythons: &[PythonVersion]) -> Self {
        let targets = platforms
            .iter()
            .flat_map(|platform| {
                let base = RenderContext::new(*platform);
                if pythons.is_empty() {
                    vec![base]
                } else {
                    pythons.iter().map(|py| base.with_python(*py)).collect()
                }
            })
            .collect();
        Self {
            targets,
            template: TemplateContext::from_env(),
        }
    }

    pub fn with_template(mut self, template: TemplateContext) -> Self {
        self.template = template;
        self
    }
}

impl Default for LintOptions {
    fn default() -> Self {
        Self::new(DEFAULT_LINT_PLATFORMS, &[])
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LintReport {
    pub problems: Vec<Problem>,
    /// Targets the recipe was rendered and checked for.
    pub targets: Vec<String>,
    /// Targets skipped by `build.skip`.
    pub skipped: Vec<String>,
}

impl LintReport {
    fn add(&mut self, severity: Severity, message: String, target: Option<&str>) {
        if let Some(existing) = self
            .problems
            .iter_mut()
            .find(|p| p.severity == severity && p.message == message)
        {
            if let Some(target) = target {
                existing.targets.push(target.to_string());
            }
            return;
        }
        self.problems.push(Problem {
            severity,
            message,
            targets: target.map(|t| vec![t.to_string()]).unwrap_or_default(),
        });
    }

    fn add_findings(&mut self, findings: Findings, target: Option<&str>) {
        for error in findings.errors {
            self.add(Severity::Error, error.to_string(), target);
        }
        for warning in findings.warnings {
            self.add(Severity::Warning, warning, target);
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Problem> {
        self.problems.iter().filter(|p| p.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Problem> {
        self.problems.iter().filter(|p| p.severity == Severity::Warning)
    }

    pub fn is_ok(&self) -> bool {
        self.errors().next().is_none()
    }

    /// Drops target lists from problems seen on every checked target.
    fn collapse_targets(&mut self) {
        let checked = self.targets.len();
        for problem in &mut self.problems {
            if checked > 1 && problem.targets.len() == checked {
                problem.targets.clear();
            }
        }
    }
}

impl fmt::Display for LintReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for problem in &self.problems {
            writeln!(f, "{}", problem)?;
        }
        for target in &self.skipped {
            writeln!(f, "note: build.skip is set for {}", target)?;
        }
        write!(
            f,
            "{} error(s), {} warning(s) across {} target(s)",
            self.errors().count(),
            self.warnings().count(),
            self.targets.len() + self.skipped.len()
        )
    }
}

/// Templates, parses and checks recipe text for every target in `options`.
pub fn lint(text: &str, options: &LintOptions) -> LintReport {
    let mut report = LintReport::default();

    let rendered = match template::render(text, &options.template) {
        Ok(rendered) => rendered,
        Err(e) => {
            report.add_findings(stage_failure("Templating", e.to_string()), None);
            return report;
        }
    };

    let doc = match Document::parse(&rendered) {
        Ok(doc) => doc,
        Err(e) => {
            report.add_findings(stage_failure("Parsing", e.to_string()), None);
            return report;
        }
    };

    report.add_findings(check_document(&doc), None);

    for ctx in &options.targets {
        let label = ctx.label();
        let selected = doc.select(ctx);

        let recipe = match Recipe::from_document(&selected) {
            Ok(recipe) => recipe,
            Err(e) => {
                report.targets.push(label.clone());
                report.add_findings(stage_failure("Rendering", e.to_string()), Some(label.as_str()));
                continue;
            }
        };

        if recipe.build.skip {
            debug!("Skipping lint for {} (build.skip)", label);
            report.skipped.push(label);
            continue;
        }

        report.targets.push(label.clone());
        report.add_findings(validate_recipe(&recipe), Some(label.as_str()));
    }

    report.collapse_targets();
    info!(
        "Lint finished: {} error(s), {} warning(s)",
        report.errors().count(),
        report.warnings().count()
    );
    report
}

fn stage_failure(stage: &str, message: String) -> Findings {
    Findings {
        errors: vec![ValidationError::Render {
            stage: stage.to_string(),
            message,
        }],
        warnings: Vec::new(),
    }
}
