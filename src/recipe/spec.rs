//! Dependency Specifiers
//!
//! `VersionSpec` is a constraint over [`Version`]s (`>=1.0,<2|3.*`) and
//! `MatchSpec` is a full requirement line (`requests >=2.12.4,<=2.14.2`,
//! `numpy=1.11=py36_0`).

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::version::{Version, VersionError};

static PACKAGE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").expect("name regex is valid"));

/// Whitespace around `,` and `|`, or between an operator and its version.
static SPEC_SPACING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*([,|])\s*|([<>=!~]=?)\s+").expect("spacing regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("empty specifier")]
    Empty,

    #[error("invalid version in '{spec}': {source}")]
    Version {
        spec: String,
        #[source]
        source: VersionError,
    },

    #[error("invalid specifier '{spec}': {reason}")]
    Invalid { spec: String, reason: String },
}

fn invalid(spec: &str, reason: impl Into<String>) -> SpecError {
    SpecError::Invalid {
        spec: spec.to_string(),
        reason: reason.into(),
    }
}

fn version(spec: &str, text: &str) -> Result<Version, SpecError> {
    Version::parse(text).map_err(|source| SpecError::Version {
        spec: spec.to_string(),
        source,
    })
}

/// A single comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Exact(Version),
    NotEqual(Version),
    Greater(Version),
    GreaterEqual(Version),
    Less(Version),
    LessEqual(Version),
    StartsWith(Version),
    NotStartsWith(Version),
    /// `~=V`: at least `V`, and within `V` minus its last part.
    Compatible { lower: Version, prefix: Version },
}

impl Constraint {
    fn parse(term: &str) -> Result<Self, SpecError> {
        const OPERATORS: [&str; 8] = ["==", "!=", ">=", "<=", "~=", ">", "<", "="];

        let (op, rest) = OPERATORS
            .iter()
            .find_map(|op| term.strip_prefix(op).map(|rest| (*op, rest)))
            .unwrap_or(("", term));

        if rest.is_empty() {
            return Err(invalid(term, "missing version"));
        }

        let (text, glob) = match rest.strip_suffix(".*").or_else(|| rest.strip_suffix('*')) {
            Some(stripped) => (stripped, true),
            None => (rest, false),
        };
        let parsed = version(term, text)?;

        Ok(match (op, glob) {
            ("" | "=" | "==", true) | ("=", false) => Constraint::StartsWith(parsed),
            ("!=", true) => Constraint::NotStartsWith(parsed),
            ("" | "==", false) => Constraint::Exact(parsed),
            ("!=", false) => Constraint::NotEqual(parsed),
            (">", _) => Constraint::Greater(parsed),
            (">=", _) => Constraint::GreaterEqual(parsed),
            ("<", _) => Constraint::Less(parsed),
            ("<=", _) => Constraint::LessEqual(parsed),
            ("~=", false) => {
                let base = text.split('+').next().unwrap_or(text);
                let (head, _) = base
                    .rsplit_once('.')
                    .ok_or_else(|| invalid(term, "'~=' needs at least two version parts"))?;
                Constraint::Compatible {
                    prefix: version(term, head)?,
                    lower: parsed,
                }
            }
            _ => return Err(invalid(term, format!("'{}' cannot be combined with '*'", op))),
        })
    }

    pub fn matches(&self, candidate: &Version) -> bool {
        match self {
            Constraint::Exact(v) => candidate == v,
            Constraint::NotEqual(v) => candidate != v,
            Constraint::Greater(v) => candidate > v,
            Constraint::GreaterEqual(v) => candidate >= v,
            Constraint::Less(v) => candidate < v,
            Constraint::LessEqual(v) => candidate <= v,
            Constraint::StartsWith(v) => candidate.starts_with(v),
            Constraint::NotStartsWith(v) => !candidate.starts_with(v),
            Constraint::Compatible { lower, prefix } => {
                candidate >= lower && candidate.starts_with(prefix)
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Exact(v) => write!(f, "=={}", v),
            Constraint::NotEqual(v) => write!(f, "!={}", v),
            Constraint::Greater(v) => write!(f, ">{}", v),
            Constraint::GreaterEqual(v) => write!(f, ">={}", v),
            Constraint::Less(v) => write!(f, "<{}", v),
            Constraint::LessEqual(v) => write!(f, "<={}", v),
            Constraint::StartsWith(v) => write!(f, "{}.*", v),
            Constraint::NotStartsWith(v) => write!(f, "!={}.*", v),
            Constraint::Compatible { lower, .. } => write!(f, "~={}", lower),
        }
    }
}

/// A version constraint: alternatives (`|`) of conjunctions (`,`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    Any,
    Constraint(Constraint),
    All(Vec<VersionSpec>),
    AnyOf(Vec<VersionSpec>),
}

impl VersionSpec {
    pub fn parse(text: &str) -> Result<Self, SpecError> {
        let text = normalize(text);
        if text.is_empty() {
            return Err(SpecError::Empty);
        }
        if text.contains(['(', ')']) {
            return Err(invalid(&text, "parentheses are not supported"));
        }

        let alternatives = text
            .split('|')
            .map(|alternative| {
                let terms = alternative
                    .split(',')
                    .map(|term| match term {
                        "" => Err(invalid(&text, "empty constraint")),
                        "*" => Ok(VersionSpec::Any),
                        term => Constraint::parse(term).map(VersionSpec::Constraint),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(collapse(terms, VersionSpec::All))
            })
            .collect::<Result<Vec<_>, SpecError>>()?;

        Ok(collapse(alternatives, VersionSpec::AnyOf))
    }

    pub fn matches(&self, candidate: &Version) -> bool {
        match self {
            VersionSpec::Any => true,
            VersionSpec::Constraint(c) => c.matches(candidate),
            VersionSpec::All(specs) => specs.iter().all(|s| s.matches(candidate)),
            VersionSpec::AnyOf(specs) => specs.iter().any(|s| s.matches(candidate)),
        }
    }
}

fn collapse(mut specs: Vec<VersionSpec>, wrap: fn(Vec<VersionSpec>) -> VersionSpec) -> VersionSpec {
    if specs.len() == 1 {
        specs.remove(0)
    } else {
        wrap(specs)
    }
}

fn normalize(text: &str) -> String {
    SPEC_SPACING
        .replace_all(text.trim(), |caps: &regex::Captures| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .map_or(String::new(), |m| m.as_str().to_string())
        })
        .into_owned()
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Any => f.write_str("*"),
            VersionSpec::Constraint(c) => fmt::Display::fmt(c, f),
            VersionSpec::All(specs) => write_joined(f, specs, ","),
            VersionSpec::AnyOf(specs) => write_joined(f, specs, "|"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, specs: &[VersionSpec], sep: &str) -> fmt::Result {
    for (i, spec) in specs.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        fmt::Display::fmt(spec, f)?;
    }
    Ok(())
}

impl FromStr for VersionSpec {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionSpec::parse(s)
    }
}

/// A requirement line: package name with optional version and build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSpec {
    pub name: String,
    pub version: Option<VersionSpec>,
    pub build: Option<String>,
    version_text: Option<String>,
}

impl MatchSpec {
    /// Accepts `name`, `name <version> [<build>]`, `name<op><version>` and
    /// `name=<version>[=<build>]`. A bare version without a build string
    /// matches as a prefix (`python 3.6` means `3.6.*`).
    pub fn parse(text: &str) -> Result<Self, SpecError> {
        let spec = normalize(text);
        if spec.is_empty() {
            return Err(SpecError::Empty);
        }

        let (name, version_text, build) = if spec.contains(' ') {
            let mut fields = spec.split(' ');
            let name = fields.next().unwrap_or_default();
            let version = fields.next().map(str::to_string);
            let build = fields.next().map(str::to_string);
            if fields.next().is_some() {
                return Err(invalid(&spec, "expected at most 'name version build'"));
            }
            (name, version, build)
        } else {
            match spec.find(['<', '>', '=', '!', '~']) {
                None => (spec.as_str(), None, None),
                Some(pos) => {
                    let (name, rest) = spec.split_at(pos);
                    if rest.starts_with('=') && !rest.starts_with("==") {
                        let mut fields = rest[1..].splitn(2, '=');
                        let version = fields.next().unwrap_or_default();
                        let build = fields.next();
                        match build {
                            Some(build) => (name, Some(format!("=={}", version)), Some(build.to_string())),
                            None => (name, Some(format!("{}.*", version.trim_end_matches(".*"))), None),
                        }
                    } else {
                        (name, Some(rest.to_string()), None)
                    }
                }
            }
        };

        if !PACKAGE_NAME.is_match(name) {
            return Err(invalid(&spec, format!("invalid package name '{}'", name)));
        }
        if build.as_deref().is_some_and(str::is_empty) {
            return Err(invalid(&spec, "empty build string"));
        }

        let version = match &version_text {
            Some(text) if is_bare_version(text) && build.is_none() => {
                Some(VersionSpec::Constraint(Constraint::StartsWith(version(&spec, text)?)))
            }
            Some(text) => Some(VersionSpec::parse(text).map_err(|e| match e {
                SpecError::Empty => invalid(&spec, "empty version"),
                other => other,
            })?),
            None => None,
        };

        Ok(Self {
            name: name.to_string(),
            version,
            build,
            version_text,
        })
    }

    /// True if a package with this name, version and build satisfies this match spec.
    pub fn matches(&self, name: &str, candidate: &Version, build: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            && self.version.as_ref().map_or(true, |spec| spec.matches(candidate))
            && self.build.as_deref().map_or(true, |pattern| glob_match(pattern, build))
    }
}

fn is_bare_version(text: &str) -> bool {
    !text.contains(['<', '>', '=', '!', '~', ',', '|', '*'])
}

/// `*` wildcard matching for build strings.
fn glob_match(pattern: &str, text: &str) -> bool {
    let Some((head, rest)) = pattern.split_once('*') else {
        return pattern == text;
    };
    let Some(mut remaining) = text.strip_prefix(head) else {
        return false;
    };
    let mut pieces: Vec<&str> = rest.split('*').collect();
    let tail = pieces.pop().unwrap_or_default();
    for piece in pieces {
        match remaining.find(piece) {
            Some(pos) => remaining = &remaining[pos + piece.len()..],
            None => return false,
        }
    }
    remaining.len() >= tail.len() && remaining.ends_with(tail)
}

impl fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(version) = &self.version_text {
            write!(f, " {}", version)?;
        }
        if let Some(build) = &self.build {
            write!(f, " {}", build)?;
        }
        Ok(())
    }
}

impl FromStr for MatchSpec {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MatchSpec::parse(s)
    }
}
