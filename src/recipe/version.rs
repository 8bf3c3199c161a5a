//! Package Versions
//!
//! Conda version ordering. A version is split into an optional numeric
//! epoch (`1!`), the release (`.`, `_` and `-` separated parts) and an
//! optional local suffix (`+local`). Each part is further split into runs of
//! digits and letters which compare as:
//!
//! `dev` < any other string < any number < `post`
//!
//! Missing parts and components compare as `0`, so `1.0 == 1.0.0`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("version is empty")]
    Empty,

    #[error("invalid character '{ch}' in version '{version}'")]
    InvalidCharacter { version: String, ch: char },

    #[error("invalid version '{version}': {reason}")]
    Invalid { version: String, reason: String },
}

/// One run inside a version part. Variant order is the comparison order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Component {
    Dev,
    Str(String),
    Num(u64),
    Post,
}

const ZERO: Component = Component::Num(0);

type Part = Vec<Component>;

/// A parsed, comparable package version.
#[derive(Debug, Clone)]
pub struct Version {
    source: String,
    epoch: u64,
    release: Vec<Part>,
    local: Vec<Part>,
}

impl Version {
    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let source = text.trim();
        if source.is_empty() {
            return Err(VersionError::Empty);
        }
        let lowered = source.to_lowercase();
        let invalid = |reason: &str| VersionError::Invalid {
            version: source.to_string(),
            reason: reason.to_string(),
        };

        if let Some(ch) = lowered
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+' | '!')))
        {
            return Err(VersionError::InvalidCharacter {
                version: source.to_string(),
                ch,
            });
        }

        let (epoch, rest) = match lowered.split_once('!') {
            Some((epoch, rest)) => {
                let epoch = epoch
                    .parse::<u64>()
                    .map_err(|_| invalid("epoch must be a number"))?;
                (epoch, rest)
            }
            None => (0, lowered.as_str()),
        };
        if rest.contains('!') {
            return Err(invalid("duplicated epoch separator '!'"));
        }

        let (release, local) = match rest.split_once('+') {
            Some((release, local)) => (release, Some(local)),
            None => (rest, None),
        };
        if local.is_some_and(|l| l.contains('+')) {
            return Err(invalid("duplicated local version separator '+'"));
        }

        let release = split_parts(release).ok_or_else(|| invalid("empty version component"))?;
        let local = match local {
            Some(local) => split_parts(local).ok_or_else(|| invalid("empty local version component"))?,
            None => Vec::new(),
        };

        Ok(Self {
            source: source.to_string(),
            epoch,
            release,
            local,
        })
    }

    /// `0`, the lowest release of epoch 0.
    pub fn zero() -> Self {
        Self {
            source: "0".to_string(),
            epoch: 0,
            release: vec![vec![ZERO]],
            local: Vec::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Prefix match used by `1.2.*` and `=1.2`: every part of `prefix` but
    /// the last must equal ours; the last must be a component-wise prefix.
    pub fn starts_with(&self, prefix: &Version) -> bool {
        if self.epoch != prefix.epoch {
            return false;
        }
        let Some((last, leading)) = prefix.release.split_last() else {
            return true;
        };

        for (i, part) in leading.iter().enumerate() {
            let ours = self.release.get(i).map(Vec::as_slice).unwrap_or(&[]);
            if compare_part(ours, part) != Ordering::Equal {
                return false;
            }
        }

        let ours = self
            .release
            .get(leading.len())
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        last.iter()
            .enumerate()
            .all(|(i, component)| ours.get(i).unwrap_or(&ZERO) == component)
    }

    /// Number of release parts, e.g. `3` for `1.2.3`.
    pub fn release_len(&self) -> usize {
        self.release.len()
    }
}

/// Splits `1.2rc1_3` into `[[1], [2, rc, 1], [3]]`. `None` on an empty part.
fn split_parts(text: &str) -> Option<Vec<Part>> {
    text.split(['.', '_', '-'])
        .map(|part| {
            if part.is_empty() {
                return None;
            }
            let mut components = Vec::new();
            let mut rest = part;
            while let Some(first) = rest.chars().next() {
                let digits = first.is_ascii_digit();
                let end = rest
                    .find(|c: char| c.is_ascii_digit() != digits)
                    .unwrap_or(rest.len());
                let run = &rest[..end];
                components.push(if digits {
                    // Overlong runs saturate; they only occur in broken versions.
                    Component::Num(run.parse().unwrap_or(u64::MAX))
                } else {
                    match run {
                        "dev" => Component::Dev,
                        "post" => Component::Post,
                        other => Component::Str(other.to_string()),
                    }
                });
                rest = &rest[end..];
            }
            if !matches!(components.first(), Some(Component::Num(_))) {
                components.insert(0, ZERO);
            }
            Some(components)
        })
        .collect()
}

fn compare_part(a: &[Component], b: &[Component]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| a.get(i).unwrap_or(&ZERO).cmp(b.get(i).unwrap_or(&ZERO)))
        .find(|ord| *ord != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn compare_parts(a: &[Part], b: &[Part]) -> Ordering {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            compare_part(
                a.get(i).map(Vec::as_slice).unwrap_or(&[]),
                b.get(i).map(Vec::as_slice).unwrap_or(&[]),
            )
        })
        .find(|ord| *ord != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_parts(&self.release, &other.release))
            .then_with(|| compare_parts(&self.local, &other.local))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> Version {
        Version::parse(text).unwrap()
    }

    #[test]
    fn test_ordering_chain() {
        let chain = [
            "0.4", "0.4.0", "0.4.1.rc", "0.4.1.RC", "0.4.1", "0.5a1", "0.5b3", "0.5C1", "0.5",
            "0.9.6", "0.960923", "1.0", "1.1dev1", "1.1a1", "1.1.0dev1", "1.1.0rc1", "1.1.0",
            "1.1.0post1", "1.1post1", "1996.07.12", "1!0.4.1", "1!3.1.1.6", "2!0.4.1",
        ];
        for pair in chain.windows(2) {
            assert!(v(pair[0]) <= v(pair[1]), "{} <= {}", pair[0], pair[1]);
        }
        assert!(v("1.1dev1") < v("1.1a1"));
        assert!(v("1.1a1") < v("1.1"));
        assert!(v("1.1") < v("1.1post1"));
    }

    #[test]
    fn test_padding_equality() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert_eq!(v("1"), v("1.0"));
        assert_eq!(v("0.4.1.rc"), v("0.4.1.RC"));
        assert_ne!(v("1.0"), v("1.0.1"));
        assert_eq!(v("1.0").to_string(), "1.0");
    }

    #[test]
    fn test_numeric_not_lexicographic() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("2.14.2") > v("2.12.4"));
        assert!(v("4.3.21") > v("4.3.3"));
    }

    #[test]
    fn test_local_versions() {
        assert!(v("1.0+1") > v("1.0"));
        assert!(v("1.0+abc.2") < v("1.0+abc.10"));
    }

    #[test]
    fn test_starts_with() {
        assert!(v("1.2.3").starts_with(&v("1.2")));
        assert!(v("1.2").starts_with(&v("1.2")));
        assert!(!v("1.20").starts_with(&v("1.2")));
        assert!(!v("1.3").starts_with(&v("1.2")));
        assert!(v("1.2rc1").starts_with(&v("1.2")));
        assert!(!v("1!1.2").starts_with(&v("1.2")));
    }

    #[test]
    fn test_invalid_versions() {
        assert_eq!(Version::parse("  "), Err(VersionError::Empty));
        assert!(matches!(
            Version::parse("1.0$"),
            Err(VersionError::InvalidCharacter { ch: '$', .. })
        ));
        assert!(Version::parse("1..0").is_err());
        assert!(Version::parse("1.0.").is_err());
        assert!(Version::parse("1!2!3").is_err());
        assert!(Version::parse("1+a+b").is_err());
        assert!(Version::parse("x!1.0").is_err());
        assert!(Version::parse("{{ version }}").is_err());
    }

    #[test]
    fn test_serialize_as_string() {
        assert_eq!(serde_json::to_string(&v("4.3.21")).unwrap(), "\"4.3.21\"");
    }
}
