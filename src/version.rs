//! Package versions and version ranges.
//!
//! [`PackageVersion`] wraps a [`semver::Version`] plus an optional fourth
//! revision component, with lenient parsing and identity semantics that
//! ignore build metadata. [`VersionRange`] uses the
//! interval notation found in package manifests:
//!
//! - `1.0.0` - minimum inclusive, no maximum
//! - `[1.0.0]` - exact version
//! - `[1.0.0, 2.0.0)` - inclusive minimum, exclusive maximum
//! - `(, 2.0.0]` - no minimum, inclusive maximum

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing versions or ranges.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("'{0}' is not a valid version string")]
    InvalidVersion(String),

    #[error("'{0}' is not a valid version range")]
    InvalidRange(String),
}

// ============================================================================
// PackageVersion
// ============================================================================

/// A package version: a semantic version plus an optional fourth `revision`
/// component (`1.0.0.1`).
///
/// Equality, ordering and hashing ignore build metadata, so `1.0.0+a` and
/// `1.0.0+b` are the same version. A zero revision is the same as none.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    version: semver::Version,
    revision: u64,
}

impl PackageVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self::with_revision(major, minor, patch, 0)
    }

    pub fn with_revision(major: u64, minor: u64, patch: u64, revision: u64) -> Self {
        Self {
            version: semver::Version::new(major, minor, patch),
            revision,
        }
    }

    /// Parses a version, padding missing minor/patch components with zero.
    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let invalid = || VersionError::InvalidVersion(text.to_string());
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }

        // Split off prerelease/metadata before padding the numeric core.
        let core_end = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
        let (core, suffix) = trimmed.split_at(core_end);
        let parts: Vec<&str> = core.split('.').collect();
        if parts.is_empty() || parts.len() > 4 || parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }

        let revision = match parts.get(3) {
            Some(part) => part.parse::<u64>().map_err(|_| invalid())?,
            None => 0,
        };

        let mut padded = parts[..parts.len().min(3)].join(".");
        for _ in parts.len()..3 {
            padded.push_str(".0");
        }
        padded.push_str(suffix);

        let version = semver::Version::parse(&padded).map_err(|_| invalid())?;
        Ok(Self { version, revision })
    }

    pub fn major(&self) -> u64 {
        self.version.major
    }

    pub fn minor(&self) -> u64 {
        self.version.minor
    }

    pub fn patch(&self) -> u64 {
        self.version.patch
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_prerelease(&self) -> bool {
        !self.version.pre.is_empty()
    }

    /// The semantic part; the revision is not represented.
    pub fn as_semver(&self) -> &semver::Version {
        &self.version
    }

    /// Normalized text: `major.minor.patch[.revision][-prerelease]` with no
    /// build metadata. A zero revision is left out.
    pub fn to_normalized_string(&self) -> String {
        let mut text = format!(
            "{}.{}.{}",
            self.version.major, self.version.minor, self.version.patch
        );
        if self.revision > 0 {
            text.push_str(&format!(".{}", self.revision));
        }
        if !self.version.pre.is_empty() {
            text.push('-');
            text.push_str(self.version.pre.as_str());
        }
        text
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (&self.version, &other.version);
        a.major
            .cmp(&b.major)
            .then(a.minor.cmp(&b.minor))
            .then(a.patch.cmp(&b.patch))
            .then(self.revision.cmp(&other.revision))
            .then_with(|| a.pre.cmp(&b.pre))
    }
}

impl Hash for PackageVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.version.major.hash(state);
        self.version.minor.hash(state);
        self.version.patch.hash(state);
        self.revision.hash(state);
        self.version.pre.as_str().hash(state);
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_normalized_string())
    }
}

impl FromStr for PackageVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<semver::Version> for PackageVersion {
    fn from(version: semver::Version) -> Self {
        Self {
            version,
            revision: 0,
        }
    }
}

impl Serialize for PackageVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_normalized_string())
    }
}

impl<'de> Deserialize<'de> for PackageVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// VersionRange
// ============================================================================

/// One end of a [`VersionRange`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bound {
    pub version: PackageVersion,
    pub inclusive: bool,
}

/// A contiguous range of versions. Either end may be open.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    min: Option<Bound>,
    max: Option<Bound>,
}

impl VersionRange {
    pub fn new(min: Option<Bound>, max: Option<Bound>) -> Self {
        Self { min, max }
    }

    /// Every version satisfies this range.
    pub fn all() -> Self {
        Self {
            min: None,
            max: None,
        }
    }

    /// `version` and above, the meaning of a bare version in a manifest.
    pub fn at_least(version: PackageVersion) -> Self {
        Self {
            min: Some(Bound {
                version,
                inclusive: true,
            }),
            max: None,
        }
    }

    /// Exactly `version`.
    pub fn exact(version: PackageVersion) -> Self {
        Self {
            min: Some(Bound {
                version: version.clone(),
                inclusive: true,
            }),
            max: Some(Bound {
                version,
                inclusive: true,
            }),
        }
    }

    pub fn min(&self) -> Option<&Bound> {
        self.min.as_ref()
    }

    pub fn max(&self) -> Option<&Bound> {
        self.max.as_ref()
    }

    pub fn satisfies(&self, version: &PackageVersion) -> bool {
        if let Some(min) = &self.min {
            match version.cmp(&min.version) {
                Ordering::Less => return false,
                Ordering::Equal if !min.inclusive => return false,
                _ => {}
            }
        }

        if let Some(max) = &self.max {
            match version.cmp(&max.version) {
                Ordering::Greater => return false,
                Ordering::Equal if !max.inclusive => return false,
                _ => {}
            }
        }

        true
    }

    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let invalid = || VersionError::InvalidRange(text.to_string());
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }

        let first = trimmed.chars().next().ok_or_else(invalid)?;
        if first != '[' && first != '(' {
            let version = PackageVersion::parse(trimmed).map_err(|_| invalid())?;
            return Ok(Self::at_least(version));
        }

        let last = trimmed.chars().last().ok_or_else(invalid)?;
        if trimmed.len() < 2 || (last != ']' && last != ')') {
            return Err(invalid());
        }

        let min_inclusive = first == '[';
        let max_inclusive = last == ']';
        let inner = &trimmed[1..trimmed.len() - 1];

        let parse_bound = |part: &str, inclusive: bool| -> Result<Option<Bound>, VersionError> {
            let part = part.trim();
            if part.is_empty() {
                return Ok(None);
            }
            let version = PackageVersion::parse(part).map_err(|_| invalid())?;
            Ok(Some(Bound { version, inclusive }))
        };

        let parts: Vec<&str> = inner.split(',').collect();
        let range = match parts.as_slice() {
            [single] => {
                // `[1.0.0]` is the only single-part bracket form allowed.
                if !min_inclusive || !max_inclusive {
                    return Err(invalid());
                }
                let bound = parse_bound(single, true)?.ok_or_else(invalid)?;
                Self::exact(bound.version)
            }
            [lower, upper] => Self {
                min: parse_bound(lower, min_inclusive)?,
                max: parse_bound(upper, max_inclusive)?,
            },
            _ => return Err(invalid()),
        };

        if range.min.is_none() && range.max.is_none() && inner.trim() != "," {
            return Err(invalid());
        }

        if let (Some(min), Some(max)) = (&range.min, &range.max) {
            let ordering = min.version.cmp(&max.version);
            if ordering == Ordering::Greater
                || (ordering == Ordering::Equal && !(min.inclusive && max.inclusive))
            {
                return Err(invalid());
            }
        }

        Ok(range)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.min, &self.max) {
            (Some(min), None) if min.inclusive => write!(f, "{}", min.version),
            (Some(min), Some(max))
                if min.inclusive && max.inclusive && min.version == max.version =>
            {
                write!(f, "[{}]", min.version)
            }
            (min, max) => {
                let open = match min {
                    Some(b) if b.inclusive => '[',
                    _ => '(',
                };
                let close = match max {
                    Some(b) if b.inclusive => ']',
                    _ => ')',
                };
                let lower = min.as_ref().map(|b| b.version.to_string()).unwrap_or_default();
                let upper = max.as_ref().map(|b| b.version.to_string()).unwrap_or_default();
                write!(f, "{open}{lower}, {upper}{close}")
            }
        }
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VersionRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VersionRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Tests
// ============================================================================
