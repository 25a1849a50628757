use crate::source::PackageSource;
use crate::version::{PackageVersion, VersionRange};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use url::Url;

/// Package id plus an optional version.
///
/// Ids compare case-insensitively. An identity without a version stands for
/// "every version of this id" in gather requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub id: String,
    pub version: Option<PackageVersion>,
}

impl PackageIdentity {
    pub fn new(id: impl Into<String>, version: PackageVersion) -> Self {
        Self {
            id: id.into(),
            version: Some(version),
        }
    }

    /// Identity for all versions of `id`.
    pub fn id_only(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
        }
    }

    pub fn has_version(&self) -> bool {
        self.version.is_some()
    }

    /// Lowercased id, the key used wherever ids are compared.
    pub fn normalized_id(&self) -> String {
        normalize_id(&self.id)
    }
}

impl PartialEq for PackageIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id.eq_ignore_ascii_case(&other.id) && self.version == other.version
    }
}

impl Eq for PackageIdentity {}

impl Hash for PackageIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized_id().hash(state);
        self.version.hash(state);
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} {}", self.id, version),
            None => f.write_str(&self.id),
        }
    }
}

pub fn normalize_id(id: &str) -> String {
    id.to_ascii_lowercase()
}

/// A dependency edge: target id plus the allowed version range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDependency {
    pub id: String,
    pub version_range: VersionRange,
}

impl PackageDependency {
    pub fn new(id: impl Into<String>, version_range: VersionRange) -> Self {
        Self {
            id: id.into(),
            version_range,
        }
    }
}

/// A package version as reported by a source, with its dependency edges.
///
/// Equality and hashing use the identity only, so a `HashSet` of these keeps
/// exactly one entry per id/version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePackageDependencyInfo {
    pub id: String,
    pub version: PackageVersion,
    pub dependencies: Vec<PackageDependency>,
    pub listed: bool,
    pub source: Option<PackageSource>,
    pub download_uri: Option<Url>,
    pub package_hash: Option<String>,
}

impl SourcePackageDependencyInfo {
    pub fn new(
        id: impl Into<String>,
        version: PackageVersion,
        dependencies: Vec<PackageDependency>,
        listed: bool,
        source: Option<PackageSource>,
    ) -> Self {
        Self {
            id: id.into(),
            version,
            dependencies,
            listed,
            source,
            download_uri: None,
            package_hash: None,
        }
    }

    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity::new(self.id.clone(), self.version.clone())
    }

    pub fn depends_on(&self, id: &str) -> bool {
        self.dependencies
            .iter()
            .any(|dependency| dependency.id.eq_ignore_ascii_case(id))
    }

    /// Copy of this info attributed to `source`.
    pub fn with_source(mut self, source: PackageSource) -> Self {
        self.source = Some(source);
        self
    }
}

impl PartialEq for SourcePackageDependencyInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id.eq_ignore_ascii_case(&other.id) && self.version == other.version
    }
}

impl Eq for SourcePackageDependencyInfo {}

impl Hash for SourcePackageDependencyInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        normalize_id(&self.id).hash(state);
        self.version.hash(state);
    }
}

impl fmt::Display for SourcePackageDependencyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.version)
    }
}

/// Target framework moniker such as `net451`. Opaque to the gather engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Framework(String);

impl Framework {
    pub fn new(moniker: impl Into<String>) -> Self {
        Self(moniker.into())
    }

    /// Framework-agnostic lookups.
    pub fn any() -> Self {
        Self("any".to_string())
    }

    pub fn moniker(&self) -> &str {
        &self.0
    }
}

impl Default for Framework {
    fn default() -> Self {
        Self::any()
    }
}

impl PartialEq for Framework {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Framework {}

impl Hash for Framework {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_compares_ids_case_insensitively() {
        let a = PackageIdentity::new("Newtonsoft.Json", PackageVersion::new(1, 0, 0));
        let b = PackageIdentity::new("newtonsoft.json", PackageVersion::new(1, 0, 0));
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_dependency_info_dedups_by_identity() {
        let first = SourcePackageDependencyInfo::new(
            "a",
            PackageVersion::new(1, 0, 0),
            vec![],
            true,
            Some(PackageSource::new("http://first")),
        );
        let second = SourcePackageDependencyInfo::new(
            "A",
            PackageVersion::new(1, 0, 0),
            vec![PackageDependency::new("b", VersionRange::all())],
            true,
            Some(PackageSource::new("http://second")),
        );

        let mut set = HashSet::new();
        assert!(set.insert(first));
        assert!(!set.insert(second));

        let kept = set.iter().next().unwrap();
        assert_eq!(kept.source.as_ref().unwrap().source, "http://first");
    }

    #[test]
    fn test_identity_display() {
        let identity = PackageIdentity::new("a", PackageVersion::new(2, 0, 0));
        assert_eq!(identity.to_string(), "a 2.0.0");
        assert_eq!(PackageIdentity::id_only("a").to_string(), "a");
    }

    #[test]
    fn test_dependency_serialization() {
        let dep = PackageDependency::new("glib", VersionRange::parse("[2.0, 3.0)").unwrap());

        let json = serde_json::to_string(&dep).unwrap();
        let deserialized: PackageDependency = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized, dep);
    }
}
