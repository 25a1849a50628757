//! Package sources and the in-memory local package index.

use crate::model::{normalize_id, Framework, PackageIdentity, SourcePackageDependencyInfo};
use crate::traits::{DependencyInfoResource, SourceError, VulnerabilityInfoResource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A configured package source.
///
/// Two sources are the same source when their `source` locations match
/// (case-insensitive), whatever their display names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSource {
    /// Display name used by source mapping configuration
    pub name: String,

    /// Feed location (URL or directory)
    pub source: String,
}

impl PackageSource {
    /// Source whose name is its location.
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            name: source.clone(),
            source,
        }
    }

    pub fn named(source: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

impl PartialEq for PackageSource {
    fn eq(&self, other: &Self) -> bool {
        self.source.eq_ignore_ascii_case(&other.source)
    }
}

impl Eq for PackageSource {}

impl Hash for PackageSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// HTTP caching policy handed through to sources for one operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceCacheContext {
    /// Bypass the HTTP cache entirely
    pub no_cache: bool,

    /// Download directly without writing to the HTTP cache
    pub direct_download: bool,

    /// Maximum age of cached responses
    pub max_age: Option<Duration>,
}

/// A package source together with the capabilities it exposes.
#[derive(Clone)]
pub struct SourceRepository {
    pub package_source: PackageSource,
    dependency_info: Option<Arc<dyn DependencyInfoResource>>,
    vulnerability_info: Option<Arc<dyn VulnerabilityInfoResource>>,
}

impl SourceRepository {
    pub fn new(package_source: PackageSource) -> Self {
        Self {
            package_source,
            dependency_info: None,
            vulnerability_info: None,
        }
    }

    pub fn with_dependency_info(mut self, resource: Arc<dyn DependencyInfoResource>) -> Self {
        self.dependency_info = Some(resource);
        self
    }

    pub fn with_vulnerability_info(
        mut self,
        resource: Arc<dyn VulnerabilityInfoResource>,
    ) -> Self {
        self.vulnerability_info = Some(resource);
        self
    }

    pub fn dependency_info(&self) -> Option<&Arc<dyn DependencyInfoResource>> {
        self.dependency_info.as_ref()
    }

    pub fn vulnerability_info(&self) -> Option<&Arc<dyn VulnerabilityInfoResource>> {
        self.vulnerability_info.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.package_source.name
    }
}

impl fmt::Debug for SourceRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRepository")
            .field("package_source", &self.package_source)
            .field("dependency_info", &self.dependency_info.is_some())
            .field("vulnerability_info", &self.vulnerability_info.is_some())
            .finish()
    }
}

// ============================================================================
// Local package index
// ============================================================================

/// In-memory dependency metadata, e.g. a snapshot of the packages folder.
///
/// Returned infos are attributed to `source` when one is set.
#[derive(Debug, Default)]
pub struct LocalPackageIndex {
    source: Option<PackageSource>,
    packages: HashMap<String, Vec<SourcePackageDependencyInfo>>,
}

impl LocalPackageIndex {
    pub fn new(packages: impl IntoIterator<Item = SourcePackageDependencyInfo>) -> Self {
        let mut index = Self::default();
        for package in packages {
            index.add(package);
        }
        index
    }

    pub fn with_source(mut self, source: PackageSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Adds a package; the first entry for an id/version is kept.
    pub fn add(&mut self, package: SourcePackageDependencyInfo) {
        let versions = self.packages.entry(normalize_id(&package.id)).or_default();
        if !versions.contains(&package) {
            versions.push(package);
        }
    }

    pub fn len(&self) -> usize {
        self.packages.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    fn attribute(&self, package: &SourcePackageDependencyInfo) -> SourcePackageDependencyInfo {
        match &self.source {
            Some(source) => package.clone().with_source(source.clone()),
            None => package.clone(),
        }
    }
}

#[async_trait]
impl DependencyInfoResource for LocalPackageIndex {
    async fn resolve_package(
        &self,
        package: &PackageIdentity,
        _framework: &Framework,
        _cache_context: &SourceCacheContext,
        token: &CancellationToken,
    ) -> Result<Option<SourcePackageDependencyInfo>, SourceError> {
        if token.is_cancelled() {
            return Err(SourceError::Cancelled);
        }

        let Some(version) = &package.version else {
            return Ok(None);
        };

        Ok(self
            .packages
            .get(&package.normalized_id())
            .and_then(|versions| versions.iter().find(|p| &p.version == version))
            .map(|p| self.attribute(p)))
    }

    async fn resolve_packages(
        &self,
        package_id: &str,
        _framework: &Framework,
        _cache_context: &SourceCacheContext,
        token: &CancellationToken,
    ) -> Result<Vec<SourcePackageDependencyInfo>, SourceError> {
        if token.is_cancelled() {
            return Err(SourceError::Cancelled);
        }

        Ok(self
            .packages
            .get(&normalize_id(package_id))
            .map(|versions| versions.iter().map(|p| self.attribute(p)).collect())
            .unwrap_or_default())
    }
}
