//! Inputs to a gather operation.

use crate::gather::cache::GatherCache;
use crate::mapping::PackageSourceMapping;
use crate::model::{Framework, PackageIdentity};
use crate::source::{SourceCacheContext, SourceRepository};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How the resolver picks dependency versions. `Ignore` also stops the
/// gather from walking dependencies at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyBehavior {
    Ignore,
    #[default]
    Lowest,
    HighestPatch,
    HighestMinor,
    Highest,
}

/// Parts of an installed version an update must keep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConstraints {
    #[serde(default)]
    pub exact_major: bool,
    #[serde(default)]
    pub exact_minor: bool,
    #[serde(default)]
    pub exact_patch: bool,
    #[serde(default)]
    pub exact_release: bool,
}

impl VersionConstraints {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Resolution settings, loadable from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionPolicy {
    pub dependency_behavior: DependencyBehavior,
    pub include_prerelease: bool,
    pub include_unlisted: bool,
    pub version_constraints: VersionConstraints,
}

impl ResolutionPolicy {
    /// Loads a policy from JSON. Missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self {
            dependency_behavior: DependencyBehavior::Lowest,
            include_prerelease: false,
            include_unlisted: true,
            version_constraints: VersionConstraints::none(),
        }
    }
}

/// Resolution settings plus the state shared by every gather in one logical
/// restore: the gather cache and the HTTP cache policy.
///
/// Cloning shares the cache.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    pub policy: ResolutionPolicy,
    pub source_cache_context: SourceCacheContext,
    gather_cache: Arc<GatherCache>,
}

impl ResolutionContext {
    pub fn new(policy: ResolutionPolicy) -> Self {
        Self {
            policy,
            source_cache_context: SourceCacheContext::default(),
            gather_cache: Arc::new(GatherCache::new()),
        }
    }

    pub fn with_dependency_behavior(behavior: DependencyBehavior) -> Self {
        Self::new(ResolutionPolicy {
            dependency_behavior: behavior,
            ..ResolutionPolicy::default()
        })
    }

    pub fn dependency_behavior(&self) -> DependencyBehavior {
        self.policy.dependency_behavior
    }

    pub fn gather_cache(&self) -> &Arc<GatherCache> {
        &self.gather_cache
    }
}

/// Everything one gather needs.
#[derive(Debug, Clone)]
pub struct GatherContext {
    /// Packages being installed or updated, usually with exact versions
    pub primary_targets: Vec<PackageIdentity>,

    /// Ids to resolve in all versions from the primary sources
    pub primary_target_ids: Vec<String>,

    /// Packages already installed in the project
    pub installed_packages: Vec<PackageIdentity>,

    pub target_framework: Framework,

    /// Sources every primary target must resolve from; failures are fatal
    pub primary_sources: Vec<SourceRepository>,

    /// Every other configured source; failures are tolerated
    pub all_sources: Vec<SourceRepository>,

    /// Local installed packages; consulted for installed packages first
    pub packages_folder_source: SourceRepository,

    pub resolution_context: ResolutionContext,

    pub allow_downgrades: bool,

    /// Update-all mode: missing primary targets are not an error
    pub is_update_all: bool,

    pub package_source_mapping: Option<PackageSourceMapping>,
}

impl GatherContext {
    pub fn new(target_framework: Framework, packages_folder_source: SourceRepository) -> Self {
        Self {
            primary_targets: Vec::new(),
            primary_target_ids: Vec::new(),
            installed_packages: Vec::new(),
            target_framework,
            primary_sources: Vec::new(),
            all_sources: Vec::new(),
            packages_folder_source,
            resolution_context: ResolutionContext::default(),
            allow_downgrades: true,
            is_update_all: false,
            package_source_mapping: None,
        }
    }

    pub fn is_source_mapping_enabled(&self) -> bool {
        self.package_source_mapping
            .as_ref()
            .is_some_and(PackageSourceMapping::is_enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy = ResolutionPolicy::from_json(r#"{"dependency_behavior":"ignore"}"#).unwrap();
        assert_eq!(policy.dependency_behavior, DependencyBehavior::Ignore);
        assert!(policy.include_unlisted);
        assert_eq!(policy.version_constraints, VersionConstraints::none());

        assert!(ResolutionPolicy::from_json(r#"{"dependency_behavior":"newest"}"#).is_err());
    }

    #[test]
    fn test_cloned_resolution_context_shares_cache() {
        let context = ResolutionContext::default();
        let clone = context.clone();
        assert!(Arc::ptr_eq(context.gather_cache(), clone.gather_cache()));

        let fresh = ResolutionContext::default();
        assert!(!Arc::ptr_eq(context.gather_cache(), fresh.gather_cache()));
    }
}
