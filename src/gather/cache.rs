//! Source results shared across gathers in one logical restore.

use crate::model::{normalize_id, Framework, PackageIdentity, SourcePackageDependencyInfo};
use crate::source::PackageSource;
use dashmap::DashMap;

/// Outcome of a cache lookup. `has_entry` distinguishes "never asked" from
/// "asked, and the source had nothing".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatherCacheResult {
    pub has_entry: bool,
    pub packages: Vec<SourcePackageDependencyInfo>,
}

impl GatherCacheResult {
    fn miss() -> Self {
        Self::default()
    }

    fn hit(packages: Vec<SourcePackageDependencyInfo>) -> Self {
        Self {
            has_entry: true,
            packages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SingleVersionKey {
    source: PackageSource,
    package: PackageIdentity,
    framework: Framework,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AllVersionsKey {
    source: PackageSource,
    id: String,
    framework: Framework,
}

/// Thread-safe memo of source lookups, keyed by source, package and framework.
///
/// Entries are only ever added. The first writer for a key wins.
#[derive(Debug, Default)]
pub struct GatherCache {
    single_version: DashMap<SingleVersionKey, Option<SourcePackageDependencyInfo>>,
    all_versions: DashMap<AllVersionsKey, Vec<SourcePackageDependencyInfo>>,
}

impl GatherCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the result of an exact id/version lookup, including a miss.
    pub fn add_package_from_single_version_lookup(
        &self,
        source: &PackageSource,
        package: &PackageIdentity,
        framework: &Framework,
        info: Option<SourcePackageDependencyInfo>,
    ) {
        let key = SingleVersionKey {
            source: source.clone(),
            package: package.clone(),
            framework: framework.clone(),
        };
        self.single_version.entry(key).or_insert(info);
    }

    /// Records every version a source returned for an id.
    pub fn add_all_packages_for_id(
        &self,
        source: &PackageSource,
        package_id: &str,
        framework: &Framework,
        packages: Vec<SourcePackageDependencyInfo>,
    ) {
        let key = AllVersionsKey {
            source: source.clone(),
            id: normalize_id(package_id),
            framework: framework.clone(),
        };
        self.all_versions.entry(key).or_insert(packages);
    }

    /// Cached result for an exact id/version.
    ///
    /// An earlier all-versions lookup of the same id answers this too.
    pub fn get_package(
        &self,
        source: &PackageSource,
        package: &PackageIdentity,
        framework: &Framework,
    ) -> GatherCacheResult {
        let key = SingleVersionKey {
            source: source.clone(),
            package: package.clone(),
            framework: framework.clone(),
        };
        if let Some(entry) = self.single_version.get(&key) {
            return GatherCacheResult::hit(entry.value().iter().cloned().collect());
        }

        let all = self.get_packages(source, &package.id, framework);
        if !all.has_entry {
            return GatherCacheResult::miss();
        }

        let packages = all
            .packages
            .into_iter()
            .filter(|info| Some(&info.version) == package.version.as_ref())
            .collect();
        GatherCacheResult::hit(packages)
    }

    /// Cached result for every version of an id.
    pub fn get_packages(
        &self,
        source: &PackageSource,
        package_id: &str,
        framework: &Framework,
    ) -> GatherCacheResult {
        let key = AllVersionsKey {
            source: source.clone(),
            id: normalize_id(package_id),
            framework: framework.clone(),
        };
        match self.all_versions.get(&key) {
            Some(entry) => GatherCacheResult::hit(entry.value().clone()),
            None => GatherCacheResult::miss(),
        }
    }

    pub fn len(&self) -> usize {
        self.single_version.len() + self.all_versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
