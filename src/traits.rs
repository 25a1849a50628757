use crate::audit::GetVulnerabilityInfoResult;
use crate::model::{Framework, PackageIdentity, SourcePackageDependencyInfo};
use crate::source::SourceCacheContext;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failures a package source may report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Unable to reach source: {0}")]
    Transport(String),
    #[error("Source returned invalid data: {0}")]
    Protocol(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Request was cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

/// Dependency metadata lookups against one package source.
///
/// Implementations must observe `token`: a lookup that never finishes on its
/// own still has to return [`SourceError::Cancelled`] once the token fires.
#[async_trait]
pub trait DependencyInfoResource: Send + Sync {
    /// Resolves a single id/version. `Ok(None)` when the source lacks it.
    async fn resolve_package(
        &self,
        package: &PackageIdentity,
        framework: &Framework,
        cache_context: &SourceCacheContext,
        token: &CancellationToken,
    ) -> Result<Option<SourcePackageDependencyInfo>, SourceError>;

    /// Resolves every version of `package_id` the source knows about.
    async fn resolve_packages(
        &self,
        package_id: &str,
        framework: &Framework,
        cache_context: &SourceCacheContext,
        token: &CancellationToken,
    ) -> Result<Vec<SourcePackageDependencyInfo>, SourceError>;
}

/// Known-vulnerability data published by a source.
#[async_trait]
pub trait VulnerabilityInfoResource: Send + Sync {
    async fn get_vulnerability_info(
        &self,
        cache_context: &SourceCacheContext,
        token: &CancellationToken,
    ) -> Result<GetVulnerabilityInfoResult, SourceError>;
}
