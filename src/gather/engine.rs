//! Multi-source dependency gathering.
//!
//! [`ResolverGather`] walks the dependency graph around the primary targets
//! one frontier at a time:
//! 1. Primary targets are requested from the primary sources only
//! 2. Installed packages are looked up in the packages folder, falling back to
//!    every source when missing there
//! 3. Each round, every queued request runs concurrently (bounded by the
//!    request executor), then the closure of parents and children of what
//!    has been searched is computed and unsearched ids are queued
//! 4. Results are merged by request order so the earliest request that
//!    produced a given id/version wins
//!
//! Primary-source failures abort the gather. Failures on other sources are
//! logged and treated as "no data from this source".

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::executor::RequestExecutor;
use crate::gather::cache::GatherCache;
use crate::gather::context::{DependencyBehavior, GatherContext};
use crate::model::{normalize_id, PackageIdentity, SourcePackageDependencyInfo};
use crate::source::{PackageSource, SourceRepository};
use crate::traits::{DependencyInfoResource, SourceError};

pub const DEFAULT_MAX_DEGREE_OF_PARALLELISM: usize = 16;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

// ============================================================================
// Results and errors
// ============================================================================

/// Gathered packages plus statistics.
#[derive(Debug)]
pub struct GatherOutcome {
    /// One entry per id/version; the first source to report it wins
    pub packages: HashSet<SourcePackageDependencyInfo>,

    pub stats: GatherStats,
}

/// Statistics about one gather.
#[derive(Debug, Default, Clone)]
pub struct GatherStats {
    /// Total time spent on the gather (milliseconds)
    pub total_duration_ms: u64,

    /// Number of source requests queued, including cache hits
    pub requests_issued: usize,

    /// Requests answered by the gather cache
    pub cache_hits: usize,

    /// Non-primary failures that were logged and skipped
    pub swallowed_failures: usize,

    /// Time spent waiting on each source (milliseconds), keyed by location
    pub source_duration_ms: BTreeMap<String, u64>,
}

/// Errors that end a gather.
#[derive(thiserror::Error, Debug)]
pub enum GatherError {
    /// A source whose failures are fatal could not answer
    #[error("Unable to gather package '{package_id}' from source '{package_source}'")]
    SourceFailure {
        package_id: String,
        package_source: String,
        #[source]
        error: SourceError,
    },

    /// A primary target is on none of the primary sources
    #[error(
        "Package '{package}' is not found in the following primary source(s): '{sources}'. \
         Please verify all your online package sources are available (OR) package id, \
         version are specified correctly."
    )]
    PackageNotFound { package: String, sources: String },

    /// The caller's token fired
    #[error("Gather operation was cancelled")]
    Cancelled,
}

// ============================================================================
// Requests
// ============================================================================

#[derive(Clone)]
struct SourceResource {
    source: PackageSource,
    resource: Arc<dyn DependencyInfoResource>,
}

impl SourceResource {
    fn from_repository(repository: &SourceRepository) -> Option<Self> {
        repository.dependency_info().map(|resource| Self {
            source: repository.package_source.clone(),
            resource: resource.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceScope {
    Primary,
    All,
}

struct GatherRequest {
    order: usize,
    package: PackageIdentity,
    source: SourceResource,
    ignore_exceptions: bool,
    is_installed: bool,
}

struct GatherResult {
    order: usize,
    is_installed: bool,
    packages: Vec<SourcePackageDependencyInfo>,
}

struct FetchOutcome {
    result: GatherResult,
    source: String,
    elapsed: Duration,
    from_cache: bool,
    swallowed: bool,
}

// ============================================================================
// Engine
// ============================================================================

/// Collects dependency metadata for the primary targets, installed packages
/// and everything reachable from them.
///
/// # Example
///
/// ```ignore
/// let packages = ResolverGather::new(context)
///     .with_max_degree_of_parallelism(8)
///     .with_request_timeout(Duration::from_secs(60))
///     .execute(&CancellationToken::new())
///     .await?
///     .packages;
/// ```
pub struct ResolverGather {
    context: GatherContext,

    /// Concurrent source requests (default: 16)
    max_degree_of_parallelism: usize,

    /// Budget for a single source request (default: 5 minutes)
    request_timeout: Duration,
}

impl ResolverGather {
    pub fn new(context: GatherContext) -> Self {
        Self {
            context,
            max_degree_of_parallelism: DEFAULT_MAX_DEGREE_OF_PARALLELISM,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Runs a gather with default settings and returns the package set.
    pub async fn gather(
        context: GatherContext,
        token: &CancellationToken,
    ) -> Result<HashSet<SourcePackageDependencyInfo>, GatherError> {
        let outcome = Self::new(context).execute(token).await?;
        Ok(outcome.packages)
    }

    /// Values below 1 are raised to 1.
    pub fn with_max_degree_of_parallelism(mut self, limit: usize) -> Self {
        self.max_degree_of_parallelism = limit.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn max_degree_of_parallelism(&self) -> usize {
        self.max_degree_of_parallelism
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn context(&self) -> &GatherContext {
        &self.context
    }

    /// Gathers the closure around the primary targets.
    ///
    /// # Errors
    ///
    /// - [`GatherError::SourceFailure`] when a primary source or the packages
    ///   folder fails
    /// - [`GatherError::PackageNotFound`] when a primary target is missing from
    ///   every primary source (not raised in update-all mode)
    /// - [`GatherError::Cancelled`] when `token` fires
    #[instrument(skip_all, fields(targets = self.context.primary_targets.len()))]
    pub async fn execute(&self, token: &CancellationToken) -> Result<GatherOutcome, GatherError> {
        let start = Instant::now();
        if token.is_cancelled() {
            return Err(GatherError::Cancelled);
        }

        let executor = RequestExecutor::new(self.max_degree_of_parallelism, self.request_timeout);
        let mut run = GatherRun::new(&self.context, executor);

        run.queue_primary_targets();
        run.gather_installed_packages(token).await?;

        let expand =
            self.context.resolution_context.dependency_behavior() != DependencyBehavior::Ignore;
        loop {
            run.process_queue(token).await?;

            if expand {
                run.expand_closure();
            }

            if run.queue.is_empty() {
                break;
            }
        }

        if token.is_cancelled() {
            return Err(GatherError::Cancelled);
        }

        let packages = run.combined_results();
        debug!("Total number of results gathered : {}", run.results.len());

        if !self.context.is_update_all {
            run.ensure_primary_targets_found(&packages)?;
        }

        let mut stats = run.stats;
        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        stats.source_duration_ms = run
            .source_time
            .into_iter()
            .map(|(source, elapsed)| (source, elapsed.as_millis() as u64))
            .collect();

        for (source, elapsed_ms) in &stats.source_duration_ms {
            debug!(
                duration_ms = elapsed_ms,
                "Total time taken to gather dependencies from '{}'", source
            );
        }
        info!(
            duration_ms = stats.total_duration_ms,
            packages = packages.len(),
            requests = stats.requests_issued,
            cache_hits = stats.cache_hits,
            "Gathering dependency information completed"
        );

        Ok(GatherOutcome { packages, stats })
    }
}

/// State of one gather.
struct GatherRun<'a> {
    context: &'a GatherContext,
    cache: Arc<GatherCache>,
    executor: RequestExecutor,
    primary_sources: Vec<SourceResource>,
    all_sources: Vec<SourceResource>,
    packages_folder: Option<SourceResource>,

    /// Normalized ids of primary targets, with the identity used in messages
    primary_targets: Vec<(String, String)>,
    ids_searched: HashSet<String>,
    queue: Vec<GatherRequest>,
    results: Vec<GatherResult>,
    next_order: usize,
    stats: GatherStats,
    source_time: HashMap<String, Duration>,
}

impl<'a> GatherRun<'a> {
    fn new(context: &'a GatherContext, executor: RequestExecutor) -> Self {
        let primary_sources = distinct_resources(context.primary_sources.iter());
        let all_sources = distinct_resources(
            context
                .primary_sources
                .iter()
                .chain(std::iter::once(&context.packages_folder_source))
                .chain(context.all_sources.iter()),
        );

        Self {
            context,
            cache: context.resolution_context.gather_cache().clone(),
            executor,
            primary_sources,
            all_sources,
            packages_folder: SourceResource::from_repository(&context.packages_folder_source),
            primary_targets: Vec::new(),
            ids_searched: HashSet::new(),
            queue: Vec::new(),
            results: Vec::new(),
            next_order: 0,
            stats: GatherStats::default(),
            source_time: HashMap::new(),
        }
    }

    fn queue_primary_targets(&mut self) {
        let context = self.context;

        for target in &context.primary_targets {
            let id = target.normalized_id();
            self.ids_searched.insert(id.clone());
            self.add_primary_target(id, target.to_string());
            self.queue_work(SourceScope::Primary, target.clone(), false, false);
        }

        let mut target_ids: Vec<&str> =
            context.primary_target_ids.iter().map(String::as_str).collect();
        if context.is_update_all {
            target_ids.extend(context.installed_packages.iter().map(|p| p.id.as_str()));
        }

        for target_id in target_ids {
            let id = normalize_id(target_id);
            if self.primary_targets.iter().any(|(known, _)| known == &id) {
                continue;
            }
            self.add_primary_target(id, target_id.to_string());
            self.queue_work(
                SourceScope::Primary,
                PackageIdentity::id_only(target_id),
                false,
                false,
            );
        }
    }

    fn add_primary_target(&mut self, id: String, display: String) {
        if !self.primary_targets.iter().any(|(known, _)| known == &id) {
            self.primary_targets.push((id, display));
        }
    }

    /// Resolves installed packages that are not being targeted from the
    /// packages folder. A miss there queues the exact identity on every
    /// source instead.
    async fn gather_installed_packages(
        &mut self,
        token: &CancellationToken,
    ) -> Result<(), GatherError> {
        let context = self.context;
        let mut seen = HashSet::new();
        let installed: Vec<&PackageIdentity> = context
            .installed_packages
            .iter()
            .filter(|package| {
                let id = package.normalized_id();
                !self.primary_targets.iter().any(|(target, _)| target == &id)
            })
            .filter(|package| seen.insert((*package).clone()))
            .collect();

        if installed.is_empty() {
            return Ok(());
        }

        let lookups = installed
            .iter()
            .map(|package| self.resolve_installed(package, token));
        let found = futures::future::join_all(lookups).await;

        for (package, lookup) in installed.into_iter().zip(found) {
            match lookup? {
                Some(info) => {
                    let order = self.next_order;
                    self.next_order += 1;
                    self.results.push(GatherResult {
                        order,
                        is_installed: true,
                        packages: vec![info],
                    });
                }
                None => self.queue_work(SourceScope::All, package.clone(), true, true),
            }
        }

        Ok(())
    }

    async fn resolve_installed(
        &self,
        package: &PackageIdentity,
        token: &CancellationToken,
    ) -> Result<Option<SourcePackageDependencyInfo>, GatherError> {
        let Some(folder) = &self.packages_folder else {
            return Ok(None);
        };
        if !package.has_version() {
            return Ok(None);
        }

        let framework = &self.context.target_framework;
        let cache_context = &self.context.resolution_context.source_cache_context;
        let resource = &folder.resource;

        let started = Instant::now();
        let lookup = self
            .executor
            .execute(&folder.source.source, token, |request_token| async move {
                resource
                    .resolve_package(package, framework, cache_context, &request_token)
                    .await
            })
            .await;
        debug!(
            duration_ms = started.elapsed().as_millis() as u64,
            package = %package,
            "Packages folder lookup finished"
        );

        match lookup {
            Ok(info) => Ok(info.map(|info| attribute(info, &folder.source))),
            Err(SourceError::Cancelled) => Err(GatherError::Cancelled),
            Err(error) => Err(GatherError::SourceFailure {
                package_id: package.id.clone(),
                package_source: folder.source.source.clone(),
                error,
            }),
        }
    }

    /// Queues one request per eligible source. An id without a version is
    /// only queued the first time it is seen.
    fn queue_work(
        &mut self,
        scope: SourceScope,
        package: PackageIdentity,
        ignore_exceptions: bool,
        is_installed: bool,
    ) {
        let configured = self.configured_sources(&package.id);

        if !package.has_version() && !self.ids_searched.insert(package.normalized_id()) {
            return;
        }

        let sources = match scope {
            SourceScope::Primary => &self.primary_sources,
            SourceScope::All => &self.all_sources,
        };

        for source in sources {
            if let Some(configured) = &configured {
                if !configured
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(&source.source.name))
                {
                    continue;
                }
            }

            let order = self.next_order;
            self.next_order += 1;
            self.queue.push(GatherRequest {
                order,
                package: package.clone(),
                source: source.clone(),
                ignore_exceptions,
                is_installed,
            });
        }
    }

    /// Source names allowed for `package_id`, or `None` when mapping is off.
    fn configured_sources(&self, package_id: &str) -> Option<Vec<String>> {
        let mapping = self
            .context
            .package_source_mapping
            .as_ref()
            .filter(|mapping| mapping.is_enabled())?;

        let configured = mapping.get_configured_package_sources(package_id);
        if configured.is_empty() {
            debug!("Package source mapping match not found for package ID '{}'", package_id);
        } else {
            debug!(
                "Package source mapping matches found for package ID '{}' are: '{}'",
                package_id,
                configured.join(", ")
            );
        }
        Some(configured)
    }

    /// Runs every queued request. The first fatal failure stops the round and
    /// drops the requests still in flight.
    async fn process_queue(&mut self, token: &CancellationToken) -> Result<(), GatherError> {
        if token.is_cancelled() {
            return Err(GatherError::Cancelled);
        }
        if self.queue.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.queue);
        self.stats.requests_issued += batch.len();

        let mut completed = Vec::with_capacity(batch.len());
        {
            let mut pending: FuturesUnordered<_> = batch
                .into_iter()
                .map(|request| self.gather_package(request, token))
                .collect();

            while let Some(outcome) = pending.next().await {
                completed.push(outcome?);
            }
        }

        for outcome in completed {
            if outcome.from_cache {
                self.stats.cache_hits += 1;
            }
            if outcome.swallowed {
                self.stats.swallowed_failures += 1;
            }
            *self.source_time.entry(outcome.source).or_default() += outcome.elapsed;
            self.results.push(outcome.result);
        }
        self.results.sort_by_key(|result| result.order);

        Ok(())
    }

    async fn gather_package(
        &self,
        request: GatherRequest,
        token: &CancellationToken,
    ) -> Result<FetchOutcome, GatherError> {
        if token.is_cancelled() {
            return Err(GatherError::Cancelled);
        }

        let framework = &self.context.target_framework;
        let source = &request.source.source;
        let package = &request.package;

        let cached = match package.version {
            Some(_) => self.cache.get_package(source, package, framework),
            None => self.cache.get_packages(source, &package.id, framework),
        };
        if cached.has_entry {
            debug!(package = %package, source = %source, "Found cached dependency info");
            return Ok(FetchOutcome {
                source: source.source.clone(),
                elapsed: Duration::ZERO,
                from_cache: true,
                swallowed: false,
                result: GatherResult {
                    order: request.order,
                    is_installed: request.is_installed,
                    packages: cached.packages,
                },
            });
        }

        let cache_context = &self.context.resolution_context.source_cache_context;
        let resource = &request.source.resource;

        let started = Instant::now();
        let fetched = self
            .executor
            .execute(&source.source, token, |request_token| async move {
                match package.version {
                    Some(_) => resource
                        .resolve_package(package, framework, cache_context, &request_token)
                        .await
                        .map(|info| info.into_iter().collect::<Vec<_>>()),
                    None => {
                        resource
                            .resolve_packages(&package.id, framework, cache_context, &request_token)
                            .await
                    }
                }
            })
            .await;
        let elapsed = started.elapsed();

        let packages = match fetched {
            Ok(packages) => {
                let packages: Vec<_> = packages
                    .into_iter()
                    .map(|info| attribute(info, source))
                    .collect();
                match package.version {
                    Some(_) => self.cache.add_package_from_single_version_lookup(
                        source,
                        package,
                        framework,
                        packages.first().cloned(),
                    ),
                    None => self
                        .cache
                        .add_all_packages_for_id(source, &package.id, framework, packages.clone()),
                }
                packages
            }
            Err(SourceError::Cancelled) => return Err(GatherError::Cancelled),
            Err(error) if request.ignore_exceptions => {
                warn!(
                    package = %package,
                    source = %source,
                    error = %error,
                    "Unable to gather dependency information, skipping source"
                );
                return Ok(FetchOutcome {
                    source: source.source.clone(),
                    elapsed,
                    from_cache: false,
                    swallowed: true,
                    result: GatherResult {
                        order: request.order,
                        is_installed: request.is_installed,
                        packages: Vec::new(),
                    },
                });
            }
            Err(error) => {
                return Err(GatherError::SourceFailure {
                    package_id: package.id.clone(),
                    package_source: source.source.clone(),
                    error,
                })
            }
        };

        Ok(FetchOutcome {
            source: source.source.clone(),
            elapsed,
            from_cache: false,
            swallowed: false,
            result: GatherResult {
                order: request.order,
                is_installed: request.is_installed,
                packages,
            },
        })
    }

    /// Queues every id in the closure around the searched ids that has not
    /// been searched yet.
    fn expand_closure(&mut self) {
        let mut current = self.ordered_results(|_| true);

        if !self.context.allow_downgrades {
            for installed in &self.context.installed_packages {
                let Some(installed_version) = &installed.version else {
                    continue;
                };
                current.retain(|package| {
                    !(package.id.eq_ignore_ascii_case(&installed.id)
                        && &package.version < installed_version)
                });
            }
        }

        let installed_info = self.ordered_results(|result| result.is_installed);
        let closure = get_closure(&current, &installed_info, &self.ids_searched);

        for (id, display) in closure {
            if !self.ids_searched.contains(&id) {
                self.queue_work(SourceScope::All, PackageIdentity::id_only(display), true, false);
            }
        }
    }

    /// Packages from the matching results in request order, first one wins.
    fn ordered_results<P>(&self, include: P) -> HashSet<SourcePackageDependencyInfo>
    where
        P: Fn(&GatherResult) -> bool,
    {
        let mut merged = HashSet::new();
        for result in self.results.iter().filter(|result| include(result)) {
            for package in &result.packages {
                if !merged.contains(package) {
                    merged.insert(package.clone());
                }
            }
        }
        merged
    }

    fn combined_results(&self) -> HashSet<SourcePackageDependencyInfo> {
        self.ordered_results(|_| true)
    }

    fn ensure_primary_targets_found(
        &self,
        packages: &HashSet<SourcePackageDependencyInfo>,
    ) -> Result<(), GatherError> {
        for (id, display) in &self.primary_targets {
            if !packages.iter().any(|package| package.id.eq_ignore_ascii_case(id)) {
                let sources = self
                    .primary_sources
                    .iter()
                    .map(|resource| resource.source.source.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                return Err(GatherError::PackageNotFound {
                    package: display.clone(),
                    sources,
                });
            }
        }
        Ok(())
    }
}

/// Sources that expose dependency info, first occurrence of each kept.
fn distinct_resources<'r>(
    repositories: impl Iterator<Item = &'r SourceRepository>,
) -> Vec<SourceResource> {
    let mut seen = HashSet::new();
    repositories
        .filter(|repository| seen.insert(repository.package_source.clone()))
        .filter_map(SourceResource::from_repository)
        .collect()
}

fn attribute(
    info: SourcePackageDependencyInfo,
    source: &PackageSource,
) -> SourcePackageDependencyInfo {
    if info.source.is_some() {
        info
    } else {
        info.with_source(source.clone())
    }
}

/// Ids around the searched set, keyed by normalized id:
/// - dependencies of packages whose id was searched
/// - parents of searched ids
/// - installed ids missing from the results
/// - dependency ids missing from the results
fn get_closure(
    current: &HashSet<SourcePackageDependencyInfo>,
    installed: &HashSet<SourcePackageDependencyInfo>,
    ids_searched: &HashSet<String>,
) -> BTreeMap<String, String> {
    let mut closure = BTreeMap::new();
    let mut add = |id: &str| {
        closure.entry(normalize_id(id)).or_insert_with(|| id.to_string());
    };

    let result_ids: HashSet<String> = current
        .iter()
        .map(|package| normalize_id(&package.id))
        .collect();

    for package in current {
        if ids_searched.contains(&normalize_id(&package.id)) {
            for dependency in &package.dependencies {
                add(&dependency.id);
            }
        }

        if package
            .dependencies
            .iter()
            .any(|dependency| ids_searched.contains(&normalize_id(&dependency.id)))
        {
            add(&package.id);
        }
    }

    for package in installed {
        if !result_ids.contains(&normalize_id(&package.id)) {
            add(&package.id);
        }
    }

    for package in current {
        for dependency in &package.dependencies {
            if !result_ids.contains(&normalize_id(&dependency.id)) {
                add(&dependency.id);
            }
        }
    }

    closure
}

// ============================================================================
// Tests
// ============================================================================
