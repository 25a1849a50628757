use crate::audit::model::{
    AggregateError, AuditCheckResult, AuditCounters, AuditError, GetVulnerabilityInfoResult,
    LogCode, LogMessage, PackageAuditInfo, PackageRestoreData, PackageVulnerabilityInfo,
    PackageVulnerabilitySeverity, ProjectAuditSettings, RestoreAuditProperties,
    VulnerabilityDatabase,
};
use crate::model::PackageIdentity;
use crate::source::{SourceCacheContext, SourceRepository};
use crate::version::PackageVersion;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Checks restored packages against the vulnerability data published by
/// package sources, or by dedicated audit sources when any are configured.
#[derive(Debug, Clone)]
pub struct AuditChecker {
    package_sources: Vec<SourceRepository>,
    audit_sources: Vec<SourceRepository>,
    cache_context: SourceCacheContext,
}

impl AuditChecker {
    pub fn new(
        package_sources: Vec<SourceRepository>,
        audit_sources: Vec<SourceRepository>,
        cache_context: SourceCacheContext,
    ) -> Self {
        Self {
            package_sources,
            audit_sources,
            cache_context,
        }
    }

    /// Reports every known advisory affecting `packages`.
    ///
    /// `restore_audit_properties` maps project paths to their audit settings.
    /// With no settings at all every project is audited. When settings exist
    /// but none enable auditing, no source is contacted.
    #[instrument(skip_all, fields(packages = packages.len()))]
    pub async fn check_package_vulnerabilities(
        &self,
        packages: &[PackageRestoreData],
        restore_audit_properties: &HashMap<String, RestoreAuditProperties>,
        token: &CancellationToken,
    ) -> Result<AuditCheckResult, AuditError> {
        let mut any_project_enabled = restore_audit_properties.is_empty();
        let mut audit_settings = HashMap::with_capacity(restore_audit_properties.len());
        for (project_path, properties) in restore_audit_properties {
            if properties.parse_enable_audit().is_none() {
                debug!(
                    project = %project_path,
                    "Unrecognized audit enable value {:?}", properties.enable_audit
                );
            }
            if properties.parse_audit_level().is_none() {
                debug!(
                    project = %project_path,
                    "Unrecognized audit level {:?}", properties.audit_level
                );
            }

            let settings = ProjectAuditSettings::from_properties(properties);
            any_project_enabled |= settings.is_audit_enabled;
            audit_settings.insert(project_path.clone(), settings);
        }

        if !any_project_enabled {
            debug!("No project enables auditing, skipping vulnerability check");
            return Ok(AuditCheckResult::disabled());
        }

        let download_start = Instant::now();
        let (sources_with_data, vulnerability_data) = get_all_vulnerability_data(
            &self.package_sources,
            &self.audit_sources,
            &self.cache_context,
            token,
        )
        .await?;
        let download_duration_ms = download_start.elapsed().as_millis() as u64;

        if let Some(errors) = vulnerability_data
            .as_ref()
            .and_then(|data| data.exceptions.as_ref())
        {
            for error in errors.errors() {
                LogMessage::warning(
                    LogCode::NU1900,
                    format!("Error occurred while getting package vulnerability data: {}", error),
                )
                .log();
            }
        }

        let known_vulnerabilities = vulnerability_data
            .and_then(|data| data.known_vulnerabilities)
            .filter(|databases| databases.iter().any(|database| !database.is_empty()));

        let Some(known_vulnerabilities) = known_vulnerabilities else {
            debug!(duration_ms = download_duration_ms, "No vulnerability data found");
            return Ok(AuditCheckResult {
                download_duration_ms: Some(download_duration_ms),
                sources_with_vulnerabilities: Some(sources_with_data),
                ..AuditCheckResult::new(Vec::new())
            });
        };

        let check_start = Instant::now();
        let mut counters = AuditCounters::default();
        let mut reported = Vec::new();
        let warnings =
            match find_packages_with_known_vulnerabilities(&known_vulnerabilities, packages, None) {
                Some(vulnerable) => {
                    create_warnings(&vulnerable, &mut audit_settings, &mut counters, &mut reported)
                }
                None => Vec::new(),
            };

        for warning in &warnings {
            warning.log();
        }

        let check_packages_duration_ms = check_start.elapsed().as_millis() as u64;
        info!(
            download_ms = download_duration_ms,
            check_ms = check_packages_duration_ms,
            warnings = warnings.len(),
            vulnerable_packages = reported.len(),
            "Vulnerability audit completed"
        );

        Ok(AuditCheckResult {
            warnings,
            is_audit_enabled: true,
            counters,
            packages: reported,
            download_duration_ms: Some(download_duration_ms),
            check_packages_duration_ms: Some(check_packages_duration_ms),
            sources_with_vulnerabilities: Some(sources_with_data),
        })
    }
}

// ============================================================================
// Fetching vulnerability data
// ============================================================================

/// Fetches vulnerability data from every source concurrently.
///
/// Audit sources replace package sources when any are given. Returns how many
/// sources supplied data, and the merged data in source order with all source
/// failures aggregated. The merged result is `None` when no source returned
/// either data or an error.
#[instrument(
    skip_all,
    fields(
        package_sources = package_sources.len(),
        audit_sources = audit_sources.len()
    )
)]
pub async fn get_all_vulnerability_data(
    package_sources: &[SourceRepository],
    audit_sources: &[SourceRepository],
    cache_context: &SourceCacheContext,
    token: &CancellationToken,
) -> Result<(usize, Option<GetVulnerabilityInfoResult>), AuditError> {
    let using_audit_sources = !audit_sources.is_empty();
    let sources = if using_audit_sources {
        audit_sources
    } else {
        package_sources
    };

    let results = join_all(
        sources
            .iter()
            .map(|source| fetch_vulnerability_info(source, cache_context, token)),
    )
    .await;

    if token.is_cancelled() {
        return Err(AuditError::Cancelled);
    }

    let mut sources_with_data = 0;
    let mut known_vulnerabilities: Option<Vec<VulnerabilityDatabase>> = None;
    let mut errors: Option<Vec<_>> = None;

    for (source, result) in sources.iter().zip(results) {
        let Some(result) = result else {
            if using_audit_sources {
                LogMessage::warning(
                    LogCode::NU1905,
                    format!(
                        "Audit source '{}' did not provide any vulnerability data.",
                        source.name()
                    ),
                )
                .log();
            }
            continue;
        };

        if let Some(databases) = result.known_vulnerabilities {
            sources_with_data += 1;
            known_vulnerabilities
                .get_or_insert_with(Vec::new)
                .extend(databases);
        }

        if let Some(exceptions) = result.exceptions {
            errors
                .get_or_insert_with(Vec::new)
                .extend(exceptions.into_errors());
        }
    }

    let merged = match (known_vulnerabilities, errors) {
        (None, None) => None,
        (known, errors) => Some(GetVulnerabilityInfoResult::new(
            known,
            errors.map(AggregateError::new),
        )),
    };

    Ok((sources_with_data, merged))
}

async fn fetch_vulnerability_info(
    source: &SourceRepository,
    cache_context: &SourceCacheContext,
    token: &CancellationToken,
) -> Option<GetVulnerabilityInfoResult> {
    let resource = source.vulnerability_info()?;
    match resource.get_vulnerability_info(cache_context, token).await {
        Ok(result) => Some(result),
        Err(error) => {
            debug!(source = %source.package_source, "Vulnerability data request failed: {}", error);
            Some(GetVulnerabilityInfoResult::from_error(error))
        }
    }
}

// ============================================================================
// Matching packages
// ============================================================================

fn lookup<'a>(
    database: &'a VulnerabilityDatabase,
    package_id: &str,
) -> Option<&'a Vec<PackageVulnerabilityInfo>> {
    database.get(package_id).or_else(|| {
        database
            .iter()
            .find(|(id, _)| id.eq_ignore_ascii_case(package_id))
            .map(|(_, entries)| entries)
    })
}

/// Advisories in any database whose range contains `version`.
///
/// Advisories are unique by URL; the first database listing one wins. The
/// result is sorted by ascending severity and is `None` rather than empty.
pub fn get_known_vulnerabilities(
    package_id: &str,
    version: &PackageVersion,
    known_vulnerabilities: &[VulnerabilityDatabase],
) -> Option<Vec<PackageVulnerabilityInfo>> {
    let mut seen = HashSet::new();
    let mut matches = Vec::new();

    for database in known_vulnerabilities {
        let Some(entries) = lookup(database, package_id) else {
            continue;
        };
        for entry in entries {
            if entry.versions.satisfies(version) && seen.insert(entry.url.clone()) {
                matches.push(entry.clone());
            }
        }
    }

    if matches.is_empty() {
        return None;
    }

    matches.sort_by_key(|entry| entry.severity);
    Some(matches)
}

/// Maps each affected package to its advisories and referencing projects.
///
/// With `minimum_severity`, lower advisories are dropped and so are packages
/// left with none. `None` when nothing is affected.
pub fn find_packages_with_known_vulnerabilities(
    known_vulnerabilities: &[VulnerabilityDatabase],
    packages: &[PackageRestoreData],
    minimum_severity: Option<PackageVulnerabilitySeverity>,
) -> Option<HashMap<PackageIdentity, PackageAuditInfo>> {
    let mut result: HashMap<PackageIdentity, PackageAuditInfo> = HashMap::new();

    for package in packages {
        let Some(version) = &package.identity.version else {
            continue;
        };
        let Some(mut vulnerabilities) =
            get_known_vulnerabilities(&package.identity.id, version, known_vulnerabilities)
        else {
            continue;
        };

        if let Some(minimum) = minimum_severity {
            vulnerabilities.retain(|vulnerability| vulnerability.severity >= minimum);
            if vulnerabilities.is_empty() {
                continue;
            }
        }

        let audit_info = result
            .entry(package.identity.clone())
            .or_insert_with(|| PackageAuditInfo::new(package.identity.clone(), Vec::new()));

        for project in &package.project_paths {
            if !audit_info.projects.contains(project) {
                audit_info.projects.push(project.clone());
            }
        }
        for vulnerability in vulnerabilities {
            if !audit_info.vulnerabilities.iter().any(|v| v.url == vulnerability.url) {
                audit_info.vulnerabilities.push(vulnerability);
            }
        }
    }

    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

// ============================================================================
// Warnings
// ============================================================================

pub fn get_severity_label_and_code(
    severity: PackageVulnerabilitySeverity,
) -> (&'static str, LogCode) {
    match severity {
        PackageVulnerabilitySeverity::Low => ("low", LogCode::NU1901),
        PackageVulnerabilitySeverity::Moderate => ("moderate", LogCode::NU1902),
        PackageVulnerabilitySeverity::High => ("high", LogCode::NU1903),
        PackageVulnerabilitySeverity::Critical => ("critical", LogCode::NU1904),
        PackageVulnerabilitySeverity::Unknown => ("unknown", LogCode::NU1900),
    }
}

/// Builds one warning per advisory and affected project, in package id order.
///
/// A project listed in `audit_settings` only gets warnings its settings allow,
/// and suppressed advisories are counted instead of reported. A package with
/// no project paths gets warnings without one. Each reported package adds to
/// exactly one severity bucket, chosen by its first reported advisory, and is
/// appended to `reported`.
pub fn create_warnings(
    packages_with_known_vulnerabilities: &HashMap<PackageIdentity, PackageAuditInfo>,
    audit_settings: &mut HashMap<String, ProjectAuditSettings>,
    counters: &mut AuditCounters,
    reported: &mut Vec<PackageIdentity>,
) -> Vec<LogMessage> {
    let mut ordered: Vec<&PackageAuditInfo> =
        packages_with_known_vulnerabilities.values().collect();
    ordered.sort_by(|a, b| {
        a.identity
            .id
            .cmp(&b.identity.id)
            .then_with(|| a.identity.version.cmp(&b.identity.version))
    });

    let mut warnings = Vec::new();
    for audit_info in ordered {
        let package = &audit_info.identity;
        let version = package
            .version
            .as_ref()
            .map(PackageVersion::to_normalized_string)
            .unwrap_or_default();
        let mut counted = false;

        for vulnerability in &audit_info.vulnerabilities {
            let (label, code) = get_severity_label_and_code(vulnerability.severity);
            let message = format!(
                "Package '{}' {} has a known {} severity vulnerability, {}",
                package.id, version, label, vulnerability.url
            );

            if audit_info.projects.is_empty() {
                if !counted {
                    counters.record(vulnerability.severity);
                    counted = true;
                }
                warnings.push(LogMessage::warning(code, message));
                continue;
            }

            for project_path in &audit_info.projects {
                if let Some(settings) = audit_settings.get_mut(project_path) {
                    if !settings.reports(vulnerability.severity) {
                        continue;
                    }
                    if settings.suppress(&vulnerability.url, counters) {
                        continue;
                    }
                }

                if !counted {
                    counters.record(vulnerability.severity);
                    counted = true;
                }
                warnings.push(
                    LogMessage::warning(code, message.clone())
                        .with_project_path(project_path.clone()),
                );
            }
        }

        if counted {
            reported.push(package.clone());
        }
    }

    warnings
}
