use crate::model::PackageIdentity;
use crate::traits::SourceError;
use crate::version::VersionRange;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use url::Url;

// ============================================================================
// Vulnerability data
// ============================================================================

/// Advisory severity. Ordered from `Unknown` up to `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageVulnerabilitySeverity {
    Unknown = -1,
    Low = 0,
    Moderate = 1,
    High = 2,
    Critical = 3,
}

impl PackageVulnerabilitySeverity {
    /// Parses an audit level name (`low`, `moderate`, `high`, `critical`).
    pub fn parse_level(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "moderate" => Some(Self::Moderate),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// One advisory: where it is published, how bad it is and which versions it
/// affects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVulnerabilityInfo {
    pub url: Url,
    pub severity: PackageVulnerabilitySeverity,
    pub versions: VersionRange,
}

impl PackageVulnerabilityInfo {
    pub fn new(url: Url, severity: PackageVulnerabilitySeverity, versions: VersionRange) -> Self {
        Self {
            url,
            severity,
            versions,
        }
    }
}

/// Advisories keyed by package id, as published in one vulnerability file.
pub type VulnerabilityDatabase = HashMap<String, Vec<PackageVulnerabilityInfo>>;

/// Several source failures reported together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateError {
    errors: Vec<SourceError>,
}

impl AggregateError {
    pub fn new(errors: Vec<SourceError>) -> Self {
        Self { errors }
    }

    pub fn single(error: SourceError) -> Self {
        Self {
            errors: vec![error],
        }
    }

    pub fn errors(&self) -> &[SourceError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<SourceError> {
        self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "One or more errors occurred.")?;
        for error in &self.errors {
            write!(f, " ({})", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// What a source returned for a vulnerability data request.
///
/// `known_vulnerabilities` is `None` when the source had no data, which is
/// different from data with no entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetVulnerabilityInfoResult {
    pub known_vulnerabilities: Option<Vec<VulnerabilityDatabase>>,
    pub exceptions: Option<AggregateError>,
}

impl GetVulnerabilityInfoResult {
    pub fn new(
        known_vulnerabilities: Option<Vec<VulnerabilityDatabase>>,
        exceptions: Option<AggregateError>,
    ) -> Self {
        Self {
            known_vulnerabilities,
            exceptions,
        }
    }

    pub fn from_error(error: SourceError) -> Self {
        Self::new(None, Some(AggregateError::single(error)))
    }
}

// ============================================================================
// Packages and project settings
// ============================================================================

/// A restored package and the projects referencing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRestoreData {
    pub identity: PackageIdentity,

    /// Project paths; may be empty for implicit references
    #[serde(default)]
    pub project_paths: Vec<String>,
}

impl PackageRestoreData {
    pub fn new(identity: PackageIdentity, project_paths: Vec<String>) -> Self {
        Self {
            identity,
            project_paths,
        }
    }
}

/// A package with at least one applicable advisory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageAuditInfo {
    pub identity: PackageIdentity,
    pub projects: Vec<String>,
    pub vulnerabilities: Vec<PackageVulnerabilityInfo>,
}

impl PackageAuditInfo {
    pub fn new(identity: PackageIdentity, projects: Vec<String>) -> Self {
        Self {
            identity,
            projects,
            vulnerabilities: Vec::new(),
        }
    }
}

/// Audit configuration as written in a project file. Values are raw text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreAuditProperties {
    /// `true`, `enable`, `default`, `false` or `disable`
    pub enable_audit: Option<String>,

    /// Minimum severity to report
    pub audit_level: Option<String>,

    /// Advisory URLs that never produce warnings
    pub suppressed_advisories: Option<HashSet<String>>,
}

impl RestoreAuditProperties {
    /// `None` when the value is not recognized. Unset means enabled.
    pub fn parse_enable_audit(&self) -> Option<bool> {
        let Some(value) = self.enable_audit.as_deref().map(str::trim) else {
            return Some(true);
        };
        match value.to_ascii_lowercase().as_str() {
            "" | "true" | "enable" | "default" => Some(true),
            "false" | "disable" => Some(false),
            _ => None,
        }
    }

    /// `None` when the value is not recognized. Unset means `Low`.
    pub fn parse_audit_level(&self) -> Option<PackageVulnerabilitySeverity> {
        match self.audit_level.as_deref().map(str::trim) {
            None | Some("") => Some(PackageVulnerabilitySeverity::Low),
            Some(level) => PackageVulnerabilitySeverity::parse_level(level),
        }
    }
}

/// Parsed audit settings for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectAuditSettings {
    pub is_audit_enabled: bool,
    pub minimum_severity: PackageVulnerabilitySeverity,

    /// Canonical advisory URL -> whether it has suppressed a warning yet
    pub suppressed_advisories: Option<HashMap<String, bool>>,
}

impl ProjectAuditSettings {
    pub fn new(
        is_audit_enabled: bool,
        minimum_severity: PackageVulnerabilitySeverity,
        suppressed_advisories: Option<HashSet<String>>,
    ) -> Self {
        Self {
            is_audit_enabled,
            minimum_severity,
            suppressed_advisories: suppressed_advisories.map(|advisories| {
                advisories
                    .iter()
                    .map(|url| (canonical_advisory_key(url), false))
                    .collect()
            }),
        }
    }

    /// Unrecognized values fall back to enabled and `Low`.
    pub fn from_properties(properties: &RestoreAuditProperties) -> Self {
        Self::new(
            properties.parse_enable_audit().unwrap_or(true),
            properties
                .parse_audit_level()
                .unwrap_or(PackageVulnerabilitySeverity::Low),
            properties.suppressed_advisories.clone(),
        )
    }

    pub fn reports(&self, severity: PackageVulnerabilitySeverity) -> bool {
        self.is_audit_enabled && severity >= self.minimum_severity
    }

    /// Returns whether `advisory` is suppressed, counting the suppression.
    pub fn suppress(&mut self, advisory: &Url, counters: &mut AuditCounters) -> bool {
        let Some(used) = self
            .suppressed_advisories
            .as_mut()
            .and_then(|advisories| advisories.get_mut(advisory.as_str()))
        else {
            return false;
        };

        counters.total_warnings_suppressed += 1;
        if !*used {
            *used = true;
            counters.distinct_advisories_suppressed += 1;
        }
        true
    }
}

/// Configured advisories are matched in parsed form, so `https://Contoso.test`
/// and `https://contoso.test/` are one advisory. Text that is not a URL is
/// kept trimmed and can never match.
fn canonical_advisory_key(configured: &str) -> String {
    let trimmed = configured.trim();
    Url::parse(trimmed)
        .map(String::from)
        .unwrap_or_else(|_| trimmed.to_string())
}

// ============================================================================
// Results
// ============================================================================

/// Warning tallies for one audit run.
///
/// Severity buckets count packages, not advisories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditCounters {
    pub low: usize,
    pub moderate: usize,
    pub high: usize,
    pub critical: usize,
    pub invalid: usize,
    pub total_warnings_suppressed: usize,
    pub distinct_advisories_suppressed: usize,
}

impl AuditCounters {
    pub fn record(&mut self, severity: PackageVulnerabilitySeverity) {
        match severity {
            PackageVulnerabilitySeverity::Low => self.low += 1,
            PackageVulnerabilitySeverity::Moderate => self.moderate += 1,
            PackageVulnerabilitySeverity::High => self.high += 1,
            PackageVulnerabilitySeverity::Critical => self.critical += 1,
            PackageVulnerabilitySeverity::Unknown => self.invalid += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogCode {
    /// Vulnerability data could not be fetched, or severity unknown
    NU1900,
    NU1901,
    NU1902,
    NU1903,
    NU1904,
    /// Audit source provides no vulnerability data
    NU1905,
}

impl fmt::Display for LogCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Warning,
    Error,
}

/// A diagnostic produced by the audit, optionally tied to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub code: LogCode,
    pub level: LogLevel,
    pub message: String,
    pub project_path: Option<String>,
}

impl LogMessage {
    pub fn warning(code: LogCode, message: impl Into<String>) -> Self {
        Self {
            code,
            level: LogLevel::Warning,
            message: message.into(),
            project_path: None,
        }
    }

    pub fn with_project_path(mut self, project_path: impl Into<String>) -> Self {
        self.project_path = Some(project_path.into());
        self
    }

    /// Emits the message as a tracing event.
    pub fn log(&self) {
        let project = self.project_path.as_deref().unwrap_or("");
        match self.level {
            LogLevel::Warning => {
                tracing::warn!(code = %self.code, project, "{}", self.message)
            }
            LogLevel::Error => {
                tracing::error!(code = %self.code, project, "{}", self.message)
            }
        }
    }
}

/// Outcome of one [`AuditChecker`] run.
///
/// [`AuditChecker`]: crate::audit::AuditChecker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditCheckResult {
    pub warnings: Vec<LogMessage>,
    pub is_audit_enabled: bool,
    pub counters: AuditCounters,

    /// Packages with at least one reported advisory
    pub packages: Vec<PackageIdentity>,

    /// Unset when no data was fetched
    pub download_duration_ms: Option<u64>,

    /// Unset when no packages were checked
    pub check_packages_duration_ms: Option<u64>,

    /// Sources that returned vulnerability data
    pub sources_with_vulnerabilities: Option<usize>,
}

impl AuditCheckResult {
    pub fn new(warnings: Vec<LogMessage>) -> Self {
        Self {
            warnings,
            is_audit_enabled: true,
            counters: AuditCounters::default(),
            packages: Vec::new(),
            download_duration_ms: None,
            check_packages_duration_ms: None,
            sources_with_vulnerabilities: None,
        }
    }

    pub fn disabled() -> Self {
        Self {
            is_audit_enabled: false,
            ..Self::new(Vec::new())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("Audit was cancelled")]
    Cancelled,
}
