//! Vulnerability audit of restored packages.
//!
//! Sources publish advisories through
//! [`VulnerabilityInfoResource`](crate::traits::VulnerabilityInfoResource).
//! The checker merges them, matches them against restored packages and turns
//! matches into per-project warnings.

pub mod checker;
pub mod model;

pub use checker::{
    create_warnings, find_packages_with_known_vulnerabilities, get_all_vulnerability_data,
    get_known_vulnerabilities, get_severity_label_and_code, AuditChecker,
};
pub use model::{
    AggregateError, AuditCheckResult, AuditCounters, AuditError, GetVulnerabilityInfoResult,
    LogCode, LogLevel, LogMessage, PackageAuditInfo, PackageRestoreData, PackageVulnerabilityInfo,
    PackageVulnerabilitySeverity, ProjectAuditSettings, RestoreAuditProperties,
    VulnerabilityDatabase,
};
