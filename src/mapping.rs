//! Package source mapping: which sources may serve which package ids.
//!
//! Each configured source carries a list of id patterns. A pattern is either
//! an exact id (`Contoso.Core`), a prefix ending in `*` (`Contoso.*`), or the
//! global `*`. For a given id, the most specific matching pattern wins and
//! every source that declares a pattern of that specificity is eligible.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMappingEntry {
    /// Source name as it appears on [`PackageSource::name`](crate::source::PackageSource)
    pub source: String,

    /// Id patterns routed to this source
    pub patterns: Vec<String>,
}

/// Pattern-to-source routing table.
///
/// Serialized as the list of entries. Deserialization goes through
/// [`PackageSourceMapping::new`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<SourceMappingEntry>", into = "Vec<SourceMappingEntry>")]
pub struct PackageSourceMapping {
    entries: Vec<SourceMappingEntry>,
}

/// How well a pattern matched an id. Exact beats any prefix; longer prefixes
/// beat shorter ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Specificity {
    Prefix(usize),
    Exact,
}

impl PackageSourceMapping {
    pub fn new(entries: Vec<SourceMappingEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| SourceMappingEntry {
                source: entry.source.trim().to_string(),
                patterns: entry
                    .patterns
                    .iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
            })
            .collect();
        Self { entries }
    }

    /// Parses the compact `source,pattern,pattern|source,pattern` form.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .split('|')
            .filter(|chunk| !chunk.trim().is_empty())
            .map(|chunk| {
                let mut parts = chunk.split(',');
                let source = parts.next().unwrap_or_default().to_string();
                SourceMappingEntry {
                    source,
                    patterns: parts.map(str::to_string).collect(),
                }
            })
            .collect();
        Self::new(entries)
    }

    pub fn is_enabled(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn entries(&self) -> &[SourceMappingEntry] {
        &self.entries
    }

    /// Source names eligible for `package_id`, in configuration order.
    /// Empty when no pattern matches.
    pub fn get_configured_package_sources(&self, package_id: &str) -> Vec<String> {
        let id = package_id.trim();
        let mut best: Option<Specificity> = None;
        let mut sources: Vec<String> = Vec::new();

        for entry in &self.entries {
            let Some(score) = entry
                .patterns
                .iter()
                .filter_map(|pattern| match_pattern(pattern, id))
                .max()
            else {
                continue;
            };

            match best {
                Some(current) if score < current => {}
                Some(current) if score == current => {
                    if !sources.iter().any(|s| s.eq_ignore_ascii_case(&entry.source)) {
                        sources.push(entry.source.clone());
                    }
                }
                _ => {
                    best = Some(score);
                    sources.clear();
                    sources.push(entry.source.clone());
                }
            }
        }

        sources
    }
}

impl From<Vec<SourceMappingEntry>> for PackageSourceMapping {
    fn from(entries: Vec<SourceMappingEntry>) -> Self {
        Self::new(entries)
    }
}

impl From<PackageSourceMapping> for Vec<SourceMappingEntry> {
    fn from(mapping: PackageSourceMapping) -> Self {
        mapping.entries
    }
}

fn match_pattern(pattern: &str, id: &str) -> Option<Specificity> {
    match pattern.strip_suffix('*') {
        Some(prefix) => {
            let matches = id.len() >= prefix.len()
                && id.is_char_boundary(prefix.len())
                && id[..prefix.len()].eq_ignore_ascii_case(prefix);
            matches.then_some(Specificity::Prefix(prefix.len()))
        }
        None => pattern
            .eq_ignore_ascii_case(id)
            .then_some(Specificity::Exact),
    }
}
