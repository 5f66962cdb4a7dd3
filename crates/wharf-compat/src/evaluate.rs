//! Turns one or more compatibility manifests into a single aggregated
//! report for an upgrade hop.

use anyhow::anyhow;

use crate::fetch::{FetchError, ManifestFetcher};
use crate::manifest::{BreakingChange, ChangeCategory, CompatibilityManifest};
use crate::semver::{Range, Version};

/// Above this many deduplicated breaking changes the report recommends
/// stepping through intermediate releases instead of one hop.
pub const STEP_THROUGH_THRESHOLD: usize = 5;

/// Derived, ephemeral. `breaking` holds iff at least one breaking change's
/// range contains `from_version`.
#[derive(Debug, Clone)]
pub struct CompatibilityReport {
    pub from_version: Version,
    pub to_version: Version,
    pub breaking: bool,
    pub warnings: Vec<String>,
    pub migration_notes_url: Option<String>,
    pub required_actions: Vec<String>,
}

/// Breaking changes in `manifest` whose range contains `from`. An
/// unparseable range never matches; it degrades to an advisory line instead
/// of failing the evaluation.
fn matched_changes<'a>(
    from: Version,
    manifest: &'a CompatibilityManifest,
    advisories: &mut Vec<String>,
) -> Vec<&'a BreakingChange> {
    let mut matched = Vec::new();
    for change in &manifest.breaking_changes {
        match Range::parse(&change.affected_versions) {
            Some(range) => {
                if range.matches(from) {
                    matched.push(change);
                }
            }
            None => advisories.push(format!(
                "ignoring unparseable affected-version range {:?} in manifest {}",
                change.affected_versions, manifest.version
            )),
        }
    }
    matched
}

pub fn single_hop_report(
    from: Version,
    to: Version,
    manifest: Option<&CompatibilityManifest>,
) -> CompatibilityReport {
    let Some(manifest) = manifest else {
        return CompatibilityReport {
            from_version: from,
            to_version: to,
            breaking: false,
            warnings: vec![format!(
                "no compatibility manifest found for {to}; proceed with caution"
            )],
            migration_notes_url: None,
            required_actions: Vec::new(),
        };
    };

    let mut advisories = Vec::new();
    let matched = matched_changes(from, manifest, &mut advisories);
    let breaking = !matched.is_empty();

    let mut warnings = Vec::new();
    if breaking {
        warnings.push(format!("upgrading {from} -> {to} crosses breaking changes"));
    }
    if let Some(url) = &manifest.migration_notes_url {
        warnings.push(format!("migration notes: {url}"));
    }
    for change in &matched {
        warnings.push(format!(
            "{} (mitigation: {})",
            change.description, change.mitigation
        ));
    }
    warnings.extend(advisories);

    CompatibilityReport {
        from_version: from,
        to_version: to,
        breaking,
        warnings,
        migration_notes_url: manifest.migration_notes_url.clone(),
        required_actions: dedup_in_order(manifest.required_actions.iter()),
    }
}

/// Aggregate across every manifest on a multi-hop upgrade. `manifests` must
/// be ordered ascending by version; changes are deduplicated by description
/// (first seen wins) and grouped by category for display.
pub fn multi_hop_report(
    from: Version,
    to: Version,
    manifests: &[CompatibilityManifest],
) -> CompatibilityReport {
    let mut advisories = Vec::new();
    let mut matched: Vec<&BreakingChange> = Vec::new();
    for manifest in manifests {
        for change in matched_changes(from, manifest, &mut advisories) {
            if !matched.iter().any(|m| m.description == change.description) {
                matched.push(change);
            }
        }
    }
    let breaking = !matched.is_empty();
    let migration_notes_url = manifests
        .iter()
        .rev()
        .find_map(|m| m.migration_notes_url.clone());

    let mut warnings = Vec::new();
    if breaking {
        warnings.push(format!(
            "upgrading {from} -> {to} crosses breaking changes across {} releases",
            manifests.len()
        ));
    }
    if let Some(url) = &migration_notes_url {
        warnings.push(format!("migration notes: {url}"));
    }
    for category in ChangeCategory::DISPLAY_ORDER {
        let group: Vec<&&BreakingChange> = matched
            .iter()
            .filter(|c| c.category == category)
            .collect();
        if group.is_empty() {
            continue;
        }
        match category.label() {
            Some(label) => {
                warnings.push(format!("{label}:"));
                for change in group {
                    warnings.push(format!(
                        "  {} (mitigation: {})",
                        change.description, change.mitigation
                    ));
                }
            }
            None => {
                for change in group {
                    warnings.push(format!(
                        "{} (mitigation: {})",
                        change.description, change.mitigation
                    ));
                }
            }
        }
    }
    if matched.len() > STEP_THROUGH_THRESHOLD {
        warnings.push(format!(
            "{} breaking changes accumulated on this hop; consider upgrading one release at a time",
            matched.len()
        ));
    }
    warnings.extend(advisories);

    CompatibilityReport {
        from_version: from,
        to_version: to,
        breaking,
        warnings,
        migration_notes_url,
        required_actions: dedup_in_order(
            manifests.iter().flat_map(|m| m.required_actions.iter()),
        ),
    }
}

fn dedup_in_order<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.iter().any(|seen| seen == item) {
            out.push(item.clone());
        }
    }
    out
}

/// Fetching front over the pure report builders.
#[derive(Debug)]
pub struct Evaluator<'a> {
    fetcher: &'a ManifestFetcher,
}

impl<'a> Evaluator<'a> {
    pub fn new(fetcher: &'a ManifestFetcher) -> Self {
        Evaluator {
            fetcher,
        }
    }

    pub fn check_single_hop(
        &self,
        from: Version,
        to: Version,
    ) -> Result<CompatibilityReport, FetchError> {
        let manifest = self.fetcher.fetch(&to.to_string(), false)?;
        Ok(single_hop_report(from, to, manifest.as_ref()))
    }

    /// `hops` is the ordered list of release versions strictly after `from`
    /// up to and including `to`. Manifests are fetched concurrently; each
    /// fetch writes its own cache file. Absent manifests are skipped.
    pub fn check_multi_hop(
        &self,
        from: Version,
        to: Version,
        hops: &[Version],
    ) -> Result<CompatibilityReport, FetchError> {
        let results: Vec<Result<Option<CompatibilityManifest>, FetchError>> =
            std::thread::scope(|scope| {
                let handles: Vec<_> = hops
                    .iter()
                    .map(|hop| {
                        let version = hop.to_string();
                        scope.spawn(move || self.fetcher.fetch(&version, false))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle.join().unwrap_or_else(|_| {
                            Err(FetchError::Other(anyhow!("manifest fetch thread panicked")))
                        })
                    })
                    .collect()
            });

        let mut manifests = Vec::new();
        for result in results {
            if let Some(manifest) = result? {
                manifests.push(manifest);
            }
        }
        manifests.sort_by_key(|m| Version::parse(&m.version));
        Ok(multi_hop_report(from, to, &manifests))
    }
}
