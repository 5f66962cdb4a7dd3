//! The compatibility manifest published once per release by the Wharf
//! release registry. External document, camelCase keys, read-only here.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::semver::Version;

pub const MANIFEST_FILE_NAME: &str = "compatibility-manifest.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeCategory {
    Graphql,
    Environment,
    Storage,
    Config,
    Docker,
    #[default]
    #[serde(other)]
    Other,
}

impl ChangeCategory {
    /// Fixed rendering order; `Other` is last and carries no label.
    pub const DISPLAY_ORDER: [ChangeCategory; 6] = [
        ChangeCategory::Graphql,
        ChangeCategory::Environment,
        ChangeCategory::Storage,
        ChangeCategory::Config,
        ChangeCategory::Docker,
        ChangeCategory::Other,
    ];

    pub fn label(&self) -> Option<&'static str> {
        match self {
            ChangeCategory::Graphql => Some("GraphQL API"),
            ChangeCategory::Environment => Some("Environment variables"),
            ChangeCategory::Storage => Some("Storage format"),
            ChangeCategory::Config => Some("Configuration"),
            ChangeCategory::Docker => Some("Container images"),
            ChangeCategory::Other => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakingChange {
    /// Range of *current* versions impacted when upgrading past the manifest's
    /// release, e.g. `>=0.7.0 <0.8.0`.
    pub affected_versions: String,
    pub description: String,
    pub mitigation: String,
    #[serde(default)]
    pub category: ChangeCategory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityManifest {
    pub version: String,
    pub storage_format_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breaking_changes: Vec<BreakingChange>,
    #[serde(default, rename = "migrationNotes", skip_serializing_if = "Option::is_none")]
    pub migration_notes_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_actions: Vec<String>,
}

impl CompatibilityManifest {
    pub fn validate(&self) -> Result<()> {
        if Version::parse(&self.version).is_none() {
            bail!(
                "manifest version must be MAJOR.MINOR.PATCH, got {:?}",
                self.version
            );
        }
        if self.storage_format_version.trim().is_empty() {
            bail!("manifest {} missing storageFormatVersion", self.version);
        }
        for (idx, change) in self.breaking_changes.iter().enumerate() {
            if change.affected_versions.trim().is_empty() {
                bail!(
                    "manifest {} breakingChanges[{idx}] missing affectedVersions",
                    self.version
                );
            }
            if change.description.trim().is_empty() {
                bail!(
                    "manifest {} breakingChanges[{idx}] missing description",
                    self.version
                );
            }
            if change.mitigation.trim().is_empty() {
                bail!(
                    "manifest {} breakingChanges[{idx}] missing mitigation",
                    self.version
                );
            }
        }
        Ok(())
    }
}
