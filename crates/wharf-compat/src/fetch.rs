//! Fetches compatibility manifests and the release index from the Wharf
//! release registry, persisting valid manifests through the local store.

use std::io::Read as _;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::manifest::{CompatibilityManifest, MANIFEST_FILE_NAME};
use crate::semver::Version;
use crate::store::ManifestStore;

pub const DEFAULT_REGISTRY_URL: &str = "https://releases.wharf.dev/";
pub const RELEASE_INDEX_FILE_NAME: &str = "index.json";
pub const RELEASE_INDEX_SCHEMA_VERSION: &str = "wharf.release-index@0.1.0";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetch failures callers can act on. A missing manifest (HTTP 404) is not an
/// error; it is the `Ok(None)` result of [`ManifestFetcher::fetch`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch {url}: {message}")]
    Network { url: String, message: String },
    #[error("fetch {url}: HTTP 429 (registry rate limit)")]
    RateLimited {
        url: String,
        /// Seconds from the `Retry-After` response header, when parseable.
        retry_after: Option<u64>,
    },
    #[error("fetch {url}: unexpected HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("fetch {url}: invalid payload: {message}")]
    Schema { url: String, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The registry's published list of release versions; the source of truth for
/// "latest" and for intermediate versions in a multi-hop upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseIndex {
    schema_version: String,
    versions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ManifestFetcher {
    registry: Url,
    store: ManifestStore,
    timeout: Duration,
}

impl ManifestFetcher {
    pub fn new(registry_url: &str, store: ManifestStore) -> Result<Self> {
        let raw = if registry_url.ends_with('/') {
            registry_url.to_string()
        } else {
            format!("{registry_url}/")
        };
        let registry = Url::parse(&raw)
            .with_context(|| format!("invalid registry url: {registry_url:?}"))?;
        Ok(ManifestFetcher {
            registry,
            store,
            timeout: DEFAULT_FETCH_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    pub fn manifest_url(&self, version: &str) -> Result<Url> {
        self.registry
            .join(&format!("{version}/{MANIFEST_FILE_NAME}"))
            .with_context(|| format!("manifest url join for {version}"))
    }

    /// Fetch the manifest for one release. Consults the store first unless
    /// `force_refresh`; a registry 404 means the release predates manifest
    /// publication and yields `Ok(None)`. Invalid payloads are never cached.
    pub fn fetch(
        &self,
        version: &str,
        force_refresh: bool,
    ) -> Result<Option<CompatibilityManifest>, FetchError> {
        if Version::parse(version).is_none() {
            return Err(FetchError::Other(anyhow!(
                "invalid version for manifest fetch: {version:?}"
            )));
        }
        if !force_refresh {
            if let Some(manifest) = self.store.get(version)? {
                return Ok(Some(manifest));
            }
        }

        let url = self.manifest_url(version)?;
        let (status, retry_after, body) = http_get(&url, self.timeout)?;
        match status {
            200..=299 => {}
            404 => return Ok(None),
            429 => {
                return Err(FetchError::RateLimited {
                    url: url.to_string(),
                    retry_after,
                })
            }
            status => {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                })
            }
        }

        let manifest: CompatibilityManifest =
            serde_json::from_slice(&body).map_err(|err| FetchError::Schema {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        if let Err(err) = manifest.validate() {
            return Err(FetchError::Schema {
                url: url.to_string(),
                message: format!("{err:#}"),
            });
        }
        if manifest.version != version {
            return Err(FetchError::Schema {
                url: url.to_string(),
                message: format!(
                    "manifest version {:?} does not match requested {version:?}",
                    manifest.version
                ),
            });
        }
        self.store.put(&manifest)?;
        Ok(Some(manifest))
    }

    /// All published release versions, ascending and deduplicated. Entries
    /// that are not strict semver are skipped.
    pub fn release_versions(&self) -> Result<Vec<Version>, FetchError> {
        let url = self
            .registry
            .join(RELEASE_INDEX_FILE_NAME)
            .context("release index url join")?;
        let (status, _, body) = http_get(&url, self.timeout)?;
        if !(200..=299).contains(&status) {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        let index: ReleaseIndex =
            serde_json::from_slice(&body).map_err(|err| FetchError::Schema {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        if index.schema_version != RELEASE_INDEX_SCHEMA_VERSION {
            return Err(FetchError::Schema {
                url: url.to_string(),
                message: format!(
                    "unsupported release index schemaVersion: {} (expected {RELEASE_INDEX_SCHEMA_VERSION})",
                    index.schema_version
                ),
            });
        }
        let mut versions: Vec<Version> = index
            .versions
            .iter()
            .filter_map(|s| Version::parse(s))
            .collect();
        versions.sort();
        versions.dedup();
        if versions.is_empty() {
            return Err(FetchError::Schema {
                url: url.to_string(),
                message: "release index lists no semver versions".to_string(),
            });
        }
        Ok(versions)
    }
}

fn http_get(url: &Url, timeout: Duration) -> Result<(u16, Option<u64>, Vec<u8>), FetchError> {
    let resp = ureq::get(url.as_str())
        .config()
        .http_status_as_error(false)
        .timeout_global(Some(timeout))
        .build()
        .call()
        .map_err(|err| FetchError::Network {
            url: url.to_string(),
            message: err.to_string(),
        })?;

    let status: u16 = resp.status().into();
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let mut reader = resp.into_body().into_reader();
    let mut body = Vec::new();
    reader
        .read_to_end(&mut body)
        .map_err(|err| FetchError::Network {
            url: url.to_string(),
            message: err.to_string(),
        })?;
    Ok((status, retry_after, body))
}
