//! Local manifest cache: one file per release version under an injectable
//! root, integrity-checked on read, self-healing on corruption.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::manifest::CompatibilityManifest;
use crate::semver::Version;
use crate::sha256_hex;

pub const CACHE_SCHEMA_VERSION: &str = "wharf.manifest-cache@0.1.0";

#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope {
    schema_version: String,
    cksum: String,
    manifest: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ManifestStore {
    root: PathBuf,
}

impl ManifestStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ManifestStore {
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, version: &str) -> Result<PathBuf> {
        if Version::parse(version).is_none() {
            bail!("invalid version for cache entry: {version:?}");
        }
        Ok(self.root.join(format!("{version}.json")))
    }

    /// Cache lookup. A missing file is a miss; an entry that fails envelope,
    /// checksum, or manifest validation is deleted and reported as a miss so
    /// the caller re-fetches.
    pub fn get(&self, version: &str) -> Result<Option<CompatibilityManifest>> {
        let path = self.entry_path(version)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
        };
        match decode_entry(&bytes, version) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(_) => {
                std::fs::remove_file(&path)
                    .with_context(|| format!("remove corrupt cache entry {}", path.display()))?;
                Ok(None)
            }
        }
    }

    pub fn put(&self, manifest: &CompatibilityManifest) -> Result<()> {
        manifest.validate()?;
        let path = self.entry_path(&manifest.version)?;
        let manifest_value =
            serde_json::to_value(manifest).context("encode manifest for cache")?;
        let payload = serde_json::to_vec(&manifest_value).context("encode manifest payload")?;
        let envelope = CacheEnvelope {
            schema_version: CACHE_SCHEMA_VERSION.to_string(),
            cksum: sha256_hex(&payload),
            manifest: manifest_value,
        };
        let mut bytes = serde_json::to_vec_pretty(&envelope).context("encode cache envelope")?;
        bytes.push(b'\n');

        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("create_dir_all {}", self.root.display()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &bytes).with_context(|| format!("write {}", tmp.display()))?;
        rename_overwrite_file(&tmp, &path)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        for version in self.list()? {
            let path = self.root.join(format!("{version}.json"));
            std::fs::remove_file(&path)
                .with_context(|| format!("remove {}", path.display()))?;
        }
        Ok(())
    }

    pub fn list(&self) -> Result<BTreeSet<String>> {
        if !self.root.is_dir() {
            return Ok(BTreeSet::new());
        }
        let mut out = BTreeSet::new();
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("read_dir {}", self.root.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if Version::parse(stem).is_some() {
                out.insert(stem.to_string());
            }
        }
        Ok(out)
    }
}

fn decode_entry(bytes: &[u8], version: &str) -> Result<CompatibilityManifest> {
    let envelope: CacheEnvelope =
        serde_json::from_slice(bytes).context("parse cache envelope")?;
    if envelope.schema_version != CACHE_SCHEMA_VERSION {
        bail!(
            "unsupported cache schema_version: {} (expected {CACHE_SCHEMA_VERSION})",
            envelope.schema_version
        );
    }
    let payload = serde_json::to_vec(&envelope.manifest).context("encode cached payload")?;
    if sha256_hex(&payload) != envelope.cksum {
        bail!("cache entry checksum mismatch for {version}");
    }
    let manifest: CompatibilityManifest =
        serde_json::from_value(envelope.manifest).context("parse cached manifest")?;
    manifest.validate()?;
    if manifest.version != version {
        bail!(
            "cache entry for {version} holds manifest {}",
            manifest.version
        );
    }
    Ok(manifest)
}

fn rename_overwrite_file(src: &Path, dst: &Path) -> Result<()> {
    #[cfg(windows)]
    {
        if dst.exists() {
            std::fs::remove_file(dst).with_context(|| format!("remove {}", dst.display()))?;
        }
    }
    std::fs::rename(src, dst)
        .with_context(|| format!("rename {} -> {}", src.display(), dst.display()))?;
    Ok(())
}
