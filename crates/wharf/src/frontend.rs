//! Helpers around the user's frontend: package-manager detection, the
//! managed `@wharf/ui` dependency rewrite (container mode only), and a
//! best-effort dirty-worktree probe.

use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use wharf_compat::semver::Version;

pub const FRONTEND_DIR: &str = "web";
pub const UI_PACKAGE: &str = "@wharf/ui";
pub const RELEASE_NOTES_URL: &str = "https://github.com/wharf-dev/wharf/releases";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Pnpm,
    Yarn,
}

impl PackageManager {
    /// Lockfile presence decides; npm is the fallback.
    pub fn detect(frontend_dir: &Path) -> PackageManager {
        if frontend_dir.join("pnpm-lock.yaml").is_file() {
            return PackageManager::Pnpm;
        }
        if frontend_dir.join("yarn.lock").is_file() {
            return PackageManager::Yarn;
        }
        PackageManager::Npm
    }

    pub fn upgrade_command(&self, package: &str, version: Version) -> String {
        match self {
            PackageManager::Npm => format!("npm install {package}@{version}"),
            PackageManager::Pnpm => format!("pnpm add {package}@{version}"),
            PackageManager::Yarn => format!("yarn add {package}@{version}"),
        }
    }
}

/// Rewrites the `@wharf/ui` version in `web/package.json`, wherever it is
/// declared. Only the container-only procedure calls this; in hybrid mode
/// the frontend manifest belongs to the user.
pub fn set_ui_dependency(frontend_dir: &Path, version: Version) -> Result<()> {
    let path = frontend_dir.join("package.json");
    let bytes = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
    let mut doc: serde_json::Value =
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?;
    let Some(obj) = doc.as_object_mut() else {
        bail!("{} is not a JSON object", path.display());
    };

    let mut updated = false;
    for section in ["dependencies", "devDependencies"] {
        if let Some(deps) = obj.get_mut(section).and_then(|v| v.as_object_mut()) {
            if deps.contains_key(UI_PACKAGE) {
                deps.insert(
                    UI_PACKAGE.to_string(),
                    serde_json::Value::String(version.to_string()),
                );
                updated = true;
            }
        }
    }
    if !updated {
        bail!("{UI_PACKAGE} is not declared in {}", path.display());
    }

    let mut out = serde_json::to_vec_pretty(&doc).context("encode package.json")?;
    out.push(b'\n');
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &out).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, &path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

/// `Some(true)` when `git status` reports changes under the frontend dir.
/// Any probe failure (no git, not a repository) is "no signal".
pub fn worktree_dirty(project_dir: &Path) -> Option<bool> {
    let out = Command::new("git")
        .arg("-C")
        .arg(project_dir)
        .args(["status", "--porcelain", "--", FRONTEND_DIR])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    Some(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
}
