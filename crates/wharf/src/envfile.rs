//! The pinned-version env file. This tool reads and rewrites exactly one
//! key, line by line, leaving every other line untouched.

use std::path::Path;

use anyhow::{bail, Context, Result};

pub const ENV_FILE_NAME: &str = ".env";
pub const BACKEND_VERSION_KEY: &str = "BACKEND_VERSION";

pub fn read_value(path: &Path, key: &str) -> Result<Option<String>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            continue;
        }
        let Some((k, v)) = trimmed.split_once('=') else {
            continue;
        };
        if k.trim() == key {
            return Ok(Some(v.trim().to_string()));
        }
    }
    Ok(None)
}

pub fn write_value(path: &Path, key: &str, value: &str) -> Result<()> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut out = String::with_capacity(text.len());
    let mut replaced = false;
    for line in text.lines() {
        if !replaced && !line.trim_start().starts_with('#') {
            if let Some((k, _)) = line.split_once('=') {
                if k.trim() == key {
                    out.push_str(&format!("{key}={value}\n"));
                    replaced = true;
                    continue;
                }
            }
        }
        out.push_str(line);
        out.push('\n');
    }
    if !replaced {
        bail!("{key} not found in {}", path.display());
    }

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, out.as_bytes()).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_env(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wharf_envfile_{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join(format!("{name}.env"));
        std::fs::write(&path, contents).expect("write fixture");
        path
    }

    #[test]
    fn read_finds_the_key_and_skips_comments() {
        let path = temp_env(
            "read",
            "# wharf project\nPOSTGRES_PASSWORD=hunter2\nBACKEND_VERSION=0.7.0\n",
        );
        assert_eq!(
            read_value(&path, BACKEND_VERSION_KEY).expect("read"),
            Some("0.7.0".to_string())
        );
        assert_eq!(read_value(&path, "MISSING").expect("read"), None);
    }

    #[test]
    fn write_replaces_only_the_target_line() {
        let path = temp_env(
            "write",
            "# wharf project\nPOSTGRES_PASSWORD=hunter2\nBACKEND_VERSION=0.7.0\nREDIS_URL=redis://redis:6379\n",
        );
        write_value(&path, BACKEND_VERSION_KEY, "0.8.0").expect("write");
        let text = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(
            text,
            "# wharf project\nPOSTGRES_PASSWORD=hunter2\nBACKEND_VERSION=0.8.0\nREDIS_URL=redis://redis:6379\n"
        );
    }

    #[test]
    fn write_fails_when_the_key_is_absent() {
        let path = temp_env("absent", "POSTGRES_PASSWORD=hunter2\n");
        assert!(write_value(&path, BACKEND_VERSION_KEY, "0.8.0").is_err());
        // and leaves the file untouched
        assert_eq!(
            std::fs::read_to_string(&path).expect("read back"),
            "POSTGRES_PASSWORD=hunter2\n"
        );
    }
}
