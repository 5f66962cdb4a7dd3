use std::path::PathBuf;

use wharf_compat::manifest::{BreakingChange, ChangeCategory, CompatibilityManifest};
use wharf_compat::store::ManifestStore;

fn temp_root(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("wharf_store_{}_{name}", std::process::id()));
    if root.exists() {
        std::fs::remove_dir_all(&root).expect("clean temp root");
    }
    root
}

fn sample_manifest(version: &str) -> CompatibilityManifest {
    CompatibilityManifest {
        version: version.to_string(),
        storage_format_version: "3".to_string(),
        breaking_changes: vec![BreakingChange {
            affected_versions: ">=0.7.0 <0.8.0".to_string(),
            description: "graphql field renamed".to_string(),
            mitigation: "update queries".to_string(),
            category: ChangeCategory::Graphql,
        }],
        migration_notes_url: Some("https://docs.wharf.dev/migrate/0.8.0".to_string()),
        required_actions: vec!["back up the database".to_string()],
    }
}

#[test]
fn put_then_get_roundtrips() {
    let store = ManifestStore::new(temp_root("roundtrip"));
    store.put(&sample_manifest("0.8.0")).expect("put");

    let got = store.get("0.8.0").expect("get").expect("cached manifest");
    assert_eq!(got.version, "0.8.0");
    assert_eq!(got.breaking_changes.len(), 1);
    assert_eq!(got.breaking_changes[0].description, "graphql field renamed");
    assert_eq!(
        got.migration_notes_url.as_deref(),
        Some("https://docs.wharf.dev/migrate/0.8.0")
    );
}

#[test]
fn missing_entry_is_a_miss() {
    let store = ManifestStore::new(temp_root("missing"));
    assert!(store.get("0.8.0").expect("get").is_none());
}

#[test]
fn corrupt_entry_is_deleted_and_reported_as_miss() {
    let root = temp_root("corrupt");
    let store = ManifestStore::new(&root);
    std::fs::create_dir_all(&root).expect("mkdir");
    let path = root.join("0.8.0.json");
    std::fs::write(&path, b"{ not json").expect("write garbage");

    assert!(store.get("0.8.0").expect("get").is_none());
    assert!(!path.exists(), "corrupt entry should be removed");

    store.put(&sample_manifest("0.8.0")).expect("put after heal");
    assert!(store.get("0.8.0").expect("get").is_some());
}

#[test]
fn tampered_payload_fails_checksum_and_self_heals() {
    let root = temp_root("tamper");
    let store = ManifestStore::new(&root);
    store.put(&sample_manifest("0.8.0")).expect("put");

    let path = root.join("0.8.0.json");
    let text = std::fs::read_to_string(&path).expect("read entry");
    let tampered = text.replace("graphql field renamed", "something else entirely");
    assert_ne!(text, tampered, "fixture must actually change");
    std::fs::write(&path, tampered).expect("write tampered");

    assert!(store.get("0.8.0").expect("get").is_none());
    assert!(!path.exists());
}

#[test]
fn list_and_clear() {
    let root = temp_root("list_clear");
    let store = ManifestStore::new(&root);
    store.put(&sample_manifest("0.7.0")).expect("put 0.7.0");
    store.put(&sample_manifest("0.8.0")).expect("put 0.8.0");
    // stray files are not cache entries
    std::fs::write(root.join("notes.txt"), b"hi").expect("write stray");

    let listed = store.list().expect("list");
    assert_eq!(
        listed.into_iter().collect::<Vec<_>>(),
        vec!["0.7.0".to_string(), "0.8.0".to_string()]
    );

    store.clear().expect("clear");
    assert!(store.list().expect("list").is_empty());
    assert!(root.join("notes.txt").exists());
}

#[test]
fn writes_leave_no_temp_files_behind() {
    let root = temp_root("atomic");
    let store = ManifestStore::new(&root);
    store.put(&sample_manifest("0.8.0")).expect("put");

    let leftovers: Vec<String> = std::fs::read_dir(&root)
        .expect("read_dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "unexpected temp files: {leftovers:?}");
}

#[test]
fn put_rejects_invalid_versions() {
    let store = ManifestStore::new(temp_root("invalid"));
    let mut manifest = sample_manifest("0.8.0");
    manifest.version = "v0.8.0".to_string();
    assert!(store.put(&manifest).is_err());
    assert!(store.get("not-a-version").is_err());
}
