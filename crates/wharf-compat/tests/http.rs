use std::io::{Read as _, Write as _};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wharf_compat::evaluate::Evaluator;
use wharf_compat::fetch::{FetchError, ManifestFetcher};
use wharf_compat::manifest::{BreakingChange, ChangeCategory, CompatibilityManifest};
use wharf_compat::semver::Version;
use wharf_compat::store::ManifestStore;

struct Response {
    status_line: &'static str,
    extra_headers: Vec<String>,
    body: String,
}

fn json_response(status_line: &'static str, body: &str) -> Response {
    Response {
        status_line,
        extra_headers: Vec::new(),
        body: body.to_string(),
    }
}

/// Serves the scripted responses in order, one connection each, then exits.
/// Returns the server URL and a counter of accepted connections; connections
/// after the script is exhausted are refused.
fn start_server(responses: Vec<Response>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    let hits = Arc::new(AtomicUsize::new(0));
    let thread_hits = Arc::clone(&hits);

    std::thread::spawn(move || {
        for response in responses {
            let (mut stream, _) = match listener.accept() {
                Ok(conn) => conn,
                Err(_) => return,
            };
            thread_hits.fetch_add(1, Ordering::SeqCst);
            let _ = stream.set_read_timeout(Some(Duration::from_secs(1)));

            let mut buf = Vec::new();
            let mut tmp = [0u8; 4096];
            for _ in 0..64 {
                match stream.read(&mut tmp) {
                    Ok(0) => break,
                    Ok(n) => {
                        buf.extend_from_slice(&tmp[..n]);
                        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }

            let mut head = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
                response.status_line,
                response.body.len()
            );
            for header in &response.extra_headers {
                head.push_str(header);
                head.push_str("\r\n");
            }
            head.push_str("\r\n");
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(response.body.as_bytes());
            let _ = stream.flush();
        }
    });

    (format!("http://{addr}/"), hits)
}

fn temp_store(name: &str) -> ManifestStore {
    let root: PathBuf =
        std::env::temp_dir().join(format!("wharf_fetch_{}_{name}", std::process::id()));
    if root.exists() {
        std::fs::remove_dir_all(&root).expect("clean temp root");
    }
    ManifestStore::new(root)
}

const MANIFEST_0_8_0: &str = r#"{
    "version": "0.8.0",
    "storageFormatVersion": "3",
    "breakingChanges": [
        {
            "affectedVersions": ">=0.7.0 <0.8.0",
            "description": "graphql field renamed",
            "mitigation": "update queries",
            "category": "graphql"
        }
    ],
    "migrationNotes": "https://docs.wharf.dev/migrate/0.8.0",
    "requiredActions": ["back up the database"]
}"#;

#[test]
fn fetch_caches_and_second_fetch_skips_the_network() {
    let (url, hits) = start_server(vec![json_response("200 OK", MANIFEST_0_8_0)]);
    let fetcher = ManifestFetcher::new(&url, temp_store("cache_hit"))
        .expect("fetcher")
        .with_timeout(Duration::from_secs(2));

    let first = fetcher.fetch("0.8.0", false).expect("first fetch");
    assert!(first.is_some());
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // The server script is exhausted; any further request would fail, so a
    // successful second fetch proves the cache was used.
    let second = fetcher.fetch("0.8.0", false).expect("second fetch");
    assert_eq!(second.expect("cached").version, "0.8.0");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn force_refresh_refetches_over_the_network() {
    let (url, hits) = start_server(vec![
        json_response("200 OK", MANIFEST_0_8_0),
        json_response("200 OK", MANIFEST_0_8_0),
    ]);
    let fetcher = ManifestFetcher::new(&url, temp_store("force_refresh"))
        .expect("fetcher")
        .with_timeout(Duration::from_secs(2));

    fetcher.fetch("0.8.0", false).expect("first fetch");
    fetcher.fetch("0.8.0", true).expect("forced fetch");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn http_404_is_absent_not_an_error_and_not_cached() {
    let (url, hits) = start_server(vec![
        json_response("404 Not Found", r#"{"error":"no manifest"}"#),
        json_response("404 Not Found", r#"{"error":"no manifest"}"#),
    ]);
    let fetcher = ManifestFetcher::new(&url, temp_store("absent"))
        .expect("fetcher")
        .with_timeout(Duration::from_secs(2));

    assert!(fetcher.fetch("0.3.0", false).expect("fetch").is_none());
    assert!(fetcher.store().get("0.3.0").expect("store get").is_none());

    // absence is not cached: the next fetch asks the registry again
    assert!(fetcher.fetch("0.3.0", false).expect("refetch").is_none());
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn http_429_surfaces_rate_limit_with_retry_after_hint() {
    let (url, _) = start_server(vec![Response {
        status_line: "429 Too Many Requests",
        extra_headers: vec!["Retry-After: 60".to_string()],
        body: r#"{"error":"slow down"}"#.to_string(),
    }]);
    let fetcher = ManifestFetcher::new(&url, temp_store("rate_limit"))
        .expect("fetcher")
        .with_timeout(Duration::from_secs(2));

    match fetcher.fetch("0.8.0", false) {
        Err(FetchError::RateLimited { retry_after, .. }) => {
            assert_eq!(retry_after, Some(60));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[test]
fn other_statuses_are_hard_errors() {
    let (url, _) = start_server(vec![json_response(
        "500 Internal Server Error",
        r#"{"error":"boom"}"#,
    )]);
    let fetcher = ManifestFetcher::new(&url, temp_store("server_error"))
        .expect("fetcher")
        .with_timeout(Duration::from_secs(2));

    match fetcher.fetch("0.8.0", false) {
        Err(FetchError::Status { status, .. }) => assert_eq!(status, 500),
        other => panic!("expected Status, got {other:?}"),
    }
}

#[test]
fn invalid_payload_is_a_schema_error_and_never_cached() {
    let (url, _) = start_server(vec![
        json_response("200 OK", r#"{"version": "0.8.0"}"#),
        json_response("200 OK", "not json at all"),
    ]);
    let fetcher = ManifestFetcher::new(&url, temp_store("schema_error"))
        .expect("fetcher")
        .with_timeout(Duration::from_secs(2));

    // missing storageFormatVersion
    assert!(matches!(
        fetcher.fetch("0.8.0", false),
        Err(FetchError::Schema { .. })
    ));
    assert!(fetcher.store().get("0.8.0").expect("store get").is_none());

    assert!(matches!(
        fetcher.fetch("0.8.0", false),
        Err(FetchError::Schema { .. })
    ));
    assert!(fetcher.store().get("0.8.0").expect("store get").is_none());
}

#[test]
fn version_mismatch_is_a_schema_error() {
    let (url, _) = start_server(vec![json_response("200 OK", MANIFEST_0_8_0)]);
    let fetcher = ManifestFetcher::new(&url, temp_store("mismatch"))
        .expect("fetcher")
        .with_timeout(Duration::from_secs(2));

    assert!(matches!(
        fetcher.fetch("0.9.0", false),
        Err(FetchError::Schema { .. })
    ));
}

#[test]
fn connection_refused_is_a_network_error() {
    let port = {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        listener.local_addr().expect("local_addr").port()
    };
    let fetcher = ManifestFetcher::new(
        &format!("http://127.0.0.1:{port}/"),
        temp_store("refused"),
    )
    .expect("fetcher")
    .with_timeout(Duration::from_secs(2));

    assert!(matches!(
        fetcher.fetch("0.8.0", false),
        Err(FetchError::Network { .. })
    ));
}

#[test]
fn corrupted_cache_entry_triggers_a_fresh_network_fetch() {
    let (url, hits) = start_server(vec![json_response("200 OK", MANIFEST_0_8_0)]);
    let store = temp_store("self_heal");
    std::fs::create_dir_all(store.root()).expect("mkdir");
    std::fs::write(store.root().join("0.8.0.json"), b"{ garbage").expect("write garbage");

    let fetcher = ManifestFetcher::new(&url, store)
        .expect("fetcher")
        .with_timeout(Duration::from_secs(2));

    let manifest = fetcher.fetch("0.8.0", false).expect("fetch").expect("manifest");
    assert_eq!(manifest.version, "0.8.0");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // the cache entry is valid again
    assert!(fetcher.store().get("0.8.0").expect("store get").is_some());
}

#[test]
fn multi_hop_skips_absent_manifests_and_aggregates_the_rest() {
    // 0.6.0 and 0.8.0 come from the cache; only 0.7.0 goes to the network
    // and gets a 404, which is skipped rather than raised.
    let (url, hits) = start_server(vec![json_response(
        "404 Not Found",
        r#"{"error":"no manifest"}"#,
    )]);
    let store = temp_store("multi_hop");
    for (version, description) in [("0.6.0", "first change"), ("0.8.0", "second change")] {
        store
            .put(&CompatibilityManifest {
                version: version.to_string(),
                storage_format_version: "3".to_string(),
                breaking_changes: vec![BreakingChange {
                    affected_versions: ">=0.5.0 <0.6.0".to_string(),
                    description: description.to_string(),
                    mitigation: "see notes".to_string(),
                    category: ChangeCategory::Config,
                }],
                migration_notes_url: None,
                required_actions: Vec::new(),
            })
            .expect("seed manifest");
    }
    let fetcher = ManifestFetcher::new(&url, store)
        .expect("fetcher")
        .with_timeout(Duration::from_secs(2));

    let from = Version::parse("0.5.2").expect("from");
    let to = Version::parse("0.8.0").expect("to");
    let hops: Vec<Version> = ["0.6.0", "0.7.0", "0.8.0"]
        .iter()
        .map(|s| Version::parse(s).expect("hop"))
        .collect();
    let report = Evaluator::new(&fetcher)
        .check_multi_hop(from, to, &hops)
        .expect("multi hop");

    assert!(report.breaking);
    assert!(report.warnings.iter().any(|w| w.contains("first change")));
    assert!(report.warnings.iter().any(|w| w.contains("second change")));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn release_index_is_sorted_and_schema_checked() {
    let index = r#"{
        "schemaVersion": "wharf.release-index@0.1.0",
        "versions": ["0.8.0", "0.6.0", "0.7.0", "0.7.0", "nightly"]
    }"#;
    let (url, _) = start_server(vec![json_response("200 OK", index)]);
    let fetcher = ManifestFetcher::new(&url, temp_store("index"))
        .expect("fetcher")
        .with_timeout(Duration::from_secs(2));

    let versions = fetcher.release_versions().expect("index");
    let rendered: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
    assert_eq!(rendered, vec!["0.6.0", "0.7.0", "0.8.0"]);

    let bad = r#"{"schemaVersion": "wharf.release-index@9.9.9", "versions": ["0.8.0"]}"#;
    let (url, _) = start_server(vec![json_response("200 OK", bad)]);
    let fetcher = ManifestFetcher::new(&url, temp_store("index_bad"))
        .expect("fetcher")
        .with_timeout(Duration::from_secs(2));
    assert!(matches!(
        fetcher.release_versions(),
        Err(FetchError::Schema { .. })
    ));
}
