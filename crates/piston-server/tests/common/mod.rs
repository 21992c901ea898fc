#![allow(dead_code)]

use futures::future::BoxFuture;
use piston_server::server::installer::config::{Endpoints, RetryPolicy, SetupConfig};
use piston_server::server::installer::core::downloader::{
    ArtifactDownloader, DownloadOutcome, DownloadTask,
};
use piston_server::{ProgressReporter, Result};
use serde_json::json;
use sha1::{Digest, Sha1};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SERVER_JAR: &[u8] = b"PK-not-really-a-server-jar";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn sha1_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha1::digest(bytes))
}

/// Config pointing every endpoint at `base`, with fast retries.
pub fn test_config(base: &str) -> SetupConfig {
    SetupConfig {
        endpoints: Endpoints::with_base(base).unwrap(),
        retry: RetryPolicy {
            attempts: 2,
            base_delay: Duration::from_millis(10),
        },
        request_timeout: Duration::from_secs(10),
        ..Default::default()
    }
}

/// Serve a Mojang manifest with `release` (the latest) and one snapshot, plus
/// the version document and server jar of `release`.
pub async fn mount_mojang(server: &MockServer, release: &str) {
    let base = server.uri();
    Mock::given(method("GET"))
        .and(path("/mojang/version_manifest_v2.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "latest": { "release": release, "snapshot": "24w14a" },
            "versions": [
                {
                    "id": "24w14a",
                    "type": "snapshot",
                    "url": format!("{}/mojang/v1/packages/24w14a.json", base),
                    "sha1": "0000000000000000000000000000000000000000"
                },
                {
                    "id": release,
                    "type": "release",
                    "url": format!("{}/mojang/v1/packages/{}.json", base, release),
                    "sha1": "1111111111111111111111111111111111111111"
                }
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/mojang/v1/packages/{}.json", release)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": release,
            "downloads": {
                "server": {
                    "url": format!("{}/mojang/objects/server-{}.jar", base, release),
                    "sha1": sha1_hex(SERVER_JAR),
                    "size": SERVER_JAR.len()
                }
            }
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/mojang/objects/server-{}.jar", release)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(SERVER_JAR))
        .mount(server)
        .await;
}

/// Writes a fixed body to every destination and counts the requests it was given.
#[derive(Default)]
pub struct CountingDownloader {
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl CountingDownloader {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl ArtifactDownloader for CountingDownloader {
    fn download<'a>(
        &'a self,
        task: &'a DownloadTask,
        _reporter: &'a dyn ProgressReporter,
    ) -> BoxFuture<'a, Result<DownloadOutcome>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(task.primary_url().to_string());
            if let Some(parent) = task.destination.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&task.destination, SERVER_JAR).await?;
            Ok(DownloadOutcome::Downloaded {
                bytes: SERVER_JAR.len() as u64,
            })
        })
    }
}

/// Build a zip archive from `(name, contents)` pairs.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options: zip::write::SimpleFileOptions = Default::default();
    for (name, body) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(body).unwrap();
    }
    zip.finish().unwrap();
}

/// Every file under `root` with its contents, sorted by path.
pub fn tree(root: &Path) -> Vec<(String, Vec<u8>)> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) {
        for entry in std::fs::read_dir(dir).unwrap().flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
                out.push((rel, std::fs::read(&path).unwrap()));
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}
