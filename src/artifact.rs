//! Stage-local artifact storage and downstream artifact relocation.
//!
//! Every write uses a freshly generated unique filename, so the stores are
//! append-only and need no locking across concurrent requests.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use image::RgbImage;
use serde_json::Value;
use uuid::Uuid;

/// Keys inspected (and rewritten) inside opaque downstream payloads. The
/// payload is never otherwise validated or interpreted.
pub const ARTIFACT_PATH_KEYS: [&str; 2] = ["annotated_image_url", "annotated_image_path"];

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A saved artifact: its filename, the URL path clients dereference it at,
/// and where it lives on disk.
#[derive(Debug, Clone)]
pub struct ArtifactRef {
    pub filename: String,
    pub url_path: String,
    pub disk_path: PathBuf,
}

/// An append-only directory of annotated images served under a fixed URL
/// prefix by the stage's static mount.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    url_prefix: String,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, url_prefix: &str) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    fn fresh_name(&self, stem: &str) -> String {
        format!("{stem}_{}.jpg", Uuid::new_v4().simple())
    }

    pub fn save_image(&self, stem: &str, img: &RgbImage) -> anyhow::Result<ArtifactRef> {
        let filename = self.fresh_name(stem);
        let disk_path = self.dir.join(&filename);
        img.save(&disk_path)?;
        Ok(ArtifactRef {
            url_path: format!("{}/{}", self.url_prefix, filename),
            filename,
            disk_path,
        })
    }

    pub fn save_bytes(&self, stem: &str, bytes: &[u8]) -> io::Result<ArtifactRef> {
        let filename = self.fresh_name(stem);
        let disk_path = self.dir.join(&filename);
        fs::write(&disk_path, bytes)?;
        Ok(ArtifactRef {
            url_path: format!("{}/{}", self.url_prefix, filename),
            filename,
            disk_path,
        })
    }
}

/// RAII guard for the per-request temp input file: removed on every exit
/// path, success or not.
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
}

impl TempUpload {
    pub fn write(dir: &Path, original_name: &str, bytes: &[u8]) -> io::Result<Self> {
        let path = dir.join(format!("{}_{original_name}", Uuid::new_v4().simple()));
        fs::write(&path, bytes)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("failed to remove temp upload {}: {e}", self.path.display());
        }
    }
}

/// Outcome of a relocation pass; failure never fails the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelocationReport {
    pub found: usize,
    pub relocated: usize,
}

impl RelocationReport {
    pub fn attempted(&self) -> bool {
        self.found > 0
    }

    pub fn fully_relocated(&self) -> bool {
        self.relocated == self.found
    }
}

/// JSON pointers to every artifact-path value in the payload. Only string
/// values under a known key that look like server-rooted paths count.
pub fn collect_artifact_pointers(payload: &Value) -> Vec<String> {
    fn escape(key: &str) -> String {
        key.replace('~', "~0").replace('/', "~1")
    }

    fn walk(value: &Value, prefix: &str, out: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let pointer = format!("{prefix}/{}", escape(key));
                    if ARTIFACT_PATH_KEYS.contains(&key.as_str())
                        && child.as_str().is_some_and(|s| s.starts_with('/'))
                    {
                        out.push(pointer.clone());
                    }
                    walk(child, &pointer, out);
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    walk(child, &format!("{prefix}/{i}"), out);
                }
            }
            _ => {}
        }
    }

    let mut out = Vec::new();
    walk(payload, "", &mut out);
    out
}

/// Fetch each downstream-hosted artifact referenced by the payload, persist
/// a local copy, and rewrite the reference to a locally-servable path.
///
/// A failed fetch or write is logged and leaves the original (possibly
/// unreachable) reference in place.
pub async fn relocate_artifacts(
    client: &reqwest::Client,
    downstream_base: &str,
    payload: &mut Value,
    store: &ArtifactStore,
) -> RelocationReport {
    let pointers = collect_artifact_pointers(payload);
    let mut report = RelocationReport {
        found: pointers.len(),
        relocated: 0,
    };

    for pointer in pointers {
        let Some(remote_path) = payload
            .pointer(&pointer)
            .and_then(Value::as_str)
            .map(str::to_owned)
        else {
            continue;
        };
        match fetch_artifact(client, downstream_base, &remote_path).await {
            Ok(body) => match store.save_bytes("relocated", &body) {
                Ok(artifact) => {
                    if let Some(slot) = payload.pointer_mut(&pointer) {
                        log::info!(
                            "relocated downstream artifact {remote_path} -> {}",
                            artifact.url_path
                        );
                        *slot = Value::String(artifact.url_path);
                        report.relocated += 1;
                    }
                }
                Err(e) => log::warn!("could not persist relocated artifact {remote_path}: {e}"),
            },
            Err(e) => log::warn!("artifact relocation failed for {remote_path}: {e}"),
        }
    }
    report
}

async fn fetch_artifact(
    client: &reqwest::Client,
    downstream_base: &str,
    remote_path: &str,
) -> anyhow::Result<Bytes> {
    let base = downstream_base.trim_end_matches('/');
    let url = if remote_path.starts_with('/') {
        format!("{base}{remote_path}")
    } else {
        format!("{base}/{remote_path}")
    };
    let response = client.get(&url).timeout(FETCH_TIMEOUT).send().await?;
    if !response.status().is_success() {
        anyhow::bail!("artifact fetch returned status {}", response.status());
    }
    let body = response.bytes().await?;
    if body.is_empty() {
        anyhow::bail!("artifact fetch returned an empty body");
    }
    Ok(body)
}
