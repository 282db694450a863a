#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use face_screening::forward::RetryPolicy;

/// Minimal scripted HTTP/1.1 downstream; counts every fully-read request.
pub struct MockDownstream {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
}

impl MockDownstream {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn header_value(head: &str, name: &str) -> Option<String> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.eq_ignore_ascii_case(name).then(|| value.trim().to_string())
    })
}

/// `respond(method, path) -> (status, body)`; bodies are served as JSON
/// unless the path looks like an image fetch.
pub async fn spawn_mock<F>(respond: F) -> MockDownstream
where
    F: Fn(&str, &str) -> (u16, Vec<u8>) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let respond = Arc::new(respond);
    let task_hits = hits.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            let hits = task_hits.clone();
            let respond = respond.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut tmp = [0u8; 4096];
                let header_end = loop {
                    let Ok(n) = sock.read(&mut tmp).await else {
                        return;
                    };
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&tmp[..n]);
                    if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
                        break pos + 4;
                    }
                    if buf.len() > (1 << 22) {
                        return;
                    }
                };
                let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
                let mut request_line = head.lines().next().unwrap_or("").split_whitespace();
                let method = request_line.next().unwrap_or("").to_string();
                let path = request_line.next().unwrap_or("").to_string();
                let content_length: usize = header_value(&head, "content-length")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                while buf.len() < header_end + content_length {
                    let Ok(n) = sock.read(&mut tmp).await else {
                        return;
                    };
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&tmp[..n]);
                }

                hits.fetch_add(1, Ordering::SeqCst);
                let (status, body) = respond(&method, &path);
                let reason = match status {
                    200 => "OK",
                    404 => "Not Found",
                    500 => "Internal Server Error",
                    _ => "Error",
                };
                let header = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = sock.write_all(header.as_bytes()).await;
                let _ = sock.write_all(&body).await;
                let _ = sock.shutdown().await;
            });
        }
    });

    MockDownstream {
        base_url: format!("http://{addr}"),
        hits,
    }
}

/// Accepts connections and reads requests but never answers, forcing the
/// caller's request timeout to fire. Counts accepted requests.
pub async fn spawn_silent_mock() -> MockDownstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let task_hits = hits.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            let hits = task_hits.clone();
            tokio::spawn(async move {
                hits.fetch_add(1, Ordering::SeqCst);
                let mut tmp = [0u8; 4096];
                // drain whatever arrives, then stall
                loop {
                    match sock.read(&mut tmp).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                }
            });
        }
    });

    MockDownstream {
        base_url: format!("http://{addr}"),
        hits,
    }
}

/// A retry schedule shrunk to milliseconds so tests never sleep for real.
pub fn tiny_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_timeout: Duration::from_millis(400),
        timeout_step: Duration::from_millis(0),
        connect_timeout: Duration::from_millis(1000),
        timeout_backoff: Duration::from_millis(5),
        server_error_backoff: Duration::from_millis(5),
        network_backoff: Duration::from_millis(5),
    }
}

pub fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!(
        "face-screening-it-{}",
        uuid::Uuid::new_v4().simple()
    ))
}

/// A small valid PNG.
pub fn png_fixture() -> Vec<u8> {
    png_fixture_sized(64, 64)
}

pub fn png_fixture_sized(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([120, 90, 70]));
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// Builds a `multipart/form-data` body with one `file` field; returns the
/// content-type header value and the body bytes.
pub fn multipart_body(bytes: &[u8], content_type: &str) -> (String, Vec<u8>) {
    let boundary = "test-boundary-7349";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"test.png\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}
