//! Forwarding and retry engine shared by both inter-stage call sites
//! (gatekeeper -> age screener, age screener -> region classifier).

use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

/// Retry schedule for one forwarding call site. Defaults match the
/// production contract: 3 attempts with request timeouts of 60s/90s/120s,
/// a fixed 30s connect timeout, and per-failure-class backoffs.
///
/// Fields are public so tests can shrink the schedule to milliseconds.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_timeout: Duration,
    pub timeout_step: Duration,
    pub connect_timeout: Duration,
    pub timeout_backoff: Duration,
    pub server_error_backoff: Duration,
    pub network_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_timeout: Duration::from_secs(60),
            timeout_step: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            timeout_backoff: Duration::from_secs(20),
            server_error_backoff: Duration::from_secs(15),
            network_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Request timeout for a 1-based attempt number: base + step per retry.
    pub fn request_timeout(&self, attempt: u32) -> Duration {
        self.base_timeout + self.timeout_step * attempt.saturating_sub(1)
    }

    /// Backoff to sleep after a failed attempt, `None` when the failure is
    /// terminal. The HTTP-500 backoff grows linearly with the attempt number.
    pub fn backoff(&self, class: FailureClass, attempt: u32) -> Option<Duration> {
        match class {
            FailureClass::Timeout => Some(self.timeout_backoff),
            FailureClass::ServerError => Some(self.server_error_backoff * attempt),
            FailureClass::Network => Some(self.network_backoff),
            FailureClass::Terminal(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Timeout,
    ServerError,
    Network,
    /// Non-retryable: any non-200/non-500 status (code embedded), or a
    /// malformed success body.
    Terminal(u16),
}

/// Result of one forwarding call: the downstream JSON body verbatim, or a
/// human-readable failure with the number of attempts made (<= max).
#[derive(Debug)]
pub enum ForwardOutcome {
    Success(Value),
    Failed { reason: String, attempts: u32 },
}

/// Base URL of the next stage; joins endpoint paths onto it.
#[derive(Debug, Clone)]
pub struct StageTarget {
    pub base_url: String,
}

impl StageTarget {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    pub fn api_path(&self, api_path: &str) -> String {
        if api_path.starts_with('/') {
            format!("{}{}", self.base_url, api_path)
        } else {
            format!("{}/{}", self.base_url, api_path)
        }
    }
}

/// Forwards an uploaded image to the next stage as a multipart POST.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    target: StageTarget,
    endpoint: String,
    policy: RetryPolicy,
}

impl Forwarder {
    pub fn new(target: StageTarget, endpoint: &str, policy: RetryPolicy) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(policy.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            target,
            endpoint: endpoint.to_string(),
            policy,
        })
    }

    /// Shared client, reused for artifact relocation fetches.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn target(&self) -> &StageTarget {
        &self.target
    }

    pub async fn forward_image(&self, path: &Path) -> ForwardOutcome {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return ForwardOutcome::Failed {
                    reason: format!("could not read upload for forwarding: {e}"),
                    attempts: 0,
                };
            }
        };
        self.forward_bytes(bytes).await
    }

    pub async fn forward_bytes(&self, bytes: Vec<u8>) -> ForwardOutcome {
        let url = self.target.api_path(&self.endpoint);
        let mut last: Option<(FailureClass, String)> = None;

        for attempt in 1..=self.policy.max_attempts {
            match self.attempt(&url, attempt, bytes.clone()).await {
                Ok(payload) => {
                    log::info!("forward to {url} succeeded on attempt {attempt}");
                    return ForwardOutcome::Success(payload);
                }
                Err((class, reason)) => {
                    log::warn!(
                        "forward attempt {attempt}/{} to {url} failed: {reason}",
                        self.policy.max_attempts
                    );
                    match self.policy.backoff(class, attempt) {
                        None => return ForwardOutcome::Failed { reason, attempts: attempt },
                        Some(delay) if attempt < self.policy.max_attempts => {
                            tokio::time::sleep(delay).await;
                        }
                        Some(_) => {}
                    }
                    last = Some((class, reason));
                }
            }
        }

        let attempts = self.policy.max_attempts;
        let reason = match last {
            Some((FailureClass::Timeout, _)) => {
                format!("downstream timed out after {attempts} attempts")
            }
            Some((FailureClass::ServerError, _)) => {
                format!("downstream returned 500 after {attempts} attempts")
            }
            Some((_, reason)) => format!("{reason} (after {attempts} attempts)"),
            None => "all forward attempts failed".to_string(),
        };
        ForwardOutcome::Failed { reason, attempts }
    }

    async fn attempt(
        &self,
        url: &str,
        attempt: u32,
        bytes: Vec<u8>,
    ) -> Result<Value, (FailureClass, String)> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name("image.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| {
                (
                    FailureClass::Terminal(0),
                    format!("could not build multipart body: {e}"),
                )
            })?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(url)
            .timeout(self.policy.request_timeout(attempt))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    (FailureClass::Timeout, format!("request timed out: {e}"))
                } else {
                    (FailureClass::Network, format!("network error: {e}"))
                }
            })?;

        match response.status() {
            StatusCode::OK => response.json::<Value>().await.map_err(|e| {
                (
                    FailureClass::Terminal(200),
                    format!("downstream returned a non-JSON body: {e}"),
                )
            }),
            StatusCode::INTERNAL_SERVER_ERROR => Err((
                FailureClass::ServerError,
                "downstream returned 500".to_string(),
            )),
            status => Err((
                FailureClass::Terminal(status.as_u16()),
                format!("downstream returned status {status}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_timeouts_escalate() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.request_timeout(1), Duration::from_secs(60));
        assert_eq!(policy.request_timeout(2), Duration::from_secs(90));
        assert_eq!(policy.request_timeout(3), Duration::from_secs(120));
        assert_eq!(policy.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_schedule_per_failure_class() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.backoff(FailureClass::Timeout, 1),
            Some(Duration::from_secs(20))
        );
        assert_eq!(
            policy.backoff(FailureClass::Timeout, 2),
            Some(Duration::from_secs(20))
        );
        assert_eq!(
            policy.backoff(FailureClass::ServerError, 1),
            Some(Duration::from_secs(15))
        );
        assert_eq!(
            policy.backoff(FailureClass::ServerError, 2),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            policy.backoff(FailureClass::Network, 3),
            Some(Duration::from_secs(10))
        );
        assert_eq!(policy.backoff(FailureClass::Terminal(404), 1), None);
    }

    #[test]
    fn test_target_joins_paths_with_or_without_slash() {
        let target = StageTarget::new("http://age-screener:8000/");
        assert_eq!(
            target.api_path("/process"),
            "http://age-screener:8000/process"
        );
        assert_eq!(
            target.api_path("health"),
            "http://age-screener:8000/health"
        );
    }
}
