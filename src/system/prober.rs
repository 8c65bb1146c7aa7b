//! Remote status prober
//!
//! Read-only probes against the llama-swap OpenAI-compatible API: the
//! model list for liveness and a tiny chat completion for latency.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

use crate::types::model::ActiveModel;

/// Completion requests can legitimately wait for a model swap.
pub const LATENCY_TIMEOUT: Duration = Duration::from_secs(120);
pub const LATENCY_PROMPT: &str = "Hello! Please respond with just 'Test successful'.";
/// Response times kept for the running average
pub const STATS_WINDOW: usize = 100;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("llama-swap is unreachable: {0}")]
    RemoteUnavailable(String),
    #[error("No active models available for testing")]
    NoActiveModel,
    #[error("Unexpected response from llama-swap: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProbeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProbeError::RemoteUnavailable("request timed out".to_string())
        } else {
            ProbeError::RemoteUnavailable(e.to_string())
        }
    }
}

/// Reachability of the serving process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Health {
    Connected { active: usize },
    Disconnected,
}

impl Health {
    pub fn is_connected(&self) -> bool {
        matches!(self, Health::Connected { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub health: Health,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyClass {
    Good,
    Slow,
    VerySlow,
}

impl LatencyClass {
    pub fn from_elapsed(elapsed: Duration) -> Self {
        if elapsed < Duration::from_secs(5) {
            LatencyClass::Good
        } else if elapsed <= Duration::from_secs(10) {
            LatencyClass::Slow
        } else {
            LatencyClass::VerySlow
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LatencyClass::Good => "good",
            LatencyClass::Slow => "slow",
            LatencyClass::VerySlow => "very slow",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyReport {
    pub model: String,
    pub reply: String,
    pub elapsed: Duration,
    pub class: LatencyClass,
}

/// Request counters for latency probes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeStats {
    /// Successful latency tests
    pub total_requests: u64,
    response_times_ms: VecDeque<f64>,
}

impl ProbeStats {
    fn record(&mut self, elapsed: Duration) {
        self.total_requests += 1;
        if self.response_times_ms.len() == STATS_WINDOW {
            self.response_times_ms.pop_front();
        }
        self.response_times_ms.push_back(elapsed.as_secs_f64() * 1000.0);
    }

    /// Mean of the last 100 successful response times, in milliseconds
    pub fn average_response_ms(&self) -> Option<f64> {
        if self.response_times_ms.is_empty() {
            return None;
        }
        Some(self.response_times_ms.iter().sum::<f64>() / self.response_times_ms.len() as f64)
    }
}

/// Prober bound to one llama-swap base URL. Clones share statistics.
#[derive(Debug, Clone)]
pub struct RemoteStatusProber {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    stats: Arc<Mutex<ProbeStats>>,
}

impl RemoteStatusProber {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            timeout,
            stats: Arc::new(Mutex::new(ProbeStats::default())),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn stats(&self) -> ProbeStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `GET /v1/models`, keeping only entries that carry an id.
    pub async fn list_models(&self) -> Result<Vec<ActiveModel>, ProbeError> {
        let url = format!("{}/v1/models", self.base_url);
        tracing::debug!("Probing {}", url);

        let response = self.client.get(&url).timeout(self.timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::RemoteUnavailable(format!("HTTP {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProbeError::InvalidResponse(e.to_string()))?;

        Ok(parse_model_list(&body))
    }

    /// Liveness check. Always resolves to a report.
    pub async fn probe_status(&self) -> StatusReport {
        match self.list_models().await {
            Ok(models) => StatusReport {
                health: Health::Connected { active: models.len() },
                message: None,
            },
            Err(e) => {
                tracing::debug!("Status probe failed: {}", e);
                StatusReport {
                    health: Health::Disconnected,
                    message: Some(e.to_string()),
                }
            }
        }
    }

    /// Time a minimal completion against the first active model.
    pub async fn probe_latency(&self) -> Result<LatencyReport, ProbeError> {
        let models = self.list_models().await?;
        let model = models.into_iter().next().ok_or(ProbeError::NoActiveModel)?.id;

        let request = serde_json::json!({
            "model": model,
            "messages": [{ "role": "user", "content": LATENCY_PROMPT }],
            "max_tokens": 10,
            "temperature": 0.1
        });

        let started = Instant::now();
        let reply = self.complete(&request).await?;
        let elapsed = started.elapsed();

        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(elapsed);

        Ok(LatencyReport {
            model,
            reply,
            elapsed,
            class: LatencyClass::from_elapsed(elapsed),
        })
    }

    async fn complete(&self, request: &Value) -> Result<String, ProbeError> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .timeout(LATENCY_TIMEOUT)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown response".to_string());
            return Err(ProbeError::RemoteUnavailable(format!("HTTP {}: {}", status, body)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProbeError::InvalidResponse(e.to_string()))?;

        Ok(body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|content| !content.is_empty())
            .unwrap_or("No response")
            .to_string())
    }
}

fn parse_model_list(body: &Value) -> Vec<ActiveModel> {
    body.get("data")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let id = entry.get("id").and_then(Value::as_str)?.trim();
                    if id.is_empty() {
                        return None;
                    }
                    Some(ActiveModel {
                        id: id.to_string(),
                        owned_by: entry.get("owned_by").and_then(Value::as_str).map(str::to_string),
                        created: entry.get("created").and_then(Value::as_i64),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn models_body() -> Value {
        serde_json::json!({
            "object": "list",
            "data": [
                { "id": "qwen", "owned_by": "llama-swap", "created": 1717000000 },
                { "owned_by": "nobody" },
                { "id": "phi" }
            ]
        })
    }

    async fn mount_models(server: &MockServer, template: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(template)
            .mount(server)
            .await;
    }

    #[test]
    fn test_latency_classes() {
        assert_eq!(LatencyClass::from_elapsed(Duration::from_millis(4999)), LatencyClass::Good);
        assert_eq!(LatencyClass::from_elapsed(Duration::from_secs(5)), LatencyClass::Slow);
        assert_eq!(LatencyClass::from_elapsed(Duration::from_secs(10)), LatencyClass::Slow);
        assert_eq!(LatencyClass::from_elapsed(Duration::from_millis(10_001)), LatencyClass::VerySlow);
    }

    #[test]
    fn test_parse_model_list_is_lenient() {
        let models = parse_model_list(&models_body());
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].owned_by.as_deref(), Some("llama-swap"));
        assert_eq!(models[1].created, None);
        assert!(parse_model_list(&serde_json::json!({ "data": "nope" })).is_empty());
    }

    #[tokio::test]
    async fn test_status_connected_with_count() {
        let server = MockServer::start().await;
        mount_models(&server, ResponseTemplate::new(200).set_body_json(models_body())).await;

        let prober = RemoteStatusProber::new(&server.uri(), Duration::from_secs(5));
        let report = prober.probe_status().await;
        assert_eq!(report.health, Health::Connected { active: 2 });
        assert_eq!(report.message, None);
    }

    #[tokio::test]
    async fn test_status_disconnected_on_error_status() {
        let server = MockServer::start().await;
        mount_models(&server, ResponseTemplate::new(500)).await;

        let prober = RemoteStatusProber::new(&server.uri(), Duration::from_secs(5));
        let report = prober.probe_status().await;
        assert_eq!(report.health, Health::Disconnected);
        assert!(report.message.is_some());
    }

    #[tokio::test]
    async fn test_status_disconnected_on_timeout() {
        let server = MockServer::start().await;
        mount_models(
            &server,
            ResponseTemplate::new(200)
                .set_body_json(models_body())
                .set_delay(Duration::from_secs(2)),
        )
        .await;

        let prober = RemoteStatusProber::new(&server.uri(), Duration::from_millis(200));
        assert_eq!(prober.probe_status().await.health, Health::Disconnected);
    }

    #[tokio::test]
    async fn test_status_disconnected_when_unreachable() {
        let prober = RemoteStatusProber::new("http://127.0.0.1:1", Duration::from_secs(1));
        assert_eq!(prober.probe_status().await.health, Health::Disconnected);
    }

    #[tokio::test]
    async fn test_latency_probe() {
        let server = MockServer::start().await;
        mount_models(&server, ResponseTemplate::new(200).set_body_json(models_body())).await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({ "model": "qwen", "max_tokens": 10 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "content": "Test successful" } }]
            })))
            .mount(&server)
            .await;

        let prober = RemoteStatusProber::new(&server.uri(), Duration::from_secs(5));
        let report = prober.probe_latency().await.unwrap();
        assert_eq!(report.model, "qwen");
        assert_eq!(report.reply, "Test successful");
        assert_eq!(report.class, LatencyClass::Good);

        let stats = prober.clone().stats();
        assert_eq!(stats.total_requests, 1);
        assert!(stats.average_response_ms().is_some());
    }

    #[tokio::test]
    async fn test_failed_completion_is_not_counted() {
        let server = MockServer::start().await;
        mount_models(&server, ResponseTemplate::new(200).set_body_json(models_body())).await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let prober = RemoteStatusProber::new(&server.uri(), Duration::from_secs(5));
        assert!(prober.probe_latency().await.is_err());
        let stats = prober.stats();
        assert_eq!(stats.total_requests, 0);
        assert!(stats.average_response_ms().is_none());
    }

    #[tokio::test]
    async fn test_latency_without_active_model() {
        let server = MockServer::start().await;
        mount_models(
            &server,
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })),
        )
        .await;

        let prober = RemoteStatusProber::new(&server.uri(), Duration::from_secs(5));
        assert!(matches!(prober.probe_latency().await, Err(ProbeError::NoActiveModel)));
        assert_eq!(prober.stats().total_requests, 0);
    }

    #[test]
    fn test_stats_window() {
        let mut stats = ProbeStats::default();
        stats.record(Duration::from_millis(1000));
        for _ in 0..STATS_WINDOW {
            stats.record(Duration::from_millis(10));
        }
        assert_eq!(stats.total_requests, STATS_WINDOW as u64 + 1);
        let average = stats.average_response_ms().unwrap();
        assert!((average - 10.0).abs() < 1e-6);
    }
}
