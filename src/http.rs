// src/http.rs

use crate::clock::Deadline;
use rand::Rng;
use serde_json::Value;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        HttpRequest {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed `Retry-After` header (seconds form only)
    pub retry_after: Option<Duration>,
    /// Parsed `x-ratelimit-remaining` header
    pub rate_limit_remaining: Option<u64>,
    /// JSON body, `Value::Null` when empty or not JSON
    pub body: Value,
}

impl HttpResponse {
    pub fn ok(body: Value) -> Self {
        HttpResponse { status: 200, retry_after: None, rate_limit_remaining: None, body }
    }

    pub fn status(status: u16, body: Value) -> Self {
        HttpResponse { status, retry_after: None, rate_limit_remaining: None, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429 || (self.status == 403 && self.rate_limit_remaining == Some(0))
    }

    /// Best-effort error text from a JSON error body
    pub fn error_message(&self) -> String {
        self.body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("run deadline exceeded")]
    DeadlineExceeded,
    #[error("still rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
}

pub trait HttpTransport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Blocking transport over `reqwest`
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, HttpError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("dev-journal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(ReqwestTransport { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, &request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                HttpError::Transport(format!("timed out: {e}"))
            } else {
                HttpError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let header_u64 = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
        };
        let retry_after = header_u64("retry-after").map(Duration::from_secs);
        let rate_limit_remaining = header_u64("x-ratelimit-remaining");

        let text = response.text().map_err(|e| HttpError::Transport(e.to_string()))?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(HttpResponse { status, retry_after, rate_limit_remaining, body })
    }
}

// ── Backoff ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for a 0-based attempt number, capped at `max_delay`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16);
        self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay)
    }
}

/// Sends `request`, retrying rate-limited responses with bounded backoff.
///
/// Every attempt's timeout is clamped to the deadline and no sleep crosses
/// it. Non-rate-limit responses, successful or not, are returned as-is.
pub fn send_with_retry(
    transport: &dyn HttpTransport,
    request: &HttpRequest,
    policy: &RetryPolicy,
    deadline: &Deadline,
) -> Result<HttpResponse, HttpError> {
    let mut attempt = 0;
    loop {
        if deadline.is_expired() {
            return Err(HttpError::DeadlineExceeded);
        }
        let mut clamped = request.clone();
        clamped.timeout = deadline.clamp(request.timeout);

        let response = transport.send(&clamped)?;
        if !response.is_rate_limited() {
            return Ok(response);
        }
        if attempt >= policy.max_retries {
            warn!(url = %request.url, attempts = attempt + 1, "rate limit retry budget exhausted");
            return Err(HttpError::RateLimited { attempts: attempt + 1 });
        }

        let backoff = policy.backoff_delay(attempt);
        let mut delay = response.retry_after.map_or(backoff, |after| after.max(backoff)).min(policy.max_delay);
        if !delay.is_zero() {
            let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis().min(250) as u64);
            delay += Duration::from_millis(jitter_ms);
        }
        if deadline.remaining().is_some_and(|left| left <= delay) {
            return Err(HttpError::DeadlineExceeded);
        }

        debug!(url = %request.url, attempt, delay_ms = delay.as_millis() as u64, "rate limited, backing off");
        thread::sleep(delay);
        attempt += 1;
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;

    fn rate_limited() -> Result<HttpResponse, HttpError> {
        Ok(HttpResponse { status: 403, retry_after: None, rate_limit_remaining: Some(0), body: Value::Null })
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(250));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(40), Duration::from_secs(2));
    }

    #[test]
    fn retries_rate_limited_responses_until_success() {
        let transport = ScriptedTransport::new(vec![
            rate_limited(),
            Ok(HttpResponse::status(429, Value::Null)),
            Ok(HttpResponse::ok(json!({"done": true}))),
        ]);
        let request = HttpRequest::new(Method::Get, "https://api.example.test/x");
        let response = send_with_retry(&transport, &request, &fast_policy(3), &Deadline::never()).unwrap();
        assert_eq!(response.body["done"], true);
        assert_eq!(transport.urls().len(), 3);
    }

    #[test]
    fn gives_up_after_retry_budget() {
        let transport = ScriptedTransport::new(vec![rate_limited(), rate_limited(), rate_limited()]);
        let request = HttpRequest::new(Method::Get, "https://api.example.test/x");
        let err = send_with_retry(&transport, &request, &fast_policy(2), &Deadline::never()).unwrap_err();
        assert!(matches!(err, HttpError::RateLimited { attempts: 3 }));
    }

    #[test]
    fn plain_forbidden_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::status(403, Value::Null))]);
        let request = HttpRequest::new(Method::Get, "https://api.example.test/x");
        let response = send_with_retry(&transport, &request, &fast_policy(3), &Deadline::never()).unwrap();
        assert_eq!(response.status, 403);
    }

    #[test]
    fn expired_deadline_sends_nothing() {
        let transport = ScriptedTransport::new(vec![]);
        let request = HttpRequest::new(Method::Get, "https://api.example.test/x");
        let err = send_with_retry(&transport, &request, &fast_policy(3), &Deadline::after(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, HttpError::DeadlineExceeded));
        assert!(transport.urls().is_empty());
    }
}
