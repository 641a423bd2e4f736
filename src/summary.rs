// src/summary.rs

use crate::clock::Deadline;
use crate::config::OllamaSettings;
use crate::http::{HttpError, HttpRequest, HttpTransport, Method};
use crate::model::DayBucket;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("summary provider unreachable: {0}")]
    Http(#[from] HttpError),
    #[error("summary provider answered HTTP {0}")]
    Status(u16),
    #[error("summary provider returned no text")]
    Empty,
}

/// Turns one day's commits into prose
pub trait SummaryProvider: Send + Sync {
    fn summarize(&self, bucket: &DayBucket, budget: Duration) -> Result<String, SummaryError>;
}

/// Asks the provider for a summary, treating every failure and an expired
/// deadline as "no summary".
pub fn summarize_or_skip(
    provider: Option<&dyn SummaryProvider>,
    bucket: &DayBucket,
    budget: Duration,
    deadline: &Deadline,
) -> Option<String> {
    let provider = provider?;
    if deadline.is_expired() {
        debug!(date = %bucket.date, "deadline passed, skipping summary");
        return None;
    }
    match provider.summarize(bucket, deadline.clamp(budget)) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(date = %bucket.date, error = %e, "no summary for this day");
            None
        }
    }
}

pub struct OllamaSummarizer {
    transport: Arc<dyn HttpTransport>,
    settings: OllamaSettings,
}

impl OllamaSummarizer {
    pub fn new(transport: Arc<dyn HttpTransport>, settings: OllamaSettings) -> Self {
        OllamaSummarizer { transport, settings }
    }
}

impl SummaryProvider for OllamaSummarizer {
    fn summarize(&self, bucket: &DayBucket, budget: Duration) -> Result<String, SummaryError> {
        let request = HttpRequest::new(Method::Post, format!("{}/api/generate", self.settings.url))
            .json(json!({
                "model": self.settings.model,
                "prompt": prompt(bucket),
                "stream": false,
            }))
            .timeout(budget.min(self.settings.timeout));

        let response = self.transport.send(&request)?;
        if !response.is_success() {
            return Err(SummaryError::Status(response.status));
        }
        let text = response
            .body
            .get("response")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if text.is_empty() {
            return Err(SummaryError::Empty);
        }
        Ok(text.to_string())
    }
}

fn prompt(bucket: &DayBucket) -> String {
    let mut prompt = format!(
        "Write a short first-person journal summary (3-5 sentences) of this developer's work on {}. \
         Mention the main themes, not every commit.\n\nCommits:\n",
        bucket.date.format("%A, %B %-d, %Y")
    );
    for commit in bucket.chronological() {
        prompt.push_str(&format!("- [{}] {}\n", commit.repository_name, commit.message));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_support::ScriptedTransport;
    use crate::http::HttpResponse;
    use crate::model::*;
    use chrono::DateTime;

    fn settings() -> OllamaSettings {
        OllamaSettings { url: "http://ollama.test".into(), model: "llama3.2".into(), timeout: Duration::from_secs(60) }
    }

    fn bucket() -> DayBucket {
        let mut bucket = DayBucket::new("2024-03-05".parse().unwrap());
        let record = CommitRecord {
            hash: "abc1234".into(),
            author: "Ada".into(),
            timestamp: DateTime::parse_from_rfc3339("2024-03-05T10:00:00Z").unwrap(),
            message: "Add tokenizer".into(),
            repository_name: "repoA".into(),
            files_changed: None,
            source: CommitSource::Local,
            remote_url: None,
        };
        bucket.commits.insert(record.key(), record);
        bucket.recompute();
        bucket
    }

    #[test]
    fn posts_prompt_and_returns_text() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(HttpResponse::ok(json!({"response": "  Built a tokenizer.  "})))]));
        let summarizer = OllamaSummarizer::new(transport.clone(), settings());

        let text = summarizer.summarize(&bucket(), Duration::from_secs(5)).unwrap();
        assert_eq!(text, "Built a tokenizer.");

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].url, "http://ollama.test/api/generate");
        assert_eq!(requests[0].timeout, Duration::from_secs(5));
        let body = requests[0].body.as_ref().unwrap();
        assert_eq!(body["stream"], false);
        assert!(body["prompt"].as_str().unwrap().contains("[repoA] Add tokenizer"));
    }

    #[test]
    fn failures_degrade_to_no_summary() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(HttpError::Transport("connection refused".into())),
            Ok(HttpResponse::status(500, Value::Null)),
            Ok(HttpResponse::ok(json!({"response": ""}))),
        ]));
        let summarizer = OllamaSummarizer::new(transport, settings());
        let provider: Option<&dyn SummaryProvider> = Some(&summarizer);

        for _ in 0..3 {
            assert_eq!(summarize_or_skip(provider, &bucket(), Duration::from_secs(1), &Deadline::never()), None);
        }
    }

    #[test]
    fn no_provider_or_expired_deadline_means_no_summary() {
        assert_eq!(summarize_or_skip(None, &bucket(), Duration::from_secs(1), &Deadline::never()), None);

        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let summarizer = OllamaSummarizer::new(transport.clone(), settings());
        let expired = Deadline::after(Duration::ZERO);
        assert_eq!(summarize_or_skip(Some(&summarizer as &dyn SummaryProvider), &bucket(), Duration::from_secs(1), &expired), None);
        assert!(transport.urls().is_empty());
    }
}
