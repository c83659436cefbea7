//! Capture events and the PostHog batch transport.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

const LIB_NAME: &str = "mailbridge";

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("analytics client already closed")]
    Closed,
    #[error("batch request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("batch rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Property map attached to a capture, built fluently.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Properties(Map<String, Value>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under `key`. A value that fails to serialize is stored
    /// as null so one bad property does not drop the capture.
    pub fn set<V: Serialize>(mut self, key: impl Into<String>, value: V) -> Self {
        let key = key.into();
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, property = %key, "property not serializable");
                Value::Null
            }
        };
        self.0.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub distinct_id: String,
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub properties: Properties,
}

/// Opens a fresh analytics session for one webhook request.
pub trait AnalyticsConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn AnalyticsClient>, AnalyticsError>;
}

/// A session that buffers captures until `close` transmits them.
#[async_trait]
pub trait AnalyticsClient: Send {
    fn enqueue(&mut self, capture: Capture) -> Result<(), AnalyticsError>;

    /// Sends everything pending and waits for the backend to accept it.
    async fn close(&mut self) -> Result<(), AnalyticsError>;
}

#[derive(Clone)]
pub struct PosthogConnector {
    http: reqwest::Client,
    api_key: String,
    batch_url: String,
}

impl PosthogConnector {
    pub fn new(
        api_key: impl Into<String>,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, AnalyticsError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("{LIB_NAME}/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(AnalyticsError::Client)?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            batch_url: format!("{}/batch/", endpoint.trim_end_matches('/')),
        })
    }
}

impl AnalyticsConnector for PosthogConnector {
    fn connect(&self) -> Result<Box<dyn AnalyticsClient>, AnalyticsError> {
        Ok(Box::new(PosthogClient {
            http: self.http.clone(),
            api_key: self.api_key.clone(),
            batch_url: self.batch_url.clone(),
            pending: Vec::new(),
            closed: false,
        }))
    }
}

pub struct PosthogClient {
    http: reqwest::Client,
    api_key: String,
    batch_url: String,
    pending: Vec<Capture>,
    closed: bool,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    api_key: &'a str,
    batch: Vec<BatchItem<'a>>,
}

#[derive(Serialize)]
struct BatchItem<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    event: &'a str,
    distinct_id: &'a str,
    timestamp: &'a DateTime<Utc>,
    properties: Properties,
}

impl<'a> BatchItem<'a> {
    fn capture(capture: &'a Capture) -> Self {
        let properties = capture
            .properties
            .clone()
            .set("$lib", LIB_NAME)
            .set("$lib_version", env!("CARGO_PKG_VERSION"));
        Self {
            kind: "capture",
            event: &capture.event,
            distinct_id: &capture.distinct_id,
            timestamp: &capture.timestamp,
            properties,
        }
    }
}

#[async_trait]
impl AnalyticsClient for PosthogClient {
    fn enqueue(&mut self, capture: Capture) -> Result<(), AnalyticsError> {
        if self.closed {
            return Err(AnalyticsError::Closed);
        }
        self.pending.push(capture);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), AnalyticsError> {
        self.closed = true;
        if self.pending.is_empty() {
            return Ok(());
        }

        let request = BatchRequest {
            api_key: &self.api_key,
            batch: self.pending.iter().map(BatchItem::capture).collect(),
        };
        let response = self
            .http
            .post(&self.batch_url)
            .json(&request)
            .send()
            .await
            .map_err(AnalyticsError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyticsError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(
            captures = self.pending.len(),
            status = status.as_u16(),
            "posthog batch accepted"
        );
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records captures that were successfully closed.
    #[derive(Clone, Default)]
    pub struct RecordingConnector {
        pub sent: Arc<Mutex<Vec<Capture>>>,
        pub fail_enqueue: bool,
        pub fail_close: bool,
    }

    impl RecordingConnector {
        pub fn sent(&self) -> Vec<Capture> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl AnalyticsConnector for RecordingConnector {
        fn connect(&self) -> Result<Box<dyn AnalyticsClient>, AnalyticsError> {
            Ok(Box::new(RecordingClient {
                sent: self.sent.clone(),
                pending: Vec::new(),
                fail_enqueue: self.fail_enqueue,
                fail_close: self.fail_close,
            }))
        }
    }

    struct RecordingClient {
        sent: Arc<Mutex<Vec<Capture>>>,
        pending: Vec<Capture>,
        fail_enqueue: bool,
        fail_close: bool,
    }

    #[async_trait]
    impl AnalyticsClient for RecordingClient {
        fn enqueue(&mut self, capture: Capture) -> Result<(), AnalyticsError> {
            if self.fail_enqueue {
                return Err(AnalyticsError::Closed);
            }
            self.pending.push(capture);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), AnalyticsError> {
            if self.fail_close {
                return Err(AnalyticsError::Rejected {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            self.sent.lock().unwrap().append(&mut self.pending);
            Ok(())
        }
    }
}
