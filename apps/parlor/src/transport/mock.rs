//! Scripted in-memory transport. Tests queue up watch exchanges and
//! command outcomes, then assert against the recorded request log.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use url::Url;

use super::{PollTransport, TransportError, WatchExchange};

/// How a scripted watch behaves after its chunks are drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEnd {
    /// Clean server-side completion.
    Complete,
    /// Mid-exchange connection failure.
    NetworkError,
    /// Stays open with no further data.
    Hold,
}

#[derive(Debug)]
pub enum ScriptedWatch {
    /// The open itself is rejected with this status.
    Reject(StatusCode),
    Stream { chunks: Vec<Bytes>, end: WatchEnd },
}

impl ScriptedWatch {
    pub fn stream(chunks: &[&str], end: WatchEnd) -> Self {
        ScriptedWatch::Stream {
            chunks: chunks
                .iter()
                .map(|chunk| Bytes::copy_from_slice(chunk.as_bytes()))
                .collect(),
            end,
        }
    }
}

/// Outcome of a scripted command exchange.
#[derive(Debug)]
pub enum CommandOutcome {
    Ok,
    Fail(TransportError),
    /// Never completes; the command stays in flight.
    Hold,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub body: Option<String>,
}

#[derive(Default)]
pub struct MockTransport {
    watches: Mutex<VecDeque<ScriptedWatch>>,
    command_outcomes: Mutex<VecDeque<CommandOutcome>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_watch(&self, watch: ScriptedWatch) {
        if let Ok(mut watches) = self.watches.lock() {
            watches.push_back(watch);
        }
    }

    /// Queues the outcome for the next command exchange. Commands with
    /// no scripted outcome succeed.
    pub fn push_command_outcome(&self, outcome: CommandOutcome) {
        if let Ok(mut outcomes) = self.command_outcomes.lock() {
            outcomes.push_back(outcome);
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn record(&self, method: &'static str, url: &Url, body: Option<String>) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                method,
                url: url.to_string(),
                body,
            });
        }
    }

    async fn run_command(&self, method: &'static str, url: Url, body: Option<String>) -> Result<(), TransportError> {
        self.record(method, &url, body);
        let outcome = self
            .command_outcomes
            .lock()
            .ok()
            .and_then(|mut outcomes| outcomes.pop_front());
        match outcome {
            None | Some(CommandOutcome::Ok) => Ok(()),
            Some(CommandOutcome::Fail(err)) => Err(err),
            Some(CommandOutcome::Hold) => futures_util::future::pending().await,
        }
    }
}

#[async_trait]
impl PollTransport for MockTransport {
    async fn watch(&self, url: Url) -> Result<Box<dyn WatchExchange>, TransportError> {
        self.record("WATCH", &url, None);
        let script = self
            .watches
            .lock()
            .ok()
            .and_then(|mut watches| watches.pop_front());
        match script {
            Some(ScriptedWatch::Reject(status)) => Err(TransportError::HttpStatus(status)),
            Some(ScriptedWatch::Stream { chunks, end }) => Ok(Box::new(MockWatch {
                chunks: chunks.into(),
                end,
            })),
            // An unscripted watch just hangs, like a silent server.
            None => Ok(Box::new(MockWatch {
                chunks: VecDeque::new(),
                end: WatchEnd::Hold,
            })),
        }
    }

    async fn get(&self, url: Url) -> Result<(), TransportError> {
        self.run_command("GET", url, None).await
    }

    async fn post_text(&self, url: Url, body: String) -> Result<(), TransportError> {
        self.run_command("POST", url, Some(body)).await
    }
}

struct MockWatch {
    chunks: VecDeque<Bytes>,
    end: WatchEnd,
}

#[async_trait]
impl WatchExchange for MockWatch {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        if let Some(chunk) = self.chunks.pop_front() {
            return Ok(Some(chunk));
        }
        match self.end {
            WatchEnd::Complete => Ok(None),
            WatchEnd::NetworkError => Err(TransportError::Network("scripted failure".into())),
            WatchEnd::Hold => futures_util::future::pending().await,
        }
    }
}
