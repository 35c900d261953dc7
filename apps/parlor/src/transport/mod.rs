//! The request/response primitives the orchestrator is built on. The
//! server only speaks discrete HTTP exchanges: a long-lived watch GET
//! whose body trickles in, and short one-shot command exchanges. Both
//! sit behind [`PollTransport`] so the client loop can be driven by the
//! real HTTP binding or a scripted mock.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

pub mod http;
pub mod mock;

pub use http::HttpTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}

/// One open inbound watch exchange. `next_chunk` yields body slices as
/// they arrive; `Ok(None)` is the server finishing the exchange
/// cleanly, which the orchestrator answers with a resume request.
#[async_trait]
pub trait WatchExchange: Send {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError>;
}

#[async_trait]
pub trait PollTransport: Send + Sync {
    /// Opens a watch exchange. A non-success status is reported here,
    /// before any chunk is delivered.
    async fn watch(&self, url: Url) -> Result<Box<dyn WatchExchange>, TransportError>;

    /// One-shot command exchange with no request body.
    async fn get(&self, url: Url) -> Result<(), TransportError>;

    /// One-shot command exchange carrying raw UTF-8 text.
    async fn post_text(&self, url: Url, body: String) -> Result<(), TransportError>;
}

/// Endpoint construction. The protocol uses positional query strings
/// (`?room&name`, not `?key=value`), so components are percent-encoded
/// individually and joined with `&` by hand.
pub mod endpoints {
    use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

    use super::{TransportError, Url};

    pub fn new_person(
        base: &Url,
        room: &str,
        display_name: &str,
    ) -> Result<Url, TransportError> {
        endpoint(
            base,
            "new_person",
            &format!("{}&{}", encode(room), encode(display_name)),
        )
    }

    pub fn watch_person(base: &Url, person_id: &str, cursor: u64) -> Result<Url, TransportError> {
        endpoint(base, "watch_person", &format!("{person_id}&{cursor}"))
    }

    pub fn send_message(base: &Url, person_id: &str) -> Result<Url, TransportError> {
        endpoint(base, "send_message", person_id)
    }

    pub fn flip_tile(base: &Url, person_id: &str, tile: u32) -> Result<Url, TransportError> {
        endpoint(base, "flip_tile", &format!("{person_id}&{tile}"))
    }

    pub fn typing(base: &Url, person_id: &str, typing: bool) -> Result<Url, TransportError> {
        let method = if typing { "start_typing" } else { "stop_typing" };
        endpoint(base, method, person_id)
    }

    pub fn keep_alive(base: &Url, person_id: &str) -> Result<Url, TransportError> {
        endpoint(base, "keep_alive", person_id)
    }

    pub fn leave(base: &Url, person_id: &str) -> Result<Url, TransportError> {
        endpoint(base, "leave", person_id)
    }

    fn endpoint(base: &Url, method: &str, query: &str) -> Result<Url, TransportError> {
        let mut url = base
            .join(method)
            .map_err(|err| TransportError::InvalidUrl(format!("{method}: {err}")))?;
        url.set_query(Some(query));
        Ok(url)
    }

    fn encode(component: &str) -> String {
        utf8_percent_encode(component, NON_ALPHANUMERIC).to_string()
    }

}
