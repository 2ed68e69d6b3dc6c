//! Streaming consumer for the Icinga 2 events API.
//!
//! # Protocol
//! 1. `GET {base}/v1/events?queue=...&types=Notification[&filter=...]` with
//!    basic auth; the response body never ends while the server is healthy.
//! 2. The body is a sequence of newline-framed JSON notification objects.
//! 3. Any transport or decode error invalidates the stream; the caller drops
//!    it and reconnects via [`Client::event_stream_with_backoff`].

use crate::event::Notification;
use futures_util::StreamExt;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("invalid URL '{url}': {reason}")]
    Url { url: String, reason: String },
    #[error("connection error: {0}")]
    Connect(String),
    #[error("upstream returned HTTP status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Icinga 2 API client. Cheap to clone is not needed; one per process.
pub struct Client {
    http: reqwest::Client,
    base: reqwest::Url,
    user: String,
    password: String,
}

impl Client {
    /// Prepare a client for the API at `url`.
    ///
    /// `insecure` disables TLS certificate verification, for monitors with
    /// self-signed certificates.
    pub fn new(url: &str, user: &str, password: &str, insecure: bool) -> Result<Self, StreamError> {
        let base = reqwest::Url::parse(url).map_err(|e| StreamError::Url {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|e| StreamError::Connect(e.to_string()))?;

        Ok(Client {
            http,
            base,
            user: user.to_owned(),
            password: password.to_owned(),
        })
    }

    /// Open the long-lived event stream for `queue`.
    ///
    /// `filter` is the server-side filter expression; empty means none.
    pub async fn event_stream(&self, queue: &str, filter: &str) -> Result<EventStream, StreamError> {
        let mut url = self
            .base
            .join("v1/events")
            .map_err(|e| StreamError::Url {
                url: self.base.to_string(),
                reason: e.to_string(),
            })?;
        url.query_pairs_mut()
            .append_pair("queue", queue)
            .append_pair("types", "Notification");
        if !filter.is_empty() {
            url.query_pairs_mut().append_pair("filter", filter);
        }

        let response = self
            .http
            .get(url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status(status.as_u16()));
        }

        Ok(EventStream {
            body: Box::pin(response.bytes_stream()),
            buf: Vec::new(),
            eof: false,
        })
    }

    /// Open the event stream, exponentially backing off when it fails.
    ///
    /// On the k-th consecutive failure (0-indexed) this sleeps `2^k` seconds
    /// before retrying, and gives up with the last error after `retries`
    /// failed attempts. A later call starts over at `2^0`.
    pub async fn event_stream_with_backoff(
        &self,
        retries: u32,
        queue: &str,
        filter: &str,
    ) -> Result<EventStream, StreamError> {
        let mut last_err = None;

        for tries in 0..retries {
            debug!(tries = tries + 1, "connecting to icinga");

            match self.event_stream(queue, filter).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    let wait = 1u64 << tries;
                    debug!(error = %e, wait_secs = wait, "couldn't connect to icinga");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| StreamError::Connect("no connection attempts made".to_owned())))
    }
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

type BodyStream = Pin<Box<dyn futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>;

/// A live event stream. Invalid after the first error.
pub struct EventStream {
    body: BodyStream,
    buf: Vec<u8>,
    eof: bool,
}

impl EventStream {
    /// The next notification, `Ok(None)` on clean end of stream.
    ///
    /// Blank lines are skipped. A malformed line poisons the stream: the
    /// caller must discard it and reconnect, the buffered remainder is gone.
    pub async fn next(&mut self) -> Result<Option<Notification>, StreamError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.is_empty() {
                    continue;
                }
                return serde_json::from_slice(&line)
                    .map(Some)
                    .map_err(|e| StreamError::Decode(e.to_string()));
            }

            if self.eof {
                if self.buf.iter().all(u8::is_ascii_whitespace) {
                    return Ok(None);
                }
                // Trailing partial line: the stream was cut mid-record.
                return Err(StreamError::Decode("truncated notification at end of stream".to_owned()));
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(StreamError::Transport(e.to_string())),
                None => self.eof = true,
            }
        }
    }
}
