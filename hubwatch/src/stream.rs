//! Long-lived, cancellable event stream over HTTP. Decodes the blank-line delimited
//! protocol into typed events and hands them to the owner through a channel.
//!
//! The client never retries; reconnect and fallback belong to the monitors.

use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::ApiError;
use crate::sse::{EventDecoder, RawEvent};
use crate::types::{AppStatusPayload, HealthPayload, ServerHealthPayload};

/// Upper bound on getting response headers (or an error body) back from the server.
pub const SETUP_TIMEOUT: Duration = Duration::from_secs(30);

/// The two push endpoints exposed by the control service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamChannel {
    /// `health` + `appStatus`
    Deployment,
    /// `serverHealth`
    Server,
}

impl StreamChannel {
    pub fn path(self) -> &'static str {
        match self {
            StreamChannel::Deployment => "deployment/health/stream",
            StreamChannel::Server => "server/health/stream",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Health(HealthPayload),
    AppStatus(AppStatusPayload),
    ServerHealth(ServerHealthPayload),
    Other { name: String, data: Value },
}

impl StreamEvent {
    /// JSON-decode a raw block according to its event name.
    pub fn decode(raw: &RawEvent) -> Result<Self, serde_json::Error> {
        Ok(match raw.event.as_str() {
            "health" => StreamEvent::Health(serde_json::from_str(&raw.data)?),
            "appStatus" => StreamEvent::AppStatus(serde_json::from_str(&raw.data)?),
            "serverHealth" => StreamEvent::ServerHealth(serde_json::from_str(&raw.data)?),
            other => StreamEvent::Other {
                name: other.to_string(),
                data: serde_json::from_str(&raw.data)?,
            },
        })
    }

    pub fn event_type(&self) -> &str {
        match self {
            StreamEvent::Health(_) => "health",
            StreamEvent::AppStatus(_) => "appStatus",
            StreamEvent::ServerHealth(_) => "serverHealth",
            StreamEvent::Other { name, .. } => name,
        }
    }
}

#[derive(Debug)]
pub enum StreamSignal {
    Event(StreamEvent),
    /// Transport failure; sent at most once and always last.
    Error(ApiError),
    /// Remote closed the connection normally; always last.
    Closed,
}

/// Aborts the underlying transport. Cloneable; cancelling twice is a no-op.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// An open connection. Dropping it cancels the transport.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<StreamSignal>,
    cancel: CancelHandle,
}

impl EventStream {
    pub fn new(rx: mpsc::UnboundedReceiver<StreamSignal>, cancel: CancelHandle) -> Self {
        Self { rx, cancel }
    }

    /// Next signal, or `None` once cancelled or after the final signal.
    pub async fn next(&mut self) -> Option<StreamSignal> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            sig = self.rx.recv() => sig,
        }
    }

    pub fn handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Callback form: `on_event` per event, `on_error` exactly once on transport
    /// failure, nothing after `cancel()`.
    pub fn spawn_callbacks<E, F>(mut self, mut on_event: E, on_error: F) -> CancelHandle
    where
        E: FnMut(StreamEvent) + Send + 'static,
        F: FnOnce(ApiError) + Send + 'static,
    {
        let handle = self.handle();
        tokio::spawn(async move {
            while let Some(sig) = self.next().await {
                match sig {
                    StreamSignal::Event(ev) => on_event(ev),
                    StreamSignal::Error(err) => {
                        on_error(err);
                        break;
                    }
                    StreamSignal::Closed => break,
                }
            }
        });
        handle
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Open `url` with the bearer `token`. Fails with `Unauthenticated` before touching
/// the network when no token is available, and with `Timeout` when the server does
/// not answer within [`SETUP_TIMEOUT`].
pub async fn open(
    http: &reqwest::Client,
    url: Url,
    token: Option<&str>,
    cancel: CancelHandle,
) -> Result<EventStream, ApiError> {
    let token = token.filter(|t| !t.is_empty()).ok_or(ApiError::Unauthenticated)?;

    let request = http
        .get(url.clone())
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .header(ACCEPT, "text/event-stream");
    let resp = tokio::time::timeout(SETUP_TIMEOUT, async {
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                message: crate::api::embedded_message(&body),
            });
        }
        Ok(resp)
    })
    .await
    .map_err(|_| ApiError::Timeout)??;
    debug!(%url, "event stream connected");

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(pump(resp, cancel.clone(), tx));
    Ok(EventStream::new(rx, cancel))
}

async fn pump(
    mut resp: reqwest::Response,
    cancel: CancelHandle,
    tx: mpsc::UnboundedSender<StreamSignal>,
) {
    let mut decoder = EventDecoder::new();
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            c = resp.chunk() => c,
        };
        match chunk {
            Ok(Some(bytes)) => {
                for raw in decoder.push(&bytes) {
                    if !emit(&raw, &cancel, &tx) {
                        return;
                    }
                }
            }
            Ok(None) => {
                if let Some(raw) = decoder.finish() {
                    if !emit(&raw, &cancel, &tx) {
                        return;
                    }
                }
                if !cancel.is_cancelled() {
                    let _ = tx.send(StreamSignal::Closed);
                }
                return;
            }
            Err(e) => {
                if !cancel.is_cancelled() {
                    let _ = tx.send(StreamSignal::Error(ApiError::Transport(e)));
                }
                return;
            }
        }
    }
}

// false once nobody should hear from this connection anymore
fn emit(raw: &RawEvent, cancel: &CancelHandle, tx: &mpsc::UnboundedSender<StreamSignal>) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    match StreamEvent::decode(raw) {
        Ok(ev) => tx.send(StreamSignal::Event(ev)).is_ok(),
        Err(e) => {
            warn!(event = %raw.event, id = ?raw.id, "dropping malformed event payload: {e}");
            true
        }
    }
}
