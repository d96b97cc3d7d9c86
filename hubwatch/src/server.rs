//! Host resource health and the managed OS services, same stream-or-poll shape as
//! the health monitor but with a single event type.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::api::ControlApi;
use crate::config::MonitorConfig;
use crate::error::ApiError;
use crate::monitor::{supervise, MonitorMode, Supervised};
use crate::stream::{StreamChannel, StreamEvent};
use crate::types::{RunningService, ServerHealthPayload, ServerHealthSummary};

#[derive(Debug, Clone, Serialize)]
pub struct ServerState {
    pub summary: Option<ServerHealthSummary>,
    pub services: Vec<RunningService>,
    /// Cleared whenever a poll cycle finishes, whatever its outcome.
    pub loading: bool,
    pub mode: MonitorMode,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            summary: None,
            services: Vec::new(),
            loading: true,
            mode: MonitorMode::Connecting,
            updated_at: None,
        }
    }
}

struct Inner {
    api: Arc<dyn ControlApi>,
    config: MonitorConfig,
    state: watch::Sender<ServerState>,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct ServerMonitor {
    inner: Arc<Inner>,
}

impl ServerMonitor {
    pub fn start(api: Arc<dyn ControlApi>, config: MonitorConfig) -> Self {
        let (state, _) = watch::channel(ServerState::default());
        let inner = Arc::new(Inner {
            api,
            config,
            state,
            token: CancellationToken::new(),
            task: Mutex::new(None),
        });

        let run = inner.clone();
        let token = inner.token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = supervise(run) => {}
            }
        });
        if let Ok(mut t) = inner.task.lock() {
            *t = Some(handle);
        }
        Self { inner }
    }

    pub fn snapshot(&self) -> ServerState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.inner.state.subscribe()
    }

    /// One summary + services poll, regardless of mode.
    pub async fn refresh(&self) {
        self.inner.poll().await;
    }

    pub async fn shutdown(&self) {
        self.inner.token.cancel();
        let handle = self.inner.task.lock().ok().and_then(|mut t| t.take());
        if let Some(h) = handle {
            let _ = h.await;
        }
        self.inner.state.send_modify(|s| s.mode = MonitorMode::Stopped);
    }
}

impl Inner {
    fn update(&self, f: impl FnOnce(&mut ServerState)) {
        if self.token.is_cancelled() {
            return;
        }
        self.state.send_modify(|s| {
            f(s);
            s.updated_at = Some(Utc::now());
        });
    }

    fn apply(&self, payload: ServerHealthPayload) {
        self.update(|s| {
            s.summary = Some(payload.summary);
            s.services = payload.running_services;
            s.loading = false;
        });
    }

    // Summary and services are independent: either may fail and keep its last value.
    async fn poll(&self) {
        self.update(|s| s.loading = true);
        let summary = async {
            match self.api.server_summary().await {
                Ok(v) => self.update(|s| s.summary = Some(v)),
                Err(e) => debug!("server summary poll failed: {e}"),
            }
        };
        let services = async {
            match self.api.running_services().await {
                Ok(v) => self.update(|s| s.services = v),
                Err(e) => debug!("running services poll failed: {e}"),
            }
        };
        tokio::join!(summary, services);
        self.update(|s| s.loading = false);
    }
}

#[async_trait]
impl Supervised for Inner {
    fn label(&self) -> &'static str {
        "server"
    }

    fn channel(&self) -> StreamChannel {
        StreamChannel::Server
    }

    fn api(&self) -> &dyn ControlApi {
        &*self.api
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn set_mode(&self, mode: MonitorMode) {
        self.update(|s| s.mode = mode);
    }

    fn poll_periods(&self) -> Vec<Duration> {
        vec![self.config.server_poll]
    }

    fn reconnect_period(&self) -> Duration {
        self.config.reconnect
    }

    async fn on_event(this: &Arc<Self>, ev: StreamEvent) {
        match ev {
            StreamEvent::ServerHealth(p) => this.apply(p),
            other => debug!(event = other.event_type(), "ignoring event"),
        }
    }

    async fn on_poll(this: &Arc<Self>, _timer: usize) {
        this.poll().await;
    }

    fn on_unauthenticated(&self, err: &ApiError) {
        error!("server stream rejected: {err}");
        self.update(|s| s.loading = false);
    }
}
