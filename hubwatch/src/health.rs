//! Control-service reachability and per-application liveness.
//!
//! The monitor is the only writer of its `HealthState`; everyone else reads
//! snapshots or subscribes to changes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::api::ControlApi;
use crate::config::MonitorConfig;
use crate::error::ApiError;
use crate::monitor::{supervise, MonitorMode, Supervised};
use crate::stream::{StreamChannel, StreamEvent};
use crate::types::{AppStatusPayload, ApplicationConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ServiceStatus {
    #[default]
    Checking,
    Online,
    Offline,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LiveStatus {
    #[default]
    Unknown,
    Checking,
    Live,
    Dead,
}

impl From<Option<bool>> for LiveStatus {
    fn from(v: Option<bool>) -> Self {
        match v {
            Some(true) => LiveStatus::Live,
            Some(false) => LiveStatus::Dead,
            None => LiveStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthState {
    pub service: ServiceStatus,
    pub applications: Vec<ApplicationConfig>,
    /// Only applications that declare an `application_url` have an entry.
    pub live: BTreeMap<String, LiveStatus>,
    /// Application list fetch in flight.
    pub loading: bool,
    pub mode: MonitorMode,
    pub updated_at: Option<DateTime<Utc>>,
}

impl HealthState {
    pub fn live_status(&self, app: &str) -> LiveStatus {
        self.live.get(app).copied().unwrap_or_default()
    }

    pub fn application(&self, name: &str) -> Option<&ApplicationConfig> {
        self.applications.iter().find(|a| a.name == name)
    }

    pub fn filtered(&self, filter: &str) -> Vec<&ApplicationConfig> {
        self.applications
            .iter()
            .filter(|a| a.matches_filter(filter))
            .collect()
    }
}

struct Inner {
    api: Arc<dyn ControlApi>,
    config: MonitorConfig,
    state: watch::Sender<HealthState>,
    // Per-application check sequence; a probe result only lands if it is still current.
    seq: Mutex<HashMap<String, u64>>,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<Inner>,
}

impl HealthMonitor {
    /// Fetch the application list, then stream (or poll) until `shutdown`.
    pub fn start(api: Arc<dyn ControlApi>, config: MonitorConfig) -> Self {
        let (state, _) = watch::channel(HealthState {
            service: ServiceStatus::Checking,
            ..HealthState::default()
        });
        let inner = Arc::new(Inner {
            api,
            config,
            state,
            seq: Mutex::new(HashMap::new()),
            token: CancellationToken::new(),
            task: Mutex::new(None),
        });

        let run = inner.clone();
        let token = inner.token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = async {
                    Inner::load_applications(&run).await;
                    supervise(run).await;
                } => {}
            }
        });
        if let Ok(mut t) = inner.task.lock() {
            *t = Some(handle);
        }
        Self { inner }
    }

    pub fn snapshot(&self) -> HealthState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.inner.state.subscribe()
    }

    pub fn service_status(&self) -> ServiceStatus {
        self.inner.state.borrow().service
    }

    pub fn live_status(&self, app: &str) -> LiveStatus {
        self.inner.state.borrow().live_status(app)
    }

    /// Probe one application now. Resolves to `Live`/`Dead` (any failure is `Dead`);
    /// `Unknown` when the application has no URL to probe or the monitor is gone.
    pub async fn check_app_live_status(&self, app: &str) -> LiveStatus {
        if !self.inner.probe_target(app) {
            return LiveStatus::Unknown;
        }
        match Inner::spawn_probe(&self.inner, app.to_string()).await {
            Ok(status) => status,
            Err(_) => LiveStatus::Dead,
        }
    }

    /// Fire-and-forget variant of `check_app_live_status`.
    pub fn request_live_check(&self, app: &str) {
        if self.inner.probe_target(app) {
            drop(Inner::spawn_probe(&self.inner, app.to_string()));
        }
    }

    /// Re-fetch the application list and the service health once.
    pub async fn refresh(&self) {
        Inner::load_applications(&self.inner).await;
        Inner::poll_health(&self.inner).await;
    }

    /// Cancel the stream, timers and in-flight probes; no update lands afterwards.
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
    // All writes go through here so nothing lands after teardown.
    fn update(&self, f: impl FnOnce(&mut HealthState)) {
        if self.token.is_cancelled() {
            return;
        }
        self.state.send_modify(|s| {
            f(s);
            s.updated_at = Some(Utc::now());
        });
    }

    fn probe_target(&self, app: &str) -> bool {
        self.state
            .borrow()
            .application(app)
            .is_some_and(ApplicationConfig::has_live_check)
    }

    async fn load_applications(this: &Arc<Self>) {
        this.update(|s| s.loading = true);
        match this.api.applications().await {
            Ok(apps) => {
                info!(count = apps.len(), "application list loaded");
                this.update(|s| {
                    let live = apps
                        .iter()
                        .filter(|a| a.has_live_check())
                        .map(|a| (a.name.clone(), s.live_status(&a.name)))
                        .collect();
                    s.live = live;
                    s.applications = apps;
                    s.loading = false;
                });
            }
            Err(e) => {
                error!("failed to load applications: {e}");
                this.update(|s| s.loading = false);
            }
        }
    }

    async fn apply_health(this: &Arc<Self>, healthy: bool) {
        let next = if healthy {
            ServiceStatus::Online
        } else {
            ServiceStatus::Offline
        };
        let prev = this.state.borrow().service;
        if prev == ServiceStatus::Offline && next == ServiceStatus::Online {
            info!("control service back online, refreshing applications");
            Self::load_applications(this).await;
        }
        if prev != next {
            debug!(?prev, ?next, "service status changed");
        }
        this.update(|s| s.service = next);
    }

    async fn poll_health(this: &Arc<Self>) {
        match this.api.health().await {
            Ok(h) => Self::apply_health(this, h.healthy).await,
            Err(e) => {
                debug!("health poll failed: {e}");
                this.update(|s| s.service = ServiceStatus::Error);
            }
        }
    }

    // Lock order: `seq`, then `state`. The `seq` guard is held across the write.
    fn apply_app_statuses(&self, payload: AppStatusPayload) {
        let mut seq = self.seq.lock().ok();
        if let Some(seq) = seq.as_mut() {
            // Authoritative snapshot: anything still in flight is now stale.
            seq.values_mut().for_each(|n| *n += 1);
        }
        self.update(|s| {
            s.live = payload
                .app_statuses
                .into_iter()
                .map(|(name, v)| (name, LiveStatus::from(v)))
                .collect();
        });
    }

    fn begin_check(&self, app: &str) -> u64 {
        let mut seq = self.seq.lock().ok();
        let ticket = seq.as_mut().map_or(0, |seq| {
            let n = seq.entry(app.to_string()).or_insert(0);
            *n += 1;
            *n
        });
        self.update(|s| {
            s.live.insert(app.to_string(), LiveStatus::Checking);
        });
        ticket
    }

    fn finish_check(&self, app: &str, ticket: u64, status: LiveStatus) {
        let seq = self.seq.lock().ok();
        let current = seq
            .as_ref()
            .is_some_and(|seq| seq.get(app).copied() == Some(ticket));
        if !current {
            debug!(app, "discarding stale probe result");
            return;
        }
        self.update(|s| {
            s.live.insert(app.to_string(), status);
        });
    }

    fn spawn_probe(this: &Arc<Self>, app: String) -> JoinHandle<LiveStatus> {
        let ticket = this.begin_check(&app);
        let inner = this.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                biased;
                _ = inner.token.cancelled() => return LiveStatus::Unknown,
                r = inner.api.app_live(&app) => match r {
                    Ok(true) => LiveStatus::Live,
                    Ok(false) => LiveStatus::Dead,
                    Err(e) => {
                        debug!(app = %app, "live probe failed: {e}");
                        LiveStatus::Dead
                    }
                },
            };
            inner.finish_check(&app, ticket, status);
            status
        })
    }

    fn probe_all(this: &Arc<Self>) {
        let targets: Vec<String> = this
            .state
            .borrow()
            .applications
            .iter()
            .filter(|a| a.has_live_check())
            .map(|a| a.name.clone())
            .collect();
        for app in targets {
            drop(Self::spawn_probe(this, app));
        }
    }
}

const HEALTH_TIMER: usize = 0;
const APPS_TIMER: usize = 1;

#[async_trait]
impl Supervised for Inner {
    fn label(&self) -> &'static str {
        "health"
    }

    fn channel(&self) -> StreamChannel {
        StreamChannel::Deployment
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
        vec![self.config.health_poll, self.config.app_poll]
    }

    fn reconnect_period(&self) -> Duration {
        self.config.reconnect
    }

    async fn on_event(this: &Arc<Self>, ev: StreamEvent) {
        match ev {
            StreamEvent::Health(h) => Self::apply_health(this, h.healthy).await,
            StreamEvent::AppStatus(p) => this.apply_app_statuses(p),
            other => debug!(event = other.event_type(), "ignoring event"),
        }
    }

    async fn on_poll(this: &Arc<Self>, timer: usize) {
        match timer {
            HEALTH_TIMER => Self::poll_health(this).await,
            APPS_TIMER => Self::probe_all(this),
            _ => {}
        }
    }

    fn on_unauthenticated(&self, err: &ApiError) {
        error!("health stream rejected: {err}");
        self.update(|s| s.service = ServiceStatus::Error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{HttpControlClient, DEFAULT_BASE_URL};

    fn inner() -> Inner {
        let api = HttpControlClient::new(DEFAULT_BASE_URL).unwrap();
        let (state, _) = watch::channel(HealthState::default());
        Inner {
            api: Arc::new(api),
            config: MonitorConfig::default(),
            state,
            seq: Mutex::new(HashMap::new()),
            token: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    #[test]
    fn replacement_racing_a_check_result_always_wins() {
        let inner = inner();
        for _ in 0..200 {
            let ticket = inner.begin_check("web");
            std::thread::scope(|scope| {
                scope.spawn(|| inner.finish_check("web", ticket, LiveStatus::Live));
                scope.spawn(|| {
                    inner.apply_app_statuses(AppStatusPayload {
                        app_statuses: [("web".to_string(), Some(false))].into_iter().collect(),
                    })
                });
            });
            assert_eq!(inner.state.borrow().live_status("web"), LiveStatus::Dead);
        }
    }

    #[test]
    fn stale_ticket_is_discarded() {
        let inner = inner();
        let first = inner.begin_check("web");
        let second = inner.begin_check("web");
        inner.finish_check("web", first, LiveStatus::Dead);
        assert_eq!(inner.state.borrow().live_status("web"), LiveStatus::Checking);
        inner.finish_check("web", second, LiveStatus::Live);
        assert_eq!(inner.state.borrow().live_status("web"), LiveStatus::Live);
    }
}
