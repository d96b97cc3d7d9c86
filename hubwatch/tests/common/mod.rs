//! Scripted in-memory control service shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};

use hubwatch::actions::Operation;
use hubwatch::dispatcher::LiveCheck;
use hubwatch::stream::{CancelHandle, EventStream, StreamChannel, StreamSignal};
use hubwatch::types::{
    ApplicationConfig, DeploymentResponse, HealthPayload, RunningService, ServerHealthSummary,
};
use hubwatch::{ApiError, ControlApi};

pub enum StreamScript {
    Open(mpsc::UnboundedReceiver<StreamSignal>),
    Fail(ApiError),
}

#[derive(Default)]
pub struct FakeApi {
    /// `None` answers with a 503.
    pub healthy: Mutex<Option<bool>>,
    pub apps: Mutex<Vec<ApplicationConfig>>,
    pub live: Mutex<HashMap<String, bool>>,
    /// When set, every live probe waits for a permit first.
    pub live_gate: Mutex<Option<Arc<Semaphore>>>,
    pub summary: Mutex<Option<ServerHealthSummary>>,
    pub services: Mutex<Option<Vec<RunningService>>>,
    /// `None` answers with a 500 carrying `perform_error`.
    pub perform_reply: Mutex<Option<DeploymentResponse>>,
    pub perform_error: Mutex<Option<String>>,
    pub perform_gate: Mutex<Option<Arc<Semaphore>>>,
    pub streams: Mutex<HashMap<StreamChannel, VecDeque<StreamScript>>>,

    pub health_calls: AtomicUsize,
    pub apps_calls: AtomicUsize,
    pub summary_calls: AtomicUsize,
    pub open_calls: AtomicUsize,
    pub live_calls: Mutex<Vec<String>>,
    pub performed: Mutex<Vec<Operation>>,
}

fn unavailable() -> ApiError {
    ApiError::Http {
        status: 503,
        message: None,
    }
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_apps(apps: Vec<ApplicationConfig>) -> Arc<Self> {
        let fake = Self::default();
        *fake.apps.lock().unwrap() = apps;
        *fake.healthy.lock().unwrap() = Some(true);
        Arc::new(fake)
    }

    /// Queue a successful connect on `channel`; the returned sender feeds it.
    pub fn push_stream(&self, channel: StreamChannel) -> mpsc::UnboundedSender<StreamSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script(channel, StreamScript::Open(rx));
        tx
    }

    pub fn push_stream_error(&self, channel: StreamChannel, err: ApiError) {
        self.script(channel, StreamScript::Fail(err));
    }

    fn script(&self, channel: StreamChannel, s: StreamScript) {
        self.streams
            .lock()
            .unwrap()
            .entry(channel)
            .or_default()
            .push_back(s);
    }

    pub fn set_perform_reply(&self, reply: DeploymentResponse) {
        *self.perform_reply.lock().unwrap() = Some(reply);
    }

    pub fn gate_perform(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.perform_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn gate_live(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.live_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn performed(&self) -> Vec<Operation> {
        self.performed.lock().unwrap().clone()
    }

    pub fn live_calls(&self) -> Vec<String> {
        self.live_calls.lock().unwrap().clone()
    }
}

async fn pass(gate: Option<Arc<Semaphore>>) {
    if let Some(g) = gate {
        if let Ok(permit) = g.acquire().await {
            permit.forget();
        }
    }
}

#[async_trait]
impl ControlApi for FakeApi {
    async fn health(&self) -> Result<HealthPayload, ApiError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        let healthy = *self.healthy.lock().unwrap();
        healthy
            .map(|healthy| HealthPayload {
                healthy,
                message: None,
            })
            .ok_or_else(unavailable)
    }

    async fn applications(&self) -> Result<Vec<ApplicationConfig>, ApiError> {
        self.apps_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.apps.lock().unwrap().clone())
    }

    async fn app_live(&self, app: &str) -> Result<bool, ApiError> {
        self.live_calls.lock().unwrap().push(app.to_string());
        let gate = self.live_gate.lock().unwrap().clone();
        pass(gate).await;
        let live = self.live.lock().unwrap().get(app).copied();
        live.ok_or_else(unavailable)
    }

    async fn server_summary(&self) -> Result<ServerHealthSummary, ApiError> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        let summary = self.summary.lock().unwrap().clone();
        summary.ok_or_else(unavailable)
    }

    async fn running_services(&self) -> Result<Vec<RunningService>, ApiError> {
        let services = self.services.lock().unwrap().clone();
        services.ok_or_else(unavailable)
    }

    async fn perform(&self, op: &Operation) -> Result<DeploymentResponse, ApiError> {
        self.performed.lock().unwrap().push(op.clone());
        let gate = self.perform_gate.lock().unwrap().clone();
        pass(gate).await;
        let reply = self.perform_reply.lock().unwrap().clone();
        reply.ok_or_else(|| ApiError::Http {
            status: 500,
            message: self.perform_error.lock().unwrap().clone(),
        })
    }

    async fn open_stream(
        &self,
        channel: StreamChannel,
        cancel: CancelHandle,
    ) -> Result<EventStream, ApiError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .streams
            .lock()
            .unwrap()
            .get_mut(&channel)
            .and_then(VecDeque::pop_front);
        match next {
            Some(StreamScript::Open(rx)) => Ok(EventStream::new(rx, cancel)),
            Some(StreamScript::Fail(e)) => Err(e),
            None => Err(unavailable()),
        }
    }
}

/// Remembers every application it was asked to re-check.
#[derive(Default)]
pub struct RecordingLiveCheck {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingLiveCheck {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl LiveCheck for RecordingLiveCheck {
    fn request_live_check(&self, app: &str) {
        self.calls.lock().unwrap().push(app.to_string());
    }
}

pub fn app_with_url(name: &str) -> ApplicationConfig {
    let mut app = ApplicationConfig::named(name);
    app.application_url = Some(format!("https://{name}.example.com"));
    app
}
