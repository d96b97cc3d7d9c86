//! Runs operator actions against the selected application, at most one in flight per
//! (application, action) pair. Every outcome ends the same way: the pair is released,
//! a notification goes out, and the application's liveness is re-checked.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::actions::{extract_logs, render_status, Action};
use crate::api::ControlApi;
use crate::health::HealthMonitor;
use crate::types::{ApplicationConfig, DeploymentResponse};

/// Anything that can be asked to re-probe an application in the background.
pub trait LiveCheck: Send + Sync {
    fn request_live_check(&self, app: &str);
}

impl LiveCheck for HealthMonitor {
    fn request_live_check(&self, app: &str) {
        HealthMonitor::request_live_check(self, app);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// One-shot, user-visible result of an action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
    pub app: String,
    pub action: String,
    pub at: DateTime<Utc>,
}

/// Text a presenter shows for `logs` and `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionDisplay {
    Logs(String),
    Status(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Succeeded {
        response: DeploymentResponse,
        display: Option<ActionDisplay>,
    },
    /// The server ran the request and reported `success: false`.
    Rejected { response: DeploymentResponse },
    /// Transport or protocol failure, already turned into operator text.
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Nothing selected; no-op.
    NoSelection,
    /// Same (application, action) already running; not started again.
    AlreadyActive,
    Finished(ActionOutcome),
}

pub fn task_key(app: &str, action: &str) -> String {
    format!("{app}:{action}")
}

type ActiveSet = Arc<Mutex<HashSet<String>>>;

// Holds one key in the active set; releases it on drop, whatever path we leave by.
struct ActiveGuard {
    set: ActiveSet,
    key: String,
}

impl ActiveGuard {
    fn acquire(set: &ActiveSet, key: String) -> Option<Self> {
        let mut active = set.lock().ok()?;
        if !active.insert(key.clone()) {
            return None;
        }
        Some(Self {
            set: set.clone(),
            key,
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.set.lock() {
            active.remove(&self.key);
        }
    }
}

pub struct ActionDispatcher {
    api: Arc<dyn ControlApi>,
    live: Arc<dyn LiveCheck>,
    selected: Mutex<Option<ApplicationConfig>>,
    active: ActiveSet,
    notices: mpsc::UnboundedSender<Notification>,
}

impl ActionDispatcher {
    pub fn new(
        api: Arc<dyn ControlApi>,
        live: Arc<dyn LiveCheck>,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (notices, rx) = mpsc::unbounded_channel();
        let d = Self {
            api,
            live,
            selected: Mutex::new(None),
            active: Arc::new(Mutex::new(HashSet::new())),
            notices,
        };
        (d, rx)
    }

    /// Select `app`; applications with a public URL get a liveness check right away.
    pub fn select(&self, app: ApplicationConfig) {
        debug!(app = %app.name, "selected");
        if app.has_live_check() {
            self.live.request_live_check(&app.name);
        }
        if let Ok(mut s) = self.selected.lock() {
            *s = Some(app);
        }
    }

    pub fn clear_selection(&self) {
        if let Ok(mut s) = self.selected.lock() {
            *s = None;
        }
    }

    pub fn selected(&self) -> Option<ApplicationConfig> {
        self.selected.lock().ok().and_then(|s| s.clone())
    }

    /// Whether `action` is running for the selected application.
    pub fn is_active(&self, action: &str) -> bool {
        let Some(app) = self.selected() else {
            return false;
        };
        let key = task_key(&app.name, action);
        self.active
            .lock()
            .map(|a| a.contains(&key))
            .unwrap_or(false)
    }

    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .active
            .lock()
            .map(|a| a.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub async fn execute_id(&self, action_id: &str) -> Dispatch {
        self.execute(Action::parse(action_id)).await
    }

    pub async fn execute(&self, action: Action) -> Dispatch {
        let Some(app) = self.selected() else {
            debug!(%action, "no application selected");
            return Dispatch::NoSelection;
        };
        let key = task_key(&app.name, action.id());
        let Some(guard) = ActiveGuard::acquire(&self.active, key) else {
            debug!(app = %app.name, %action, "already running");
            return Dispatch::AlreadyActive;
        };

        info!(app = %app.name, %action, "dispatching");
        let result = self.api.perform(&action.operation(&app.name)).await;
        drop(guard);

        let outcome = match result {
            Ok(response) if response.success => {
                self.notify(NoticeLevel::Success, &app, &action, &response.message);
                let display = match &action {
                    Action::Logs { .. } => Some(ActionDisplay::Logs(extract_logs(&response))),
                    Action::Status => Some(ActionDisplay::Status(render_status(&response))),
                    _ => None,
                };
                ActionOutcome::Succeeded { response, display }
            }
            Ok(response) => {
                warn!(app = %app.name, %action, message = %response.message, "action rejected");
                self.notify(NoticeLevel::Error, &app, &action, &response.message);
                ActionOutcome::Rejected { response }
            }
            Err(e) => {
                let message = e.user_message();
                warn!(app = %app.name, %action, "action failed: {message}");
                self.notify(NoticeLevel::Error, &app, &action, &message);
                ActionOutcome::Failed { message }
            }
        };

        self.live.request_live_check(&app.name);
        Dispatch::Finished(outcome)
    }

    fn notify(&self, level: NoticeLevel, app: &ApplicationConfig, action: &Action, message: &str) {
        let suffix = match level {
            NoticeLevel::Success => "Complete",
            NoticeLevel::Error => "Failed",
        };
        let _ = self.notices.send(Notification {
            level,
            title: format!("{} {suffix}", action.label()),
            message: message.to_string(),
            app: app.name.clone(),
            action: action.id().to_string(),
            at: Utc::now(),
        });
    }
}
