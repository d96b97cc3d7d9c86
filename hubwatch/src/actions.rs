//! Lifecycle actions an operator can trigger, and the remote operation each maps to.

use std::fmt;

use serde_json::Value;

use crate::types::{DeploymentResponse, ExecuteRequest};

/// Line count the dashboard asks for when showing logs.
pub const DEFAULT_LOG_LINES: u32 = 1000;

pub const NO_LOGS: &str = "No logs available";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleVerb {
    Checkout,
    Build,
    Verify,
    Deploy,
    Restart,
    Stop,
    FullDeploy,
}

impl LifecycleVerb {
    pub const ALL: [LifecycleVerb; 7] = [
        LifecycleVerb::Checkout,
        LifecycleVerb::Build,
        LifecycleVerb::Verify,
        LifecycleVerb::Deploy,
        LifecycleVerb::Restart,
        LifecycleVerb::Stop,
        LifecycleVerb::FullDeploy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleVerb::Checkout => "checkout",
            LifecycleVerb::Build => "build",
            LifecycleVerb::Verify => "verify",
            LifecycleVerb::Deploy => "deploy",
            LifecycleVerb::Restart => "restart",
            LifecycleVerb::Stop => "stop",
            LifecycleVerb::FullDeploy => "full-deploy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Status,
    Logs { lines: u32 },
    Lifecycle(LifecycleVerb),
    /// Anything else goes through the generic execute endpoint.
    Custom { name: String, lines: Option<u32> },
}

impl Action {
    /// Resolve an action id. Unknown ids become `Custom`.
    pub fn parse(id: &str) -> Self {
        match id {
            "status" => Action::Status,
            "logs" => Action::Logs {
                lines: DEFAULT_LOG_LINES,
            },
            other => LifecycleVerb::ALL
                .iter()
                .find(|v| v.as_str() == other)
                .map(|v| Action::Lifecycle(*v))
                .unwrap_or_else(|| Action::Custom {
                    name: other.to_string(),
                    lines: None,
                }),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Action::Status => "status",
            Action::Logs { .. } => "logs",
            Action::Lifecycle(v) => v.as_str(),
            Action::Custom { name, .. } => name,
        }
    }

    /// Override the line count for `logs` or a custom action; no effect otherwise.
    pub fn with_lines(self, n: u32) -> Self {
        match self {
            Action::Logs { .. } => Action::Logs { lines: n },
            Action::Custom { name, .. } => Action::Custom {
                name,
                lines: Some(n),
            },
            other => other,
        }
    }

    /// Capitalised id used in notification titles, e.g. `Full-deploy`.
    pub fn label(&self) -> String {
        let id = self.id();
        let mut chars = id.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    pub fn operation(&self, app: &str) -> Operation {
        let app = app.to_string();
        match self {
            Action::Status => Operation::Status { app },
            Action::Logs { lines } => Operation::Logs { app, lines: *lines },
            Action::Lifecycle(verb) => Operation::Lifecycle { verb: *verb, app },
            Action::Custom { name, lines } => Operation::Execute(ExecuteRequest {
                application_name: app,
                action: name.clone(),
                lines: *lines,
            }),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// One concrete remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `POST /deployment/{verb}/{app}`
    Lifecycle { verb: LifecycleVerb, app: String },
    /// `GET /deployment/status/{app}`
    Status { app: String },
    /// `GET /deployment/logs/{app}?lines=N`
    Logs { app: String, lines: u32 },
    /// `POST /deployment/execute`
    Execute(ExecuteRequest),
}

impl Operation {
    pub fn app(&self) -> &str {
        match self {
            Operation::Lifecycle { app, .. }
            | Operation::Status { app }
            | Operation::Logs { app, .. } => app,
            Operation::Execute(req) => &req.application_name,
        }
    }
}

/// Displayable log text: `data.logs.stdout`, then `data.logs` as text, then
/// `data.stdout`, then a fixed fallback.
pub fn extract_logs(resp: &DeploymentResponse) -> String {
    let Some(data) = resp.data.as_ref().filter(|d| d.is_object()) else {
        return NO_LOGS.to_string();
    };
    let text = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let logs = data.get("logs");
    text(logs.filter(|l| l.is_object()).and_then(|l| l.get("stdout")))
        .or_else(|| text(logs))
        .or_else(|| text(data.get("stdout")))
        .unwrap_or_else(|| NO_LOGS.to_string())
}

/// Pretty-printed `data`, or the whole response when there is no `data`.
pub fn render_status(resp: &DeploymentResponse) -> String {
    let rendered = match resp.data.as_ref() {
        Some(data) => serde_json::to_string_pretty(data),
        None => serde_json::to_string_pretty(resp),
    };
    rendered.unwrap_or_else(|e| format!("<unprintable status: {e}>"))
}
