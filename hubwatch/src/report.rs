//! Plain-text rendering of monitor snapshots and action results for the CLI.

use crate::dispatcher::{ActionDisplay, ActionOutcome, Dispatch, NoticeLevel, Notification};
use crate::health::{HealthState, LiveStatus, ServiceStatus};
use crate::server::ServerState;

pub fn service_badge(s: ServiceStatus) -> &'static str {
    match s {
        ServiceStatus::Checking => "Checking...",
        ServiceStatus::Online => "Online",
        ServiceStatus::Offline => "Offline",
        ServiceStatus::Error => "Error",
    }
}

pub fn live_badge(s: LiveStatus) -> &'static str {
    match s {
        LiveStatus::Unknown => "?",
        LiveStatus::Checking => "...",
        LiveStatus::Live => "live",
        LiveStatus::Dead => "down",
    }
}

pub fn health_lines(h: &HealthState, filter: &str) -> Vec<String> {
    let mut out = vec![format!(
        "deployer: {} [{:?}]{}",
        service_badge(h.service),
        h.mode,
        if h.loading { " (loading)" } else { "" }
    )];
    for app in h.filtered(filter) {
        let live = if app.has_live_check() {
            live_badge(h.live_status(&app.name))
        } else {
            "-"
        };
        out.push(format!("  {:<24} {:<5} {}", app.name, live, app.description()));
    }
    out
}

pub fn server_lines(s: &ServerState) -> Vec<String> {
    let mut out = Vec::new();
    match &s.summary {
        Some(m) => out.push(format!(
            "server: cpu {:.1}% | mem {:.1}% ({}/{}) | disk {:.1}% ({}/{}) | load {:.2} | up {} [{:?}]",
            m.cpu_usage,
            m.memory_usage,
            m.used_memory.as_deref().unwrap_or("?"),
            m.total_memory.as_deref().unwrap_or("?"),
            m.disk_usage,
            m.used_disk.as_deref().unwrap_or("?"),
            m.total_disk.as_deref().unwrap_or("?"),
            m.load_average,
            m.uptime.as_deref().unwrap_or("?"),
            s.mode,
        )),
        None if s.loading => out.push(format!("server: loading [{:?}]", s.mode)),
        None => out.push(format!("server: no data [{:?}]", s.mode)),
    }
    for svc in &s.services {
        out.push(format!("  {:<24} {}", svc.name, svc.status));
    }
    out
}

pub fn notification_line(n: &Notification) -> String {
    let mark = match n.level {
        NoticeLevel::Success => "ok",
        NoticeLevel::Error => "!!",
    };
    format!(
        "[{}] {mark} {} ({}): {}",
        n.at.format("%H:%M:%S"),
        n.title,
        n.app,
        n.message
    )
}

/// Free text for a finished dispatch: the log/status body when there is one.
pub fn dispatch_text(d: &Dispatch) -> Option<String> {
    match d {
        Dispatch::NoSelection => Some("no application selected".to_string()),
        Dispatch::AlreadyActive => Some("action already running".to_string()),
        Dispatch::Finished(ActionOutcome::Succeeded {
            display: Some(ActionDisplay::Logs(t) | ActionDisplay::Status(t)),
            ..
        }) => Some(t.clone()),
        Dispatch::Finished(_) => None,
    }
}
