//! Types that mirror the control service's JSON schema.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Deployment metadata for one managed application. `name` is the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApplicationConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symlink: Option<String>,
}

impl ApplicationConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Only applications with a public URL get liveness probes.
    pub fn has_live_check(&self) -> bool {
        self.application_url
            .as_deref()
            .is_some_and(|u| !u.is_empty())
    }

    /// Case-insensitive match on name, git url and service name. Empty filter matches all.
    pub fn matches_filter(&self, filter: &str) -> bool {
        if filter.is_empty() {
            return true;
        }
        let needle = filter.to_lowercase();
        let hit = |s: Option<&str>| s.is_some_and(|v| v.to_lowercase().contains(&needle));
        hit(Some(&self.name)) || hit(self.git_url.as_deref()) || hit(self.service_name.as_deref())
    }

    pub fn description(&self) -> String {
        let mut parts = Vec::new();
        if let Some(b) = self.build_type.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("Build: {b}"));
        }
        if let Some(s) = self.service_name.as_deref().filter(|s| !s.is_empty()) {
            parts.push(format!("Service: {s}"));
        }
        if parts.is_empty() {
            "No description".to_string()
        } else {
            parts.join(" | ")
        }
    }
}

// `health` event and GET /deployment/health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthPayload {
    #[serde(default)]
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// `appStatus` event; null means the server could not tell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppStatusPayload {
    #[serde(default)]
    pub app_statuses: HashMap<String, Option<bool>>,
}

// GET /deployment/applications/{app}/health
#[derive(Debug, Clone, Deserialize)]
pub struct LiveResponse {
    #[serde(default)]
    pub live: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Host metrics snapshot. Replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerHealthSummary {
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub disk_usage: f64,
    #[serde(default)]
    pub load_average: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_disk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_disk: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningService {
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// `serverHealth` event: summary fields inline plus the services list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerHealthPayload {
    #[serde(flatten)]
    pub summary: ServerHealthSummary,
    #[serde(default)]
    pub running_services: Vec<RunningService>,
}

/// Reply of every lifecycle endpoint. `success == false` is a remote failure, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

// POST /deployment/execute
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub application_name: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    #[serde(default, rename = "type")]
    pub token_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}
