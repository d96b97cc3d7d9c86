//! Monitor timing. Defaults match the dashboard's cadence; each interval is
//! overridable via env (whole seconds, zero or garbage ignored).

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Deployer health poll while the stream is down.
    pub health_poll: Duration,
    /// Per-application liveness probes while the stream is down.
    pub app_poll: Duration,
    /// Server summary + services poll while the stream is down.
    pub server_poll: Duration,
    /// How often a polling monitor tries to get its stream back.
    pub reconnect: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_poll: Duration::from_secs(30),
            app_poll: Duration::from_secs(10),
            server_poll: Duration::from_secs(30),
            reconnect: Duration::from_secs(30),
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Self {
        let d = Self::default();
        let secs = |key: &str, fallback: Duration| {
            get(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };
        Self {
            health_poll: secs("HUBWATCH_HEALTH_POLL_SECS", d.health_poll),
            app_poll: secs("HUBWATCH_APP_POLL_SECS", d.app_poll),
            server_poll: secs("HUBWATCH_SERVER_POLL_SECS", d.server_poll),
            reconnect: secs("HUBWATCH_RECONNECT_SECS", d.reconnect),
        }
    }
}
