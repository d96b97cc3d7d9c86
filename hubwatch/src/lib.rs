//! Client for an application deployment control service: live health of the
//! service and its applications, host resource health, and operator actions.

pub mod actions;
pub mod api;
pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod monitor;
pub mod profiles;
pub mod report;
pub mod server;
pub mod sse;
pub mod stream;
pub mod types;

pub use api::{ControlApi, HttpControlClient, DEFAULT_BASE_URL};
pub use error::ApiError;
pub use health::HealthMonitor;
pub use server::ServerMonitor;
