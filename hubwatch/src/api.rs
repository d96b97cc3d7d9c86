//! One-shot REST surface of the control service, behind the `ControlApi` seam the
//! monitors and the dispatcher are written against.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::actions::Operation;
use crate::error::ApiError;
use crate::stream::{self, CancelHandle, EventStream, StreamChannel};
use crate::types::{
    ApplicationConfig, DeploymentResponse, HealthPayload, LiveResponse, RunningService,
    ServerHealthSummary,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8089/api";

// Status reads should come back quickly; lifecycle actions may run for minutes.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait ControlApi: Send + Sync {
    /// `GET /deployment/health`
    async fn health(&self) -> Result<HealthPayload, ApiError>;
    /// `GET /deployment/applications`
    async fn applications(&self) -> Result<Vec<ApplicationConfig>, ApiError>;
    /// `GET /deployment/applications/{app}/health`
    async fn app_live(&self, app: &str) -> Result<bool, ApiError>;
    /// `GET /server/health/summary`
    async fn server_summary(&self) -> Result<ServerHealthSummary, ApiError>;
    /// `GET /server/services/status`
    async fn running_services(&self) -> Result<Vec<RunningService>, ApiError>;
    /// Run one lifecycle operation.
    async fn perform(&self, op: &Operation) -> Result<DeploymentResponse, ApiError>;
    /// Open the push stream for `channel`.
    async fn open_stream(
        &self,
        channel: StreamChannel,
        cancel: CancelHandle,
    ) -> Result<EventStream, ApiError>;
}

pub struct HttpControlClient {
    pub(crate) http: reqwest::Client,
    pub(crate) base: Url,
    token: RwLock<Option<String>>,
}

impl HttpControlClient {
    pub fn new(base: &str) -> Result<Self, ApiError> {
        let base = Url::parse(base)?;
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base,
            token: RwLock::new(None),
        })
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.set_token(Some(token.into()));
        self
    }

    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut t) = self.token.write() {
            *t = token.filter(|t| !t.is_empty());
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    /// Base URL with `path` appended segment by segment (segments get percent-encoded).
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    fn app_endpoint(&self, prefix: &str, app: &str, suffix: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.endpoint(prefix)?;
        if let Ok(mut segs) = url.path_segments_mut() {
            segs.push(app).extend(suffix);
        }
        Ok(url)
    }

    fn authorized(&self, method: Method, url: Url) -> Result<RequestBuilder, ApiError> {
        let token = self.token().ok_or(ApiError::Unauthenticated)?;
        Ok(self
            .http
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {token}")))
    }

    async fn query<T: DeserializeOwned>(&self, url: Url) -> Result<T, ApiError> {
        let resp = self
            .authorized(Method::GET, url)?
            .timeout(QUERY_TIMEOUT)
            .send()
            .await?;
        decode(resp).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, ApiError> {
        let resp = self.authorized(Method::POST, url)?.json(body).send().await?;
        decode(resp).await
    }
}

#[async_trait]
impl ControlApi for HttpControlClient {
    async fn health(&self) -> Result<HealthPayload, ApiError> {
        self.query(self.endpoint("deployment/health")?).await
    }

    async fn applications(&self) -> Result<Vec<ApplicationConfig>, ApiError> {
        self.query(self.endpoint("deployment/applications")?).await
    }

    async fn app_live(&self, app: &str) -> Result<bool, ApiError> {
        let url = self.app_endpoint("deployment/applications", app, &["health"])?;
        let r: LiveResponse = self.query(url).await?;
        Ok(r.live.unwrap_or(false))
    }

    async fn server_summary(&self) -> Result<ServerHealthSummary, ApiError> {
        self.query(self.endpoint("server/health/summary")?).await
    }

    async fn running_services(&self) -> Result<Vec<RunningService>, ApiError> {
        self.query(self.endpoint("server/services/status")?).await
    }

    async fn perform(&self, op: &Operation) -> Result<DeploymentResponse, ApiError> {
        match op {
            Operation::Lifecycle { verb, app } => {
                let url = self.app_endpoint(&format!("deployment/{}", verb.as_str()), app, &[])?;
                self.post(url, &serde_json::json!({})).await
            }
            Operation::Status { app } => {
                self.query(self.app_endpoint("deployment/status", app, &[])?)
                    .await
            }
            Operation::Logs { app, lines } => {
                let mut url = self.app_endpoint("deployment/logs", app, &[])?;
                url.query_pairs_mut()
                    .append_pair("lines", &lines.to_string());
                let resp = self.authorized(Method::GET, url)?.send().await?;
                decode(resp).await
            }
            Operation::Execute(req) => self.post(self.endpoint("deployment/execute")?, req).await,
        }
    }

    async fn open_stream(
        &self,
        channel: StreamChannel,
        cancel: CancelHandle,
    ) -> Result<EventStream, ApiError> {
        let url = self.endpoint(channel.path())?;
        stream::open(&self.http, url, self.token().as_deref(), cancel).await
    }
}

pub(crate) async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let status = resp.status();
    let body = resp.bytes().await?;
    if !status.is_success() {
        return Err(ApiError::Http {
            status: status.as_u16(),
            message: embedded_message(&String::from_utf8_lossy(&body)),
        });
    }
    Ok(serde_json::from_slice(&body)?)
}

/// The `message` field of a JSON error body, if there is one.
pub fn embedded_message(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    v.get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .filter(|m| !m.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_under_base_path() {
        let c = HttpControlClient::new("http://hub.local:8089/api").unwrap();
        assert_eq!(
            c.endpoint("deployment/health").unwrap().as_str(),
            "http://hub.local:8089/api/deployment/health"
        );
        let c = HttpControlClient::new("http://hub.local:8089/api/").unwrap();
        assert_eq!(
            c.endpoint("server/health/stream").unwrap().as_str(),
            "http://hub.local:8089/api/server/health/stream"
        );
    }

    #[test]
    fn app_names_are_percent_encoded() {
        let c = HttpControlClient::new(DEFAULT_BASE_URL).unwrap();
        let url = c
            .app_endpoint("deployment/applications", "my app/v2", &["health"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8089/api/deployment/applications/my%20app%2Fv2/health"
        );
    }

    #[test]
    fn embedded_message_only_from_json() {
        assert_eq!(
            embedded_message(r#"{"success":false,"message":"boom"}"#).as_deref(),
            Some("boom")
        );
        assert_eq!(embedded_message("<html>502</html>"), None);
        assert_eq!(embedded_message(r#"{"message":""}"#), None);
    }

    #[test]
    fn empty_token_is_no_token() {
        let c = HttpControlClient::new(DEFAULT_BASE_URL).unwrap().with_token("");
        assert!(c.token().is_none());
        c.set_token(Some("abc".into()));
        assert_eq!(c.token().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn requests_without_token_fail_before_network() {
        let c = HttpControlClient::new("http://127.0.0.1:9/api").unwrap();
        assert!(matches!(c.health().await, Err(ApiError::Unauthenticated)));
        assert!(matches!(
            c.open_stream(StreamChannel::Server, CancelHandle::new()).await,
            Err(ApiError::Unauthenticated)
        ));
    }
}
