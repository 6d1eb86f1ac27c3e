//! Asynchronous client for the Rawuh attendance gateway.
//!
//! The gateway exposes two parallel session APIs: v1 sessions carry a rotating
//! QR token, v2 sessions are tokenless. This crate wraps both behind the
//! [`SessionGateway`] trait together with the roster and attendance-status
//! endpoints. Authentication cookies live in the client's cookie jar and are
//! never inspected here.

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod types;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

pub use auth::{AuthContext, AuthUser, LoginRequest, LoginResponse, Role};
pub use config::GatewayConfig;
pub use error::{ErrorKind, GatewayError, GatewayResult, ParseError};
pub use gateway::SessionGateway;
pub use memory::{GatewayCall, InMemoryGateway};
pub use types::{
    ApiErrorBody, ApiResponse, AttendanceStatus, ClassId, ClassInfo, ClassStudent, RosterEntry,
    RosterPayload, SessionId, SessionMode, SessionSummary, StartSessionRequest, StudentId,
    TokenGrant, TokenSessionStarted, UpdateStatusRequest,
};

const V1: &str = "/api/v1";
const V2: &str = "/api/v2";

#[derive(Clone)]
pub struct GatewayClient {
    http: Client,
    base_url: String,
}

impl GatewayClient {
    /// Build a client with its own cookie jar.
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_http_client(config, http))
    }

    /// Use a caller-supplied HTTP client (shared pool or tests).
    pub fn with_http_client(config: &GatewayConfig, http: Client) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sign in and return the operator context. The session cookie set by the
    /// gateway is kept by this client for later calls.
    pub async fn login(&self, identifier: &str, password: &str) -> GatewayResult<AuthContext> {
        let body = LoginRequest {
            identifier: identifier.to_string(),
            password: password.to_string(),
        };
        let res = self
            .http
            .post(self.url(&format!("{V1}/auth/login")))
            .header("X-Platform", "web")
            .json(&body)
            .send()
            .await?;
        let res = Self::ensure_success(res).await?;
        let text = res.text().await?;
        let login: LoginResponse = serde_json::from_str(&text)?;
        debug!(user_id = login.user.id, role = ?login.user.role, "signed in");
        Ok(login.into())
    }

    /// Sign out. The context is consumed so it cannot outlive the cookie.
    pub async fn logout(&self, ctx: AuthContext) -> GatewayResult<()> {
        debug!(user_id = ctx.user().id, "signing out");
        self.send_void(self.request(Method::POST, &format!("{V1}/auth/logout")), "logout")
            .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.url(path))
    }

    async fn send_data<T>(&self, request: RequestBuilder, operation: &'static str) -> GatewayResult<T>
    where
        T: DeserializeOwned,
    {
        self.send::<T>(request, operation)
            .await?
            .ok_or_else(|| GatewayError::Malformed(format!("{operation}: response has no data")))
    }

    async fn send_void(&self, request: RequestBuilder, operation: &'static str) -> GatewayResult<()> {
        self.send::<serde_json::Value>(request, operation).await?;
        Ok(())
    }

    async fn send<T>(&self, request: RequestBuilder, operation: &'static str) -> GatewayResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let res = request.send().await?;
        let res = Self::ensure_success(res).await?;
        let status = res.status().as_u16();
        let body = res.text().await?;
        debug!(operation, status, bytes = body.len(), "gateway response");
        if body.trim().is_empty() {
            return Ok(None);
        }
        let envelope: ApiResponse<T> = serde_json::from_str(&body)
            .map_err(|err| GatewayError::Malformed(format!("{operation}: {err}")))?;
        if !envelope.success {
            let message = envelope
                .message
                .unwrap_or_else(|| "Request failed".to_string());
            return Err(GatewayError::rejected(status, message));
        }
        Ok(envelope.data)
    }

    /// Returns the response on success; otherwise the gateway's `error`
    /// message, `HTTP <status>` when the body has none, or `Request failed`
    /// when the body is not JSON.
    async fn ensure_success(response: Response) -> GatewayResult<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(ApiErrorBody {
                error: Some(message),
            }) if !message.is_empty() => message,
            Ok(_) => format!("HTTP {status}"),
            Err(_) => "Request failed".to_string(),
        };
        Err(GatewayError::rejected(status, message))
    }
}

#[async_trait]
impl SessionGateway for GatewayClient {
    async fn start_token_session(
        &self,
        class_id: ClassId,
        week: u32,
    ) -> GatewayResult<TokenSessionStarted> {
        let req = self
            .request(Method::POST, &format!("{V1}/session/start"))
            .json(&StartSessionRequest { class_id, week });
        self.send_data(req, "start token session").await
    }

    async fn start_tokenless_session(
        &self,
        class_id: ClassId,
        week: u32,
    ) -> GatewayResult<SessionSummary> {
        let req = self
            .request(Method::POST, &format!("{V2}/session/start"))
            .json(&StartSessionRequest { class_id, week });
        self.send_data(req, "start tokenless session").await
    }

    async fn fetch_token(&self, session_id: &SessionId) -> GatewayResult<TokenGrant> {
        let req = self.request(Method::GET, &format!("{V1}/session/{session_id}/token"));
        self.send_data(req, "fetch token").await
    }

    async fn close_session(
        &self,
        mode: SessionMode,
        session_id: &SessionId,
    ) -> GatewayResult<()> {
        let path = format!("{}/session/{session_id}/close", mode.api_prefix());
        self.send_void(self.request(Method::POST, &path), "close session")
            .await
    }

    async fn active_sessions(&self) -> GatewayResult<Vec<SessionSummary>> {
        let req = self.request(Method::GET, &format!("{V2}/sessions"));
        Ok(self.send(req, "active sessions").await?.unwrap_or_default())
    }

    async fn session_history(&self, class_id: ClassId) -> GatewayResult<Vec<SessionSummary>> {
        let req = self.request(Method::GET, &format!("{V2}/sessions/history/{class_id}"));
        Ok(self.send(req, "session history").await?.unwrap_or_default())
    }

    async fn session_roster(&self, session_id: &SessionId) -> GatewayResult<Vec<RosterEntry>> {
        let req = self.request(Method::GET, &format!("{V1}/session/{session_id}/students"));
        let payload: Option<RosterPayload> = self.send(req, "session roster").await?;
        Ok(payload.and_then(|p| p.students).unwrap_or_default())
    }

    async fn update_attendance(
        &self,
        session_id: &SessionId,
        student_id: StudentId,
        status: AttendanceStatus,
    ) -> GatewayResult<()> {
        let req = self
            .request(
                Method::PATCH,
                &format!("{V1}/session/{session_id}/presence/{student_id}"),
            )
            .json(&UpdateStatusRequest { status });
        self.send_void(req, "update attendance").await
    }

    async fn class_students(&self, class_id: ClassId) -> GatewayResult<Vec<ClassStudent>> {
        let req = self.request(Method::GET, &format!("{V1}/classes/{class_id}/students"));
        Ok(self.send(req, "class students").await?.unwrap_or_default())
    }

    async fn my_classes(&self) -> GatewayResult<Vec<ClassInfo>> {
        let req = self.request(Method::GET, &format!("{V1}/classes/my"));
        Ok(self.send(req, "my classes").await?.unwrap_or_default())
    }
}
