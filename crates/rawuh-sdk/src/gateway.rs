use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::types::{
    AttendanceStatus, ClassId, ClassInfo, ClassStudent, RosterEntry, SessionId, SessionMode,
    SessionSummary, StudentId, TokenGrant, TokenSessionStarted,
};

/// Contract of the remote attendance gateway.
///
/// The HTTP client and the in-memory adapter both implement this, so the
/// session core never depends on transport details.
#[async_trait]
pub trait SessionGateway: Send + Sync {
    /// `POST /api/v1/session/start`
    async fn start_token_session(
        &self,
        class_id: ClassId,
        week: u32,
    ) -> GatewayResult<TokenSessionStarted>;

    /// `POST /api/v2/session/start`
    async fn start_tokenless_session(
        &self,
        class_id: ClassId,
        week: u32,
    ) -> GatewayResult<SessionSummary>;

    /// `GET /api/v1/session/{id}/token`
    async fn fetch_token(&self, session_id: &SessionId) -> GatewayResult<TokenGrant>;

    /// `POST /api/v{1,2}/session/{id}/close`, chosen by `mode`.
    async fn close_session(&self, mode: SessionMode, session_id: &SessionId)
        -> GatewayResult<()>;

    /// `GET /api/v2/sessions`
    async fn active_sessions(&self) -> GatewayResult<Vec<SessionSummary>>;

    /// `GET /api/v2/sessions/history/{class_id}`
    async fn session_history(&self, class_id: ClassId) -> GatewayResult<Vec<SessionSummary>>;

    /// `GET /api/v1/session/{id}/students`
    async fn session_roster(&self, session_id: &SessionId) -> GatewayResult<Vec<RosterEntry>>;

    /// `PATCH /api/v1/session/{id}/presence/{student_id}`
    async fn update_attendance(
        &self,
        session_id: &SessionId,
        student_id: StudentId,
        status: AttendanceStatus,
    ) -> GatewayResult<()>;

    /// `GET /api/v1/classes/{id}/students`
    async fn class_students(&self, class_id: ClassId) -> GatewayResult<Vec<ClassStudent>>;

    /// `GET /api/v1/classes/my`
    async fn my_classes(&self) -> GatewayResult<Vec<ClassInfo>>;
}
