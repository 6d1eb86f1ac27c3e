use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

pub type ClassId = u64;
pub type StudentId = u64;

/// Gateway-assigned session identifier. Opaque to the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Which of the two parallel session APIs a session lives on.
///
/// `Token` sessions are served by the v1 API and carry a rotating QR
/// credential; `Tokenless` sessions are served by v2 and rely on face
/// capture alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Token,
    Tokenless,
}

impl SessionMode {
    pub(crate) fn api_prefix(self) -> &'static str {
        match self {
            SessionMode::Token => "/api/v1",
            SessionMode::Tokenless => "/api/v2",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionMode::Token => "token",
            SessionMode::Tokenless => "tokenless",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "token" | "qr" | "original" => Ok(SessionMode::Token),
            "tokenless" | "face" | "demo" => Ok(SessionMode::Tokenless),
            other => Err(ParseError::new("session mode", other)),
        }
    }
}

/// Recorded attendance status. "Not recorded" is modelled as `Option::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    #[serde(rename = "p")]
    Present,
    #[serde(rename = "i")]
    Permission,
    #[serde(rename = "s")]
    Sick,
    #[serde(rename = "a")]
    Absent,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 4] = [
        AttendanceStatus::Present,
        AttendanceStatus::Permission,
        AttendanceStatus::Sick,
        AttendanceStatus::Absent,
    ];

    /// Single-letter wire code.
    pub fn code(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "p",
            AttendanceStatus::Permission => "i",
            AttendanceStatus::Sick => "s",
            AttendanceStatus::Absent => "a",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Permission => "Permission",
            AttendanceStatus::Sick => "Sick",
            AttendanceStatus::Absent => "Absent",
        }
    }

    /// Label for an optional status, rendering `None` as "Not Recorded".
    pub fn label_for(status: Option<AttendanceStatus>) -> &'static str {
        status.map(Self::label).unwrap_or("Not Recorded")
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AttendanceStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p" | "present" => Ok(AttendanceStatus::Present),
            "i" | "permission" => Ok(AttendanceStatus::Permission),
            "s" | "sick" => Ok(AttendanceStatus::Sick),
            "a" | "absent" => Ok(AttendanceStatus::Absent),
            other => Err(ParseError::new("attendance status", other)),
        }
    }
}

/// Standard success envelope wrapping every gateway payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

fn default_success() -> bool {
    true
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn empty() -> Self {
        Self {
            success: true,
            message: None,
            data: None,
        }
    }
}

/// Error body returned with non-success statuses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub class_id: ClassId,
    pub week: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AttendanceStatus,
}

/// Response to a token-mode start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSessionStarted {
    pub session_id: SessionId,
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub week: u32,
}

/// A freshly issued rotating credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Session summary as listed by the active/history endpoints and returned by
/// a tokenless start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<OffsetDateTime>,
    pub week: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<ClassId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_section: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub closed_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_students: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub present_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absent_count: Option<u32>,
}

impl SessionSummary {
    pub fn new(session_id: impl Into<SessionId>, week: u32) -> Self {
        Self {
            session_id: session_id.into(),
            token: None,
            expires_at: None,
            week,
            class_id: None,
            class_name: None,
            class_code: None,
            class_section: None,
            created_at: None,
            closed_at: None,
            is_active: None,
            total_students: None,
            present_count: None,
            absent_count: None,
        }
    }

    /// A session counts as open unless the gateway explicitly says otherwise.
    pub fn is_open(&self) -> bool {
        self.is_active != Some(false)
    }

    /// The rotating credential, if the summary carries a complete one.
    pub fn grant(&self) -> Option<TokenGrant> {
        match (&self.token, self.expires_at) {
            (Some(token), Some(expires_at)) if !token.is_empty() => Some(TokenGrant {
                token: token.clone(),
                expires_at,
            }),
            _ => None,
        }
    }
}

/// One row of a session roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<StudentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<StudentId>,
    pub name: String,
    pub nim: String,
    #[serde(default)]
    pub status: Option<AttendanceStatus>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub recorded_at: Option<OffsetDateTime>,
}

impl RosterEntry {
    /// Student key, preferring `student_id` over the row `id`.
    pub fn student_key(&self) -> Option<StudentId> {
        self.student_id.or(self.id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RosterPayload {
    #[serde(default)]
    pub students: Option<Vec<RosterEntry>>,
}

/// A student enrolled in a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassStudent {
    pub id: StudentId,
    pub name: String,
    pub nim: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// A class taught by the signed-in lecturer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub id: ClassId,
    pub name: String,
    pub class_code: String,
    #[serde(default)]
    pub class_section: Option<String>,
    #[serde(default)]
    pub lecturer: Option<String>,
    #[serde(default)]
    pub day: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}
