use rawuh_sdk::{ClassId, SessionId, SessionMode, SessionSummary, TokenGrant, TokenSessionStarted};
use serde::Serialize;
use time::OffsetDateTime;

/// Rotating QR credential of a token-mode session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenCredential {
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl TokenCredential {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }
}

impl From<TokenGrant> for TokenCredential {
    fn from(grant: TokenGrant) -> Self {
        Self {
            token: grant.token,
            expires_at: grant.expires_at,
        }
    }
}

/// The two session variants. Only `Token` carries a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SessionKind {
    Token(TokenCredential),
    Tokenless,
}

impl SessionKind {
    pub fn mode(&self) -> SessionMode {
        match self {
            SessionKind::Token(_) => SessionMode::Token,
            SessionKind::Tokenless => SessionMode::Tokenless,
        }
    }
}

/// A live attendance session held by a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub class_id: ClassId,
    pub week: u32,
    pub kind: SessionKind,
    #[serde(with = "time::serde::rfc3339")]
    pub opened_at: OffsetDateTime,
}

impl Session {
    pub(crate) fn from_token_start(class_id: ClassId, started: TokenSessionStarted) -> Self {
        Self {
            id: started.session_id,
            class_id,
            week: started.week,
            kind: SessionKind::Token(TokenCredential {
                token: started.token,
                expires_at: started.expires_at,
            }),
            opened_at: OffsetDateTime::now_utc(),
        }
    }

    /// Tokenless sessions drop any credential fields the gateway may echo.
    pub(crate) fn from_tokenless_start(class_id: ClassId, summary: SessionSummary) -> Self {
        Self {
            id: summary.session_id,
            class_id: summary.class_id.unwrap_or(class_id),
            week: summary.week,
            kind: SessionKind::Tokenless,
            opened_at: summary.created_at.unwrap_or_else(OffsetDateTime::now_utc),
        }
    }

    /// Adopt an open session found in history. Token mode is inferred from a
    /// complete credential on the summary.
    pub(crate) fn from_summary(class_id: ClassId, summary: &SessionSummary) -> Self {
        let kind = match summary.grant() {
            Some(grant) => SessionKind::Token(grant.into()),
            None => SessionKind::Tokenless,
        };
        Self {
            id: summary.session_id.clone(),
            class_id: summary.class_id.unwrap_or(class_id),
            week: summary.week,
            kind,
            opened_at: summary.created_at.unwrap_or_else(OffsetDateTime::now_utc),
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.kind.mode()
    }

    pub fn credential(&self) -> Option<&TokenCredential> {
        match &self.kind {
            SessionKind::Token(credential) => Some(credential),
            SessionKind::Tokenless => None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.credential().map(|c| c.token.as_str())
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.credential().map(|c| c.expires_at)
    }

    pub(crate) fn close(self, closed_at: OffsetDateTime) -> ClosedSession {
        ClosedSession {
            mode: self.mode(),
            id: self.id,
            class_id: self.class_id,
            week: self.week,
            closed_at,
        }
    }
}

/// A session after close. Read-only history with no credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClosedSession {
    pub id: SessionId,
    pub class_id: ClassId,
    pub week: u32,
    pub mode: SessionMode,
    #[serde(with = "time::serde::rfc3339")]
    pub closed_at: OffsetDateTime,
}
