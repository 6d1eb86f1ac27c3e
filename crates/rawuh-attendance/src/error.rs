use rawuh_sdk::{GatewayError, SessionId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("week {week} is outside 1..={max_week}")]
    InvalidWeek { week: u32, max_week: u32 },
    #[error("session {session_id} is already active in this view")]
    AlreadyActive { session_id: SessionId },
    #[error("another start or close is still in progress")]
    Busy,
    #[error("no active session to close")]
    NotActive,
    #[error("session {requested} is not the active session {active}")]
    UnknownSession {
        requested: SessionId,
        active: SessionId,
    },
    #[error("close cancelled by operator")]
    NotConfirmed,
    #[error("view was torn down before the gateway answered")]
    ViewTornDown,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("no roster loaded")]
    NotLoaded,
    #[error("roster for {loaded} is loaded, not {requested}")]
    SessionMismatch {
        loaded: SessionId,
        requested: SessionId,
    },
    #[error("roster was discarded before the gateway answered")]
    Discarded,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("session {0} is not on the board")]
    NotListed(SessionId),
    #[error("session {0} is already closed")]
    AlreadyClosed(SessionId),
    #[error("close cancelled by operator")]
    NotConfirmed,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
pub type RosterResult<T> = Result<T, RosterError>;
pub type BoardResult<T> = Result<T, BoardError>;
