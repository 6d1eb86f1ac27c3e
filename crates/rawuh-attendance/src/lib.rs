//! Attendance session core for the Rawuh dashboard.
//!
//! [`SessionController`] drives one class view through start and close and
//! owns the token refresh loop while a token-mode session is active.
//! [`AttendanceBook`] keeps the marks of the displayed session in step with
//! the gateway roster, and [`SessionBoard`] lists sessions across classes.
//! Everything talks to the backend through [`rawuh_sdk::SessionGateway`].

pub mod board;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod refresh;
pub mod roster;
pub mod session;

pub use board::{SessionBoard, SessionFilter};
pub use config::{AttendanceConfig, FailurePolicy};
pub use error::{BoardError, BoardResult, LifecycleError, LifecycleResult, RosterError, RosterResult};
pub use lifecycle::{find_active, ConfirmClose, LifecycleState, SessionController};
pub use refresh::{RefreshHandle, TokenSink};
pub use roster::{AttendanceBook, AttendanceMark, AttendanceSummary};
pub use session::{ClosedSession, Session, SessionKind, TokenCredential};
