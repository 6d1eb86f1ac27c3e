//! Session lifecycle for one class view.
//!
//! ```text
//! NoSession -> Starting -> Active -> Closing -> Closed
//!                 |                    |
//!                 +-> NoSession        +-> Active   (on gateway failure)
//! ```
//!
//! `Starting` and `Closing` block re-entrant start/close calls. A token-mode
//! session has its refresh loop armed exactly while it is `Active`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rawuh_sdk::{ClassId, SessionGateway, SessionId, SessionMode, SessionSummary, TokenGrant};
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::AttendanceConfig;
use crate::error::{LifecycleError, LifecycleResult};
use crate::refresh::{self, RefreshHandle, TokenSink};
use crate::session::{ClosedSession, Session, SessionKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    NoSession,
    Starting { class_id: ClassId },
    Active(Session),
    Closing(Session),
    Closed(ClosedSession),
}

impl LifecycleState {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LifecycleState::Starting { .. } | LifecycleState::Closing(_)
        )
    }

    pub fn active(&self) -> Option<&Session> {
        match self {
            LifecycleState::Active(session) => Some(session),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LifecycleState::NoSession => "no_session",
            LifecycleState::Starting { .. } => "starting",
            LifecycleState::Active(_) => "active",
            LifecycleState::Closing(_) => "closing",
            LifecycleState::Closed(_) => "closed",
        }
    }
}

/// Operator confirmation for the irreversible close.
pub trait ConfirmClose {
    fn confirm_close(&self, session: &Session) -> bool;
}

impl<F> ConfirmClose for F
where
    F: Fn(&Session) -> bool,
{
    fn confirm_close(&self, session: &Session) -> bool {
        self(session)
    }
}

struct Shared {
    state: watch::Sender<LifecycleState>,
}

impl TokenSink for Shared {
    fn accept(&self, session_id: &SessionId, grant: TokenGrant) -> bool {
        let mut current = false;
        self.state.send_if_modified(|state| match state {
            LifecycleState::Active(session) if &session.id == session_id => {
                current = true;
                match &mut session.kind {
                    SessionKind::Token(credential) => {
                        *credential = grant.into();
                        true
                    }
                    SessionKind::Tokenless => false,
                }
            }
            _ => false,
        });
        if current {
            debug!(session_id = %session_id, "session token rotated");
        }
        current
    }
}

/// Owns the session shown by one view, and its refresh loop.
pub struct SessionController {
    gateway: Arc<dyn SessionGateway>,
    config: AttendanceConfig,
    shared: Arc<Shared>,
    refresh: Mutex<Option<RefreshHandle>>,
    history: Mutex<Vec<SessionSummary>>,
    epoch: AtomicU64,
}

impl SessionController {
    pub fn new(gateway: Arc<dyn SessionGateway>, config: AttendanceConfig) -> Self {
        let (state, _) = watch::channel(LifecycleState::NoSession);
        Self {
            gateway,
            config,
            shared: Arc::new(Shared { state }),
            refresh: Mutex::new(None),
            history: Mutex::new(Vec::new()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.state.borrow().clone()
    }

    /// The session currently held, whether `Active` or being closed.
    pub fn current_session(&self) -> Option<Session> {
        match &*self.shared.state.borrow() {
            LifecycleState::Active(session) | LifecycleState::Closing(session) => {
                Some(session.clone())
            }
            _ => None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.shared.state.subscribe()
    }

    /// Session history last fetched for this view.
    pub fn history(&self) -> Vec<SessionSummary> {
        self.history.lock().clone()
    }

    pub fn refresh_armed(&self) -> bool {
        self.refresh
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    pub async fn start_session(
        &self,
        class_id: ClassId,
        week: u32,
        mode: SessionMode,
    ) -> LifecycleResult<Session> {
        if week == 0 || week > self.config.max_week {
            return Err(LifecycleError::InvalidWeek {
                week,
                max_week: self.config.max_week,
            });
        }
        self.enter_starting(class_id)?;
        let epoch = self.epoch.load(Ordering::SeqCst);
        info!(class_id, week, mode = %mode, "starting session");

        let result = match mode {
            SessionMode::Token => self
                .gateway
                .start_token_session(class_id, week)
                .await
                .map(|started| Session::from_token_start(class_id, started)),
            SessionMode::Tokenless => self
                .gateway
                .start_tokenless_session(class_id, week)
                .await
                .map(|summary| Session::from_tokenless_start(class_id, summary)),
        };

        if self.epoch.load(Ordering::SeqCst) != epoch {
            if let Ok(session) = &result {
                warn!(session_id = %session.id, "session started after view teardown; left open on gateway");
            }
            return Err(LifecycleError::ViewTornDown);
        }

        match result {
            Ok(session) => {
                self.activate(session.clone());
                info!(session_id = %session.id, class_id, mode = %mode, "session active");
                Ok(session)
            }
            Err(err) => {
                self.shared.state.send_replace(LifecycleState::NoSession);
                warn!(class_id, error = %err, "failed to start session");
                Err(err.into())
            }
        }
    }

    pub async fn close_session(
        &self,
        session_id: &SessionId,
        confirm: &dyn ConfirmClose,
    ) -> LifecycleResult<ClosedSession> {
        let session = match &*self.shared.state.borrow() {
            LifecycleState::Active(session) => session.clone(),
            LifecycleState::Starting { .. } | LifecycleState::Closing(_) => {
                return Err(LifecycleError::Busy)
            }
            LifecycleState::NoSession | LifecycleState::Closed(_) => {
                return Err(LifecycleError::NotActive)
            }
        };
        if &session.id != session_id {
            return Err(LifecycleError::UnknownSession {
                requested: session_id.clone(),
                active: session.id,
            });
        }
        if !confirm.confirm_close(&session) {
            info!(session_id = %session_id, "close cancelled by operator");
            return Err(LifecycleError::NotConfirmed);
        }

        let mut entered = false;
        self.shared.state.send_if_modified(|state| match state {
            LifecycleState::Active(current) if &current.id == session_id => {
                let closing = current.clone();
                *state = LifecycleState::Closing(closing);
                entered = true;
                true
            }
            _ => false,
        });
        if !entered {
            return Err(LifecycleError::Busy);
        }
        self.disarm();
        let epoch = self.epoch.load(Ordering::SeqCst);
        info!(session_id = %session_id, mode = %session.mode(), "closing session");

        let result = self.gateway.close_session(session.mode(), session_id).await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(LifecycleError::ViewTornDown);
        }

        match result {
            Ok(()) => {
                let class_id = session.class_id;
                let closed = session.close(OffsetDateTime::now_utc());
                self.shared
                    .state
                    .send_replace(LifecycleState::Closed(closed.clone()));
                info!(session_id = %session_id, "session closed");
                if let Err(err) = self.refresh_history(class_id).await {
                    warn!(class_id, error = %err, "failed to refresh session history after close");
                }
                Ok(closed)
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "failed to close session");
                self.activate(session);
                Err(err.into())
            }
        }
    }

    /// Fetch the class history into this view's cache.
    pub async fn refresh_history(&self, class_id: ClassId) -> LifecycleResult<Vec<SessionSummary>> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let history = self.gateway.session_history(class_id).await?;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(LifecycleError::ViewTornDown);
        }
        *self.history.lock() = history.clone();
        Ok(history)
    }

    /// The open session of a class according to its history, if any.
    pub async fn get_active_session(
        &self,
        class_id: ClassId,
    ) -> LifecycleResult<Option<SessionSummary>> {
        let history = self.refresh_history(class_id).await?;
        Ok(find_active(&history).cloned())
    }

    /// Adopt a session that is already open for `class_id`, as a view does
    /// when it is opened while attendance is running.
    pub async fn resume(&self, class_id: ClassId) -> LifecycleResult<Option<Session>> {
        self.enter_starting(class_id)?;
        let epoch = self.epoch.load(Ordering::SeqCst);

        let found = self.get_active_session(class_id).await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(LifecycleError::ViewTornDown);
        }
        match found {
            Ok(Some(summary)) => {
                let session = Session::from_summary(class_id, &summary);
                info!(session_id = %session.id, mode = %session.mode(), "resuming open session");
                self.activate(session.clone());
                Ok(Some(session))
            }
            Ok(None) => {
                self.shared.state.send_replace(LifecycleState::NoSession);
                Ok(None)
            }
            Err(err) => {
                self.shared.state.send_replace(LifecycleState::NoSession);
                Err(err)
            }
        }
    }

    /// Tear the view down: disarm the loop and ignore any result still in
    /// flight.
    pub fn teardown(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.disarm();
        self.history.lock().clear();
        self.shared.state.send_replace(LifecycleState::NoSession);
        debug!("session view torn down");
    }

    fn enter_starting(&self, class_id: ClassId) -> LifecycleResult<()> {
        let mut rejection = None;
        self.shared.state.send_if_modified(|state| match state {
            LifecycleState::Starting { .. } | LifecycleState::Closing(_) => {
                rejection = Some(LifecycleError::Busy);
                false
            }
            LifecycleState::Active(session) => {
                rejection = Some(LifecycleError::AlreadyActive {
                    session_id: session.id.clone(),
                });
                false
            }
            LifecycleState::NoSession | LifecycleState::Closed(_) => {
                *state = LifecycleState::Starting { class_id };
                true
            }
        });
        match rejection {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn activate(&self, session: Session) {
        self.disarm();
        let token_mode = session.mode() == SessionMode::Token;
        let id = session.id.clone();
        self.shared.state.send_replace(LifecycleState::Active(session));
        if token_mode {
            let sink: Arc<dyn TokenSink> = self.shared.clone();
            let handle = refresh::arm(
                Arc::clone(&self.gateway),
                id,
                self.config.token_refresh_period,
                sink,
            );
            *self.refresh.lock() = Some(handle);
        }
    }

    fn disarm(&self) {
        if let Some(handle) = self.refresh.lock().take() {
            debug!(session_id = %handle.session_id(), "disarming token refresh loop");
            handle.cancel();
        }
    }
}

/// First open session in `history`. More than one open session for a class
/// is logged and resolved in favour of the first, in gateway order.
pub fn find_active(history: &[SessionSummary]) -> Option<&SessionSummary> {
    let mut open = history.iter().filter(|s| s.is_open());
    let first = open.next()?;
    let others = open.count();
    if others > 0 {
        warn!(
            session_id = %first.session_id,
            candidates = others + 1,
            "multiple open sessions for one class; using the first"
        );
    }
    Some(first)
}
