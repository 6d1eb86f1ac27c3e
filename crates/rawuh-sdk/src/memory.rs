use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::SessionGateway;
use crate::types::{
    AttendanceStatus, ClassId, ClassInfo, ClassStudent, RosterEntry, SessionId, SessionMode,
    SessionSummary, StudentId, TokenGrant, TokenSessionStarted,
};

/// Gateway operation, used to target scripted failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    StartToken,
    StartTokenless,
    FetchToken,
    Close,
    ActiveSessions,
    History,
    Roster,
    UpdateAttendance,
    ClassStudents,
    MyClasses,
}

/// A call observed by [`InMemoryGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    StartToken { class_id: ClassId, week: u32 },
    StartTokenless { class_id: ClassId, week: u32 },
    FetchToken(SessionId),
    Close { mode: SessionMode, session_id: SessionId },
    ActiveSessions,
    History(ClassId),
    Roster(SessionId),
    UpdateAttendance {
        session_id: SessionId,
        student_id: StudentId,
        status: AttendanceStatus,
    },
    ClassStudents(ClassId),
    MyClasses,
}

impl GatewayCall {
    pub fn op(&self) -> GatewayOp {
        match self {
            GatewayCall::StartToken { .. } => GatewayOp::StartToken,
            GatewayCall::StartTokenless { .. } => GatewayOp::StartTokenless,
            GatewayCall::FetchToken(_) => GatewayOp::FetchToken,
            GatewayCall::Close { .. } => GatewayOp::Close,
            GatewayCall::ActiveSessions => GatewayOp::ActiveSessions,
            GatewayCall::History(_) => GatewayOp::History,
            GatewayCall::Roster(_) => GatewayOp::Roster,
            GatewayCall::UpdateAttendance { .. } => GatewayOp::UpdateAttendance,
            GatewayCall::ClassStudents(_) => GatewayOp::ClassStudents,
            GatewayCall::MyClasses => GatewayOp::MyClasses,
        }
    }
}

struct StoredSession {
    mode: SessionMode,
    summary: SessionSummary,
    roster: Vec<RosterEntry>,
}

#[derive(Default)]
struct GatewayState {
    classes: Vec<(ClassInfo, Vec<ClassStudent>)>,
    sessions: Vec<StoredSession>,
    calls: Vec<GatewayCall>,
    failures: HashMap<GatewayOp, VecDeque<GatewayError>>,
    token_latencies: VecDeque<Duration>,
    delays: HashMap<GatewayOp, VecDeque<Duration>>,
    offline: bool,
    lock_closed_sessions: bool,
    token_serial: u64,
}

/// In-memory gateway for tests and early wiring.
///
/// Behaves like the hosted service for the session and roster endpoints:
/// one open session per class, closed sessions stay in history, and every
/// token fetch issues a new credential. Failures and token latency can be
/// scripted per call.
pub struct InMemoryGateway {
    state: Mutex<GatewayState>,
    token_ttl: time::Duration,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self {
            state: Mutex::new(GatewayState::default()),
            token_ttl: time::Duration::seconds(90),
        }
    }
}

impl InMemoryGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a class and its enrolled students.
    pub fn add_class(&self, class: ClassInfo, students: Vec<ClassStudent>) {
        self.state.lock().classes.push((class, students));
    }

    /// Make the next call of `op` fail with `err`. Queued per operation.
    pub fn fail_next(&self, op: GatewayOp, err: GatewayError) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Fail every call with a transport error while set.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Reject status edits on closed sessions, as a strict deployment would.
    pub fn lock_closed_sessions(&self, locked: bool) {
        self.state.lock().lock_closed_sessions = locked;
    }

    /// Hold the next call of `op` for `delay` before it is answered.
    pub fn delay_next(&self, op: GatewayOp, delay: Duration) {
        self.state
            .lock()
            .delays
            .entry(op)
            .or_default()
            .push_back(delay);
    }

    /// Delay successive token fetches by the given latencies, in issue order.
    pub fn script_token_latency(&self, latencies: impl IntoIterator<Item = Duration>) {
        self.state.lock().token_latencies.extend(latencies);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().calls.clone()
    }

    pub fn count_calls(&self, op: GatewayOp) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    /// Token fetches issued for one session.
    pub fn token_fetches_for(&self, session_id: &SessionId) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| matches!(call, GatewayCall::FetchToken(id) if id == session_id))
            .count()
    }

    pub fn summary(&self, session_id: &SessionId) -> Option<SessionSummary> {
        self.state
            .lock()
            .sessions
            .iter()
            .find(|s| &s.summary.session_id == session_id)
            .map(|s| s.summary.clone())
    }

    /// Server-side roster as currently stored.
    pub fn roster(&self, session_id: &SessionId) -> Option<Vec<RosterEntry>> {
        self.state
            .lock()
            .sessions
            .iter()
            .find(|s| &s.summary.session_id == session_id)
            .map(|s| s.roster.clone())
    }

    /// Add a student to a session's server-side roster after it was opened,
    /// as a late enrollment does.
    pub fn enroll(&self, session_id: &SessionId, student: &ClassStudent) {
        let mut state = self.state.lock();
        if let Some(session) = state
            .sessions
            .iter_mut()
            .find(|s| &s.summary.session_id == session_id)
        {
            session.roster.push(RosterEntry {
                id: Some(student.id),
                student_id: Some(student.id),
                name: student.name.clone(),
                nim: student.nim.clone(),
                status: None,
                recorded_at: None,
            });
            session.summary.total_students = Some(session.roster.len() as u32);
        }
    }

    /// Seed an open session directly, as if another operator had started it.
    pub fn seed_session(&self, class_id: ClassId, mode: SessionMode, week: u32) -> SessionId {
        let mut state = self.state.lock();
        let grant = match mode {
            SessionMode::Token => Some(Self::issue_token(&mut state, self.token_ttl)),
            SessionMode::Tokenless => None,
        };
        Self::open_session(&mut state, class_id, mode, week, grant)
    }

    async fn begin(&self, call: GatewayCall) -> GatewayResult<()> {
        let op = call.op();
        let delay = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.delays.get_mut(&op).and_then(VecDeque::pop_front)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        if state.offline {
            return Err(GatewayError::Transport("connection refused".into()));
        }
        if let Some(err) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(())
    }

    fn issue_token(state: &mut GatewayState, ttl: time::Duration) -> TokenGrant {
        state.token_serial += 1;
        TokenGrant {
            token: format!("tok-{}", state.token_serial),
            expires_at: OffsetDateTime::now_utc() + ttl,
        }
    }

    fn open_session(
        state: &mut GatewayState,
        class_id: ClassId,
        mode: SessionMode,
        week: u32,
        grant: Option<TokenGrant>,
    ) -> SessionId {
        let session_id = SessionId::new(Uuid::new_v4().to_string());
        let class = state.classes.iter().find(|(c, _)| c.id == class_id);
        let roster: Vec<RosterEntry> = class
            .map(|(_, students)| {
                students
                    .iter()
                    .map(|s| RosterEntry {
                        id: Some(s.id),
                        student_id: Some(s.id),
                        name: s.name.clone(),
                        nim: s.nim.clone(),
                        status: None,
                        recorded_at: None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut summary = SessionSummary::new(session_id.clone(), week);
        summary.class_id = Some(class_id);
        if let Some((class, _)) = class {
            summary.class_name = Some(class.name.clone());
            summary.class_code = Some(class.class_code.clone());
            summary.class_section = class.class_section.clone();
        }
        summary.created_at = Some(OffsetDateTime::now_utc());
        summary.is_active = Some(true);
        summary.total_students = Some(roster.len() as u32);
        summary.present_count = Some(0);
        summary.absent_count = Some(0);
        if let Some(grant) = grant {
            summary.token = Some(grant.token);
            summary.expires_at = Some(grant.expires_at);
        }

        state.sessions.push(StoredSession {
            mode,
            summary,
            roster,
        });
        session_id
    }

    fn start(
        &self,
        class_id: ClassId,
        week: u32,
        mode: SessionMode,
    ) -> GatewayResult<(SessionId, Option<TokenGrant>)> {
        let mut state = self.state.lock();
        let already_open = state
            .sessions
            .iter()
            .any(|s| s.summary.class_id == Some(class_id) && s.summary.is_open());
        if already_open {
            return Err(GatewayError::rejected(
                409,
                "class already has an active session",
            ));
        }
        let grant = match mode {
            SessionMode::Token => Some(Self::issue_token(&mut state, self.token_ttl)),
            SessionMode::Tokenless => None,
        };
        let id = Self::open_session(&mut state, class_id, mode, week, grant.clone());
        Ok((id, grant))
    }

    fn recount(session: &mut StoredSession) {
        let count = |status| {
            session
                .roster
                .iter()
                .filter(|e| e.status == Some(status))
                .count() as u32
        };
        let present = count(AttendanceStatus::Present);
        let absent = count(AttendanceStatus::Absent);
        session.summary.present_count = Some(present);
        session.summary.absent_count = Some(absent);
    }
}

fn not_found(session_id: &SessionId) -> GatewayError {
    GatewayError::rejected(404, format!("session {session_id} not found"))
}

#[async_trait]
impl SessionGateway for InMemoryGateway {
    async fn start_token_session(
        &self,
        class_id: ClassId,
        week: u32,
    ) -> GatewayResult<TokenSessionStarted> {
        self.begin(GatewayCall::StartToken { class_id, week }).await?;
        let (session_id, grant) = self.start(class_id, week, SessionMode::Token)?;
        let grant = grant.ok_or_else(|| GatewayError::Malformed("token not issued".into()))?;
        Ok(TokenSessionStarted {
            session_id,
            token: grant.token,
            expires_at: grant.expires_at,
            week,
        })
    }

    async fn start_tokenless_session(
        &self,
        class_id: ClassId,
        week: u32,
    ) -> GatewayResult<SessionSummary> {
        self.begin(GatewayCall::StartTokenless { class_id, week }).await?;
        let (session_id, _) = self.start(class_id, week, SessionMode::Tokenless)?;
        self.summary(&session_id)
            .ok_or_else(|| not_found(&session_id))
    }

    async fn fetch_token(&self, session_id: &SessionId) -> GatewayResult<TokenGrant> {
        self.begin(GatewayCall::FetchToken(session_id.clone())).await?;
        let (grant, latency) = {
            let mut state = self.state.lock();
            let session = state
                .sessions
                .iter()
                .find(|s| &s.summary.session_id == session_id)
                .ok_or_else(|| not_found(session_id))?;
            if session.mode != SessionMode::Token {
                return Err(GatewayError::rejected(400, "session has no token"));
            }
            if !session.summary.is_open() {
                return Err(GatewayError::rejected(409, "session is closed"));
            }
            let grant = Self::issue_token(&mut state, self.token_ttl);
            if let Some(session) = state
                .sessions
                .iter_mut()
                .find(|s| &s.summary.session_id == session_id)
            {
                session.summary.token = Some(grant.token.clone());
                session.summary.expires_at = Some(grant.expires_at);
            }
            (grant, state.token_latencies.pop_front())
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(grant)
    }

    async fn close_session(
        &self,
        mode: SessionMode,
        session_id: &SessionId,
    ) -> GatewayResult<()> {
        self.begin(GatewayCall::Close {
            mode,
            session_id: session_id.clone(),
        }).await?;
        let mut state = self.state.lock();
        let session = state
            .sessions
            .iter_mut()
            .find(|s| &s.summary.session_id == session_id)
            .ok_or_else(|| not_found(session_id))?;
        if !session.summary.is_open() {
            return Err(GatewayError::rejected(409, "session already closed"));
        }
        session.summary.is_active = Some(false);
        session.summary.closed_at = Some(OffsetDateTime::now_utc());
        session.summary.token = None;
        session.summary.expires_at = None;
        Ok(())
    }

    async fn active_sessions(&self) -> GatewayResult<Vec<SessionSummary>> {
        self.begin(GatewayCall::ActiveSessions).await?;
        let state = self.state.lock();
        Ok(state
            .sessions
            .iter()
            .rev()
            .filter(|s| s.summary.is_open())
            .map(|s| s.summary.clone())
            .collect())
    }

    async fn session_history(&self, class_id: ClassId) -> GatewayResult<Vec<SessionSummary>> {
        self.begin(GatewayCall::History(class_id)).await?;
        let state = self.state.lock();
        Ok(state
            .sessions
            .iter()
            .rev()
            .filter(|s| s.summary.class_id == Some(class_id))
            .map(|s| s.summary.clone())
            .collect())
    }

    async fn session_roster(&self, session_id: &SessionId) -> GatewayResult<Vec<RosterEntry>> {
        self.begin(GatewayCall::Roster(session_id.clone())).await?;
        self.roster(session_id).ok_or_else(|| not_found(session_id))
    }

    async fn update_attendance(
        &self,
        session_id: &SessionId,
        student_id: StudentId,
        status: AttendanceStatus,
    ) -> GatewayResult<()> {
        self.begin(GatewayCall::UpdateAttendance {
            session_id: session_id.clone(),
            student_id,
            status,
        }).await?;
        let mut state = self.state.lock();
        let locked = state.lock_closed_sessions;
        let session = state
            .sessions
            .iter_mut()
            .find(|s| &s.summary.session_id == session_id)
            .ok_or_else(|| not_found(session_id))?;
        if locked && !session.summary.is_open() {
            return Err(GatewayError::rejected(409, "session is closed"));
        }
        let entry = session
            .roster
            .iter_mut()
            .find(|e| e.student_key() == Some(student_id))
            .ok_or_else(|| {
                GatewayError::rejected(404, format!("student {student_id} not in session"))
            })?;
        entry.status = Some(status);
        entry.recorded_at = Some(OffsetDateTime::now_utc());
        Self::recount(session);
        Ok(())
    }

    async fn class_students(&self, class_id: ClassId) -> GatewayResult<Vec<ClassStudent>> {
        self.begin(GatewayCall::ClassStudents(class_id)).await?;
        let state = self.state.lock();
        state
            .classes
            .iter()
            .find(|(c, _)| c.id == class_id)
            .map(|(_, students)| students.clone())
            .ok_or_else(|| GatewayError::rejected(404, format!("class {class_id} not found")))
    }

    async fn my_classes(&self) -> GatewayResult<Vec<ClassInfo>> {
        self.begin(GatewayCall::MyClasses).await?;
        Ok(self
            .state
            .lock()
            .classes
            .iter()
            .map(|(c, _)| c.clone())
            .collect())
    }
}
