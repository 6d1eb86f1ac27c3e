//! Attendance marks for the session currently on screen.
//!
//! The book holds one scope at a time. Marks are applied locally before the
//! gateway confirms them, and counters are derived from the marks on every
//! query. Replacing or resetting the scope invalidates results still in
//! flight for the old one.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rawuh_sdk::{
    AttendanceStatus, ClassId, ClassStudent, RosterEntry, SessionGateway, SessionId, StudentId,
};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::FailurePolicy;
use crate::error::{RosterError, RosterResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceMark {
    pub student_id: Option<StudentId>,
    pub name: String,
    pub nim: String,
    pub status: Option<AttendanceStatus>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub recorded_at: Option<OffsetDateTime>,
}

impl AttendanceMark {
    pub fn label(&self) -> &'static str {
        AttendanceStatus::label_for(self.status)
    }

    pub fn is_recorded(&self) -> bool {
        self.status.is_some()
    }

    /// Placeholder for a student the roster snapshot does not list yet.
    fn unlisted(student_id: StudentId) -> Self {
        Self {
            student_id: Some(student_id),
            name: String::new(),
            nim: String::new(),
            status: None,
            recorded_at: None,
        }
    }
}

impl From<RosterEntry> for AttendanceMark {
    fn from(entry: RosterEntry) -> Self {
        Self {
            student_id: entry.student_key(),
            name: entry.name,
            nim: entry.nim,
            status: entry.status,
            recorded_at: entry.recorded_at,
        }
    }
}

impl From<&ClassStudent> for AttendanceMark {
    fn from(student: &ClassStudent) -> Self {
        Self {
            student_id: Some(student.id),
            name: student.name.clone(),
            nim: student.nim.clone(),
            status: None,
            recorded_at: None,
        }
    }
}

/// Counters derived from a set of marks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceSummary {
    pub present: usize,
    pub permission: usize,
    pub sick: usize,
    pub absent: usize,
    pub not_recorded: usize,
    pub total: usize,
}

impl AttendanceSummary {
    pub fn from_marks<'a>(marks: impl IntoIterator<Item = &'a AttendanceMark>) -> Self {
        let mut summary = Self::default();
        for mark in marks {
            summary.total += 1;
            match mark.status {
                Some(AttendanceStatus::Present) => summary.present += 1,
                Some(AttendanceStatus::Permission) => summary.permission += 1,
                Some(AttendanceStatus::Sick) => summary.sick += 1,
                Some(AttendanceStatus::Absent) => summary.absent += 1,
                None => summary.not_recorded += 1,
            }
        }
        summary
    }

    pub fn count(&self, status: Option<AttendanceStatus>) -> usize {
        match status {
            Some(AttendanceStatus::Present) => self.present,
            Some(AttendanceStatus::Permission) => self.permission,
            Some(AttendanceStatus::Sick) => self.sick,
            Some(AttendanceStatus::Absent) => self.absent,
            None => self.not_recorded,
        }
    }
}

#[derive(Default)]
struct BookState {
    generation: u64,
    session_id: Option<SessionId>,
    marks: Vec<AttendanceMark>,
    revisions: HashMap<StudentId, u64>,
    next_revision: u64,
}

impl BookState {
    fn ensure_scope(&self, session_id: &SessionId) -> RosterResult<()> {
        match &self.session_id {
            None => Err(RosterError::NotLoaded),
            Some(loaded) if loaded != session_id => Err(RosterError::SessionMismatch {
                loaded: loaded.clone(),
                requested: session_id.clone(),
            }),
            Some(_) => Ok(()),
        }
    }

    fn position(&self, student_id: StudentId) -> Option<usize> {
        self.marks
            .iter()
            .position(|m| m.student_id == Some(student_id))
    }

    /// Index of the student's mark, adding an unrecorded one if missing.
    fn position_or_insert(&mut self, student_id: StudentId) -> usize {
        match self.position(student_id) {
            Some(idx) => idx,
            None => {
                self.marks.push(AttendanceMark::unlisted(student_id));
                self.marks.len() - 1
            }
        }
    }

    fn merge_enrolled(&mut self, students: &[ClassStudent]) -> usize {
        let mut added = 0;
        for student in students {
            match self.position(student.id) {
                Some(idx) => {
                    let mark = &mut self.marks[idx];
                    if mark.name.is_empty() {
                        mark.name = student.name.clone();
                    }
                    if mark.nim.is_empty() {
                        mark.nim = student.nim.clone();
                    }
                }
                None => {
                    self.marks.push(AttendanceMark::from(student));
                    added += 1;
                }
            }
        }
        added
    }
}

/// Reconciles local marks for one session against the gateway roster.
pub struct AttendanceBook {
    gateway: Arc<dyn SessionGateway>,
    policy: FailurePolicy,
    state: Mutex<BookState>,
}

impl AttendanceBook {
    pub fn new(gateway: Arc<dyn SessionGateway>, policy: FailurePolicy) -> Self {
        Self {
            gateway,
            policy,
            state: Mutex::new(BookState::default()),
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.state.lock().session_id.clone()
    }

    pub fn marks(&self) -> Vec<AttendanceMark> {
        self.state.lock().marks.clone()
    }

    pub fn mark(&self, student_id: StudentId) -> Option<AttendanceMark> {
        let state = self.state.lock();
        state.position(student_id).map(|idx| state.marks[idx].clone())
    }

    /// Counters over the current marks. Unrecorded students are counted,
    /// never dropped.
    pub fn summary(&self) -> AttendanceSummary {
        AttendanceSummary::from_marks(self.state.lock().marks.iter())
    }

    /// Fetch the roster of `session_id` and make it the book's scope.
    pub async fn load_roster(&self, session_id: &SessionId) -> RosterResult<AttendanceSummary> {
        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.generation
        };

        let entries = self.gateway.session_roster(session_id).await?;

        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(session_id = %session_id, "discarding roster for replaced scope");
            return Err(RosterError::Discarded);
        }
        state.session_id = Some(session_id.clone());
        state.marks = entries.into_iter().map(AttendanceMark::from).collect();
        state.revisions.clear();
        let summary = AttendanceSummary::from_marks(state.marks.iter());
        debug!(session_id = %session_id, students = summary.total, "roster loaded");
        Ok(summary)
    }

    /// Add enrolled students missing from the roster as unrecorded marks.
    /// Returns how many were added.
    pub fn include_enrolled(&self, students: &[ClassStudent]) -> usize {
        self.state.lock().merge_enrolled(students)
    }

    /// Fetch the class's enrolled students and merge them into the loaded
    /// roster.
    pub async fn load_enrolled(&self, class_id: ClassId) -> RosterResult<usize> {
        let generation = {
            let state = self.state.lock();
            if state.session_id.is_none() {
                return Err(RosterError::NotLoaded);
            }
            state.generation
        };

        let students = self.gateway.class_students(class_id).await?;

        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(class_id, "discarding enrolled students for replaced scope");
            return Err(RosterError::Discarded);
        }
        Ok(state.merge_enrolled(&students))
    }

    /// Mark `student_id` with `status`. The local mark changes before the
    /// gateway answers; `recorded_at` is left for the next roster read.
    /// A student missing from the snapshot is marked like an unrecorded one,
    /// and the gateway decides whether they belong to the session.
    pub async fn set_status(
        &self,
        session_id: &SessionId,
        student_id: StudentId,
        status: AttendanceStatus,
    ) -> RosterResult<()> {
        let (generation, revision, previous) = {
            let mut state = self.state.lock();
            state.ensure_scope(session_id)?;
            let idx = state.position_or_insert(student_id);
            let previous = state.marks[idx].status.replace(status);
            state.next_revision += 1;
            let revision = state.next_revision;
            state.revisions.insert(student_id, revision);
            (state.generation, revision, previous)
        };

        let result = self
            .gateway
            .update_attendance(session_id, student_id, status)
            .await;

        let err = match result {
            Ok(()) => {
                info!(session_id = %session_id, student_id, status = status.code(), "attendance marked");
                return Ok(());
            }
            Err(err) => err,
        };
        warn!(session_id = %session_id, student_id, error = %err, "failed to mark attendance");

        if self.policy == FailurePolicy::Revert {
            let mut state = self.state.lock();
            let superseded = state.revisions.get(&student_id) != Some(&revision);
            if state.generation != generation {
                debug!(session_id = %session_id, student_id, "scope replaced; nothing to revert");
            } else if superseded {
                debug!(session_id = %session_id, student_id, "newer mark in place; not reverting");
            } else if let Some(idx) = state.position(student_id) {
                state.marks[idx].status = previous;
            }
        }
        Err(err.into())
    }

    /// Drop the scope. Results still in flight for it are ignored.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.session_id = None;
        state.marks.clear();
        state.revisions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rawuh_sdk::memory::GatewayOp;
    use rawuh_sdk::{ClassInfo, GatewayError, InMemoryGateway, SessionMode};
    use std::time::Duration;
    use tokio::time::sleep;

    fn student(id: StudentId) -> ClassStudent {
        ClassStudent {
            id,
            name: format!("Student {id}"),
            nim: format!("2100{id}"),
            email: None,
        }
    }

    fn setup(policy: FailurePolicy) -> (Arc<InMemoryGateway>, AttendanceBook, SessionId) {
        let gateway = InMemoryGateway::new();
        gateway.add_class(
            ClassInfo {
                id: 7,
                name: "Basis Data".into(),
                class_code: "IF-220".into(),
                class_section: None,
                lecturer: None,
                day: None,
                start_time: None,
                end_time: None,
            },
            vec![student(41), student(42), student(43)],
        );
        let id = gateway.seed_session(7, SessionMode::Tokenless, 2);
        let book = AttendanceBook::new(gateway.clone(), policy);
        (gateway, book, id)
    }

    #[tokio::test]
    async fn loaded_roster_starts_unrecorded() {
        let (_gateway, book, id) = setup(FailurePolicy::default());
        let summary = book.load_roster(&id).await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.not_recorded, 3);
        assert_eq!(book.mark(41).unwrap().label(), "Not Recorded");
    }

    #[tokio::test]
    async fn present_then_absent_ends_absent() {
        let (gateway, book, id) = setup(FailurePolicy::default());
        book.load_roster(&id).await.unwrap();

        book.set_status(&id, 42, AttendanceStatus::Present).await.unwrap();
        book.set_status(&id, 42, AttendanceStatus::Absent).await.unwrap();
        assert_eq!(book.mark(42).unwrap().status, Some(AttendanceStatus::Absent));

        book.load_roster(&id).await.unwrap();
        let mark = book.mark(42).unwrap();
        assert_eq!(mark.status, Some(AttendanceStatus::Absent));
        assert!(mark.recorded_at.is_some());
        assert_eq!(gateway.count_calls(GatewayOp::UpdateAttendance), 2);
    }

    #[tokio::test]
    async fn marking_twice_is_idempotent() {
        let (_gateway, book, id) = setup(FailurePolicy::default());
        book.load_roster(&id).await.unwrap();
        book.set_status(&id, 41, AttendanceStatus::Sick).await.unwrap();
        let once = book.marks();
        book.set_status(&id, 41, AttendanceStatus::Sick).await.unwrap();
        assert_eq!(book.marks(), once);
    }

    #[tokio::test]
    async fn optimistic_mark_has_no_local_timestamp() {
        let (_gateway, book, id) = setup(FailurePolicy::default());
        book.load_roster(&id).await.unwrap();
        book.set_status(&id, 43, AttendanceStatus::Present).await.unwrap();
        let mark = book.mark(43).unwrap();
        assert_eq!(mark.status, Some(AttendanceStatus::Present));
        assert!(mark.recorded_at.is_none());
    }

    #[tokio::test]
    async fn summary_buckets_sum_to_roster_size() {
        let (_gateway, book, id) = setup(FailurePolicy::default());
        book.load_roster(&id).await.unwrap();
        book.set_status(&id, 41, AttendanceStatus::Present).await.unwrap();
        book.set_status(&id, 42, AttendanceStatus::Permission).await.unwrap();
        book.include_enrolled(&[student(44), student(41)]);

        let summary = book.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.present, 1);
        assert_eq!(summary.permission, 1);
        assert_eq!(summary.not_recorded, 2);
        assert_eq!(
            summary.present + summary.permission + summary.sick + summary.absent + summary.not_recorded,
            summary.total
        );
        assert_eq!(summary.count(None), 2);
    }

    #[tokio::test]
    async fn enrolled_students_fill_gaps_in_roster() {
        let (gateway, book, id) = setup(FailurePolicy::default());
        book.load_roster(&id).await.unwrap();
        gateway.add_class(
            ClassInfo {
                id: 8,
                name: "Kalkulus".into(),
                class_code: "MA-101".into(),
                class_section: None,
                lecturer: None,
                day: None,
                start_time: None,
                end_time: None,
            },
            vec![student(41), student(90)],
        );
        assert_eq!(book.load_enrolled(8).await.unwrap(), 1);
        assert_eq!(book.mark(90).unwrap().status, None);
        assert_eq!(book.summary().total, 4);
    }

    #[tokio::test]
    async fn rejects_foreign_session() {
        let (gateway, book, id) = setup(FailurePolicy::default());
        let err = book
            .set_status(&id, 41, AttendanceStatus::Present)
            .await
            .unwrap_err();
        assert!(matches!(err, RosterError::NotLoaded));

        book.load_roster(&id).await.unwrap();
        let err = book
            .set_status(&SessionId::from("other"), 41, AttendanceStatus::Present)
            .await
            .unwrap_err();
        assert!(matches!(err, RosterError::SessionMismatch { .. }));
        assert_eq!(gateway.count_calls(GatewayOp::UpdateAttendance), 0);
    }

    #[tokio::test]
    async fn student_enrolled_after_snapshot_can_be_marked() {
        let (gateway, book, id) = setup(FailurePolicy::default());
        book.load_roster(&id).await.unwrap();
        gateway.enroll(&id, &student(44));

        book.set_status(&id, 44, AttendanceStatus::Present).await.unwrap();
        assert_eq!(gateway.count_calls(GatewayOp::UpdateAttendance), 1);
        assert_eq!(book.mark(44).unwrap().status, Some(AttendanceStatus::Present));
        let summary = book.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.present, 1);

        book.load_roster(&id).await.unwrap();
        let mark = book.mark(44).unwrap();
        assert_eq!(mark.status, Some(AttendanceStatus::Present));
        assert_eq!(mark.name, "Student 44");
    }

    #[tokio::test]
    async fn unlisted_student_gets_names_from_enrollment() {
        let (_gateway, book, id) = setup(FailurePolicy::default());
        book.load_roster(&id).await.unwrap();
        assert!(book.set_status(&id, 45, AttendanceStatus::Sick).await.is_err());
        assert_eq!(book.mark(45).unwrap().name, "");

        assert_eq!(book.include_enrolled(&[student(45)]), 0);
        let mark = book.mark(45).unwrap();
        assert_eq!(mark.name, "Student 45");
        assert_eq!(mark.nim, "210045");
        assert_eq!(mark.status, Some(AttendanceStatus::Sick));
    }

    #[tokio::test]
    async fn gateway_decides_on_students_it_does_not_know() {
        let (gateway, book, id) = setup(FailurePolicy::Revert);
        book.load_roster(&id).await.unwrap();

        let err = book
            .set_status(&id, 99, AttendanceStatus::Present)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "student 99 not in session");
        assert_eq!(gateway.count_calls(GatewayOp::UpdateAttendance), 1);
        let mark = book.mark(99).unwrap();
        assert_eq!(mark.status, None);
        assert_eq!(mark.label(), "Not Recorded");
        assert_eq!(book.summary().not_recorded, 4);
    }

    #[tokio::test]
    async fn failed_mark_keeps_optimistic_status_by_default() {
        let (gateway, book, id) = setup(FailurePolicy::KeepOptimistic);
        book.load_roster(&id).await.unwrap();
        gateway.fail_next(
            GatewayOp::UpdateAttendance,
            GatewayError::rejected(500, "database unavailable"),
        );

        let err = book
            .set_status(&id, 41, AttendanceStatus::Present)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "database unavailable");
        assert_eq!(book.mark(41).unwrap().status, Some(AttendanceStatus::Present));
        assert_eq!(gateway.roster(&id).unwrap()[0].status, None);
    }

    #[tokio::test]
    async fn revert_policy_restores_previous_status() {
        let (gateway, book, id) = setup(FailurePolicy::Revert);
        book.load_roster(&id).await.unwrap();
        book.set_status(&id, 41, AttendanceStatus::Sick).await.unwrap();
        gateway.set_offline(true);

        let err = book
            .set_status(&id, 41, AttendanceStatus::Absent)
            .await
            .unwrap_err();
        assert!(matches!(err, RosterError::Gateway(_)));
        assert_eq!(book.mark(41).unwrap().status, Some(AttendanceStatus::Sick));
    }

    #[tokio::test(start_paused = true)]
    async fn revert_policy_leaves_newer_mark_alone() {
        let (gateway, book, id) = setup(FailurePolicy::Revert);
        let book = Arc::new(book);
        book.load_roster(&id).await.unwrap();
        gateway.delay_next(GatewayOp::UpdateAttendance, Duration::from_secs(2));

        let slow = tokio::spawn({
            let book = Arc::clone(&book);
            let id = id.clone();
            async move { book.set_status(&id, 42, AttendanceStatus::Present).await }
        });
        sleep(Duration::from_millis(10)).await;
        book.set_status(&id, 42, AttendanceStatus::Absent).await.unwrap();
        gateway.set_offline(true);

        assert!(slow.await.unwrap().is_err());
        assert_eq!(book.mark(42).unwrap().status, Some(AttendanceStatus::Absent));
    }

    #[tokio::test]
    async fn closed_session_edits_go_through_the_gateway() {
        let (gateway, book, id) = setup(FailurePolicy::default());
        book.load_roster(&id).await.unwrap();
        gateway
            .close_session(SessionMode::Tokenless, &id)
            .await
            .unwrap();

        book.set_status(&id, 41, AttendanceStatus::Permission).await.unwrap();

        gateway.lock_closed_sessions(true);
        let err = book
            .set_status(&id, 42, AttendanceStatus::Permission)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "session is closed");
    }

    #[tokio::test(start_paused = true)]
    async fn reset_discards_enrolled_students_in_flight() {
        let (gateway, book, id) = setup(FailurePolicy::default());
        let book = Arc::new(book);
        book.load_roster(&id).await.unwrap();
        gateway.delay_next(GatewayOp::ClassStudents, Duration::from_secs(1));

        let pending = tokio::spawn({
            let book = Arc::clone(&book);
            async move { book.load_enrolled(7).await }
        });
        sleep(Duration::from_millis(10)).await;
        book.reset();

        assert!(matches!(
            pending.await.unwrap().unwrap_err(),
            RosterError::Discarded
        ));
        assert!(book.marks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_discards_roster_in_flight() {
        let (gateway, book, id) = setup(FailurePolicy::default());
        let book = Arc::new(book);
        gateway.delay_next(GatewayOp::Roster, Duration::from_secs(1));

        let pending = tokio::spawn({
            let book = Arc::clone(&book);
            let id = id.clone();
            async move { book.load_roster(&id).await }
        });
        sleep(Duration::from_millis(10)).await;
        book.reset();

        assert!(matches!(
            pending.await.unwrap().unwrap_err(),
            RosterError::Discarded
        ));
        assert!(book.session_id().is_none());
        assert!(book.marks().is_empty());
    }
}
