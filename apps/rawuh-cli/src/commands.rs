use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Result};
use rawuh_attendance::{
    AttendanceBook, AttendanceConfig, AttendanceMark, AttendanceSummary, ConfirmClose,
    LifecycleError, LifecycleState, Session, SessionBoard, SessionController, SessionFilter,
};
use rawuh_sdk::{AttendanceStatus, SessionGateway, SessionId, SessionMode, SessionSummary};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy)]
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn session(&self, session: &Session) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(session)?);
            return Ok(());
        }
        println!(
            "Session {} (class {}, week {}, {})",
            session.id,
            session.class_id,
            session.week,
            session.mode()
        );
        if let Some(credential) = session.credential() {
            println!(
                "  token {} expires {}",
                credential.token,
                timestamp(credential.expires_at)
            );
        }
        Ok(())
    }

    fn summaries(&self, summaries: &[SessionSummary]) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(summaries)?);
            return Ok(());
        }
        if summaries.is_empty() {
            println!("No sessions.");
        }
        for summary in summaries {
            println!(
                "{:<6} {}  week {:>2}  {} {}  {}",
                if summary.is_open() { "open" } else { "closed" },
                summary.session_id,
                summary.week,
                summary.class_code.as_deref().unwrap_or("-"),
                summary.class_name.as_deref().unwrap_or(""),
                summary.created_at.map(timestamp).unwrap_or_default(),
            );
        }
        Ok(())
    }

    fn roster(
        &self,
        session_id: &SessionId,
        marks: &[AttendanceMark],
        summary: AttendanceSummary,
    ) -> Result<()> {
        if self.json {
            let body = json!({
                "session_id": session_id,
                "marks": marks,
                "summary": summary,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
            return Ok(());
        }
        for mark in marks {
            let id = mark
                .student_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".into());
            println!("{:>6}  {:<14} {:<32} {}", id, mark.nim, mark.name, mark.label());
        }
        println!(
            "present {} | permission {} | sick {} | absent {} | not recorded {} | total {}",
            summary.present,
            summary.permission,
            summary.sick,
            summary.absent,
            summary.not_recorded,
            summary.total
        );
        Ok(())
    }
}

fn timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

fn prompt_close(session: &Session) -> bool {
    print!(
        "Close session {} (week {})? Students can no longer check in. [y/N] ",
        session.id, session.week
    );
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn assume_yes(_: &Session) -> bool {
    true
}

pub async fn start(
    gateway: Arc<dyn SessionGateway>,
    config: AttendanceConfig,
    class_id: u64,
    week: u32,
    mode: &str,
    out: Output,
) -> Result<()> {
    let mode: SessionMode = mode.parse()?;
    let controller = SessionController::new(gateway, config);
    let session = controller.start_session(class_id, week, mode).await?;
    out.session(&session)?;

    if session.mode() == SessionMode::Tokenless {
        println!("Session stays open; close it with `rawuh close --class {class_id}`.");
        return Ok(());
    }

    println!("Watching token rotation. Press Ctrl-C to stop.");
    let mut states = controller.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                if let LifecycleState::Active(current) = state {
                    if let Some(credential) = current.credential() {
                        println!("token {} expires {}", credential.token, timestamp(credential.expires_at));
                    }
                }
            }
            _ = &mut ctrl_c => break,
        }
    }

    match controller.close_session(&session.id, &prompt_close).await {
        Ok(closed) => {
            println!("Session {} closed at {}.", closed.id, timestamp(closed.closed_at));
            Ok(())
        }
        Err(LifecycleError::NotConfirmed) => {
            println!("Session {} left open.", session.id);
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn close(
    gateway: Arc<dyn SessionGateway>,
    config: AttendanceConfig,
    class_id: u64,
    yes: bool,
    out: Output,
) -> Result<()> {
    let controller = SessionController::new(gateway, config);
    let Some(session) = controller.resume(class_id).await? else {
        bail!("class {class_id} has no open session");
    };
    out.session(&session)?;

    let confirm: &dyn ConfirmClose = if yes { &assume_yes } else { &prompt_close };
    match controller.close_session(&session.id, confirm).await {
        Ok(closed) => {
            println!("Session {} closed.", closed.id);
            Ok(())
        }
        Err(LifecycleError::NotConfirmed) => {
            println!("Session {} left open.", session.id);
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn sessions(gateway: Arc<dyn SessionGateway>, filter: &str, out: Output) -> Result<()> {
    let filter: SessionFilter = filter.parse()?;
    let board = SessionBoard::new(gateway);
    board.load().await?;
    out.summaries(&board.sessions(filter))
}

pub async fn roster(
    gateway: Arc<dyn SessionGateway>,
    config: AttendanceConfig,
    session_id: &str,
    class_id: Option<u64>,
    out: Output,
) -> Result<()> {
    let session_id = SessionId::from(session_id);
    let book = AttendanceBook::new(gateway, config.failure_policy);
    book.load_roster(&session_id).await?;
    if let Some(class_id) = class_id {
        book.load_enrolled(class_id).await?;
    }
    out.roster(&session_id, &book.marks(), book.summary())
}

pub async fn mark(
    gateway: Arc<dyn SessionGateway>,
    config: AttendanceConfig,
    session_id: &str,
    student_id: u64,
    status: &str,
    class_id: Option<u64>,
    out: Output,
) -> Result<()> {
    let status: AttendanceStatus = status.parse()?;
    let session_id = SessionId::from(session_id);
    let book = AttendanceBook::new(gateway, config.failure_policy);
    book.load_roster(&session_id).await?;
    if let Some(class_id) = class_id {
        book.load_enrolled(class_id).await?;
    }
    book.set_status(&session_id, student_id, status).await?;

    if out.json {
        let mark = book.mark(student_id);
        println!("{}", serde_json::to_string_pretty(&mark)?);
    } else if let Some(mark) = book.mark(student_id) {
        let who = if mark.name.is_empty() {
            format!("student {student_id}")
        } else {
            format!("{} ({})", mark.name, mark.nim)
        };
        println!("{who} marked {}", mark.label());
    }
    Ok(())
}

pub async fn active(
    gateway: Arc<dyn SessionGateway>,
    config: AttendanceConfig,
    class_id: u64,
    out: Output,
) -> Result<()> {
    let controller = SessionController::new(gateway, config);
    match controller.get_active_session(class_id).await? {
        Some(summary) => out.summaries(&[summary]),
        None if out.json => {
            println!("null");
            Ok(())
        }
        None => {
            println!("Class {class_id} has no open session.");
            Ok(())
        }
    }
}
