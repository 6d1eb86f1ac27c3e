//! Cross-class session listing for the lecturer's sessions page.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use rawuh_sdk::{ClassInfo, ParseError, SessionGateway, SessionId, SessionMode, SessionSummary};
use tracing::{debug, info, warn};

use crate::error::{BoardError, BoardResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionFilter {
    #[default]
    All,
    Active,
    Closed,
}

impl SessionFilter {
    pub fn matches(self, summary: &SessionSummary) -> bool {
        match self {
            SessionFilter::All => true,
            SessionFilter::Active => summary.is_open(),
            SessionFilter::Closed => !summary.is_open(),
        }
    }
}

impl FromStr for SessionFilter {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(SessionFilter::All),
            "active" | "open" => Ok(SessionFilter::Active),
            "closed" => Ok(SessionFilter::Closed),
            other => Err(ParseError::new("session filter", other)),
        }
    }
}

/// Every session the lecturer can see: open ones across classes plus each
/// class's history.
pub struct SessionBoard {
    gateway: Arc<dyn SessionGateway>,
    entries: Mutex<Vec<SessionSummary>>,
}

impl SessionBoard {
    pub fn new(gateway: Arc<dyn SessionGateway>) -> Self {
        Self {
            gateway,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Rebuild the board. Active sessions and the class list must load; a
    /// class whose history fails contributes nothing.
    pub async fn load(&self) -> BoardResult<Vec<SessionSummary>> {
        let (active, classes) = futures::try_join!(
            self.gateway.active_sessions(),
            self.gateway.my_classes()
        )?;

        let histories = join_all(classes.iter().map(|class| async move {
            match self.gateway.session_history(class.id).await {
                Ok(history) => history
                    .into_iter()
                    .map(|summary| annotate(summary, class))
                    .collect(),
                Err(err) => {
                    warn!(class_id = class.id, error = %err, "failed to load session history");
                    Vec::new()
                }
            }
        }))
        .await;

        let entries = merge(active, histories.into_iter().flatten());
        debug!(sessions = entries.len(), classes = classes.len(), "session board loaded");
        *self.entries.lock() = entries.clone();
        Ok(entries)
    }

    pub fn sessions(&self, filter: SessionFilter) -> Vec<SessionSummary> {
        self.entries
            .lock()
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect()
    }

    /// Close a listed open session through the tokenless API, then reload.
    pub async fn close<F>(&self, session_id: &SessionId, confirm: F) -> BoardResult<Vec<SessionSummary>>
    where
        F: FnOnce(&SessionSummary) -> bool,
    {
        let summary = self
            .entries
            .lock()
            .iter()
            .find(|s| &s.session_id == session_id)
            .cloned()
            .ok_or_else(|| BoardError::NotListed(session_id.clone()))?;
        if !summary.is_open() {
            return Err(BoardError::AlreadyClosed(session_id.clone()));
        }
        if !confirm(&summary) {
            return Err(BoardError::NotConfirmed);
        }

        self.gateway
            .close_session(SessionMode::Tokenless, session_id)
            .await?;
        info!(session_id = %session_id, "session closed from board");
        self.load().await
    }
}

fn annotate(mut summary: SessionSummary, class: &ClassInfo) -> SessionSummary {
    summary.class_id.get_or_insert(class.id);
    summary
        .class_name
        .get_or_insert_with(|| class.name.clone());
    summary
        .class_code
        .get_or_insert_with(|| class.class_code.clone());
    if summary.class_section.is_none() {
        summary.class_section = class.class_section.clone();
    }
    summary
}

/// First occurrence of a session id wins; newest first, undated last.
fn merge(
    active: Vec<SessionSummary>,
    history: impl IntoIterator<Item = SessionSummary>,
) -> Vec<SessionSummary> {
    let mut seen = HashSet::new();
    let mut merged: Vec<SessionSummary> = active
        .into_iter()
        .chain(history)
        .filter(|s| seen.insert(s.session_id.clone()))
        .collect();
    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    merged
}
