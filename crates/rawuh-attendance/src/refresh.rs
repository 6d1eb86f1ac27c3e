//! Periodic rotation of a token-mode session's QR credential.
//!
//! The loop is a single tokio task owned by a [`RefreshHandle`]. Ticks fire
//! strictly on the period; each tick spawns its own fetch so a slow gateway
//! never delays the next one. Responses can therefore complete out of order,
//! and only a response newer than the last applied one reaches the sink.

use std::sync::Arc;
use std::time::Duration;

use rawuh_sdk::{GatewayResult, SessionGateway, SessionId, TokenGrant};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Receives fresh credentials from the loop.
pub trait TokenSink: Send + Sync + 'static {
    /// Apply `grant` to `session_id`. Returning `false` means the session is
    /// no longer current and the loop stops.
    fn accept(&self, session_id: &SessionId, grant: TokenGrant) -> bool;
}

/// Owner of an armed refresh loop. Dropping it disarms the loop.
#[derive(Debug)]
pub struct RefreshHandle {
    session_id: SessionId,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Stop the loop and abort any fetch still in flight.
    pub fn cancel(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Arm a refresh loop for `session_id`. The first fetch happens one full
/// `period` after arming.
pub fn arm(
    gateway: Arc<dyn SessionGateway>,
    session_id: SessionId,
    period: Duration,
    sink: Arc<dyn TokenSink>,
) -> RefreshHandle {
    debug!(session_id = %session_id, period_secs = period.as_secs(), "arming token refresh loop");
    let task = tokio::spawn(run(gateway, session_id.clone(), period, sink));
    RefreshHandle { session_id, task }
}

async fn run(
    gateway: Arc<dyn SessionGateway>,
    session_id: SessionId,
    period: Duration,
    sink: Arc<dyn TokenSink>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: JoinSet<(u64, GatewayResult<TokenGrant>)> = JoinSet::new();
    let mut issued: u64 = 0;
    let mut applied: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                issued += 1;
                let seq = issued;
                let gateway = Arc::clone(&gateway);
                let id = session_id.clone();
                in_flight.spawn(async move { (seq, gateway.fetch_token(&id).await) });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                match joined {
                    Ok((seq, Ok(grant))) => {
                        if seq <= applied {
                            debug!(session_id = %session_id, seq, applied, "discarding stale token response");
                            continue;
                        }
                        if !sink.accept(&session_id, grant) {
                            debug!(session_id = %session_id, "session no longer current; stopping refresh loop");
                            break;
                        }
                        applied = seq;
                    }
                    Ok((seq, Err(err))) => {
                        warn!(session_id = %session_id, seq, error = %err, "token refresh failed; keeping previous token");
                    }
                    Err(err) if err.is_panic() => {
                        warn!(session_id = %session_id, error = %err, "token refresh task panicked");
                    }
                    Err(_) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rawuh_sdk::memory::GatewayOp;
    use rawuh_sdk::{GatewayError, InMemoryGateway, SessionMode};
    use tokio::time::sleep;

    const PERIOD: Duration = Duration::from_secs(30);

    struct RecordingSink {
        grants: Mutex<Vec<String>>,
        current: Mutex<bool>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                grants: Mutex::new(Vec::new()),
                current: Mutex::new(true),
            })
        }

        fn tokens(&self) -> Vec<String> {
            self.grants.lock().clone()
        }
    }

    impl TokenSink for RecordingSink {
        fn accept(&self, _session_id: &SessionId, grant: TokenGrant) -> bool {
            if !*self.current.lock() {
                return false;
            }
            self.grants.lock().push(grant.token);
            true
        }
    }

    fn token_session() -> (Arc<InMemoryGateway>, SessionId) {
        let gateway = InMemoryGateway::new();
        let id = gateway.seed_session(7, SessionMode::Token, 3);
        (gateway, id)
    }

    #[tokio::test(start_paused = true)]
    async fn first_refresh_waits_a_full_period() {
        let (gateway, id) = token_session();
        let sink = RecordingSink::new();
        let _handle = arm(gateway.clone(), id.clone(), PERIOD, sink.clone());

        sleep(Duration::from_secs(29)).await;
        assert_eq!(gateway.token_fetches_for(&id), 0);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(gateway.token_fetches_for(&id), 1);
        assert_eq!(sink.tokens(), vec!["tok-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_looping() {
        let (gateway, id) = token_session();
        gateway.fail_next(
            GatewayOp::FetchToken,
            GatewayError::Transport("connection reset".into()),
        );
        let sink = RecordingSink::new();
        let _handle = arm(gateway.clone(), id.clone(), PERIOD, sink.clone());

        sleep(Duration::from_secs(31)).await;
        assert!(sink.tokens().is_empty());

        sleep(Duration::from_secs(30)).await;
        assert_eq!(gateway.token_fetches_for(&id), 2);
        assert_eq!(sink.tokens().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_stale_response_never_overwrites_newer_token() {
        let (gateway, id) = token_session();
        gateway.script_token_latency([Duration::from_secs(45), Duration::from_secs(1)]);
        let sink = RecordingSink::new();
        let _handle = arm(gateway.clone(), id.clone(), PERIOD, sink.clone());

        // tick 1 at 30s answers at 75s with tok-2; tick 2 at 60s answers at 61s with tok-3
        sleep(Duration::from_secs(80)).await;
        assert_eq!(gateway.token_fetches_for(&id), 2);
        assert_eq!(sink.tokens(), vec!["tok-3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_further_fetches() {
        let (gateway, id) = token_session();
        let sink = RecordingSink::new();
        let handle = arm(gateway.clone(), id.clone(), PERIOD, sink.clone());

        sleep(Duration::from_secs(31)).await;
        handle.cancel();
        sleep(Duration::from_secs(300)).await;
        assert_eq!(gateway.token_fetches_for(&id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_disarms() {
        let (gateway, id) = token_session();
        let sink = RecordingSink::new();
        drop(arm(gateway.clone(), id.clone(), PERIOD, sink));

        sleep(Duration::from_secs(300)).await;
        assert_eq!(gateway.token_fetches_for(&id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stops_when_sink_refuses() {
        let (gateway, id) = token_session();
        let sink = RecordingSink::new();
        *sink.current.lock() = false;
        let handle = arm(gateway.clone(), id.clone(), PERIOD, sink.clone());

        sleep(Duration::from_secs(31)).await;
        assert!(handle.is_finished());
        sleep(Duration::from_secs(120)).await;
        assert_eq!(gateway.token_fetches_for(&id), 1);
    }
}
