//! Session supervisor / watchdog.
//!
//! Keeps exactly one session alive while the engine is running: reopens a
//! dead session with exponential backoff, pauses for a minute after five
//! consecutive failures, and prunes finished task handles on each healthy
//! tick. Dial retries (inside `Session::open`) and the CLI's auto-restart
//! budget are deliberately separate counters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::audio::{CaptureBridge, PlayerHandle};
use crate::config::Config;
use crate::engine::SubscriberSet;
use crate::health::{HealthMonitor, SessionState};
use crate::session::Session;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(16);
const MAX_CONSECUTIVE_FAILURES: u32 = 5;
const FAILURE_PAUSE: Duration = Duration::from_secs(60);
// A short tick keeps session-loss detection well inside the reconnect
// window; pruning on each tick is cheap.
const HEALTHY_POLL: Duration = Duration::from_secs(1);

/// Everything the watchdog needs to run and rebuild sessions.
pub(crate) struct SupervisorShared {
    pub config: Config,
    pub running: Arc<AtomicBool>,
    pub session: tokio::sync::Mutex<Option<Session>>,
    pub bridge: CaptureBridge,
    pub player: PlayerHandle,
    pub subscribers: Arc<SubscriberSet>,
    pub health: Arc<HealthMonitor>,
}

/// Reconnect bookkeeping: exponential backoff plus a consecutive-failure
/// budget.
pub(crate) struct RetryBudget {
    backoff: Duration,
    consecutive_failures: u32,
}

impl RetryBudget {
    pub(crate) fn new() -> Self {
        Self {
            backoff: INITIAL_BACKOFF,
            consecutive_failures: 0,
        }
    }

    pub(crate) fn backoff(&self) -> Duration {
        self.backoff
    }

    pub(crate) fn failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES
    }

    /// Record one failed open; returns the failure count so far.
    pub(crate) fn on_failure(&mut self) -> u32 {
        self.consecutive_failures += 1;
        self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
        self.consecutive_failures
    }

    pub(crate) fn on_success(&mut self) {
        self.backoff = INITIAL_BACKOFF;
        self.consecutive_failures = 0;
    }

    pub(crate) fn reset(&mut self) {
        self.on_success();
    }
}

/// Watchdog body: runs until `running` clears, then closes any session.
pub(crate) async fn run(shared: Arc<SupervisorShared>) {
    let mut budget = RetryBudget::new();
    let mut first_attempt = true;

    while shared.running.load(Ordering::SeqCst) {
        let session_alive = {
            let guard = shared.session.lock().await;
            guard.as_ref().is_some_and(Session::is_active)
        };

        if session_alive {
            sleep(HEALTHY_POLL).await;
            let mut guard = shared.session.lock().await;
            if let Some(session) = guard.as_mut() {
                let alive = session.prune_tasks();
                shared.health.set_active_tasks(alive);
            }
            continue;
        }

        // The first open happens eagerly so leading speech is not delayed;
        // every later attempt waits out the backoff first.
        if !first_attempt {
            sleep(budget.backoff()).await;
            if !shared.running.load(Ordering::SeqCst) {
                break;
            }
        }
        first_attempt = false;

        if budget.exhausted() {
            error!(
                "{} consecutive reconnect failures, pausing for {}s",
                budget.failures(),
                FAILURE_PAUSE.as_secs()
            );
            sleep(FAILURE_PAUSE).await;
            budget.reset();
            continue;
        }

        // Tear down the remnants of a dead session before rebuilding.
        let had_session = {
            let old = shared.session.lock().await.take();
            match old {
                Some(session) => {
                    session
                        .close(&shared.bridge, &shared.player, &shared.health)
                        .await;
                    true
                }
                None => false,
            }
        };
        if had_session {
            shared.health.record_reconnect();
            shared.health.set_session_state(SessionState::Reconnecting);
        }
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        info!(
            "watchdog: opening session (backoff {}s)",
            budget.backoff().as_secs()
        );
        match Session::open(
            &shared.config,
            &shared.bridge,
            shared.player.clone(),
            Arc::clone(&shared.subscribers),
            Arc::clone(&shared.health),
        )
        .await
        {
            Ok(session) => {
                *shared.session.lock().await = Some(session);
                budget.on_success();
            }
            Err(e) => {
                shared.health.record_error(&e.to_string());
                let failures = budget.on_failure();
                warn!(
                    "watchdog reconnect failed ({failures}/{MAX_CONSECUTIVE_FAILURES}): {e}"
                );
            }
        }
    }

    if let Some(session) = shared.session.lock().await.take() {
        session
            .close(&shared.bridge, &shared.player, &shared.health)
            .await;
    }
    debug!("watchdog exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut budget = RetryBudget::new();
        assert_eq!(budget.backoff(), Duration::from_secs(1));

        let expected = [2u64, 4, 8, 16, 16, 16];
        for seconds in expected {
            budget.on_failure();
            assert_eq!(budget.backoff(), Duration::from_secs(seconds));
        }
    }

    #[test]
    fn test_budget_exhausts_at_five() {
        let mut budget = RetryBudget::new();
        for _ in 0..4 {
            budget.on_failure();
            assert!(!budget.exhausted());
        }
        budget.on_failure();
        assert!(budget.exhausted());
    }

    #[test]
    fn test_success_resets_budget() {
        let mut budget = RetryBudget::new();
        budget.on_failure();
        budget.on_failure();
        budget.on_success();
        assert_eq!(budget.backoff(), Duration::from_secs(1));
        assert_eq!(budget.failures(), 0);
        assert!(!budget.exhausted());
    }
}
