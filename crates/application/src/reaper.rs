//! Stale-session eviction.
//!
//! A periodic sweep removes sessions idle past the configured threshold
//! and erases their dictionary entries. A packet racing the sweep wins:
//! eviction re-checks last-activity under the table lock.

use std::sync::Arc;
use std::time::Duration;

use domain::dict::store::Dictionary;
use domain::session::table::SessionTable;
use ports::secondary::metrics_port::MetricsPort;
use tokio_util::sync::CancellationToken;

pub struct SessionReaper {
    sessions: Arc<SessionTable>,
    dict: Arc<Dictionary>,
    metrics: Arc<dyn MetricsPort>,
    idle_timeout: Duration,
    interval: Duration,
}

impl SessionReaper {
    pub fn new(
        sessions: Arc<SessionTable>,
        dict: Arc<Dictionary>,
        metrics: Arc<dyn MetricsPort>,
        idle_timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            sessions,
            dict,
            metrics,
            idle_timeout,
            interval,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a restart does not
        // sweep before traffic has a chance to refresh activity.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.sweep();
                    if evicted > 0 {
                        tracing::info!(evicted, "reaper evicted stale sessions");
                    }
                }
            }
        }

        tracing::info!("session reaper stopped");
    }

    /// One pass over the table. Returns the number of sessions evicted.
    pub fn sweep(&self) -> usize {
        let mut evicted = 0;
        for session in self.sessions.snapshot() {
            if session.idle() < self.idle_timeout {
                continue;
            }
            let ctid = session.conntrack_id();
            // Re-check under the lock; a packet may have just landed.
            if let Some(stale) = self.sessions.remove_if_idle(ctid, self.idle_timeout) {
                self.dict.flush_session(ctid);
                self.metrics.session_removed("idle");
                tracing::debug!(
                    ctid,
                    session_id = stale.session_id(),
                    idle_secs = stale.idle().as_secs(),
                    "stale session evicted"
                );
                evicted += 1;
            }
        }
        self.metrics.set_sessions_active(self.sessions.len() as u64);
        evicted
    }
}
