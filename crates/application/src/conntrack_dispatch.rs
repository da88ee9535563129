//! Conntrack lifecycle ingestion.
//!
//! NEW/UPDATE/DESTROY events maintain the conntrack table, pair records
//! with sessions, and tear both down on DESTROY. A NEW event may arrive
//! before or after the first queued packet of the same ctid; both orders
//! are handled here and in the packet dispatcher's reconciliation.

use std::sync::Arc;

use domain::conntrack::entity::ConntrackEntry;
use domain::conntrack::table::ConntrackTable;
use domain::dict::store::Dictionary;
use domain::event::{ConntrackEvent, ConntrackEventKind};
use domain::plugin::registry::SubscriptionRegistry;
use domain::session::table::SessionTable;
use ports::secondary::metrics_port::MetricsPort;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct ConntrackDispatcher {
    sessions: Arc<SessionTable>,
    conntracks: Arc<ConntrackTable>,
    dict: Arc<Dictionary>,
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<dyn MetricsPort>,
}

impl ConntrackDispatcher {
    pub fn new(
        sessions: Arc<SessionTable>,
        conntracks: Arc<ConntrackTable>,
        dict: Arc<Dictionary>,
        registry: Arc<SubscriptionRegistry>,
        metrics: Arc<dyn MetricsPort>,
    ) -> Self {
        Self {
            sessions,
            conntracks,
            dict,
            registry,
            metrics,
        }
    }

    /// Main event loop. Drains remaining events on cancellation.
    pub async fn run(self, mut rx: mpsc::Receiver<ConntrackEvent>, cancel: CancellationToken) {
        let mut count: u64 = 0;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    while let Ok(event) = rx.try_recv() {
                        count += 1;
                        self.handle_event(event).await;
                    }
                    break;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(event) => {
                            count += 1;
                            self.handle_event(event).await;
                        }
                        None => break, // channel closed
                    }
                }
            }
        }

        tracing::info!(total_events = count, "conntrack dispatcher stopped");
    }

    pub async fn handle_event(&self, event: ConntrackEvent) {
        self.metrics.record_conntrack_event(event.kind.as_str());

        match event.kind {
            ConntrackEventKind::New => self.handle_new(&event),
            ConntrackEventKind::Update => self.handle_update(&event),
            ConntrackEventKind::Destroy => self.handle_destroy(&event),
        }

        // Subscribers run sequentially; event handlers must be short.
        for sub in self.registry.conntrack_snapshot() {
            sub.subscriber.handle(&event).await;
        }
    }

    fn handle_new(&self, event: &ConntrackEvent) {
        let mut entry = ConntrackEntry::from_event(event);

        if let Some(session) = self.sessions.find(event.conntrack_id) {
            if *session.client_side_tuple() == event.original {
                session.set_conntrack_confirmed(true);
                entry.conntrack_confirmed = true;
                entry.session = Some(Arc::downgrade(&session));
            } else {
                // The session seated under this ctid belongs to a
                // different flow. It may still be the valid one; leave it
                // alone and keep the record unlinked.
                tracing::debug!(
                    ctid = event.conntrack_id,
                    event_tuple = %event.original,
                    session_tuple = %session.client_side_tuple(),
                    "conntrack NEW does not match seated session, not linking"
                );
            }
        }

        self.conntracks.insert(event.conntrack_id, entry);
    }

    fn handle_update(&self, event: &ConntrackEvent) {
        let known = self.conntracks.with_entry(event.conntrack_id, |entry| {
            entry.refresh(event);
        });
        if !known {
            tracing::debug!(ctid = event.conntrack_id, "conntrack UPDATE for unknown ctid");
        }

        // No session state changes on UPDATE beyond activity.
        if let Some(session) = self.sessions.find(event.conntrack_id) {
            session.touch();
        }
    }

    fn handle_destroy(&self, event: &ConntrackEvent) {
        let ctid = event.conntrack_id;
        self.conntracks.remove(ctid);

        if let Some(session) = self.sessions.remove(ctid) {
            tracing::debug!(
                ctid,
                session_id = session.session_id(),
                packets = session.packet_count(),
                "session removed on conntrack destroy"
            );
            self.metrics.session_removed("destroy");
            self.metrics.set_sessions_active(self.sessions.len() as u64);
        }

        self.dict.flush_session(ctid);
    }
}
