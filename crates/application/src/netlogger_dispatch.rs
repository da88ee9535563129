//! NFLOG sampling fan-in.
//!
//! Out-of-band packet logging records from kernel NFLOG targets, handed
//! to subscribers in registration order. Independent of the session
//! table.

use std::sync::Arc;

use domain::event::NetloggerEvent;
use domain::plugin::registry::SubscriptionRegistry;
use ports::secondary::metrics_port::MetricsPort;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct NetloggerDispatcher {
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<dyn MetricsPort>,
}

impl NetloggerDispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>, metrics: Arc<dyn MetricsPort>) -> Self {
        Self { registry, metrics }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<NetloggerEvent>, cancel: CancellationToken) {
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
                        None => break,
                    }
                }
            }
        }

        tracing::info!(total_events = count, "netlogger dispatcher stopped");
    }

    pub async fn handle_event(&self, event: NetloggerEvent) {
        self.metrics.record_netlogger_event();
        tracing::debug!(
            prefix = %event.prefix,
            tuple = %event.tuple,
            interface = event.interface_id,
            "netlogger event"
        );

        for sub in self.registry.netlogger_snapshot() {
            sub.subscriber.handle(&event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use domain::common::entity::{Protocol, Tuple};
    use domain::plugin::entity::{BoxFuture, NetloggerSubscriber};
    use ports::test_utils::NoopMetrics;

    fn event(prefix: &str) -> NetloggerEvent {
        NetloggerEvent {
            tuple: Tuple {
                protocol: Protocol::Udp,
                client_address: "10.0.0.5".parse().unwrap(),
                client_port: 5000,
                server_address: "8.8.8.8".parse().unwrap(),
                server_port: 53,
            },
            prefix: prefix.to_owned(),
            mark: 0,
            interface_id: 2,
            payload_prefix: vec![1, 2, 3],
        }
    }

    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        tag: &'static str,
    }

    impl NetloggerSubscriber for Recorder {
        fn name(&self) -> &str {
            self.tag
        }

        fn handle<'a>(&'a self, event: &'a NetloggerEvent) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.seen
                    .lock()
                    .unwrap()
                    .push(format!("{}:{}", self.tag, event.prefix));
            })
        }
    }

    #[tokio::test]
    async fn subscribers_called_in_registration_order() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            registry
                .insert_netlogger_subscription(
                    tag,
                    Arc::new(Recorder {
                        seen: Arc::clone(&seen),
                        tag,
                    }),
                )
                .unwrap();
        }

        let dispatcher = NetloggerDispatcher::new(registry, Arc::new(NoopMetrics));
        dispatcher.handle_event(event("blocked")).await;

        assert_eq!(
            seen.lock().unwrap().clone(),
            vec!["first:blocked", "second:blocked"]
        );
    }

    #[tokio::test]
    async fn no_subscribers_is_a_no_op() {
        let dispatcher =
            NetloggerDispatcher::new(Arc::new(SubscriptionRegistry::new()), Arc::new(NoopMetrics));
        dispatcher.handle_event(event("unwatched")).await;
    }

    #[tokio::test]
    async fn run_exits_on_channel_close() {
        let dispatcher =
            NetloggerDispatcher::new(Arc::new(SubscriptionRegistry::new()), Arc::new(NoopMetrics));
        let (tx, rx) = mpsc::channel::<NetloggerEvent>(4);
        drop(tx);
        dispatcher.run(rx, CancellationToken::new()).await;
    }
}
