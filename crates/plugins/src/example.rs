//! Reference plugin exercising the whole subscription contract: packet
//! handling, an attachment, session release, and the conntrack and
//! netlogger hooks. Real analysis plugins live outside this repository;
//! this one exists so the pipeline is never wired up untested.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use domain::common::error::DomainError;
use domain::event::{ConntrackEvent, NetloggerEvent, PacketMessage};
use domain::plugin::entity::{
    BoxFuture, ConntrackSubscriber, NetloggerSubscriber, NfqueuePlugin, PluginPriority,
    PluginVerdict,
};
use domain::plugin::registry::SubscriptionRegistry;

const ATTACHMENT_KEY: &str = "example.packets_seen";

pub struct ExamplePlugin {
    /// Release the session once it has carried this many packets.
    release_after_packets: u64,
}

impl ExamplePlugin {
    pub const NAME: &'static str = "example";

    pub fn new(release_after_packets: u64) -> Self {
        Self {
            release_after_packets,
        }
    }

    /// Register all three hooks under the plugin's name.
    pub fn register(
        plugin: Arc<Self>,
        registry: &SubscriptionRegistry,
    ) -> Result<(), DomainError> {
        registry.insert_nfqueue_subscription(
            Self::NAME,
            PluginPriority::Example,
            Arc::clone(&plugin) as Arc<dyn NfqueuePlugin>,
        )?;
        registry.insert_conntrack_subscription(
            Self::NAME,
            Arc::clone(&plugin) as Arc<dyn ConntrackSubscriber>,
        )?;
        registry
            .insert_netlogger_subscription(Self::NAME, plugin as Arc<dyn NetloggerSubscriber>)?;
        Ok(())
    }

    /// Packets this plugin has seen for the session, kept as an
    /// attachment so the count survives between invocations.
    fn seen_counter(message: &PacketMessage) -> Arc<AtomicU64> {
        if let Some(existing) = message.session.attachment(ATTACHMENT_KEY) {
            if let Ok(counter) = existing.downcast::<AtomicU64>() {
                return counter;
            }
        }
        let counter = Arc::new(AtomicU64::new(0));
        message.session.set_attachment(
            ATTACHMENT_KEY,
            Arc::clone(&counter) as Arc<dyn std::any::Any + Send + Sync>,
        );
        counter
    }
}

impl NfqueuePlugin for ExamplePlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn handle<'a>(
        &'a self,
        message: Arc<PacketMessage>,
        ctid: u32,
        new_session: bool,
    ) -> BoxFuture<'a, PluginVerdict> {
        Box::pin(async move {
            let seen = Self::seen_counter(&message).fetch_add(1, Ordering::Relaxed) + 1;

            tracing::debug!(
                ctid,
                new_session,
                seen,
                length = message.length,
                client_to_server = message.client_to_server,
                tuple = %message.tuple,
                "example plugin packet"
            );

            if message.session.packet_count() >= self.release_after_packets {
                tracing::debug!(ctid, "example plugin releasing session");
                PluginVerdict::release()
            } else {
                PluginVerdict::keep()
            }
        })
    }
}

impl ConntrackSubscriber for ExamplePlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn handle<'a>(&'a self, event: &'a ConntrackEvent) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tracing::trace!(
                ctid = event.conntrack_id,
                kind = event.kind.as_str(),
                tuple = %event.original,
                "example plugin conntrack event"
            );
        })
    }
}

impl NetloggerSubscriber for ExamplePlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn handle<'a>(&'a self, event: &'a NetloggerEvent) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tracing::debug!(
                prefix = %event.prefix,
                tuple = %event.tuple,
                "example plugin netlogger event"
            );
        })
    }
}
