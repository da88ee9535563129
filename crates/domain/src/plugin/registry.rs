use std::sync::Arc;

use parking_lot::RwLock;

use super::entity::{
    ConntrackSubscriber, ConntrackSubscription, NetloggerSubscriber, NetloggerSubscription,
    NfqueuePlugin, NfqueueSubscription, PluginPriority,
};
use crate::common::error::DomainError;

/// Process-wide registry of plugin subscriptions.
///
/// Plugins register once at startup; each new session snapshots the
/// nfqueue set into its own live set. Conntrack and netlogger subscribers
/// are global and invoked per event, not per session.
#[derive(Default)]
pub struct SubscriptionRegistry {
    nfqueue: RwLock<Vec<NfqueueSubscription>>,
    conntrack: RwLock<Vec<ConntrackSubscription>>,
    netlogger: RwLock<Vec<NetloggerSubscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_nfqueue_subscription(
        &self,
        owner: impl Into<String>,
        priority: PluginPriority,
        handler: Arc<dyn NfqueuePlugin>,
    ) -> Result<(), DomainError> {
        let owner = owner.into();
        let mut subs = self.nfqueue.write();
        if subs.iter().any(|s| s.owner == owner) {
            return Err(DomainError::DuplicateSubscription(owner));
        }
        tracing::debug!(plugin = %owner, priority = %priority, "nfqueue subscription registered");
        subs.push(NfqueueSubscription {
            owner,
            priority,
            handler,
        });
        Ok(())
    }

    pub fn insert_conntrack_subscription(
        &self,
        owner: impl Into<String>,
        subscriber: Arc<dyn ConntrackSubscriber>,
    ) -> Result<(), DomainError> {
        let owner = owner.into();
        let mut subs = self.conntrack.write();
        if subs.iter().any(|s| s.owner == owner) {
            return Err(DomainError::DuplicateSubscription(owner));
        }
        subs.push(ConntrackSubscription { owner, subscriber });
        Ok(())
    }

    pub fn insert_netlogger_subscription(
        &self,
        owner: impl Into<String>,
        subscriber: Arc<dyn NetloggerSubscriber>,
    ) -> Result<(), DomainError> {
        let owner = owner.into();
        let mut subs = self.netlogger.write();
        if subs.iter().any(|s| s.owner == owner) {
            return Err(DomainError::DuplicateSubscription(owner));
        }
        subs.push(NetloggerSubscription { owner, subscriber });
        Ok(())
    }

    /// Copy of the nfqueue subscription set, for seeding a new session.
    pub fn nfqueue_snapshot(&self) -> Vec<NfqueueSubscription> {
        self.nfqueue.read().clone()
    }

    pub fn conntrack_snapshot(&self) -> Vec<ConntrackSubscription> {
        self.conntrack.read().clone()
    }

    pub fn netlogger_snapshot(&self) -> Vec<NetloggerSubscription> {
        self.netlogger.read().clone()
    }

    pub fn nfqueue_count(&self) -> usize {
        self.nfqueue.read().len()
    }
}
