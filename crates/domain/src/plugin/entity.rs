use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::event::{ConntrackEvent, NetloggerEvent, PacketMessage};

/// Boxed future used by the plugin traits so they stay dyn-compatible
/// (`Arc<dyn NfqueuePlugin>` etc.).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Closed, ordered set of nfqueue pipeline priorities.
///
/// Lower runs first. Plugins at the same priority run concurrently; the
/// dispatcher joins a whole tier before advancing to the next.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PluginPriority {
    Geoip,
    Certfetch,
    Certsniff,
    Dns,
    Sni,
    Classify,
    Stats,
    Reporter,
    Revdns,
    Predicttraffic,
    Example,
}

impl PluginPriority {
    pub const ALL: [Self; 11] = [
        Self::Geoip,
        Self::Certfetch,
        Self::Certsniff,
        Self::Dns,
        Self::Sni,
        Self::Classify,
        Self::Stats,
        Self::Reporter,
        Self::Revdns,
        Self::Predicttraffic,
        Self::Example,
    ];

    /// Numeric tier; the dispatcher walks tiers from zero upward.
    pub fn tier(self) -> u32 {
        self as u32
    }

    pub fn from_tier(tier: u32) -> Option<Self> {
        Self::ALL.get(tier as usize).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Geoip => "geoip",
            Self::Certfetch => "certfetch",
            Self::Certsniff => "certsniff",
            Self::Dns => "dns",
            Self::Sni => "sni",
            Self::Classify => "classify",
            Self::Stats => "stats",
            Self::Reporter => "reporter",
            Self::Revdns => "revdns",
            Self::Predicttraffic => "predicttraffic",
            Self::Example => "example",
        }
    }
}

impl fmt::Display for PluginPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one nfqueue handler invocation.
///
/// Setting `session_release` opts the plugin out of all future packets of
/// the flow; it is the sole channel by which a handler influences bypass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PluginVerdict {
    pub session_release: bool,
}

impl PluginVerdict {
    pub fn keep() -> Self {
        Self {
            session_release: false,
        }
    }

    pub fn release() -> Self {
        Self {
            session_release: true,
        }
    }
}

/// Per-packet handler of an analysis plugin.
///
/// Handlers may block on lookups or writes; the dispatcher bounds each
/// call with a watchdog and treats overruns as a release.
pub trait NfqueuePlugin: Send + Sync {
    fn name(&self) -> &str;

    fn handle<'a>(
        &'a self,
        message: Arc<PacketMessage>,
        ctid: u32,
        new_session: bool,
    ) -> BoxFuture<'a, PluginVerdict>;
}

/// Conntrack lifecycle subscriber. Invoked sequentially; keep it short.
pub trait ConntrackSubscriber: Send + Sync {
    fn name(&self) -> &str;

    fn handle<'a>(&'a self, event: &'a ConntrackEvent) -> BoxFuture<'a, ()>;
}

/// NFLOG sampling subscriber. Invoked sequentially.
pub trait NetloggerSubscriber: Send + Sync {
    fn name(&self) -> &str;

    fn handle<'a>(&'a self, event: &'a NetloggerEvent) -> BoxFuture<'a, ()>;
}

#[derive(Clone)]
pub struct NfqueueSubscription {
    pub owner: String,
    pub priority: PluginPriority,
    pub handler: Arc<dyn NfqueuePlugin>,
}

impl fmt::Debug for NfqueueSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NfqueueSubscription")
            .field("owner", &self.owner)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ConntrackSubscription {
    pub owner: String,
    pub subscriber: Arc<dyn ConntrackSubscriber>,
}

#[derive(Clone)]
pub struct NetloggerSubscription {
    pub owner: String,
    pub subscriber: Arc<dyn NetloggerSubscriber>,
}
