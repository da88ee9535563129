use std::time::Duration;

// ── Defaults ───────────────────────────────────────────────────────

pub const DEFAULT_CONFIG_PATH: &str = "/etc/flowsentry/config.yaml";
pub const DEFAULT_HTTP_PORT: u16 = 8485;
pub const DEFAULT_DICT_SOCKET_PATH: &str = "/run/flowsentry/dict.sock";

/// Sessions idle past this are evicted by the reaper.
pub const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Reaper sweep period.
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60);

// ── Channel capacities ─────────────────────────────────────────────

pub const CONNTRACK_CHANNEL_CAPACITY: usize = 4096;
pub const NETLOGGER_CHANNEL_CAPACITY: usize = 1024;

// ── Timeouts ───────────────────────────────────────────────────────

pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_capacities_are_positive() {
        assert!(CONNTRACK_CHANNEL_CAPACITY > 0);
        assert!(NETLOGGER_CHANNEL_CAPACITY > 0);
    }

    #[test]
    fn reaper_interval_shorter_than_idle_timeout() {
        assert!(DEFAULT_REAPER_INTERVAL < DEFAULT_SESSION_IDLE_TIMEOUT);
    }

    #[test]
    fn shutdown_timeout_is_reasonable() {
        assert!(GRACEFUL_SHUTDOWN_TIMEOUT.as_secs() >= 1);
        assert!(GRACEFUL_SHUTDOWN_TIMEOUT.as_secs() <= 30);
    }
}
