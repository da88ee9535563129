pub mod entity;
pub mod store;

/// Principal table names. Tables are created on first write, so these are
/// conventions shared with the kernel ruleset rather than a closed set.
pub const TABLE_SESSIONS: &str = "sessions";
pub const TABLE_SESSION_TUPLE: &str = "session_tuple";
pub const TABLE_HOST: &str = "host";
pub const TABLE_USER: &str = "user";
pub const TABLE_DEVICE: &str = "device";

/// Field consulted by the kernel ruleset to stop queueing a flow.
pub const FIELD_BYPASS: &str = "bypass_packetd";
