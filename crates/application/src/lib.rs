#![forbid(unsafe_code)]

pub mod conntrack_dispatch;
pub mod netlogger_dispatch;
pub mod nfqueue_dispatch;
pub mod reaper;
