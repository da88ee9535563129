#![forbid(unsafe_code)]

pub mod common;
pub mod conntrack;
pub mod dict;
pub mod event;
pub mod packet;
pub mod plugin;
pub mod session;
