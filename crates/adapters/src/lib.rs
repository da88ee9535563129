#![deny(unsafe_code)]

pub mod dictd;
pub mod http;
pub mod netlink;
