#![forbid(unsafe_code)]

pub mod example;
