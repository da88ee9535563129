use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("subscription already registered: {0}")]
    DuplicateSubscription(String),

    #[error("invalid value literal: {0}")]
    InvalidValue(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}
