mod context;
mod exit_codes;
mod format;

pub use context::ErrorContext;
pub use exit_codes::get_exit_code;
pub use format::{format_error_chain, format_error_with_color};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplicaLockError {
    #[error("Invalid time unit '{0}': TimeUnit can only be \"s\" or \"ms\"")]
    InvalidTimeUnit(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unsupported store URL '{0}'")]
    UnsupportedStoreUrl(String),

    #[error("Malformed holder token '{0}'")]
    InvalidHolderToken(String),

    #[error("Store operation '{operation}' failed: {details}")]
    Store {
        operation: &'static str,
        details: String,
    },

    #[error("Unexpected reply to '{operation}': {details}")]
    Protocol {
        operation: &'static str,
        details: String,
    },

    #[error("Failed to release lock '{raw_name}': {source}")]
    Release {
        raw_name: String,
        #[source]
        source: Box<ReplicaLockError>,
    },

    #[error("Lock '{raw_name}' was not acquired within {waited_ms}ms")]
    NotAcquired { raw_name: String, waited_ms: u128 },

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ReplicaLockError {
    pub(crate) fn protocol(operation: &'static str, details: impl Into<String>) -> Self {
        Self::Protocol {
            operation,
            details: details.into(),
        }
    }

    /// Configuration errors are raised before any store interaction.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ReplicaLockError::InvalidTimeUnit(_)
                | ReplicaLockError::InvalidConfig(_)
                | ReplicaLockError::ConfigError(_)
                | ReplicaLockError::UnsupportedStoreUrl(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ReplicaLockError>;
