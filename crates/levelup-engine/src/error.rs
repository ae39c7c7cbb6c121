//! Error types for the engine service binary.
//!
//! [`ServiceError`] wraps every failure that can stop the service during
//! startup or while the NATS bridge is running.

/// Top-level error for the engine service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: levelup_core::ConfigError,
    },

    /// The level curve in the configuration is unusable.
    #[error("curve error: {source}")]
    Curve {
        /// The underlying curve error.
        #[from]
        source: levelup_core::CurveError,
    },

    /// The progress store could not be opened.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: levelup_store::StoreError,
    },

    /// NATS connection or subscription failed.
    #[error("NATS error: {message}")]
    Nats {
        /// Description of the NATS failure.
        message: String,
    },
}
