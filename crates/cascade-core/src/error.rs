//! Error types for Cascade

use thiserror::Error;

/// Core Cascade errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CascadeError {
    // Decision errors
    #[error("Reduction over an empty value set")]
    EmptyInput,

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Unknown decision function: {0}")]
    UnknownDecision(String),

    #[error("Decision function panicked")]
    DecisionPanicked,

    // Scheduling errors
    #[error("Source interval must be non-zero")]
    InvalidInterval,

    #[error("No async runtime available to schedule the source task")]
    RuntimeUnavailable,

    // Delivery errors
    #[error("Subscriber failed: {0}")]
    SubscriberFailed(String),

    #[error("Subscriber panicked")]
    SubscriberPanicked,

    #[error("Report sink failed: {0}")]
    Sink(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CascadeError {
    /// Shorthand for a subscriber-side failure
    pub fn subscriber(reason: impl Into<String>) -> Self {
        CascadeError::SubscriberFailed(reason.into())
    }
}

/// Result type for Cascade operations
pub type CascadeResult<T> = Result<T, CascadeError>;
