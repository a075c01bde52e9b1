//! Error types for publishing, consuming and processing messages.

use std::fmt;
use thiserror::Error;

/// Error categories decide what the consumer loop does with a failed delivery.
///
/// # Categories
///
/// - **Transient**: Temporary failure, the delivery is requeued
/// - **Permanent**: Unrecoverable, dead-lettered immediately when a dead-letter
///   policy is configured, requeued otherwise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure (network timeout, downstream unavailable)
    Transient,

    /// Permanent failure (invalid data, rejected by business rules)
    Permanent,
}

impl ErrorCategory {
    /// Whether a retry can possibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Permanent => write!(f, "permanent"),
        }
    }
}

/// Error returned by a [`Processor`](crate::Processor) callback.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Transient error (network timeout, temporary unavailability)
    #[error("{message}")]
    Transient {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Permanent error (invalid data, business rule failure)
    #[error("{message}")]
    Permanent {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Payload could not be decoded into the event type
    #[error("failed to decode message body: {0}")]
    Deserialization(#[from] serde_json::Error),
}

impl ProcessingError {
    /// Create a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transient error with a source.
    pub fn transient_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transient {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
            source: None,
        }
    }

    /// Create a permanent error with a source.
    pub fn permanent_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Permanent {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get the error category.
    ///
    /// Decode failures count as permanent: the same bytes will never decode.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProcessingError::Transient { .. } => ErrorCategory::Transient,
            ProcessingError::Permanent { .. } => ErrorCategory::Permanent,
            ProcessingError::Deserialization(_) => ErrorCategory::Permanent,
        }
    }
}

/// Failure reported by a broker backend.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Could not establish a connection
    #[error("connect failed: {0}")]
    Connect(String),

    /// The connection or channel was closed
    #[error("channel closed")]
    Closed,

    /// Publishing to a queue that was never declared
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// Queue declaration rejected
    #[error("queue declaration failed: {0}")]
    Declare(String),

    /// Publish rejected or not confirmed
    #[error("publish failed: {0}")]
    Publish(String),

    /// Subscription or delivery failure
    #[error("consume failed: {0}")]
    Consume(String),

    /// Ack or nack could not be delivered to the broker
    #[error("acknowledgement failed: {0}")]
    Acknowledge(String),
}

/// Errors surfaced by the publisher, the consumer loop and the connection manager.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The broker connection dropped; drives the reconnect loop and is never
    /// returned to publish or consume callers.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// No open channel at call time
    #[error("channel unavailable: not connected to the broker")]
    ChannelUnavailable,

    /// The broker refused or failed the send
    #[error("publish to '{queue}' failed: {source}")]
    PublishFailed {
        queue: String,
        #[source]
        source: BrokerError,
    },

    /// The processing callback failed; displays the callback's own message
    #[error(transparent)]
    ProcessingFailed(ProcessingError),

    /// The message body could not be decoded
    #[error("deserialization failed: {0}")]
    DeserializationFailed(#[source] serde_json::Error),

    /// The event could not be encoded for publishing
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Any other broker failure
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl MessagingError {
    /// Category used by the dead-letter policy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MessagingError::ProcessingFailed(e) => e.category(),
            MessagingError::DeserializationFailed(_) => ErrorCategory::Permanent,
            MessagingError::Serialization(_) => ErrorCategory::Permanent,
            _ => ErrorCategory::Transient,
        }
    }
}

impl From<ProcessingError> for MessagingError {
    fn from(err: ProcessingError) -> Self {
        match err {
            ProcessingError::Deserialization(e) => MessagingError::DeserializationFailed(e),
            other => MessagingError::ProcessingFailed(other),
        }
    }
}
