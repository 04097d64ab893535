//! Error types for dbplane
//!
//! Errors carry the identity of the object or component they concern so that
//! a failed reconciliation pass can be traced back from a single log line.
//! The variants fall into four handling classes:
//!
//! - transient (conflict, not-found race, timeout, transport): requeue soon
//! - delayed requeue: the pass is not wrong, only not finished yet
//! - permanent user error (validation): surfaced through status, retried slowly
//! - fatal (invariant violation): the in-memory model is corrupt, abort loudly

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for dbplane operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that did not map onto a more specific variant
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The object does not exist in the store
    #[error("{kind} {key} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// namespace/name of the missing object
        key: String,
    },

    /// A create raced with another writer that created the same object
    #[error("{kind} {key} already exists")]
    AlreadyExists {
        /// Kind of the object
        kind: String,
        /// namespace/name of the object
        key: String,
    },

    /// Optimistic-concurrency conflict on a write
    #[error("conflict writing {kind} {key}: resource version is stale")]
    Conflict {
        /// Kind of the object
        kind: String,
        /// namespace/name of the object
        key: String,
    },

    /// The desired spec is malformed and needs a user fix
    #[error("validation error for {component}: {message}")]
    Validation {
        /// Name of the component with invalid configuration
        component: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.roles")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// The mutation graph rejected an operation (cycle, conflicting merge)
    #[error("graph error: {message}")]
    Graph {
        /// Description of what failed
        message: String,
    },

    /// The reconciliation model reached a state that cannot happen
    #[error("invariant violation [{context}]: {message}")]
    InvariantViolation {
        /// Where the violation was detected
        context: String,
        /// Description of the impossible state
        message: String,
    },

    /// The pass is incomplete and should be retried after a delay
    #[error("requeue after {after:?}: {reason}")]
    DelayedRequeue {
        /// How long to wait before the next pass
        after: Duration,
        /// What the pass is waiting on
        reason: String,
    },

    /// A pass exceeded its deadline
    #[error("timeout [{context}] after {after:?}")]
    Timeout {
        /// What timed out
        context: String,
        /// The deadline that was exceeded
        after: Duration,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "executor", "controller")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for the given kind and key
    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Create an already-exists error for the given kind and key
    pub fn already_exists(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Create a conflict error for the given kind and key
    pub fn conflict(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            component: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with component context
    pub fn validation_for(component: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            component: component.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with component context and field path
    pub fn validation_for_field(
        component: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            component: component.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a graph error
    pub fn graph(msg: impl Into<String>) -> Self {
        Self::Graph {
            message: msg.into(),
        }
    }

    /// Create an invariant violation
    pub fn invariant(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvariantViolation {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a delayed-requeue signal
    pub fn delayed_requeue(after: Duration, reason: impl Into<String>) -> Self {
        Self::DelayedRequeue {
            after,
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(context: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            context: context.into(),
            after,
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is transient and the pass should be retried soon
    ///
    /// Validation and serialization errors need a user fix. Invariant
    /// violations mean the model is corrupt and retrying quickly only
    /// repeats the failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::NotFound { .. } => true,
            Error::AlreadyExists { .. } => true,
            Error::Conflict { .. } => true,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Graph { .. } => false,
            Error::InvariantViolation { .. } => false,
            Error::DelayedRequeue { .. } => true,
            Error::Timeout { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// True for a not-found error
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// True for an already-exists error
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::AlreadyExists { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409 && ae.reason == "AlreadyExists",
            _ => false,
        }
    }

    /// True for an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409 && ae.reason != "AlreadyExists",
            _ => false,
        }
    }

    /// True for a delayed-requeue signal
    pub fn is_delayed_requeue(&self) -> bool {
        matches!(self, Error::DelayedRequeue { .. })
    }

    /// True when the in-memory model is corrupt
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InvariantViolation { .. } | Error::Graph { .. })
    }

    /// The requested delay if this is a delayed-requeue signal
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Error::DelayedRequeue { after, .. } => Some(*after),
            _ => None,
        }
    }

    /// Get the component name if this error is associated with one
    pub fn component(&self) -> Option<&str> {
        match self {
            Error::Validation { component, .. } => Some(component),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::InvariantViolation { context, .. } => Some(context),
            Error::Timeout { context, .. } => Some(context),
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
