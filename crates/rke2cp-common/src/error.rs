//! Error types for the RKE2 control-plane provider
//!
//! Errors are structured with fields to aid debugging in production. Failures
//! from independent operations in the same pass (for example the cleanup of
//! several child resources) are collected into an [`AggregateError`] rather
//! than dropped.

use std::fmt;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for control plane operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for CRD specs
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.infrastructureRef")
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

    /// A referenced object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// Namespaced name of the missing object
        name: String,
    },

    /// A health condition required by the preflight checks is not satisfied
    #[error("{kind} {name} {detail}")]
    ConditionCheck {
        /// Kind of object the condition was read from (e.g. "machine")
        kind: String,
        /// Name of the object
        name: String,
        /// Condition type that failed
        condition: String,
        /// What is wrong with the condition
        detail: String,
    },

    /// An invariant the controller relies on does not hold
    ///
    /// These are never retried by the controller itself: the state that
    /// produced them has to change first.
    #[error("invariant violated [{context}]: {message}")]
    Invariant {
        /// Operation that detected the violation
        context: String,
        /// Description of the violation
        message: String,
    },

    /// An underlying error with a description of what was being attempted
    #[error("{message}: {source}")]
    Wrapped {
        /// What was being attempted
        message: String,
        /// The underlying failure
        source: Box<Error>,
    },

    /// Several independent failures from the same operation
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "provisioner")
        context: String,
    },
}

impl Error {
    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
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

    /// Create a not-found error for the given object
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a condition check failure
    pub fn condition_check(
        kind: impl Into<String>,
        name: impl Into<String>,
        condition: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::ConditionCheck {
            kind: kind.into(),
            name: name.into(),
            condition: condition.into(),
            detail: detail.into(),
        }
    }

    /// Create an invariant violation
    pub fn invariant(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Invariant {
            context: context.into(),
            message: msg.into(),
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

    /// Wrap this error with a description of what was being attempted
    pub fn wrap(self, msg: impl Into<String>) -> Self {
        Self::Wrapped {
            message: msg.into(),
            source: Box::new(self),
        }
    }

    /// Collapse a list of failures into one error
    ///
    /// Returns `None` for an empty list so callers can write
    /// `if let Some(err) = Error::from_errors(errs)`.
    pub fn from_errors(errors: Vec<Error>) -> Option<Self> {
        AggregateError::from_vec(errors).map(Self::Aggregate)
    }

    /// Check if this error means the object does not exist
    ///
    /// Deletion and cleanup treat these as success.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            Error::Wrapped { source, .. } => source.is_not_found(),
            Error::Aggregate(agg) => match agg.errors() {
                [only] => only.is_not_found(),
                _ => false,
            },
            _ => false,
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, serialization and invariant errors are not retryable
    /// (they need a spec or state change). Every API server failure is:
    /// conflicts, throttling and RBAC gaps all clear up without the control
    /// plane object changing.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { .. } => true,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::NotFound { .. } => true,
            Error::ConditionCheck { .. } => true,
            Error::Invariant { .. } => false,
            Error::Wrapped { source, .. } => source.is_retryable(),
            Error::Aggregate(agg) => agg.errors().iter().all(Error::is_retryable),
            Error::Internal { .. } => true,
        }
    }
}

/// An ordered, non-empty list of failures
///
/// Renders a single failure as-is and several as `[first, second]`.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<Error>,
}

impl AggregateError {
    /// Build an aggregate, or `None` if there is nothing to report
    pub fn from_vec(errors: Vec<Error>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    /// The underlying failures in the order they happened
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Number of failures
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Always false: an aggregate is never built from an empty list
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.errors.as_slice() {
            return write!(f, "{}", only);
        }
        write!(f, "[")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", err)?;
        }
        write!(f, "]")
    }
}

impl std::error::Error for AggregateError {}
