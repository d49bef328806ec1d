//! Domain error taxonomy.
//!
//! Collaborators (stores, providers) return [`anyhow::Result`]; services
//! translate those failures into [`Error`] at their boundary so callers can
//! branch on the kind. The HTTP layer maps each variant to a status code.
//!
//! | Variant | Meaning |
//! |---------|---------|
//! | `Validation` | Bad caller input; never retried |
//! | `NotFound` | Unknown id for the given entity kind |
//! | `NotReady` | Entity exists but is not in a usable state yet |
//! | `Transient` | Upstream or adapter failure; retrying may help |
//! | `PartialDeletion` | Delete left blob and/or vectors behind |
//! | `InvalidTransition` | Illegal `vector_status` move |
//! | `Storage` | Persistence failure |

use thiserror::Error;

use crate::models::{DeletionResidue, VectorStatus};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{id} is not ready (status: {status})")]
    NotReady { id: String, status: String },

    /// The underlying cause is logged where the error is built and not
    /// carried in the message.
    #[error("{operation} is temporarily unavailable")]
    Transient { operation: String },

    #[error("document {id} was only partially deleted ({residue} remaining)")]
    PartialDeletion { id: String, residue: DeletionResidue },

    #[error("document {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: VectorStatus,
        to: VectorStatus,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Wrap an adapter failure, logging the full chain.
    pub fn transient(operation: impl Into<String>, err: anyhow::Error) -> Self {
        let operation = operation.into();
        tracing::warn!(operation = %operation, error = %format!("{err:#}"), "adapter call failed");
        Self::Transient { operation }
    }

    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }

    /// Whether a retry loop should try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Stable machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_request",
            Self::NotFound { .. } => "not_found",
            Self::NotReady { .. } => "not_ready",
            Self::Transient { .. } => "unavailable",
            Self::PartialDeletion { .. } => "partial_deletion",
            Self::InvalidTransition { .. } => "conflict",
            Self::Storage(_) => "internal",
        }
    }
}
