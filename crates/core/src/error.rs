//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// state-machine violations, conflicts). Infrastructure concerns belong elsewhere.
/// Callers match on the variant; the message strings are presentation-only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input, empty reference).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A state machine was asked to take an edge it does not have.
    #[error("invalid transition: {current} -> {attempted}")]
    InvalidTransition { current: String, attempted: String },

    /// An operation's precondition does not hold (e.g. finalize with zero
    /// gross sales, finishing a batch with unresolved error rows).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    /// Retryable after the caller re-reads current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Mutation attempted on an entity that has reached a terminal state
    /// (finalized stream, closed batch, shipped/deleted card, paid payout).
    #[error("already terminal: {0}")]
    AlreadyTerminal(String),

    /// The permission matrix denied the action for the caller's role.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(current: impl Into<String>, attempted: impl Into<String>) -> Self {
        Self::InvalidTransition {
            current: current.into(),
            attempted: attempted.into(),
        }
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn already_terminal(msg: impl Into<String>) -> Self {
        Self::AlreadyTerminal(msg.into())
    }

    pub fn permission_denied(action: impl Into<String>) -> Self {
        Self::PermissionDenied(action.into())
    }
}
