//! # Domain Errors
//!
//! Error types for the custody engine.
//!
//! Validation and transition errors are per-item: bulk operations report them
//! against the offending line and continue. Integrity, storage and retry
//! exhaustion errors are fatal and abort the enclosing operation.

use super::fingerprint::Fingerprint;
use super::value_objects::{LifecycleEventKind, LifecycleState, ServiceOrderRef, SessionId};
use std::fmt;
use thiserror::Error;

/// Rejected input or reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Serial is empty after trimming.
    #[error("serial number is empty")]
    EmptySerial,

    /// Serial exceeds the configured maximum length.
    #[error("serial number has {len} characters, maximum is {max}")]
    SerialTooLong {
        /// Length of the normalised serial.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Service order is not known to the directory.
    #[error("unknown service order: {0}")]
    UnknownServiceOrder(ServiceOrderRef),

    /// Scan session does not exist.
    #[error("scan session not found: {0}")]
    SessionNotFound(SessionId),

    /// Scan session was already finalized.
    #[error("scan session {0} is closed")]
    SessionClosed(SessionId),

    /// No active record for this serial on the order.
    #[error("no active record for serial {serial} on order {order}")]
    RecordNotFound {
        /// Owning order.
        order: ServiceOrderRef,
        /// Serial looked up.
        serial: String,
    },

    /// A correction would duplicate an active serial on the same order.
    #[error("serial {serial} is already active on order {order}")]
    DuplicateSerial {
        /// Owning order.
        order: ServiceOrderRef,
        /// Conflicting serial.
        serial: String,
    },

    /// Session belongs to another order or the other side of the comparison.
    #[error("scan session {session_id} cannot be used here: {reason}")]
    SessionMismatch {
        /// Offending session.
        session_id: SessionId,
        /// What did not match.
        reason: String,
    },

    /// Nothing has been reconciled for the order yet.
    #[error("order {0} has no reconciliation to acknowledge")]
    NoReconciliation(ServiceOrderRef),

    /// A state correction must move backwards.
    #[error("cannot revert from {from} to {to}: corrections only move backwards")]
    NotARegression {
        /// Current state.
        from: LifecycleState,
        /// Requested state.
        to: LifecycleState,
    },
}

/// Guard condition missing for a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Out-of-sequence transition requires an explicit override.
    OverrideRequired,
    /// Destruction requires a destruction method.
    DestructionMethodRequired,
    /// Destruction requires facility verification (or an override).
    FacilityVerificationRequired,
    /// No transition leaves a terminal state.
    NonTerminalState,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::OverrideRequired => f.write_str("override flag required"),
            Precondition::DestructionMethodRequired => f.write_str("destruction method required"),
            Precondition::FacilityVerificationRequired => {
                f.write_str("facility verification required")
            }
            Precondition::NonTerminalState => f.write_str("record is in a terminal state"),
        }
    }
}

/// Storage port errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Key already exists, or the stored version moved on.
    #[error("write conflict on {key}")]
    Conflict {
        /// Conflicting key.
        key: String,
    },

    /// Key not found.
    #[error("not found: {key}")]
    NotFound {
        /// Missing key.
        key: String,
    },

    /// I/O failure.
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Encoding/decoding failure.
    #[error("storage serialization error: {0}")]
    Serialization(String),
}

/// Custody engine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CustodyError {
    /// Rejected input.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Lifecycle guard violation.
    #[error("invalid transition from {from} on {event}: {missing}")]
    InvalidTransition {
        /// State at the time of the attempt.
        from: LifecycleState,
        /// Attempted event.
        event: LifecycleEventKind,
        /// Guard condition that was not met.
        missing: Precondition,
    },

    /// Reconciliation attempted with an open session.
    #[error("scan session {session_id} is not finalized")]
    SessionNotFinalized {
        /// Open session.
        session_id: SessionId,
    },

    /// Stored fingerprint disagrees with the current serial.
    #[error("integrity mismatch for serial {serial}: stored {stored}, computed {computed}")]
    IntegrityMismatch {
        /// Serial as stored.
        serial: String,
        /// Fingerprint as stored.
        stored: Fingerprint,
        /// Fingerprint recomputed from the serial.
        computed: Fingerprint,
    },

    /// Destruction blocked until discrepancies are acknowledged.
    #[error("order {order} has unacknowledged reconciliation discrepancies")]
    DiscrepancyUnacknowledged {
        /// Blocked order.
        order: ServiceOrderRef,
    },

    /// Concurrent writers kept winning the compare-and-swap.
    #[error("write conflict on {order}/{serial} persisted after {attempts} attempts")]
    ConflictRetriesExhausted {
        /// Owning order.
        order: ServiceOrderRef,
        /// Contended serial.
        serial: String,
        /// Attempts made.
        attempts: u32,
    },

    /// Storage adapter failure.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl CustodyError {
    /// Fatal errors abort the enclosing operation instead of being reported per item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CustodyError::IntegrityMismatch { .. }
                | CustodyError::ConflictRetriesExhausted { .. }
                | CustodyError::Storage(_)
        )
    }
}

/// Result alias for engine operations.
pub type CustodyResult<T> = Result<T, CustodyError>;
