//! # Custody Engine
//!
//! Chain-of-custody core for serialized assets (drives and similar media):
//! scan ingestion at the customer site and at the destruction facility,
//! reconciliation of the two, a one-way lifecycle per asset, and the
//! billing quantity and certificate lines derived from settled state.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Lifecycle
//!
//! ```text
//! Registered ──→ CustomerScanned ──→ FacilityVerified ──→ Destroyed
//! ```
//!
//! ## Guarantees
//!
//! - **Fingerprint consistency**: the stored SHA-256 fingerprint always
//!   matches the serial, and a mismatch fails closed.
//! - **One record per serial**: `(order, serial)` is unique among active
//!   records, enforced by compare-and-swap.
//! - **Forward-only lifecycle**: regressions only through audited corrections.
//! - **Verified destruction**: no destruction without facility verification,
//!   unless overridden and audited.
//! - **Deterministic reconciliation**: same finalized sessions, same
//!   classification.
//!
//! ## Crate Structure
//!
//! - `domain/` - Entities, value objects, state machine, fingerprint, errors, config
//! - `algorithms/` - Normalisation, reconciliation, billing quantity, certificate lines
//! - `ports/` - Inbound APIs and outbound persistence/clock traits
//! - `adapters/` - In-memory store with JSON snapshots, clocks
//! - `service/` - `CustodyService` implementing the inbound APIs
//!
//! ## Usage
//!
//! ```ignore
//! use custody_engine::*;
//!
//! let service = CustodyService::in_memory(CustodyConfig::from_env());
//! service.store().register_order(ServiceOrder::new("SO-1", 0, rate));
//!
//! let order = ServiceOrderRef::new("SO-1");
//! let operator = OperatorId::new("ana");
//! let session = service.open_session(&order, LocationType::Customer, operator, "", false)?;
//! service.submit_bulk(&session.id, "WD-1\nWD-2, dented")?;
//! service.finalize(&session.id)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod domain;
pub mod ports;
pub mod service;

// Re-export key types for convenience
pub use adapters::{CustodySnapshot, InMemoryCustodyStore, ManualTimeSource, SystemTimeSource};
pub use algorithms::{
    normalize_serial, split_bulk, Acknowledgement, BillingQuantity, BillingQuantityResolver,
    BulkLine, CertificateLineComposer, DiscrepancyKind, DiscrepancyWarning, DuplicateSighting,
    NoteConflict, QuantitySource, ReconciledSerial, ReconciliationEngine, ReconciliationOutcome,
    ReconciliationReport, SerialCorrections, Severity,
};
pub use domain::{
    Actor, AuditAction, AuditEntry, ConfigError, CustodyConfig, CustodyError, CustodyResult,
    CustomerScan, Destruction, DestructionMethod, EventContext, FacilityScan, Fingerprint,
    IngestionConfig, IntegrityHasher, LifecycleEvent, LifecycleEventKind, LifecycleState,
    LifecycleStateMachine, LocationType, OperatorId, Override, Precondition, ScanEntry,
    ScanSession, SerialCase, SerialRecord, ServiceOrder, ServiceOrderRef, SessionId, StoreError,
    Timestamp, Transition, TransitionKind, ValidationError,
};
pub use ports::inbound::{
    CrossOrderCollision, DestructionLine, LifecycleApi, LineOutcome, LineResult, OrderSummary,
    ReconciliationApi, ReportingApi, ScanIngestionApi, SingleSubmission,
};
pub use ports::outbound::{
    CustodyStore, ReconciliationLedger, ScanSessionStore, SerialRecordStore,
    ServiceOrderDirectory, SessionAppend, TimeSource,
};
pub use service::{CustodyDependencies, CustodyService};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
