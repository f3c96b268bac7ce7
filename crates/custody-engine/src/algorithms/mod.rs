//! # Algorithms Module
//!
//! Pure computations over domain entities: serial normalisation, scan
//! reconciliation, billing quantity and certificate lines.

pub mod billing;
pub mod certificate;
pub mod normalize;
pub mod reconciliation;

pub use billing::{BillingQuantity, BillingQuantityResolver, QuantitySource};
pub use certificate::CertificateLineComposer;
pub use normalize::{normalize_serial, split_bulk, BulkLine};
pub use reconciliation::{
    Acknowledgement, DiscrepancyKind, DiscrepancyWarning, DuplicateSighting, NoteConflict,
    ReconciledSerial, ReconciliationEngine, ReconciliationOutcome, ReconciliationReport,
    SerialCorrections, Severity,
};
