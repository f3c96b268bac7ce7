//! # Outbound Ports (Driven Ports)
//!
//! Persistence and clock interfaces the custody service depends on.
//!
//! Writes are compare-and-swap: every stored record and session carries a
//! `version`, updates name the version they were read at, and the store
//! rejects stale writes with [`StoreError::Conflict`]. The service retries on
//! conflict by re-reading and re-applying.
//!
//! Testing/embedded: `InMemoryCustodyStore` (adapters/memory.rs)

use crate::algorithms::{Acknowledgement, ReconciliationOutcome};
use crate::domain::{
    Fingerprint, ScanEntry, ScanSession, SerialRecord, ServiceOrder, ServiceOrderRef, SessionId,
    StoreError, Timestamp,
};

/// Serial records keyed by `(service_order_ref, fingerprint)`.
///
/// Only non-cancelled records occupy the key space; cancelled records are
/// retained separately for audit.
pub trait SerialRecordStore: Send + Sync {
    /// Active record for a serial on an order.
    fn get_record(
        &self,
        order: &ServiceOrderRef,
        fingerprint: &Fingerprint,
    ) -> Result<Option<SerialRecord>, StoreError>;

    /// Insert a new record.
    ///
    /// Fails with `Conflict` if an active record already holds the key.
    fn insert_record(&self, record: SerialRecord) -> Result<SerialRecord, StoreError>;

    /// Replace an active record if it is still at `expected_version`.
    ///
    /// The stored copy gets `expected_version + 1`, which is also returned.
    fn update_record(
        &self,
        record: SerialRecord,
        expected_version: u64,
    ) -> Result<SerialRecord, StoreError>;

    /// Move an active record to a new key after a serial correction.
    ///
    /// Fails with `Conflict` if the new key is taken or the version moved on.
    fn rekey_record(
        &self,
        previous: &Fingerprint,
        record: SerialRecord,
        expected_version: u64,
    ) -> Result<SerialRecord, StoreError>;

    /// Move an active record out of the key space into the cancelled set.
    fn retire_record(
        &self,
        record: SerialRecord,
        expected_version: u64,
    ) -> Result<SerialRecord, StoreError>;

    /// Active records of an order.
    fn records_for_order(&self, order: &ServiceOrderRef) -> Result<Vec<SerialRecord>, StoreError>;

    /// Cancelled records of an order.
    fn cancelled_records_for_order(
        &self,
        order: &ServiceOrderRef,
    ) -> Result<Vec<SerialRecord>, StoreError>;

    /// Orders holding an active record with this fingerprint.
    fn orders_with_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<ServiceOrderRef>, StoreError>;
}

/// Result of [`ScanSessionStore::append_entry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionAppend {
    /// Entry stored; the session is now at `version`.
    Appended {
        /// The entry's serial was already in the session.
        repeat: bool,
        /// Session version after the append.
        version: u64,
    },
    /// The session was finalized; nothing was written.
    Closed,
}

/// Scan sessions keyed by id.
pub trait ScanSessionStore: Send + Sync {
    /// Store a new session.
    fn insert_session(&self, session: ScanSession) -> Result<ScanSession, StoreError>;

    /// Session by id.
    fn get_session(&self, id: &SessionId) -> Result<Option<ScanSession>, StoreError>;

    /// Replace a session if it is still at `expected_version`.
    fn update_session(
        &self,
        session: ScanSession,
        expected_version: u64,
    ) -> Result<ScanSession, StoreError>;

    /// Append one entry to an open session as a single atomic step.
    ///
    /// Whether the serial is a repeat is decided against the stored entries,
    /// so of several concurrent appends of one serial exactly one sees
    /// `repeat: false`. Fails with `NotFound` for an unknown id.
    fn append_entry(&self, id: &SessionId, entry: ScanEntry) -> Result<SessionAppend, StoreError>;

    /// Sessions of an order, oldest first.
    fn sessions_for_order(&self, order: &ServiceOrderRef) -> Result<Vec<ScanSession>, StoreError>;
}

/// Reconciliation results per order.
pub trait ReconciliationLedger: Send + Sync {
    /// Append an outcome; it becomes the latest for its order.
    fn save_outcome(&self, outcome: ReconciliationOutcome) -> Result<(), StoreError>;

    /// Most recent outcome for an order.
    fn latest_outcome(
        &self,
        order: &ServiceOrderRef,
    ) -> Result<Option<ReconciliationOutcome>, StoreError>;

    /// Attach an acknowledgement to the latest outcome.
    ///
    /// Fails with `Conflict` if the latest outcome's digest differs from the
    /// acknowledged one (a newer run replaced it).
    fn acknowledge_latest(
        &self,
        order: &ServiceOrderRef,
        acknowledgement: Acknowledgement,
    ) -> Result<ReconciliationOutcome, StoreError>;
}

/// Read access to service orders owned by the surrounding workflow.
pub trait ServiceOrderDirectory: Send + Sync {
    /// Order by reference.
    fn find_order(&self, reference: &ServiceOrderRef) -> Result<Option<ServiceOrder>, StoreError>;
}

/// Abstract interface for time operations (for testability).
pub trait TimeSource: Send + Sync {
    /// Current timestamp in seconds since epoch.
    fn now(&self) -> Timestamp;
}

/// Everything the service persists through.
pub trait CustodyStore:
    SerialRecordStore + ScanSessionStore + ReconciliationLedger + ServiceOrderDirectory
{
}

impl<T> CustodyStore for T where
    T: SerialRecordStore + ScanSessionStore + ReconciliationLedger + ServiceOrderDirectory
{
}
