//! # Inbound Ports (Driving Ports)
//!
//! Operations the custody core exposes to the scanning UI, the service-order
//! workflow, the certificate renderer and billing.

use crate::algorithms::{BillingQuantity, ReconciliationOutcome, ReconciliationReport};
use crate::domain::{
    Actor, CustodyError, CustodyResult, DestructionMethod, Fingerprint, LifecycleEvent,
    LifecycleState, LocationType, OperatorId, Precondition, ScanSession, SerialRecord,
    ServiceOrderRef, SessionId, Transition,
};
use std::collections::BTreeMap;

/// Result of one accepted scan.
#[derive(Clone, Debug, PartialEq)]
pub struct SingleSubmission {
    /// Record after the scan was applied.
    pub record: SerialRecord,
    /// The scan created the record.
    pub is_new: bool,
    /// The serial had already been accepted by this session; the record was
    /// not touched again.
    pub already_in_session: bool,
    /// Transition applied, if the scan went through the state machine.
    pub transition: Option<Transition>,
    /// Guard the sighting is waiting on (facility receipt without customer
    /// scan in a session that does not allow it).
    pub deferred: Option<Precondition>,
    /// Other orders with an active record for the same serial.
    pub collisions: Vec<ServiceOrderRef>,
}

impl SingleSubmission {
    /// Scan did not change anything beyond timestamps and notes.
    pub fn is_repeat(&self) -> bool {
        self.already_in_session || self.transition.is_some_and(|t| t.kind.is_noop() && !self.is_new)
    }
}

/// Outcome of one bulk line.
#[derive(Clone, Debug, PartialEq)]
pub enum LineOutcome {
    /// Applied to a record.
    Accepted {
        /// Record after the scan.
        record: SerialRecord,
        /// The line created the record.
        is_new: bool,
        /// Guard the sighting is waiting on, if any.
        deferred: Option<Precondition>,
    },
    /// Same serial earlier in this batch; skipped.
    DuplicateInBatch {
        /// Line number of the first occurrence.
        first_line: usize,
    },
    /// Serial already recorded at this location; nothing changed.
    DuplicateOfExisting {
        /// Existing record.
        record: SerialRecord,
    },
    /// Line rejected; the rest of the batch went on.
    Rejected {
        /// Why.
        reason: CustodyError,
    },
}

/// Per-line bulk result.
#[derive(Clone, Debug, PartialEq)]
pub struct LineResult {
    /// 1-based line number in the submitted text.
    pub line_no: usize,
    /// Line as submitted.
    pub raw: String,
    /// What happened to it.
    pub outcome: LineOutcome,
}

/// Per-record result of destroying a whole order.
#[derive(Clone, Debug, PartialEq)]
pub struct DestructionLine {
    /// Serial of the record.
    pub serial: String,
    /// Destroyed record or the reason it was not destroyed.
    pub outcome: Result<SerialRecord, CustodyError>,
}

/// Counts for one order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderSummary {
    /// Active records per lifecycle state.
    pub by_state: BTreeMap<LifecycleState, usize>,
    /// Cancelled records.
    pub cancelled: usize,
    /// Sessions still accepting entries.
    pub open_sessions: usize,
    /// Finalized sessions.
    pub closed_sessions: usize,
}

impl OrderSummary {
    /// Active records in any state.
    pub fn active(&self) -> usize {
        self.by_state.values().sum()
    }
}

/// Serial of one order that is also active on other orders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrossOrderCollision {
    /// Serial on the inspected order.
    pub serial: String,
    /// Shared fingerprint.
    pub fingerprint: Fingerprint,
    /// Other orders holding it, sorted.
    pub other_orders: Vec<ServiceOrderRef>,
}

/// Scan capture - inbound port for the scanning UI.
pub trait ScanIngestionApi {
    /// Open a capture session.
    ///
    /// With `allow_out_of_sequence`, facility scans of serials never scanned
    /// at the customer are verified under an audited override instead of
    /// being deferred to reconciliation.
    fn open_session(
        &self,
        order: &ServiceOrderRef,
        location: LocationType,
        operator: OperatorId,
        notes: &str,
        allow_out_of_sequence: bool,
    ) -> CustodyResult<ScanSession>;

    /// Normalise, record and apply one scan.
    fn submit_single(
        &self,
        session: &SessionId,
        raw_serial: &str,
    ) -> CustodyResult<SingleSubmission>;

    /// Apply multi-line input, one result per non-blank line.
    ///
    /// Per-line validation and transition errors are reported in the result;
    /// session-level and fatal errors abort the call.
    fn submit_bulk(&self, session: &SessionId, raw_text: &str) -> CustodyResult<Vec<LineResult>>;

    /// Close a session.
    fn finalize(&self, session: &SessionId) -> CustodyResult<ScanSession>;

    /// Session by id.
    fn get_session(&self, session: &SessionId) -> CustodyResult<ScanSession>;

    /// Sessions of an order, oldest first.
    fn sessions_for_order(&self, order: &ServiceOrderRef) -> CustodyResult<Vec<ScanSession>>;
}

/// Scan comparison - inbound port for the service-order workflow.
pub trait ReconciliationApi {
    /// Reconcile every session of an order. All of them must be finalized.
    fn reconcile_order(&self, order: &ServiceOrderRef) -> CustodyResult<ReconciliationReport>;

    /// Reconcile an explicit selection of finalized sessions.
    fn reconcile_sessions(
        &self,
        order: &ServiceOrderRef,
        customer: &[SessionId],
        facility: &[SessionId],
    ) -> CustodyResult<ReconciliationReport>;

    /// Sign off the latest reconciliation's discrepancies.
    fn acknowledge_discrepancies(
        &self,
        order: &ServiceOrderRef,
        operator: OperatorId,
    ) -> CustodyResult<ReconciliationOutcome>;

    /// Fails with `DiscrepancyUnacknowledged` while destruction must wait.
    fn destruction_gate(&self, order: &ServiceOrderRef) -> CustodyResult<()>;

    /// Latest stored reconciliation.
    fn latest_reconciliation(
        &self,
        order: &ServiceOrderRef,
    ) -> CustodyResult<Option<ReconciliationOutcome>>;
}

/// Per-asset lifecycle operations - inbound port for the service-order workflow.
pub trait LifecycleApi {
    /// Strict lifecycle transition. Guard violations are errors.
    fn apply_event(
        &self,
        order: &ServiceOrderRef,
        serial: &str,
        event: LifecycleEvent,
        actor: &Actor,
    ) -> CustodyResult<SerialRecord>;

    /// Destroy one record.
    fn mark_destroyed(
        &self,
        order: &ServiceOrderRef,
        serial: &str,
        method: DestructionMethod,
        actor: &Actor,
    ) -> CustodyResult<SerialRecord>;

    /// Destroy every facility-verified record of an order.
    fn mark_order_destroyed(
        &self,
        order: &ServiceOrderRef,
        method: DestructionMethod,
        actor: &Actor,
    ) -> CustodyResult<Vec<DestructionLine>>;

    /// Correct a mistyped serial; the fingerprint follows.
    fn correct_serial(
        &self,
        order: &ServiceOrderRef,
        serial: &str,
        corrected: &str,
        actor: &Actor,
        reason: &str,
    ) -> CustodyResult<SerialRecord>;

    /// Move a record back to an earlier state.
    fn revert_state(
        &self,
        order: &ServiceOrderRef,
        serial: &str,
        target: LifecycleState,
        actor: &Actor,
        reason: &str,
    ) -> CustodyResult<SerialRecord>;

    /// Cancel a record. It is kept for audit and frees its serial.
    fn cancel_record(
        &self,
        order: &ServiceOrderRef,
        serial: &str,
        actor: &Actor,
        reason: &str,
    ) -> CustodyResult<SerialRecord>;

    /// Include or exclude a record from the destruction certificate.
    fn set_certificate_inclusion(
        &self,
        order: &ServiceOrderRef,
        serial: &str,
        include: bool,
        actor: &Actor,
    ) -> CustodyResult<SerialRecord>;

    /// Active record for a serial.
    fn get_record(&self, order: &ServiceOrderRef, serial: &str) -> CustodyResult<SerialRecord>;
}

/// Settled-state reads - inbound port for billing and certificates.
pub trait ReportingApi {
    /// Billable quantity and total.
    fn resolve_quantity(&self, order: &ServiceOrderRef) -> CustodyResult<BillingQuantity>;

    /// Certificate lines, sorted by serial.
    fn certificate_lines(&self, order: &ServiceOrderRef) -> CustodyResult<Vec<String>>;

    /// Record counts.
    fn order_summary(&self, order: &ServiceOrderRef) -> CustodyResult<OrderSummary>;

    /// Check every record of the order; returns how many were checked.
    fn verify_order_integrity(&self, order: &ServiceOrderRef) -> CustodyResult<usize>;

    /// Serials of the order also active on other orders.
    fn cross_order_collisions(
        &self,
        order: &ServiceOrderRef,
    ) -> CustodyResult<Vec<CrossOrderCollision>>;
}
