//! # Domain Entities
//!
//! `SerialRecord` (one physical asset), `ScanSession` (one capture batch) and
//! `ServiceOrder` (the billing context they belong to).

use super::errors::{CustodyError, CustodyResult, ValidationError};
use super::fingerprint::{Fingerprint, IntegrityHasher};
use super::lifecycle::{LifecycleStateMachine, Transition};
use super::value_objects::{
    DestructionMethod, LifecycleEvent, LifecycleState, LocationType, OperatorId, Override,
    ServiceOrderRef, SessionId, Timestamp,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

/// Customer-side scan fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerScan {
    /// Scanned at the customer site.
    pub scanned: bool,
    /// Last customer-side sighting.
    pub at: Option<Timestamp>,
    /// Operator of the last customer-side sighting.
    pub by: Option<OperatorId>,
    /// Latest customer-side notes.
    pub notes: String,
}

/// Facility-side scan fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityScan {
    /// Receipt verified at the facility.
    pub verified: bool,
    /// Last facility-side sighting.
    pub at: Option<Timestamp>,
    /// Operator of the last facility-side sighting.
    pub by: Option<OperatorId>,
    /// Latest facility-side notes.
    pub notes: String,
}

/// Destruction fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destruction {
    /// Asset destroyed.
    pub destroyed: bool,
    /// When.
    pub at: Option<Timestamp>,
    /// How.
    pub method: Option<DestructionMethod>,
    /// Destroyed without facility verification under an override.
    pub overridden: bool,
}

/// One line of a record's audit trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the action happened.
    pub at: Timestamp,
    /// Who performed it.
    pub operator: OperatorId,
    /// What happened.
    pub action: AuditAction,
}

/// Audited actions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    /// Record created on first sighting.
    Registered,
    /// Scan applied at a location.
    Scanned {
        /// Capture location.
        location: LocationType,
        /// Notes supplied with the scan.
        notes: String,
    },
    /// Sighting recorded without a state change (guard not met).
    Sighted {
        /// Capture location.
        location: LocationType,
        /// Notes supplied with the scan.
        notes: String,
    },
    /// Driven to FacilityVerified by reconciliation.
    Reconciled,
    /// Destroyed.
    Destroyed {
        /// Method used.
        method: DestructionMethod,
    },
    /// Guard bypassed.
    OverrideApplied {
        /// Approver.
        authorized_by: OperatorId,
        /// Justification.
        reason: String,
    },
    /// Serial corrected; fingerprint recomputed with it.
    SerialCorrected {
        /// Previous serial.
        from: String,
        /// New serial.
        to: String,
        /// Justification.
        reason: String,
    },
    /// State moved backwards through a correction.
    StateReverted {
        /// Previous state.
        from: LifecycleState,
        /// New state.
        to: LifecycleState,
        /// Justification.
        reason: String,
    },
    /// Certificate inclusion toggled.
    CertificateInclusion {
        /// New value.
        include: bool,
    },
    /// Record cancelled.
    Cancelled {
        /// Justification.
        reason: String,
    },
}

/// Who/when/why attached to a record mutation.
#[derive(Clone, Debug)]
pub struct EventContext {
    /// Mutation time.
    pub at: Timestamp,
    /// Acting operator.
    pub operator: OperatorId,
    /// Notes to store with a scan.
    pub notes: Option<String>,
    /// Guard override, if granted.
    pub authorization: Option<Override>,
}

impl EventContext {
    /// Context without notes or override.
    pub fn new(at: Timestamp, operator: OperatorId) -> Self {
        Self {
            at,
            operator,
            notes: None,
            authorization: None,
        }
    }

    /// Attach scan notes.
    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes.filter(|n| !n.trim().is_empty());
        self
    }

    /// Attach an override.
    pub fn with_authorization(mut self, authorization: Option<Override>) -> Self {
        self.authorization = authorization;
        self
    }
}

/// One physical asset's custody record.
///
/// All fields are private. The serial and its fingerprint only change
/// together through [`SerialRecord::correct_serial`]. The lifecycle state and
/// the scan and destruction fields only move with it, through
/// [`SerialRecord::apply_event`] or [`SerialRecord::revert_to`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialRecord {
    serial_number: String,
    fingerprint: Fingerprint,
    service_order_ref: ServiceOrderRef,
    lifecycle_state: LifecycleState,
    customer_scan: CustomerScan,
    facility_scan: FacilityScan,
    destruction: Destruction,
    include_in_certificate: bool,
    cancelled: bool,
    created_at: Timestamp,
    version: u64,
    audit: Vec<AuditEntry>,
}

impl SerialRecord {
    /// Create a record in `Registered` for a normalised serial.
    pub fn register(
        order: ServiceOrderRef,
        serial: &str,
        ctx: &EventContext,
    ) -> CustodyResult<Self> {
        let fingerprint = IntegrityHasher::fingerprint(serial)?;
        Ok(Self {
            serial_number: serial.trim().to_string(),
            fingerprint,
            service_order_ref: order,
            lifecycle_state: LifecycleState::Registered,
            customer_scan: CustomerScan::default(),
            facility_scan: FacilityScan::default(),
            destruction: Destruction::default(),
            include_in_certificate: true,
            cancelled: false,
            created_at: ctx.at,
            version: 0,
            audit: vec![AuditEntry {
                at: ctx.at,
                operator: ctx.operator.clone(),
                action: AuditAction::Registered,
            }],
        })
    }

    /// Serial number as stored.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Stored fingerprint.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Owning order.
    pub fn service_order_ref(&self) -> &ServiceOrderRef {
        &self.service_order_ref
    }

    /// Current lifecycle state.
    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle_state
    }

    /// Cancelled records are kept for audit but ignored everywhere else.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Creation time.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Optimistic concurrency version, bumped by the store on every update.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Audit trail, oldest first.
    pub fn audit(&self) -> &[AuditEntry] {
        &self.audit
    }

    /// Customer-side scan fields.
    pub fn customer_scan(&self) -> &CustomerScan {
        &self.customer_scan
    }

    /// Facility-side scan fields.
    pub fn facility_scan(&self) -> &FacilityScan {
        &self.facility_scan
    }

    /// Destruction fields; set only by the transition into `Destroyed`.
    pub fn destruction(&self) -> &Destruction {
        &self.destruction
    }

    /// Whether a destroyed record appears on the certificate.
    pub fn include_in_certificate(&self) -> bool {
        self.include_in_certificate
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Notes used operationally: facility-side wins when present.
    pub fn effective_notes(&self) -> &str {
        if self.facility_scan.notes.is_empty() {
            &self.customer_scan.notes
        } else {
            &self.facility_scan.notes
        }
    }

    /// Fail closed when the fingerprint no longer matches the serial.
    pub fn verify_integrity(&self) -> CustodyResult<()> {
        IntegrityHasher::verify(&self.serial_number, &self.fingerprint)
    }

    /// Check the destruction invariant: destroyed implies `Destroyed` and
    /// either facility verification or a recorded override.
    pub fn destruction_consistent(&self) -> bool {
        if !self.destruction.destroyed {
            return self.lifecycle_state != LifecycleState::Destroyed;
        }
        self.lifecycle_state == LifecycleState::Destroyed
            && self.destruction.method.is_some()
            && (self.facility_scan.verified || self.destruction.overridden)
    }

    /// Apply a lifecycle event through the state machine.
    pub fn apply_event(
        &mut self,
        event: LifecycleEvent,
        ctx: &EventContext,
    ) -> CustodyResult<Transition> {
        let transition = LifecycleStateMachine::next_state(
            self.lifecycle_state,
            event,
            ctx.authorization.is_some(),
        )?;

        match event {
            LifecycleEvent::CustomerScan => self.stamp_scan(LocationType::Customer, true, ctx),
            LifecycleEvent::FacilityScan => self.stamp_scan(LocationType::Facility, true, ctx),
            LifecycleEvent::Destruction { method: Some(method) } => {
                self.destruction = Destruction {
                    destroyed: true,
                    at: Some(ctx.at),
                    method: Some(method),
                    overridden: transition.used_override(),
                };
                self.push_audit(ctx, AuditAction::Destroyed { method });
            }
            // rejected by the guard above
            LifecycleEvent::Destruction { method: None } => {}
        }

        if transition.used_override() {
            if let Some(auth) = &ctx.authorization {
                self.push_audit(
                    ctx,
                    AuditAction::OverrideApplied {
                        authorized_by: auth.authorized_by.clone(),
                        reason: auth.reason.clone(),
                    },
                );
            }
        }

        self.lifecycle_state = transition.to;
        Ok(transition)
    }

    /// Record a sighting whose transition guard was not met, without
    /// touching the lifecycle state or the verified/scanned flags.
    pub fn record_sighting(&mut self, location: LocationType, ctx: &EventContext) {
        self.stamp_scan(location, false, ctx);
    }

    /// Drive a matched record to `FacilityVerified` after reconciliation.
    pub fn reconcile(&mut self, ctx: &EventContext) -> CustodyResult<Option<Transition>> {
        if self.lifecycle_state != LifecycleState::CustomerScanned {
            return Ok(None);
        }
        let transition = LifecycleStateMachine::next_state(
            self.lifecycle_state,
            LifecycleEvent::FacilityScan,
            false,
        )?;
        self.facility_scan.verified = true;
        self.lifecycle_state = transition.to;
        self.push_audit(ctx, AuditAction::Reconciled);
        Ok(Some(transition))
    }

    /// Audited serial correction. Serial and fingerprint are replaced together.
    pub fn correct_serial(
        &mut self,
        new_serial: &str,
        ctx: &EventContext,
        reason: &str,
    ) -> CustodyResult<()> {
        let fingerprint = IntegrityHasher::fingerprint(new_serial)?;
        let from = std::mem::replace(&mut self.serial_number, new_serial.trim().to_string());
        self.fingerprint = fingerprint;
        let to = self.serial_number.clone();
        self.push_audit(
            ctx,
            AuditAction::SerialCorrected {
                from,
                to,
                reason: reason.to_string(),
            },
        );
        Ok(())
    }

    /// Audited backwards correction of the lifecycle state.
    ///
    /// Fields that only make sense beyond `target` are cleared.
    pub fn revert_to(
        &mut self,
        target: LifecycleState,
        ctx: &EventContext,
        reason: &str,
    ) -> CustodyResult<()> {
        let from = self.lifecycle_state;
        if target >= from {
            return Err(ValidationError::NotARegression { from, to: target }.into());
        }
        if target < LifecycleState::Destroyed {
            self.destruction = Destruction::default();
        }
        if target < LifecycleState::FacilityVerified {
            self.facility_scan.verified = false;
        }
        if target < LifecycleState::CustomerScanned {
            self.customer_scan.scanned = false;
        }
        self.lifecycle_state = target;
        self.push_audit(
            ctx,
            AuditAction::StateReverted {
                from,
                to: target,
                reason: reason.to_string(),
            },
        );
        Ok(())
    }

    /// Toggle certificate inclusion.
    pub fn set_include_in_certificate(&mut self, include: bool, ctx: &EventContext) {
        if self.include_in_certificate != include {
            self.include_in_certificate = include;
            self.push_audit(ctx, AuditAction::CertificateInclusion { include });
        }
    }

    /// Flag the record cancelled. It is never removed.
    pub fn cancel(&mut self, ctx: &EventContext, reason: &str) {
        self.cancelled = true;
        self.push_audit(
            ctx,
            AuditAction::Cancelled {
                reason: reason.to_string(),
            },
        );
    }

    fn stamp_scan(&mut self, location: LocationType, confirm: bool, ctx: &EventContext) {
        let notes = ctx.notes.clone().unwrap_or_default();
        match location {
            LocationType::Customer => {
                let scan = &mut self.customer_scan;
                scan.scanned |= confirm;
                scan.at = Some(ctx.at);
                scan.by = Some(ctx.operator.clone());
                if !notes.is_empty() {
                    scan.notes = notes.clone();
                }
            }
            LocationType::Facility => {
                let scan = &mut self.facility_scan;
                scan.verified |= confirm;
                scan.at = Some(ctx.at);
                scan.by = Some(ctx.operator.clone());
                if !notes.is_empty() {
                    scan.notes = notes.clone();
                }
            }
        }
        let action = if confirm {
            AuditAction::Scanned { location, notes }
        } else {
            AuditAction::Sighted { location, notes }
        };
        self.push_audit(ctx, action);
    }

    fn push_audit(&mut self, ctx: &EventContext, action: AuditAction) {
        self.audit.push(AuditEntry {
            at: ctx.at,
            operator: ctx.operator.clone(),
            action,
        });
    }
}

/// One raw input accepted into a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    /// Input as typed or scanned.
    pub raw: String,
    /// Normalised serial.
    pub serial: String,
    /// Fingerprint of the normalised serial.
    pub fingerprint: Fingerprint,
    /// Notes supplied with the entry.
    pub notes: String,
    /// Capture time.
    pub at: Timestamp,
}

/// Fingerprints present in a session's entries, built on first lookup.
///
/// Derived data: it is neither serialized nor compared.
#[derive(Clone, Debug, Default)]
struct EntryIndex(OnceLock<HashSet<Fingerprint>>);

impl PartialEq for EntryIndex {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl Eq for EntryIndex {}

/// A capture batch: one order, one location, one operator, one sitting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSession {
    /// Session id.
    pub id: SessionId,
    /// Owning order.
    pub service_order_ref: ServiceOrderRef,
    /// Capture location.
    pub location_type: LocationType,
    /// Scanning operator.
    pub operator: OperatorId,
    /// Opened at.
    pub started_at: Timestamp,
    /// Finalized at; `None` while open.
    pub finished_at: Option<Timestamp>,
    entries: Vec<ScanEntry>,
    #[serde(skip)]
    index: EntryIndex,
    /// Free-form notes for the whole session.
    pub session_notes: String,
    /// Facility receipt of serials never scanned at the customer is applied
    /// (audited) instead of deferred to reconciliation.
    pub allow_out_of_sequence: bool,
    version: u64,
}

impl ScanSession {
    /// Open a new session.
    pub fn open(
        service_order_ref: ServiceOrderRef,
        location_type: LocationType,
        operator: OperatorId,
        started_at: Timestamp,
        session_notes: impl Into<String>,
    ) -> Self {
        Self {
            id: SessionId::generate(),
            service_order_ref,
            location_type,
            operator,
            started_at,
            finished_at: None,
            entries: Vec::new(),
            index: EntryIndex::default(),
            session_notes: session_notes.into(),
            allow_out_of_sequence: false,
            version: 0,
        }
    }

    /// Accepting entries.
    pub fn is_open(&self) -> bool {
        self.finished_at.is_none()
    }

    /// Optimistic concurrency version.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Accepted inputs in arrival order, duplicates included.
    pub fn entries(&self) -> &[ScanEntry] {
        &self.entries
    }

    /// Whether a serial was already accepted in this session.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.index
            .0
            .get_or_init(|| self.entries.iter().map(|e| e.fingerprint).collect())
            .contains(fingerprint)
    }

    /// Distinct serials of the session keyed by fingerprint (first spelling wins).
    pub fn distinct_serials(&self) -> BTreeMap<Fingerprint, &ScanEntry> {
        let mut out = BTreeMap::new();
        for entry in &self.entries {
            out.entry(entry.fingerprint).or_insert(entry);
        }
        out
    }

    /// Append an accepted entry. Returns `true` when its serial was already
    /// in the session.
    pub fn append(&mut self, entry: ScanEntry) -> CustodyResult<bool> {
        self.ensure_open()?;
        let repeat = self.contains(&entry.fingerprint);
        if let Some(index) = self.index.0.get_mut() {
            index.insert(entry.fingerprint);
        }
        self.entries.push(entry);
        Ok(repeat)
    }

    /// Close the session; it becomes immutable reconciliation input.
    pub fn finalize(&mut self, at: Timestamp) -> CustodyResult<()> {
        self.ensure_open()?;
        self.finished_at = Some(at);
        Ok(())
    }

    /// Reject writes to a finalized session.
    pub fn ensure_open(&self) -> CustodyResult<()> {
        if !self.is_open() {
            return Err(CustodyError::Validation(ValidationError::SessionClosed(self.id)));
        }
        Ok(())
    }
}

/// Billing context for a set of records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOrder {
    /// Order reference.
    pub reference: ServiceOrderRef,
    /// Quantity typed in by hand, used when nothing was scanned.
    pub manual_quantity: u32,
    /// Price per asset.
    pub unit_rate: Decimal,
}

impl ServiceOrder {
    /// Create an order.
    pub fn new(reference: impl Into<String>, manual_quantity: u32, unit_rate: Decimal) -> Self {
        Self {
            reference: ServiceOrderRef::new(reference),
            manual_quantity,
            unit_rate,
        }
    }
}
