//! # Reconciliation Engine
//!
//! Compares the serials captured at the customer site with those captured at
//! the facility for one service order.
//!
//! ## Classification
//!
//! Every serial in the union of both sides lands in exactly one of:
//!
//! - **Matched**: seen on both sides.
//! - **MissingAtFacility**: seen at the customer only (possible loss in transit).
//! - **UnexpectedAtFacility**: seen at the facility only (possible mix-up).
//!
//! **Duplicates** annotate serials captured in two or more sessions at the
//! same location. They overlap the three sets above and are informational.
//!
//! Sides are keyed by fingerprint, so output is independent of session order
//! and identical across re-runs over the same finalized sessions.

use crate::domain::{
    CustodyError, CustodyResult, Fingerprint, LocationType, OperatorId, ScanEntry, ScanSession,
    ServiceOrderRef, SessionId, Timestamp, ValidationError,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// A serial as it appears in a reconciliation report.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReconciledSerial {
    /// Normalised serial.
    pub serial: String,
    /// Fingerprint it was keyed by.
    pub fingerprint: Fingerprint,
}

/// Serial captured by more than one session at one location.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSighting {
    /// Normalised serial.
    pub serial: String,
    /// Location of the repeated capture.
    pub location: LocationType,
    /// Number of sessions at that location that captured it.
    pub session_count: usize,
}

/// Matched serial whose customer and facility notes disagree.
///
/// Both notes stay on the record; the facility side is used operationally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteConflict {
    /// Normalised serial.
    pub serial: String,
    /// Notes captured at the customer site.
    pub customer_notes: String,
    /// Notes captured at the facility.
    pub facility_notes: String,
}

/// Kind of discrepancy raised by a report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscrepancyKind {
    /// Customer-only serial.
    MissingAtFacility,
    /// Facility-only serial.
    UnexpectedAtFacility,
    /// Disagreeing notes on a matched serial.
    NoteConflict,
}

/// Severity of a discrepancy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// Informational.
    Info,
    /// Needs acknowledgement.
    Warning,
    /// Needs acknowledgement and investigation.
    Error,
}

/// Discrepancy surfaced as data, not as a failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscrepancyWarning {
    /// What was found.
    pub kind: DiscrepancyKind,
    /// How bad it is.
    pub severity: Severity,
    /// Affected serial.
    pub serial: String,
}

/// Classification of one service order's scans.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Reconciled order.
    pub service_order_ref: ServiceOrderRef,
    /// Customer-side sessions used, sorted.
    pub customer_sessions: Vec<SessionId>,
    /// Facility-side sessions used, sorted.
    pub facility_sessions: Vec<SessionId>,
    /// Seen on both sides.
    pub matched: Vec<ReconciledSerial>,
    /// Seen at the customer only.
    pub missing_at_facility: Vec<ReconciledSerial>,
    /// Seen at the facility only.
    pub unexpected_at_facility: Vec<ReconciledSerial>,
    /// Captured in several sessions at one location.
    pub duplicates: Vec<DuplicateSighting>,
    /// Matched serials with disagreeing notes.
    pub note_conflicts: Vec<NoteConflict>,
}

impl ReconciliationReport {
    /// Loss or mix-up found; destruction waits for an acknowledgement.
    pub fn has_discrepancies(&self) -> bool {
        !self.missing_at_facility.is_empty() || !self.unexpected_at_facility.is_empty()
    }

    /// Discrepancies as warnings, most severe first.
    pub fn warnings(&self) -> Vec<DiscrepancyWarning> {
        let mut out = Vec::new();
        for s in &self.unexpected_at_facility {
            out.push(DiscrepancyWarning {
                kind: DiscrepancyKind::UnexpectedAtFacility,
                severity: Severity::Error,
                serial: s.serial.clone(),
            });
        }
        for s in &self.missing_at_facility {
            out.push(DiscrepancyWarning {
                kind: DiscrepancyKind::MissingAtFacility,
                severity: Severity::Warning,
                serial: s.serial.clone(),
            });
        }
        for c in &self.note_conflicts {
            out.push(DiscrepancyWarning {
                kind: DiscrepancyKind::NoteConflict,
                severity: Severity::Info,
                serial: c.serial.clone(),
            });
        }
        out
    }

    /// Digest of the classification; an acknowledgement is only valid for
    /// the digest it was given against.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.service_order_ref.as_str().as_bytes());
        for (tag, set) in [
            (b'M', &self.matched),
            (b'F', &self.missing_at_facility),
            (b'U', &self.unexpected_at_facility),
        ] {
            hasher.update([tag]);
            for s in set {
                hasher.update(s.fingerprint.as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }
}

/// Operator sign-off on a report's discrepancies.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// Who acknowledged.
    pub by: OperatorId,
    /// When.
    pub at: Timestamp,
    /// Digest of the acknowledged report.
    pub digest: String,
}

/// Stored result of a reconciliation run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationOutcome {
    /// Classification.
    pub report: ReconciliationReport,
    /// Run time.
    pub reconciled_at: Timestamp,
    /// Sign-off, if given for this classification.
    pub acknowledgement: Option<Acknowledgement>,
}

impl ReconciliationOutcome {
    /// Discrepancies are absent or signed off for this exact classification.
    pub fn clears_destruction(&self) -> bool {
        if !self.report.has_discrepancies() {
            return true;
        }
        self.acknowledgement
            .as_ref()
            .is_some_and(|ack| ack.digest == self.report.digest())
    }
}

/// Serials corrected after capture.
///
/// Session entries keep the fingerprint they were captured under; a
/// correction moves the record to a new one. Entries whose fingerprint is
/// listed here are counted under the record's current serial instead.
#[derive(Clone, Debug, Default)]
pub struct SerialCorrections {
    current: HashMap<Fingerprint, ReconciledSerial>,
}

impl SerialCorrections {
    /// No corrections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count entries captured as `captured` under `current`.
    pub fn insert(&mut self, captured: Fingerprint, current: ReconciledSerial) {
        if captured != current.fingerprint {
            self.current.insert(captured, current);
        }
    }

    /// Number of redirected fingerprints.
    pub fn len(&self) -> usize {
        self.current.len()
    }

    /// Nothing redirected.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    fn resolve<'a>(&'a self, entry: &'a ScanEntry) -> (Fingerprint, &'a str) {
        match self.current.get(&entry.fingerprint) {
            Some(current) => (current.fingerprint, current.serial.as_str()),
            None => (entry.fingerprint, entry.serial.as_str()),
        }
    }
}

/// Per-side view: fingerprint -> (first spelling, first non-empty notes, sessions).
struct Side<'a> {
    serials: BTreeMap<Fingerprint, SideEntry<'a>>,
}

struct SideEntry<'a> {
    serial: &'a str,
    notes: &'a str,
    sessions: usize,
}

impl<'a> Side<'a> {
    fn collect(sessions: &[&'a ScanSession], corrections: &'a SerialCorrections) -> Self {
        let mut serials: BTreeMap<Fingerprint, SideEntry<'a>> = BTreeMap::new();
        let mut in_session = HashSet::new();
        for session in sessions.iter().copied() {
            in_session.clear();
            for entry in session.entries() {
                let (fp, serial) = corrections.resolve(entry);
                let slot = serials.entry(fp).or_insert(SideEntry {
                    serial,
                    notes: "",
                    sessions: 0,
                });
                if in_session.insert(fp) {
                    slot.sessions += 1;
                }
                if slot.notes.is_empty() {
                    slot.notes = entry.notes.as_str();
                }
            }
        }
        Self { serials }
    }
}

/// Set comparison of finalized customer and facility sessions.
pub struct ReconciliationEngine;

impl ReconciliationEngine {
    /// Classify the serials of one order.
    ///
    /// Every session must be finalized, belong to `order` and sit on the side
    /// it is passed as.
    pub fn reconcile(
        order: &ServiceOrderRef,
        customer: &[&ScanSession],
        facility: &[&ScanSession],
    ) -> CustodyResult<ReconciliationReport> {
        Self::reconcile_corrected(order, customer, facility, &SerialCorrections::new())
    }

    /// [`reconcile`](Self::reconcile), counting entries of corrected serials
    /// under their current serial.
    pub fn reconcile_corrected(
        order: &ServiceOrderRef,
        customer: &[&ScanSession],
        facility: &[&ScanSession],
        corrections: &SerialCorrections,
    ) -> CustodyResult<ReconciliationReport> {
        check_side(order, customer, LocationType::Customer)?;
        check_side(order, facility, LocationType::Facility)?;

        let cust = Side::collect(customer, corrections);
        let fac = Side::collect(facility, corrections);

        let mut matched = Vec::new();
        let mut missing_at_facility = Vec::new();
        let mut note_conflicts = Vec::new();
        for (fp, c) in &cust.serials {
            match fac.serials.get(fp) {
                Some(f) => {
                    // facility spelling wins for matched serials
                    matched.push(reconciled(f.serial, *fp));
                    if !c.notes.is_empty() && !f.notes.is_empty() && c.notes != f.notes {
                        note_conflicts.push(NoteConflict {
                            serial: f.serial.to_string(),
                            customer_notes: c.notes.to_string(),
                            facility_notes: f.notes.to_string(),
                        });
                    }
                }
                None => missing_at_facility.push(reconciled(c.serial, *fp)),
            }
        }
        let mut unexpected_at_facility: Vec<_> = fac
            .serials
            .iter()
            .filter(|(fp, _)| !cust.serials.contains_key(*fp))
            .map(|(fp, f)| reconciled(f.serial, *fp))
            .collect();

        let sides = [(LocationType::Customer, &cust), (LocationType::Facility, &fac)];
        let mut duplicates: Vec<_> = sides
            .into_iter()
            .flat_map(|(location, side)| {
                side.serials
                    .values()
                    .filter(|e| e.sessions > 1)
                    .map(move |e| DuplicateSighting {
                        serial: e.serial.to_string(),
                        location,
                        session_count: e.sessions,
                    })
            })
            .collect();

        matched.sort();
        missing_at_facility.sort();
        unexpected_at_facility.sort();
        duplicates.sort_by(|a, b| (&a.serial, a.location).cmp(&(&b.serial, b.location)));
        note_conflicts.sort_by(|a, b| a.serial.cmp(&b.serial));

        debug!(
            "[custody] reconciled {}: matched={} missing={} unexpected={} duplicates={}",
            order,
            matched.len(),
            missing_at_facility.len(),
            unexpected_at_facility.len(),
            duplicates.len()
        );

        Ok(ReconciliationReport {
            service_order_ref: order.clone(),
            customer_sessions: sorted_ids(customer),
            facility_sessions: sorted_ids(facility),
            matched,
            missing_at_facility,
            unexpected_at_facility,
            duplicates,
            note_conflicts,
        })
    }
}

fn check_side(
    order: &ServiceOrderRef,
    sessions: &[&ScanSession],
    location: LocationType,
) -> CustodyResult<()> {
    for session in sessions {
        if session.service_order_ref != *order {
            return Err(ValidationError::SessionMismatch {
                session_id: session.id,
                reason: format!("belongs to order {}", session.service_order_ref),
            }
            .into());
        }
        if session.location_type != location {
            return Err(ValidationError::SessionMismatch {
                session_id: session.id,
                reason: format!("captured at {}, expected {}", session.location_type, location),
            }
            .into());
        }
        if session.is_open() {
            return Err(CustodyError::SessionNotFinalized {
                session_id: session.id,
            });
        }
    }
    Ok(())
}

fn reconciled(serial: &str, fingerprint: Fingerprint) -> ReconciledSerial {
    ReconciledSerial {
        serial: serial.to_string(),
        fingerprint,
    }
}

fn sorted_ids(sessions: &[&ScanSession]) -> Vec<SessionId> {
    let mut ids: Vec<_> = sessions.iter().map(|s| s.id).collect();
    ids.sort();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IntegrityHasher, OperatorId, ScanEntry};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn order() -> ServiceOrderRef {
        ServiceOrderRef::new("SO-1")
    }

    fn session(location: LocationType, serials: &[&str]) -> ScanSession {
        session_with_notes(location, &serials.iter().map(|s| (*s, "")).collect::<Vec<_>>())
    }

    fn session_with_notes(location: LocationType, serials: &[(&str, &str)]) -> ScanSession {
        let mut s = ScanSession::open(order(), location, OperatorId::new("op"), 1, "");
        for (serial, notes) in serials {
            s.append(ScanEntry {
                raw: serial.to_string(),
                serial: serial.to_string(),
                fingerprint: IntegrityHasher::fingerprint(serial).unwrap(),
                notes: notes.to_string(),
                at: 2,
            })
            .unwrap();
        }
        s.finalize(3).unwrap();
        s
    }

    fn serials(set: &[ReconciledSerial]) -> Vec<&str> {
        set.iter().map(|s| s.serial.as_str()).collect()
    }

    #[test]
    fn test_abc_against_bcd() {
        let c = session(LocationType::Customer, &["A", "B", "C"]);
        let f = session(LocationType::Facility, &["B", "C", "D"]);
        let report = ReconciliationEngine::reconcile(&order(), &[&c], &[&f]).unwrap();

        assert_eq!(serials(&report.matched), vec!["B", "C"]);
        assert_eq!(serials(&report.missing_at_facility), vec!["A"]);
        assert_eq!(serials(&report.unexpected_at_facility), vec!["D"]);
        assert!(report.duplicates.is_empty());
        assert!(report.has_discrepancies());

        let warnings = report.warnings();
        assert_eq!(warnings[0].kind, DiscrepancyKind::UnexpectedAtFacility);
        assert_eq!(warnings[0].severity, Severity::Error);
        assert_eq!(warnings[1].kind, DiscrepancyKind::MissingAtFacility);
    }

    #[test]
    fn test_open_session_is_rejected() {
        let c = session(LocationType::Customer, &["A"]);
        let f = ScanSession::open(order(), LocationType::Facility, OperatorId::new("op"), 1, "");
        let err = ReconciliationEngine::reconcile(&order(), &[&c], &[&f]).unwrap_err();
        assert_eq!(err, CustodyError::SessionNotFinalized { session_id: f.id });
    }

    #[test]
    fn test_wrong_side_or_order_is_rejected() {
        let c = session(LocationType::Customer, &["A"]);
        let err = ReconciliationEngine::reconcile(&order(), &[], &[&c]).unwrap_err();
        assert!(matches!(
            err,
            CustodyError::Validation(ValidationError::SessionMismatch { .. })
        ));

        let other = ServiceOrderRef::new("SO-2");
        let err = ReconciliationEngine::reconcile(&other, &[&c], &[]).unwrap_err();
        assert!(matches!(
            err,
            CustodyError::Validation(ValidationError::SessionMismatch { .. })
        ));
    }

    #[test]
    fn test_duplicates_across_sessions_are_annotations() {
        let c1 = session(LocationType::Customer, &["A", "B"]);
        let c2 = session(LocationType::Customer, &["A"]);
        let f = session(LocationType::Facility, &["A", "B", "B"]);
        let report = ReconciliationEngine::reconcile(&order(), &[&c1, &c2], &[&f]).unwrap();

        assert_eq!(serials(&report.matched), vec!["A", "B"]);
        assert!(!report.has_discrepancies());
        // B repeated inside one session is not a cross-session duplicate.
        assert_eq!(
            report.duplicates,
            vec![DuplicateSighting {
                serial: "A".into(),
                location: LocationType::Customer,
                session_count: 2,
            }]
        );
    }

    #[test]
    fn test_note_conflict_reported_when_both_sides_differ() {
        let c = session_with_notes(
            LocationType::Customer,
            &[("A", "dented"), ("B", "ok"), ("C", "")],
        );
        let f = session_with_notes(
            LocationType::Facility,
            &[("A", "cracked"), ("B", "ok"), ("C", "wet")],
        );
        let report = ReconciliationEngine::reconcile(&order(), &[&c], &[&f]).unwrap();

        assert_eq!(report.note_conflicts.len(), 1);
        assert_eq!(report.note_conflicts[0].serial, "A");
        assert_eq!(report.note_conflicts[0].facility_notes, "cracked");
        assert!(!report.has_discrepancies());
    }

    #[test]
    fn test_corrected_serial_counts_under_current_spelling() {
        let c1 = session_with_notes(LocationType::Customer, &[("WD-1O", "typo"), ("WD-2", "")]);
        let c2 = session(LocationType::Customer, &["WD-10"]);
        let f = session(LocationType::Facility, &["WD-10", "WD-2"]);

        let uncorrected = ReconciliationEngine::reconcile(&order(), &[&c1], &[&f]).unwrap();
        assert_eq!(serials(&uncorrected.missing_at_facility), vec!["WD-1O"]);
        assert_eq!(serials(&uncorrected.unexpected_at_facility), vec!["WD-10"]);

        let mut corrections = SerialCorrections::new();
        corrections.insert(
            IntegrityHasher::fingerprint("WD-1O").unwrap(),
            reconciled("WD-10", IntegrityHasher::fingerprint("WD-10").unwrap()),
        );
        let report =
            ReconciliationEngine::reconcile_corrected(&order(), &[&c1, &c2], &[&f], &corrections)
                .unwrap();
        assert_eq!(serials(&report.matched), vec!["WD-10", "WD-2"]);
        assert!(!report.has_discrepancies());
        assert_eq!(
            report.duplicates,
            vec![DuplicateSighting {
                serial: "WD-10".into(),
                location: LocationType::Customer,
                session_count: 2,
            }]
        );
    }

    #[test]
    fn test_first_notes_across_many_entries() {
        let c = session_with_notes(
            LocationType::Customer,
            &[("A", ""), ("B", "b1"), ("A", "a1"), ("A", "a2"), ("B", "b2")],
        );
        let f = session_with_notes(LocationType::Facility, &[("A", "a-fac"), ("B", "b1")]);
        let report = ReconciliationEngine::reconcile(&order(), &[&c], &[&f]).unwrap();
        assert_eq!(
            report.note_conflicts,
            vec![NoteConflict {
                serial: "A".into(),
                customer_notes: "a1".into(),
                facility_notes: "a-fac".into(),
            }]
        );
    }

    #[test]
    fn test_acknowledgement_bound_to_digest() {
        let c = session(LocationType::Customer, &["A", "B"]);
        let f = session(LocationType::Facility, &["B"]);
        let report = ReconciliationEngine::reconcile(&order(), &[&c], &[&f]).unwrap();
        let mut outcome = ReconciliationOutcome {
            report: report.clone(),
            reconciled_at: 10,
            acknowledgement: None,
        };
        assert!(!outcome.clears_destruction());

        outcome.acknowledgement = Some(Acknowledgement {
            by: OperatorId::new("lead"),
            at: 11,
            digest: report.digest(),
        });
        assert!(outcome.clears_destruction());

        let f2 = session(LocationType::Facility, &["C"]);
        outcome.report = ReconciliationEngine::reconcile(&order(), &[&c], &[&f2]).unwrap();
        assert!(!outcome.clears_destruction());
    }

    fn serial_set() -> impl Strategy<Value = BTreeSet<String>> {
        prop::collection::btree_set("[A-F][0-9]", 0..12)
    }

    proptest! {
        #[test]
        fn prop_classification_partitions_union(cust in serial_set(), fac in serial_set()) {
            let c_refs: Vec<&str> = cust.iter().map(String::as_str).collect();
            let f_refs: Vec<&str> = fac.iter().map(String::as_str).collect();
            let c = session(LocationType::Customer, &c_refs);
            let f = session(LocationType::Facility, &f_refs);
            let report = ReconciliationEngine::reconcile(&order(), &[&c], &[&f]).unwrap();

            let mut seen = BTreeSet::new();
            for s in report
                .matched
                .iter()
                .chain(&report.missing_at_facility)
                .chain(&report.unexpected_at_facility)
            {
                prop_assert!(seen.insert(s.serial.clone()), "{} classified twice", s.serial);
            }
            let union: BTreeSet<String> = cust.union(&fac).cloned().collect();
            prop_assert_eq!(seen, union);
            prop_assert_eq!(report.matched.len(), cust.intersection(&fac).count());
        }

        #[test]
        fn prop_reconciliation_is_deterministic(cust in serial_set(), fac in serial_set()) {
            let c_refs: Vec<&str> = cust.iter().map(String::as_str).collect();
            let f_refs: Vec<&str> = fac.iter().map(String::as_str).collect();
            let c = session(LocationType::Customer, &c_refs);
            let f = session(LocationType::Facility, &f_refs);
            let first = ReconciliationEngine::reconcile(&order(), &[&c], &[&f]).unwrap();
            let second = ReconciliationEngine::reconcile(&order(), &[&c], &[&f]).unwrap();
            prop_assert_eq!(first.digest(), second.digest());
            prop_assert_eq!(first, second);
        }
    }
}
