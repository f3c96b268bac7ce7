//! Reconciliation runs, their effects on records, and the destruction gate.

use super::CustodyService;
use crate::algorithms::{
    Acknowledgement, ReconciledSerial, ReconciliationEngine, ReconciliationOutcome,
    ReconciliationReport, SerialCorrections,
};
use crate::domain::{
    AuditAction, CustodyError, CustodyResult, EventContext, IntegrityHasher, LocationType,
    OperatorId, ScanSession, ServiceOrderRef, SessionId, ValidationError,
};
use crate::ports::inbound::ReconciliationApi;
use crate::ports::outbound::{CustodyStore, TimeSource};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Operator recorded on audit entries written by reconciliation itself.
const RECONCILER: &str = "reconciliation";

impl<S, T> ReconciliationApi for CustodyService<S, T>
where
    S: CustodyStore,
    T: TimeSource,
{
    fn reconcile_order(&self, order: &ServiceOrderRef) -> CustodyResult<ReconciliationReport> {
        self.require_order(order)?;
        let sessions = self.store.sessions_for_order(order)?;
        let (customer, facility): (Vec<&ScanSession>, Vec<&ScanSession>) = sessions
            .iter()
            .partition(|s| s.location_type == LocationType::Customer);
        self.run_reconciliation(order, &customer, &facility)
    }

    fn reconcile_sessions(
        &self,
        order: &ServiceOrderRef,
        customer: &[SessionId],
        facility: &[SessionId],
    ) -> CustodyResult<ReconciliationReport> {
        self.require_order(order)?;
        let load = |ids: &[SessionId]| -> CustodyResult<Vec<ScanSession>> {
            let mut sessions = ids
                .iter()
                .map(|id| self.require_session(id))
                .collect::<CustodyResult<Vec<_>>>()?;
            sessions.sort_by(|a, b| (a.started_at, a.id).cmp(&(b.started_at, b.id)));
            sessions.dedup_by_key(|s| s.id);
            Ok(sessions)
        };
        let customer = load(customer)?;
        let facility = load(facility)?;
        let customer: Vec<&ScanSession> = customer.iter().collect();
        let facility: Vec<&ScanSession> = facility.iter().collect();
        self.run_reconciliation(order, &customer, &facility)
    }

    fn acknowledge_discrepancies(
        &self,
        order: &ServiceOrderRef,
        operator: OperatorId,
    ) -> CustodyResult<ReconciliationOutcome> {
        self.require_order(order)?;
        let latest = self
            .store
            .latest_outcome(order)?
            .ok_or_else(|| ValidationError::NoReconciliation(order.clone()))?;
        let acknowledgement = Acknowledgement {
            by: operator,
            at: self.now(),
            digest: latest.report.digest(),
        };
        let outcome = self.store.acknowledge_latest(order, acknowledgement)?;
        info!(
            "[custody] discrepancies on {} acknowledged by {} ({} warnings)",
            order,
            outcome
                .acknowledgement
                .as_ref()
                .map(|a| a.by.as_str())
                .unwrap_or_default(),
            outcome.report.warnings().len()
        );
        Ok(outcome)
    }

    fn destruction_gate(&self, order: &ServiceOrderRef) -> CustodyResult<()> {
        match self.store.latest_outcome(order)? {
            Some(outcome) if !outcome.clears_destruction() => {
                warn!("[custody] destruction on {} blocked: discrepancies unacknowledged", order);
                Err(CustodyError::DiscrepancyUnacknowledged {
                    order: order.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn latest_reconciliation(
        &self,
        order: &ServiceOrderRef,
    ) -> CustodyResult<Option<ReconciliationOutcome>> {
        Ok(self.store.latest_outcome(order)?)
    }
}

impl<S, T> CustodyService<S, T>
where
    S: CustodyStore,
    T: TimeSource,
{
    fn run_reconciliation(
        &self,
        order: &ServiceOrderRef,
        customer: &[&ScanSession],
        facility: &[&ScanSession],
    ) -> CustodyResult<ReconciliationReport> {
        let corrections = self.serial_corrections(order)?;
        if !corrections.is_empty() {
            debug!(
                "[custody] {} corrected serials on {} counted under their current serial",
                corrections.len(),
                order
            );
        }
        let report =
            ReconciliationEngine::reconcile_corrected(order, customer, facility, &corrections)?;
        let at = self.now();
        let ctx = EventContext::new(at, OperatorId::new(RECONCILER));

        let mut promoted = 0usize;
        for matched in &report.matched {
            let moved = self.with_retries(order, &matched.serial, || {
                let Some(record) = self.store.get_record(order, &matched.fingerprint)? else {
                    // cancelled since it was scanned
                    return Ok(Ok(false));
                };
                let mut record = self.checked(record)?;
                let expected = record.version();
                if record.reconcile(&ctx)?.is_none() {
                    return Ok(Ok(false));
                }
                Ok(self.store.update_record(record, expected).map(|_| true))
            })?;
            if moved {
                promoted += 1;
            }
        }

        let previous = self.store.latest_outcome(order)?;
        let digest = report.digest();
        let acknowledgement = previous
            .and_then(|p| p.acknowledgement)
            .filter(|ack| ack.digest == digest);
        if acknowledgement.is_some() {
            debug!("[custody] acknowledgement on {} carried over to identical re-run", order);
        }

        self.store
            .save_outcome(ReconciliationOutcome {
                report: report.clone(),
                reconciled_at: at,
                acknowledgement,
            })?;

        for conflict in &report.note_conflicts {
            info!(
                "[custody] {} notes differ: customer={:?} facility={:?}",
                conflict.serial, conflict.customer_notes, conflict.facility_notes
            );
        }
        if report.has_discrepancies() {
            warn!(
                "[custody] reconciliation of {}: {} missing at facility, {} unexpected at facility",
                order,
                report.missing_at_facility.len(),
                report.unexpected_at_facility.len()
            );
        }
        info!(
            "[custody] reconciled {}: {} matched ({} promoted to FacilityVerified)",
            order,
            report.matched.len(),
            promoted
        );
        Ok(report)
    }

    /// Captured serials that a correction moved to another record. A
    /// captured serial held again by an active record stays its own.
    fn serial_corrections(&self, order: &ServiceOrderRef) -> CustodyResult<SerialCorrections> {
        let records = self.store.records_for_order(order)?;
        let active: HashSet<_> = records.iter().map(|r| *r.fingerprint()).collect();

        let mut corrections = SerialCorrections::new();
        for record in &records {
            for entry in record.audit() {
                let AuditAction::SerialCorrected { from, .. } = &entry.action else {
                    continue;
                };
                let captured = IntegrityHasher::fingerprint(from)?;
                if !active.contains(&captured) {
                    corrections.insert(
                        captured,
                        ReconciledSerial {
                            serial: record.serial_number().to_string(),
                            fingerprint: *record.fingerprint(),
                        },
                    );
                }
            }
        }
        Ok(corrections)
    }
}
