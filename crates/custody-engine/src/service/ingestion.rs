//! Scan capture: sessions, single and bulk submission.

use super::CustodyService;
use crate::algorithms::split_bulk;
use crate::domain::{
    CustodyResult, EventContext, Fingerprint, LifecycleEvent, LifecycleState,
    LifecycleStateMachine, LocationType, OperatorId, Override, Precondition, ScanEntry,
    ScanSession, SerialRecord, ServiceOrderRef, SessionId, Transition, ValidationError,
};
use crate::ports::inbound::{LineOutcome, LineResult, ScanIngestionApi, SingleSubmission};
use crate::ports::outbound::{CustodyStore, SessionAppend, TimeSource};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// What a scan did to its record.
struct ScanStep {
    record: SerialRecord,
    is_new: bool,
    transition: Option<Transition>,
    deferred: Option<Precondition>,
}

impl<S, T> ScanIngestionApi for CustodyService<S, T>
where
    S: CustodyStore,
    T: TimeSource,
{
    fn open_session(
        &self,
        order: &ServiceOrderRef,
        location: LocationType,
        operator: OperatorId,
        notes: &str,
        allow_out_of_sequence: bool,
    ) -> CustodyResult<ScanSession> {
        self.require_order(order)?;
        let mut session = ScanSession::open(order.clone(), location, operator, self.now(), notes);
        session.allow_out_of_sequence = allow_out_of_sequence;
        let session = self.store.insert_session(session)?;

        info!(
            "[custody] session {} opened: order={} location={} operator={}",
            session.id, session.service_order_ref, session.location_type, session.operator
        );
        if allow_out_of_sequence {
            warn!(
                "[custody] session {} accepts out-of-sequence facility receipt",
                session.id
            );
        }
        Ok(session)
    }

    fn submit_single(
        &self,
        session: &SessionId,
        raw_serial: &str,
    ) -> CustodyResult<SingleSubmission> {
        let session = self.writable_session(session)?;
        self.ingest(&session, raw_serial, raw_serial, None)
    }

    fn submit_bulk(&self, session: &SessionId, raw_text: &str) -> CustodyResult<Vec<LineResult>> {
        let session = self.writable_session(session)?;
        let mut first_seen: HashMap<Fingerprint, usize> = HashMap::new();
        let mut results = Vec::new();

        for line in split_bulk(raw_text) {
            let outcome = match self.canonical(&line.serial) {
                Err(reason) => LineOutcome::Rejected { reason },
                Ok((_, fingerprint)) => match first_seen.get(&fingerprint) {
                    Some(&first_line) => LineOutcome::DuplicateInBatch { first_line },
                    None => {
                        first_seen.insert(fingerprint, line.line_no);
                        match self.ingest(&session, &line.raw, &line.serial, line.notes.clone()) {
                            Ok(sub) if sub.is_repeat() => {
                                LineOutcome::DuplicateOfExisting { record: sub.record }
                            }
                            Ok(sub) => LineOutcome::Accepted {
                                record: sub.record,
                                is_new: sub.is_new,
                                deferred: sub.deferred,
                            },
                            Err(e) if e.is_fatal() => {
                                error!(
                                    "[custody] bulk submission to {} aborted at line {}: {}",
                                    session.id,
                                    line.line_no,
                                    e
                                );
                                return Err(e);
                            }
                            Err(reason) => LineOutcome::Rejected { reason },
                        }
                    }
                },
            };
            results.push(LineResult {
                line_no: line.line_no,
                raw: line.raw,
                outcome,
            });
        }

        let accepted = results
            .iter()
            .filter(|r| matches!(r.outcome, LineOutcome::Accepted { .. }))
            .count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r.outcome, LineOutcome::Rejected { .. }))
            .count();
        info!(
            "[custody] bulk submission to session {}: {} lines, {} accepted, {} rejected",
            session.id,
            results.len(),
            accepted,
            rejected
        );
        Ok(results)
    }

    fn finalize(&self, session: &SessionId) -> CustodyResult<ScanSession> {
        let current = self.require_session(session)?;
        let at = self.now();
        let label = format!("session {session}");
        let closed = self.with_retries(&current.service_order_ref, &label, || {
            let mut s = self.require_session(session)?;
            let expected = s.version();
            s.finalize(at)?;
            Ok(self.store.update_session(s, expected))
        })?;
        info!(
            "[custody] session {} finalized with {} entries",
            closed.id,
            closed.entries().len()
        );
        Ok(closed)
    }

    fn get_session(&self, session: &SessionId) -> CustodyResult<ScanSession> {
        self.require_session(session)
    }

    fn sessions_for_order(&self, order: &ServiceOrderRef) -> CustodyResult<Vec<ScanSession>> {
        self.require_order(order)?;
        Ok(self.store.sessions_for_order(order)?)
    }
}

impl<S, T> CustodyService<S, T>
where
    S: CustodyStore,
    T: TimeSource,
{
    /// Session-level checks that abort a whole submission.
    fn writable_session(&self, id: &SessionId) -> CustodyResult<ScanSession> {
        let session = self.require_session(id)?;
        session.ensure_open()?;
        self.require_order(&session.service_order_ref)?;
        Ok(session)
    }

    /// Apply one entry.
    ///
    /// The session append comes first and decides whether the serial is new
    /// to the session. Only a first sighting drives the record, so a refused
    /// append leaves the record untouched and repeats never scan twice.
    fn ingest(
        &self,
        session: &ScanSession,
        raw: &str,
        serial_text: &str,
        notes: Option<String>,
    ) -> CustodyResult<SingleSubmission> {
        let (serial, fingerprint) = self.canonical(serial_text)?;
        let order = &session.service_order_ref;
        let at = self.now();
        let ctx = EventContext::new(at, session.operator.clone()).with_notes(notes);

        // a destroyed record takes no scans; refuse before the session sees it
        if let Some(record) = self.store.get_record(order, &fingerprint)? {
            let record = self.checked(record)?;
            LifecycleStateMachine::next_state(
                record.lifecycle_state(),
                LifecycleEvent::scan_at(session.location_type),
                true,
            )?;
        }

        let entry = ScanEntry {
            raw: raw.to_string(),
            serial: serial.clone(),
            fingerprint,
            notes: ctx.notes.clone().unwrap_or_default(),
            at,
        };
        let already_in_session = match self.store.append_entry(&session.id, entry)? {
            SessionAppend::Appended { repeat, .. } => repeat,
            SessionAppend::Closed => {
                return Err(ValidationError::SessionClosed(session.id).into());
            }
        };

        let step = if already_in_session {
            self.repeat_step(session, &serial, &fingerprint, &ctx)
        } else {
            self.upsert(session, &serial, &fingerprint, &ctx)
        };
        let step = step.inspect_err(|e| {
            error!(
                "[custody] {} is in session {} but its record was not updated: {}",
                serial, session.id, e
            )
        })?;

        let collisions = if step.is_new {
            self.collisions_for(order, &serial, &fingerprint)?
        } else {
            Vec::new()
        };

        debug!(
            "[custody] {} scanned at {} for {}: state={} new={} repeat={}",
            serial,
            session.location_type,
            order,
            step.record.lifecycle_state(),
            step.is_new,
            already_in_session
        );

        Ok(SingleSubmission {
            record: step.record,
            is_new: step.is_new,
            already_in_session,
            transition: step.transition,
            deferred: step.deferred,
            collisions,
        })
    }

    /// Record for a serial the session already holds; the scan is not
    /// applied again. The first sighting may still be writing the record, in
    /// which case it is registered here and that sighting's scan lands on it.
    fn repeat_step(
        &self,
        session: &ScanSession,
        serial: &str,
        fingerprint: &Fingerprint,
        ctx: &EventContext,
    ) -> CustodyResult<ScanStep> {
        let order = &session.service_order_ref;
        self.with_retries(order, serial, || match self.store.get_record(order, fingerprint)? {
            Some(record) => Ok(Ok(ScanStep {
                record: self.checked(record)?,
                is_new: false,
                transition: None,
                deferred: None,
            })),
            None => {
                let record = SerialRecord::register(order.clone(), serial, ctx)?;
                Ok(self.store.insert_record(record).map(|record| ScanStep {
                    record,
                    is_new: true,
                    transition: None,
                    deferred: None,
                }))
            }
        })
    }

    /// Create-or-update under compare-and-swap. A lost insert race re-reads
    /// and applies the scan to the winner's record.
    fn upsert(
        &self,
        session: &ScanSession,
        serial: &str,
        fingerprint: &Fingerprint,
        ctx: &EventContext,
    ) -> CustodyResult<ScanStep> {
        let order = &session.service_order_ref;
        self.with_retries(order, serial, || match self.store.get_record(order, fingerprint)? {
            None => {
                let mut record = SerialRecord::register(order.clone(), serial, ctx)?;
                let (transition, deferred) = self.apply_scan(&mut record, session, ctx)?;
                Ok(self.store.insert_record(record).map(|record| {
                    info!("[custody] registered {} on {}", record.serial_number(), order);
                    ScanStep {
                        record,
                        is_new: true,
                        transition,
                        deferred,
                    }
                }))
            }
            Some(record) => {
                let mut record = self.checked(record)?;
                let expected = record.version();
                let (transition, deferred) = self.apply_scan(&mut record, session, ctx)?;
                Ok(self
                    .store
                    .update_record(record, expected)
                    .map(|record| ScanStep {
                        record,
                        is_new: false,
                        transition,
                        deferred,
                    }))
            }
        })
    }

    /// Drive the record with the session's scan event.
    ///
    /// Facility receipt of a record never scanned at the customer is only
    /// applied when the session allows it; otherwise it is recorded as an
    /// unverified sighting and left for reconciliation.
    fn apply_scan(
        &self,
        record: &mut SerialRecord,
        session: &ScanSession,
        ctx: &EventContext,
    ) -> CustodyResult<(Option<Transition>, Option<Precondition>)> {
        let location = session.location_type;
        let out_of_sequence = location == LocationType::Facility
            && record.lifecycle_state() == LifecycleState::Registered;
        if !out_of_sequence {
            let transition = record.apply_event(LifecycleEvent::scan_at(location), ctx)?;
            return Ok((Some(transition), None));
        }

        if !session.allow_out_of_sequence {
            record.record_sighting(location, ctx);
            info!(
                "[custody] {} received at facility without customer scan; awaiting reconciliation",
                record.serial_number()
            );
            return Ok((None, Some(Precondition::OverrideRequired)));
        }

        let ctx = ctx.clone().with_authorization(Some(Override {
            authorized_by: session.operator.clone(),
            reason: format!("session {} allows out-of-sequence receipt", session.id),
        }));
        let transition = record.apply_event(LifecycleEvent::FacilityScan, &ctx)?;
        warn!(
            "[custody] {} verified at facility without customer scan (override by {})",
            record.serial_number(),
            session.operator
        );
        Ok((Some(transition), None))
    }

    fn collisions_for(
        &self,
        order: &ServiceOrderRef,
        serial: &str,
        fingerprint: &Fingerprint,
    ) -> CustodyResult<Vec<ServiceOrderRef>> {
        let others: Vec<_> = self
            .store
            .orders_with_fingerprint(fingerprint)?
            .into_iter()
            .filter(|o| o != order)
            .collect();
        if !others.is_empty() {
            let list: Vec<_> = others.iter().map(ServiceOrderRef::as_str).collect();
            warn!(
                "[custody] serial {} on {} is also active on {}",
                serial,
                order,
                list.join(", ")
            );
        }
        Ok(others)
    }
}
