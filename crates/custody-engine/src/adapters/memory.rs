//! Lock-guarded in-memory store implementing every outbound port.

use crate::algorithms::{Acknowledgement, ReconciliationOutcome};
use crate::domain::{
    Fingerprint, ScanEntry, ScanSession, SerialRecord, ServiceOrder, ServiceOrderRef, SessionId,
    StoreError,
};
use crate::ports::outbound::{
    ReconciliationLedger, ScanSessionStore, SerialRecordStore, ServiceOrderDirectory,
    SessionAppend,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

pub(super) type RecordKey = (ServiceOrderRef, Fingerprint);

#[derive(Default)]
pub(super) struct RecordTable {
    pub(super) active: HashMap<RecordKey, SerialRecord>,
    pub(super) cancelled: Vec<SerialRecord>,
}

/// In-memory implementation of every outbound port.
///
/// Each table sits behind its own `RwLock`; a compare-and-swap holds the
/// write lock for the check and the write, so concurrent writers on the same
/// key see `Conflict` rather than lost updates. Survives restarts only
/// through `save_snapshot` / `load_snapshot`.
#[derive(Default)]
pub struct InMemoryCustodyStore {
    pub(super) orders: RwLock<BTreeMap<ServiceOrderRef, ServiceOrder>>,
    pub(super) records: RwLock<RecordTable>,
    pub(super) sessions: RwLock<HashMap<SessionId, ScanSession>>,
    pub(super) outcomes: RwLock<HashMap<ServiceOrderRef, Vec<ReconciliationOutcome>>>,
}

impl InMemoryCustodyStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an order known to the directory, replacing any previous entry.
    pub fn register_order(&self, order: ServiceOrder) {
        debug!("[custody] registering order {}", order.reference);
        self.orders.write().insert(order.reference.clone(), order);
    }

    /// Number of active records across all orders.
    pub fn record_count(&self) -> usize {
        self.records.read().active.len()
    }
}

fn record_key(record: &SerialRecord) -> RecordKey {
    (record.service_order_ref().clone(), *record.fingerprint())
}

fn describe(key: &RecordKey) -> String {
    format!("record {}/{}", key.0, key.1.to_hex())
}

/// Check the stored version and bump it on the incoming copy.
fn check_version(
    stored: Option<&SerialRecord>,
    key: &RecordKey,
    expected_version: u64,
) -> Result<u64, StoreError> {
    match stored {
        None => Err(StoreError::NotFound { key: describe(key) }),
        Some(current) if current.version() != expected_version => {
            Err(StoreError::Conflict { key: describe(key) })
        }
        Some(_) => Ok(expected_version + 1),
    }
}

impl SerialRecordStore for InMemoryCustodyStore {
    fn get_record(
        &self,
        order: &ServiceOrderRef,
        fingerprint: &Fingerprint,
    ) -> Result<Option<SerialRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .active
            .get(&(order.clone(), *fingerprint))
            .cloned())
    }

    fn insert_record(&self, mut record: SerialRecord) -> Result<SerialRecord, StoreError> {
        let key = record_key(&record);
        let mut table = self.records.write();
        if table.active.contains_key(&key) {
            return Err(StoreError::Conflict { key: describe(&key) });
        }
        record.set_version(0);
        table.active.insert(key, record.clone());
        Ok(record)
    }

    fn update_record(
        &self,
        mut record: SerialRecord,
        expected_version: u64,
    ) -> Result<SerialRecord, StoreError> {
        let key = record_key(&record);
        let mut table = self.records.write();
        let next = check_version(table.active.get(&key), &key, expected_version)?;
        record.set_version(next);
        table.active.insert(key, record.clone());
        Ok(record)
    }

    fn rekey_record(
        &self,
        previous: &Fingerprint,
        mut record: SerialRecord,
        expected_version: u64,
    ) -> Result<SerialRecord, StoreError> {
        let old_key = (record.service_order_ref().clone(), *previous);
        let new_key = record_key(&record);
        let mut table = self.records.write();
        let next = check_version(table.active.get(&old_key), &old_key, expected_version)?;
        if old_key != new_key && table.active.contains_key(&new_key) {
            return Err(StoreError::Conflict {
                key: describe(&new_key),
            });
        }
        record.set_version(next);
        table.active.remove(&old_key);
        table.active.insert(new_key, record.clone());
        Ok(record)
    }

    fn retire_record(
        &self,
        mut record: SerialRecord,
        expected_version: u64,
    ) -> Result<SerialRecord, StoreError> {
        let key = record_key(&record);
        let mut table = self.records.write();
        let next = check_version(table.active.get(&key), &key, expected_version)?;
        record.set_version(next);
        table.active.remove(&key);
        table.cancelled.push(record.clone());
        Ok(record)
    }

    fn records_for_order(&self, order: &ServiceOrderRef) -> Result<Vec<SerialRecord>, StoreError> {
        let mut records: Vec<_> = self
            .records
            .read()
            .active
            .values()
            .filter(|r| r.service_order_ref() == order)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.serial_number().cmp(b.serial_number()));
        Ok(records)
    }

    fn cancelled_records_for_order(
        &self,
        order: &ServiceOrderRef,
    ) -> Result<Vec<SerialRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .cancelled
            .iter()
            .filter(|r| r.service_order_ref() == order)
            .cloned()
            .collect())
    }

    fn orders_with_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<ServiceOrderRef>, StoreError> {
        let mut orders: Vec<_> = self
            .records
            .read()
            .active
            .keys()
            .filter(|(_, fp)| fp == fingerprint)
            .map(|(order, _)| order.clone())
            .collect();
        orders.sort();
        Ok(orders)
    }
}

impl ScanSessionStore for InMemoryCustodyStore {
    fn insert_session(&self, mut session: ScanSession) -> Result<ScanSession, StoreError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict {
                key: format!("session {}", session.id),
            });
        }
        session.set_version(0);
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    fn get_session(&self, id: &SessionId) -> Result<Option<ScanSession>, StoreError> {
        Ok(self.sessions.read().get(id).cloned())
    }

    fn update_session(
        &self,
        mut session: ScanSession,
        expected_version: u64,
    ) -> Result<ScanSession, StoreError> {
        let mut sessions = self.sessions.write();
        let key = format!("session {}", session.id);
        match sessions.get(&session.id) {
            None => return Err(StoreError::NotFound { key }),
            Some(current) if current.version() != expected_version => {
                return Err(StoreError::Conflict { key })
            }
            Some(_) => {}
        }
        session.set_version(expected_version + 1);
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    fn append_entry(&self, id: &SessionId, entry: ScanEntry) -> Result<SessionAppend, StoreError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(id).ok_or_else(|| StoreError::NotFound {
            key: format!("session {id}"),
        })?;
        match session.append(entry) {
            Ok(repeat) => {
                let version = session.version() + 1;
                session.set_version(version);
                Ok(SessionAppend::Appended { repeat, version })
            }
            Err(_) => Ok(SessionAppend::Closed),
        }
    }

    fn sessions_for_order(&self, order: &ServiceOrderRef) -> Result<Vec<ScanSession>, StoreError> {
        let mut sessions: Vec<_> = self
            .sessions
            .read()
            .values()
            .filter(|s| &s.service_order_ref == order)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| (a.started_at, a.id).cmp(&(b.started_at, b.id)));
        Ok(sessions)
    }
}

impl ReconciliationLedger for InMemoryCustodyStore {
    fn save_outcome(&self, outcome: ReconciliationOutcome) -> Result<(), StoreError> {
        self.outcomes
            .write()
            .entry(outcome.report.service_order_ref.clone())
            .or_default()
            .push(outcome);
        Ok(())
    }

    fn latest_outcome(
        &self,
        order: &ServiceOrderRef,
    ) -> Result<Option<ReconciliationOutcome>, StoreError> {
        Ok(self
            .outcomes
            .read()
            .get(order)
            .and_then(|runs| runs.last())
            .cloned())
    }

    fn acknowledge_latest(
        &self,
        order: &ServiceOrderRef,
        acknowledgement: Acknowledgement,
    ) -> Result<ReconciliationOutcome, StoreError> {
        let mut outcomes = self.outcomes.write();
        let latest = outcomes
            .get_mut(order)
            .and_then(|runs| runs.last_mut())
            .ok_or_else(|| StoreError::NotFound {
                key: format!("reconciliation {order}"),
            })?;
        if latest.report.digest() != acknowledgement.digest {
            return Err(StoreError::Conflict {
                key: format!("reconciliation {order}"),
            });
        }
        latest.acknowledgement = Some(acknowledgement);
        Ok(latest.clone())
    }
}

impl ServiceOrderDirectory for InMemoryCustodyStore {
    fn find_order(&self, reference: &ServiceOrderRef) -> Result<Option<ServiceOrder>, StoreError> {
        Ok(self.orders.read().get(reference).cloned())
    }
}
