//! JSON snapshots of the in-memory store.
//!
//! Records are written exactly as held, fingerprints included. Nothing is
//! recomputed on load: a serial edited by hand in the file keeps its old
//! fingerprint and fails integrity verification the next time it is used.

use super::memory::{InMemoryCustodyStore, RecordTable};
use crate::algorithms::ReconciliationOutcome;
use crate::domain::{ScanSession, SerialRecord, ServiceOrder, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Snapshot layout version.
pub const SNAPSHOT_FORMAT: u32 = 1;

/// Serializable image of the whole store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CustodySnapshot {
    /// Layout version.
    pub format: u32,
    /// Known service orders.
    pub orders: Vec<ServiceOrder>,
    /// Active records.
    pub records: Vec<SerialRecord>,
    /// Cancelled records.
    pub cancelled: Vec<SerialRecord>,
    /// All sessions, open or closed.
    pub sessions: Vec<ScanSession>,
    /// Reconciliation runs, oldest first per order.
    pub outcomes: Vec<ReconciliationOutcome>,
}

impl InMemoryCustodyStore {
    /// Consistent image of the current contents.
    pub fn snapshot(&self) -> CustodySnapshot {
        let orders = self.orders.read().values().cloned().collect();

        let (mut records, cancelled) = {
            let table = self.records.read();
            (
                table.active.values().cloned().collect::<Vec<_>>(),
                table.cancelled.clone(),
            )
        };
        records.sort_by(|a, b| {
            let key_a = (a.service_order_ref(), a.serial_number());
            key_a.cmp(&(b.service_order_ref(), b.serial_number()))
        });

        let mut sessions: Vec<_> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| (a.started_at, a.id).cmp(&(b.started_at, b.id)));

        let outcomes = {
            let ledger = self.outcomes.read();
            let mut orders: Vec<_> = ledger.keys().cloned().collect();
            orders.sort();
            orders
                .iter()
                .filter_map(|o| ledger.get(o))
                .flat_map(|runs| runs.iter().cloned())
                .collect()
        };

        CustodySnapshot {
            format: SNAPSHOT_FORMAT,
            orders,
            records,
            cancelled,
            sessions,
            outcomes,
        }
    }

    /// Rebuild a store from a snapshot.
    pub fn from_snapshot(snapshot: CustodySnapshot) -> Result<Self, StoreError> {
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(StoreError::Serialization(format!(
                "unsupported snapshot format {}",
                snapshot.format
            )));
        }

        let store = Self::new();
        for order in snapshot.orders {
            store.register_order(order);
        }
        {
            let mut table = store.records.write();
            *table = RecordTable {
                active: HashMap::with_capacity(snapshot.records.len()),
                cancelled: snapshot.cancelled,
            };
            for record in snapshot.records {
                let key = (record.service_order_ref().clone(), *record.fingerprint());
                if table.active.insert(key, record).is_some() {
                    return Err(StoreError::Serialization(
                        "snapshot holds two active records for one serial".to_string(),
                    ));
                }
            }
        }
        {
            let mut sessions = store.sessions.write();
            for session in snapshot.sessions {
                sessions.insert(session.id, session);
            }
        }
        {
            let mut ledger = store.outcomes.write();
            for outcome in snapshot.outcomes {
                ledger
                    .entry(outcome.report.service_order_ref.clone())
                    .or_default()
                    .push(outcome);
            }
        }
        Ok(store)
    }

    /// Write the snapshot as pretty JSON.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = self.snapshot();
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        fs::write(path, json).map_err(|e| StoreError::Io(format!("{}: {e}", path.display())))?;
        info!(
            "[custody] snapshot saved to {} ({} records, {} sessions)",
            path.display(),
            snapshot.records.len(),
            snapshot.sessions.len()
        );
        Ok(())
    }

    /// Read a snapshot written by [`save_snapshot`](Self::save_snapshot).
    pub fn load_snapshot(path: &Path) -> Result<Self, StoreError> {
        let json = fs::read_to_string(path)
            .map_err(|e| StoreError::Io(format!("{}: {e}", path.display())))?;
        let snapshot: CustodySnapshot =
            serde_json::from_str(&json).map_err(|e| StoreError::Serialization(e.to_string()))?;
        info!(
            "[custody] snapshot loaded from {} ({} records, {} sessions)",
            path.display(),
            snapshot.records.len(),
            snapshot.sessions.len()
        );
        Self::from_snapshot(snapshot)
    }
}
