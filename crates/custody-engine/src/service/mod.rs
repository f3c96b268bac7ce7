//! # Custody Service
//!
//! The service implementing the custody inbound ports.
//!
//! ## Architecture
//!
//! - `ingestion`: `ScanIngestionApi` (sessions, single and bulk scans)
//! - `reconciliation`: `ReconciliationApi` (set comparison, acknowledgement gate)
//! - `lifecycle`: `LifecycleApi` (transitions, destruction, audited corrections)
//! - `reporting`: `ReportingApi` (billing quantity, certificate lines, integrity sweep)
//!
//! Every record read for a mutation or a report is re-verified against its
//! fingerprint first; a mismatch aborts the operation. Record and session
//! writes are compare-and-swap, retried up to `conflict_retry_limit` times.

mod ingestion;
mod lifecycle;
mod reconciliation;
mod reporting;

use crate::adapters::{InMemoryCustodyStore, SystemTimeSource};
use crate::algorithms::normalize_serial;
use crate::domain::{
    CustodyConfig, CustodyError, CustodyResult, Fingerprint, IntegrityHasher, ScanSession,
    SerialRecord, ServiceOrder, ServiceOrderRef, SessionId, StoreError, ValidationError,
};
use crate::ports::outbound::{CustodyStore, TimeSource};
use tracing::error;

/// The Custody Service.
///
/// Implements `ScanIngestionApi`, `ReconciliationApi`, `LifecycleApi` and
/// `ReportingApi` over any [`CustodyStore`]. All methods take `&self`; share
/// it across threads behind an `Arc`.
pub struct CustodyService<S, T>
where
    S: CustodyStore,
    T: TimeSource,
{
    /// Persistence for records, sessions, reconciliation results and orders.
    pub(crate) store: S,
    /// Time source for timestamps.
    pub(crate) time_source: T,
    /// Service configuration.
    pub(crate) config: CustodyConfig,
}

/// Dependencies for CustodyService
pub struct CustodyDependencies<S, T> {
    /// Store implementing every outbound persistence port.
    pub store: S,
    /// Clock.
    pub time_source: T,
}

impl<S, T> CustodyService<S, T>
where
    S: CustodyStore,
    T: TimeSource,
{
    /// Create a new Custody Service with the given dependencies.
    pub fn new(deps: CustodyDependencies<S, T>, config: CustodyConfig) -> Self {
        Self {
            store: deps.store,
            time_source: deps.time_source,
            config,
        }
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Clock in use.
    pub fn time_source(&self) -> &T {
        &self.time_source
    }

    /// Active configuration.
    pub fn config(&self) -> &CustodyConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> u64 {
        self.time_source.now()
    }

    /// Normalise and fingerprint a caller-supplied serial.
    pub(crate) fn canonical(&self, raw: &str) -> CustodyResult<(String, Fingerprint)> {
        let serial = normalize_serial(raw, &self.config.ingestion)?;
        let fingerprint = IntegrityHasher::fingerprint(&serial)?;
        Ok((serial, fingerprint))
    }

    pub(crate) fn require_order(&self, order: &ServiceOrderRef) -> CustodyResult<ServiceOrder> {
        self.store
            .find_order(order)?
            .ok_or_else(|| ValidationError::UnknownServiceOrder(order.clone()).into())
    }

    pub(crate) fn require_session(&self, id: &SessionId) -> CustodyResult<ScanSession> {
        self.store
            .get_session(id)?
            .ok_or_else(|| ValidationError::SessionNotFound(*id).into())
    }

    /// Fail closed on a record whose fingerprint no longer matches its serial.
    pub(crate) fn checked(&self, record: SerialRecord) -> CustodyResult<SerialRecord> {
        if let Err(e) = record.verify_integrity() {
            error!(
                "[custody] integrity mismatch on {}/{}: {}",
                record.service_order_ref(),
                record.serial_number(),
                e
            );
            return Err(e);
        }
        Ok(record)
    }

    /// Active, verified record for a caller-supplied serial.
    pub(crate) fn require_record(
        &self,
        order: &ServiceOrderRef,
        serial: &str,
        fingerprint: &Fingerprint,
    ) -> CustodyResult<SerialRecord> {
        let record = self
            .store
            .get_record(order, fingerprint)?
            .ok_or_else(|| ValidationError::RecordNotFound {
                order: order.clone(),
                serial: serial.to_string(),
            })?;
        self.checked(record)
    }

    /// Read-modify-write an active record under compare-and-swap.
    ///
    /// `mutate` runs against a fresh copy on every attempt.
    pub(crate) fn mutate_record<F>(
        &self,
        order: &ServiceOrderRef,
        raw_serial: &str,
        mut mutate: F,
    ) -> CustodyResult<SerialRecord>
    where
        F: FnMut(&mut SerialRecord) -> CustodyResult<()>,
    {
        let (serial, fingerprint) = self.canonical(raw_serial)?;
        self.with_retries(order, &serial, || {
            let mut record = self.require_record(order, &serial, &fingerprint)?;
            let expected = record.version();
            mutate(&mut record)?;
            Ok(self.store.update_record(record, expected))
        })
    }

    /// Run `attempt` until it stops returning `StoreError::Conflict`.
    ///
    /// The outer result carries domain errors, which end the loop; the inner
    /// one is the store write.
    pub(crate) fn with_retries<R, F>(
        &self,
        order: &ServiceOrderRef,
        serial: &str,
        mut attempt: F,
    ) -> CustodyResult<R>
    where
        F: FnMut() -> CustodyResult<Result<R, StoreError>>,
    {
        let limit = self.config.conflict_retry_limit.max(1);
        for n in 1..=limit {
            match attempt()? {
                Ok(value) => return Ok(value),
                Err(StoreError::Conflict { key }) => {
                    tracing::debug!("[custody] conflict on {} (attempt {}/{})", key, n, limit);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CustodyError::ConflictRetriesExhausted {
            order: order.clone(),
            serial: serial.to_string(),
            attempts: limit,
        })
    }
}

impl CustodyService<InMemoryCustodyStore, SystemTimeSource> {
    /// Service over an empty in-memory store and the system clock.
    pub fn in_memory(config: CustodyConfig) -> Self {
        Self::new(
            CustodyDependencies {
                store: InMemoryCustodyStore::new(),
                time_source: SystemTimeSource,
            },
            config,
        )
    }
}
