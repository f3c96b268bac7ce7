//! Integration tests across ingestion, reconciliation, lifecycle and reporting.

pub mod concurrency;
pub mod flows;
pub mod persistence;

use custody_engine::{
    CustodyConfig, CustodyDependencies, CustodyService, InMemoryCustodyStore, LocationType,
    ManualTimeSource, OperatorId, ScanIngestionApi, ServiceOrder, ServiceOrderRef, SessionId,
};
use rust_decimal::Decimal;

/// 2024-03-01T12:00:00Z
pub const MARCH_1: u64 = 1_709_294_400;

/// Service used across the integration suite.
pub type TestService = CustodyService<InMemoryCustodyStore, ManualTimeSource>;

/// Service with one order `SO-100` (manual quantity 12 at 25.50).
pub fn service_with_order(config: CustodyConfig) -> TestService {
    let service = CustodyService::new(
        CustodyDependencies {
            store: InMemoryCustodyStore::new(),
            time_source: ManualTimeSource::new(MARCH_1),
        },
        config,
    );
    service
        .store()
        .register_order(ServiceOrder::new("SO-100", 12, Decimal::new(2550, 2)));
    service
}

/// The order registered by [`service_with_order`].
pub fn order() -> ServiceOrderRef {
    ServiceOrderRef::new("SO-100")
}

/// Open a session, paste `text` into it, and finalize it.
pub fn bulk_session(
    service: &TestService,
    location: LocationType,
    operator: &str,
    text: &str,
) -> SessionId {
    let session = service
        .open_session(&order(), location, OperatorId::new(operator), "", false)
        .unwrap();
    service.submit_bulk(&session.id, text).unwrap();
    service.finalize(&session.id).unwrap();
    session.id
}
