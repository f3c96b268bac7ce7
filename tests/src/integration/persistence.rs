//! # Persistence
//!
//! JSON snapshots across a restart, tampered snapshots, and logging setup.

#[cfg(test)]
mod tests {
    use super::super::{bulk_session, order, service_with_order, MARCH_1};
    use custody_engine::{
        CustodyConfig, CustodyDependencies, CustodyError, CustodyService, InMemoryCustodyStore,
        LifecycleApi, LifecycleState, LocationType, ManualTimeSource, OperatorId,
        ReconciliationApi, ReportingApi, ScanIngestionApi,
    };
    use custody_telemetry::{init_logging, TelemetryConfig};
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn restart(
        store: InMemoryCustodyStore,
    ) -> CustodyService<InMemoryCustodyStore, ManualTimeSource> {
        CustodyService::new(
            CustodyDependencies {
                store,
                time_source: ManualTimeSource::new(MARCH_1 + 86_400),
            },
            CustodyConfig::default(),
        )
    }

    #[test]
    fn test_snapshot_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custody.json");

        let service = service_with_order(CustodyConfig::default());
        bulk_session(&service, LocationType::Customer, "driver-1", "A1\nA2\nA3");
        bulk_session(&service, LocationType::Facility, "tech-1", "A1\nA2");
        let before = service.reconcile_order(&order()).unwrap();
        service
            .acknowledge_discrepancies(&order(), OperatorId::new("supervisor"))
            .unwrap();
        service.store().save_snapshot(&path).unwrap();

        let service = restart(InMemoryCustodyStore::load_snapshot(&path).unwrap());
        assert_eq!(service.verify_order_integrity(&order()).unwrap(), 3);
        assert_eq!(service.sessions_for_order(&order()).unwrap().len(), 2);
        let latest = service.latest_reconciliation(&order()).unwrap();
        assert_eq!(latest.map(|o| o.report), Some(before));
        assert!(service.destruction_gate(&order()).is_ok());
        assert_eq!(
            service.get_record(&order(), "A1").unwrap().lifecycle_state(),
            LifecycleState::FacilityVerified
        );
        // Billing reads the restored records, rate included.
        assert_eq!(service.resolve_quantity(&order()).unwrap().quantity, 2);
    }

    #[test]
    fn test_tampered_snapshot_fails_closed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custody.json");

        let service = service_with_order(CustodyConfig::default());
        bulk_session(&service, LocationType::Customer, "driver-1", "A1");
        service.store().save_snapshot(&path).unwrap();

        let mut json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        json["records"][0]["serial_number"] = serde_json::json!("A7");
        std::fs::write(&path, serde_json::to_string_pretty(&json).unwrap()).unwrap();

        let service = restart(InMemoryCustodyStore::load_snapshot(&path).unwrap());
        let err = service.verify_order_integrity(&order()).unwrap_err();
        assert!(matches!(err, CustodyError::IntegrityMismatch { .. }));
        assert!(err.is_fatal());
        assert!(service.certificate_lines(&order()).is_err());
        assert!(service.resolve_quantity(&order()).is_err());
    }

    #[test]
    fn test_corrupt_snapshot_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custody.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(InMemoryCustodyStore::load_snapshot(&path).is_err());
        assert!(InMemoryCustodyStore::load_snapshot(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_logging_installs_once() {
        let config = TelemetryConfig::default().with_service_name("custody-tests");
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());

        // Engine calls log through whatever subscriber is installed.
        let service = service_with_order(CustodyConfig::default());
        bulk_session(&service, LocationType::Customer, "driver-1", "LOGGED-1");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_bulk_paste_makes_one_record_per_distinct_serial(
            serials in prop::collection::vec("[a-c][0-9]{1,2}", 1..40)
        ) {
            let service = service_with_order(CustodyConfig::default());
            let paste = serials.join("\n");
            bulk_session(&service, LocationType::Customer, "driver-1", &paste);

            let mut distinct: Vec<_> = serials.iter().map(|s| s.to_uppercase()).collect();
            distinct.sort();
            distinct.dedup();
            prop_assert_eq!(service.store().record_count(), distinct.len());

            let session = &service.sessions_for_order(&order()).unwrap()[0];
            prop_assert_eq!(session.entries().len(), distinct.len());
        }
    }
}
