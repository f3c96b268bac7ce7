//! # Custody Flows
//!
//! Customer pickup, facility receipt, reconciliation, destruction, billing and
//! certificate, driven only through the inbound ports.

#[cfg(test)]
mod tests {
    use super::super::{bulk_session, order, service_with_order};
    use custody_engine::{
        Actor, CustodyConfig, CustodyError, DestructionMethod, DiscrepancyKind, LifecycleApi,
        LifecycleEvent, LifecycleState, LocationType, OperatorId, QuantitySource,
        ReconciledSerial, ReconciliationApi, ReportingApi, ScanIngestionApi, Severity,
    };
    use rust_decimal::Decimal;

    fn serials(set: &[ReconciledSerial]) -> Vec<String> {
        set.iter().map(|s| s.serial.clone()).collect()
    }

    const CUSTOMER_PICKUP: &str = "WD-001, dented\nWD-002\n\nWD-003\nWD-00B\n";
    const FACILITY_RECEIPT: &str = "WD-001\tscratched\nwd-002\nWD-008\nWD-009\n";

    #[test]
    fn test_pickup_to_certificate() {
        let service = service_with_order(CustodyConfig::default());
        let tech = Actor::operator("tech-1");

        // Customer site
        bulk_session(&service, LocationType::Customer, "driver-1", CUSTOMER_PICKUP);
        let quantity = service.resolve_quantity(&order()).unwrap();
        assert_eq!(quantity.source, QuantitySource::ScanningIncomplete);
        assert_eq!(quantity.quantity, 0);

        // Facility
        service.time_source().advance(3_600);
        bulk_session(&service, LocationType::Facility, "tech-1", FACILITY_RECEIPT);

        let report = service.reconcile_order(&order()).unwrap();
        assert_eq!(serials(&report.matched), ["WD-001", "WD-002"]);
        assert_eq!(serials(&report.missing_at_facility), ["WD-003", "WD-00B"]);
        assert_eq!(serials(&report.unexpected_at_facility), ["WD-008", "WD-009"]);
        assert_eq!(report.note_conflicts.len(), 1);
        assert_eq!(report.note_conflicts[0].customer_notes, "dented");
        assert_eq!(report.note_conflicts[0].facility_notes, "scratched");

        let warnings = report.warnings();
        assert_eq!(warnings.len(), 5);
        assert_eq!(warnings[0].kind, DiscrepancyKind::UnexpectedAtFacility);
        assert_eq!(warnings[0].severity, Severity::Error);
        assert_eq!(warnings[4].kind, DiscrepancyKind::NoteConflict);

        // Gate holds until someone signs off.
        let blocked = service.mark_order_destroyed(&order(), DestructionMethod::Shred, &tech);
        assert_eq!(
            blocked.unwrap_err(),
            CustodyError::DiscrepancyUnacknowledged { order: order() }
        );
        let outcome = service
            .acknowledge_discrepancies(&order(), OperatorId::new("supervisor"))
            .unwrap();
        assert_eq!(
            outcome.acknowledgement.map(|a| a.digest),
            Some(report.digest())
        );

        service.time_source().advance(3_600);
        let lines = service
            .mark_order_destroyed(&order(), DestructionMethod::Shred, &tech)
            .unwrap();
        let destroyed: Vec<_> = lines.iter().map(|l| l.serial.as_str()).collect();
        assert_eq!(destroyed, ["WD-001", "WD-002"]);

        // WD-008 arrived without a pickup scan; a supervisor vouches for it.
        let vouched =
            Actor::operator("tech-1").with_override("supervisor", "on the pickup manifest");
        service
            .apply_event(&order(), "wd-008", LifecycleEvent::FacilityScan, &vouched)
            .unwrap();
        service
            .mark_destroyed(&order(), "WD-008", DestructionMethod::Degauss, &tech)
            .unwrap();

        assert_eq!(
            service.certificate_lines(&order()).unwrap(),
            [
                "WD-001 | Shred | 2024-03-01",
                "WD-002 | Shred | 2024-03-01",
                "WD-008 | Degauss | 2024-03-01",
            ]
        );

        let quantity = service.resolve_quantity(&order()).unwrap();
        assert_eq!(quantity.source, QuantitySource::Scanned);
        assert_eq!(quantity.quantity, 3);
        assert_eq!(quantity.total, Decimal::new(7650, 2));

        let summary = service.order_summary(&order()).unwrap();
        assert_eq!(summary.by_state.get(&LifecycleState::Destroyed), Some(&3));
        assert_eq!(summary.by_state.get(&LifecycleState::CustomerScanned), Some(&2));
        assert_eq!(summary.by_state.get(&LifecycleState::Registered), Some(&1));
        assert_eq!(summary.closed_sessions, 2);
        assert_eq!(summary.open_sessions, 0);

        for serial in ["WD-001", "WD-002", "WD-008"] {
            let record = service.get_record(&order(), serial).unwrap();
            assert!(record.destruction_consistent(), "{serial}");
        }
        assert_eq!(service.verify_order_integrity(&order()).unwrap(), 6);
    }

    #[test]
    fn test_customer_notes_survive_facility_rescan() {
        let service = service_with_order(CustodyConfig::default());
        bulk_session(&service, LocationType::Customer, "driver-1", "SN-9, cracked bezel");
        bulk_session(&service, LocationType::Facility, "tech-1", "SN-9");

        let record = service.get_record(&order(), "SN-9").unwrap();
        assert_eq!(record.lifecycle_state(), LifecycleState::FacilityVerified);
        assert_eq!(record.customer_scan().notes, "cracked bezel");
        assert_eq!(record.effective_notes(), "cracked bezel");
    }

    #[test]
    fn test_manual_quantity_until_first_scan() {
        let service = service_with_order(CustodyConfig::default());
        let quantity = service.resolve_quantity(&order()).unwrap();
        assert_eq!(quantity.source, QuantitySource::Manual);
        assert_eq!(quantity.quantity, 12);
        assert_eq!(quantity.total, Decimal::new(30600, 2));
    }

    #[test]
    fn test_cancelled_record_leaves_certificate_and_bill() {
        let service = service_with_order(CustodyConfig::default());
        bulk_session(&service, LocationType::Customer, "driver-1", "A1\nA2");
        bulk_session(&service, LocationType::Facility, "tech-1", "A1\nA2");
        service.reconcile_order(&order()).unwrap();

        let lead = Actor::operator("lead");
        service
            .cancel_record(&order(), "A2", &lead, "scanned onto the wrong order")
            .unwrap();
        service
            .mark_order_destroyed(&order(), DestructionMethod::Crush, &lead)
            .unwrap();

        assert_eq!(
            service.certificate_lines(&order()).unwrap(),
            ["A1 | Crush | 2024-03-01"]
        );
        assert_eq!(service.resolve_quantity(&order()).unwrap().quantity, 1);
        assert_eq!(service.order_summary(&order()).unwrap().cancelled, 1);
    }
}
