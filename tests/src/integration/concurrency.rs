//! # Concurrency
//!
//! Several operators scanning into one order at once, each in their own
//! session, sharing one service behind an `Arc`.

#[cfg(test)]
mod tests {
    use super::super::{order, service_with_order, TestService};
    use custody_engine::{
        CustodyConfig, LifecycleApi, LifecycleState, LocationType, OperatorId, ReportingApi,
        ScanIngestionApi, SessionId,
    };
    use std::sync::{Arc, Barrier};
    use std::thread;

    const OPERATORS: usize = 8;

    fn sessions(service: &TestService, location: LocationType) -> Vec<SessionId> {
        sessions_for(service, location, OPERATORS)
    }

    fn sessions_for(service: &TestService, location: LocationType, count: usize) -> Vec<SessionId> {
        (0..count)
            .map(|n| {
                let operator = OperatorId::new(format!("op-{n}"));
                service
                    .open_session(&order(), location, operator, "", false)
                    .unwrap()
                    .id
            })
            .collect()
    }

    fn config() -> CustodyConfig {
        // A writer loses at most one race per other writer on the same serial.
        CustodyConfig {
            conflict_retry_limit: OPERATORS as u32 + 1,
            ..CustodyConfig::default()
        }
    }

    #[test]
    fn test_parallel_scans_of_one_serial_make_one_record() {
        let service = Arc::new(service_with_order(config()));
        let barrier = Arc::new(Barrier::new(OPERATORS));

        let handles: Vec<_> = sessions(&service, LocationType::Customer)
            .into_iter()
            .map(|session| {
                let service = Arc::clone(&service);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    service.submit_single(&session, "SHARED-1").unwrap()
                })
            })
            .collect();
        let submissions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(submissions.iter().filter(|s| s.is_new).count(), 1);
        assert_eq!(service.store().record_count(), 1);

        let record = service.get_record(&order(), "SHARED-1").unwrap();
        assert_eq!(record.lifecycle_state(), LifecycleState::CustomerScanned);
        // One registration, one scan per operator.
        assert_eq!(record.audit().len(), OPERATORS + 1);
    }

    #[test]
    fn test_default_retry_limit_covers_as_many_writers() {
        let config = CustodyConfig::default();
        let writers = config.conflict_retry_limit as usize;
        let service = Arc::new(service_with_order(config));
        let barrier = Arc::new(Barrier::new(writers));
        let paste: String = (0..40).map(|n| format!("DL-{n:03}\n")).collect();

        for location in [LocationType::Customer, LocationType::Facility] {
            let handles: Vec<_> = sessions_for(&service, location, writers)
                .into_iter()
                .map(|session| {
                    let service = Arc::clone(&service);
                    let barrier = Arc::clone(&barrier);
                    let paste = paste.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        let results = service.submit_bulk(&session, &paste).unwrap();
                        service.finalize(&session).unwrap();
                        results.len()
                    })
                })
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), 40);
            }
        }

        let summary = service.order_summary(&order()).unwrap();
        assert_eq!(summary.by_state.get(&LifecycleState::FacilityVerified), Some(&40));
        let record = service.get_record(&order(), "DL-000").unwrap();
        // registration plus one scan per session on each side
        assert_eq!(record.audit().len(), 2 * writers + 1);
    }

    #[test]
    fn test_parallel_bulk_pastes_keep_one_record_per_serial() {
        let service = Arc::new(service_with_order(config()));
        let barrier = Arc::new(Barrier::new(OPERATORS));
        let paste: String = (0..50).map(|n| format!("SN-{n:03}\n")).collect();

        let handles: Vec<_> = sessions(&service, LocationType::Customer)
            .into_iter()
            .map(|session| {
                let service = Arc::clone(&service);
                let barrier = Arc::clone(&barrier);
                let paste = paste.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let results = service.submit_bulk(&session, &paste).unwrap();
                    service.finalize(&session).unwrap();
                    results.len()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 50);
        }

        assert_eq!(service.store().record_count(), 50);
        assert_eq!(service.verify_order_integrity(&order()).unwrap(), 50);
        let summary = service.order_summary(&order()).unwrap();
        assert_eq!(summary.by_state.get(&LifecycleState::CustomerScanned), Some(&50));
        assert_eq!(summary.closed_sessions, OPERATORS);
    }
}
