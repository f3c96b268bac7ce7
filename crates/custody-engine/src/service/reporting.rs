//! Settled-state reads: billing, certificate, summaries and integrity sweeps.

use super::CustodyService;
use crate::algorithms::{BillingQuantity, BillingQuantityResolver, CertificateLineComposer};
use crate::domain::{CustodyResult, SerialRecord, ServiceOrderRef};
use crate::ports::inbound::{CrossOrderCollision, OrderSummary, ReportingApi, ScanIngestionApi};
use crate::ports::outbound::{CustodyStore, TimeSource};
use tracing::{debug, info};

impl<S, T> ReportingApi for CustodyService<S, T>
where
    S: CustodyStore,
    T: TimeSource,
{
    fn resolve_quantity(&self, order: &ServiceOrderRef) -> CustodyResult<BillingQuantity> {
        let service_order = self.require_order(order)?;
        let records = self.verified_records(order)?;
        let quantity = BillingQuantityResolver::resolve_quantity(&service_order, &records);
        info!(
            "[custody] {} billable: {} x {} = {} ({:?})",
            order, quantity.quantity, quantity.unit_rate, quantity.total, quantity.source
        );
        Ok(quantity)
    }

    fn certificate_lines(&self, order: &ServiceOrderRef) -> CustodyResult<Vec<String>> {
        self.require_order(order)?;
        let records = self.verified_records(order)?;
        let lines =
            CertificateLineComposer::compose_lines(&records, &self.config.certificate_date_format);
        debug!("[custody] {} certificate lines for {}", lines.len(), order);
        Ok(lines)
    }

    fn order_summary(&self, order: &ServiceOrderRef) -> CustodyResult<OrderSummary> {
        let mut summary = OrderSummary::default();
        for record in self.verified_records(order)? {
            *summary.by_state.entry(record.lifecycle_state()).or_default() += 1;
        }
        summary.cancelled = self.store.cancelled_records_for_order(order)?.len();
        for session in self.sessions_for_order(order)? {
            if session.is_open() {
                summary.open_sessions += 1;
            } else {
                summary.closed_sessions += 1;
            }
        }
        Ok(summary)
    }

    fn verify_order_integrity(&self, order: &ServiceOrderRef) -> CustodyResult<usize> {
        self.require_order(order)?;
        let mut checked = 0usize;
        let active = self.store.records_for_order(order)?;
        let cancelled = self.store.cancelled_records_for_order(order)?;
        for record in active.into_iter().chain(cancelled) {
            self.checked(record)?;
            checked += 1;
        }
        info!("[custody] integrity verified for {} records of {}", checked, order);
        Ok(checked)
    }

    fn cross_order_collisions(
        &self,
        order: &ServiceOrderRef,
    ) -> CustodyResult<Vec<CrossOrderCollision>> {
        let mut out = Vec::new();
        for record in self.verified_records(order)? {
            let other_orders: Vec<_> = self
                .store
                .orders_with_fingerprint(record.fingerprint())?
                .into_iter()
                .filter(|o| o != order)
                .collect();
            if !other_orders.is_empty() {
                out.push(CrossOrderCollision {
                    serial: record.serial_number().to_string(),
                    fingerprint: *record.fingerprint(),
                    other_orders,
                });
            }
        }
        Ok(out)
    }
}

impl<S, T> CustodyService<S, T>
where
    S: CustodyStore,
    T: TimeSource,
{
    /// Active records of a known order, each checked against its fingerprint.
    fn verified_records(&self, order: &ServiceOrderRef) -> CustodyResult<Vec<SerialRecord>> {
        self.require_order(order)?;
        self.store
            .records_for_order(order)?
            .into_iter()
            .map(|r| self.checked(r))
            .collect()
    }
}
