//! # Billing Quantity Resolver
//!
//! Scanned counts take precedence over the manually entered quantity once
//! scanning has been used on an order. Pure read, no side effects.

use crate::domain::{SerialRecord, ServiceOrder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Where the billed quantity came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantitySource {
    /// Count of facility-verified (or destroyed) records.
    Scanned,
    /// No records exist; the order's manual quantity is used.
    Manual,
    /// Records exist but none has been verified at the facility yet.
    ScanningIncomplete,
}

/// Billable quantity of an order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingQuantity {
    /// Billed units.
    pub quantity: u32,
    /// Price per unit.
    pub unit_rate: Decimal,
    /// `quantity * unit_rate`.
    pub total: Decimal,
    /// Where `quantity` came from.
    pub source: QuantitySource,
}

/// Derives billing quantities from custody records.
pub struct BillingQuantityResolver;

impl BillingQuantityResolver {
    /// Resolve the quantity for `order` from its records.
    ///
    /// Records of other orders and cancelled records are ignored.
    pub fn resolve_quantity(order: &ServiceOrder, records: &[SerialRecord]) -> BillingQuantity {
        let mut present = 0usize;
        let mut verified = 0u32;
        for record in records
            .iter()
            .filter(|r| r.service_order_ref() == &order.reference && !r.is_cancelled())
        {
            present += 1;
            if record.lifecycle_state().is_verified() {
                verified = verified.saturating_add(1);
            }
        }

        let (quantity, source) = match (present, verified) {
            (0, _) => (order.manual_quantity, QuantitySource::Manual),
            (_, 0) => (0, QuantitySource::ScanningIncomplete),
            (_, n) => (n, QuantitySource::Scanned),
        };

        BillingQuantity {
            quantity,
            unit_rate: order.unit_rate,
            total: Decimal::from(quantity) * order.unit_rate,
            source,
        }
    }
}
