//! Per-asset lifecycle operations and audited corrections.

use super::CustodyService;
use crate::domain::{
    Actor, CustodyResult, DestructionMethod, EventContext, LifecycleEvent, LifecycleState,
    SerialRecord, ServiceOrderRef, ValidationError,
};
use crate::ports::inbound::{DestructionLine, LifecycleApi, ReconciliationApi};
use crate::ports::outbound::{CustodyStore, TimeSource};
use tracing::{error, info, warn};

impl<S, T> LifecycleApi for CustodyService<S, T>
where
    S: CustodyStore,
    T: TimeSource,
{
    fn apply_event(
        &self,
        order: &ServiceOrderRef,
        serial: &str,
        event: LifecycleEvent,
        actor: &Actor,
    ) -> CustodyResult<SerialRecord> {
        self.require_order(order)?;
        if matches!(event, LifecycleEvent::Destruction { .. }) {
            self.destruction_gate(order)?;
        }
        let ctx = self.context(actor);
        let record = self.mutate_record(order, serial, |record| {
            let transition = record.apply_event(event, &ctx)?;
            if transition.used_override() {
                warn!(
                    "[custody] {} {} -> {} under override by {}",
                    record.serial_number(),
                    transition.from,
                    transition.to,
                    actor
                        .authorization
                        .as_ref()
                        .map(|a| a.authorized_by.as_str())
                        .unwrap_or_default()
                );
            }
            Ok(())
        })?;
        info!(
            "[custody] {} on {} is now {}",
            record.serial_number(),
            order,
            record.lifecycle_state()
        );
        Ok(record)
    }

    fn mark_destroyed(
        &self,
        order: &ServiceOrderRef,
        serial: &str,
        method: DestructionMethod,
        actor: &Actor,
    ) -> CustodyResult<SerialRecord> {
        self.apply_event(
            order,
            serial,
            LifecycleEvent::Destruction {
                method: Some(method),
            },
            actor,
        )
    }

    fn mark_order_destroyed(
        &self,
        order: &ServiceOrderRef,
        method: DestructionMethod,
        actor: &Actor,
    ) -> CustodyResult<Vec<DestructionLine>> {
        self.require_order(order)?;
        self.destruction_gate(order)?;

        let mut lines = Vec::new();
        for record in self.store.records_for_order(order)? {
            if record.lifecycle_state() != LifecycleState::FacilityVerified {
                continue;
            }
            let serial = record.serial_number().to_string();
            match self.mark_destroyed(order, &serial, method, actor) {
                Err(e) if e.is_fatal() => {
                    error!("[custody] destroying {} aborted at {}: {}", order, serial, e);
                    return Err(e);
                }
                outcome => lines.push(DestructionLine { serial, outcome }),
            }
        }
        info!(
            "[custody] {} records of {} destroyed by {}",
            lines.iter().filter(|l| l.outcome.is_ok()).count(),
            order,
            method
        );
        Ok(lines)
    }

    fn correct_serial(
        &self,
        order: &ServiceOrderRef,
        serial: &str,
        corrected: &str,
        actor: &Actor,
        reason: &str,
    ) -> CustodyResult<SerialRecord> {
        self.require_order(order)?;
        let (old_serial, old_fp) = self.canonical(serial)?;
        let (new_serial, new_fp) = self.canonical(corrected)?;
        let ctx = self.context(actor);

        let record = self.with_retries(order, &old_serial, || {
            if new_fp != old_fp && self.store.get_record(order, &new_fp)?.is_some() {
                return Err(ValidationError::DuplicateSerial {
                    order: order.clone(),
                    serial: new_serial.clone(),
                }
                .into());
            }
            let mut record = self.require_record(order, &old_serial, &old_fp)?;
            let expected = record.version();
            record.correct_serial(&new_serial, &ctx, reason)?;
            Ok(self.store.rekey_record(&old_fp, record, expected))
        })?;
        warn!(
            "[custody] serial corrected on {}: {} -> {} by {} ({})",
            order, old_serial, new_serial, actor.operator, reason
        );
        Ok(record)
    }

    fn revert_state(
        &self,
        order: &ServiceOrderRef,
        serial: &str,
        target: LifecycleState,
        actor: &Actor,
        reason: &str,
    ) -> CustodyResult<SerialRecord> {
        self.require_order(order)?;
        let ctx = self.context(actor);
        let record = self.mutate_record(order, serial, |record| {
            record.revert_to(target, &ctx, reason)
        })?;
        warn!(
            "[custody] {} on {} reverted to {} by {} ({})",
            record.serial_number(),
            order,
            target,
            actor.operator,
            reason
        );
        Ok(record)
    }

    fn cancel_record(
        &self,
        order: &ServiceOrderRef,
        serial: &str,
        actor: &Actor,
        reason: &str,
    ) -> CustodyResult<SerialRecord> {
        self.require_order(order)?;
        let (serial, fingerprint) = self.canonical(serial)?;
        let ctx = self.context(actor);
        let record = self.with_retries(order, &serial, || {
            let mut record = self.require_record(order, &serial, &fingerprint)?;
            let expected = record.version();
            record.cancel(&ctx, reason);
            Ok(self.store.retire_record(record, expected))
        })?;
        info!(
            "[custody] {} on {} cancelled by {} ({})",
            serial, order, actor.operator, reason
        );
        Ok(record)
    }

    fn set_certificate_inclusion(
        &self,
        order: &ServiceOrderRef,
        serial: &str,
        include: bool,
        actor: &Actor,
    ) -> CustodyResult<SerialRecord> {
        self.require_order(order)?;
        let ctx = self.context(actor);
        self.mutate_record(order, serial, |record| {
            record.set_include_in_certificate(include, &ctx);
            Ok(())
        })
    }

    fn get_record(&self, order: &ServiceOrderRef, serial: &str) -> CustodyResult<SerialRecord> {
        let (serial, fingerprint) = self.canonical(serial)?;
        self.require_record(order, &serial, &fingerprint)
    }
}

impl<S, T> CustodyService<S, T>
where
    S: CustodyStore,
    T: TimeSource,
{
    fn context(&self, actor: &Actor) -> EventContext {
        EventContext::new(self.now(), actor.operator.clone())
            .with_authorization(actor.authorization.clone())
    }
}
