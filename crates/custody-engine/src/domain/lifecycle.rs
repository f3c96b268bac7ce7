//! # Lifecycle State Machine
//!
//! ```text
//! Registered ──customer scan──→ CustomerScanned ──facility scan──→ FacilityVerified
//!     │                                                                 ↑      │
//!     └────────── facility scan (override required) ────────────────────┘      │
//!                                                                  destruction │
//!                                                          Destroyed ←─────────┘
//! ```
//!
//! Re-scans at the same location are no-ops on the state. Destruction before
//! facility verification is blocked unless an override is supplied. Nothing
//! leaves `Destroyed`.

use super::errors::{CustodyError, Precondition};
use super::value_objects::{LifecycleEvent, LifecycleState};

/// How a transition was reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionKind {
    /// Normal forward move.
    Advance,
    /// Same-location re-scan; state unchanged.
    Rescan,
    /// Customer scan arriving after facility verification; state unchanged.
    LateSighting,
    /// Forward move that needed the override flag.
    Overridden,
}

impl TransitionKind {
    /// Transitions that leave the state untouched.
    pub fn is_noop(&self) -> bool {
        matches!(self, TransitionKind::Rescan | TransitionKind::LateSighting)
    }
}

/// Outcome of a guard check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    /// State before.
    pub from: LifecycleState,
    /// State after.
    pub to: LifecycleState,
    /// How the transition was reached.
    pub kind: TransitionKind,
}

impl Transition {
    /// Whether the state actually moved.
    pub fn changes_state(&self) -> bool {
        self.from != self.to
    }

    /// Whether the override was consumed.
    pub fn used_override(&self) -> bool {
        self.kind == TransitionKind::Overridden
    }
}

/// Pure transition table.
pub struct LifecycleStateMachine;

impl LifecycleStateMachine {
    /// Validate `event` against `current` and compute the resulting transition.
    ///
    /// `override_granted` only relaxes the two out-of-sequence guards: facility
    /// receipt without a customer scan, and destruction before facility
    /// verification. It never bypasses the destruction method requirement or
    /// the terminal state.
    pub fn next_state(
        current: LifecycleState,
        event: LifecycleEvent,
        override_granted: bool,
    ) -> Result<Transition, CustodyError> {
        use LifecycleEvent::{CustomerScan, Destruction, FacilityScan};
        use LifecycleState::*;
        use TransitionKind::*;

        let reject = |missing: Precondition| CustodyError::InvalidTransition {
            from: current,
            event: event.kind(),
            missing,
        };
        let to = |to: LifecycleState, kind: TransitionKind| Transition {
            from: current,
            to,
            kind,
        };

        match (current, event) {
            (Destroyed, _) => Err(reject(Precondition::NonTerminalState)),

            (Registered, CustomerScan) => Ok(to(CustomerScanned, Advance)),
            (CustomerScanned, CustomerScan) => Ok(to(CustomerScanned, Rescan)),
            (FacilityVerified, CustomerScan) => Ok(to(FacilityVerified, LateSighting)),

            (Registered, FacilityScan) if override_granted => Ok(to(FacilityVerified, Overridden)),
            (Registered, FacilityScan) => Err(reject(Precondition::OverrideRequired)),
            (CustomerScanned, FacilityScan) => Ok(to(FacilityVerified, Advance)),
            (FacilityVerified, FacilityScan) => Ok(to(FacilityVerified, Rescan)),

            (_, Destruction { method: None }) => {
                Err(reject(Precondition::DestructionMethodRequired))
            }
            (FacilityVerified, Destruction { .. }) => Ok(to(Destroyed, Advance)),
            (Registered | CustomerScanned, Destruction { .. }) if override_granted => {
                Ok(to(Destroyed, Overridden))
            }
            (Registered | CustomerScanned, Destruction { .. }) => {
                Err(reject(Precondition::FacilityVerificationRequired))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleStateMachine as Machine;
    use super::*;
    use crate::domain::value_objects::LifecycleEvent::{CustomerScan, FacilityScan};
    use crate::domain::value_objects::{DestructionMethod, LifecycleEventKind};
    use LifecycleState::*;

    const SHRED: LifecycleEvent = LifecycleEvent::Destruction {
        method: Some(DestructionMethod::Shred),
    };

    #[test]
    fn test_forward_path() {
        let t = Machine::next_state(Registered, CustomerScan, false).unwrap();
        assert_eq!(t.to, CustomerScanned);
        let t = Machine::next_state(t.to, FacilityScan, false).unwrap();
        assert_eq!(t.to, FacilityVerified);
        let t = Machine::next_state(t.to, SHRED, false).unwrap();
        assert_eq!(t.to, Destroyed);
        assert_eq!(t.kind, TransitionKind::Advance);
    }

    #[test]
    fn test_rescans_do_not_move_state() {
        let t = Machine::next_state(CustomerScanned, CustomerScan, false).unwrap();
        assert!(!t.changes_state());
        assert_eq!(t.kind, TransitionKind::Rescan);
        let t = Machine::next_state(FacilityVerified, FacilityScan, false).unwrap();
        assert!(!t.changes_state());
    }

    #[test]
    fn test_late_customer_scan_never_regresses() {
        let t = Machine::next_state(FacilityVerified, CustomerScan, false).unwrap();
        assert_eq!(t.to, FacilityVerified);
        assert_eq!(t.kind, TransitionKind::LateSighting);
    }

    #[test]
    fn test_facility_scan_of_registered_needs_override() {
        let err = Machine::next_state(Registered, FacilityScan, false).unwrap_err();
        assert_eq!(
            err,
            CustodyError::InvalidTransition {
                from: Registered,
                event: LifecycleEventKind::FacilityScan,
                missing: Precondition::OverrideRequired,
            }
        );
        let t = Machine::next_state(Registered, FacilityScan, true).unwrap();
        assert_eq!(t.to, FacilityVerified);
        assert!(t.used_override());
    }

    #[test]
    fn test_destruction_requires_verification_or_override() {
        for state in [Registered, CustomerScanned] {
            let err = Machine::next_state(state, SHRED, false).unwrap_err();
            assert!(matches!(
                err,
                CustodyError::InvalidTransition {
                    missing: Precondition::FacilityVerificationRequired,
                    ..
                }
            ));
            let t = Machine::next_state(state, SHRED, true).unwrap();
            assert_eq!(t.to, Destroyed);
            assert!(t.used_override());
        }
    }

    #[test]
    fn test_destruction_requires_method_even_with_override() {
        let event = LifecycleEvent::Destruction { method: None };
        for override_granted in [false, true] {
            let err = Machine::next_state(FacilityVerified, event, override_granted).unwrap_err();
            assert!(matches!(
                err,
                CustodyError::InvalidTransition {
                    missing: Precondition::DestructionMethodRequired,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_destroyed_is_terminal() {
        for event in [CustomerScan, FacilityScan, SHRED] {
            let err = Machine::next_state(Destroyed, event, true).unwrap_err();
            assert!(matches!(
                err,
                CustodyError::InvalidTransition {
                    from: Destroyed,
                    missing: Precondition::NonTerminalState,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_no_path_to_destroyed_skips_verification_without_override() {
        for state in LifecycleState::ALL {
            if let Ok(t) = Machine::next_state(state, SHRED, false) {
                assert_eq!(t.from, FacilityVerified);
            }
        }
    }
}
