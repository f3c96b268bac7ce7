//! # Domain Value Objects
//!
//! Identifiers, enumerations and small immutable types shared by the
//! custody entities and services.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Identifier of the owning service order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceOrderRef(String);

impl ServiceOrderRef {
    /// Wrap a service order reference.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Borrow the raw reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceOrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the person operating a scanner or approving an override.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperatorId(String);

impl OperatorId {
    /// Wrap an operator identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scan session identifier (UUID v4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random session id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a scan was captured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LocationType {
    /// At the customer site, before transport.
    Customer,
    /// At the destruction facility, after transport.
    Facility,
}

impl fmt::Display for LocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationType::Customer => f.write_str("customer"),
            LocationType::Facility => f.write_str("facility"),
        }
    }
}

/// Physical destruction method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestructionMethod {
    /// Mechanical shredding.
    Shred,
    /// Crushing / punching.
    Crush,
    /// Magnetic degaussing.
    Degauss,
    /// Software overwrite.
    Wipe,
}

impl DestructionMethod {
    /// Label used on certificates.
    pub fn label(&self) -> &'static str {
        match self {
            DestructionMethod::Shred => "Shred",
            DestructionMethod::Crush => "Crush",
            DestructionMethod::Degauss => "Degauss",
            DestructionMethod::Wipe => "Wipe",
        }
    }
}

impl fmt::Display for DestructionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle state of a serial record.
///
/// Variant order is the custody order; states only move forward outside of
/// an explicit audited correction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Known to the system, receipt not yet confirmed anywhere.
    #[default]
    Registered,
    /// Scanned at the customer site.
    CustomerScanned,
    /// Verified on arrival at the facility.
    FacilityVerified,
    /// Destroyed. Terminal.
    Destroyed,
}

impl LifecycleState {
    /// Check if terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Destroyed)
    }

    /// Receipt confirmed at the facility (or later).
    pub fn is_verified(&self) -> bool {
        *self >= Self::FacilityVerified
    }

    /// All states in custody order.
    pub const ALL: [LifecycleState; 4] = [
        Self::Registered,
        Self::CustomerScanned,
        Self::FacilityVerified,
        Self::Destroyed,
    ];
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Registered => "Registered",
            LifecycleState::CustomerScanned => "CustomerScanned",
            LifecycleState::FacilityVerified => "FacilityVerified",
            LifecycleState::Destroyed => "Destroyed",
        };
        f.write_str(name)
    }
}

/// Event driving a lifecycle transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// Serial scanned at the customer site.
    CustomerScan,
    /// Serial scanned at the facility.
    FacilityScan,
    /// Asset destroyed with the given method.
    Destruction {
        /// Method used; required by the transition guard.
        method: Option<DestructionMethod>,
    },
}

impl LifecycleEvent {
    /// Scan event for a capture location.
    pub fn scan_at(location: LocationType) -> Self {
        match location {
            LocationType::Customer => Self::CustomerScan,
            LocationType::Facility => Self::FacilityScan,
        }
    }

    /// Payload-free discriminant, used in error reports.
    pub fn kind(&self) -> LifecycleEventKind {
        match self {
            Self::CustomerScan => LifecycleEventKind::CustomerScan,
            Self::FacilityScan => LifecycleEventKind::FacilityScan,
            Self::Destruction { .. } => LifecycleEventKind::Destruction,
        }
    }
}

/// Discriminant of [`LifecycleEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEventKind {
    /// Customer-side scan.
    CustomerScan,
    /// Facility-side scan.
    FacilityScan,
    /// Destruction marking.
    Destruction,
}

impl fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CustomerScan => f.write_str("customer scan"),
            Self::FacilityScan => f.write_str("facility scan"),
            Self::Destruction => f.write_str("destruction"),
        }
    }
}

/// Case folding applied to scanned serials before storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerialCase {
    /// Keep the scanned case.
    Preserve,
    /// Fold to upper case.
    #[default]
    Upper,
    /// Fold to lower case.
    Lower,
}

impl SerialCase {
    /// Apply the folding policy.
    pub fn apply(&self, serial: &str) -> String {
        match self {
            SerialCase::Preserve => serial.to_string(),
            SerialCase::Upper => serial.to_uppercase(),
            SerialCase::Lower => serial.to_lowercase(),
        }
    }
}

impl FromStr for SerialCase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preserve" | "none" => Ok(SerialCase::Preserve),
            "upper" => Ok(SerialCase::Upper),
            "lower" => Ok(SerialCase::Lower),
            other => Err(format!("unknown serial case policy: {other}")),
        }
    }
}

/// Explicit authorisation to bypass a lifecycle guard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Override {
    /// Who approved the override.
    pub authorized_by: OperatorId,
    /// Why it was needed; copied into the audit trail.
    pub reason: String,
}

/// Who performs an operation, and under which override if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    /// Operator performing the operation.
    pub operator: OperatorId,
    /// Guard override, if one was granted.
    pub authorization: Option<Override>,
}

impl Actor {
    /// Actor without override.
    pub fn operator(operator: impl Into<String>) -> Self {
        Self {
            operator: OperatorId::new(operator),
            authorization: None,
        }
    }

    /// Attach an override approved by `authorized_by`.
    pub fn with_override(
        mut self,
        authorized_by: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        self.authorization = Some(Override {
            authorized_by: OperatorId::new(authorized_by),
            reason: reason.into(),
        });
        self
    }
}
