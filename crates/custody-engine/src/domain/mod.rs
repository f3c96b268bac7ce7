//! # Domain Module
//!
//! Core domain types for the custody engine: value objects, the serial
//! fingerprint, the lifecycle state machine, entities and errors.

pub mod config;
pub mod entities;
pub mod errors;
pub mod fingerprint;
pub mod lifecycle;
pub mod value_objects;

pub use config::*;
pub use entities::*;
pub use errors::*;
pub use fingerprint::*;
pub use lifecycle::*;
pub use value_objects::*;
