//! Transport-agnostic session core for BLE Continuous Glucose Monitors.
//!
//! This crate implements the protocol half of a CGM client: the GATT session
//! state machine (connect → discover → subscribe → optionally request stored
//! records → stream) and the codec for the sensor's measurement frames. It
//! does not talk to a radio; a platform integration implements
//! [`gatt::GattClient`] for its BLE stack and forwards the stack's callbacks
//! as [`gatt::GattEvent`]s.
//!
//! The usual shape of an integration:
//!
//! 1. Scan for the sensor however the platform does it and build a
//!    [`DeviceHandle`].
//! 2. Create a [`session::Session`] over the platform's `GattClient` and
//!    call [`session::Session::connect`].
//! 3. Feed transport events through [`session::Session::handle_event`] (or
//!    pump a whole event stream with [`session::drive`]) and consume the
//!    returned [`session::SessionEvent`]s.
//! 4. Read decoded measurements from the shared [`store::MeasurementStore`]
//!    whenever convenient.

pub mod address;
mod error;
pub mod gatt;
pub mod measurement;
pub mod mock;
pub mod racp;
pub mod session;
pub mod sfloat;
pub mod store;
pub mod uuid;

pub use error::{Error, ErrorKind, GattOp, Result};

use core::fmt;

use crate::address::Address;

/// Identifies the peer device a session talks to.
///
/// Produced by the platform's scanner when it spots the sensor; the core
/// holds it for the life of the session but never interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub name: String,
    pub address: Address,
}

impl DeviceHandle {
    pub fn new(name: impl Into<String>, address: Address) -> Self {
        Self {
            name: name.into(),
            address,
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}
