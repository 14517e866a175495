//! The GATT transport surface consumed by a [`Session`].
//!
//! The core does not talk to a BLE stack directly. A platform integration
//! implements [`GattClient`] for its stack (BlueZ, Android, CoreBluetooth,
//! an embedded SoftDevice, ...) and forwards that stack's asynchronous
//! callbacks as [`GattEvent`]s. Requests never block: each [`GattClient`]
//! method queues an operation and returns, and the matching completion
//! arrives later as an event.
//!
//! [`Session`]: crate::session::Session

use bitflags::bitflags;

use crate::{uuid::Uuid, DeviceHandle};

/// CCCD value enabling unacknowledged notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// CCCD value enabling acknowledged indications.
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];

/// Status code attached to transport completions.
///
/// `0` means success; any other value is the stack's error code for the
/// failed operation (for example an ATT error code).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattStatus(pub u8);

impl GattStatus {
    pub const SUCCESS: Self = Self(0);

    #[inline]
    pub fn is_success(self) -> bool {
        self.0 == 0
    }
}

bitflags! {
    /// The operations a [`Characteristic`] supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CharacteristicProps: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

/// A descriptor attached to a [`Characteristic`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub uuid: Uuid,
}

/// A characteristic discovered within a [`Service`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub props: CharacteristicProps,
    pub descriptors: Vec<Descriptor>,
}

impl Characteristic {
    /// Returns the [`Descriptor`] with the given [`Uuid`], if this
    /// characteristic carries one.
    pub fn descriptor(&self, uuid: Uuid) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.uuid == uuid)
    }
}

/// A GATT service discovered on the connected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub uuid: Uuid,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    /// Returns the [`Characteristic`] with the given [`Uuid`], if this
    /// service exposes one.
    pub fn characteristic(&self, uuid: Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// The link state reported by a connection event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// An asynchronous event delivered by the transport.
///
/// The platform integration translates its stack's callbacks into this enum
/// and feeds them to [`Session::handle_event`] one at a time, in arrival
/// order.
///
/// [`Session::handle_event`]: crate::session::Session::handle_event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    /// The link to the peer changed state.
    ConnectionChanged {
        status: GattStatus,
        state: ConnectionState,
    },
    /// Service discovery finished.
    ServicesDiscovered {
        status: GattStatus,
        services: Vec<Service>,
    },
    /// A descriptor write completed. `characteristic` identifies the
    /// descriptor's owning characteristic.
    DescriptorWritten {
        status: GattStatus,
        characteristic: Uuid,
        descriptor: Uuid,
    },
    /// A characteristic write completed.
    CharacteristicWritten {
        status: GattStatus,
        characteristic: Uuid,
    },
    /// A notification or indication carrying a new characteristic value.
    Notification { characteristic: Uuid, value: Vec<u8> },
}

/// Outbound requests the core issues to the transport.
///
/// Every method is fire-and-forget: implementations queue the operation and
/// return immediately. Completions (and failures) come back as
/// [`GattEvent`]s. Characteristics and descriptors are addressed by [`Uuid`]
/// within the active connection.
pub trait GattClient {
    /// Requests a connection to the given peer.
    fn connect(&mut self, device: &DeviceHandle);

    /// Requests service discovery on the connected peer.
    fn discover_services(&mut self);

    /// Toggles local delivery of notifications for a characteristic.
    ///
    /// This is a stack-local switch with no wire effect of its own; the
    /// peer-side toggle is the CCCD write.
    fn enable_notifications(&mut self, characteristic: Uuid, enabled: bool);

    /// Writes a descriptor value.
    fn write_descriptor(&mut self, characteristic: Uuid, descriptor: Uuid, value: &[u8]);

    /// Writes a characteristic value.
    fn write_characteristic(&mut self, characteristic: Uuid, value: &[u8]);

    /// Releases the connection and all resources associated with it.
    fn close(&mut self);
}
