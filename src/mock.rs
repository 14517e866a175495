//! A scripted in-memory transport, for tests and downstream consumers that
//! want to exercise a [`Session`] without a radio.
//!
//! [`MockGatt`] plays the roles of both the BLE stack and the sensor: every
//! request a session issues is recorded, and (unless configured otherwise)
//! the success completion a real stack would eventually deliver is queued
//! onto a shared [`EventQueue`]. Scripted measurement frames and an RACP
//! response can be attached to simulate a live sensor.
//!
//! [`Session`]: crate::session::Session

use std::{cell::RefCell, collections::VecDeque, rc::Rc, task::Poll};

use futures_util::{stream, Stream};

use crate::gatt::{
    Characteristic, CharacteristicProps, ConnectionState, Descriptor, GattClient, GattEvent,
    GattStatus, Service,
};
use crate::uuid::{
    Uuid, CGM_MEASUREMENT, CGM_SERVICE, CLIENT_CHARACTERISTIC_CONFIGURATION,
    RECORD_ACCESS_CONTROL_POINT,
};
use crate::DeviceHandle;

/// A shared, cloneable queue of pending [`GattEvent`]s.
///
/// [`MockGatt`] pushes completions into it; the test (or [`drive`]) pops
/// them out and feeds them to the session, preserving arrival order.
///
/// [`drive`]: crate::session::drive
#[derive(Debug, Clone, Default)]
pub struct EventQueue(Rc<RefCell<VecDeque<GattEvent>>>);

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: GattEvent) {
        self.0.borrow_mut().push_back(event);
    }

    pub fn pop(&self) -> Option<GattEvent> {
        self.0.borrow_mut().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Converts the queue into a stream that yields events until the queue
    /// runs dry.
    ///
    /// Events pushed while the stream is being consumed (completions queued
    /// in response to requests made from the event handler) are yielded too.
    pub fn into_stream(self) -> impl Stream<Item = GattEvent> {
        stream::poll_fn(move |_| Poll::Ready(self.pop()))
    }
}

/// An outbound request recorded by [`MockGatt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Connect(DeviceHandle),
    DiscoverServices,
    EnableNotifications { characteristic: Uuid, enabled: bool },
    WriteDescriptor { characteristic: Uuid, descriptor: Uuid, value: Vec<u8> },
    WriteCharacteristic { characteristic: Uuid, value: Vec<u8> },
    Close,
}

/// A scripted [`GattClient`].
pub struct MockGatt {
    /// Every request issued through this client, in order.
    pub requests: Vec<Request>,
    /// The services reported when discovery completes.
    pub services: Vec<Service>,
    /// When `false`, requests are recorded but never answered; push events
    /// through [`MockGatt::events`] by hand instead.
    pub respond: bool,
    /// Measurement frames the "sensor" sends once measurement notifications
    /// are enabled.
    pub measurement_frames: Vec<Vec<u8>>,
    /// Raw RACP response delivered after the stored-records command write.
    pub racp_response: Option<Vec<u8>>,
    queue: EventQueue,
}

impl MockGatt {
    pub fn new(services: Vec<Service>) -> Self {
        Self {
            requests: Vec::new(),
            services,
            respond: true,
            measurement_frames: Vec::new(),
            racp_response: None,
            queue: EventQueue::new(),
        }
    }

    /// A mock that records requests but never answers them.
    pub fn unresponsive() -> Self {
        let mut mock = Self::new(Vec::new());
        mock.respond = false;
        mock
    }

    /// Returns a handle to the queue this mock delivers events through.
    pub fn events(&self) -> EventQueue {
        self.queue.clone()
    }
}

impl GattClient for MockGatt {
    fn connect(&mut self, device: &DeviceHandle) {
        self.requests.push(Request::Connect(device.clone()));
        if self.respond {
            self.queue.push(GattEvent::ConnectionChanged {
                status: GattStatus::SUCCESS,
                state: ConnectionState::Connected,
            });
        }
    }

    fn discover_services(&mut self) {
        self.requests.push(Request::DiscoverServices);
        if self.respond {
            self.queue.push(GattEvent::ServicesDiscovered {
                status: GattStatus::SUCCESS,
                services: self.services.clone(),
            });
        }
    }

    fn enable_notifications(&mut self, characteristic: Uuid, enabled: bool) {
        self.requests.push(Request::EnableNotifications {
            characteristic,
            enabled,
        });
        // Stack-local toggle; no completion.
    }

    fn write_descriptor(&mut self, characteristic: Uuid, descriptor: Uuid, value: &[u8]) {
        self.requests.push(Request::WriteDescriptor {
            characteristic,
            descriptor,
            value: value.to_vec(),
        });
        if self.respond {
            self.queue.push(GattEvent::DescriptorWritten {
                status: GattStatus::SUCCESS,
                characteristic,
                descriptor,
            });
            if characteristic == CGM_MEASUREMENT {
                for frame in std::mem::take(&mut self.measurement_frames) {
                    self.queue.push(GattEvent::Notification {
                        characteristic: CGM_MEASUREMENT,
                        value: frame,
                    });
                }
            }
        }
    }

    fn write_characteristic(&mut self, characteristic: Uuid, value: &[u8]) {
        self.requests.push(Request::WriteCharacteristic {
            characteristic,
            value: value.to_vec(),
        });
        if self.respond {
            self.queue.push(GattEvent::CharacteristicWritten {
                status: GattStatus::SUCCESS,
                characteristic,
            });
            if characteristic == RECORD_ACCESS_CONTROL_POINT {
                if let Some(response) = self.racp_response.take() {
                    self.queue.push(GattEvent::Notification {
                        characteristic: RECORD_ACCESS_CONTROL_POINT,
                        value: response,
                    });
                }
            }
        }
    }

    fn close(&mut self) {
        self.requests.push(Request::Close);
    }
}

/// Builds a [`Service`] describing a typical CGM sensor.
///
/// The measurement characteristic can always notify; the record access
/// control point is included only when `with_racp` is set.
pub fn cgm_service(with_racp: bool) -> Service {
    let cccd = Descriptor {
        uuid: CLIENT_CHARACTERISTIC_CONFIGURATION,
    };

    let mut characteristics = vec![Characteristic {
        uuid: CGM_MEASUREMENT,
        props: CharacteristicProps::NOTIFY,
        descriptors: vec![cccd.clone()],
    }];
    if with_racp {
        characteristics.push(Characteristic {
            uuid: RECORD_ACCESS_CONTROL_POINT,
            props: CharacteristicProps::WRITE | CharacteristicProps::INDICATE,
            descriptors: vec![cccd],
        });
    }

    Service {
        uuid: CGM_SERVICE,
        characteristics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_completion() {
        let mut mock = MockGatt::new(vec![cgm_service(false)]);
        let events = mock.events();

        mock.discover_services();
        assert_eq!(mock.requests, vec![Request::DiscoverServices]);
        assert_eq!(
            events.pop(),
            Some(GattEvent::ServicesDiscovered {
                status: GattStatus::SUCCESS,
                services: vec![cgm_service(false)],
            })
        );
        assert!(events.is_empty());
    }

    #[test]
    fn unresponsive_records_only() {
        let mut mock = MockGatt::unresponsive();
        let events = mock.events();

        mock.discover_services();
        mock.close();
        assert_eq!(mock.requests, vec![Request::DiscoverServices, Request::Close]);
        assert!(events.is_empty());
    }

    #[test]
    fn scripted_frames_follow_cccd_write() {
        let mut mock = MockGatt::new(vec![cgm_service(false)]);
        mock.measurement_frames = vec![vec![0x08; 8]];
        let events = mock.events();

        mock.write_descriptor(
            CGM_MEASUREMENT,
            CLIENT_CHARACTERISTIC_CONFIGURATION,
            &crate::gatt::ENABLE_NOTIFICATION_VALUE,
        );

        assert!(matches!(
            events.pop(),
            Some(GattEvent::DescriptorWritten { .. })
        ));
        assert_eq!(
            events.pop(),
            Some(GattEvent::Notification {
                characteristic: CGM_MEASUREMENT,
                value: vec![0x08; 8],
            })
        );
    }
}
