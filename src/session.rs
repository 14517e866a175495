//! The GATT session state machine.
//!
//! A [`Session`] owns the full pipeline against one sensor: connect →
//! discover services → enable measurement notifications → (optionally)
//! enable RACP indications and request stored records → stream measurement
//! frames. It issues requests through a [`GattClient`] and reacts to the
//! transport's [`GattEvent`]s, one at a time, through the single
//! [`Session::handle_event`] entry point.
//!
//! Failure handling: transport failures and resolution misses end the
//! session (phase [`Phase::Failed`], connection released); an undecodable
//! measurement frame is dropped and counted, and the session continues; a
//! peer disconnect ends the session in [`Phase::Disconnected`], which is not
//! a failure.

use core::fmt;
use std::mem;
use std::sync::Arc;

use chrono::Local;
use futures_util::{pin_mut, Stream, StreamExt};

use crate::error::{Error, ErrorKind, GattOp, Result};
use crate::gatt::{
    Characteristic, CharacteristicProps, ConnectionState, GattClient, GattEvent, GattStatus,
    Service, ENABLE_INDICATION_VALUE, ENABLE_NOTIFICATION_VALUE,
};
use crate::measurement::{parse_measurement, GlucoseMeasurement};
use crate::racp;
use crate::store::MeasurementStore;
use crate::uuid::{
    Uuid, CGM_MEASUREMENT, CGM_SERVICE, CLIENT_CHARACTERISTIC_CONFIGURATION,
    RECORD_ACCESS_CONTROL_POINT,
};
use crate::DeviceHandle;

/// The externally visible phase of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No session has been started.
    Idle,
    /// A connect request is outstanding.
    Connecting,
    /// Connected; waiting for service discovery to finish.
    ServiceDiscovery,
    /// Writing the measurement characteristic's CCCD.
    EnablingMeasurementNotify,
    /// Writing the RACP characteristic's CCCD.
    EnablingRacpIndicate,
    /// The stored-records command has been written; waiting for the ack.
    SendingRacpCommand,
    /// Subscriptions are live; measurement frames are being dispatched.
    Streaming,
    /// The session ended with a peer or local disconnect.
    Disconnected,
    /// The session ended with an error; see [`Session::error`].
    Failed,
}

impl Phase {
    /// Returns whether this phase is final for the current session.
    ///
    /// A new connect request is accepted from any terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Idle | Phase::Disconnected | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Connecting => "connecting",
            Phase::ServiceDiscovery => "service discovery",
            Phase::EnablingMeasurementNotify => "enabling measurement notifications",
            Phase::EnablingRacpIndicate => "enabling RACP indications",
            Phase::SendingRacpCommand => "sending RACP command",
            Phase::Streaming => "streaming",
            Phase::Disconnected => "disconnected",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a [`Session`] tells its observers.
///
/// Returned by [`Session::handle_event`]; delivered through the sink when
/// using [`drive`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session moved to a new phase.
    PhaseChanged(Phase),
    /// A measurement frame was decoded and appended to the store.
    Measurement(GlucoseMeasurement),
    /// The sensor answered on the RACP characteristic. The bytes are
    /// surfaced undecoded.
    RacpResponse(Vec<u8>),
}

/// The session context, tagged by phase.
///
/// Each variant carries exactly the data valid in its phase, so states like
/// "RACP resolved but the peer is gone" cannot be represented. The resolved
/// RACP characteristic travels from discovery to streaming; `None` means the
/// peer offers no usable history extension.
enum State {
    Idle,
    Connecting { device: DeviceHandle },
    ServiceDiscovery { device: DeviceHandle },
    EnablingMeasurementNotify { device: DeviceHandle, racp: Option<Characteristic> },
    EnablingRacpIndicate { device: DeviceHandle, racp: Characteristic },
    SendingRacpCommand { device: DeviceHandle, racp: Characteristic },
    Streaming { device: DeviceHandle, racp: Option<Characteristic> },
    Disconnected,
    Failed(Error),
}

impl State {
    fn phase(&self) -> Phase {
        match self {
            State::Idle => Phase::Idle,
            State::Connecting { .. } => Phase::Connecting,
            State::ServiceDiscovery { .. } => Phase::ServiceDiscovery,
            State::EnablingMeasurementNotify { .. } => Phase::EnablingMeasurementNotify,
            State::EnablingRacpIndicate { .. } => Phase::EnablingRacpIndicate,
            State::SendingRacpCommand { .. } => Phase::SendingRacpCommand,
            State::Streaming { .. } => Phase::Streaming,
            State::Disconnected => Phase::Disconnected,
            State::Failed(_) => Phase::Failed,
        }
    }
}

/// A single-peer CGM session driven by transport events.
///
/// All mutation flows through [`Session::connect`], [`Session::disconnect`],
/// [`Session::request_history`] and [`Session::handle_event`]; the `&mut`
/// receivers guarantee that event handling never interleaves. Share the
/// session behind a lock if events and status reads come from different
/// threads — the measurement log itself is already shared through
/// [`Session::store`] and needs no extra locking.
pub struct Session<C: GattClient> {
    client: C,
    state: State,
    store: Arc<MeasurementStore>,
    skipped_frames: u64,
}

impl<C: GattClient> Session<C> {
    /// Creates an idle session with a fresh measurement store.
    pub fn new(client: C) -> Self {
        Self::with_store(client, Arc::new(MeasurementStore::new()))
    }

    /// Creates an idle session appending to an existing store.
    pub fn with_store(client: C, store: Arc<MeasurementStore>) -> Self {
        Self {
            client,
            state: State::Idle,
            store,
            skipped_frames: 0,
        }
    }

    /// Returns the current phase.
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Returns the error that ended the session, if it failed.
    pub fn error(&self) -> Option<&Error> {
        match &self.state {
            State::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Returns the shared measurement log.
    pub fn store(&self) -> Arc<MeasurementStore> {
        self.store.clone()
    }

    /// Returns how many notification frames were dropped as undecodable or
    /// coming from an unexpected source.
    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    /// Starts a session with the given peer.
    ///
    /// Only accepted while no session is active; issues a connect request
    /// and moves to [`Phase::Connecting`].
    pub fn connect(&mut self, device: DeviceHandle) -> Result<()> {
        if !self.phase().is_terminal() {
            return Err(Error::new(ErrorKind::SessionBusy));
        }

        log::info!("connecting to {}", device);
        self.client.connect(&device);
        self.state = State::Connecting { device };
        Ok(())
    }

    /// Ends the session, releasing the connection.
    ///
    /// Accepted from any phase; a no-op once the session has already ended.
    /// Completion events for requests still in flight will arrive later and
    /// are ignored as dead events.
    pub fn disconnect(&mut self) {
        if self.phase().is_terminal() {
            return;
        }

        log::info!("disconnect requested");
        self.client.close();
        self.state = State::Disconnected;
    }

    /// Requests the sensor's stored records again.
    ///
    /// The initial request is part of the connection handshake; this re-issues
    /// it on demand. Only valid while streaming, and only if the peer exposes
    /// a usable RACP characteristic.
    pub fn request_history(&mut self) -> Result<()> {
        match &self.state {
            State::Streaming { racp: Some(racp), .. } => {
                let uuid = racp.uuid;
                log::debug!("re-requesting stored records");
                self.client
                    .write_characteristic(uuid, &racp::report_stored_records());
                Ok(())
            }
            State::Streaming { racp: None, .. } => {
                Err(Error::new(ErrorKind::HistoryUnsupported))
            }
            _ => Err(Error::new(ErrorKind::NotStreaming)),
        }
    }

    /// Feeds one transport event through the state machine.
    ///
    /// This is the only entry point for inbound events. Events must be fed
    /// in arrival order; the returned [`SessionEvent`]s tell observers what
    /// the event meant.
    pub fn handle_event(&mut self, event: GattEvent) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        let before = self.phase();

        if before.is_terminal() {
            log::debug!("ignoring transport event in phase \"{}\"", before);
            return out;
        }

        match event {
            GattEvent::ConnectionChanged { status, state } => {
                self.on_connection_changed(status, state);
            }
            GattEvent::ServicesDiscovered { status, services } => {
                self.on_services_discovered(status, services);
            }
            GattEvent::DescriptorWritten {
                status,
                characteristic,
                descriptor,
            } => self.on_descriptor_written(status, characteristic, descriptor),
            GattEvent::CharacteristicWritten {
                status,
                characteristic,
            } => self.on_characteristic_written(status, characteristic),
            GattEvent::Notification {
                characteristic,
                value,
            } => self.on_notification(characteristic, value, &mut out),
        }

        let after = self.phase();
        if after != before {
            log::debug!("phase: {} -> {}", before, after);
            out.push(SessionEvent::PhaseChanged(after));
        }
        out
    }

    fn take_state(&mut self) -> State {
        mem::replace(&mut self.state, State::Idle)
    }

    /// Ends the session with `kind`, releasing the connection.
    fn fail(&mut self, kind: ErrorKind) {
        let error = Error::new(kind);
        log::error!("session failed: {}", error);
        self.client.close();
        self.state = State::Failed(error);
    }

    fn on_connection_changed(&mut self, status: GattStatus, state: ConnectionState) {
        if !status.is_success() {
            self.fail(ErrorKind::Transport {
                op: GattOp::Connection,
                status,
            });
            return;
        }

        match state {
            ConnectionState::Connected => match self.take_state() {
                State::Connecting { device } => {
                    log::debug!("connected to {}, discovering services", device);
                    self.client.discover_services();
                    self.state = State::ServiceDiscovery { device };
                }
                other => {
                    log::warn!("ignoring connection event in phase \"{}\"", other.phase());
                    self.state = other;
                }
            },
            ConnectionState::Disconnected => {
                log::info!("peer disconnected, session over");
                self.client.close();
                self.state = State::Disconnected;
            }
        }
    }

    fn on_services_discovered(&mut self, status: GattStatus, services: Vec<Service>) {
        let device = match self.take_state() {
            State::ServiceDiscovery { device } => device,
            other => {
                log::debug!("ignoring stray discovery result");
                self.state = other;
                return;
            }
        };

        if !status.is_success() {
            self.fail(ErrorKind::Transport {
                op: GattOp::DiscoverServices,
                status,
            });
            return;
        }

        let Some(service) = services.iter().find(|s| s.uuid == CGM_SERVICE) else {
            self.fail(ErrorKind::ServiceNotFound(CGM_SERVICE));
            return;
        };
        let Some(measurement) = service.characteristic(CGM_MEASUREMENT) else {
            self.fail(ErrorKind::CharacteristicNotFound(CGM_MEASUREMENT));
            return;
        };
        if !measurement.props.contains(CharacteristicProps::NOTIFY) {
            self.fail(ErrorKind::NotifyUnsupported(CGM_MEASUREMENT));
            return;
        }
        if measurement
            .descriptor(CLIENT_CHARACTERISTIC_CONFIGURATION)
            .is_none()
        {
            self.fail(ErrorKind::DescriptorNotFound {
                characteristic: CGM_MEASUREMENT,
                descriptor: CLIENT_CHARACTERISTIC_CONFIGURATION,
            });
            return;
        }

        // History retrieval is an optional extension. An RACP characteristic
        // that cannot indicate (or has no CCCD) is as good as absent.
        let racp = match service.characteristic(RECORD_ACCESS_CONTROL_POINT) {
            Some(racp)
                if racp.props.contains(CharacteristicProps::INDICATE)
                    && racp.descriptor(CLIENT_CHARACTERISTIC_CONFIGURATION).is_some() =>
            {
                Some(racp.clone())
            }
            Some(_) => {
                log::warn!("RACP characteristic is not indicate-capable, history disabled");
                None
            }
            None => None,
        };

        log::debug!("CGM service resolved, enabling measurement notifications");
        self.client.enable_notifications(CGM_MEASUREMENT, true);
        self.client.write_descriptor(
            CGM_MEASUREMENT,
            CLIENT_CHARACTERISTIC_CONFIGURATION,
            &ENABLE_NOTIFICATION_VALUE,
        );
        self.state = State::EnablingMeasurementNotify { device, racp };
    }

    fn on_descriptor_written(&mut self, status: GattStatus, characteristic: Uuid, _descriptor: Uuid) {
        match self.take_state() {
            State::EnablingMeasurementNotify { device, racp }
                if characteristic == CGM_MEASUREMENT =>
            {
                if !status.is_success() {
                    self.fail(ErrorKind::SubscribeFailed {
                        characteristic,
                        status,
                    });
                    return;
                }

                match racp {
                    Some(racp) => {
                        log::debug!("measurement notifications live, enabling RACP indications");
                        self.client.enable_notifications(racp.uuid, true);
                        self.client.write_descriptor(
                            racp.uuid,
                            CLIENT_CHARACTERISTIC_CONFIGURATION,
                            &ENABLE_INDICATION_VALUE,
                        );
                        self.state = State::EnablingRacpIndicate { device, racp };
                    }
                    None => {
                        log::debug!("no RACP on this peer, streaming live measurements only");
                        self.state = State::Streaming { device, racp: None };
                    }
                }
            }
            State::EnablingRacpIndicate { device, racp } if characteristic == racp.uuid => {
                if !status.is_success() {
                    self.fail(ErrorKind::SubscribeFailed {
                        characteristic,
                        status,
                    });
                    return;
                }

                log::debug!("RACP indications live, requesting stored records");
                self.client
                    .write_characteristic(racp.uuid, &racp::report_stored_records());
                self.state = State::SendingRacpCommand { device, racp };
            }
            other => {
                // Late or duplicate completions carry no information.
                log::debug!(
                    "ignoring descriptor write completion for {} (status {})",
                    characteristic,
                    status.0
                );
                self.state = other;
            }
        }
    }

    fn on_characteristic_written(&mut self, status: GattStatus, characteristic: Uuid) {
        match self.take_state() {
            State::SendingRacpCommand { device, racp } if characteristic == racp.uuid => {
                if !status.is_success() {
                    // History is best-effort; live streaming is unaffected.
                    log::warn!("RACP command write failed with status {}", status.0);
                }
                self.state = State::Streaming {
                    device,
                    racp: Some(racp),
                };
            }
            other => {
                log::debug!(
                    "ignoring characteristic write completion for {}",
                    characteristic
                );
                self.state = other;
            }
        }
    }

    fn on_notification(&mut self, characteristic: Uuid, value: Vec<u8>, out: &mut Vec<SessionEvent>) {
        // Frames can start arriving as soon as the measurement CCCD write
        // lands, before the RACP handshake finishes; accept them in every
        // post-subscription phase.
        let subscribed = matches!(
            self.state,
            State::EnablingRacpIndicate { .. }
                | State::SendingRacpCommand { .. }
                | State::Streaming { .. }
        );
        if !subscribed {
            log::debug!("dropping notification from {} before subscription", characteristic);
            return;
        }

        if characteristic == CGM_MEASUREMENT {
            match parse_measurement(&value, Local::now()) {
                Some(measurement) => {
                    log::debug!("measurement: {}", measurement);
                    self.store.append(measurement.clone());
                    out.push(SessionEvent::Measurement(measurement));
                }
                None => {
                    self.skipped_frames += 1;
                    log::debug!("dropping undecodable {}-byte frame", value.len());
                }
            }
        } else if characteristic == RECORD_ACCESS_CONTROL_POINT {
            log::debug!("RACP response: {:02x?}", value);
            out.push(SessionEvent::RacpResponse(value));
        } else {
            self.skipped_frames += 1;
            log::debug!("ignoring notification from unexpected source {}", characteristic);
        }
    }
}

/// Feeds a transport's event stream through a session, one event at a time.
///
/// Every [`SessionEvent`] is passed to `sink`. Returns when the stream ends
/// or the session reaches a terminal phase. Processing one event at a time
/// off a single stream is what gives the session its in-order, non-
/// interleaved event handling.
pub async fn drive<C, S>(session: &mut Session<C>, events: S, mut sink: impl FnMut(SessionEvent))
where
    C: GattClient,
    S: Stream<Item = GattEvent>,
{
    pin_mut!(events);
    while let Some(event) = events.next().await {
        for output in session.handle_event(event) {
            sink(output);
        }
        if session.phase().is_terminal() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{cgm_service, EventQueue, MockGatt, Request};

    const FRAME: [u8; 8] = [0x08, 0x00, 0x64, 0x00, 0x05, 0x00, 0x0A, 0x00];

    fn device() -> DeviceHandle {
        DeviceHandle::new("MyCGM", "F0:11:22:33:44:55".parse().unwrap())
    }

    /// Feeds queued events into the session until the queue runs dry.
    fn pump(session: &mut Session<MockGatt>, events: &EventQueue) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Some(event) = events.pop() {
            out.extend(session.handle_event(event));
        }
        out
    }

    fn streaming_session(with_racp: bool) -> (Session<MockGatt>, EventQueue) {
        let mock = MockGatt::new(vec![cgm_service(with_racp)]);
        let events = mock.events();
        let mut session = Session::new(mock);
        session.connect(device()).unwrap();
        pump(&mut session, &events);
        assert_eq!(session.phase(), Phase::Streaming);
        (session, events)
    }

    #[test]
    fn full_handshake_with_racp() {
        let (session, _) = streaming_session(true);

        let cccd = CLIENT_CHARACTERISTIC_CONFIGURATION;
        assert_eq!(
            session.client().requests,
            vec![
                Request::Connect(device()),
                Request::DiscoverServices,
                Request::EnableNotifications {
                    characteristic: CGM_MEASUREMENT,
                    enabled: true,
                },
                Request::WriteDescriptor {
                    characteristic: CGM_MEASUREMENT,
                    descriptor: cccd,
                    value: ENABLE_NOTIFICATION_VALUE.to_vec(),
                },
                Request::EnableNotifications {
                    characteristic: RECORD_ACCESS_CONTROL_POINT,
                    enabled: true,
                },
                Request::WriteDescriptor {
                    characteristic: RECORD_ACCESS_CONTROL_POINT,
                    descriptor: cccd,
                    value: ENABLE_INDICATION_VALUE.to_vec(),
                },
                Request::WriteCharacteristic {
                    characteristic: RECORD_ACCESS_CONTROL_POINT,
                    value: vec![0x01, 0x01],
                },
            ]
        );
    }

    #[test]
    fn skips_racp_when_absent() {
        let (session, _) = streaming_session(false);

        // No RACP traffic at all: straight from the measurement CCCD write
        // to streaming.
        assert!(!session.client().requests.iter().any(|r| matches!(
            r,
            Request::WriteCharacteristic { .. }
                | Request::WriteDescriptor {
                    characteristic: RECORD_ACCESS_CONTROL_POINT,
                    ..
                }
                | Request::EnableNotifications {
                    characteristic: RECORD_ACCESS_CONTROL_POINT,
                    ..
                }
        )));
    }

    #[test]
    fn idle_ignores_transport_events() {
        let mock = MockGatt::unresponsive();
        let mut session = Session::new(mock);

        let out = session.handle_event(GattEvent::ConnectionChanged {
            status: GattStatus::SUCCESS,
            state: ConnectionState::Connected,
        });
        assert!(out.is_empty());
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.client().requests.is_empty());
    }

    #[test]
    fn connection_failure_closes_exactly_once() {
        let mock = MockGatt::unresponsive();
        let events = mock.events();
        let mut session = Session::new(mock);
        session.connect(device()).unwrap();

        events.push(GattEvent::ConnectionChanged {
            status: GattStatus(133),
            state: ConnectionState::Disconnected,
        });
        pump(&mut session, &events);

        assert_eq!(session.phase(), Phase::Failed);
        assert_eq!(
            session.error().unwrap().kind(),
            &ErrorKind::Transport {
                op: GattOp::Connection,
                status: GattStatus(133),
            }
        );
        let closes = session
            .client()
            .requests
            .iter()
            .filter(|r| **r == Request::Close)
            .count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn missing_service_is_fatal() {
        let mock = MockGatt::new(Vec::new());
        let events = mock.events();
        let mut session = Session::new(mock);
        session.connect(device()).unwrap();
        pump(&mut session, &events);

        assert_eq!(session.phase(), Phase::Failed);
        assert_eq!(
            session.error().unwrap().kind(),
            &ErrorKind::ServiceNotFound(CGM_SERVICE)
        );
        assert!(session.client().requests.contains(&Request::Close));
    }

    #[test]
    fn notify_incapable_measurement_is_fatal() {
        let mut service = cgm_service(false);
        service.characteristics[0].props = CharacteristicProps::READ;

        let mock = MockGatt::new(vec![service]);
        let events = mock.events();
        let mut session = Session::new(mock);
        session.connect(device()).unwrap();
        pump(&mut session, &events);

        assert_eq!(
            session.error().unwrap().kind(),
            &ErrorKind::NotifyUnsupported(CGM_MEASUREMENT)
        );
    }

    #[test]
    fn failed_cccd_write_is_an_explicit_error() {
        let mut mock = MockGatt::unresponsive();
        mock.services = vec![cgm_service(true)];
        let events = mock.events();
        let mut session = Session::new(mock);
        session.connect(device()).unwrap();

        events.push(GattEvent::ConnectionChanged {
            status: GattStatus::SUCCESS,
            state: ConnectionState::Connected,
        });
        events.push(GattEvent::ServicesDiscovered {
            status: GattStatus::SUCCESS,
            services: vec![cgm_service(true)],
        });
        events.push(GattEvent::DescriptorWritten {
            status: GattStatus(5),
            characteristic: CGM_MEASUREMENT,
            descriptor: CLIENT_CHARACTERISTIC_CONFIGURATION,
        });
        pump(&mut session, &events);

        assert_eq!(session.phase(), Phase::Failed);
        assert_eq!(
            session.error().unwrap().kind(),
            &ErrorKind::SubscribeFailed {
                characteristic: CGM_MEASUREMENT,
                status: GattStatus(5),
            }
        );
    }

    #[test]
    fn peer_disconnect_is_not_a_failure() {
        let (mut session, events) = streaming_session(true);

        events.push(GattEvent::ConnectionChanged {
            status: GattStatus::SUCCESS,
            state: ConnectionState::Disconnected,
        });
        pump(&mut session, &events);

        assert_eq!(session.phase(), Phase::Disconnected);
        assert!(session.error().is_none());
    }

    #[test]
    fn late_descriptor_completion_is_ignored_while_streaming() {
        let (mut session, events) = streaming_session(true);

        events.push(GattEvent::DescriptorWritten {
            status: GattStatus::SUCCESS,
            characteristic: CGM_MEASUREMENT,
            descriptor: CLIENT_CHARACTERISTIC_CONFIGURATION,
        });
        let out = pump(&mut session, &events);

        assert!(out.is_empty());
        assert_eq!(session.phase(), Phase::Streaming);
    }

    #[test]
    fn measurements_are_stored_and_surfaced() {
        let (mut session, events) = streaming_session(true);

        events.push(GattEvent::Notification {
            characteristic: CGM_MEASUREMENT,
            value: FRAME.to_vec(),
        });
        let out = pump(&mut session, &events);

        assert_eq!(out.len(), 1);
        let SessionEvent::Measurement(measurement) = &out[0] else {
            panic!("expected a measurement, got {:?}", out[0]);
        };
        assert_eq!(measurement.sensor_current_na, 100.0);
        assert_eq!(session.store().all(), vec![measurement.clone()]);
    }

    #[test]
    fn short_frames_are_counted_not_fatal() {
        let (mut session, events) = streaming_session(true);

        events.push(GattEvent::Notification {
            characteristic: CGM_MEASUREMENT,
            value: vec![0x01, 0x02, 0x03],
        });
        let out = pump(&mut session, &events);

        assert!(out.is_empty());
        assert_eq!(session.phase(), Phase::Streaming);
        assert_eq!(session.skipped_frames(), 1);
        assert!(session.store().is_empty());
    }

    #[test]
    fn racp_response_is_surfaced_raw() {
        let (mut session, events) = streaming_session(true);

        events.push(GattEvent::Notification {
            characteristic: RECORD_ACCESS_CONTROL_POINT,
            value: vec![0x05, 0x00, 0x02, 0x00],
        });
        let out = pump(&mut session, &events);

        assert_eq!(out, vec![SessionEvent::RacpResponse(vec![0x05, 0x00, 0x02, 0x00])]);
    }

    #[test]
    fn connect_while_active_is_rejected() {
        let (mut session, _) = streaming_session(true);

        let err = session.connect(device()).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::SessionBusy);
        assert_eq!(session.phase(), Phase::Streaming);
    }

    #[test]
    fn history_requests() {
        let (mut session, _) = streaming_session(false);
        assert_eq!(
            session.request_history().unwrap_err().kind(),
            &ErrorKind::HistoryUnsupported
        );

        let (mut session, _) = streaming_session(true);
        let writes_before = session
            .client()
            .requests
            .iter()
            .filter(|r| matches!(r, Request::WriteCharacteristic { .. }))
            .count();
        session.request_history().unwrap();
        let writes_after = session
            .client()
            .requests
            .iter()
            .filter(|r| matches!(r, Request::WriteCharacteristic { .. }))
            .count();
        assert_eq!(writes_after, writes_before + 1);

        let mut idle = Session::new(MockGatt::unresponsive());
        assert_eq!(
            idle.request_history().unwrap_err().kind(),
            &ErrorKind::NotStreaming
        );
    }

    #[test]
    fn disconnect_request_ends_the_session() {
        let (mut session, _) = streaming_session(true);

        session.disconnect();
        assert_eq!(session.phase(), Phase::Disconnected);
        assert!(session.client().requests.contains(&Request::Close));

        // A second disconnect is a no-op.
        let closes = |s: &Session<MockGatt>| {
            s.client()
                .requests
                .iter()
                .filter(|r| **r == Request::Close)
                .count()
        };
        let before = closes(&session);
        session.disconnect();
        assert_eq!(closes(&session), before);
    }

    #[test]
    fn frames_racing_the_racp_handshake_are_kept() {
        let mut mock = MockGatt::new(vec![cgm_service(true)]);
        // Sensor starts notifying the moment the measurement CCCD lands,
        // while the RACP handshake is still in flight.
        mock.measurement_frames = vec![FRAME.to_vec()];
        let events = mock.events();
        let mut session = Session::new(mock);
        session.connect(device()).unwrap();
        let out = pump(&mut session, &events);

        assert_eq!(session.phase(), Phase::Streaming);
        assert!(out
            .iter()
            .any(|e| matches!(e, SessionEvent::Measurement(_))));
        assert_eq!(session.store().len(), 1);
    }

    #[pollster::test]
    async fn drive_pumps_until_terminal() {
        let mut mock = MockGatt::new(vec![cgm_service(true)]);
        mock.measurement_frames = vec![FRAME.to_vec()];
        mock.racp_response = Some(vec![0x05, 0x00, 0x01, 0x00]);
        let events = mock.events();
        let mut session = Session::new(mock);
        session.connect(device()).unwrap();

        let mut seen = Vec::new();
        drive(&mut session, events.clone().into_stream(), |event| {
            seen.push(event);
        })
        .await;

        assert_eq!(session.phase(), Phase::Streaming);
        assert!(seen.iter().any(|e| matches!(e, SessionEvent::Measurement(_))));
        assert!(seen
            .iter()
            .any(|e| matches!(e, SessionEvent::RacpResponse(_))));
        assert!(seen.contains(&SessionEvent::PhaseChanged(Phase::Streaming)));

        // A disconnect event ends the pump even with events still queued.
        events.push(GattEvent::ConnectionChanged {
            status: GattStatus::SUCCESS,
            state: ConnectionState::Disconnected,
        });
        events.push(GattEvent::Notification {
            characteristic: CGM_MEASUREMENT,
            value: FRAME.to_vec(),
        });
        drive(&mut session, events.clone().into_stream(), |_| {}).await;
        assert_eq!(session.phase(), Phase::Disconnected);
        assert!(!events.is_empty());
    }
}
