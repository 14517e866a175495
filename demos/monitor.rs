//! Runs the full session pipeline against the scripted mock transport and
//! prints what a UI would show. Swap [`MockGatt`] for a real `GattClient`
//! implementation to talk to an actual sensor.

use glucolink::{
    mock::{cgm_service, MockGatt},
    session::{drive, Session, SessionEvent},
    DeviceHandle,
};

#[pollster::main]
async fn main() {
    env_logger::builder()
        .filter_module(env!("CARGO_PKG_NAME"), log::LevelFilter::Debug)
        .filter_module(env!("CARGO_CRATE_NAME"), log::LevelFilter::Debug)
        .init();

    // A sensor with the history extension, three live frames (the last one
    // carrying a "high level" alert byte), and a canned RACP response.
    let mut mock = MockGatt::new(vec![cgm_service(true)]);
    mock.measurement_frames = vec![
        vec![0x08, 0x00, 0x64, 0x00, 0x01, 0x00, 0x6D, 0xF1],
        vec![0x08, 0x00, 0x6E, 0x00, 0x02, 0x00, 0x6E, 0xF1],
        vec![0x09, 0x00, 0xF4, 0x01, 0x03, 0x00, 0x6F, 0xF1, 0x02],
    ];
    mock.racp_response = Some(vec![0x05, 0x00, 0x03, 0x00]);

    let events = mock.events();
    let mut session = Session::new(mock);

    let device = DeviceHandle::new("MyCGM", "F0:11:22:33:44:55".parse().unwrap());
    session.connect(device).unwrap();

    drive(&mut session, events.into_stream(), |event| match event {
        SessionEvent::PhaseChanged(phase) => println!("-- {}", phase),
        SessionEvent::Measurement(meas) => println!("{}", meas),
        SessionEvent::RacpResponse(bytes) => println!("RACP response: {:02x?}", bytes),
    })
    .await;

    session.disconnect();
    println!(
        "session ended in phase \"{}\" with {} stored measurement(s)",
        session.phase(),
        session.store().len()
    );
}
