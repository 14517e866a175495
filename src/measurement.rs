//! Decoding of CGM measurement frames.

use core::fmt;

use chrono::{DateTime, Local};

use crate::sfloat::decode_sfloat;

/// Minimum frame length carrying all fixed fields.
const MIN_FRAME_LEN: usize = 8;

/// A glucose level alert reported by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alert {
    /// Glucose below the low threshold (code `0x01`).
    Low,
    /// Glucose above the high threshold (code `0x02`).
    High,
    /// An alert code outside the known set.
    Unknown,
}

impl Alert {
    fn from_code(code: u8) -> Self {
        match code {
            0x01 => Alert::Low,
            0x02 => Alert::High,
            _ => Alert::Unknown,
        }
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Alert::Low => "low level",
            Alert::High => "high level",
            Alert::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One decoded CGM measurement.
///
/// Immutable once constructed; appended to a [`MeasurementStore`] in arrival
/// order.
///
/// [`MeasurementStore`]: crate::store::MeasurementStore
#[derive(Debug, Clone, PartialEq)]
pub struct GlucoseMeasurement {
    /// The packet size the sensor claims. Informational only; parsing is
    /// bounded by the actual frame length.
    pub packet_size: u8,
    /// Raw flag bits. Carried through undecoded.
    pub flags: u8,
    /// Sensor current in nanoamperes.
    pub sensor_current_na: f32,
    /// Minutes since the sensor's session epoch.
    pub time_offset_minutes: i16,
    /// Sensor temperature in degrees Celsius.
    pub temperature_celsius: f32,
    /// Alert reported alongside the measurement, if the frame carried one.
    pub alert: Option<Alert>,
    /// When the frame arrived, recorded by the receiver.
    pub received_at: DateTime<Local>,
}

impl fmt::Display for GlucoseMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "current: {} nA, offset: {} min, temp: {} °C, alert: ",
            self.sensor_current_na, self.time_offset_minutes, self.temperature_celsius
        )?;
        match &self.alert {
            Some(alert) => alert.fmt(f),
            None => f.write_str("none"),
        }
    }
}

/// Decodes a measurement frame.
///
/// Returns [`None`] for frames shorter than 8 bytes. `received_at` is the
/// arrival time recorded by the caller; the decoder itself does not consult
/// the clock.
///
/// Frame layout (multi-byte fields little-endian):
///
/// | bytes | field |
/// |---|---|
/// | 0 | packet size (not used for bounds checks) |
/// | 1 | flags |
/// | 2..=3 | sensor current, SFLOAT |
/// | 4..=5 | time offset in minutes |
/// | 6..=7 | temperature, SFLOAT |
/// | 8 | alert code, only if present |
pub fn parse_measurement(
    frame: &[u8],
    received_at: DateTime<Local>,
) -> Option<GlucoseMeasurement> {
    if frame.len() < MIN_FRAME_LEN {
        return None;
    }

    let current_raw = u16::from_le_bytes([frame[2], frame[3]]);
    let temperature_raw = u16::from_le_bytes([frame[6], frame[7]]);

    // The trailing alert byte is optional; its presence is determined by the
    // received length, not by the packet size field.
    let alert = frame.get(8).copied().map(Alert::from_code);

    Some(GlucoseMeasurement {
        packet_size: frame[0],
        flags: frame[1],
        sensor_current_na: decode_sfloat(current_raw),
        time_offset_minutes: i16::from_le_bytes([frame[4], frame[5]]),
        temperature_celsius: decode_sfloat(temperature_raw),
        alert,
        received_at,
    })
}
