//! Bluetooth UUIDs and the well-known CGM protocol identifiers.

use core::fmt;
use std::str::FromStr;

/// The CGM service exposed by a glucose sensor.
pub const CGM_SERVICE: Uuid = Uuid::from_u16(0x181F);

/// The CGM Measurement characteristic. Notifications on it carry live
/// measurement frames.
pub const CGM_MEASUREMENT: Uuid = Uuid::from_u16(0x2AA7);

/// The Record Access Control Point characteristic, used to request stored
/// historical records. Optional; not every sensor exposes it.
pub const RECORD_ACCESS_CONTROL_POINT: Uuid = Uuid::from_u16(0x2AAC);

/// The Client Characteristic Configuration Descriptor, which toggles
/// notification/indication delivery for its characteristic.
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: Uuid = Uuid::from_u16(0x2902);

/// A 128-bit UUID, identifying a Bluetooth service, characteristic, or
/// descriptor.
///
/// # Construction
///
/// This type can be constructed from a compile-time string via the
/// [`Uuid::from_static`] function. A [`FromStr`] implementation for fallible
/// parsing is also provided.
///
/// [`Uuid`]s can also be constructed from a 16-bit "alias" assigned by the
/// Bluetooth SIG via the [`Uuid::from_u16`] function.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid([u8; 16]);

impl Uuid {
    const BASE: Self = Self::from_static("00000000-0000-1000-8000-00805f9b34fb");

    /// Parses a [`Uuid`] from its canonical hex-and-dash form.
    const fn from_str(s: &str) -> Result<Self, ParseUuidError> {
        const fn nibble(digit: u8) -> Result<u8, ParseUuidError> {
            Ok(match digit {
                b'0'..=b'9' => digit - b'0',
                b'a'..=b'f' => digit - b'a' + 10,
                b'A'..=b'F' => digit - b'A' + 10,
                _ => return Err(ParseUuidError(ErrorKind::InvalidDigit)),
            })
        }

        let bytes = s.as_bytes();
        if bytes.len() != 36 {
            return Err(ParseUuidError(ErrorKind::Length));
        }

        // Input positions 8, 13, 18 and 23 hold the dashes; every other
        // position pairs up into one output byte.
        let mut out = [0; 16];
        let mut i = 0;
        let mut o = 0;
        while i < bytes.len() {
            if i == 8 || i == 13 || i == 18 || i == 23 {
                if bytes[i] != b'-' {
                    return Err(ParseUuidError(ErrorKind::ExpectedDash));
                }
                i += 1;
                continue;
            }

            let high = match nibble(bytes[i]) {
                Ok(v) => v,
                Err(e) => return Err(e),
            };
            let low = match nibble(bytes[i + 1]) {
                Ok(v) => v,
                Err(e) => return Err(e),
            };
            out[o] = (high << 4) | low;
            o += 1;
            i += 2;
        }

        Ok(Self(out))
    }

    /// Creates a [`Uuid`] from a static string, potentially at compile time.
    ///
    /// Panics if the string is invalid.
    ///
    /// This is typically the behavior you want when defining `const`
    /// [`Uuid`]s.
    pub const fn from_static(s: &'static str) -> Self {
        match Self::from_str(s) {
            Ok(uuid) => uuid,
            Err(_) => panic!("malformed UUID"),
        }
    }

    /// Creates a [`Uuid`] from a 16-bit alias.
    ///
    /// The alias occupies bytes 2 and 3 of the Bluetooth SIG base UUID.
    pub const fn from_u16(short: u16) -> Self {
        let [hi, lo] = short.to_be_bytes();
        let mut uuid = Self::BASE;
        uuid.0[2] = hi;
        uuid.0[3] = lo;
        uuid
    }

    /// Returns the raw big-endian bytes of this [`Uuid`].
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl FromStr for Uuid {
    type Err = ParseUuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str(s)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                f.write_str("-")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// The error type returned by the [`FromStr`] implementation of [`Uuid`].
#[derive(Debug)]
pub struct ParseUuidError(ErrorKind);

#[derive(Debug)]
enum ErrorKind {
    Length,
    InvalidDigit,
    ExpectedDash,
}

impl fmt::Display for ParseUuidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match &self.0 {
            ErrorKind::Length => "wrong length (expected 36 characters)",
            ErrorKind::InvalidDigit => "invalid hex digit",
            ErrorKind::ExpectedDash => "invalid character (`-` expected)",
        };
        f.write_str(s)
    }
}

impl std::error::Error for ParseUuidError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        assert_eq!(
            Uuid::BASE.to_string(),
            "00000000-0000-1000-8000-00805f9b34fb"
        );

        let s = "7c9ac820-0886-4e50-bcca-588b883f8649";
        assert_eq!(Uuid::from_str(s).unwrap().to_string(), s);
    }

    #[test]
    fn invalid() {
        Uuid::from_str("").unwrap_err();
        Uuid::from_str("00000000-0000-1000-8000-00805f9b34f").unwrap_err();
        Uuid::from_str("00000000-0000-1000-8000-00805f9b34fbf").unwrap_err();
        Uuid::from_str("00000000x0000-1000-8000-00805f9b34fb").unwrap_err();
        Uuid::from_str("0000000g-0000-1000-8000-00805f9b34fb").unwrap_err();
    }

    #[test]
    fn well_known_identifiers() {
        assert_eq!(
            CGM_SERVICE.to_string(),
            "0000181f-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            CGM_MEASUREMENT.to_string(),
            "00002aa7-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            CLIENT_CHARACTERISTIC_CONFIGURATION.to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            RECORD_ACCESS_CONTROL_POINT.to_string(),
            "00002aac-0000-1000-8000-00805f9b34fb"
        );
    }
}
