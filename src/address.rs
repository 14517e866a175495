//! Bluetooth device addresses.

use core::fmt;
use std::{fmt::Write, str::FromStr};

/// A 6-Byte Bluetooth device address.
///
/// Device addresses can either follow the MAC address standard or be randomly
/// generated; the core treats both the same way. Addresses identify the peer
/// a [`DeviceHandle`] refers to.
///
/// [`DeviceHandle`]: crate::DeviceHandle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; 6]);

impl Address {
    #[inline]
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl From<[u8; 6]> for Address {
    #[inline]
    fn from(value: [u8; 6]) -> Self {
        Self(value)
    }
}

impl From<Address> for [u8; 6] {
    #[inline]
    fn from(value: Address) -> Self {
        value.0
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_char(':')?;
            }

            write!(f, "{:02X}", byte)?;
        }

        Ok(())
    }
}

/// Parses a Bluetooth [`Address`] from a colon-separated hex string.
///
/// Example: `aa:ff:00:33:22:11`
impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; 6];
        let mut groups = s.split(':');
        for byte in &mut bytes {
            let group = groups.next().ok_or(ParseAddressError(()))?;
            if group.len() != 2 {
                return Err(ParseAddressError(()));
            }
            *byte = u8::from_str_radix(group, 16).map_err(|_| ParseAddressError(()))?;
        }

        if groups.next().is_some() {
            return Err(ParseAddressError(()));
        }

        Ok(Self(bytes))
    }
}

/// The error type returned by the [`FromStr`] implementation of [`Address`].
#[derive(Debug)]
pub struct ParseAddressError(());

impl fmt::Display for ParseAddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid device address")
    }
}

impl std::error::Error for ParseAddressError {}
