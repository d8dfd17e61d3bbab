//! Device serial numbers
//!
//! The device reports its serial as a 10 digit decimal string. Operators may
//! supply a shorter number, which is zero-padded on the left.

use std::fmt;
use std::str::FromStr;

/// Width of a canonical serial number
pub const SERIAL_WIDTH: usize = 10;

/// A canonical device serial number, or the empty "any device" serial
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Serial(String);

impl Serial {
    /// Serial that matches any device
    pub fn any() -> Self {
        Self(String::new())
    }

    /// Canonicalize operator input into a 10 digit serial
    ///
    /// Empty input yields [`Serial::any`]. Input longer than 10 characters or
    /// containing anything but ASCII digits is rejected.
    pub fn canonicalize(input: &str) -> crate::Result<Self> {
        if input.is_empty() {
            return Ok(Self::any());
        }
        if input.len() > SERIAL_WIDTH || !input.bytes().all(|b| b.is_ascii_digit()) {
            return Err(crate::Error::InvalidSerial(input.to_string()));
        }
        Ok(Self(format!("{:0>width$}", input, width = SERIAL_WIDTH)))
    }

    /// Whether this serial matches any device
    pub fn is_any(&self) -> bool {
        self.0.is_empty()
    }

    /// The canonical string (empty for "any")
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a serial read from a device satisfies this filter
    pub fn matches(&self, device_serial: &str) -> bool {
        self.is_any() || self.0 == device_serial
    }

    /// Representation used in status output, `*` for any
    pub fn display_or_wildcard(&self) -> &str {
        if self.is_any() { "*" } else { &self.0 }
    }
}

impl FromStr for Serial {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::canonicalize(s)
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_or_wildcard())
    }
}
