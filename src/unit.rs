// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus unit (a.k.a. slave) addressing

use core::fmt;

/// The reserved unit address used to broadcast a request to every
/// connected RTU device at once. Broadcasts are one-way: the server
/// consumes and dispatches the frame but never responds.
pub const BROADCAST_UNIT: u8 = 0;

/// A single byte addressing a Modbus unit (RTU) or forwarding target
/// (TCP unit identifier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Unit(pub u8);

impl Unit {
    /// The broadcast address (`0`).
    #[must_use]
    pub const fn broadcast() -> Self {
        Self(BROADCAST_UNIT)
    }

    /// The minimum address of a single RTU device.
    #[must_use]
    pub const fn min_device() -> Self {
        Self(1)
    }

    /// The maximum address of a single RTU device.
    #[must_use]
    pub const fn max_device() -> Self {
        Self(247)
    }

    /// `true` if this addresses the broadcast unit.
    #[must_use]
    pub const fn is_broadcast(self) -> bool {
        self.0 == BROADCAST_UNIT
    }

    /// `true` if this addresses a single RTU device (`1..=247`).
    #[must_use]
    pub const fn is_single_device(self) -> bool {
        self.0 >= Self::min_device().0 && self.0 <= Self::max_device().0
    }

    /// `true` if this is outside the addressable RTU device range and
    /// is not the broadcast address, e.g. the reserved TCP gateway
    /// value `0xFF`.
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 > Self::max_device().0
    }
}

impl From<u8> for Unit {
    fn from(from: u8) -> Self {
        Self(from)
    }
}

impl From<Unit> for u8 {
    fn from(from: Unit) -> Self {
        from.0
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.0, self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_is_zero() {
        assert!(Unit::broadcast().is_broadcast());
        assert_eq!(Unit::broadcast(), Unit(0));
    }

    #[test]
    fn device_range() {
        assert!(!Unit(0).is_single_device());
        assert!(Unit(1).is_single_device());
        assert!(Unit(247).is_single_device());
        assert!(!Unit(248).is_single_device());
        assert!(Unit(248).is_reserved());
    }

    #[test]
    fn display_shows_hex() {
        assert_eq!(format!("{}", Unit(0x7B)), "123 (0x7B)");
    }
}
