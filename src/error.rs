// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Library error type

use core::fmt;

/// A specialized [`Result`] type for Modbus operations.
pub type Result<T> = core::result::Result<T, Error>;

/// A Modbus protocol exception, as returned by a peer in an exception
/// response (function code with the high bit set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
}

impl Exception {
    /// Decode a one-byte exception code, as carried on the wire.
    #[must_use]
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::ServerDeviceFailure),
            _ => None,
        }
    }

    /// Encode as the one-byte exception code carried on the wire.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    #[cfg(feature = "strerror")]
    const fn description(self) -> &'static str {
        match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::ServerDeviceFailure => "server device failure",
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[cfg(feature = "strerror")]
        {
            write!(f, "{}", self.description())
        }
        #[cfg(not(feature = "strerror"))]
        {
            write!(f, "{:?}", self)
        }
    }
}

/// Modbus engine errors.
///
/// Local errors (`InvalidArgument`, `InvalidResponse`, `Timeout`,
/// `Transport`) are detected by this engine; `Exception` wraps a protocol
/// exception returned by a peer. Use [`Error::exception`] to tell the two
/// apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Caller supplied out-of-range input, or the instance is
    /// misconfigured; detected before any I/O.
    InvalidArgument,
    /// Wire data violated framing: bad CRC, bad protocol id, transaction
    /// id mismatch, byte-count mismatch, echo mismatch, unknown
    /// exception code.
    InvalidResponse,
    /// The message or byte deadline expired.
    Timeout,
    /// The underlying channel returned a transport failure.
    Transport,
    /// A peer responded with a Modbus protocol exception.
    Exception(Exception),
}

impl Error {
    /// `true` if this is a protocol exception (1..=4) rather than a
    /// local error.
    #[must_use]
    pub const fn exception(&self) -> Option<Exception> {
        match self {
            Self::Exception(ex) => Some(*ex),
            _ => None,
        }
    }
}

impl From<Exception> for Error {
    fn from(exception: Exception) -> Self {
        Self::Exception(exception)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[cfg(feature = "strerror")]
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::InvalidResponse => write!(f, "invalid response"),
            Self::Timeout => write!(f, "timeout"),
            Self::Transport => write!(f, "transport error"),
            Self::Exception(ex) => write!(f, "Modbus exception: {ex}"),
        }
        #[cfg(not(feature = "strerror"))]
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_roundtrip() {
        for code in 1u8..=4 {
            let ex = Exception::from_u8(code).unwrap();
            assert_eq!(ex.as_u8(), code);
        }
        assert!(Exception::from_u8(0).is_none());
        assert!(Exception::from_u8(5).is_none());
    }

    #[test]
    fn distinguishes_exception_from_local_error() {
        assert_eq!(Error::Timeout.exception(), None);
        assert_eq!(
            Error::Exception(Exception::IllegalDataValue).exception(),
            Some(Exception::IllegalDataValue)
        );
    }
}
