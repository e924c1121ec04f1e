// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(unreachable_pub)]
#![cfg_attr(not(test), warn(unsafe_code))]
#![warn(clippy::all)]
#![warn(clippy::cast_lossless)]
#![warn(rustdoc::broken_intra_doc_links)]
#![doc = include_str!("../README.md")]

//! A compact, embeddable MODBUS protocol engine for resource-constrained
//! hosts.
//!
//! This crate is pure protocol logic: PDU encoding/decoding for the
//! eight classic function codes, RTU and TCP framing, a client request
//! path and a server poll loop. It never owns a transport, a timer, or
//! a thread. Callers supply blocking byte I/O through the [`Channel`]
//! trait and drive the engine from their own loop. All buffers are
//! fixed-size; the engine never allocates.
//!
//! ```no_run
//! use modbus_engine::{Modbus, Channel, ReadOutcome};
//!
//! struct MyChannel;
//!
//! impl Channel for MyChannel {
//!     fn read_byte(&mut self, _timeout_ms: Option<u32>) -> ReadOutcome {
//!         ReadOutcome::Transport // wire up a real serial port or socket here
//!     }
//!     fn write_byte(&mut self, _byte: u8, _timeout_ms: Option<u32>) -> bool {
//!         false
//!     }
//!     fn sleep_ms(&mut self, _ms: u32) {}
//! }
//!
//! # #[cfg(feature = "client")]
//! # fn demo() -> modbus_engine::Result<()> {
//! let mut modbus = Modbus::client_rtu(MyChannel, 0x01.into())?;
//! let regs = modbus.read_holding_registers(0x0000, 2)?;
//! println!("{:?}", regs.as_slice());
//! # Ok(())
//! # }
//! ```

pub mod bitfield;
pub(crate) mod codec;
pub mod error;
pub mod frame;
pub mod io;
pub mod unit;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "server")]
pub mod server;

pub use bitfield::Bitfield;
pub use error::{Error, Exception, Result};
pub use frame::{Request, Response};
pub use io::{ByteIo, Channel, ReadOutcome};
#[cfg(feature = "server")]
pub use server::{PollOutcome, ServerCallbacks};
pub use unit::{Unit, BROADCAST_UNIT};

/// Largest ADU this engine will ever build or accept: a TCP ADU (7-byte
/// MBAP header + up to 253-byte PDU).
pub const MAX_ADU_LEN: usize = 7 + 253;

/// Whether a [`Modbus`] instance acts as the requester (master) or the
/// responder (slave) of the conversation. Set at construction, never
/// changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// The wire framing a [`Modbus`] instance speaks. Set at construction,
/// never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Rtu,
    Tcp,
}

/// Timing configuration shared by every request/poll call.
///
/// `read_timeout_ms`/`byte_timeout_ms` of `None` mean "no deadline";
/// there is no sign bit here to smuggle that through, so the disabled
/// state gets its own variant instead of a negative sentinel.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timing {
    pub read_timeout_ms: Option<u32>,
    pub byte_timeout_ms: Option<u32>,
    pub byte_spacing_ms: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            read_timeout_ms: None,
            byte_timeout_ms: None,
            byte_spacing_ms: 0,
        }
    }
}

/// A single MODBUS protocol instance: one role, one transport, one
/// peer, for its whole lifetime.
///
/// It owns the caller's [`Channel`], the timing configuration, RTU unit
/// addressing, the TCP transaction counter, and nothing else: no heap
/// allocation, no background task. Construct one per logical peer, use
/// it, drop it.
pub struct Modbus<C: Channel> {
    pub(crate) channel: C,
    pub(crate) role: Role,
    pub(crate) transport: Transport,
    pub(crate) unit: Unit,
    pub(crate) timing: Timing,
    pub(crate) next_transaction_id: u16,
}

impl<C: Channel> Modbus<C> {
    /// A client instance talking RTU to `destination`. Rejects
    /// `destination` outside `0..=247` (`0` is the broadcast address).
    #[cfg(feature = "client")]
    pub fn client_rtu(channel: C, destination: Unit) -> Result<Self> {
        if destination.0 > Unit::max_device().0 {
            return Err(Error::InvalidArgument);
        }
        Ok(Self::new(channel, Role::Client, Transport::Rtu, destination))
    }

    /// A client instance talking TCP. The unit identifier is carried on
    /// the wire for gateway compatibility but is not validated locally.
    #[cfg(feature = "client")]
    pub fn client_tcp(channel: C, unit: Unit) -> Self {
        Self::new(channel, Role::Client, Transport::Tcp, unit)
    }

    /// A server instance listening on RTU as `own_address`. An address
    /// of `0` is rejected: an RTU server at the broadcast address has no
    /// well-defined response behaviour, so this engine treats it as a
    /// configuration error rather than guessing.
    #[cfg(feature = "server")]
    pub fn server_rtu(channel: C, own_address: Unit) -> Result<Self> {
        if !own_address.is_single_device() {
            return Err(Error::InvalidArgument);
        }
        Ok(Self::new(channel, Role::Server, Transport::Rtu, own_address))
    }

    /// A server instance listening on TCP.
    #[cfg(feature = "server")]
    pub fn server_tcp(channel: C) -> Self {
        Self::new(channel, Role::Server, Transport::Tcp, Unit::broadcast())
    }

    fn new(channel: C, role: Role, transport: Transport, unit: Unit) -> Self {
        Self {
            channel,
            role,
            transport,
            unit,
            timing: Timing::default(),
            next_transaction_id: 0,
        }
    }

    /// Maximum wall time allowed for one whole request/response (or one
    /// server poll), or `None` to disable the deadline.
    pub fn set_read_timeout_ms(&mut self, timeout_ms: Option<u32>) {
        self.timing.read_timeout_ms = timeout_ms;
    }

    /// Maximum wall time allowed between consecutive bytes of one
    /// message, or `None` to disable the deadline.
    pub fn set_byte_timeout_ms(&mut self, timeout_ms: Option<u32>) {
        self.timing.byte_timeout_ms = timeout_ms;
    }

    /// Enforced pause between transmitted bytes; RTU only, ignored on
    /// TCP transports.
    pub fn set_byte_spacing_ms(&mut self, spacing_ms: u32) {
        self.timing.byte_spacing_ms = spacing_ms;
    }

    /// Change the peer a client instance addresses for its next
    /// request. Only meaningful for clients; rejects addresses outside
    /// `0..=247`.
    #[cfg(feature = "client")]
    pub fn set_destination_unit(&mut self, destination: Unit) -> Result<()> {
        if self.role != Role::Client {
            return Err(Error::InvalidArgument);
        }
        if destination.0 > Unit::max_device().0 {
            return Err(Error::InvalidArgument);
        }
        self.unit = destination;
        Ok(())
    }

    /// The role this instance was created with.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// The transport this instance was created with.
    #[must_use]
    pub const fn transport(&self) -> Transport {
        self.transport
    }

    /// Reach the underlying channel, e.g. to reconfigure the caller's
    /// own transport state.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub(crate) fn byte_io(&mut self) -> ByteIo<'_, C> {
        ByteIo::new(
            &mut self.channel,
            self.timing.read_timeout_ms,
            self.timing.byte_timeout_ms,
            if matches!(self.transport, Transport::Rtu) {
                self.timing.byte_spacing_ms
            } else {
                0
            },
        )
    }
}

impl<C: Channel> core::fmt::Debug for Modbus<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Modbus")
            .field("role", &self.role)
            .field("transport", &self.transport)
            .field("unit", &self.unit)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::test_support::LoopbackChannel;

    #[test]
    fn client_rtu_rejects_out_of_range_destination() {
        let result = Modbus::client_rtu(LoopbackChannel::default(), Unit(248));
        assert!(matches!(result, Err(Error::InvalidArgument)));
    }

    #[test]
    fn server_rtu_rejects_broadcast_own_address() {
        let result = Modbus::server_rtu(LoopbackChannel::default(), Unit::broadcast());
        assert!(matches!(result, Err(Error::InvalidArgument)));
    }

    #[test]
    fn server_rtu_accepts_valid_own_address() {
        assert!(Modbus::server_rtu(LoopbackChannel::default(), Unit(1)).is_ok());
    }
}
