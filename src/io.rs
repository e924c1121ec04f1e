// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Byte I/O layer: deadline-aware wrapper around the caller's transport
//!
//! This is the only place blocking happens. Everything above `ByteIo`
//! works with plain byte slices. Nothing here owns a socket, a serial
//! port, or a thread: those belong to the caller's `Channel` implementation.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// The outcome of one [`Channel::read_byte`] call: a byte, a timeout, or
/// a transport failure, spelled out as variants instead of a sentinel
/// return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A byte was read.
    Byte(u8),
    /// The deadline passed with no byte available.
    Timeout,
    /// The underlying transport failed.
    Transport,
}

/// The platform hooks a caller supplies: blocking byte I/O plus a sleep.
///
/// Implementors own whatever transport (serial port, socket) and state
/// the callbacks need; this engine never sees it directly.
pub trait Channel {
    /// Read one byte, blocking for at most `timeout_ms` (`None` disables
    /// the deadline for this call).
    fn read_byte(&mut self, timeout_ms: Option<u32>) -> ReadOutcome;

    /// Write one byte, blocking for at most `timeout_ms`. Returns `true`
    /// on success; both an explicit transport error and returning
    /// having written nothing are caller failures.
    fn write_byte(&mut self, byte: u8, timeout_ms: Option<u32>) -> bool;

    /// Pause for `ms` milliseconds. Used between transmitted bytes on
    /// RTU when `byte_spacing_ms > 0`.
    fn sleep_ms(&mut self, ms: u32);
}

/// Deadline bookkeeping and the two bulk byte operations, layered over
/// a borrowed [`Channel`].
pub struct ByteIo<'a, C: Channel> {
    channel: &'a mut C,
    read_timeout_ms: Option<u32>,
    byte_timeout_ms: Option<u32>,
    byte_spacing_ms: u32,
    frame_deadline: Option<Instant>,
}

impl<'a, C: Channel> ByteIo<'a, C> {
    pub(crate) fn new(
        channel: &'a mut C,
        read_timeout_ms: Option<u32>,
        byte_timeout_ms: Option<u32>,
        byte_spacing_ms: u32,
    ) -> Self {
        Self {
            channel,
            read_timeout_ms,
            byte_timeout_ms,
            byte_spacing_ms,
            frame_deadline: None,
        }
    }

    /// Start a new overall message deadline, to be shared by every
    /// [`Self::get_n_bytes`] call belonging to the same frame.
    pub(crate) fn begin_frame(&mut self) {
        self.frame_deadline = self
            .read_timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(u64::from(ms)));
    }

    /// Write `src` one byte at a time, pausing `byte_spacing_ms` between
    /// bytes when spacing is configured.
    pub(crate) fn put_n_bytes(&mut self, src: &[u8]) -> Result<()> {
        for (i, &byte) in src.iter().enumerate() {
            if i > 0 && self.byte_spacing_ms > 0 {
                self.channel.sleep_ms(self.byte_spacing_ms);
            }
            if !self.channel.write_byte(byte, self.byte_timeout_ms) {
                return Err(Error::Transport);
            }
        }
        Ok(())
    }

    /// Read `dst.len()` bytes, honoring both the overall message
    /// deadline (set by [`Self::begin_frame`]) and the per-byte
    /// deadline. Whichever fires first fails the read as `Timeout`.
    pub(crate) fn get_n_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
        for slot in dst.iter_mut() {
            let remaining_message = match self.frame_deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            let budget_ms = match (remaining_message, self.byte_timeout_ms) {
                (None, None) => None,
                (Some(msg), None) => Some(duration_to_ms(msg)),
                (None, Some(byte)) => Some(byte),
                (Some(msg), Some(byte)) => Some(duration_to_ms(msg).min(byte)),
            };

            match self.channel.read_byte(budget_ms) {
                ReadOutcome::Byte(b) => *slot = b,
                ReadOutcome::Timeout => return Err(Error::Timeout),
                ReadOutcome::Transport => return Err(Error::Transport),
            }
        }
        Ok(())
    }

    pub(crate) fn get_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8];
        self.get_n_bytes(&mut byte)?;
        Ok(byte[0])
    }
}

impl<'a, C: Channel> core::fmt::Debug for ByteIo<'a, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ByteIo")
            .field("read_timeout_ms", &self.read_timeout_ms)
            .field("byte_timeout_ms", &self.byte_timeout_ms)
            .field("byte_spacing_ms", &self.byte_spacing_ms)
            .finish_non_exhaustive()
    }
}

fn duration_to_ms(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{Channel, ReadOutcome};
    use std::collections::VecDeque;

    /// A loopback `Channel` backed by two in-memory queues, standing in
    /// for a real serial port or socket in unit tests.
    #[derive(Debug, Default)]
    pub struct LoopbackChannel {
        pub inbound: VecDeque<u8>,
        pub outbound: Vec<u8>,
        pub fail_next_write: bool,
        pub starve_reads: bool,
    }

    impl LoopbackChannel {
        pub fn with_inbound(bytes: &[u8]) -> Self {
            Self {
                inbound: bytes.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    impl Channel for LoopbackChannel {
        fn read_byte(&mut self, _timeout_ms: Option<u32>) -> ReadOutcome {
            if self.starve_reads {
                return ReadOutcome::Timeout;
            }
            match self.inbound.pop_front() {
                Some(b) => ReadOutcome::Byte(b),
                None => ReadOutcome::Timeout,
            }
        }

        fn write_byte(&mut self, byte: u8, _timeout_ms: Option<u32>) -> bool {
            if self.fail_next_write {
                return false;
            }
            self.outbound.push(byte);
            true
        }

        fn sleep_ms(&mut self, _ms: u32) {}
    }
}
