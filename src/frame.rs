// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The eight supported function codes and their request/response bodies

use crate::bitfield::Bitfield;

/// A Modbus register address (`0`-based protocol addressing).
pub type Address = u16;

/// Number of coils/registers to read or write.
pub type Quantity = u16;

/// A single 16-bit register value (big-endian on the wire).
pub type Word = u16;

pub mod function {
    pub const READ_COILS: u8 = 0x01;
    pub const READ_DISCRETE_INPUTS: u8 = 0x02;
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    pub const WRITE_SINGLE_COIL: u8 = 0x05;
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

    /// High bit set on the function-code byte of an exception response.
    pub const EXCEPTION_MASK: u8 = 0x80;
}

/// Maximum quantity of coils/discrete inputs per request.
pub const MAX_READ_BITS_QTY: u16 = 2000;
/// Maximum quantity of holding/input registers per read request.
pub const MAX_READ_REGS_QTY: u16 = 125;
/// Maximum quantity of coils per Write Multiple Coils request.
pub const MAX_WRITE_BITS_QTY: u16 = 1968;
/// Maximum quantity of registers per Write Multiple Registers request.
pub const MAX_WRITE_REGS_QTY: u16 = 123;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

/// Encode a single-coil value as the wire word (`0xFF00`/`0x0000`).
#[must_use]
pub const fn coil_to_word(value: bool) -> u16 {
    if value {
        COIL_ON
    } else {
        COIL_OFF
    }
}

/// Decode a single-coil wire word. `None` for any value other than the
/// two reserved ones (caller should raise Illegal Data Value).
#[must_use]
pub const fn word_to_coil(word: u16) -> Option<bool> {
    match word {
        COIL_ON => Some(true),
        COIL_OFF => Some(false),
        _ => None,
    }
}

/// A request from the client (master) to the server (slave).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils(Address, Quantity),
    ReadDiscreteInputs(Address, Quantity),
    ReadHoldingRegisters(Address, Quantity),
    ReadInputRegisters(Address, Quantity),
    WriteSingleCoil(Address, bool),
    WriteSingleRegister(Address, Word),
    WriteMultipleCoils(Address, Bitfield),
    WriteMultipleRegisters(Address, RegisterBuf),
}

impl Request {
    #[must_use]
    pub const fn function_code(&self) -> u8 {
        match self {
            Self::ReadCoils(..) => function::READ_COILS,
            Self::ReadDiscreteInputs(..) => function::READ_DISCRETE_INPUTS,
            Self::ReadHoldingRegisters(..) => function::READ_HOLDING_REGISTERS,
            Self::ReadInputRegisters(..) => function::READ_INPUT_REGISTERS,
            Self::WriteSingleCoil(..) => function::WRITE_SINGLE_COIL,
            Self::WriteSingleRegister(..) => function::WRITE_SINGLE_REGISTER,
            Self::WriteMultipleCoils(..) => function::WRITE_MULTIPLE_COILS,
            Self::WriteMultipleRegisters(..) => function::WRITE_MULTIPLE_REGISTERS,
        }
    }
}

/// The data of a successful response.
///
/// `ReadCoils`/`ReadDiscreteInputs` carry a [`Bitfield`] whose length is
/// always a multiple of 8 on the wire; callers should only look at the
/// first `quantity` bits they requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Bitfield),
    ReadDiscreteInputs(Bitfield),
    ReadHoldingRegisters(RegisterBuf),
    ReadInputRegisters(RegisterBuf),
    WriteSingleCoil(Address, bool),
    WriteSingleRegister(Address, Word),
    WriteMultipleCoils(Address, Quantity),
    WriteMultipleRegisters(Address, Quantity),
}

impl Response {
    #[must_use]
    pub const fn function_code(&self) -> u8 {
        match self {
            Self::ReadCoils(_) => function::READ_COILS,
            Self::ReadDiscreteInputs(_) => function::READ_DISCRETE_INPUTS,
            Self::ReadHoldingRegisters(_) => function::READ_HOLDING_REGISTERS,
            Self::ReadInputRegisters(_) => function::READ_INPUT_REGISTERS,
            Self::WriteSingleCoil(..) => function::WRITE_SINGLE_COIL,
            Self::WriteSingleRegister(..) => function::WRITE_SINGLE_REGISTER,
            Self::WriteMultipleCoils(..) => function::WRITE_MULTIPLE_COILS,
            Self::WriteMultipleRegisters(..) => function::WRITE_MULTIPLE_REGISTERS,
        }
    }
}

/// Maximum registers in one PDU: a 253-byte PDU minus 1 (function code)
/// and 1 (byte count) divides into at most 125 16-bit words, which is
/// also `MAX_READ_REGS_QTY`.
pub const MAX_REGS: usize = 125;

/// A fixed-capacity buffer of up to [`MAX_REGS`] 16-bit registers, the
/// register-array counterpart of [`Bitfield`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterBuf {
    words: [u16; MAX_REGS],
    len: usize,
}

impl Default for RegisterBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBuf {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            words: [0; MAX_REGS],
            len: 0,
        }
    }

    #[must_use]
    pub fn from_slice(words: &[u16]) -> Self {
        let mut buf = Self::new();
        let n = words.len().min(MAX_REGS);
        buf.words[..n].copy_from_slice(&words[..n]);
        buf.len = n;
        buf
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u16] {
        &self.words[..self.len]
    }

    pub fn push(&mut self, word: u16) -> bool {
        if self.len >= MAX_REGS {
            return false;
        }
        self.words[self.len] = word;
        self.len += 1;
        true
    }
}

impl core::ops::Deref for RegisterBuf {
    type Target = [u16];

    fn deref(&self) -> &[u16] {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coil_words() {
        assert_eq!(coil_to_word(true), 0xFF00);
        assert_eq!(coil_to_word(false), 0x0000);
        assert_eq!(word_to_coil(0xFF00), Some(true));
        assert_eq!(word_to_coil(0x0000), Some(false));
        assert_eq!(word_to_coil(0x1234), None);
    }

    #[test]
    fn function_codes() {
        assert_eq!(
            Request::ReadCoils(0, 1).function_code(),
            function::READ_COILS
        );
        assert_eq!(
            Response::WriteMultipleRegisters(0, 2).function_code(),
            function::WRITE_MULTIPLE_REGISTERS
        );
    }

    #[test]
    fn register_buf_roundtrip() {
        let buf = RegisterBuf::from_slice(&[0x000A, 0x0102]);
        assert_eq!(buf.as_slice(), &[0x000A, 0x0102]);
        assert_eq!(&*buf, &[0x000A, 0x0102]);
    }
}
