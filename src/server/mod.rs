// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server (slave) poll loop: receive one frame, dispatch, respond
//!
//! The state machine `IDLE -> RECEIVING -> VALIDATING ->
//! {DISPATCHING -> RESPONDING | DROPPING | EXCEPTING} -> IDLE` is
//! [`Modbus::poll`]: one call does exactly one frame's worth of work and
//! always returns to a fresh IDLE state, success or failure.

use byteorder::{BigEndian, ByteOrder};

use crate::bitfield::Bitfield;
use crate::codec::{is_known_function, rtu, tcp};
use crate::error::{Error, Exception, Result};
use crate::frame::{
    function, Address, Quantity, RegisterBuf, Request, Response, Word, MAX_READ_BITS_QTY,
    MAX_READ_REGS_QTY, MAX_WRITE_BITS_QTY, MAX_WRITE_REGS_QTY,
};
use crate::io::Channel;
use crate::{Modbus, Role, Transport};

/// What one [`Modbus::poll`] call did with the frame it received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A normal response was dispatched and sent.
    Responded,
    /// The callback (or a range check) raised a protocol exception, and
    /// the matching exception response was sent.
    Excepted(Exception),
    /// An RTU broadcast request was dispatched; no response is ever sent
    /// for broadcast, successful or not.
    Broadcast,
    /// An RTU frame addressed another unit; consumed, not dispatched.
    Ignored,
    /// A malformed RTU frame (bad CRC, or a body too long for the
    /// buffer) was silently discarded.
    Dropped,
}

/// The eight server-side request callbacks a device implements.
///
/// Every method defaults to returning [`Exception::IllegalFunction`]: a
/// device type implements only the handlers for the operations it
/// actually supports, and unsupported ones fall back automatically.
pub trait ServerCallbacks {
    /// Fill `out` with `quantity` coil states starting at `address`.
    fn read_coils(&mut self, address: Address, quantity: Quantity, out: &mut Bitfield) -> Result<()> {
        let _ = (address, quantity, out);
        Err(Exception::IllegalFunction.into())
    }

    /// Fill `out` with `quantity` discrete-input states starting at `address`.
    fn read_discrete_inputs(
        &mut self,
        address: Address,
        quantity: Quantity,
        out: &mut Bitfield,
    ) -> Result<()> {
        let _ = (address, quantity, out);
        Err(Exception::IllegalFunction.into())
    }

    /// Fill `out` with `quantity` holding-register values starting at `address`.
    fn read_holding_registers(
        &mut self,
        address: Address,
        quantity: Quantity,
        out: &mut RegisterBuf,
    ) -> Result<()> {
        let _ = (address, quantity, out);
        Err(Exception::IllegalFunction.into())
    }

    /// Fill `out` with `quantity` input-register values starting at `address`.
    fn read_input_registers(
        &mut self,
        address: Address,
        quantity: Quantity,
        out: &mut RegisterBuf,
    ) -> Result<()> {
        let _ = (address, quantity, out);
        Err(Exception::IllegalFunction.into())
    }

    /// Set a single coil.
    fn write_single_coil(&mut self, address: Address, value: bool) -> Result<()> {
        let _ = (address, value);
        Err(Exception::IllegalFunction.into())
    }

    /// Set a single holding register.
    fn write_single_register(&mut self, address: Address, value: Word) -> Result<()> {
        let _ = (address, value);
        Err(Exception::IllegalFunction.into())
    }

    /// Set `quantity` coils starting at `address` from `values`.
    fn write_multiple_coils(
        &mut self,
        address: Address,
        quantity: Quantity,
        values: &Bitfield,
    ) -> Result<()> {
        let _ = (address, quantity, values);
        Err(Exception::IllegalFunction.into())
    }

    /// Set `quantity` holding registers starting at `address` from `values`.
    fn write_multiple_registers(
        &mut self,
        address: Address,
        quantity: Quantity,
        values: &[Word],
    ) -> Result<()> {
        let _ = (address, quantity, values);
        Err(Exception::IllegalFunction.into())
    }
}

fn check_quantity(quantity: Quantity, max: u16) -> Result<()> {
    if quantity == 0 || quantity > max {
        return Err(Exception::IllegalDataValue.into());
    }
    Ok(())
}

fn decode_read_body(body: &[u8]) -> Result<(Address, Quantity)> {
    if body.len() != 4 {
        return Err(Exception::IllegalDataValue.into());
    }
    Ok((
        BigEndian::read_u16(&body[0..2]),
        BigEndian::read_u16(&body[2..4]),
    ))
}

/// Parse a request PDU into a typed [`Request`], rejecting anything that
/// violates a function's range/length constraints with
/// [`Exception::IllegalDataValue`].
fn decode_request(pdu: &[u8]) -> Result<Request> {
    let fc = pdu[0];
    let body = &pdu[1..];
    match fc {
        function::READ_COILS => {
            let (addr, qty) = decode_read_body(body)?;
            Ok(Request::ReadCoils(addr, qty))
        }
        function::READ_DISCRETE_INPUTS => {
            let (addr, qty) = decode_read_body(body)?;
            Ok(Request::ReadDiscreteInputs(addr, qty))
        }
        function::READ_HOLDING_REGISTERS => {
            let (addr, qty) = decode_read_body(body)?;
            Ok(Request::ReadHoldingRegisters(addr, qty))
        }
        function::READ_INPUT_REGISTERS => {
            let (addr, qty) = decode_read_body(body)?;
            Ok(Request::ReadInputRegisters(addr, qty))
        }
        function::WRITE_SINGLE_COIL => {
            if body.len() != 4 {
                return Err(Exception::IllegalDataValue.into());
            }
            let addr = BigEndian::read_u16(&body[0..2]);
            let word = BigEndian::read_u16(&body[2..4]);
            let value = crate::frame::word_to_coil(word).ok_or(Exception::IllegalDataValue)?;
            Ok(Request::WriteSingleCoil(addr, value))
        }
        function::WRITE_SINGLE_REGISTER => {
            if body.len() != 4 {
                return Err(Exception::IllegalDataValue.into());
            }
            let addr = BigEndian::read_u16(&body[0..2]);
            let value = BigEndian::read_u16(&body[2..4]);
            Ok(Request::WriteSingleRegister(addr, value))
        }
        function::WRITE_MULTIPLE_COILS => {
            if body.len() < 5 {
                return Err(Exception::IllegalDataValue.into());
            }
            let addr = BigEndian::read_u16(&body[0..2]);
            let qty = BigEndian::read_u16(&body[2..4]);
            let count = usize::from(body[4]);
            let packed = &body[5..];
            if qty == 0
                || qty > MAX_WRITE_BITS_QTY
                || count != Bitfield::packed_len(usize::from(qty))
                || packed.len() != count
            {
                return Err(Exception::IllegalDataValue.into());
            }
            Ok(Request::WriteMultipleCoils(
                addr,
                Bitfield::from_packed(packed, usize::from(qty)),
            ))
        }
        function::WRITE_MULTIPLE_REGISTERS => {
            if body.len() < 5 {
                return Err(Exception::IllegalDataValue.into());
            }
            let addr = BigEndian::read_u16(&body[0..2]);
            let qty = BigEndian::read_u16(&body[2..4]);
            let count = usize::from(body[4]);
            let reg_bytes = &body[5..];
            if qty == 0
                || qty > MAX_WRITE_REGS_QTY
                || count != usize::from(qty) * 2
                || reg_bytes.len() != count
            {
                return Err(Exception::IllegalDataValue.into());
            }
            let mut regs = RegisterBuf::new();
            for chunk in reg_bytes.chunks_exact(2) {
                regs.push(BigEndian::read_u16(chunk));
            }
            Ok(Request::WriteMultipleRegisters(addr, regs))
        }
        _ => Err(Exception::IllegalFunction.into()),
    }
}

/// Dispatch a decoded request PDU to `callbacks`, producing either a
/// normal response or (wrapped in [`Error::Exception`]) an exception.
/// Any other [`Error`] aborts the poll without producing a response.
fn dispatch<S: ServerCallbacks>(callbacks: &mut S, pdu: &[u8]) -> Result<Response> {
    if pdu.is_empty() || !is_known_function(pdu[0]) {
        log::debug!(
            "unknown function code 0x{:02X}",
            pdu.first().copied().unwrap_or(0)
        );
        return Err(Exception::IllegalFunction.into());
    }
    match decode_request(pdu)? {
        Request::ReadCoils(addr, qty) => {
            check_quantity(qty, MAX_READ_BITS_QTY)?;
            let mut out = Bitfield::new();
            callbacks.read_coils(addr, qty, &mut out)?;
            Ok(Response::ReadCoils(out))
        }
        Request::ReadDiscreteInputs(addr, qty) => {
            check_quantity(qty, MAX_READ_BITS_QTY)?;
            let mut out = Bitfield::new();
            callbacks.read_discrete_inputs(addr, qty, &mut out)?;
            Ok(Response::ReadDiscreteInputs(out))
        }
        Request::ReadHoldingRegisters(addr, qty) => {
            check_quantity(qty, MAX_READ_REGS_QTY)?;
            let mut out = RegisterBuf::new();
            callbacks.read_holding_registers(addr, qty, &mut out)?;
            Ok(Response::ReadHoldingRegisters(out))
        }
        Request::ReadInputRegisters(addr, qty) => {
            check_quantity(qty, MAX_READ_REGS_QTY)?;
            let mut out = RegisterBuf::new();
            callbacks.read_input_registers(addr, qty, &mut out)?;
            Ok(Response::ReadInputRegisters(out))
        }
        Request::WriteSingleCoil(addr, value) => {
            callbacks.write_single_coil(addr, value)?;
            Ok(Response::WriteSingleCoil(addr, value))
        }
        Request::WriteSingleRegister(addr, value) => {
            callbacks.write_single_register(addr, value)?;
            Ok(Response::WriteSingleRegister(addr, value))
        }
        Request::WriteMultipleCoils(addr, values) => {
            let qty = values.len() as Quantity;
            callbacks.write_multiple_coils(addr, qty, &values)?;
            Ok(Response::WriteMultipleCoils(addr, qty))
        }
        Request::WriteMultipleRegisters(addr, values) => {
            let qty = values.len() as Quantity;
            callbacks.write_multiple_registers(addr, qty, &values)?;
            Ok(Response::WriteMultipleRegisters(addr, qty))
        }
    }
}

/// Encode a response into `buf`, returning the number of bytes written.
fn encode_response(response: &Response, buf: &mut [u8]) -> usize {
    match response {
        Response::ReadCoils(bits) | Response::ReadDiscreteInputs(bits) => {
            buf[0] = response.function_code();
            let packed = bits.packed_bytes();
            buf[1] = packed.len() as u8;
            buf[2..2 + packed.len()].copy_from_slice(packed);
            2 + packed.len()
        }
        Response::ReadHoldingRegisters(regs) | Response::ReadInputRegisters(regs) => {
            buf[0] = response.function_code();
            let byte_count = regs.len() * 2;
            buf[1] = byte_count as u8;
            for (i, word) in regs.iter().enumerate() {
                BigEndian::write_u16(&mut buf[2 + i * 2..4 + i * 2], *word);
            }
            2 + byte_count
        }
        Response::WriteSingleCoil(addr, value) => {
            buf[0] = function::WRITE_SINGLE_COIL;
            BigEndian::write_u16(&mut buf[1..3], *addr);
            BigEndian::write_u16(&mut buf[3..5], crate::frame::coil_to_word(*value));
            5
        }
        Response::WriteSingleRegister(addr, value) => {
            buf[0] = function::WRITE_SINGLE_REGISTER;
            BigEndian::write_u16(&mut buf[1..3], *addr);
            BigEndian::write_u16(&mut buf[3..5], *value);
            5
        }
        Response::WriteMultipleCoils(addr, qty) => {
            buf[0] = function::WRITE_MULTIPLE_COILS;
            BigEndian::write_u16(&mut buf[1..3], *addr);
            BigEndian::write_u16(&mut buf[3..5], *qty);
            5
        }
        Response::WriteMultipleRegisters(addr, qty) => {
            buf[0] = function::WRITE_MULTIPLE_REGISTERS;
            BigEndian::write_u16(&mut buf[1..3], *addr);
            BigEndian::write_u16(&mut buf[3..5], *qty);
            5
        }
    }
}

impl<C: Channel> Modbus<C> {
    /// Receive and answer exactly one frame.
    ///
    /// This is the whole server entry point: one call is one pass
    /// through `IDLE -> RECEIVING -> ... -> IDLE`. It blocks
    /// inside the `Channel` until a frame arrives (or the read timeout
    /// fires) and returns once that single frame has been handled.
    pub fn poll<S: ServerCallbacks>(&mut self, callbacks: &mut S) -> Result<PollOutcome> {
        if self.role != Role::Server {
            return Err(Error::InvalidArgument);
        }
        match self.transport {
            Transport::Rtu => self.poll_rtu(callbacks),
            Transport::Tcp => self.poll_tcp(callbacks),
        }
    }

    fn poll_rtu<S: ServerCallbacks>(&mut self, callbacks: &mut S) -> Result<PollOutcome> {
        let own_unit = self.unit;
        let frame = {
            let mut io = self.byte_io();
            match rtu::recv(&mut io, false) {
                Ok(frame) => frame,
                Err(Error::InvalidResponse) => {
                    log::warn!("dropping malformed RTU frame");
                    return Ok(PollOutcome::Dropped);
                }
                Err(e) => return Err(e),
            }
        };

        if frame.unit != own_unit && !frame.unit.is_broadcast() {
            log::debug!("ignoring frame addressed to unit {}", frame.unit);
            return Ok(PollOutcome::Ignored);
        }
        let broadcast = frame.unit.is_broadcast();
        let request_fc = frame.pdu[0];

        match dispatch(callbacks, &frame.pdu[..frame.pdu_len]) {
            Ok(response) => {
                if broadcast {
                    return Ok(PollOutcome::Broadcast);
                }
                let mut buf = [0u8; rtu::MAX_PDU_LEN];
                let len = encode_response(&response, &mut buf);
                let mut io = self.byte_io();
                rtu::send(&mut io, own_unit, &buf[..len])?;
                Ok(PollOutcome::Responded)
            }
            Err(Error::Exception(ex)) => {
                if broadcast {
                    return Ok(PollOutcome::Broadcast);
                }
                let mut io = self.byte_io();
                rtu::send(
                    &mut io,
                    own_unit,
                    &[request_fc | function::EXCEPTION_MASK, ex.as_u8()],
                )?;
                Ok(PollOutcome::Excepted(ex))
            }
            Err(e) => Err(e),
        }
    }

    fn poll_tcp<S: ServerCallbacks>(&mut self, callbacks: &mut S) -> Result<PollOutcome> {
        let frame = {
            let mut io = self.byte_io();
            tcp::recv(&mut io, false, None)?
        };
        let request_fc = frame.pdu[0];

        match dispatch(callbacks, &frame.pdu[..frame.pdu_len]) {
            Ok(response) => {
                let mut buf = [0u8; tcp::MAX_PDU_LEN];
                let len = encode_response(&response, &mut buf);
                let mut io = self.byte_io();
                tcp::send(&mut io, frame.transaction_id, frame.unit, &buf[..len])?;
                Ok(PollOutcome::Responded)
            }
            Err(Error::Exception(ex)) => {
                let mut io = self.byte_io();
                tcp::send(
                    &mut io,
                    frame.transaction_id,
                    frame.unit,
                    &[request_fc | function::EXCEPTION_MASK, ex.as_u8()],
                )?;
                Ok(PollOutcome::Excepted(ex))
            }
            Err(e) => Err(e),
        }
    }
}
