// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client (master) request path: one method per supported function code

use byteorder::{BigEndian, ByteOrder};

use crate::bitfield::Bitfield;
use crate::codec::{rtu, tcp};
use crate::error::{Error, Exception, Result};
use crate::frame::{
    function, Address, Quantity, RegisterBuf, Word, MAX_READ_BITS_QTY, MAX_READ_REGS_QTY,
    MAX_WRITE_BITS_QTY, MAX_WRITE_REGS_QTY,
};
use crate::io::Channel;
use crate::{Modbus, Role, Transport};

const MAX_ADDRESS_SPACE: u32 = 0x1_0000;

impl<C: Channel> Modbus<C> {
    fn check_role(&self) -> Result<()> {
        if self.role != Role::Client {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    fn check_read_bounds(&self, address: Address, quantity: Quantity, max: u16) -> Result<()> {
        self.check_role()?;
        if quantity == 0 || quantity > max {
            return Err(Error::InvalidArgument);
        }
        if u32::from(address) + u32::from(quantity) > MAX_ADDRESS_SPACE {
            return Err(Error::InvalidArgument);
        }
        if self.is_rtu_broadcast() {
            // No response is possible for a broadcast read.
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    fn check_write_bounds(&self, address: Address, quantity: Quantity, max: u16) -> Result<()> {
        self.check_role()?;
        if quantity == 0 || quantity > max {
            return Err(Error::InvalidArgument);
        }
        if u32::from(address) + u32::from(quantity) > MAX_ADDRESS_SPACE {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }

    fn is_rtu_broadcast(&self) -> bool {
        matches!(self.transport, Transport::Rtu) && self.unit.is_broadcast()
    }

    /// Send `pdu` and, unless this is an RTU broadcast, wait for and
    /// return the matching response PDU bytes.
    fn roundtrip(&mut self, pdu: &[u8]) -> Result<Option<([u8; rtu::MAX_PDU_LEN], usize)>> {
        let broadcast = self.is_rtu_broadcast();
        match self.transport {
            Transport::Rtu => {
                let mut io = self.byte_io();
                rtu::send(&mut io, self.unit, pdu)?;
                if broadcast {
                    return Ok(None);
                }
                let frame = rtu::recv(&mut io, true)?;
                Ok(Some((frame.pdu, frame.pdu_len)))
            }
            Transport::Tcp => {
                let tid = self.next_transaction_id;
                self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
                let mut io = self.byte_io();
                tcp::send(&mut io, tid, self.unit, pdu)?;
                let frame = tcp::recv(&mut io, true, Some(tid))?;
                Ok(Some((frame.pdu, frame.pdu_len)))
            }
        }
    }

    /// Validate that a response PDU answers `fc`, surfacing a peer
    /// exception as [`Error::Exception`] and any other mismatch as
    /// [`Error::InvalidResponse`].
    fn expect_function<'a>(fc: u8, pdu: &'a [u8], pdu_len: usize) -> Result<&'a [u8]> {
        if pdu_len == 0 {
            return Err(Error::InvalidResponse);
        }
        if pdu[0] == fc {
            return Ok(&pdu[1..pdu_len]);
        }
        if pdu[0] == fc | function::EXCEPTION_MASK {
            if pdu_len != 2 {
                return Err(Error::InvalidResponse);
            }
            let exception = Exception::from_u8(pdu[1]).ok_or(Error::InvalidResponse)?;
            log::debug!("server returned Modbus exception {exception}");
            return Err(Error::Exception(exception));
        }
        log::warn!("response echoed unexpected function code 0x{:02X}", pdu[0]);
        Err(Error::InvalidResponse)
    }

    fn read_bits(&mut self, fc: u8, address: Address, quantity: Quantity, max: u16) -> Result<Bitfield> {
        self.check_read_bounds(address, quantity, max)?;
        let mut pdu = [0u8; 5];
        pdu[0] = fc;
        BigEndian::write_u16(&mut pdu[1..3], address);
        BigEndian::write_u16(&mut pdu[3..5], quantity);
        let (resp, resp_len) = self.roundtrip(&pdu)?.ok_or(Error::InvalidResponse)?;
        let body = Self::expect_function(fc, &resp, resp_len)?;

        let expected_count = Bitfield::packed_len(usize::from(quantity));
        if body.is_empty() || usize::from(body[0]) != expected_count {
            return Err(Error::InvalidResponse);
        }
        let packed = &body[1..];
        if packed.len() < expected_count {
            return Err(Error::InvalidResponse);
        }
        // `from_packed` keeps exactly `quantity` bits; the wire format's
        // whole-byte padding beyond that is discarded.
        Ok(Bitfield::from_packed(packed, usize::from(quantity)))
    }

    fn read_regs(&mut self, fc: u8, address: Address, quantity: Quantity, max: u16) -> Result<RegisterBuf> {
        self.check_read_bounds(address, quantity, max)?;
        let mut pdu = [0u8; 5];
        pdu[0] = fc;
        BigEndian::write_u16(&mut pdu[1..3], address);
        BigEndian::write_u16(&mut pdu[3..5], quantity);
        let (resp, resp_len) = self.roundtrip(&pdu)?.ok_or(Error::InvalidResponse)?;
        let body = Self::expect_function(fc, &resp, resp_len)?;

        let expected_count = usize::from(quantity) * 2;
        if body.is_empty() || usize::from(body[0]) != expected_count {
            return Err(Error::InvalidResponse);
        }
        let words = &body[1..];
        if words.len() < expected_count {
            return Err(Error::InvalidResponse);
        }
        let mut regs = RegisterBuf::new();
        for chunk in words[..expected_count].chunks_exact(2).take(usize::from(quantity)) {
            regs.push(BigEndian::read_u16(chunk));
        }
        debug_assert!(regs.len() >= usize::from(quantity));
        Ok(regs)
    }

    /// Read Coils (FC 1): up to 2000 coils starting at `address`.
    pub fn read_coils(&mut self, address: Address, quantity: Quantity) -> Result<Bitfield> {
        self.read_bits(function::READ_COILS, address, quantity, MAX_READ_BITS_QTY)
    }

    /// Read Discrete Inputs (FC 2): up to 2000 inputs starting at `address`.
    pub fn read_discrete_inputs(&mut self, address: Address, quantity: Quantity) -> Result<Bitfield> {
        self.read_bits(
            function::READ_DISCRETE_INPUTS,
            address,
            quantity,
            MAX_READ_BITS_QTY,
        )
    }

    /// Read Holding Registers (FC 3): up to 125 registers starting at `address`.
    pub fn read_holding_registers(&mut self, address: Address, quantity: Quantity) -> Result<RegisterBuf> {
        self.read_regs(
            function::READ_HOLDING_REGISTERS,
            address,
            quantity,
            MAX_READ_REGS_QTY,
        )
    }

    /// Read Input Registers (FC 4): up to 125 registers starting at `address`.
    pub fn read_input_registers(&mut self, address: Address, quantity: Quantity) -> Result<RegisterBuf> {
        self.read_regs(
            function::READ_INPUT_REGISTERS,
            address,
            quantity,
            MAX_READ_REGS_QTY,
        )
    }

    /// Write Single Coil (FC 5).
    pub fn write_single_coil(&mut self, address: Address, value: bool) -> Result<()> {
        self.check_role()?;
        let word = crate::frame::coil_to_word(value);
        let mut pdu = [0u8; 5];
        pdu[0] = function::WRITE_SINGLE_COIL;
        BigEndian::write_u16(&mut pdu[1..3], address);
        BigEndian::write_u16(&mut pdu[3..5], word);

        let Some((resp, resp_len)) = self.roundtrip(&pdu)? else {
            return Ok(());
        };
        let body = Self::expect_function(function::WRITE_SINGLE_COIL, &resp, resp_len)?;
        if body.len() != 4 || body[0..2] != pdu[1..3] || body[2..4] != pdu[3..5] {
            return Err(Error::InvalidResponse);
        }
        Ok(())
    }

    /// Write Single Register (FC 6).
    pub fn write_single_register(&mut self, address: Address, value: Word) -> Result<()> {
        self.check_role()?;
        let mut pdu = [0u8; 5];
        pdu[0] = function::WRITE_SINGLE_REGISTER;
        BigEndian::write_u16(&mut pdu[1..3], address);
        BigEndian::write_u16(&mut pdu[3..5], value);

        let Some((resp, resp_len)) = self.roundtrip(&pdu)? else {
            return Ok(());
        };
        let body = Self::expect_function(function::WRITE_SINGLE_REGISTER, &resp, resp_len)?;
        if body.len() != 4 || body[0..2] != pdu[1..3] || body[2..4] != pdu[3..5] {
            return Err(Error::InvalidResponse);
        }
        Ok(())
    }

    /// Write Multiple Coils (FC 15): up to 1968 coils starting at `address`.
    pub fn write_multiple_coils(&mut self, address: Address, values: &Bitfield) -> Result<()> {
        let quantity = values.len() as Quantity;
        self.check_write_bounds(address, quantity, MAX_WRITE_BITS_QTY)?;

        let byte_count = values.packed_bytes().len();
        let mut pdu = [0u8; rtu::MAX_PDU_LEN];
        pdu[0] = function::WRITE_MULTIPLE_COILS;
        BigEndian::write_u16(&mut pdu[1..3], address);
        BigEndian::write_u16(&mut pdu[3..5], quantity);
        pdu[5] = byte_count as u8;
        pdu[6..6 + byte_count].copy_from_slice(values.packed_bytes());
        let pdu_len = 6 + byte_count;

        let Some((resp, resp_len)) = self.roundtrip(&pdu[..pdu_len])? else {
            return Ok(());
        };
        let body = Self::expect_function(function::WRITE_MULTIPLE_COILS, &resp, resp_len)?;
        if body.len() != 4 || body[0..2] != pdu[1..3] || body[2..4] != pdu[3..5] {
            return Err(Error::InvalidResponse);
        }
        Ok(())
    }

    /// Write Multiple Registers (FC 16): up to 123 registers starting at `address`.
    pub fn write_multiple_registers(&mut self, address: Address, values: &[Word]) -> Result<()> {
        if values.len() > usize::from(MAX_WRITE_REGS_QTY) {
            return Err(Error::InvalidArgument);
        }
        let quantity = values.len() as Quantity;
        self.check_write_bounds(address, quantity, MAX_WRITE_REGS_QTY)?;

        let byte_count = values.len() * 2;
        let mut pdu = [0u8; rtu::MAX_PDU_LEN];
        pdu[0] = function::WRITE_MULTIPLE_REGISTERS;
        BigEndian::write_u16(&mut pdu[1..3], address);
        BigEndian::write_u16(&mut pdu[3..5], quantity);
        pdu[5] = byte_count as u8;
        for (i, word) in values.iter().enumerate() {
            BigEndian::write_u16(&mut pdu[6 + i * 2..8 + i * 2], *word);
        }
        let pdu_len = 6 + byte_count;

        let Some((resp, resp_len)) = self.roundtrip(&pdu[..pdu_len])? else {
            return Ok(());
        };
        let body = Self::expect_function(function::WRITE_MULTIPLE_REGISTERS, &resp, resp_len)?;
        if body.len() != 4 || body[0..2] != pdu[1..3] || body[2..4] != pdu[3..5] {
            return Err(Error::InvalidResponse);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::test_support::LoopbackChannel;
    use crate::Unit;

    fn client() -> Modbus<LoopbackChannel> {
        Modbus::client_rtu(LoopbackChannel::default(), Unit(0x01)).unwrap()
    }

    #[test]
    fn rejects_quantity_out_of_bounds_without_any_write() {
        let mut modbus = client();
        let result = modbus.read_coils(0, 2001);
        assert!(matches!(result, Err(Error::InvalidArgument)));
        assert!(modbus.channel_mut().outbound.is_empty());
    }

    #[test]
    fn rejects_address_quantity_overflow() {
        let mut modbus = client();
        assert!(matches!(
            modbus.read_holding_registers(0xFFFF, 2),
            Err(Error::InvalidArgument)
        ));
    }

    #[test]
    fn write_multiple_registers_rejects_oversized_slice_without_any_write() {
        let mut modbus = client();
        let values = vec![0u16; 65536 + 10];
        let result = modbus.write_multiple_registers(0, &values);
        assert!(matches!(result, Err(Error::InvalidArgument)));
        assert!(modbus.channel_mut().outbound.is_empty());
    }

    #[test]
    fn read_holding_registers_scenario() {
        let mut modbus = client();
        modbus.channel_mut().inbound = [0x01, 0x03, 0x04, 0x00, 0x0A, 0x01, 0x02, 0x5A, 0x60]
            .into_iter()
            .collect();
        let regs = modbus.read_holding_registers(0x0000, 2).unwrap();
        assert_eq!(regs.as_slice(), &[0x000A, 0x0102]);
        assert_eq!(
            modbus.channel_mut().outbound,
            vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]
        );
    }

    #[test]
    fn broadcast_write_returns_without_waiting_for_a_response() {
        let mut modbus = Modbus::client_rtu(LoopbackChannel::default(), Unit::broadcast()).unwrap();
        modbus.write_single_register(0, 42).unwrap();
        assert_eq!(
            modbus.channel_mut().outbound[0..2],
            [0x00, 0x06]
        );
    }

    #[test]
    fn broadcast_read_is_rejected_locally() {
        let mut modbus = Modbus::client_rtu(LoopbackChannel::default(), Unit::broadcast()).unwrap();
        assert!(matches!(
            modbus.read_coils(0, 1),
            Err(Error::InvalidArgument)
        ));
    }

    #[test]
    fn exception_response_surfaces_as_modbus_exception() {
        let mut modbus = client();
        // unit 01, fc|0x80 = 0x83, exception 2 (Illegal Data Address), CRC C0 F1.
        modbus.channel_mut().inbound =
            [0x01u8, 0x83, 0x02, 0xC0, 0xF1].into_iter().collect();
        let result = modbus.read_holding_registers(0, 1);
        assert_eq!(
            result.unwrap_err().exception(),
            Some(Exception::IllegalDataAddress)
        );
    }
}
