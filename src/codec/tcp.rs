// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP framing: the 7-byte MBAP header plus PDU, no CRC

use byteorder::{BigEndian, ByteOrder};

use super::{request_body_shape, response_body_shape, BodyShape};
use crate::error::{Error, Result};
use crate::frame::function;
use crate::io::{ByteIo, Channel};
use crate::unit::Unit;

pub(crate) const MAX_PDU_LEN: usize = 253;

/// MBAP header length: transaction id (2) + protocol id (2) + length (2)
/// + unit id (1).
const MBAP_LEN: usize = 7;

/// Largest TCP ADU: MBAP header + PDU.
pub(crate) const MAX_ADU_LEN: usize = MBAP_LEN + MAX_PDU_LEN;

const PROTOCOL_ID: u16 = 0x0000;

/// Write one MBAP-framed PDU.
pub(crate) fn send<C: Channel>(
    io: &mut ByteIo<C>,
    transaction_id: u16,
    unit: Unit,
    pdu: &[u8],
) -> Result<()> {
    if pdu.is_empty() || pdu.len() > MAX_PDU_LEN {
        return Err(Error::InvalidArgument);
    }
    let mut adu = [0u8; MAX_ADU_LEN];
    BigEndian::write_u16(&mut adu[0..2], transaction_id);
    BigEndian::write_u16(&mut adu[2..4], PROTOCOL_ID);
    let length = (1 + pdu.len()) as u16;
    BigEndian::write_u16(&mut adu[4..6], length);
    adu[6] = unit.0;
    adu[MBAP_LEN..MBAP_LEN + pdu.len()].copy_from_slice(pdu);
    io.put_n_bytes(&adu[..MBAP_LEN + pdu.len()])
}

/// A decoded TCP frame.
pub(crate) struct Frame {
    pub transaction_id: u16,
    pub unit: Unit,
    pub pdu: [u8; MAX_PDU_LEN],
    pub pdu_len: usize,
}

/// Read one MBAP-framed PDU.
///
/// When `expected_transaction_id` is `Some`, a mismatch is reported as
/// [`Error::InvalidResponse`] (client side, matching a reply to its
/// request); servers pass `None` and echo back whatever they read.
pub(crate) fn recv<C: Channel>(
    io: &mut ByteIo<C>,
    is_response: bool,
    expected_transaction_id: Option<u16>,
) -> Result<Frame> {
    io.begin_frame();
    let mut header = [0u8; MBAP_LEN];
    io.get_n_bytes(&mut header)?;

    let transaction_id = BigEndian::read_u16(&header[0..2]);
    let protocol_id = BigEndian::read_u16(&header[2..4]);
    let length = BigEndian::read_u16(&header[4..6]);
    let unit = Unit(header[6]);

    if protocol_id != PROTOCOL_ID {
        return Err(Error::InvalidResponse);
    }
    if let Some(expected) = expected_transaction_id {
        if transaction_id != expected {
            return Err(Error::InvalidResponse);
        }
    }
    if length == 0 {
        return Err(Error::InvalidResponse);
    }
    let remaining = usize::from(length) - 1;
    if remaining == 0 || remaining > MAX_PDU_LEN {
        return Err(Error::InvalidResponse);
    }

    let mut pdu = [0u8; MAX_PDU_LEN];
    io.get_n_bytes(&mut pdu[..1])?;
    let fc = pdu[0];

    let shape = if fc & function::EXCEPTION_MASK != 0 {
        BodyShape::Fixed(remaining - 1)
    } else if is_response {
        response_body_shape(fc).ok_or(Error::InvalidResponse)?
    } else {
        // Unknown function: the MBAP length field tells us exactly how
        // many body bytes follow, unlike RTU, so just take the engine's
        // word for it instead of guessing a shape. Dispatch turns the
        // unrecognised code into Illegal Function.
        request_body_shape(fc).unwrap_or(BodyShape::Fixed(remaining - 1))
    };
    let body_len = super::read_body(io, &mut pdu[1..], shape)?;
    let pdu_len = 1 + body_len;

    if pdu_len != remaining {
        return Err(Error::InvalidResponse);
    }

    Ok(Frame {
        transaction_id,
        unit,
        pdu,
        pdu_len,
    })
}
