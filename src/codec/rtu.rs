// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU framing: `[unit id][pdu][crc lo][crc hi]`

use byteorder::{BigEndian, ByteOrder};

use super::{crc16, request_body_shape, response_body_shape, BodyShape};
use crate::error::{Error, Result};
use crate::frame::function;
use crate::io::{ByteIo, Channel};
use crate::unit::Unit;

/// Largest PDU this engine exchanges: function code + up to 252 bytes
/// of body, bounded by the 253-byte Modbus PDU limit.
pub(crate) const MAX_PDU_LEN: usize = 253;

/// Largest RTU ADU: unit id + PDU + 2-byte CRC.
pub(crate) const MAX_ADU_LEN: usize = 1 + MAX_PDU_LEN + 2;

/// Write `unit.pdu[..pdu_len].crc` to the channel.
pub(crate) fn send<C: Channel>(
    io: &mut ByteIo<C>,
    unit: Unit,
    pdu: &[u8],
) -> Result<()> {
    if pdu.is_empty() || pdu.len() > MAX_PDU_LEN {
        return Err(Error::InvalidArgument);
    }
    let mut adu = [0u8; MAX_ADU_LEN];
    adu[0] = unit.0;
    adu[1..1 + pdu.len()].copy_from_slice(pdu);
    let crc = crc16(&adu[..1 + pdu.len()]);
    BigEndian::write_u16(&mut adu[1 + pdu.len()..1 + pdu.len() + 2], crc);
    io.put_n_bytes(&adu[..1 + pdu.len() + 2])
}

/// A decoded RTU frame: the addressed unit and the raw PDU bytes
/// (function code first).
pub(crate) struct Frame {
    pub unit: Unit,
    pub pdu: [u8; MAX_PDU_LEN],
    pub pdu_len: usize,
}

/// Read one RTU frame, validating the trailing CRC.
///
/// `is_response` selects the request-vs-response body-shape table,
/// since the two directions lay the body out differently for the same
/// function code.
pub(crate) fn recv<C: Channel>(io: &mut ByteIo<C>, is_response: bool) -> Result<Frame> {
    io.begin_frame();
    let unit = Unit(io.get_byte()?);
    let fc = io.get_byte()?;

    let mut pdu = [0u8; MAX_PDU_LEN];
    pdu[0] = fc;

    let shape = if fc & function::EXCEPTION_MASK != 0 {
        BodyShape::Fixed(1)
    } else if is_response {
        response_body_shape(fc).ok_or(Error::InvalidResponse)?
    } else {
        // An unrecognised request function code carries no length-prefix
        // byte this engine understands, so there is no way to know how
        // many body bytes precede the CRC trailer. Read none: the server
        // dispatch layer turns an unknown function into Illegal Function,
        // and if the peer really did send a longer body the CRC check
        // below will (correctly) fail and the frame is dropped.
        request_body_shape(fc).unwrap_or(BodyShape::Fixed(0))
    };
    let body_len = super::read_body(io, &mut pdu[1..], shape)?;
    let pdu_len = 1 + body_len;

    let mut crc_bytes = [0u8; 2];
    io.get_n_bytes(&mut crc_bytes)?;
    let received_crc = BigEndian::read_u16(&crc_bytes);

    let mut check_buf = [0u8; MAX_ADU_LEN];
    check_buf[0] = unit.0;
    check_buf[1..1 + pdu_len].copy_from_slice(&pdu[..pdu_len]);
    if crc16(&check_buf[..1 + pdu_len]) != received_crc {
        log::warn!("CRC mismatch on received RTU frame, dropping");
        return Err(Error::InvalidResponse);
    }

    Ok(Frame { unit, pdu, pdu_len })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::test_support::LoopbackChannel;

    #[test]
    fn send_appends_correct_crc() {
        let mut chan = LoopbackChannel::default();
        let mut io = ByteIo::new(&mut chan, None, None, 0);
        let pdu = [0x03, 0x00, 0x00, 0x00, 0x02];
        send(&mut io, Unit(0x01), &pdu).unwrap();
        // 01 03 00 00 00 02 -> CRC C4 0B (scenario 1 of the test corpus).
        assert_eq!(chan.outbound, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
    }

    #[test]
    fn recv_rejects_bad_crc() {
        let mut chan = LoopbackChannel::with_inbound(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00]);
        let mut io = ByteIo::new(&mut chan, None, None, 0);
        assert!(matches!(recv(&mut io, false), Err(Error::InvalidResponse)));
    }

    #[test]
    fn recv_parses_read_holding_registers_request() {
        let mut chan =
            LoopbackChannel::with_inbound(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
        let mut io = ByteIo::new(&mut chan, None, None, 0);
        let frame = recv(&mut io, false).unwrap();
        assert_eq!(frame.unit, Unit(0x01));
        assert_eq!(&frame.pdu[..frame.pdu_len], &[0x03, 0x00, 0x00, 0x00, 0x02]);
    }
}
