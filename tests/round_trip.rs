// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end client-request / server-poll round trips over a paired
//! in-memory channel.

#![cfg(all(feature = "client", feature = "server"))]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use modbus_engine::frame::RegisterBuf;
use modbus_engine::{Channel, Exception, Modbus, ReadOutcome, ServerCallbacks, Unit};

#[derive(Clone, Default)]
struct Link(Arc<Mutex<VecDeque<u8>>>);

/// A `Channel` backed by two shared queues, wiring one `Modbus` instance
/// to another the way a real RS-485 bus or TCP socket would.
struct PairedChannel {
    inbound: Link,
    outbound: Link,
}

impl Channel for PairedChannel {
    fn read_byte(&mut self, timeout_ms: Option<u32>) -> ReadOutcome {
        let deadline =
            timeout_ms.map(|ms| Instant::now() + Duration::from_millis(u64::from(ms)));
        loop {
            if let Some(byte) = self.inbound.0.lock().unwrap().pop_front() {
                return ReadOutcome::Byte(byte);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return ReadOutcome::Timeout;
                }
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn write_byte(&mut self, byte: u8, _timeout_ms: Option<u32>) -> bool {
        self.outbound.0.lock().unwrap().push_back(byte);
        true
    }

    fn sleep_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

fn paired_channels() -> (PairedChannel, PairedChannel) {
    let c2s = Link::default();
    let s2c = Link::default();
    let client = PairedChannel {
        inbound: s2c.clone(),
        outbound: c2s.clone(),
    };
    let server = PairedChannel {
        inbound: c2s,
        outbound: s2c,
    };
    (client, server)
}

#[derive(Default)]
struct Plant {
    holding: [u16; 8],
    coils: [bool; 8],
}

impl ServerCallbacks for Plant {
    fn read_holding_registers(
        &mut self,
        address: u16,
        quantity: u16,
        out: &mut RegisterBuf,
    ) -> modbus_engine::Result<()> {
        for i in 0..usize::from(quantity) {
            out.push(self.holding[usize::from(address) + i]);
        }
        Ok(())
    }

    fn write_single_coil(&mut self, address: u16, value: bool) -> modbus_engine::Result<()> {
        self.coils[usize::from(address)] = value;
        Ok(())
    }

    fn write_single_register(&mut self, address: u16, value: u16) -> modbus_engine::Result<()> {
        self.holding[usize::from(address)] = value;
        Ok(())
    }
}

/// RTU Read Holding Registers, client and server talking over a
/// shared in-memory link.
#[test]
fn rtu_read_holding_registers_round_trip() {
    let _ = env_logger::try_init();
    let (client_chan, server_chan) = paired_channels();

    let server = thread::spawn(move || {
        let mut modbus = Modbus::server_rtu(server_chan, Unit(0x01)).unwrap();
        modbus.set_read_timeout_ms(Some(2000));
        let mut plant = Plant {
            holding: [0x000A, 0x0102, 0, 0, 0, 0, 0, 0],
            ..Plant::default()
        };
        modbus.poll(&mut plant).unwrap()
    });

    let mut client = Modbus::client_rtu(client_chan, Unit(0x01)).unwrap();
    client.set_read_timeout_ms(Some(2000));
    let regs = client.read_holding_registers(0x0000, 2).unwrap();

    assert_eq!(regs.as_slice(), &[0x000A, 0x0102]);
    server.join().unwrap();
}

/// TCP Write Single Coil, client and server talking over a shared
/// in-memory link.
#[test]
fn tcp_write_single_coil_round_trip() {
    let (client_chan, server_chan) = paired_channels();

    let server = thread::spawn(move || {
        let mut modbus = Modbus::server_tcp(server_chan);
        modbus.set_read_timeout_ms(Some(2000));
        let mut plant = Plant::default();
        modbus.poll(&mut plant).unwrap();
        plant.coils[0x2C]
    });

    let mut client = Modbus::client_tcp(client_chan, Unit(17));
    client.set_read_timeout_ms(Some(2000));
    client.write_single_coil(0x00_2C, true).unwrap();

    assert!(server.join().unwrap());
}

/// A server-raised protocol exception surfaces to the client as
/// `Error::Exception`.
#[test]
fn protocol_exception_round_trip() {
    struct RejectsEveryAddress;

    impl ServerCallbacks for RejectsEveryAddress {
        fn read_holding_registers(
            &mut self,
            _address: u16,
            _quantity: u16,
            _out: &mut RegisterBuf,
        ) -> modbus_engine::Result<()> {
            Err(Exception::IllegalDataAddress.into())
        }
    }

    let (client_chan, server_chan) = paired_channels();

    let server = thread::spawn(move || {
        let mut modbus = Modbus::server_rtu(server_chan, Unit(0x01)).unwrap();
        modbus.set_read_timeout_ms(Some(2000));
        modbus.poll(&mut RejectsEveryAddress).unwrap()
    });

    let mut client = Modbus::client_rtu(client_chan, Unit(0x01)).unwrap();
    client.set_read_timeout_ms(Some(2000));
    let result = client.read_holding_registers(0x0000, 1);

    assert_eq!(
        result.unwrap_err().exception(),
        Some(Exception::IllegalDataAddress)
    );
    server.join().unwrap();
}

/// RTU broadcast is dispatched but never answered; the client returns
/// successfully without waiting for a response.
#[test]
fn rtu_broadcast_write_does_not_wait_for_a_response() {
    let (client_chan, server_chan) = paired_channels();

    let mut client = Modbus::client_rtu(client_chan, Unit::broadcast()).unwrap();
    client.set_read_timeout_ms(Some(2000));
    client.write_single_register(0x0003, 0x2A).unwrap();

    let mut server = Modbus::server_rtu(server_chan, Unit(0x01)).unwrap();
    server.set_read_timeout_ms(Some(2000));
    let mut plant = Plant::default();
    let outcome = server.poll(&mut plant).unwrap();

    assert_eq!(outcome, modbus_engine::PollOutcome::Broadcast);
    assert_eq!(plant.holding[3], 0x2A);
}

/// A peer that writes the first few bytes of a frame and then goes
/// silent must time out on the byte deadline instead of blocking
/// forever or being satisfied by a short frame.
#[test]
fn byte_timeout_fires_on_a_stalled_peer() {
    let (_client_chan, server_chan) = paired_channels();

    // Simulate a peer that sends 3 bytes of an RTU request and then
    // stalls: push the bytes directly, never writing the rest of the
    // frame.
    server_chan.inbound.0.lock().unwrap().extend([0x01, 0x03, 0x00]);

    let mut server = Modbus::server_rtu(server_chan, Unit(0x01)).unwrap();
    server.set_read_timeout_ms(Some(2000));
    server.set_byte_timeout_ms(Some(100));

    let started = Instant::now();
    let result = server.poll(&mut Plant::default());
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(modbus_engine::Error::Timeout)));
    assert!(elapsed < Duration::from_millis(2000));
}
