//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use vigil_bfd::packet::{DecodeError, Packet, PacketFlags};
use vigil_utils::bfd::State;

//
// Helper functions.
//

fn test_encode_packet(
    bytes_expected: &[u8],
    packet: &Result<Packet, DecodeError>,
) {
    let bytes_actual = packet.as_ref().unwrap().encode();
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_packet(
    bytes: &[u8],
    packet_expected: &Result<Packet, DecodeError>,
) {
    let packet_actual = Packet::decode(bytes);
    assert_eq!(*packet_expected, packet_actual);
}

//
// Test packets.
//

static PACKET1: Lazy<(Vec<u8>, Result<Packet, DecodeError>)> =
    Lazy::new(|| {
        (
            vec![
                0x20, 0xc0, 0x03, 0x18, 0x9f, 0xb2, 0x05, 0xd6, 0x4a, 0x23,
                0x57, 0xdc, 0x00, 0x04, 0x93, 0xe0, 0x00, 0x04, 0x93, 0xe0,
                0x00, 0x00, 0xc3, 0x50,
            ],
            Ok(Packet {
                version: 1,
                diag: 0,
                state: State::Up,
                flags: PacketFlags::empty(),
                detect_mult: 3,
                my_discr: 0x9fb205d6,
                your_discr: 0x4a2357dc,
                desired_min_tx: 300000,
                req_min_rx: 300000,
                req_min_echo_rx: 50000,
            }),
        )
    });

// Initial packet of a session that hasn't heard its peer yet: state Down,
// Your Discriminator zero, Poll set.
static PACKET2: Lazy<(Vec<u8>, Result<Packet, DecodeError>)> =
    Lazy::new(|| {
        (
            vec![
                0x20, 0x60, 0x05, 0x18, 0x01, 0x02, 0x03, 0x04, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x0f, 0x42, 0x40, 0x00, 0x0f, 0x42, 0x40,
                0x00, 0x00, 0x00, 0x00,
            ],
            Ok(Packet {
                version: 1,
                diag: 0,
                state: State::Down,
                flags: PacketFlags::P,
                detect_mult: 5,
                my_discr: 0x01020304,
                your_discr: 0,
                desired_min_tx: 1000000,
                req_min_rx: 1000000,
                req_min_echo_rx: 0,
            }),
        )
    });

//
// Tests.
//

#[test]
fn test_encode_packet1() {
    let (ref bytes, ref packet) = *PACKET1;
    test_encode_packet(bytes, packet);
}

#[test]
fn test_decode_packet1() {
    let (ref bytes, ref packet) = *PACKET1;
    test_decode_packet(bytes, packet);
}

#[test]
fn test_encode_packet2() {
    let (ref bytes, ref packet) = *PACKET2;
    test_encode_packet(bytes, packet);
}

#[test]
fn test_decode_packet2() {
    let (ref bytes, ref packet) = *PACKET2;
    test_decode_packet(bytes, packet);
}

#[test]
fn test_decode_short_packet() {
    let (ref bytes, _) = *PACKET1;
    test_decode_packet(
        &bytes[0..23],
        &Err(DecodeError::IncompletePacket),
    );
}

#[test]
fn test_decode_bad_version() {
    let (ref bytes, _) = *PACKET1;
    let mut bytes = bytes.clone();
    bytes[0] = 0x40;
    test_decode_packet(&bytes, &Err(DecodeError::InvalidVersion(2)));
}

#[test]
fn test_decode_bad_length() {
    let (ref bytes, _) = *PACKET1;

    // Length field smaller than the mandatory section.
    let mut short = bytes.clone();
    short[3] = 23;
    test_decode_packet(&short, &Err(DecodeError::InvalidPacketLength(23)));

    // Length field larger than the received datagram.
    let mut long = bytes.clone();
    long[3] = 25;
    test_decode_packet(&long, &Err(DecodeError::InvalidPacketLength(25)));
}

#[test]
fn test_decode_zero_detect_mult() {
    let (ref bytes, _) = *PACKET1;
    let mut bytes = bytes.clone();
    bytes[2] = 0;
    test_decode_packet(&bytes, &Err(DecodeError::InvalidDetectMult(0)));
}

#[test]
fn test_decode_zero_my_discr() {
    let (ref bytes, _) = *PACKET1;
    let mut bytes = bytes.clone();
    bytes[4..8].fill(0);
    test_decode_packet(&bytes, &Err(DecodeError::InvalidMyDiscriminator(0)));
}

#[test]
fn test_decode_zero_your_discr_while_up() {
    let (ref bytes, _) = *PACKET1;
    let mut bytes = bytes.clone();
    bytes[8..12].fill(0);
    test_decode_packet(
        &bytes,
        &Err(DecodeError::InvalidYourDiscriminator(0)),
    );
}

#[test]
fn test_decode_poll_and_final() {
    let (ref bytes, _) = *PACKET1;
    let mut bytes = bytes.clone();
    bytes[1] = 0xc0 | 0x20 | 0x10;
    test_decode_packet(
        &bytes,
        &Err(DecodeError::InvalidFlags(
            PacketFlags::P | PacketFlags::F,
        )),
    );
}

#[test]
fn test_decode_multipoint_flag() {
    let (ref bytes, _) = *PACKET1;
    let mut bytes = bytes.clone();
    bytes[1] = 0xc0 | 0x01;
    test_decode_packet(
        &bytes,
        &Err(DecodeError::InvalidFlags(PacketFlags::M)),
    );
}

#[test]
fn test_decode_authenticated_packet() {
    let (ref bytes, _) = *PACKET1;
    let mut bytes = bytes.clone();
    bytes[1] = 0xc0 | 0x04;
    test_decode_packet(&bytes, &Err(DecodeError::AuthNotSupported));
}
