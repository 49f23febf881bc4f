//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::consts::*;

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

//
// VRRP Packet Format (RFC 3768 Section 5.1).
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |Version| Type  | Virtual Rtr ID|   Priority    | Count IP Addrs|
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |   Auth Type   |   Adver Int   |          Checksum             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         IP Address (1)                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                            .                                  |
// |                            .                                  |
// |                            .                                  |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         IP Address (n)                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Authentication Data (1)                   |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Authentication Data (2)                   |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct VrrpPacket {
    pub version: u8,
    pub priority: u8,
    pub vrid: u8,
    pub auth_type: u8,
    pub adver_int: u8,
    pub checksum: u16,
    pub addresses: Vec<Ipv4Addr>,
}

// VRRP decode errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    // Buffer shorter than the minimum or than the length implied by the
    // advertised IP address count.
    ShortFrame,
    // First byte isn't 0x21 (version 2, type 1 "advertisement").
    BadVersionType,
    // 16-bit one's-complement checksum didn't verify.
    BadChecksum,
    // Authentication type field is non-zero.
    UnsupportedAuth(u8),
    // Advertised address count exceeds VRRP_MAX_IP_COUNT.
    TooManyAddresses(u8),
}

// ===== impl VrrpPacket =====

impl VrrpPacket {
    // Builds an advertisement from its protocol fields and computes its
    // checksum. `priority` may legally be PRIORITY_LEAVE (graceful yield).
    pub fn new(
        vrid: u8,
        priority: u8,
        adver_int: u8,
        addresses: Vec<Ipv4Addr>,
    ) -> Self {
        let mut packet = VrrpPacket {
            version: VRRP_VERSION_TYPE,
            vrid,
            priority,
            auth_type: VRRP_AUTH_NONE,
            adver_int,
            checksum: 0,
            addresses,
        };
        packet.checksum = packet.compute_checksum();
        packet
    }

    // Encodes the packet into a bytes buffer of exactly
    // 8 + 4*count + 8 bytes, checksum already computed.
    pub fn encode(&self) -> BytesMut {
        let mut buf =
            BytesMut::with_capacity(VRRP_HDR_LENGTH
                + 4 * self.addresses.len()
                + VRRP_AUTH_DATA_LENGTH);
        self.write(&mut buf);
        buf
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.vrid);
        buf.put_u8(self.priority);
        buf.put_u8(self.addresses.len() as u8);
        buf.put_u8(self.auth_type);
        buf.put_u8(self.adver_int);
        buf.put_u16(self.checksum);
        for addr in &self.addresses {
            buf.put_slice(&addr.octets());
        }
        buf.put_u64(0); // 8 bytes of zero-filled authentication data.
    }

    fn compute_checksum(&self) -> u16 {
        let mut buf = BytesMut::with_capacity(
            VRRP_HDR_LENGTH + 4 * self.addresses.len() + VRRP_AUTH_DATA_LENGTH,
        );
        let mut zeroed = self.clone();
        zeroed.checksum = 0;
        zeroed.write(&mut buf);
        let bytes = internet_checksum::checksum(&buf);
        u16::from_be_bytes(bytes)
    }

    // Decodes a VRRP packet from a bytes buffer, validating its length,
    // version/type byte, checksum and authentication type.
    pub fn decode(data: &[u8]) -> DecodeResult<Self> {
        if data.len() < VRRP_MIN_PKT_LENGTH {
            return Err(DecodeError::ShortFrame);
        }

        let version = data[0];
        if version != VRRP_VERSION_TYPE {
            return Err(DecodeError::BadVersionType);
        }

        let vrid = data[1];
        let priority = data[2];
        let count_ip = data[3];
        let auth_type = data[4];
        let adver_int = data[5];
        let checksum = u16::from_be_bytes([data[6], data[7]]);

        if count_ip as usize > VRRP_MAX_IP_COUNT {
            return Err(DecodeError::TooManyAddresses(count_ip));
        }

        let expected_len =
            VRRP_HDR_LENGTH + 4 * count_ip as usize + VRRP_AUTH_DATA_LENGTH;
        if data.len() < expected_len {
            return Err(DecodeError::ShortFrame);
        }

        let mut verify_buf = data[..expected_len].to_vec();
        verify_buf[6] = 0;
        verify_buf[7] = 0;
        let computed = internet_checksum::checksum(&verify_buf);
        if u16::from_be_bytes(computed) != checksum {
            return Err(DecodeError::BadChecksum);
        }

        if auth_type != VRRP_AUTH_NONE {
            return Err(DecodeError::UnsupportedAuth(auth_type));
        }

        let mut addresses = Vec::with_capacity(count_ip as usize);
        let mut cursor = &data[VRRP_HDR_LENGTH..expected_len - VRRP_AUTH_DATA_LENGTH];
        for _ in 0..count_ip {
            let octets = [
                cursor.get_u8(),
                cursor.get_u8(),
                cursor.get_u8(),
                cursor.get_u8(),
            ];
            addresses.push(Ipv4Addr::from(octets));
        }

        Ok(VrrpPacket {
            version,
            vrid,
            priority,
            auth_type,
            adver_int,
            checksum,
            addresses,
        })
    }
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::ShortFrame => {
                write!(f, "VRRP packet shorter than its declared length")
            }
            DecodeError::BadVersionType => {
                write!(f, "invalid VRRP version/type byte")
            }
            DecodeError::BadChecksum => write!(f, "invalid VRRP checksum"),
            DecodeError::UnsupportedAuth(auth_type) => {
                write!(f, "unsupported authentication type {auth_type}")
            }
            DecodeError::TooManyAddresses(count) => {
                write!(f, "advertised IP address count {count} exceeds the supported maximum")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

//
// Ethernet + ARP framing used for the gratuitous-ARP burst and, in
// emulated-ARP mode, for decoding incoming ARP requests.
//

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct EthernetFrame {
    pub dst_mac: [u8; 6],
    pub src_mac: [u8; 6],
    pub ethertype: u16,
}

impl EthernetFrame {
    pub fn encode(&self, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::with_capacity(ETHER_HDR_LENGTH + payload.len());
        buf.put_slice(&self.dst_mac);
        buf.put_slice(&self.src_mac);
        buf.put_u16(self.ethertype);
        buf.put_slice(payload);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        if data.len() < ETHER_HDR_LENGTH {
            return Err(DecodeError::ShortFrame);
        }
        let mut dst_mac = [0u8; 6];
        let mut src_mac = [0u8; 6];
        dst_mac.copy_from_slice(&data[0..6]);
        src_mac.copy_from_slice(&data[6..12]);
        let ethertype = u16::from_be_bytes([data[12], data[13]]);
        Ok((
            EthernetFrame {
                dst_mac,
                src_mac,
                ethertype,
            },
            &data[ETHER_HDR_LENGTH..],
        ))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ArpPacket {
    pub hw_type: u16,
    pub proto_type: u16,
    pub hw_length: u8,
    pub proto_length: u8,
    pub operation: u16,
    pub sender_hw_address: [u8; 6],
    pub sender_proto_address: [u8; 4],
    pub target_hw_address: [u8; 6],
    pub target_proto_address: [u8; 4],
}

// ARP operation codes used by this crate.
pub const ARP_OP_REQUEST: u16 = 1;
pub const ARP_OP_REPLY: u16 = 2;

impl ArpPacket {
    // Builds the gratuitous-ARP announcement for `addr` on behalf of
    // `virtual_mac` (RFC 3768 Section 7.3): an ARP reply broadcast where
    // sender and target protocol addresses are both the protected IP.
    pub fn gratuitous(virtual_mac: [u8; 6], addr: Ipv4Addr) -> Self {
        ArpPacket {
            hw_type: 1,
            proto_type: ETHERTYPE_IP,
            hw_length: 6,
            proto_length: 4,
            operation: ARP_OP_REPLY,
            sender_hw_address: virtual_mac,
            sender_proto_address: addr.octets(),
            target_hw_address: [0xff; 6],
            target_proto_address: addr.octets(),
        }
    }

    // Builds an ARP reply answering a request for `addr`.
    pub fn reply(
        virtual_mac: [u8; 6],
        addr: Ipv4Addr,
        requester_mac: [u8; 6],
        requester_addr: Ipv4Addr,
    ) -> Self {
        ArpPacket {
            hw_type: 1,
            proto_type: ETHERTYPE_IP,
            hw_length: 6,
            proto_length: 4,
            operation: ARP_OP_REPLY,
            sender_hw_address: virtual_mac,
            sender_proto_address: addr.octets(),
            target_hw_address: requester_mac,
            target_proto_address: requester_addr.octets(),
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(ARP_PKT_LENGTH);
        buf.put_u16(self.hw_type);
        buf.put_u16(self.proto_type);
        buf.put_u8(self.hw_length);
        buf.put_u8(self.proto_length);
        buf.put_u16(self.operation);
        buf.put_slice(&self.sender_hw_address);
        buf.put_slice(&self.sender_proto_address);
        buf.put_slice(&self.target_hw_address);
        buf.put_slice(&self.target_proto_address);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < ARP_PKT_LENGTH {
            return Err(DecodeError::ShortFrame);
        }
        let mut sender_hw_address = [0u8; 6];
        let mut target_hw_address = [0u8; 6];
        let mut sender_proto_address = [0u8; 4];
        let mut target_proto_address = [0u8; 4];
        sender_hw_address.copy_from_slice(&data[8..14]);
        sender_proto_address.copy_from_slice(&data[14..18]);
        target_hw_address.copy_from_slice(&data[18..24]);
        target_proto_address.copy_from_slice(&data[24..28]);
        Ok(ArpPacket {
            hw_type: u16::from_be_bytes([data[0], data[1]]),
            proto_type: u16::from_be_bytes([data[2], data[3]]),
            hw_length: data[4],
            proto_length: data[5],
            operation: u16::from_be_bytes([data[6], data[7]]),
            sender_hw_address,
            sender_proto_address,
            target_hw_address,
            target_proto_address,
        })
    }
}

//
// Minimal, options-free IPv4 header used to wrap/unwrap VRRP PDUs on a
// raw IP socket. Encoding always emits a 20-byte header (IHL 5); decoding
// tolerates (and skips) an incoming options area.
//

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Ipv4Header {
    pub ihl: u8,
    pub tos: u8,
    pub total_length: u16,
    pub identification: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src_address: Ipv4Addr,
    pub dst_address: Ipv4Addr,
}

impl Ipv4Header {
    pub fn new(
        src_address: Ipv4Addr,
        dst_address: Ipv4Addr,
        protocol: u8,
        payload_len: usize,
    ) -> Self {
        let mut header = Ipv4Header {
            ihl: 5,
            tos: 0,
            total_length: (IP_HDR_MIN_LENGTH + payload_len) as u16,
            identification: rand::random(),
            ttl: VRRP_TTL,
            protocol,
            checksum: 0,
            src_address,
            dst_address,
        };
        header.checksum = header.compute_checksum();
        header
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(IP_HDR_MIN_LENGTH);
        self.write(&mut buf);
        buf
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8((4 << 4) | self.ihl);
        buf.put_u8(self.tos);
        buf.put_u16(self.total_length);
        buf.put_u16(self.identification);
        buf.put_u16(0); // flags/fragment offset.
        buf.put_u8(self.ttl);
        buf.put_u8(self.protocol);
        buf.put_u16(self.checksum);
        buf.put_slice(&self.src_address.octets());
        buf.put_slice(&self.dst_address.octets());
    }

    fn compute_checksum(&self) -> u16 {
        let mut buf = BytesMut::with_capacity(IP_HDR_MIN_LENGTH);
        let mut zeroed = *self;
        zeroed.checksum = 0;
        zeroed.write(&mut buf);
        u16::from_be_bytes(internet_checksum::checksum(&buf))
    }

    // Decodes the header and returns it along with the remaining payload
    // (options, if any, already skipped).
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        if data.len() < IP_HDR_MIN_LENGTH {
            return Err(DecodeError::ShortFrame);
        }
        let ihl = data[0] & 0x0f;
        let hdr_len = ihl as usize * 4;
        if data.len() < hdr_len {
            return Err(DecodeError::ShortFrame);
        }
        let header = Ipv4Header {
            ihl,
            tos: data[1],
            total_length: u16::from_be_bytes([data[2], data[3]]),
            identification: u16::from_be_bytes([data[4], data[5]]),
            ttl: data[8],
            protocol: data[9],
            checksum: u16::from_be_bytes([data[10], data[11]]),
            src_address: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            dst_address: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
        };
        Ok((header, &data[hdr_len..]))
    }
}
