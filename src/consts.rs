//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

// IP protocol number assigned to VRRP (RFC 3768 Section 5.1).
pub const VRRP_PROTO_NUMBER: u8 = 112;

// All-VRRP-routers multicast group.
pub const VRRP_MULTICAST_ADDRESS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 18);

// Multicast MAC address corresponding to VRRP_MULTICAST_ADDRESS.
pub const VRRP_MULTICAST_MAC: [u8; 6] = [0x01, 0x00, 0x5e, 0x00, 0x00, 0x12];

// TTL that every transmitted and accepted VRRP packet must carry.
pub const VRRP_TTL: u8 = 255;

pub const VRRP_VERSION: u8 = 2;
pub const VRRP_HDR_TYPE_ADVERTISEMENT: u8 = 1;
pub const VRRP_VERSION_TYPE: u8 =
    (VRRP_VERSION << 4) | VRRP_HDR_TYPE_ADVERTISEMENT;

pub const VRRP_AUTH_NONE: u8 = 0;

// Fixed 8-byte VRRP header plus the 8 zero-filled authentication-data bytes.
pub const VRRP_HDR_LENGTH: usize = 8; // in bytes
pub const VRRP_AUTH_DATA_LENGTH: usize = 8; // in bytes
pub const VRRP_MIN_PKT_LENGTH: usize = VRRP_HDR_LENGTH + VRRP_AUTH_DATA_LENGTH;
pub const VRRP_MAX_IP_COUNT: usize = 16; // max number of IPs that can be supported
pub const VRRP_MAX_PKT_LENGTH: usize =
    VRRP_HDR_LENGTH + 4 * VRRP_MAX_IP_COUNT + VRRP_AUTH_DATA_LENGTH;

pub const IP_HDR_MIN_LENGTH: usize = 20;

pub const ETHER_HDR_LENGTH: usize = 14;
pub const ETHERTYPE_IP: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ARP_PKT_LENGTH: usize = 28;

// VRID valid range.
pub const VRID_MIN: u8 = 1;
pub const VRID_MAX: u8 = 255;

// Reserved priority values (RFC 3768 Section 5.2.1).
pub const PRIORITY_LEAVE: u8 = 0;
pub const PRIORITY_OWNER: u8 = 255;
pub const PRIORITY_MIN: u8 = 1;
pub const PRIORITY_MAX: u8 = 254;
pub const PRIORITY_DEFAULT: u8 = 100;

pub const ADVERTISE_INTERVAL_MIN: u8 = 1;
pub const ADVERTISE_INTERVAL_MAX: u8 = 255;
pub const ADVERTISE_INTERVAL_DEFAULT: u8 = 1;

pub const PREFIX_MIN: u8 = 1;
pub const PREFIX_MAX: u8 = 32;
pub const PREFIX_DEFAULT: u8 = 24;

// Derives the virtual MAC address for a VRID (RFC 3768 Section 7.3).
pub fn virtual_mac(vrid: u8) -> [u8; 6] {
    [0x00, 0x00, 0x5e, 0x00, 0x01, vrid]
}
