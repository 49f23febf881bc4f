//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// Gratuitous-ARP maintenance for the "virtual router" on a shared L2
// segment (RFC 3768 Section 7.3). Kernel-assisted mode (the default, see
// the design notes) relies on the host stack to answer ARP once the
// virtual MAC/IP are installed; this module only emits the burst on
// mastership entry. Emulated mode additionally builds replies for
// requests targeting a protected address, for facades that cannot
// install additional MACs.

use std::net::Ipv4Addr;

use crate::consts::{ETHERTYPE_ARP, ETHER_HDR_LENGTH};
use crate::error::FacadeError;
use crate::packet::ArpPacket;
use crate::vif::Vif;

const BROADCAST_MAC: [u8; 6] = [0xff; 6];

// Sends one gratuitous ARP announcement per protected address.
pub(crate) fn send_gratuitous_burst(
    vif: &dyn Vif,
    virtual_mac: [u8; 6],
    addresses: &[Ipv4Addr],
) {
    for addr in addresses {
        let arp = ArpPacket::gratuitous(virtual_mac, *addr);
        if let Err(error) =
            vif.send(virtual_mac, BROADCAST_MAC, ETHERTYPE_ARP, &arp.encode())
        {
            error.log();
        }
    }
}

// Builds a reply for an ARP request targeting `addr`, if we hold it.
// Used only in emulated-ARP mode (an explicit per-instance opt-in).
pub(crate) fn reply_to_request(
    virtual_mac: [u8; 6],
    protected: &[Ipv4Addr],
    request: &ArpPacket,
) -> Option<ArpPacket> {
    use crate::packet::ARP_OP_REQUEST;

    if request.operation != ARP_OP_REQUEST {
        return None;
    }
    let target = Ipv4Addr::from(request.target_proto_address);
    if !protected.contains(&target) {
        return None;
    }
    let requester_addr = Ipv4Addr::from(request.sender_proto_address);
    Some(ArpPacket::reply(
        virtual_mac,
        target,
        request.sender_hw_address,
        requester_addr,
    ))
}

pub(crate) fn send_reply(
    vif: &dyn Vif,
    virtual_mac: [u8; 6],
    reply: &ArpPacket,
    requester_mac: [u8; 6],
) -> Result<(), FacadeError> {
    vif.send(virtual_mac, requester_mac, ETHERTYPE_ARP, &reply.encode())
}

// Minimum size of a frame carrying an ARP payload, used by emulated-mode
// decoders that receive a full Ethernet frame rather than a bare payload.
pub(crate) const MIN_ARP_FRAME_LENGTH: usize =
    ETHER_HDR_LENGTH + crate::consts::ARP_PKT_LENGTH;
