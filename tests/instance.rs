//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// End-to-end election-state-machine scenarios driven against `TestVif`
// and a paused tokio clock, so timer-driven transitions are deterministic.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use vrrpd::config::ArpMode;
use vrrpd::instance::{State, VrrpTimer};
use vrrpd::packet::VrrpPacket;
use vrrpd::target::{ConfigField, VrrpTarget};
use vrrpd::vif::{TestVif, Vif};

const IFNAME: &str = "eth0";

fn addr(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
    Ipv4Addr::new(a, b, c, d)
}

// Drains every timer event currently queued, advancing state once per
// event, until the channel goes dry. Used after `tokio::time::advance`
// to let a fired timer's callback reach the target's dispatch loop.
async fn drain_timers(target: &mut VrrpTarget) {
    tokio::task::yield_now().await;
    while target.try_recv_timer() {
        tokio::task::yield_now().await;
    }
}

async fn setup_instance(
    vrid: u8,
    priority: u8,
    interval: u8,
    preempt: bool,
    primary: Ipv4Addr,
    protected: Ipv4Addr,
) -> (VrrpTarget, Arc<TestVif>) {
    let vif = Arc::new(TestVif::with_primary_addr(primary));
    let mut target = VrrpTarget::new();
    target
        .add_instance(IFNAME, vrid, vif.clone() as Arc<dyn Vif>)
        .unwrap();
    target
        .configure(IFNAME, vrid, ConfigField::Priority(priority))
        .unwrap();
    target
        .configure(IFNAME, vrid, ConfigField::Interval(interval))
        .unwrap();
    target
        .configure(IFNAME, vrid, ConfigField::Preempt(preempt))
        .unwrap();
    target
        .configure(
            IFNAME,
            vrid,
            ConfigField::AddAddress {
                addr: protected,
                prefix: None,
            },
        )
        .unwrap();
    (target, vif)
}

#[tokio::test(start_paused = true)]
async fn cold_start_single_router_converges_to_master() {
    let (mut target, vif) = setup_instance(
        7,
        200,
        1,
        true,
        addr(192, 0, 2, 10),
        addr(192, 0, 2, 100),
    )
    .await;

    target
        .configure(IFNAME, 7, ConfigField::Enable(true))
        .unwrap();

    // Initialize -> Backup on enable, master-down timer armed.
    assert_eq!(target.get(IFNAME, 7).unwrap().state.state, State::Backup);
    assert!(matches!(
        target.get(IFNAME, 7).unwrap().timer,
        VrrpTimer::MasterDownTimer(_)
    ));

    // No advertisement heard: after 3*interval + skew the instance takes
    // over unilaterally.
    let skew = (256.0 - 200.0) / 256.0;
    let master_down = 3.0 * 1.0 + skew;
    tokio::time::advance(Duration::from_secs_f64(master_down + 0.01)).await;
    drain_timers(&mut target).await;

    let instance = target.get(IFNAME, 7).unwrap();
    assert_eq!(instance.state.state, State::Master);
    assert!(matches!(instance.timer, VrrpTimer::AdverTimer(_)));
    assert!(vif.has_mac(vrrpd::consts::virtual_mac(7)));
    assert!(vif.has_ip(addr(192, 0, 2, 100)));

    // Exactly one advertisement sent so far, correct fields and framing.
    let frames = vif.sent_frames();
    let adverts: Vec<_> = frames
        .iter()
        .filter(|((_, _, ethertype), _)| *ethertype == vrrpd::consts::ETHERTYPE_IP)
        .collect();
    assert_eq!(adverts.len(), 1);
    let ((src_mac, dst_mac, _), payload) = adverts[0];
    assert_eq!(src_mac, &vrrpd::consts::virtual_mac(7));
    assert_eq!(dst_mac, &vrrpd::consts::VRRP_MULTICAST_MAC);
    let decoded = VrrpPacket::decode(payload).unwrap();
    assert_eq!(decoded.priority, 200);
    assert_eq!(decoded.adver_int, 1);
    assert_eq!(decoded.addresses, vec![addr(192, 0, 2, 100)]);

    // Exactly one gratuitous ARP, announcing the protected address.
    let arps: Vec<_> = frames
        .iter()
        .filter(|((_, _, ethertype), _)| {
            *ethertype == vrrpd::consts::ETHERTYPE_ARP
        })
        .collect();
    assert_eq!(arps.len(), 1);

    // One tick later, exactly one more advertisement (periodic cadence).
    tokio::time::advance(Duration::from_secs_f64(1.01)).await;
    drain_timers(&mut target).await;
    let frames = vif.sent_frames();
    let adverts: Vec<_> = frames
        .iter()
        .filter(|((_, _, ethertype), _)| *ethertype == vrrpd::consts::ETHERTYPE_IP)
        .collect();
    assert_eq!(adverts.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn higher_priority_advertisement_takes_over_master() {
    let (mut target, vif) = setup_instance(
        7,
        100,
        1,
        true,
        addr(192, 0, 2, 10),
        addr(192, 0, 2, 100),
    )
    .await;
    target
        .configure(IFNAME, 7, ConfigField::Enable(true))
        .unwrap();
    // Force straight into Master without waiting out the timer.
    target.get_mut(IFNAME, 7).unwrap().master_down_expiry();
    assert_eq!(target.get(IFNAME, 7).unwrap().state.state, State::Master);
    vif.clear_calls();

    let packet = VrrpPacket::new(
        7,
        150,
        1,
        vec![addr(192, 0, 2, 100)],
    );
    target
        .on_frame(IFNAME, addr(192, 0, 2, 11), &packet.encode())
        .unwrap();

    let instance = target.get(IFNAME, 7).unwrap();
    assert_eq!(instance.state.state, State::Backup);
    assert!(!vif.has_mac(vrrpd::consts::virtual_mac(7)));
    assert!(!vif.has_ip(addr(192, 0, 2, 100)));
    assert!(matches!(instance.timer, VrrpTimer::MasterDownTimer(_)));
}

#[tokio::test(start_paused = true)]
async fn graceful_yield_from_peer_keeps_master_and_rearms_backup() {
    // Master side: receiving priority 0 sends one advertisement and stays
    // master.
    let (mut target, vif) = setup_instance(
        7,
        120,
        1,
        true,
        addr(192, 0, 2, 10),
        addr(192, 0, 2, 100),
    )
    .await;
    target
        .configure(IFNAME, 7, ConfigField::Enable(true))
        .unwrap();
    target.get_mut(IFNAME, 7).unwrap().master_down_expiry();
    vif.clear_calls();

    let yield_packet = VrrpPacket::new(7, 0, 1, vec![addr(192, 0, 2, 100)]);
    target
        .on_frame(IFNAME, addr(192, 0, 2, 11), &yield_packet.encode())
        .unwrap();

    let instance = target.get(IFNAME, 7).unwrap();
    assert_eq!(instance.state.state, State::Master);
    let adverts: Vec<_> = vif
        .sent_frames()
        .into_iter()
        .filter(|((_, _, ethertype), _)| *ethertype == vrrpd::consts::ETHERTYPE_IP)
        .collect();
    assert_eq!(adverts.len(), 1);

    // Backup side: receiving priority 0 from the believed master rearms
    // the master-down timer to the (shorter) skew time rather than the
    // full master-down interval.
    let (mut target2, _vif2) = setup_instance(
        8,
        120,
        1,
        true,
        addr(192, 0, 2, 20),
        addr(192, 0, 2, 200),
    )
    .await;
    target2
        .configure(IFNAME, 8, ConfigField::Enable(true))
        .unwrap();
    assert_eq!(
        target2.get(IFNAME, 8).unwrap().state.state,
        State::Backup
    );
    let yield_packet_8 = VrrpPacket::new(8, 0, 1, vec![addr(192, 0, 2, 200)]);
    target2
        .on_frame(IFNAME, addr(192, 0, 2, 21), &yield_packet_8.encode())
        .unwrap();
    let instance2 = target2.get(IFNAME, 8).unwrap();
    let expected_skew = (256.0 - 120.0) / 256.0;
    if let VrrpTimer::MasterDownTimer(task) = &instance2.timer {
        let remaining = task.remaining().as_secs_f64();
        assert!(
            remaining <= expected_skew + 0.05,
            "expected accelerated takeover timer near {expected_skew}s, got {remaining}s"
        );
    } else {
        panic!("expected a master-down timer to remain armed");
    }
}

#[tokio::test(start_paused = true)]
async fn equal_priority_tie_breaks_by_higher_source_address() {
    let (mut target, vif) = setup_instance(
        7,
        150,
        1,
        true,
        addr(192, 0, 2, 10),
        addr(192, 0, 2, 100),
    )
    .await;
    target
        .configure(IFNAME, 7, ConfigField::Enable(true))
        .unwrap();
    target.get_mut(IFNAME, 7).unwrap().master_down_expiry();

    // Lower source address: no change.
    let packet = VrrpPacket::new(7, 150, 1, vec![addr(192, 0, 2, 100)]);
    target
        .on_frame(IFNAME, addr(192, 0, 2, 5), &packet.encode())
        .unwrap();
    assert_eq!(target.get(IFNAME, 7).unwrap().state.state, State::Master);

    // Higher source address: yield.
    target
        .on_frame(IFNAME, addr(192, 0, 2, 20), &packet.encode())
        .unwrap();
    assert_eq!(target.get(IFNAME, 7).unwrap().state.state, State::Backup);
    let _ = vif;
}

#[tokio::test(start_paused = true)]
async fn malformed_frame_is_dropped_without_state_change() {
    let (mut target, _vif) = setup_instance(
        7,
        200,
        1,
        true,
        addr(192, 0, 2, 10),
        addr(192, 0, 2, 100),
    )
    .await;
    target
        .configure(IFNAME, 7, ConfigField::Enable(true))
        .unwrap();
    let state_before = target.get(IFNAME, 7).unwrap().state.state;
    assert_eq!(target.decode_errors(), 0);

    let result = target.on_frame(IFNAME, addr(192, 0, 2, 99), &[0u8; 12]);
    assert!(result.is_err());
    assert_eq!(target.decode_errors(), 1);
    assert_eq!(target.get(IFNAME, 7).unwrap().state.state, state_before);
}

#[tokio::test(start_paused = true)]
async fn disable_while_master_yields_before_tearing_down() {
    let (mut target, vif) = setup_instance(
        7,
        120,
        1,
        true,
        addr(192, 0, 2, 10),
        addr(192, 0, 2, 100),
    )
    .await;
    target
        .configure(IFNAME, 7, ConfigField::Enable(true))
        .unwrap();
    target.get_mut(IFNAME, 7).unwrap().master_down_expiry();
    assert!(vif.has_mac(vrrpd::consts::virtual_mac(7)));
    vif.clear_calls();

    target
        .configure(IFNAME, 7, ConfigField::Enable(false))
        .unwrap();

    let instance = target.get(IFNAME, 7).unwrap();
    assert_eq!(instance.state.state, State::Initialize);
    assert!(matches!(instance.timer, VrrpTimer::Null));
    assert!(!vif.has_mac(vrrpd::consts::virtual_mac(7)));
    assert!(!vif.has_ip(addr(192, 0, 2, 100)));

    // The graceful-yield advertisement (priority 0) must have been
    // transmitted before the teardown calls, in call-log order.
    let calls = vif.calls();
    let send_index = calls
        .iter()
        .position(|c| matches!(c, vrrpd::vif::VifCall::Send { .. }))
        .unwrap();
    let delete_mac_index = calls
        .iter()
        .position(|c| matches!(c, vrrpd::vif::VifCall::DeleteMac(_)))
        .unwrap();
    assert!(send_index < delete_mac_index);

    if let vrrpd::vif::VifCall::Send { payload, .. } = &calls[send_index] {
        let decoded = VrrpPacket::decode(payload).unwrap();
        assert_eq!(decoded.priority, 0);
    } else {
        unreachable!();
    }
}

#[tokio::test(start_paused = true)]
async fn double_enable_is_idempotent() {
    let (mut target, vif) = setup_instance(
        7,
        200,
        1,
        true,
        addr(192, 0, 2, 10),
        addr(192, 0, 2, 100),
    )
    .await;
    target
        .configure(IFNAME, 7, ConfigField::Enable(true))
        .unwrap();
    target.get_mut(IFNAME, 7).unwrap().master_down_expiry();
    let join_count_before = vif
        .calls()
        .iter()
        .filter(|c| matches!(c, vrrpd::vif::VifCall::JoinMcast))
        .count();
    let mac_installs_before = vif
        .calls()
        .iter()
        .filter(|c| matches!(c, vrrpd::vif::VifCall::AddMac(_)))
        .count();

    target
        .configure(IFNAME, 7, ConfigField::Enable(true))
        .unwrap();

    let join_count_after = vif
        .calls()
        .iter()
        .filter(|c| matches!(c, vrrpd::vif::VifCall::JoinMcast))
        .count();
    let mac_installs_after = vif
        .calls()
        .iter()
        .filter(|c| matches!(c, vrrpd::vif::VifCall::AddMac(_)))
        .count();
    assert_eq!(join_count_before, join_count_after);
    assert_eq!(mac_installs_before, mac_installs_after);
}

#[tokio::test(start_paused = true)]
async fn owner_priority_promotes_directly_to_master_without_inference() {
    let (mut target, vif) = setup_instance(
        9,
        100,
        1,
        true,
        addr(192, 0, 2, 30),
        addr(192, 0, 2, 130),
    )
    .await;
    // Explicit opt-in only: setting priority to 255 requires bypassing
    // the normal 1..254 validator, which this test does directly to
    // exercise the owner path without relying on any auto-detection.
    target.get_mut(IFNAME, 9).unwrap().config.priority = 255;
    target
        .configure(IFNAME, 9, ConfigField::Enable(true))
        .unwrap();
    assert_eq!(target.get(IFNAME, 9).unwrap().state.state, State::Master);
    assert!(vif.has_mac(vrrpd::consts::virtual_mac(9)));
}

#[tokio::test(start_paused = true)]
async fn emulated_arp_mode_answers_requests_for_protected_address() {
    let (mut target, vif) = setup_instance(
        7,
        200,
        1,
        true,
        addr(192, 0, 2, 10),
        addr(192, 0, 2, 100),
    )
    .await;
    target
        .configure(IFNAME, 7, ConfigField::ArpMode(ArpMode::Emulated))
        .unwrap();
    target
        .configure(IFNAME, 7, ConfigField::Enable(true))
        .unwrap();
    target.get_mut(IFNAME, 7).unwrap().master_down_expiry();
    vif.clear_calls();

    let requester_mac = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
    let request = vrrpd::packet::ArpPacket {
        hw_type: 1,
        proto_type: vrrpd::consts::ETHERTYPE_IP,
        hw_length: 6,
        proto_length: 4,
        operation: 1,
        sender_hw_address: requester_mac,
        sender_proto_address: addr(192, 0, 2, 50).octets(),
        target_hw_address: [0u8; 6],
        target_proto_address: addr(192, 0, 2, 100).octets(),
    };
    target.on_arp_request(IFNAME, requester_mac, &request);

    let replies: Vec<_> = vif
        .sent_frames()
        .into_iter()
        .filter(|((_, dst_mac, ethertype), _)| {
            *ethertype == vrrpd::consts::ETHERTYPE_ARP && *dst_mac == requester_mac
        })
        .collect();
    assert_eq!(replies.len(), 1);
    let reply = vrrpd::packet::ArpPacket::decode(&replies[0].1).unwrap();
    assert_eq!(reply.sender_hw_address, vrrpd::consts::virtual_mac(7));
    assert_eq!(
        Ipv4Addr::from(reply.sender_proto_address),
        addr(192, 0, 2, 100)
    );
    assert_eq!(reply.target_hw_address, requester_mac);
}

#[tokio::test(start_paused = true)]
async fn enable_before_interface_ready_starts_once_interface_comes_up() {
    let vif = Arc::new(TestVif::new());
    vif.set_ready(false);
    let mut target = VrrpTarget::new();
    target
        .add_instance(IFNAME, 7, vif.clone() as Arc<dyn Vif>)
        .unwrap();
    target
        .configure(IFNAME, 7, ConfigField::Priority(200))
        .unwrap();
    target
        .configure(
            IFNAME,
            7,
            ConfigField::AddAddress {
                addr: addr(192, 0, 2, 100),
                prefix: None,
            },
        )
        .unwrap();

    target
        .configure(IFNAME, 7, ConfigField::Enable(true))
        .unwrap();
    assert_eq!(target.get(IFNAME, 7).unwrap().state.state, State::Initialize);

    vif.set_ready(true);
    vif.set_primary_addr(Some(addr(192, 0, 2, 10)));
    target.on_interface_event(IFNAME, true);
    assert_ne!(target.get(IFNAME, 7).unwrap().state.state, State::Initialize);
}

#[tokio::test(start_paused = true)]
async fn interface_down_leaves_mcast_so_flaps_do_not_leak_refcount() {
    let (mut target, vif) = setup_instance(
        7,
        200,
        1,
        true,
        addr(192, 0, 2, 10),
        addr(192, 0, 2, 100),
    )
    .await;
    target
        .configure(IFNAME, 7, ConfigField::Enable(true))
        .unwrap();
    assert_eq!(vif.mcast_refcount(), 1);

    // Two down/up flaps: each down must pair with the up's join, or the
    // refcount drifts and a later disable() can never bring it back to 0.
    for _ in 0..2 {
        target.on_interface_event(IFNAME, false);
        assert_eq!(target.get(IFNAME, 7).unwrap().state.state, State::Initialize);
        assert_eq!(vif.mcast_refcount(), 0);

        vif.set_ready(true);
        vif.set_primary_addr(Some(addr(192, 0, 2, 10)));
        target.on_interface_event(IFNAME, true);
        assert_ne!(target.get(IFNAME, 7).unwrap().state.state, State::Initialize);
        assert_eq!(vif.mcast_refcount(), 1);
    }

    target
        .configure(IFNAME, 7, ConfigField::Enable(false))
        .unwrap();
    assert_eq!(vif.mcast_refcount(), 0);
}

#[tokio::test(start_paused = true)]
async fn decode_errors_are_attributed_to_the_right_instance() {
    let (mut target, _vif) = setup_instance(
        7,
        200,
        1,
        true,
        addr(192, 0, 2, 10),
        addr(192, 0, 2, 100),
    )
    .await;
    target
        .configure(IFNAME, 7, ConfigField::Enable(true))
        .unwrap();

    // Valid length and checksum, bad version/type byte, VRID still 7.
    let mut frame = vec![0u8; 24];
    frame[1] = 7;
    let result = target.on_frame(IFNAME, addr(192, 0, 2, 99), &frame);
    assert!(result.is_err());
    assert_eq!(target.decode_errors(), 1);
    assert_eq!(
        target.get(IFNAME, 7).unwrap().statistics().version_errors,
        1
    );

    // Correct version/type, wrong checksum, VRID still 7.
    let packet = VrrpPacket::new(7, 150, 1, vec![addr(192, 0, 2, 100)]);
    let mut encoded = packet.encode();
    encoded[6] ^= 0xff;
    let result = target.on_frame(IFNAME, addr(192, 0, 2, 99), &encoded);
    assert!(result.is_err());
    assert_eq!(
        target.get(IFNAME, 7).unwrap().statistics().checksum_errors,
        1
    );

    // A decode error for an unconfigured VRID never touches instance 7's
    // counters, only the target-wide one.
    let mut unknown_vrid_frame = vec![0u8; 24];
    unknown_vrid_frame[1] = 9;
    let _ = target.on_frame(IFNAME, addr(192, 0, 2, 99), &unknown_vrid_frame);
    assert_eq!(
        target.get(IFNAME, 7).unwrap().statistics().version_errors,
        1
    );
}
