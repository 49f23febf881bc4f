//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;

use crate::config::InstanceCfg;
use crate::consts::*;
use crate::debug::{Debug, InstanceInactiveReason};
use crate::error::Error;
use crate::packet::VrrpPacket;
use crate::tasks::{IntervalTask, TimeoutTask};
use crate::vif::Vif;

// A timer firing only ever sends an event back to the target's event
// loop, tagged by (interface, VRID) rather than holding a reference to
// the `Instance` itself — the target resolves the identifier and becomes
// a no-op if the instance was removed in the meantime (see design notes
// on timer lifetime).
#[derive(Clone, Debug)]
pub struct TimerEvent {
    pub ifname: String,
    pub vrid: u8,
    pub kind: TimerKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimerKind {
    Advertise,
    MasterDown,
}

#[derive(Debug)]
pub struct Instance {
    pub ifname: String,
    pub vrid: u8,
    pub source_mac: [u8; 6],
    pub vif: Arc<dyn Vif>,
    pub config: InstanceCfg,
    pub state: InstanceState,
    pub timer: VrrpTimer,
    timer_tx: UnboundedSender<TimerEvent>,
}

pub enum VrrpTimer {
    Null,
    AdverTimer(IntervalTask),
    MasterDownTimer(TimeoutTask),
}

impl std::fmt::Debug for VrrpTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VrrpTimer::Null => write!(f, "Null"),
            VrrpTimer::AdverTimer(_) => write!(f, "AdverTimer"),
            VrrpTimer::MasterDownTimer(_) => write!(f, "MasterDownTimer"),
        }
    }
}

#[derive(Debug)]
pub struct InstanceState {
    pub state: State,
    pub last_adv_src: Option<Ipv4Addr>,
    pub up_time: Option<DateTime<Utc>>,
    pub last_event: Event,
    pub new_master_reason: MasterReason,
    pub skew_time: f64,
    pub master_down_interval: f64,
    pub statistics: Statistics,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Initialize,
    Backup,
    Master,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Initialize => "initialize",
            State::Backup => "backup",
            State::Master => "master",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    None,
    Startup,
    Shutdown,
    HigherPriorityBackup,
    MasterTimeout,
    InterfaceUp,
    InterfaceDown,
    PreemptHoldTimeout,
    LowerPriorityMaster,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MasterReason {
    NotMaster,
    Priority,
    Preempted,
    NoResponse,
}

#[derive(Debug)]
pub struct Statistics {
    pub discontinuity_time: DateTime<Utc>,
    pub master_transitions: u32,
    pub adv_rcvd: u64,
    pub adv_sent: u64,
    pub interval_errors: u64,
    pub priority_zero_pkts_rcvd: u64,
    pub priority_zero_pkts_sent: u64,
    pub invalid_type_pkts_rcvd: u64,
    pub pkt_length_errors: u64,
    pub checksum_errors: u64,
    pub version_errors: u64,
    pub vrid_errors: u64,
    pub ip_ttl_errors: u64,
}

impl Default for Statistics {
    fn default() -> Self {
        Statistics {
            discontinuity_time: Utc::now(),
            master_transitions: 0,
            adv_rcvd: 0,
            adv_sent: 0,
            interval_errors: 0,
            priority_zero_pkts_rcvd: 0,
            priority_zero_pkts_sent: 0,
            invalid_type_pkts_rcvd: 0,
            pkt_length_errors: 0,
            checksum_errors: 0,
            version_errors: 0,
            vrid_errors: 0,
            ip_ttl_errors: 0,
        }
    }
}

// Snapshot returned by `get_info`, the observability surface (§6).
#[derive(Debug)]
pub struct InstanceInfo {
    pub state_name: &'static str,
    pub believed_master: Option<Ipv4Addr>,
    pub last_event: Event,
    pub new_master_reason: MasterReason,
    pub up_time: Option<DateTime<Utc>>,
}

// ===== impl InstanceState =====

impl InstanceState {
    fn new() -> Self {
        InstanceState {
            state: State::Initialize,
            last_adv_src: None,
            up_time: None,
            last_event: Event::None,
            new_master_reason: MasterReason::NotMaster,
            skew_time: 0.0,
            master_down_interval: 0.0,
            statistics: Statistics::default(),
        }
    }
}

// ===== impl Instance =====

impl Instance {
    pub fn new(
        ifname: String,
        vrid: u8,
        vif: Arc<dyn Vif>,
        timer_tx: UnboundedSender<TimerEvent>,
    ) -> Self {
        Debug::InstanceCreate.log();
        Instance {
            ifname,
            vrid,
            source_mac: virtual_mac(vrid),
            vif,
            config: InstanceCfg::default(),
            state: InstanceState::new(),
            timer: VrrpTimer::Null,
            timer_tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.state != State::Initialize
    }

    pub fn get_info(&self) -> InstanceInfo {
        let believed_master = match self.state.state {
            State::Master => self.vif.primary_addr(),
            State::Backup => self.state.last_adv_src,
            State::Initialize => None,
        };
        InstanceInfo {
            state_name: self.state.state.name(),
            believed_master,
            last_event: self.state.last_event,
            new_master_reason: self.state.new_master_reason,
            up_time: self.state.up_time,
        }
    }

    pub fn statistics(&self) -> &Statistics {
        &self.state.statistics
    }

    // Attributes a decode failure to this instance's counters. Called by
    // the target once a VRID has been recovered from an otherwise-rejected
    // frame (the frame never reaches `receive` itself, since decoding
    // failed before a `VrrpPacket` existed to dispatch).
    pub(crate) fn record_decode_error(&mut self, error: &crate::packet::DecodeError) {
        use crate::packet::DecodeError;
        match error {
            DecodeError::ShortFrame | DecodeError::TooManyAddresses(_) => {
                self.state.statistics.pkt_length_errors += 1;
            }
            DecodeError::BadVersionType => {
                self.state.statistics.version_errors += 1;
            }
            DecodeError::BadChecksum => {
                self.state.statistics.checksum_errors += 1;
            }
            DecodeError::UnsupportedAuth(_) => {
                self.state.statistics.invalid_type_pkts_rcvd += 1;
            }
        }
    }

    // Attributes a facade-level TTL rejection (spec section 6's "TTL must
    // be 255" check) to this instance's counters.
    pub(crate) fn record_ttl_error(&mut self) {
        self.state.statistics.ip_ttl_errors += 1;
    }

    // Recomputes skew time and master-down interval (RFC 3768 Section
    // 6.1). Ground: `Vrrp::setup_intervals` in the XORP original.
    fn recompute_intervals(&mut self) {
        let priority = self.config.priority as f64;
        let interval = self.config.advertise_interval as f64;
        self.state.skew_time = (256.0 - priority) / 256.0;
        self.state.master_down_interval =
            3.0 * interval + self.state.skew_time;
    }

    // ===== configuration setters =====

    pub fn set_priority(
        &mut self,
        priority: u8,
    ) -> Result<(), crate::config::ConfigError> {
        self.config.set_priority(priority)?;
        self.recompute_intervals();
        Ok(())
    }

    pub fn set_interval(&mut self, interval: u8) {
        self.config.set_interval(interval);
        self.recompute_intervals();
    }

    // ===== lifecycle =====

    // Enables the instance: joins the multicast group and transitions out
    // of Initialize. A no-op if already running (idempotence, invariant
    // 5 in §8).
    pub fn enable(&mut self) {
        self.config.enabled = true;
        if self.is_running() {
            return;
        }
        if !self.vif.ready() {
            return;
        }

        self.recompute_intervals();

        if let Err(error) = self.vif.join_mcast() {
            error.log();
        }

        Debug::InstanceStart.log();
        self.state.up_time = Some(Utc::now());

        if self.config.priority == PRIORITY_OWNER {
            self.become_master(MasterReason::Priority);
        } else {
            self.become_backup(self.state.master_down_interval);
        }
    }

    // Disables the instance (§4.3 "any -> Initialize"): cancels both
    // timers, and if leaving Master, emits the graceful-yield
    // advertisement before removing installed state.
    pub fn disable(&mut self) {
        if !self.is_running() {
            self.config.enabled = false;
            return;
        }

        self.config.enabled = false;
        self.timer = VrrpTimer::Null;

        if self.state.state == State::Master {
            self.send_advertisement(PRIORITY_LEAVE);
            self.teardown_master_state();
        }

        if let Err(error) = self.vif.leave_mcast() {
            error.log();
        }

        self.state.state = State::Initialize;
        self.state.last_event = Event::Shutdown;
        self.state.up_time = None;
        Debug::InstanceStop(InstanceInactiveReason::AdminDown).log();
    }

    // Interface transitioned to unready: forces Initialize without the
    // graceful-yield advertisement, since the link itself is gone.
    pub fn on_interface_down(&mut self) {
        if !self.is_running() {
            return;
        }
        self.timer = VrrpTimer::Null;
        if self.state.state == State::Master {
            self.teardown_master_state();
        }
        if let Err(error) = self.vif.leave_mcast() {
            error.log();
        }
        self.state.state = State::Initialize;
        self.state.last_event = Event::InterfaceDown;
        self.state.up_time = None;
        Debug::InstanceStop(InstanceInactiveReason::InterfaceDown).log();
    }

    pub fn on_interface_up(&mut self) {
        if self.config.enabled && !self.is_running() {
            self.state.last_event = Event::InterfaceUp;
            self.enable();
        }
    }

    // ===== state transitions =====

    fn become_master(&mut self, reason: MasterReason) {
        self.state.state = State::Master;
        self.state.new_master_reason = reason;
        self.state.statistics.master_transitions += 1;

        if let Err(error) = self.vif.add_mac(self.source_mac) {
            error.log();
        }
        for network in self.config.virtual_addresses.clone() {
            let prefix = self.config.prefix_for(network.ip());
            if let Err(error) = self.vif.add_ip(network.ip(), prefix) {
                error.log();
            }
        }

        self.send_advertisement(self.config.priority);
        crate::arp::send_gratuitous_burst(
            self.vif.as_ref(),
            self.source_mac,
            &self
                .config
                .virtual_addresses
                .iter()
                .map(|n| n.ip())
                .collect::<Vec<_>>(),
        );

        self.arm_advertise_timer();
    }

    fn become_backup(&mut self, initial_interval: f64) {
        let was_master = self.state.state == State::Master;
        if was_master {
            self.teardown_master_state();
        }
        self.state.state = State::Backup;
        self.arm_master_down_timer(initial_interval);
    }

    fn teardown_master_state(&mut self) {
        if let Err(error) = self.vif.delete_mac(self.source_mac) {
            error.log();
        }
        for network in self.config.virtual_addresses.clone() {
            if let Err(error) = self.vif.delete_ip(network.ip()) {
                error.log();
            }
        }
    }

    fn arm_advertise_timer(&mut self) {
        let interval =
            Duration::from_secs(self.config.advertise_interval as u64);
        let tx = self.timer_tx.clone();
        let ifname = self.ifname.clone();
        let vrid = self.vrid;
        self.timer = VrrpTimer::AdverTimer(IntervalTask::new(
            interval,
            false,
            move || {
                let tx = tx.clone();
                let ifname = ifname.clone();
                async move {
                    let _ = tx.send(TimerEvent {
                        ifname,
                        vrid,
                        kind: TimerKind::Advertise,
                    });
                }
            },
        ));
    }

    fn arm_master_down_timer(&mut self, seconds: f64) {
        let duration = Duration::from_secs_f64(seconds.max(0.0));
        let tx = self.timer_tx.clone();
        let ifname = self.ifname.clone();
        let vrid = self.vrid;
        self.timer = VrrpTimer::MasterDownTimer(TimeoutTask::new(
            duration,
            move || async move {
                let _ = tx.send(TimerEvent {
                    ifname,
                    vrid,
                    kind: TimerKind::MasterDown,
                });
            },
        ));
    }

    // Rearms whichever timer is currently active, reusing the configured
    // duration unless an explicit override (skew acceleration) is given.
    fn rearm_master_down(&mut self, seconds: Option<f64>) {
        let seconds = seconds.unwrap_or(self.state.master_down_interval);
        match &mut self.timer {
            VrrpTimer::MasterDownTimer(task) => {
                task.reset(Some(Duration::from_secs_f64(seconds.max(0.0))));
            }
            _ => self.arm_master_down_timer(seconds),
        }
    }

    fn rearm_advertise(&mut self) {
        match &mut self.timer {
            VrrpTimer::AdverTimer(task) => {
                task.reset(Some(Duration::from_secs(
                    self.config.advertise_interval as u64,
                )));
            }
            _ => self.arm_advertise_timer(),
        }
    }

    // ===== timer expiry =====

    // Master-down timer expiry while Backup: this instance takes over.
    pub fn master_down_expiry(&mut self) {
        if self.state.state != State::Backup {
            return;
        }
        self.state.last_event = Event::MasterTimeout;
        self.become_master(MasterReason::NoResponse);
    }

    // Advertisement timer expiry while Master: send and rearm.
    pub fn advertise_expiry(&mut self) {
        if self.state.state != State::Master {
            return;
        }
        self.send_advertisement(self.config.priority);
        self.rearm_advertise();
    }

    // ===== packet reception =====

    // Validates and dispatches a received advertisement, per §4.3's
    // rejection cases and receive rules. Ground: `Vrrp::recv`/
    // `recv_adver_backup`/`recv_adver_master` in the XORP original.
    pub fn receive(
        &mut self,
        src: Ipv4Addr,
        packet: &VrrpPacket,
    ) -> Result<(), Error> {
        Debug::PacketRx(&std::net::IpAddr::V4(src), packet).log();

        if packet.vrid != self.vrid {
            self.state.statistics.vrid_errors += 1;
            return Err(Error::VridMismatch {
                expected: self.vrid,
                received: packet.vrid,
            });
        }
        if packet.auth_type != VRRP_AUTH_NONE {
            self.state.statistics.invalid_type_pkts_rcvd += 1;
            return Err(Error::UnsupportedAuth(packet.auth_type));
        }
        if packet.adver_int != self.config.advertise_interval {
            self.state.statistics.interval_errors += 1;
            return Err(Error::IntervalMismatch {
                expected: self.config.advertise_interval,
                received: packet.adver_int,
            });
        }
        if !self.check_addresses(&packet.addresses) && packet.priority != PRIORITY_OWNER {
            return Err(Error::AddressSetMismatch {
                expected: self
                    .config
                    .virtual_addresses
                    .iter()
                    .map(|n| n.ip())
                    .collect(),
                received: packet.addresses.clone(),
            });
        }

        self.state.statistics.adv_rcvd += 1;
        if packet.priority == PRIORITY_LEAVE {
            self.state.statistics.priority_zero_pkts_rcvd += 1;
        }

        match self.state.state {
            State::Initialize => {}
            State::Backup => {
                self.state.last_adv_src = Some(src);
                self.receive_as_backup(packet.priority);
            }
            State::Master => self.receive_as_master(src, packet.priority),
        }

        Ok(())
    }

    fn check_addresses(&self, received: &[Ipv4Addr]) -> bool {
        let mut ours: Vec<Ipv4Addr> = self
            .config
            .virtual_addresses
            .iter()
            .map(|n| n.ip())
            .collect();
        let mut theirs = received.to_vec();
        ours.sort();
        theirs.sort();
        ours == theirs
    }

    fn receive_as_backup(&mut self, priority: u8) {
        if priority == PRIORITY_LEAVE {
            self.state.last_event = Event::LowerPriorityMaster;
            self.rearm_master_down(Some(self.state.skew_time));
        } else if !self.config.preempt || priority >= self.config.priority {
            self.rearm_master_down(None);
        }
        // preempt && priority < ours: let the existing timer run down.
    }

    fn receive_as_master(&mut self, src: Ipv4Addr, priority: u8) {
        if priority == PRIORITY_LEAVE {
            self.send_advertisement(self.config.priority);
            self.rearm_advertise();
            return;
        }
        let primary = self.vif.primary_addr();
        let should_yield = priority > self.config.priority
            || (priority == self.config.priority
                && primary.is_some_and(|primary| src > primary));
        if should_yield {
            self.state.last_event = Event::HigherPriorityBackup;
            self.become_backup(self.state.master_down_interval);
        }
    }

    // Emulated-ARP mode only (spec section 4.5): answers an ARP request
    // for one of our protected addresses while Master. A no-op in every
    // other state or under kernel-assisted mode, where the host stack
    // answers ARP once the virtual MAC/IP are installed.
    pub fn on_arp_request(
        &mut self,
        requester_mac: [u8; 6],
        request: &crate::packet::ArpPacket,
    ) {
        if self.state.state != State::Master
            || self.config.arp_mode != crate::config::ArpMode::Emulated
        {
            return;
        }
        let addresses: Vec<Ipv4Addr> = self
            .config
            .virtual_addresses
            .iter()
            .map(|n| n.ip())
            .collect();
        if let Some(reply) =
            crate::arp::reply_to_request(self.source_mac, &addresses, request)
        {
            if let Err(error) = crate::arp::send_reply(
                self.vif.as_ref(),
                self.source_mac,
                &reply,
                requester_mac,
            ) {
                error.log();
            }
        }
    }

    // ===== transmission =====

    fn send_advertisement(&mut self, priority: u8) {
        let addresses: Vec<Ipv4Addr> = self
            .config
            .virtual_addresses
            .iter()
            .map(|n| n.ip())
            .collect();
        let packet = VrrpPacket::new(
            self.vrid,
            priority,
            self.config.advertise_interval,
            addresses,
        );
        Debug::PacketTx(&std::net::IpAddr::V4(
            self.vif.primary_addr().unwrap_or(Ipv4Addr::UNSPECIFIED),
        ), &packet)
        .log();

        let encoded = packet.encode();
        if let Err(error) = self.vif.send(
            self.source_mac,
            VRRP_MULTICAST_MAC,
            ETHERTYPE_IP,
            &encoded,
        ) {
            error.log();
        } else {
            self.state.statistics.adv_sent += 1;
            if priority == PRIORITY_LEAVE {
                self.state.statistics.priority_zero_pkts_sent += 1;
            }
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        // Dropping `self.timer` cancels whatever task is armed before the
        // instance itself goes away, so a late-firing callback can never
        // observe a destroyed instance (see tasks.rs and design notes).
        self.timer = VrrpTimer::Null;
        Debug::InstanceDelete.log();
    }
}
