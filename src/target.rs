//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// The VRRP target: owns every instance on every interface this daemon is
// managing and dispatches received frames and interface events to the
// right one. Grounded on `Interface` in interface.rs (ownership of
// `BTreeMap<u8, Instance>`) generalized across interfaces, and on
// `southbound.rs`'s per-interface event propagation (reworked onto the
// `Vif` facade instead of ibus messages).

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::config::{ArpMode, ConfigError};
use crate::error::Error;
use crate::instance::{Instance, InstanceInfo, TimerEvent, TimerKind};
use crate::packet::VrrpPacket;
use crate::vif::Vif;

// A field settable through `VrrpTarget::configure`, mirroring the
// configuration surface in spec section 6.
#[derive(Clone, Debug)]
pub enum ConfigField {
    Priority(u8),
    Interval(u8),
    Preempt(bool),
    ArpMode(ArpMode),
    AddAddress { addr: Ipv4Addr, prefix: Option<u8> },
    RemoveAddress(Ipv4Addr),
    Enable(bool),
}

// Owns the full set of VRRP instances across every interface, keyed by
// (interface name, VRID). A single `timer_tx`/`timer_rx` pair fans every
// instance's timer expiries back through one channel so the caller can
// drive everything from one event loop (single-threaded cooperative
// model, spec section 5).
#[derive(Debug)]
pub struct VrrpTarget {
    instances: BTreeMap<(String, u8), Instance>,
    timer_tx: UnboundedSender<TimerEvent>,
    timer_rx: UnboundedReceiver<TimerEvent>,
    decode_errors: u64,
}

impl Default for VrrpTarget {
    fn default() -> Self {
        VrrpTarget::new()
    }
}

impl VrrpTarget {
    pub fn new() -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        VrrpTarget {
            instances: BTreeMap::new(),
            timer_tx,
            timer_rx,
            decode_errors: 0,
        }
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    pub fn get(&self, ifname: &str, vrid: u8) -> Option<&Instance> {
        self.instances.get(&(ifname.to_owned(), vrid))
    }

    // Direct mutable access to an instance, for callers that need to
    // drive a transition (e.g. a timer expiry) outside the normal
    // `next_timer_event` loop, or inspect/mutate configuration fields
    // the `configure` surface doesn't expose a setter for.
    pub fn get_mut(&mut self, ifname: &str, vrid: u8) -> Option<&mut Instance> {
        self.instances.get_mut(&(ifname.to_owned(), vrid))
    }

    pub fn get_info(&self, ifname: &str, vrid: u8) -> Option<InstanceInfo> {
        self.get(ifname, vrid).map(Instance::get_info)
    }

    // Creates a new, disabled instance bound to `ifname`/`vrid`. VRID
    // validity is the only constructor-time check (fatal errors per
    // spec section 7 propagate to the caller with no instance created).
    pub fn add_instance(
        &mut self,
        ifname: &str,
        vrid: u8,
        vif: Arc<dyn Vif>,
    ) -> Result<(), ConfigError> {
        crate::config::InstanceCfg::validate_vrid(vrid)?;
        let key = (ifname.to_owned(), vrid);
        if self.instances.contains_key(&key) {
            return Ok(());
        }
        let instance =
            Instance::new(ifname.to_owned(), vrid, vif, self.timer_tx.clone());
        self.instances.insert(key, instance);
        Ok(())
    }

    // Removes an instance, disabling it first so its timers are drained
    // and any installed state is torn down before it goes away (spec
    // section 5: "instance removal drains its timers first").
    pub fn remove_instance(&mut self, ifname: &str, vrid: u8) {
        if let Some(mut instance) =
            self.instances.remove(&(ifname.to_owned(), vrid))
        {
            instance.disable();
        }
    }

    pub fn configure(
        &mut self,
        ifname: &str,
        vrid: u8,
        field: ConfigField,
    ) -> Result<(), ConfigError> {
        let instance = self
            .instances
            .get_mut(&(ifname.to_owned(), vrid))
            .ok_or(ConfigError::InstanceNotFound(vrid))?;
        match field {
            ConfigField::Priority(priority) => instance.set_priority(priority)?,
            ConfigField::Interval(interval) => instance.set_interval(interval),
            ConfigField::Preempt(preempt) => instance.config.set_preempt(preempt),
            ConfigField::ArpMode(mode) => instance.config.set_arp_mode(mode),
            ConfigField::AddAddress { addr, prefix } => {
                instance.config.add_protected_address(addr, prefix)?
            }
            ConfigField::RemoveAddress(addr) => {
                instance.config.remove_protected_address(addr)
            }
            ConfigField::Enable(true) => {
                if instance.config.virtual_addresses.is_empty() {
                    return Err(ConfigError::EmptyAddressSet);
                }
                instance.enable();
            }
            ConfigField::Enable(false) => instance.disable(),
        }
        Ok(())
    }

    // Parses `bytes` as a VRRP advertisement and delivers it to the
    // matching instance. A decode failure still increments the
    // target-wide counter; when the VRID (the PDU's second byte) can be
    // recovered from the raw frame, the failure is also attributed to
    // that instance's own statistics, per spec section 4.4 / scenario E.
    // `ShortFrame` on a frame too short to even contain a VRID byte only
    // ever reaches the target-wide counter.
    pub fn on_frame(
        &mut self,
        ifname: &str,
        src: Ipv4Addr,
        bytes: &[u8],
    ) -> Result<(), Error> {
        let packet = match VrrpPacket::decode(bytes) {
            Ok(packet) => packet,
            Err(error) => {
                self.decode_errors += 1;
                if let Some(&vrid) = bytes.get(1) {
                    if let Some(instance) =
                        self.instances.get_mut(&(ifname.to_owned(), vrid))
                    {
                        instance.record_decode_error(&error);
                    }
                }
                return Err(Error::Decode(error));
            }
        };

        let Some(instance) =
            self.instances.get_mut(&(ifname.to_owned(), packet.vrid))
        else {
            debug!(
                ifname,
                vrid = packet.vrid,
                "dropping advertisement for unknown instance"
            );
            return Ok(());
        };
        instance.receive(src, &packet)
    }

    // Attributes a facade-level TTL rejection (the frame never made it to
    // `on_frame`) to the right instance, if one exists for `(ifname, vrid)`.
    pub fn record_ttl_error(&mut self, ifname: &str, vrid: u8) {
        if let Some(instance) =
            self.instances.get_mut(&(ifname.to_owned(), vrid))
        {
            instance.record_ttl_error();
        }
    }

    // Delivers an ARP request to every emulated-mode Master instance on
    // `ifname`; each decides independently whether the target address is
    // one of its own (spec section 4.5, emulated mode).
    pub fn on_arp_request(
        &mut self,
        ifname: &str,
        requester_mac: [u8; 6],
        request: &crate::packet::ArpPacket,
    ) {
        for ((name, _), instance) in self.instances.iter_mut() {
            if name == ifname {
                instance.on_arp_request(requester_mac, request);
            }
        }
    }

    // Propagates an interface readiness transition to every instance
    // bound to it.
    pub fn on_interface_event(&mut self, ifname: &str, ready: bool) {
        for ((name, _), instance) in self.instances.iter_mut() {
            if name != ifname {
                continue;
            }
            if ready {
                instance.on_interface_up();
            } else {
                instance.on_interface_down();
            }
        }
    }

    // Awaits the next timer expiry and dispatches it to its instance.
    // Returns `None` once every instance (and thus every timer sender
    // clone) has been dropped, signaling a clean shutdown to the caller.
    pub async fn next_timer_event(&mut self) -> Option<()> {
        let event = self.timer_rx.recv().await?;
        self.dispatch_timer(event);
        Some(())
    }

    // Non-blocking drain, primarily useful in tests driven by a paused
    // tokio clock where no `.await` point is needed.
    pub fn try_recv_timer(&mut self) -> bool {
        match self.timer_rx.try_recv() {
            Ok(event) => {
                self.dispatch_timer(event);
                true
            }
            Err(_) => false,
        }
    }

    fn dispatch_timer(&mut self, event: TimerEvent) {
        let Some(instance) =
            self.instances.get_mut(&(event.ifname.clone(), event.vrid))
        else {
            return;
        };
        match event.kind {
            TimerKind::Advertise => instance.advertise_expiry(),
            TimerKind::MasterDown => instance.master_down_expiry(),
        }
    }
}
