//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tracing::warn;

use crate::consts::*;

// How a Master instance answers ARP for its protected addresses (spec
// section 4.5). Kernel-assisted is the default (section 9): the source's
// own ARP-daemon hook is disabled, so this crate preserves that default
// rather than inferring when emulation is needed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArpMode {
    KernelAssisted,
    Emulated,
}

// Per-instance configuration, validated at the setter boundary so that a
// rejected call never leaves the instance in a half-updated state.
#[derive(Clone, Debug)]
pub struct InstanceCfg {
    pub priority: u8,
    pub advertise_interval: u8,
    pub preempt: bool,
    pub enabled: bool,
    pub arp_mode: ArpMode,
    pub virtual_addresses: Vec<Ipv4Network>,
    pub prefixes: BTreeMap<Ipv4Addr, u8>,
}

impl Default for InstanceCfg {
    fn default() -> Self {
        InstanceCfg {
            priority: PRIORITY_DEFAULT,
            advertise_interval: ADVERTISE_INTERVAL_DEFAULT,
            preempt: true,
            enabled: false,
            arp_mode: ArpMode::KernelAssisted,
            virtual_addresses: Vec::new(),
            prefixes: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigError {
    VridOutOfRange(u8),
    PriorityOutOfRange(u8),
    PrefixOutOfRange(u8),
    EmptyAddressSet,
    InstanceNotFound(u8),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::VridOutOfRange(vrid) => {
                write!(f, "virtual router id {vrid} out of range 1..255")
            }
            ConfigError::PriorityOutOfRange(priority) => {
                write!(f, "priority {priority} out of range 1..254")
            }
            ConfigError::PrefixOutOfRange(prefix) => {
                write!(f, "prefix length {prefix} out of range 1..32")
            }
            ConfigError::EmptyAddressSet => {
                write!(f, "protected address set must be non-empty when enabled")
            }
            ConfigError::InstanceNotFound(vrid) => {
                write!(f, "no VRRP instance configured for vrid {vrid}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ===== impl InstanceCfg =====

impl InstanceCfg {
    pub fn validate_vrid(vrid: u8) -> Result<(), ConfigError> {
        if vrid < VRID_MIN {
            return Err(ConfigError::VridOutOfRange(vrid));
        }
        Ok(())
    }

    // Mirrors the XORP original's `Vrrp::set_priority`: rejects the
    // reserved "leave" (0) and "owner" (255) values outright rather than
    // clamping them.
    pub fn set_priority(&mut self, priority: u8) -> Result<(), ConfigError> {
        if priority < PRIORITY_MIN || priority > PRIORITY_MAX {
            return Err(ConfigError::PriorityOutOfRange(priority));
        }
        self.priority = priority;
        Ok(())
    }

    // Mirrors `Vrrp::set_interval`: out-of-range values clamp with a
    // warning instead of being rejected, since the interval is a cadence
    // knob rather than an identity field.
    pub fn set_interval(&mut self, interval: u8) {
        let interval = if interval < ADVERTISE_INTERVAL_MIN {
            warn!(
                requested = interval,
                clamped_to = ADVERTISE_INTERVAL_MIN,
                "advertisement interval below minimum, clamping"
            );
            ADVERTISE_INTERVAL_MIN
        } else {
            interval
        };
        self.advertise_interval = interval;
    }

    pub fn set_preempt(&mut self, preempt: bool) {
        self.preempt = preempt;
    }

    pub fn set_arp_mode(&mut self, arp_mode: ArpMode) {
        self.arp_mode = arp_mode;
    }

    pub fn add_protected_address(
        &mut self,
        addr: Ipv4Addr,
        prefix: Option<u8>,
    ) -> Result<(), ConfigError> {
        let prefix = match prefix {
            Some(prefix) => {
                if prefix < PREFIX_MIN || prefix > PREFIX_MAX {
                    return Err(ConfigError::PrefixOutOfRange(prefix));
                }
                prefix
            }
            None => PREFIX_DEFAULT,
        };

        self.prefixes.insert(addr, prefix);
        if !self.virtual_addresses.iter().any(|net| net.ip() == addr) {
            let network = Ipv4Network::new(addr, prefix)
                .expect("prefix already validated into 1..32");
            self.virtual_addresses.push(network);
        }
        Ok(())
    }

    pub fn remove_protected_address(&mut self, addr: Ipv4Addr) {
        self.prefixes.remove(&addr);
        self.virtual_addresses.retain(|net| net.ip() != addr);
    }

    pub fn prefix_for(&self, addr: Ipv4Addr) -> u8 {
        self.prefixes.get(&addr).copied().unwrap_or(PREFIX_DEFAULT)
    }
}
