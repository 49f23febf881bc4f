//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

// The interface facade: the thin contract the VRRP engine needs from
// whatever owns the physical interface. `LinuxVif` backs it with raw
// sockets; `TestVif` is an in-memory double used by the test suite.

use std::net::Ipv4Addr;

use crate::error::FacadeError;

pub trait Vif: std::fmt::Debug + Send + Sync {
    // True iff the interface is administratively up, has a primary IPv4
    // address, and supports L2 transmit.
    fn ready(&self) -> bool;

    // The interface's primary IPv4 address. Only meaningful while `ready()`.
    fn primary_addr(&self) -> Option<Ipv4Addr>;

    // The interface's own (non-virtual) MAC address.
    fn mac_address(&self) -> [u8; 6];

    fn join_mcast(&self) -> Result<(), FacadeError>;
    fn leave_mcast(&self) -> Result<(), FacadeError>;

    fn add_mac(&self, mac: [u8; 6]) -> Result<(), FacadeError>;
    fn delete_mac(&self, mac: [u8; 6]) -> Result<(), FacadeError>;

    // Installing an address already present is treated as success by the
    // engine, not by the facade: the facade reports what actually happened
    // and the caller (instance.rs) is the one that tolerates AlreadyExists.
    fn add_ip(&self, addr: Ipv4Addr, prefix: u8) -> Result<(), FacadeError>;
    fn delete_ip(&self, addr: Ipv4Addr) -> Result<(), FacadeError>;

    fn send(
        &self,
        src_mac: [u8; 6],
        dst_mac: [u8; 6],
        ethertype: u16,
        payload: &[u8],
    ) -> Result<(), FacadeError>;
}

#[cfg(target_os = "linux")]
mod linux {
    use std::net::Ipv4Addr;
    use std::os::fd::AsRawFd;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    use nix::net::if_::if_nametoindex;
    use socket2::{Domain, Protocol, SockAddr, Socket, Type};
    use tracing::warn;

    use super::Vif;
    use crate::consts::{VRRP_MULTICAST_ADDRESS, VRRP_PROTO_NUMBER};
    use crate::error::FacadeError;

    // Raw-socket backed facade for a Linux network interface. Opens one
    // `IPPROTO_VRRP` raw IP socket for advertisements and relies on the
    // kernel's own ARP responder once the virtual MAC/IP are installed
    // (kernel-assisted mode, the default per the design notes).
    #[derive(Debug)]
    pub struct LinuxVif {
        ifname: String,
        ifindex: u32,
        mac_address: [u8; 6],
        socket: Socket,
        mcast_refcount: AtomicU32,
        ready: AtomicBool,
        primary_addr: Mutex<Option<Ipv4Addr>>,
    }

    impl LinuxVif {
        pub fn new(ifname: &str) -> std::io::Result<Self> {
            let ifindex = if_nametoindex(ifname)?;
            let socket = Socket::new(
                Domain::IPV4,
                Type::RAW,
                Some(Protocol::from(VRRP_PROTO_NUMBER as i32)),
            )?;
            socket.set_broadcast(true)?;

            Ok(LinuxVif {
                ifname: ifname.to_owned(),
                ifindex,
                // Resolved lazily; left zeroed until the caller refreshes
                // it from a southbound interface-update event.
                mac_address: [0; 6],
                socket,
                mcast_refcount: AtomicU32::new(0),
                ready: AtomicBool::new(false),
                primary_addr: Mutex::new(None),
            })
        }

        pub fn set_ready(&self, ready: bool) {
            self.ready.store(ready, Ordering::Relaxed);
        }

        pub fn set_primary_addr(&self, addr: Option<Ipv4Addr>) {
            *self.primary_addr.lock().unwrap() = addr;
        }

        // Re-reads the interface's own MAC address and primary IPv4
        // address from the kernel. Call once at startup and whenever a
        // southbound interface-update event would otherwise have fired
        // (there being no ibus here, callers poll this explicitly).
        pub fn refresh(&mut self) -> std::io::Result<()> {
            use std::io::{Error, ErrorKind};

            let mac_path =
                format!("/sys/class/net/{}/address", self.ifname);
            if let Ok(contents) = std::fs::read_to_string(&mac_path) {
                let mut octets = [0u8; 6];
                for (i, part) in contents.trim().split(':').enumerate().take(6)
                {
                    octets[i] = u8::from_str_radix(part, 16)
                        .map_err(|_| Error::new(ErrorKind::InvalidData, "bad MAC"))?;
                }
                self.mac_address = octets;
            }

            let mut found = None;
            for iface in nix::ifaddrs::getifaddrs()?
                .filter(|i| i.interface_name == self.ifname)
            {
                let sin = iface
                    .address
                    .as_ref()
                    .and_then(|address| address.as_sockaddr_in());
                if let Some(sin) = sin {
                    found = Some(Ipv4Addr::from(sin.ip()));
                    break;
                }
            }
            self.set_primary_addr(found);
            self.set_ready(found.is_some());
            Ok(())
        }

        // Blocking receive of one raw VRRP frame, used from a dedicated
        // OS thread (see `bin/vrrpd.rs`). Strips the IPv4 header the
        // kernel prepends on a raw IP socket and validates the TTL
        // invariant from spec section 6 before returning the payload. A
        // bad-TTL frame still carries the VRID (the payload's second byte)
        // when available, so the caller can attribute the drop to the
        // right instance's statistics.
        pub fn recv_blocking(&self) -> std::io::Result<Option<RawFrame>> {
            use std::io::Read;

            let mut buf = [0u8; 1500];
            let n = (&self.socket).read(&mut buf)?;
            let (header, payload) =
                match crate::packet::Ipv4Header::decode(&buf[..n]) {
                    Ok(parsed) => parsed,
                    Err(_) => return Ok(None),
                };
            if header.ttl != crate::consts::VRRP_TTL {
                let vrid = payload.get(1).copied();
                warn!(ttl = header.ttl, vrid, "dropping VRRP frame with bad TTL");
                return Ok(Some(RawFrame::BadTtl { vrid }));
            }
            Ok(Some(RawFrame::Advertisement(header.src_address, payload.to_vec())))
        }
    }

    // Outcome of `LinuxVif::recv_blocking`, handed across the channel to
    // the event loop so only it touches `VrrpTarget`/`Instance` state.
    #[derive(Clone, Debug)]
    pub enum RawFrame {
        Advertisement(Ipv4Addr, Vec<u8>),
        BadTtl { vrid: Option<u8> },
    }

    fn not_wired(op: &'static str) -> std::io::Error {
        std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("{op} requires FEA-level netlink integration not provided by this facade"),
        )
    }

    impl Vif for LinuxVif {
        fn ready(&self) -> bool {
            self.ready.load(Ordering::Relaxed)
                && self.primary_addr.lock().unwrap().is_some()
        }

        fn primary_addr(&self) -> Option<Ipv4Addr> {
            *self.primary_addr.lock().unwrap()
        }

        fn mac_address(&self) -> [u8; 6] {
            self.mac_address
        }

        fn join_mcast(&self) -> Result<(), FacadeError> {
            if self.mcast_refcount.fetch_add(1, Ordering::SeqCst) == 0 {
                self.socket
                    .join_multicast_v4(
                        &VRRP_MULTICAST_ADDRESS,
                        &std::net::Ipv4Addr::UNSPECIFIED,
                    )
                    .map_err(FacadeError::JoinMcast)?;
            }
            Ok(())
        }

        fn leave_mcast(&self) -> Result<(), FacadeError> {
            let prev = self.mcast_refcount.fetch_sub(1, Ordering::SeqCst);
            if prev == 1 {
                self.socket
                    .leave_multicast_v4(
                        &VRRP_MULTICAST_ADDRESS,
                        &std::net::Ipv4Addr::UNSPECIFIED,
                    )
                    .map_err(FacadeError::LeaveMcast)?;
            } else if prev == 0 {
                self.mcast_refcount.store(0, Ordering::SeqCst);
            }
            Ok(())
        }

        // Installing a secondary receive MAC/IP alias is netlink/ioctl work
        // specific to the deployment's link type (`RTM_NEWNEIGH`/packet-socket
        // filter for the MAC, `RTM_NEWADDR` for the alias) and is left to the
        // forwarding-engine integration that owns the interface (out of
        // scope, see §1: the FEA provides MAC/IP installation). Reporting an
        // error here rather than a silent `Ok` keeps the caller's invariant
        // honest: this facade never actually impersonates the virtual router.
        fn add_mac(&self, _mac: [u8; 6]) -> Result<(), FacadeError> {
            warn!(ifname = %self.ifname, ifindex = self.ifindex, "add_mac not wired to netlink in this build");
            Err(FacadeError::AddMac(not_wired("add_mac")))
        }

        fn delete_mac(&self, _mac: [u8; 6]) -> Result<(), FacadeError> {
            warn!(ifname = %self.ifname, ifindex = self.ifindex, "delete_mac not wired to netlink in this build");
            Err(FacadeError::DeleteMac(not_wired("delete_mac")))
        }

        fn add_ip(&self, addr: Ipv4Addr, prefix: u8) -> Result<(), FacadeError> {
            warn!(ifname = %self.ifname, %addr, prefix, "add_ip not wired to netlink in this build");
            Err(FacadeError::AddIp(addr, not_wired("add_ip")))
        }

        fn delete_ip(&self, addr: Ipv4Addr) -> Result<(), FacadeError> {
            warn!(ifname = %self.ifname, %addr, "delete_ip not wired to netlink in this build");
            Err(FacadeError::DeleteIp(addr, not_wired("delete_ip")))
        }

        fn send(
            &self,
            _src_mac: [u8; 6],
            _dst_mac: [u8; 6],
            _ethertype: u16,
            payload: &[u8],
        ) -> Result<(), FacadeError> {
            let dst = SockAddr::from(std::net::SocketAddrV4::new(
                VRRP_MULTICAST_ADDRESS,
                0,
            ));
            self.socket
                .send_to(payload, &dst)
                .map_err(FacadeError::Send)?;
            Ok(())
        }
    }

    impl AsRawFd for LinuxVif {
        fn as_raw_fd(&self) -> std::os::fd::RawFd {
            self.socket.as_raw_fd()
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::{LinuxVif, RawFrame};

// ===== TestVif =====

use std::sync::Mutex;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VifCall {
    JoinMcast,
    LeaveMcast,
    AddMac([u8; 6]),
    DeleteMac([u8; 6]),
    AddIp(Ipv4Addr, u8),
    DeleteIp(Ipv4Addr),
    Send {
        src_mac: [u8; 6],
        dst_mac: [u8; 6],
        ethertype: u16,
        payload: Vec<u8>,
    },
}

#[derive(Debug, Default)]
struct TestVifState {
    ready: bool,
    primary_addr: Option<Ipv4Addr>,
    mac_address: [u8; 6],
    mcast_refcount: u32,
    installed_macs: Vec<[u8; 6]>,
    installed_ips: Vec<(Ipv4Addr, u8)>,
    calls: Vec<VifCall>,
}

// In-memory facade double. Records every call for test assertions and
// lets the test drive readiness/primary-address transitions directly.
#[derive(Debug)]
pub struct TestVif {
    state: Mutex<TestVifState>,
}

impl Default for TestVif {
    fn default() -> Self {
        TestVif::new()
    }
}

impl TestVif {
    pub fn new() -> Self {
        TestVif {
            state: Mutex::new(TestVifState::default()),
        }
    }

    pub fn with_primary_addr(addr: Ipv4Addr) -> Self {
        let vif = TestVif::new();
        vif.set_ready(true);
        vif.set_primary_addr(Some(addr));
        vif
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().unwrap().ready = ready;
    }

    pub fn set_primary_addr(&self, addr: Option<Ipv4Addr>) {
        self.state.lock().unwrap().primary_addr = addr;
    }

    pub fn set_mac_address(&self, mac: [u8; 6]) {
        self.state.lock().unwrap().mac_address = mac;
    }

    pub fn calls(&self) -> Vec<VifCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn has_mac(&self, mac: [u8; 6]) -> bool {
        self.state.lock().unwrap().installed_macs.contains(&mac)
    }

    pub fn has_ip(&self, addr: Ipv4Addr) -> bool {
        self.state
            .lock()
            .unwrap()
            .installed_ips
            .iter()
            .any(|(ip, _)| *ip == addr)
    }

    pub fn mcast_refcount(&self) -> u32 {
        self.state.lock().unwrap().mcast_refcount
    }

    pub fn sent_frames(&self) -> Vec<(([u8; 6], [u8; 6], u16), Vec<u8>)> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|call| match call {
                VifCall::Send {
                    src_mac,
                    dst_mac,
                    ethertype,
                    payload,
                } => Some(((*src_mac, *dst_mac, *ethertype), payload.clone())),
                _ => None,
            })
            .collect()
    }
}

impl Vif for TestVif {
    fn ready(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.ready && state.primary_addr.is_some()
    }

    fn primary_addr(&self) -> Option<Ipv4Addr> {
        self.state.lock().unwrap().primary_addr
    }

    fn mac_address(&self) -> [u8; 6] {
        self.state.lock().unwrap().mac_address
    }

    fn join_mcast(&self) -> Result<(), FacadeError> {
        let mut state = self.state.lock().unwrap();
        state.mcast_refcount += 1;
        state.calls.push(VifCall::JoinMcast);
        Ok(())
    }

    fn leave_mcast(&self) -> Result<(), FacadeError> {
        let mut state = self.state.lock().unwrap();
        state.mcast_refcount = state.mcast_refcount.saturating_sub(1);
        state.calls.push(VifCall::LeaveMcast);
        Ok(())
    }

    fn add_mac(&self, mac: [u8; 6]) -> Result<(), FacadeError> {
        let mut state = self.state.lock().unwrap();
        if !state.installed_macs.contains(&mac) {
            state.installed_macs.push(mac);
        }
        state.calls.push(VifCall::AddMac(mac));
        Ok(())
    }

    fn delete_mac(&self, mac: [u8; 6]) -> Result<(), FacadeError> {
        let mut state = self.state.lock().unwrap();
        state.installed_macs.retain(|m| *m != mac);
        state.calls.push(VifCall::DeleteMac(mac));
        Ok(())
    }

    fn add_ip(&self, addr: Ipv4Addr, prefix: u8) -> Result<(), FacadeError> {
        let mut state = self.state.lock().unwrap();
        if !state.installed_ips.iter().any(|(ip, _)| *ip == addr) {
            state.installed_ips.push((addr, prefix));
        }
        state.calls.push(VifCall::AddIp(addr, prefix));
        Ok(())
    }

    fn delete_ip(&self, addr: Ipv4Addr) -> Result<(), FacadeError> {
        let mut state = self.state.lock().unwrap();
        state.installed_ips.retain(|(ip, _)| *ip != addr);
        state.calls.push(VifCall::DeleteIp(addr));
        Ok(())
    }

    fn send(
        &self,
        src_mac: [u8; 6],
        dst_mac: [u8; 6],
        ethertype: u16,
        payload: &[u8],
    ) -> Result<(), FacadeError> {
        self.state.lock().unwrap().calls.push(VifCall::Send {
            src_mac,
            dst_mac,
            ethertype,
            payload: payload.to_vec(),
        });
        Ok(())
    }
}
