//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use tracing::{warn, warn_span};

use crate::packet::DecodeError;

// Errors raised while processing a received VRRP advertisement, after it
// has already been successfully decoded off the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    // The frame failed to decode; carries the underlying reason.
    Decode(DecodeError),
    // VRID in the PDU does not match this instance's.
    VridMismatch { expected: u8, received: u8 },
    // Authentication type is not "none".
    UnsupportedAuth(u8),
    // Advertised interval does not match our configured interval.
    IntervalMismatch { expected: u8, received: u8 },
    // Advertised address set does not match ours, and the sender is not an
    // address owner (priority 255).
    AddressSetMismatch {
        expected: Vec<Ipv4Addr>,
        received: Vec<Ipv4Addr>,
    },
}

// Errors raised by the interface facade (Vif) while the instance attempts
// to install/remove state or transmit a frame. These never change the
// state machine's state; they are logged and retried on the next tick.
#[derive(Debug)]
pub enum FacadeError {
    AddMac(std::io::Error),
    DeleteMac(std::io::Error),
    AddIp(Ipv4Addr, std::io::Error),
    DeleteIp(Ipv4Addr, std::io::Error),
    Send(std::io::Error),
    JoinMcast(std::io::Error),
    LeaveMcast(std::io::Error),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        warn_span!("virtual_router").in_scope(|| {
            warn!("{}", self);
        });
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Decode(error) => error.fmt(f),
            Error::VridMismatch { expected, received } => {
                write!(
                    f,
                    "virtual router id (VRID) mismatch: expected {expected}, received {received}"
                )
            }
            Error::UnsupportedAuth(auth_type) => {
                write!(f, "unsupported authentication type {auth_type}")
            }
            Error::IntervalMismatch { expected, received } => {
                write!(
                    f,
                    "advertisement interval mismatch: expected {expected}, received {received}"
                )
            }
            Error::AddressSetMismatch { .. } => {
                write!(f, "received address list not matching local address list")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Decode(error) => Some(error),
            _ => None,
        }
    }
}

impl From<DecodeError> for Error {
    fn from(error: DecodeError) -> Error {
        Error::Decode(error)
    }
}

// ===== impl FacadeError =====

impl FacadeError {
    pub(crate) fn log(&self) {
        warn!(error = %with_source(self), "{}", self);
    }
}

impl std::fmt::Display for FacadeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FacadeError::AddMac(..) => write!(f, "failed to install virtual MAC"),
            FacadeError::DeleteMac(..) => write!(f, "failed to remove virtual MAC"),
            FacadeError::AddIp(ip, ..) => {
                write!(f, "failed to install protected address {ip}")
            }
            FacadeError::DeleteIp(ip, ..) => {
                write!(f, "failed to remove protected address {ip}")
            }
            FacadeError::Send(..) => write!(f, "failed to transmit frame"),
            FacadeError::JoinMcast(..) => {
                write!(f, "failed to join the all-VRRP multicast group")
            }
            FacadeError::LeaveMcast(..) => {
                write!(f, "failed to leave the all-VRRP multicast group")
            }
        }
    }
}

impl std::error::Error for FacadeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FacadeError::AddMac(e)
            | FacadeError::DeleteMac(e)
            | FacadeError::AddIp(_, e)
            | FacadeError::DeleteIp(_, e)
            | FacadeError::Send(e)
            | FacadeError::JoinMcast(e)
            | FacadeError::LeaveMcast(e) => Some(e),
        }
    }
}

// ===== global functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
