//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use tracing::{debug, warn};

use crate::network::PacketInfo;
use crate::session::SessionId;

// BFD errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),
    // Inter-task communication
    SessionIdNotFound(SessionId),
    // Session store
    SessionNameInUse(String),
    SessionDiscrInUse(u32),
    // Packet input
    SessionNoMatch(PacketInfo, u32),
    GtsmCheckFailed(IpAddr, u8),
    HopCountExceeded(IpAddr, u8),
    UdpInvalidSourceAddr(IpAddr),
}

// BFD I/O errors.
#[derive(Debug)]
pub enum IoError {
    UdpSocketError(std::io::Error),
    UdpRecvError(std::io::Error),
    UdpSendError(std::io::Error),
    UdpRecvMissingSourceAddr,
    UdpRecvMissingAncillaryData,
    DumpFileError(std::io::Error),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::SessionIdNotFound(sess_id) => {
                warn!(?sess_id, "{}", self);
            }
            Error::SessionNameInUse(name) => {
                warn!(%name, "{}", self);
            }
            Error::SessionDiscrInUse(discr) => {
                warn!(%discr, "{}", self);
            }
            Error::SessionNoMatch(packet_info, your_discr) => {
                debug!(?packet_info, %your_discr, "{}", self);
            }
            Error::GtsmCheckFailed(addr, ttl) => {
                debug!(address = %addr, %ttl, "{}", self);
            }
            Error::HopCountExceeded(addr, ttl) => {
                debug!(address = %addr, %ttl, "{}", self);
            }
            Error::UdpInvalidSourceAddr(addr) => {
                warn!(address = %addr, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::SessionIdNotFound(..) => {
                write!(f, "session ID not found")
            }
            Error::SessionNameInUse(..) => {
                write!(f, "session name already in use")
            }
            Error::SessionDiscrInUse(..) => {
                write!(f, "local discriminator already in use")
            }
            Error::SessionNoMatch(..) => {
                write!(f, "failed to find session")
            }
            Error::GtsmCheckFailed(..) => {
                write!(f, "single-hop packet failed TTL security check")
            }
            Error::HopCountExceeded(..) => {
                write!(f, "multihop packet exceeded the hop count limit")
            }
            Error::UdpInvalidSourceAddr(..) => {
                write!(f, "invalid source address")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        match self {
            IoError::UdpSocketError(error)
            | IoError::UdpRecvError(error)
            | IoError::UdpSendError(error)
            | IoError::DumpFileError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            IoError::UdpRecvMissingSourceAddr
            | IoError::UdpRecvMissingAncillaryData => {
                warn!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::UdpSocketError(..) => {
                write!(f, "failed to create UDP socket")
            }
            IoError::UdpRecvError(..) => {
                write!(f, "failed to receive UDP packet")
            }
            IoError::UdpSendError(..) => {
                write!(f, "failed to send UDP packet")
            }
            IoError::UdpRecvMissingSourceAddr => {
                write!(
                    f,
                    "failed to retrieve source address from received packet"
                )
            }
            IoError::UdpRecvMissingAncillaryData => {
                write!(
                    f,
                    "failed to retrieve ancillary data from received packet"
                )
            }
            IoError::DumpFileError(..) => {
                write!(f, "failed to write diagnostics dump file")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::UdpSocketError(error)
            | IoError::UdpRecvError(error)
            | IoError::UdpSendError(error)
            | IoError::DumpFileError(error) => Some(error),
            _ => None,
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
