//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

// IP address family.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AddressFamily {
    Ipv4 = 1,
    Ipv6 = 2,
}

// Extension methods for IpAddr.
pub trait IpAddrExt {
    // Returns the address family of the IP address.
    fn address_family(&self) -> AddressFamily;

    // Returns true if this is an usable unicast address.
    fn is_usable(&self) -> bool;

    // Returns an unspecified address of the given address family.
    fn unspecified(af: AddressFamily) -> IpAddr;
}

// ===== impl AddressFamily =====

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "ipv4"),
            AddressFamily::Ipv6 => write!(f, "ipv6"),
        }
    }
}

// ===== impl IpAddr =====

impl IpAddrExt for IpAddr {
    fn address_family(&self) -> AddressFamily {
        match self {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    fn is_usable(&self) -> bool {
        match self {
            IpAddr::V4(addr) => {
                !(addr.is_loopback()
                    || addr.is_broadcast()
                    || addr.is_multicast()
                    || addr.is_unspecified())
            }
            IpAddr::V6(addr) => {
                !(addr.is_loopback()
                    || addr.is_multicast()
                    || addr.is_unspecified())
            }
        }
    }

    fn unspecified(af: AddressFamily) -> IpAddr {
        match af {
            AddressFamily::Ipv4 => Ipv4Addr::UNSPECIFIED.into(),
            AddressFamily::Ipv6 => Ipv6Addr::UNSPECIFIED.into(),
        }
    }
}
