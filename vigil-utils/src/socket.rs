//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::SocketAddr;
use std::os::raw::{c_int, c_void};
use std::os::unix::io::AsRawFd;

// Normal build: re-export standard socket types.
#[cfg(not(feature = "testing"))]
pub use {socket2::Socket, tokio::net::UdpSocket};

// Test build: export mock sockets.
#[cfg(feature = "testing")]
pub use crate::socket::mock::{Socket, UdpSocket};
use crate::ip::{AddressFamily, IpAddrExt};

// Maximum TTL for IPv4 or Hop Limit for IPv6.
pub const TTL_MAX: u8 = 255;

// Useful type definition.
type Result<T> = std::io::Result<T>;

// Extension methods for all socket types.
pub trait SocketExt: Sized + AsRawFd {
    // Sets the value of the IP_TOS option for this socket.
    fn set_ipv4_tos(&self, tos: u8) -> Result<()> {
        let optval = tos as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_TOS,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IP_TTL option for this socket.
    fn set_ipv4_ttl(&self, ttl: u8) -> Result<()> {
        let optval = ttl as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_TTL,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IP_MINTTL option for this socket.
    fn set_ipv4_minttl(&self, ttl: u8) -> Result<()> {
        let optval = ttl as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_MINTTL,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IPV6_TCLASS option for this socket.
    fn set_ipv6_tclass(&self, dscp: u8) -> Result<()> {
        let optval = dscp as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_TCLASS,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IPV6_UNICAST_HOPS option for this socket.
    fn set_ipv6_unicast_hops(&self, hops: u8) -> Result<()> {
        let optval = hops as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_UNICAST_HOPS,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IPV6_MINHOPCOUNT option for this socket.
    fn set_ipv6_min_hopcount(&self, hopcount: u8) -> Result<()> {
        let optval = hopcount as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_MINHOPCOUNT,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }
}

// Extension methods for UdpSocket.
pub trait UdpSocketExt: SocketExt {
    // Creates a UDP socket from the given address.
    //
    // This is the same as [`UdpSocket::bind`], except that the `SO_REUSEADDR`
    // option is set before binding.
    fn bind_reuseaddr(addr: SocketAddr) -> Result<UdpSocket>;

    // Sets the value of the IP_PKTINFO option for this socket.
    fn set_ipv4_pktinfo(&self, value: bool) -> Result<()> {
        let optval = value as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_PKTINFO,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IP_RECVTTL option for this socket.
    fn set_ipv4_recvttl(&self, value: bool) -> Result<()> {
        let optval = value as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IP,
            libc::IP_RECVTTL,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IPV6_RECVPKTINFO option for this socket.
    fn set_ipv6_pktinfo(&self, value: bool) -> Result<()> {
        let optval = value as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_RECVPKTINFO,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }

    // Sets the value of the IPV6_RECVHOPLIMIT option for this socket.
    fn set_ipv6_recvhoplimit(&self, value: bool) -> Result<()> {
        let optval = value as c_int;

        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_RECVHOPLIMIT,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    }
}

// ===== impl UdpSocket =====

#[cfg(not(feature = "testing"))]
impl SocketExt for UdpSocket {}

#[cfg(not(feature = "testing"))]
impl UdpSocketExt for UdpSocket {
    fn bind_reuseaddr(addr: SocketAddr) -> Result<UdpSocket> {
        use socket2::{Domain, Type};

        let domain = match addr.ip().address_family() {
            AddressFamily::Ipv4 => Domain::IPV4,
            AddressFamily::Ipv6 => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, None)?;
        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        UdpSocket::from_std(socket.into())
    }
}

// ===== Mock sockets for unit testing =====

pub mod mock {
    #[derive(Debug, Default)]
    pub struct Socket();

    #[derive(Debug, Default)]
    pub struct UdpSocket();
}

// ===== global functions =====

#[allow(unsafe_code)]
fn setsockopt<F: AsRawFd>(
    sock: &F,
    level: c_int,
    optname: c_int,
    optval: *const c_void,
    optlen: libc::socklen_t,
) -> Result<()> {
    let ret = unsafe {
        libc::setsockopt(sock.as_raw_fd(), level, optname, optval, optlen)
    };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}
