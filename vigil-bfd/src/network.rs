//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::io::IoSliceMut;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::ops::Deref;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicU64};

use nix::sys::socket::{self, ControlMessageOwned};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::SendError;
use vigil_utils::Sender;
use vigil_utils::bfd::PathType;
use vigil_utils::ip::{AddressFamily, IpAddrExt};
use vigil_utils::socket::{SocketExt, UdpSocket, UdpSocketExt};

use crate::error::{Error, IoError};
use crate::packet::Packet;
use crate::session::SessionId;
use crate::tasks::messages::input::{SendErrorMsg, UdpRxPacketMsg};

pub const PORT_DST_SINGLE_HOP: u16 = 3784;
pub const PORT_DST_MULTIHOP: u16 = 4784;
pub const PORT_SRC_RANGE: std::ops::RangeInclusive<u16> = 49152..=65535;

// Ancillary data about a received packet.
#[derive(Clone, Copy, Debug)]
#[derive(Deserialize, Serialize)]
pub struct PacketInfo {
    pub path_type: PathType,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub ttl: u8,
}

pub(crate) fn socket_rx(
    path_type: PathType,
    af: AddressFamily,
) -> Result<UdpSocket, std::io::Error> {
    #[cfg(not(feature = "testing"))]
    {
        use vigil_utils::socket::TTL_MAX;

        // Create socket.
        let port = match path_type {
            PathType::IpSingleHop => PORT_DST_SINGLE_HOP,
            PathType::IpMultihop => PORT_DST_MULTIHOP,
        };
        let addr = IpAddr::unspecified(af);
        let sockaddr = SocketAddr::from((addr, port));
        let socket = UdpSocket::bind_reuseaddr(sockaddr)?;

        // Set socket options.
        //
        // The TTL of every received packet is checked in the userspace: the
        // single-hop GTSM rule is also enforced by the kernel (IP_MINTTL),
        // while multihop sessions carry per-session hop count limits that
        // only the demultiplexer knows about.
        match af {
            AddressFamily::Ipv4 => {
                socket.set_ipv4_pktinfo(true)?;
                socket.set_ipv4_recvttl(true)?;
                if path_type == PathType::IpSingleHop {
                    socket.set_ipv4_minttl(TTL_MAX)?;
                }
            }
            AddressFamily::Ipv6 => {
                socket.set_ipv6_pktinfo(true)?;
                socket.set_ipv6_recvhoplimit(true)?;
                if path_type == PathType::IpSingleHop {
                    socket.set_ipv6_min_hopcount(TTL_MAX)?;
                }
            }
        }

        Ok(socket)
    }
    #[cfg(feature = "testing")]
    {
        Ok(UdpSocket::default())
    }
}

pub(crate) fn socket_tx(
    af: AddressFamily,
    addr: IpAddr,
    ttl: u8,
) -> Result<UdpSocket, std::io::Error> {
    #[cfg(not(feature = "testing"))]
    {
        // Create socket.
        //
        // RFC 5881 says the following:
        // "The source port MUST be in the range 49152 through 65535.  The same
        // UDP source port number MUST be used for all BFD Control packets
        // associated with a particular session.  The source port number SHOULD
        // be unique among all BFD sessions on the system".
        //
        // A fresh source port is drawn from that range on every (re)open; a
        // few retries take care of ports already claimed by other sessions.
        let mut rng = rand::rng();
        let mut attempts = 0;
        let socket = loop {
            let port = rng.random_range(PORT_SRC_RANGE);
            let sockaddr = SocketAddr::from((addr, port));
            match UdpSocket::bind_reuseaddr(sockaddr) {
                Ok(socket) => break socket,
                Err(error)
                    if error.kind() == std::io::ErrorKind::AddrInUse
                        && attempts < 10 =>
                {
                    attempts += 1;
                    continue;
                }
                Err(error) => return Err(error),
            }
        };

        // Set socket options.
        match af {
            AddressFamily::Ipv4 => {
                socket.set_ipv4_tos(libc::IPTOS_PREC_INTERNETCONTROL)?;
                socket.set_ipv4_ttl(ttl)?;
            }
            AddressFamily::Ipv6 => {
                socket.set_ipv6_tclass(libc::IPTOS_PREC_INTERNETCONTROL)?;
                socket.set_ipv6_unicast_hops(ttl)?;
            }
        }

        Ok(socket)
    }
    #[cfg(feature = "testing")]
    {
        Ok(UdpSocket::default())
    }
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn send_packet(
    socket: Arc<UdpSocket>,
    sockaddr: SocketAddr,
    packet: Packet,
    sess_id: SessionId,
    tx_packet_count: Arc<AtomicU64>,
    tx_error_count: Arc<AtomicU64>,
    send_errorp: Sender<SendErrorMsg>,
) {
    // Encode packet.
    let buf = packet.encode();

    // Send packet.
    match socket.send_to(&buf, sockaddr).await {
        Ok(_) => {
            tx_packet_count.fetch_add(1, atomic::Ordering::Relaxed);
        }
        Err(error) => {
            IoError::UdpSendError(error).log();
            tx_error_count.fetch_add(1, atomic::Ordering::Relaxed);

            // Let the main task close the socket and schedule a reopen.
            let _ = send_errorp.send(SendErrorMsg { sess_id }).await;
        }
    }
}

#[cfg(not(feature = "testing"))]
fn get_packet_src(sa: Option<&socket::SockaddrStorage>) -> Option<IpAddr> {
    use std::net::{SocketAddrV4, SocketAddrV6};

    sa.and_then(|sa| {
        sa.as_sockaddr_in()
            .map(|sa| *SocketAddrV4::from(*sa).ip())
            .map(IpAddr::from)
            .or_else(|| {
                sa.as_sockaddr_in6()
                    .map(|sa| *SocketAddrV6::from(*sa).ip())
                    .map(IpAddr::from)
            })
    })
}

#[cfg(not(feature = "testing"))]
fn get_packet_dst_ttl(
    cmsgs: socket::CmsgIterator<'_>,
) -> (Option<IpAddr>, Option<u8>) {
    let mut dst = None;
    let mut ttl = None;

    for cmsg in cmsgs {
        match cmsg {
            ControlMessageOwned::Ipv4PacketInfo(pktinfo) => {
                dst = Some(
                    Ipv4Addr::from(pktinfo.ipi_spec_dst.s_addr.to_be()).into(),
                );
            }
            ControlMessageOwned::Ipv6PacketInfo(pktinfo) => {
                dst = Some(Ipv6Addr::from(pktinfo.ipi6_addr.s6_addr).into());
            }
            ControlMessageOwned::Ipv4Ttl(value) => {
                ttl = Some(value as u8);
            }
            ControlMessageOwned::Ipv6HopLimit(value) => {
                ttl = Some(value as u8);
            }
            _ => {}
        }
    }

    (dst, ttl)
}

#[cfg(not(feature = "testing"))]
pub(crate) async fn read_loop(
    socket: Arc<UdpSocket>,
    path_type: PathType,
    udp_packet_rxp: Sender<UdpRxPacketMsg>,
) -> Result<(), SendError<UdpRxPacketMsg>> {
    let mut buf = [0; 1024];
    let mut iov = [IoSliceMut::new(&mut buf)];
    let mut cmsgspace = nix::cmsg_space!(libc::in6_pktinfo, libc::c_int);

    loop {
        // Receive data from the network.
        match socket
            .async_io(tokio::io::Interest::READABLE, || {
                match socket::recvmsg::<socket::SockaddrStorage>(
                    socket.as_raw_fd(),
                    &mut iov,
                    Some(&mut cmsgspace),
                    socket::MsgFlags::empty(),
                ) {
                    Ok(msg) => {
                        // Retrieve source address, destination address and
                        // TTL.
                        let src = get_packet_src(msg.address.as_ref());
                        let (dst, ttl) =
                            get_packet_dst_ttl(msg.cmsgs().unwrap());
                        Ok((src, dst, ttl, msg.bytes))
                    }
                    Err(errno) => Err(errno.into()),
                }
            })
            .await
        {
            Ok((src, dst, ttl, bytes)) => {
                let Some(src) = src else {
                    IoError::UdpRecvMissingSourceAddr.log();
                    continue;
                };
                let (Some(dst), Some(ttl)) = (dst, ttl) else {
                    IoError::UdpRecvMissingAncillaryData.log();
                    continue;
                };

                // Validate packet's source address.
                if !src.is_usable() {
                    Error::UdpInvalidSourceAddr(src).log();
                    continue;
                }

                // Decode packet, discarding malformed ones.
                let packet = match Packet::decode(&iov[0].deref()[0..bytes]) {
                    Ok(packet) => packet,
                    Err(error) => {
                        tracing::debug!(%error, "dropping malformed packet");
                        continue;
                    }
                };

                // Notify the main task about the received packet.
                let packet_info = PacketInfo {
                    path_type,
                    src,
                    dst,
                    ttl,
                };
                let msg = UdpRxPacketMsg {
                    packet_info,
                    packet,
                };
                udp_packet_rxp.send(msg).await?;
            }
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {
                // Retry if the syscall was interrupted (EINTR).
                continue;
            }
            Err(error) => {
                IoError::UdpRecvError(error).log();
            }
        }
    }
}
