//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::{Arc, atomic};
use std::time::Duration;

use tracing::Instrument;
use vigil_utils::Sender;
use vigil_utils::bfd::PathType;
use vigil_utils::socket::UdpSocket;
use vigil_utils::task::{IntervalTask, Task, TimeoutTask};

use crate::network;
use crate::packet::PacketFlags;
use crate::session::{Session, SessionId};

// Delay before reopening a session's egress socket after a send error.
const RESET_INTERVAL: Duration = Duration::from_secs(1);

//
// BFD tasks diagram:
//                                +--------------+
//                                |    daemon    |
//                                +--------------+
//                                      |
//                                      | (1x) control
//                                      V
//                                +--------------+
//                 udp_rx (2x) -> |              | -> (Nx) udp_tx_interval
//        detection_timer (Nx) -> |    master    | -> (Nx) udp_tx_final
//            reset_timer (Nx) -> |              |
//             send_error (Nx) -> |              |
//                                +--------------+
//                                      |
//                                      | (Nx) events
//                                      V
//                                +--------------+
//                                |  consumers   |
//                                +--------------+
//

// BFD inter-task message types.
pub mod messages {
    // Type aliases.
    pub use input::{
        DetectTimerMsg, ResetTimerMsg, SendErrorMsg, UdpRxPacketMsg,
    };

    // Input messages (child task -> main task).
    pub mod input {
        use serde::{Deserialize, Serialize};

        use crate::network::PacketInfo;
        use crate::packet::Packet;
        use crate::session::SessionId;

        #[derive(Debug, Deserialize, Serialize)]
        pub struct UdpRxPacketMsg {
            pub packet_info: PacketInfo,
            pub packet: Packet,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct DetectTimerMsg {
            pub sess_id: SessionId,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct SendErrorMsg {
            pub sess_id: SessionId,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct ResetTimerMsg {
            pub sess_id: SessionId,
        }
    }

    // Control messages (daemon -> main task).
    pub mod control {
        use std::path::PathBuf;

        use crate::config::SessionCfg;

        #[derive(Debug)]
        pub enum ControlMsg {
            Reload(Vec<SessionCfg>),
            Dump(PathBuf),
            Shutdown,
        }
    }
}

// ===== BFD tasks =====

// UDP Rx task.
pub(crate) fn udp_rx(
    socket: UdpSocket,
    path_type: PathType,
    udp_packet_rxp: &Sender<messages::input::UdpRxPacketMsg>,
) -> Task<()> {
    #[cfg(not(feature = "testing"))]
    {
        let socket = Arc::new(socket);
        let udp_packet_rxp = udp_packet_rxp.clone();
        Task::spawn(
            async move {
                let _ =
                    network::read_loop(socket, path_type, udp_packet_rxp).await;
            }
            .in_current_span(),
        )
    }
    #[cfg(feature = "testing")]
    {
        Task::spawn(async move { std::future::pending().await })
    }
}

// Sends periodic BFD control packets.
//
// Every gap between two packets is jittered as required by RFC 5880,
// Section 6.8.7.
pub(crate) fn udp_tx_interval(
    sess: &Session,
    interval: u32,
    socket: &Arc<UdpSocket>,
    send_errorp: &Sender<messages::input::SendErrorMsg>,
) -> IntervalTask {
    #[cfg(not(feature = "testing"))]
    {
        let interval = Duration::from_micros(interval as u64);
        let jitter = match sess.config.detect_mult {
            1 => 0.75..=0.90,
            _ => 0.75..=1.00,
        };
        let packet = sess.generate_packet();
        let sess_id = sess.id;
        let sockaddr = sess.state.sockaddr;

        // Clone reference-counted pointers.
        let socket = socket.clone();
        let poll_active = sess.state.poll_active.clone();
        let tx_packet_count = sess.statistics.tx_packet_count.clone();
        let tx_error_count = sess.statistics.tx_error_count.clone();
        let send_errorp = send_errorp.clone();

        IntervalTask::new(interval, Some(jitter), true, move || {
            // Clone reference-counted pointers.
            let socket = socket.clone();
            let poll_active = poll_active.clone();
            let tx_packet_count = tx_packet_count.clone();
            let tx_error_count = tx_error_count.clone();
            let send_errorp = send_errorp.clone();

            // Update the P-bit as necessary.
            let mut packet = packet.clone();
            if poll_active.load(atomic::Ordering::Relaxed) {
                packet.flags.insert(PacketFlags::P);
            } else {
                packet.flags.remove(PacketFlags::P);
            }

            // Send packet.
            network::send_packet(
                socket,
                sockaddr,
                packet,
                sess_id,
                tx_packet_count,
                tx_error_count,
                send_errorp,
            )
        })
    }
    #[cfg(feature = "testing")]
    {
        IntervalTask {}
    }
}

// Sends single BFD control packet with the F-bit set.
pub(crate) fn udp_tx_final(
    sess: &Session,
    socket: &Arc<UdpSocket>,
    send_errorp: &Sender<messages::input::SendErrorMsg>,
) {
    #[cfg(not(feature = "testing"))]
    {
        // Generate packet with the F-bit set.
        let mut packet = sess.generate_packet();
        packet.flags.insert(PacketFlags::F);

        let sess_id = sess.id;
        let sockaddr = sess.state.sockaddr;

        // Clone reference-counted pointers.
        let socket = socket.clone();
        let tx_packet_count = sess.statistics.tx_packet_count.clone();
        let tx_error_count = sess.statistics.tx_error_count.clone();
        let send_errorp = send_errorp.clone();

        // Send the packet asynchronously.
        let mut task = Task::spawn(async move {
            network::send_packet(
                socket,
                sockaddr,
                packet,
                sess_id,
                tx_packet_count,
                tx_error_count,
                send_errorp,
            )
            .await;
        });
        task.detach();
    }
}

// BFD session detection timer.
pub(crate) fn detection_timer(
    sess: &Session,
    detect_timerp: &Sender<messages::input::DetectTimerMsg>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let holdtime = Duration::from_micros(sess.detection_time().unwrap());
        let sess_id = sess.id;
        let detect_timerp = detect_timerp.clone();
        TimeoutTask::new(holdtime, move || async move {
            let msg = messages::input::DetectTimerMsg { sess_id };
            let _ = detect_timerp.send(msg).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}

// BFD session socket reset timer.
pub(crate) fn reset_timer(
    sess_id: SessionId,
    reset_timerp: &Sender<messages::input::ResetTimerMsg>,
) -> TimeoutTask {
    #[cfg(not(feature = "testing"))]
    {
        let reset_timerp = reset_timerp.clone();
        TimeoutTask::new(RESET_INTERVAL, move || async move {
            let msg = messages::input::ResetTimerMsg { sess_id };
            let _ = reset_timerp.send(msg).await;
        })
    }
    #[cfg(feature = "testing")]
    {
        TimeoutTask {}
    }
}
