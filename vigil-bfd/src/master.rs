//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use tokio::sync::mpsc;
use tracing::{error, info};
use vigil_utils::bfd::PathType;
use vigil_utils::ip::AddressFamily;
use vigil_utils::task::Task;
use vigil_utils::{Receiver, Sender};

use crate::config::SessionCfg;
use crate::error::IoError;
use crate::events;
use crate::network;
use crate::notify::Notifier;
use crate::session::Sessions;
use crate::tasks;
use crate::tasks::messages::control::ControlMsg;
use crate::tasks::messages::input::{
    DetectTimerMsg, ResetTimerMsg, SendErrorMsg, UdpRxPacketMsg,
};

#[derive(Debug)]
pub struct Master {
    // UDP Rx tasks.
    udp_sh_rx_tasks: Option<UdpRxTasks>,
    udp_mh_rx_tasks: Option<UdpRxTasks>,
    // BFD sessions.
    pub sessions: Sessions,
    // Consumer event notifier.
    pub notifier: Notifier,
    // Master Tx channels.
    pub tx: MasterChannelsTx,
}

#[derive(Debug)]
struct UdpRxTasks {
    _ipv4: Option<Task<()>>,
    _ipv6: Option<Task<()>>,
}

#[derive(Clone, Debug)]
pub struct MasterChannelsTx {
    // UDP Rx event.
    pub udp_packet_rx: Sender<UdpRxPacketMsg>,
    // Detection timer.
    pub detect_timer: Sender<DetectTimerMsg>,
    // Packet transmission error.
    pub send_error: Sender<SendErrorMsg>,
    // Egress socket reset timer.
    pub reset_timer: Sender<ResetTimerMsg>,
    // Daemon control event.
    pub control: Sender<ControlMsg>,
}

#[derive(Debug)]
pub struct MasterChannelsRx {
    // UDP Rx event.
    pub udp_packet_rx: Receiver<UdpRxPacketMsg>,
    // Detection timer.
    pub detect_timer: Receiver<DetectTimerMsg>,
    // Packet transmission error.
    pub send_error: Receiver<SendErrorMsg>,
    // Egress socket reset timer.
    pub reset_timer: Receiver<ResetTimerMsg>,
    // Daemon control event.
    pub control: Receiver<ControlMsg>,
}

// ===== impl Master =====

impl Master {
    pub fn new() -> (Master, MasterChannelsRx) {
        let (udp_packet_rxp, udp_packet_rxc) = mpsc::channel(4);
        let (detect_timerp, detect_timerc) = mpsc::channel(4);
        let (send_errorp, send_errorc) = mpsc::channel(4);
        let (reset_timerp, reset_timerc) = mpsc::channel(4);
        let (controlp, controlc) = mpsc::channel(4);

        let tx = MasterChannelsTx {
            udp_packet_rx: udp_packet_rxp,
            detect_timer: detect_timerp,
            send_error: send_errorp,
            reset_timer: reset_timerp,
            control: controlp,
        };
        let rx = MasterChannelsRx {
            udp_packet_rx: udp_packet_rxc,
            detect_timer: detect_timerc,
            send_error: send_errorc,
            reset_timer: reset_timerc,
            control: controlc,
        };

        let master = Master {
            udp_sh_rx_tasks: None,
            udp_mh_rx_tasks: None,
            sessions: Default::default(),
            notifier: Default::default(),
            tx,
        };

        (master, rx)
    }

    // Loads the initial session configuration.
    pub fn startup(&mut self, configs: Vec<SessionCfg>) {
        events::process_reload(self, configs);
        for sess in self.sessions.iter() {
            sess.log_config();
        }

        // Per-session faults never terminate the process, but running without
        // the listening sockets at startup is unrecoverable.
        let sh_dead = self
            .udp_sh_rx_tasks
            .as_ref()
            .is_some_and(UdpRxTasks::failed);
        let mh_dead = self
            .udp_mh_rx_tasks
            .as_ref()
            .is_some_and(UdpRxTasks::failed);
        if sh_dead || mh_dead {
            error!("failed to open the BFD listening sockets");
            std::process::exit(1);
        }
    }

    // Starts or stops UDP Rx tasks for single-hop and multihop sessions.
    //
    // A single-hop/multihop UDP Rx task is conditioned to existence of at
    // least one BFD session of that path type. This is done to avoid creating
    // UDP sockets that are not necessary.
    pub(crate) fn update_udp_rx_tasks(&mut self) {
        let ip_sh_sessions = self
            .sessions
            .iter()
            .any(|sess| sess.path_type() == PathType::IpSingleHop);
        let ip_mh_sessions = self
            .sessions
            .iter()
            .any(|sess| sess.path_type() == PathType::IpMultihop);
        let udp_packet_rxp = &self.tx.udp_packet_rx;

        // Update IP single-hop Rx tasks.
        if ip_sh_sessions && self.udp_sh_rx_tasks.is_none() {
            self.udp_sh_rx_tasks =
                Some(UdpRxTasks::new(PathType::IpSingleHop, udp_packet_rxp));
        } else if !ip_sh_sessions && self.udp_sh_rx_tasks.is_some() {
            self.udp_sh_rx_tasks = None;
        }

        // Update IP multihop Rx tasks.
        if ip_mh_sessions && self.udp_mh_rx_tasks.is_none() {
            self.udp_mh_rx_tasks =
                Some(UdpRxTasks::new(PathType::IpMultihop, udp_packet_rxp));
        } else if !ip_mh_sessions && self.udp_mh_rx_tasks.is_some() {
            self.udp_mh_rx_tasks = None;
        }
    }

    // Runs the BFD engine main loop.
    //
    // All session and store mutations happen here, driven by messages from
    // the child tasks and from the daemon.
    pub async fn run(mut self, mut rx: MasterChannelsRx) {
        loop {
            tokio::select! {
                Some(msg) = rx.udp_packet_rx.recv() => {
                    if let Err(error) = events::process_udp_packet(
                        &mut self,
                        msg.packet_info,
                        msg.packet,
                    ) {
                        error.log();
                    }
                }
                Some(msg) = rx.detect_timer.recv() => {
                    if let Err(error) = events::process_detection_timer_expiry(
                        &mut self,
                        msg.sess_id,
                    ) {
                        error.log();
                    }
                }
                Some(msg) = rx.send_error.recv() => {
                    if let Err(error) =
                        events::process_send_error(&mut self, msg.sess_id)
                    {
                        error.log();
                    }
                }
                Some(msg) = rx.reset_timer.recv() => {
                    if let Err(error) = events::process_reset_timer_expiry(
                        &mut self,
                        msg.sess_id,
                    ) {
                        error.log();
                    }
                }
                msg = rx.control.recv() => {
                    match msg {
                        Some(ControlMsg::Reload(configs)) => {
                            events::process_reload(&mut self, configs);
                        }
                        Some(ControlMsg::Dump(path)) => {
                            events::process_dump(&self, &path);
                        }
                        Some(ControlMsg::Shutdown) | None => break,
                    }
                }
            }
        }

        info!("shutting down");
    }
}

// ===== impl UdpRxTasks =====

impl UdpRxTasks {
    // Starts UDP Rx tasks for the given BFD path type.
    fn new(path_type: PathType, udp_packet_rxp: &Sender<UdpRxPacketMsg>) -> Self {
        let udp_rx_task = |af| match network::socket_rx(path_type, af) {
            Ok(socket) => {
                Some(tasks::udp_rx(socket, path_type, udp_packet_rxp))
            }
            Err(error) => {
                IoError::UdpSocketError(error).log();
                None
            }
        };
        UdpRxTasks {
            _ipv4: udp_rx_task(AddressFamily::Ipv4),
            _ipv6: udp_rx_task(AddressFamily::Ipv6),
        }
    }

    // Returns true when no receive socket could be opened at all.
    fn failed(&self) -> bool {
        self._ipv4.is_none() && self._ipv6.is_none()
    }
}
