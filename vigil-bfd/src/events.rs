//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::path::Path;

use chrono::Utc;
use tracing::{trace, warn};
use vigil_utils::bfd::{DiagnosticCode, PathType, State};
use vigil_utils::socket::TTL_MAX;

use crate::config::SessionCfg;
use crate::debug::Debug;
use crate::dump;
use crate::error::{Error, IoError};
use crate::master::Master;
use crate::network::PacketInfo;
use crate::packet::{Packet, PacketFlags};
use crate::session::{Session, SessionId, SessionRemoteInfo, Sessions};

pub fn process_udp_packet(
    master: &mut Master,
    packet_info: PacketInfo,
    packet: Packet,
) -> Result<(), Error> {
    trace!(?packet_info, ?packet, "received packet");

    // Session lookup varies depending on whether the Your Discriminator field
    // is zero or not.
    let Some((_, sess)) = (match packet.your_discr {
        0 => {
            let multihop = packet_info.path_type == PathType::IpMultihop;
            master.sessions.get_mut_by_endpoint(
                &packet_info.src,
                Some(&packet_info.dst),
                multihop,
            )
        }
        _ => master.sessions.get_mut_by_discr(packet.your_discr),
    }) else {
        // Discard the packet.
        return Err(Error::SessionNoMatch(packet_info, packet.your_discr));
    };

    // Update packet counter.
    sess.statistics.rx_packet_count += 1;

    // TTL security checks: single-hop packets must arrive with the maximum
    // TTL (RFC 5881 GTSM), multihop packets may not have traversed more than
    // the configured number of hops (RFC 5883).
    match sess.path_type() {
        PathType::IpSingleHop => {
            if packet_info.ttl != TTL_MAX {
                sess.statistics.rx_drop_count += 1;
                return Err(Error::GtsmCheckFailed(
                    packet_info.src,
                    packet_info.ttl,
                ));
            }
        }
        PathType::IpMultihop => {
            if TTL_MAX - packet_info.ttl > sess.config.max_hops {
                sess.statistics.rx_drop_count += 1;
                return Err(Error::HopCountExceeded(
                    packet_info.src,
                    packet_info.ttl,
                ));
            }
        }
    }

    // An administratively disabled session ignores all input.
    if sess.state.local_state == State::AdminDown {
        return Ok(());
    }

    // Update session's remote information.
    let old_remote_state = sess.remote_state();
    let old_remote_min_rx = sess.remote_min_rx_interval();
    let old_remote_demand = sess
        .state
        .remote
        .as_ref()
        .is_some_and(|remote| remote.demand_mode);
    sess.state.remote = Some(SessionRemoteInfo::new(
        packet.state,
        packet.my_discr,
        packet.diag,
        packet.detect_mult,
        packet.desired_min_tx,
        packet.req_min_rx,
        packet.flags.contains(PacketFlags::D),
    ));
    sess.state.last_seen = Some(Utc::now());

    // If a Poll Sequence is being transmitted by the local system and the
    // Final (F) bit in the received packet is set, the Poll Sequence MUST be
    // terminated.
    if sess.poll_sequence_is_active() && packet.flags.contains(PacketFlags::F)
    {
        sess.poll_sequence_terminate();

        // The peer is aware of the updated interval timers, so we can now
        // effectively use them.
        sess.state.curr_min_tx = sess.desired_tx_interval();
        sess.state.curr_min_rx = sess.required_min_rx();
        sess.update_tx_interval(&master.tx);
    }

    // Update the transmit interval as described in RFC 5880, Section 6.8.2.
    if sess.remote_min_rx_interval() != old_remote_min_rx {
        // Honor the new interval immediately.
        sess.update_tx_interval(&master.tx);
    }

    // Update the Detection Time as described in RFC 5880, Section 6.8.4.
    sess.update_detection_time(&master.tx.detect_timer);

    // Invoke FSM event.
    let next_state = match (sess.state.local_state, packet.state) {
        (State::Init | State::Up, State::AdminDown) => {
            Some((State::Down, DiagnosticCode::NbrDown))
        }
        (State::Down, State::Down) => {
            Some((State::Init, DiagnosticCode::Nothing))
        }
        (State::Down, State::Init) => {
            Some((State::Up, DiagnosticCode::Nothing))
        }
        (State::Init, State::Init | State::Up) => {
            Some((State::Up, DiagnosticCode::Nothing))
        }
        (State::Up, State::Down) => {
            Some((State::Down, DiagnosticCode::NbrDown))
        }
        _ => None,
    };
    if let Some((state, diag)) = next_state {
        // Effectively transition to the new FSM state.
        sess.state_update(state, diag, &master.notifier, &master.tx);
    } else if sess.remote_state() != old_remote_state
        || packet.flags.contains(PacketFlags::D) != old_remote_demand
    {
        // The remote state or Demand mode changed without a local
        // transition; the Tx pacing may have to switch between the idle and
        // the negotiated interval, or stop entirely.
        sess.update_tx_interval(&master.tx);
    }

    // If the Poll (P) bit is set, send a BFD Control packet to the remote
    // system with the Poll (P) bit clear, and the Final (F) bit set.
    if packet.flags.contains(PacketFlags::P) {
        sess.send_tx_final(&master.tx);
    }

    Ok(())
}

pub fn process_detection_timer_expiry(
    master: &mut Master,
    sess_id: SessionId,
) -> Result<(), Error> {
    let (_, sess) = master.sessions.get_mut_by_id(sess_id)?;

    // The detection timer only has a meaning while the session is
    // establishing or established.
    if !matches!(sess.state.local_state, State::Init | State::Up) {
        return Ok(());
    }

    Debug::DetectionTimeExpiry(&sess.config.name).log();

    // Transition to the "Down" state.
    sess.state_update(
        State::Down,
        DiagnosticCode::TimeExpired,
        &master.notifier,
        &master.tx,
    );

    // Reset remote data since the peer is dead, and fall back to the idle Tx
    // pacing (a passive session goes quiet again).
    sess.state.remote = None;
    sess.state.detection_timer = None;
    sess.update_tx_interval(&master.tx);

    Ok(())
}

pub fn process_send_error(
    master: &mut Master,
    sess_id: SessionId,
) -> Result<(), Error> {
    let (_, sess) = master.sessions.get_mut_by_id(sess_id)?;

    // Multiple in-flight packets may fail before the first error report is
    // acted upon.
    if sess.state.send_error {
        return Ok(());
    }

    // Close the egress socket and schedule its reopening. The session state
    // is left alone: a local send failure says nothing about the liveness of
    // the remote peer.
    sess.state.send_error = true;
    sess.state.socket_tx = None;
    sess.state.tx_interval = None;
    sess.schedule_socket_reset(&master.tx);

    Ok(())
}

pub fn process_reset_timer_expiry(
    master: &mut Master,
    sess_id: SessionId,
) -> Result<(), Error> {
    let (_, sess) = master.sessions.get_mut_by_id(sess_id)?;

    Debug::SocketReset(&sess.config.name).log();

    sess.state.reset_timer = None;
    sess.update_socket_tx();
    match sess.state.socket_tx.is_some() {
        true => {
            sess.state.send_error = false;
            sess.update_tx_interval(&master.tx);
        }
        false => {
            // Socket creation failed again, retry later.
            sess.schedule_socket_reset(&master.tx);
        }
    }

    Ok(())
}

// Applies a new configuration, migrating the runtime state of every session
// whose name survived the reload.
pub fn process_reload(master: &mut Master, configs: Vec<SessionCfg>) {
    Debug::ConfigReload.log();

    let mut old_sessions = std::mem::take(&mut master.sessions);
    let mut new_sessions = Sessions::default();
    new_sessions.transfer_id_counter(&old_sessions);

    // Split the incoming configuration into surviving and brand new
    // sessions. Invalid entries are logged and skipped.
    let mut migrated = Vec::new();
    let mut fresh = Vec::new();
    for config in configs {
        if let Err(error) = config.validate() {
            warn!(%error, name = %config.name, "invalid session configuration - skipping");
            continue;
        }
        match old_sessions.take_by_name(&config.name) {
            Some(old) => migrated.push((config, old)),
            None => fresh.push(config),
        }
    }

    // Migrate surviving sessions first so that their discriminators stay
    // reserved before any new ones are drawn.
    for (config, old) in migrated {
        migrate_session(master, &mut new_sessions, config, old);
    }

    // Initialize brand new sessions.
    for config in fresh {
        let (_, sess) = match new_sessions.insert(config) {
            Ok(value) => value,
            Err(error) => {
                error.log();
                continue;
            }
        };
        sess.update_socket_tx();
        match sess.state.socket_tx.is_some() {
            true => sess.update_tx_interval(&master.tx),
            false => sess.schedule_socket_reset(&master.tx),
        }
    }

    // Sessions left in the outgoing store were removed from the
    // configuration; dropping them cancels their timers and closes their
    // sockets.
    drop(old_sessions);

    master.sessions = new_sessions;
    master.update_udp_rx_tasks();
}

fn migrate_session(
    master: &mut Master,
    new_sessions: &mut Sessions,
    config: SessionCfg,
    mut old: Session,
) {
    let timers_changed = old.config.min_tx_interval != config.min_tx_interval
        || old.config.min_rx_interval != config.min_rx_interval;
    let endpoint_changed = old.config.neighbor != config.neighbor
        || old.config.source != config.source
        || old.config.multihop != config.multihop;
    let admin_down = config.admin_down;

    Debug::SessionMigrate(&config.name).log();
    old.reconfigure(config);
    let (_, sess) = match new_sessions.adopt(old) {
        Ok(value) => value,
        Err(error) => {
            error.log();
            return;
        }
    };

    // A changed endpoint invalidates the egress socket.
    if endpoint_changed {
        sess.state.tx_interval = None;
        sess.state.socket_tx = None;
        sess.update_socket_tx();
        if sess.state.socket_tx.is_none() {
            sess.schedule_socket_reset(&master.tx);
            return;
        }
    }

    // Apply administrative state changes.
    if admin_down && sess.state.local_state != State::AdminDown {
        sess.state_update(
            State::AdminDown,
            DiagnosticCode::AdminDown,
            &master.notifier,
            &master.tx,
        );
        sess.state.remote = None;
        sess.state.detection_timer = None;
        sess.update_tx_interval(&master.tx);
        return;
    } else if !admin_down && sess.state.local_state == State::AdminDown {
        sess.state_update(
            State::Down,
            DiagnosticCode::Nothing,
            &master.notifier,
            &master.tx,
        );
        return;
    }

    if timers_changed {
        // The timing parameters changed, so commit them through a fresh Poll
        // Sequence.
        sess.poll_sequence_start();
        sess.update_tx_interval(&master.tx);
    } else if endpoint_changed {
        sess.update_tx_interval(&master.tx);
    }
}

pub fn process_dump(master: &Master, path: &Path) {
    Debug::DiagnosticsDump(path).log();

    if let Err(error) = dump::dump(master, path) {
        Error::IoError(IoError::DumpFileError(error)).log();
    }
}
