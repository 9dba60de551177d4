//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use vigil_bfd::config::SessionCfg;
use vigil_bfd::error::Error;
use vigil_bfd::events;
use vigil_bfd::master::Master;
use vigil_bfd::network::PacketInfo;
use vigil_bfd::notify::ConsumerKind;
use vigil_bfd::packet::{Packet, PacketFlags};
use vigil_utils::bfd::{DiagnosticCode, PathType, State};

//
// Helper functions.
//

fn session_cfg(name: &str, neighbor: &str) -> SessionCfg {
    SessionCfg {
        name: name.to_owned(),
        neighbor: neighbor.parse().unwrap(),
        source: None,
        multihop: false,
        min_rx_interval: 300_000,
        min_tx_interval: 300_000,
        idle_tx_interval: 1_000_000,
        detect_mult: 3,
        tx_ttl: 255,
        max_hops: 0,
        passive: false,
        admin_down: false,
        notify_vrrp: true,
        notify_checker: false,
    }
}

fn sh_info(src: &str, ttl: u8) -> PacketInfo {
    PacketInfo {
        path_type: PathType::IpSingleHop,
        src: src.parse().unwrap(),
        dst: "192.0.2.10".parse().unwrap(),
        ttl,
    }
}

fn mh_info(src: &str, ttl: u8) -> PacketInfo {
    PacketInfo {
        path_type: PathType::IpMultihop,
        src: src.parse().unwrap(),
        dst: "192.0.2.10".parse().unwrap(),
        ttl,
    }
}

fn control_packet(
    state: State,
    my_discr: u32,
    your_discr: u32,
    flags: PacketFlags,
) -> Packet {
    Packet {
        version: 1,
        diag: 0,
        state,
        flags,
        detect_mult: 3,
        my_discr,
        your_discr,
        desired_min_tx: 300_000,
        req_min_rx: 300_000,
        req_min_echo_rx: 0,
    }
}

fn local_discr(master: &Master, name: &str) -> u32 {
    master
        .sessions
        .get_by_name(name)
        .unwrap()
        .1
        .state
        .local_discr
}

fn local_state(master: &Master, name: &str) -> State {
    master
        .sessions
        .get_by_name(name)
        .unwrap()
        .1
        .state
        .local_state
}

// Drives the session from Down to Up with two packets from the remote peer,
// then acknowledges the initial Poll Sequence. Returns the session's local
// discriminator.
fn establish(master: &mut Master, name: &str, neighbor: &str) -> u32 {
    let discr = local_discr(master, name);

    events::process_udp_packet(
        master,
        sh_info(neighbor, 255),
        control_packet(State::Down, 0x1111, 0, PacketFlags::empty()),
    )
    .unwrap();
    assert_eq!(local_state(master, name), State::Init);

    events::process_udp_packet(
        master,
        sh_info(neighbor, 255),
        control_packet(State::Init, 0x1111, discr, PacketFlags::empty()),
    )
    .unwrap();
    assert_eq!(local_state(master, name), State::Up);

    // Acknowledge the Poll Sequence started upon entering the Up state.
    events::process_udp_packet(
        master,
        sh_info(neighbor, 255),
        control_packet(State::Up, 0x1111, discr, PacketFlags::F),
    )
    .unwrap();

    discr
}

//
// Tests.
//

#[tokio::test]
async fn cold_bring_up() {
    let (mut master, _rx) = Master::new();
    let mut events_rx = master.notifier.register(ConsumerKind::Vrrp);
    master.startup(vec![session_cfg("peer1", "192.0.2.1")]);

    let discr = local_discr(&master, "peer1");
    assert_eq!(local_state(&master, "peer1"), State::Down);

    // Remote speaks first: Down -> Init.
    events::process_udp_packet(
        &mut master,
        sh_info("192.0.2.1", 255),
        control_packet(State::Down, 0x1111, 0, PacketFlags::empty()),
    )
    .unwrap();
    assert_eq!(local_state(&master, "peer1"), State::Init);

    // Remote confirms: Init -> Up.
    events::process_udp_packet(
        &mut master,
        sh_info("192.0.2.1", 255),
        control_packet(State::Init, 0x1111, discr, PacketFlags::empty()),
    )
    .unwrap();
    assert_eq!(local_state(&master, "peer1"), State::Up);

    let (_, sess) = master.sessions.get_by_name("peer1").unwrap();
    assert_eq!(sess.statistics.rx_packet_count, 2);
    assert_eq!(sess.remote_state(), Some(State::Init));
    assert_eq!(sess.state.remote.as_ref().unwrap().discr, 0x1111);
    assert!(sess.state.detection_timer.is_some());

    // Both transitions were delivered, in order.
    let event = events_rx.try_recv().unwrap();
    assert_eq!(event.session, "peer1");
    assert_eq!(event.state, State::Init);
    let event = events_rx.try_recv().unwrap();
    assert_eq!(event.state, State::Up);
    assert!(events_rx.try_recv().is_err());
}

#[tokio::test]
async fn neighbor_signals_down() {
    let (mut master, _rx) = Master::new();
    master.startup(vec![session_cfg("peer1", "192.0.2.1")]);
    let discr = establish(&mut master, "peer1", "192.0.2.1");

    events::process_udp_packet(
        &mut master,
        sh_info("192.0.2.1", 255),
        control_packet(State::Down, 0x1111, discr, PacketFlags::empty()),
    )
    .unwrap();

    let (_, sess) = master.sessions.get_by_name("peer1").unwrap();
    assert_eq!(sess.state.local_state, State::Down);
    assert_eq!(sess.state.local_diag, DiagnosticCode::NbrDown);
    assert_eq!(sess.statistics.down_count, 1);
}

#[tokio::test]
async fn neighbor_admin_down() {
    let (mut master, _rx) = Master::new();
    master.startup(vec![session_cfg("peer1", "192.0.2.1")]);
    let discr = establish(&mut master, "peer1", "192.0.2.1");

    events::process_udp_packet(
        &mut master,
        sh_info("192.0.2.1", 255),
        control_packet(State::AdminDown, 0x1111, discr, PacketFlags::empty()),
    )
    .unwrap();

    let (_, sess) = master.sessions.get_by_name("peer1").unwrap();
    assert_eq!(sess.state.local_state, State::Down);
    assert_eq!(sess.state.local_diag, DiagnosticCode::NbrDown);
}

#[tokio::test]
async fn admin_down_ignores_input() {
    let mut cfg = session_cfg("peer1", "192.0.2.1");
    cfg.admin_down = true;
    let (mut master, _rx) = Master::new();
    master.startup(vec![cfg]);

    assert_eq!(local_state(&master, "peer1"), State::AdminDown);

    events::process_udp_packet(
        &mut master,
        sh_info("192.0.2.1", 255),
        control_packet(State::Down, 0x1111, 0, PacketFlags::empty()),
    )
    .unwrap();

    let (_, sess) = master.sessions.get_by_name("peer1").unwrap();
    assert_eq!(sess.state.local_state, State::AdminDown);
    assert_eq!(sess.state.local_diag, DiagnosticCode::AdminDown);
    assert!(sess.state.remote.is_none());
    assert_eq!(sess.statistics.rx_packet_count, 1);
}

#[tokio::test]
async fn passive_suppresses_tx() {
    let mut cfg = session_cfg("peer1", "192.0.2.1");
    cfg.passive = true;
    let (mut master, _rx) = Master::new();
    master.startup(vec![cfg]);

    // A passive session that never heard its peer schedules no transmission.
    let (_, sess) = master.sessions.get_by_name("peer1").unwrap();
    assert!(sess.state.tx_interval.is_none());

    // The first received packet unlocks transmission.
    events::process_udp_packet(
        &mut master,
        sh_info("192.0.2.1", 255),
        control_packet(State::Down, 0x1111, 0, PacketFlags::empty()),
    )
    .unwrap();
    let (_, sess) = master.sessions.get_by_name("peer1").unwrap();
    assert!(sess.state.tx_interval.is_some());
}

#[tokio::test]
async fn gtsm_drops_packet() {
    let (mut master, _rx) = Master::new();
    master.startup(vec![session_cfg("peer1", "192.0.2.1")]);

    let result = events::process_udp_packet(
        &mut master,
        sh_info("192.0.2.1", 254),
        control_packet(State::Down, 0x1111, 0, PacketFlags::empty()),
    );
    assert!(matches!(result, Err(Error::GtsmCheckFailed(..))));

    // The packet was counted as a drop and caused no state change.
    let (_, sess) = master.sessions.get_by_name("peer1").unwrap();
    assert_eq!(sess.state.local_state, State::Down);
    assert!(sess.state.remote.is_none());
    assert_eq!(sess.statistics.rx_drop_count, 1);
}

#[tokio::test]
async fn multihop_hop_count_limit() {
    let mut cfg = session_cfg("peer1", "203.0.113.1");
    cfg.multihop = true;
    cfg.max_hops = 2;
    let (mut master, _rx) = Master::new();
    master.startup(vec![cfg]);

    // Two hops away: accepted.
    events::process_udp_packet(
        &mut master,
        mh_info("203.0.113.1", 253),
        control_packet(State::Down, 0x1111, 0, PacketFlags::empty()),
    )
    .unwrap();
    assert_eq!(local_state(&master, "peer1"), State::Init);

    // Three hops away: dropped.
    let result = events::process_udp_packet(
        &mut master,
        mh_info("203.0.113.1", 252),
        control_packet(State::Down, 0x1111, 0, PacketFlags::empty()),
    );
    assert!(matches!(result, Err(Error::HopCountExceeded(..))));
    let (_, sess) = master.sessions.get_by_name("peer1").unwrap();
    assert_eq!(sess.statistics.rx_drop_count, 1);
}

#[tokio::test]
async fn unknown_endpoint_is_discarded() {
    let (mut master, _rx) = Master::new();
    master.startup(vec![session_cfg("peer1", "192.0.2.1")]);

    let result = events::process_udp_packet(
        &mut master,
        sh_info("198.51.100.99", 255),
        control_packet(State::Down, 0x1111, 0, PacketFlags::empty()),
    );
    assert!(matches!(result, Err(Error::SessionNoMatch(..))));
}

#[tokio::test]
async fn demux_by_discriminator() {
    let (mut master, _rx) = Master::new();
    master.startup(vec![
        session_cfg("peer1", "192.0.2.1"),
        session_cfg("peer2", "192.0.2.2"),
    ]);
    let discr2 = local_discr(&master, "peer2");

    // A non-zero Your Discriminator selects the session regardless of the
    // source address.
    events::process_udp_packet(
        &mut master,
        sh_info("198.51.100.99", 255),
        control_packet(State::Down, 0x2222, discr2, PacketFlags::empty()),
    )
    .unwrap();

    assert_eq!(local_state(&master, "peer1"), State::Down);
    assert_eq!(local_state(&master, "peer2"), State::Init);
}

#[tokio::test]
async fn poll_sequence_commits_timer_change() {
    let (mut master, _rx) = Master::new();
    master.startup(vec![session_cfg("peer1", "192.0.2.1")]);
    let discr = establish(&mut master, "peer1", "192.0.2.1");

    // The initial Poll Sequence was acknowledged during bring-up.
    let (_, sess) = master.sessions.get_by_name("peer1").unwrap();
    assert!(!sess.poll_sequence_is_active());
    assert_eq!(sess.state.curr_min_tx, 300_000);

    // Reload with a slower desired Tx interval: a new Poll Sequence starts
    // and the change is not committed yet.
    let mut cfg = session_cfg("peer1", "192.0.2.1");
    cfg.min_tx_interval = 1_000_000;
    events::process_reload(&mut master, vec![cfg]);

    let (_, sess) = master.sessions.get_by_name("peer1").unwrap();
    assert_eq!(sess.state.local_state, State::Up);
    assert!(sess.poll_sequence_is_active());
    assert_eq!(sess.state.curr_min_tx, 300_000);

    // The remote acknowledges with the F-bit: the new interval kicks in.
    events::process_udp_packet(
        &mut master,
        sh_info("192.0.2.1", 255),
        control_packet(State::Up, 0x1111, discr, PacketFlags::F),
    )
    .unwrap();

    let (_, sess) = master.sessions.get_by_name("peer1").unwrap();
    assert!(!sess.poll_sequence_is_active());
    assert_eq!(sess.state.curr_min_tx, 1_000_000);
    assert_eq!(sess.negotiated_tx_interval(), Some(1_000_000));
}

#[tokio::test]
async fn reload_preserves_state() {
    let (mut master, _rx) = Master::new();
    master.startup(vec![
        session_cfg("peer1", "192.0.2.1"),
        session_cfg("peer2", "192.0.2.2"),
    ]);
    let discr1 = establish(&mut master, "peer1", "192.0.2.1");
    let discr2 = establish(&mut master, "peer2", "192.0.2.2");

    // Reload with an identical configuration plus one new session.
    events::process_reload(
        &mut master,
        vec![
            session_cfg("peer1", "192.0.2.1"),
            session_cfg("peer2", "192.0.2.2"),
            session_cfg("peer3", "192.0.2.3"),
        ],
    );

    // The surviving sessions kept their state, discriminators and Poll flag.
    for (name, discr) in [("peer1", discr1), ("peer2", discr2)] {
        let (_, sess) = master.sessions.get_by_name(name).unwrap();
        assert_eq!(sess.state.local_state, State::Up);
        assert_eq!(sess.state.local_discr, discr);
        assert!(!sess.poll_sequence_is_active());
        assert!(sess.state.remote.is_some());
        assert!(sess.state.tx_interval.is_some());
    }

    // The new session starts from scratch.
    let (_, sess) = master.sessions.get_by_name("peer3").unwrap();
    assert_eq!(sess.state.local_state, State::Down);
    assert!(sess.state.remote.is_none());

    // A session removed by a reload is torn down.
    events::process_reload(
        &mut master,
        vec![session_cfg("peer1", "192.0.2.1")],
    );
    assert!(master.sessions.get_by_name("peer2").is_none());
    assert!(master.sessions.get_by_name("peer3").is_none());
    assert!(master.sessions.get_by_name("peer1").is_some());
}

#[tokio::test]
async fn detection_time_expiry() {
    let (mut master, _rx) = Master::new();
    master.startup(vec![session_cfg("peer1", "192.0.2.1")]);
    establish(&mut master, "peer1", "192.0.2.1");

    let sess_id = master.sessions.get_by_name("peer1").unwrap().1.id;
    events::process_detection_timer_expiry(&mut master, sess_id).unwrap();

    let (_, sess) = master.sessions.get_by_name("peer1").unwrap();
    assert_eq!(sess.state.local_state, State::Down);
    assert_eq!(sess.state.local_diag, DiagnosticCode::TimeExpired);
    assert!(sess.state.remote.is_none());
    assert_eq!(sess.statistics.down_count, 1);

    // A stale expiry while the session is already down is a no-op.
    events::process_detection_timer_expiry(&mut master, sess_id).unwrap();
    let (_, sess) = master.sessions.get_by_name("peer1").unwrap();
    assert_eq!(sess.statistics.down_count, 1);
}

#[tokio::test]
async fn remote_min_rx_raises_tx_interval() {
    let (mut master, _rx) = Master::new();
    master.startup(vec![session_cfg("peer1", "192.0.2.1")]);
    let discr = establish(&mut master, "peer1", "192.0.2.1");

    let mut packet =
        control_packet(State::Up, 0x1111, discr, PacketFlags::empty());
    packet.req_min_rx = 500_000;
    events::process_udp_packet(
        &mut master,
        sh_info("192.0.2.1", 255),
        packet,
    )
    .unwrap();

    let (_, sess) = master.sessions.get_by_name("peer1").unwrap();
    assert_eq!(sess.negotiated_tx_interval(), Some(500_000));
}

#[tokio::test]
async fn remote_demand_stops_periodic_tx() {
    let (mut master, _rx) = Master::new();
    master.startup(vec![session_cfg("peer1", "192.0.2.1")]);
    let discr = establish(&mut master, "peer1", "192.0.2.1");

    events::process_udp_packet(
        &mut master,
        sh_info("192.0.2.1", 255),
        control_packet(State::Up, 0x1111, discr, PacketFlags::D),
    )
    .unwrap();

    let (_, sess) = master.sessions.get_by_name("peer1").unwrap();
    assert_eq!(sess.state.local_state, State::Up);
    assert!(sess.state.tx_interval.is_none());
}
