//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, atomic};

use chrono::{DateTime, Utc};
use derive_new::new;
use generational_arena::{Arena, Index};
use rand::RngCore;
use vigil_utils::Sender;
use vigil_utils::bfd::{DiagnosticCode, PathType, State};
use vigil_utils::ip::IpAddrExt;
use vigil_utils::socket::{TTL_MAX, UdpSocket};
use vigil_utils::task::{IntervalTask, TimeoutTask};

use crate::config::SessionCfg;
use crate::debug::Debug;
use crate::error::{Error, IoError};
use crate::master::MasterChannelsTx;
use crate::network;
use crate::notify::Notifier;
use crate::packet::{Packet, PacketFlags};
use crate::tasks;
use crate::tasks::messages::input::DetectTimerMsg;

// The slow Tx interval is used to conserve bandwidth when the session is not
// up (RFC 5880, Section 6.8.3: no faster than one packet per second).
const SLOW_TX_INTERVAL: u32 = 1_000_000;

pub type SessionId = usize;
pub type SessionIndex = Index;

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub config: SessionCfg,
    pub state: SessionState,
    pub statistics: SessionStatistics,
}

#[derive(Debug)]
pub struct SessionState {
    pub sockaddr: SocketAddr,
    pub socket_tx: Option<Arc<UdpSocket>>,
    pub curr_min_tx: u32,
    pub curr_min_rx: u32,
    pub local_state: State,
    pub local_discr: u32,
    pub local_diag: DiagnosticCode,
    pub local_demand: bool,
    pub send_error: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub remote: Option<SessionRemoteInfo>,
    pub poll_active: Arc<AtomicBool>,
    pub tx_interval: Option<IntervalTask>,
    pub detection_timer: Option<TimeoutTask>,
    pub reset_timer: Option<TimeoutTask>,
}

#[derive(Debug, new)]
pub struct SessionRemoteInfo {
    pub state: State,
    pub discr: u32,
    pub diag: u8,
    pub multiplier: u8,
    pub min_tx: u32,
    pub min_rx: u32,
    pub demand_mode: bool,
}

#[derive(Debug)]
pub struct SessionStatistics {
    pub create_time: DateTime<Utc>,
    pub last_state_change_time: Option<DateTime<Utc>>,
    pub last_down_time: Option<DateTime<Utc>>,
    pub last_up_time: Option<DateTime<Utc>>,
    pub down_count: u32,
    pub admin_down_count: u32,
    pub rx_packet_count: u64,
    pub rx_drop_count: u64,
    pub tx_packet_count: Arc<AtomicU64>,
    pub tx_error_count: Arc<AtomicU64>,
}

#[derive(Debug, Default)]
pub struct Sessions {
    // Session arena.
    arena: Arena<Session>,
    // Session hash table keyed by ID (1:1).
    id_tree: HashMap<SessionId, SessionIndex>,
    // Session binary tree keyed by name (1:1).
    name_tree: BTreeMap<String, SessionIndex>,
    // Session hash table keyed by local discriminator (1:1).
    discr_tree: HashMap<u32, SessionIndex>,
    // Next available ID.
    next_id: SessionId,
}

// ===== impl Session =====

impl Session {
    // Creates a new BFD session.
    fn new(id: SessionId, config: SessionCfg, local_discr: u32) -> Session {
        Debug::SessionCreate(&config.name).log();

        let (local_state, local_diag) = match config.admin_down {
            true => (State::AdminDown, DiagnosticCode::AdminDown),
            false => (State::Down, DiagnosticCode::Nothing),
        };
        let curr_min_tx =
            std::cmp::max(config.idle_tx_interval, SLOW_TX_INTERVAL);
        let state = SessionState {
            sockaddr: Self::sockaddr(&config),
            socket_tx: None,
            curr_min_tx,
            curr_min_rx: config.min_rx_interval,
            local_state,
            local_discr,
            local_diag,
            local_demand: false,
            send_error: false,
            last_seen: None,
            remote: None,
            poll_active: Arc::new(AtomicBool::new(false)),
            tx_interval: None,
            detection_timer: None,
            reset_timer: None,
        };

        Session {
            id,
            config,
            state,
            statistics: Default::default(),
        }
    }

    // Returns the destination socket address used to reach the neighbor.
    fn sockaddr(config: &SessionCfg) -> SocketAddr {
        let port = match config.multihop {
            true => network::PORT_DST_MULTIHOP,
            false => network::PORT_DST_SINGLE_HOP,
        };
        SocketAddr::new(config.neighbor, port)
    }

    pub fn path_type(&self) -> PathType {
        self.config.path_type()
    }

    // Replaces the session configuration during a reload.
    pub(crate) fn reconfigure(&mut self, config: SessionCfg) {
        self.config = config;
        self.state.sockaddr = Self::sockaddr(&self.config);
    }

    // Updates the FSM state of the BFD session.
    pub(crate) fn state_update(
        &mut self,
        state: State,
        diag: DiagnosticCode,
        notifier: &Notifier,
        tx: &MasterChannelsTx,
    ) {
        let old_state = self.state.local_state;
        self.state.local_state = state;
        self.state.local_diag = diag;

        Debug::FsmTransition(&self.config.name, old_state, state).log();

        // Notify consumer processes about the state transition.
        notifier.notify(&self.config, state, diag);

        // Update statistics.
        self.statistics.last_state_change_time = Some(Utc::now());
        match state {
            State::AdminDown => {
                self.statistics.admin_down_count += 1;
            }
            State::Down => {
                self.statistics.last_down_time = Some(Utc::now());
                self.statistics.down_count += 1;
            }
            State::Up => {
                self.statistics.last_up_time = Some(Utc::now());
            }
            _ => {}
        }

        if old_state == State::Up {
            // Activate slow Tx interval.
            self.state.curr_min_tx = self.desired_tx_interval();
        } else if state == State::Up {
            // Start Poll Sequence to deactivate slow Tx interval.
            self.poll_sequence_start();
        }

        // Synchronize the Tx task since the local state has changed.
        self.update_tx_interval(tx);
    }

    // Returns the effective idle Tx interval, clamped so that the session
    // never transmits faster than once per second while it is not up.
    pub fn idle_tx_interval(&self) -> u32 {
        std::cmp::max(self.config.idle_tx_interval, SLOW_TX_INTERVAL)
    }

    // Returns the Desired Min Tx Interval advertised to the remote peer.
    pub fn desired_tx_interval(&self) -> u32 {
        if self.state.local_state != State::Up {
            return self.idle_tx_interval();
        }

        self.config.min_tx_interval
    }

    // Returns the Required Min Rx Interval advertised to the remote peer.
    pub fn required_min_rx(&self) -> u32 {
        self.config.min_rx_interval
    }

    // Returns the last session state received from the remote peer.
    pub fn remote_state(&self) -> Option<State> {
        self.state.remote.as_ref().map(|remote| remote.state)
    }

    // Returns the last value of Required Min Rx Interval received from the
    // remote system in a BFD Control packet.
    pub fn remote_min_rx_interval(&self) -> u32 {
        // If we haven't heard from our peer yet, return the initial value (1
        // microsecond).
        self.state
            .remote
            .as_ref()
            .map(|remote| remote.min_rx)
            .unwrap_or(1)
    }

    // Returns the negotiated Tx interval for the session, or None when
    // periodic transmission has to be suppressed.
    pub fn negotiated_tx_interval(&self) -> Option<u32> {
        let remote_min_rx = self.remote_min_rx_interval();

        // A system MUST NOT periodically transmit BFD Control packets if
        // bfd.RemoteMinRxInterval is zero.
        if remote_min_rx == 0 {
            return None;
        }

        // Periodic transmission stops once the remote system is running in
        // Demand mode over an established session.
        if let Some(remote) = &self.state.remote
            && remote.demand_mode
            && self.state.local_state == State::Up
            && remote.state == State::Up
        {
            return None;
        }

        // The negotiated interval only applies once both systems are up; in
        // any other state the idle Tx interval sets the pace.
        let base = if self.state.local_state == State::Up
            && self.remote_state() == Some(State::Up)
        {
            self.state.curr_min_tx
        } else {
            self.idle_tx_interval()
        };

        Some(std::cmp::max(base, remote_min_rx))
    }

    // Returns the negotiated Rx interval for the session.
    pub fn negotiated_rx_interval(&self) -> Option<u32> {
        self.state
            .remote
            .as_ref()
            .map(|remote| std::cmp::max(self.state.curr_min_rx, remote.min_tx))
    }

    // Returns the negotiated detection time for the session.
    //
    // In Asynchronous mode, the Detection Time calculated in the local
    // system is equal to the value of Detect Mult received from the remote
    // system, multiplied by the agreed transmit interval of the remote
    // system (the greater of bfd.RequiredMinRxInterval and the last
    // received Desired Min Tx Interval).
    pub fn detection_time(&self) -> Option<u64> {
        self.state.remote.as_ref().map(|remote| {
            remote.multiplier as u64
                * self.negotiated_rx_interval().unwrap() as u64
        })
    }

    // Returns the estimated detection time in effect at the remote system.
    pub fn remote_detection_time(&self) -> Option<u64> {
        self.state.remote.as_ref().map(|remote| {
            remote.multiplier as u64
                * std::cmp::max(self.state.curr_min_tx, remote.min_rx) as u64
        })
    }

    // Generates BFD Control Packet according to the session's state and
    // configuration.
    pub fn generate_packet(&self) -> Packet {
        let mut flags = PacketFlags::empty();
        if self.state.local_demand {
            flags.insert(PacketFlags::D);
        }

        Packet {
            version: 1,
            diag: self.state.local_diag as u8,
            state: self.state.local_state,
            flags,
            detect_mult: self.config.detect_mult,
            my_discr: self.state.local_discr,
            your_discr: self
                .state
                .remote
                .as_ref()
                .map(|remote| remote.discr)
                .unwrap_or(0),
            desired_min_tx: self.desired_tx_interval(),
            req_min_rx: self.required_min_rx(),
            req_min_echo_rx: 0,
        }
    }

    // Creates or recreates the UDP socket used to send BFD packets.
    pub(crate) fn update_socket_tx(&mut self) {
        let af = self.config.neighbor.address_family();
        let src = self.config.source.unwrap_or(IpAddr::unspecified(af));
        let ttl = match self.path_type() {
            PathType::IpSingleHop => TTL_MAX,
            PathType::IpMultihop => self.config.tx_ttl,
        };
        match network::socket_tx(af, src, ttl) {
            Ok(socket) => {
                self.state.socket_tx = Some(Arc::new(socket));
            }
            Err(error) => {
                self.state.socket_tx = None;
                IoError::UdpSocketError(error).log();
            }
        }
    }

    // (Re)starts or stops the periodic transmission of BFD packets.
    pub(crate) fn update_tx_interval(&mut self, tx: &MasterChannelsTx) {
        // A passive session does not speak until it has been spoken to
        // (RFC 5881, Section 2).
        if let Some(socket_tx) = &self.state.socket_tx
            && !(self.config.passive && self.state.remote.is_none())
            && let Some(interval) = self.negotiated_tx_interval()
        {
            // (Re)start Tx interval.
            let task = tasks::udp_tx_interval(
                self,
                interval,
                socket_tx,
                &tx.send_error,
            );
            self.state.tx_interval = Some(task);
        } else {
            // Stop Tx interval.
            self.state.tx_interval = None;
        }
    }

    // Sends single BFD control packet with the F-bit set.
    pub(crate) fn send_tx_final(&self, tx: &MasterChannelsTx) {
        if let Some(socket_tx) = &self.state.socket_tx {
            tasks::udp_tx_final(self, socket_tx, &tx.send_error);
        }
    }

    // (Re)sets the detection time (timeout) for this session.
    pub(crate) fn update_detection_time(
        &mut self,
        detect_timerp: &Sender<DetectTimerMsg>,
    ) {
        let task = tasks::detection_timer(self, detect_timerp);
        self.state.detection_timer = Some(task);
    }

    // Schedules the reopening of the egress socket after a send error.
    pub(crate) fn schedule_socket_reset(&mut self, tx: &MasterChannelsTx) {
        let task = tasks::reset_timer(self.id, &tx.reset_timer);
        self.state.reset_timer = Some(task);
    }

    // Initiates a Poll Sequence.
    pub(crate) fn poll_sequence_start(&self) {
        // A Poll Sequence is only meaningful once the session has left the
        // Down state (RFC 5880, Section 6.8.3).
        if !matches!(self.state.local_state, State::Init | State::Up) {
            return;
        }
        if !self.state.poll_active.swap(true, atomic::Ordering::Relaxed) {
            Debug::PollSequenceStart(&self.config.name).log();
        }
    }

    // Terminates a Poll Sequence.
    pub(crate) fn poll_sequence_terminate(&self) {
        if self.state.poll_active.swap(false, atomic::Ordering::Relaxed) {
            Debug::PollSequenceTerminate(&self.config.name).log();
        }
    }

    // Checks whether a Poll Sequence is in progress.
    pub fn poll_sequence_is_active(&self) -> bool {
        self.state.poll_active.load(atomic::Ordering::Relaxed)
    }

    // Logs the session configuration at startup and on reload.
    pub(crate) fn log_config(&self) {
        tracing::info!(
            name = %self.config.name,
            neighbor = %self.config.neighbor,
            source = ?self.config.source,
            multihop = %self.config.multihop,
            min_rx = %self.config.min_rx_interval,
            min_tx = %self.config.min_tx_interval,
            detect_mult = %self.config.detect_mult,
            passive = %self.config.passive,
            "session configured"
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        Debug::SessionDelete(&self.config.name).log();
    }
}

// ===== impl SessionStatistics =====

impl Default for SessionStatistics {
    fn default() -> SessionStatistics {
        SessionStatistics {
            create_time: Utc::now(),
            last_state_change_time: None,
            last_down_time: None,
            last_up_time: None,
            down_count: 0,
            admin_down_count: 0,
            rx_packet_count: 0,
            rx_drop_count: 0,
            tx_packet_count: Arc::new(AtomicU64::new(0)),
            tx_error_count: Arc::new(AtomicU64::new(0)),
        }
    }
}

// ===== impl Sessions =====

impl Sessions {
    // Creates a new session from the given configuration and inserts it into
    // the store.
    pub(crate) fn insert(
        &mut self,
        config: SessionCfg,
    ) -> Result<(SessionIndex, &mut Session), Error> {
        if self.name_tree.contains_key(&config.name) {
            return Err(Error::SessionNameInUse(config.name));
        }

        let id = self.next_id();
        let local_discr = self.allocate_discr();
        let sess = Session::new(id, config, local_discr);
        Ok(self.link(sess))
    }

    // Inserts a session that migrated from another store, preserving its ID
    // and local discriminator.
    pub(crate) fn adopt(
        &mut self,
        sess: Session,
    ) -> Result<(SessionIndex, &mut Session), Error> {
        if self.name_tree.contains_key(&sess.config.name) {
            return Err(Error::SessionNameInUse(sess.config.name.clone()));
        }
        if self.discr_tree.contains_key(&sess.state.local_discr) {
            return Err(Error::SessionDiscrInUse(sess.state.local_discr));
        }

        Ok(self.link(sess))
    }

    // Links the session to the store's lookup collections.
    fn link(&mut self, sess: Session) -> (SessionIndex, &mut Session) {
        let sess_idx = self.arena.insert(sess);
        let sess = &mut self.arena[sess_idx];
        self.id_tree.insert(sess.id, sess_idx);
        self.name_tree.insert(sess.config.name.clone(), sess_idx);
        self.discr_tree.insert(sess.state.local_discr, sess_idx);
        (sess_idx, sess)
    }

    // Removes the session with the given name from the store, returning it.
    //
    // The session's timers keep running while the returned value is alive;
    // dropping it cancels them and closes the egress socket.
    pub(crate) fn take_by_name(&mut self, name: &str) -> Option<Session> {
        let sess_idx = self.name_tree.remove(name)?;
        let sess = self.arena.remove(sess_idx).unwrap();
        self.id_tree.remove(&sess.id);
        self.discr_tree.remove(&sess.state.local_discr);
        Some(sess)
    }

    // Returns a reference to the session corresponding to the given name.
    pub fn get_by_name(&self, name: &str) -> Option<(SessionIndex, &Session)> {
        self.name_tree
            .get(name)
            .copied()
            .map(|sess_idx| (sess_idx, &self.arena[sess_idx]))
    }

    // Returns a mutable reference to the session corresponding to the given
    // name.
    pub fn get_mut_by_name(
        &mut self,
        name: &str,
    ) -> Option<(SessionIndex, &mut Session)> {
        self.name_tree
            .get(name)
            .copied()
            .map(move |sess_idx| (sess_idx, &mut self.arena[sess_idx]))
    }

    // Returns a mutable reference to the session corresponding to the given
    // ID.
    pub fn get_mut_by_id(
        &mut self,
        id: SessionId,
    ) -> Result<(SessionIndex, &mut Session), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |sess_idx| (sess_idx, &mut self.arena[sess_idx]))
            .ok_or(Error::SessionIdNotFound(id))
    }

    // Returns a reference to the session corresponding to the given local
    // discriminator.
    pub fn get_by_discr(&self, discr: u32) -> Option<(SessionIndex, &Session)> {
        self.discr_tree
            .get(&discr)
            .copied()
            .map(|sess_idx| (sess_idx, &self.arena[sess_idx]))
    }

    // Returns a mutable reference to the session corresponding to the given
    // local discriminator.
    pub fn get_mut_by_discr(
        &mut self,
        discr: u32,
    ) -> Option<(SessionIndex, &mut Session)> {
        self.discr_tree
            .get(&discr)
            .copied()
            .map(move |sess_idx| (sess_idx, &mut self.arena[sess_idx]))
    }

    // Returns a mutable reference to the first session matching the given
    // endpoint.
    //
    // A session configured without a source address matches any local
    // address. Iteration follows the name ordering, so the result is stable
    // within a reload.
    pub fn get_mut_by_endpoint(
        &mut self,
        nbr: &IpAddr,
        local: Option<&IpAddr>,
        multihop: bool,
    ) -> Option<(SessionIndex, &mut Session)> {
        let sess_idx = self.name_tree.values().copied().find(|sess_idx| {
            let sess = &self.arena[*sess_idx];
            if sess.config.neighbor != *nbr {
                return false;
            }
            if sess.config.multihop != multihop {
                return false;
            }
            match (&sess.config.source, local) {
                (Some(source), Some(local)) => source == local,
                _ => true,
            }
        })?;
        Some((sess_idx, &mut self.arena[sess_idx]))
    }

    // Returns an iterator visiting all sessions.
    //
    // Sessions are ordered by their names.
    pub fn iter(&self) -> impl Iterator<Item = &'_ Session> + '_ {
        self.name_tree
            .values()
            .map(|sess_idx| &self.arena[*sess_idx])
    }

    // Carries the session ID counter over from the outgoing store so that
    // migrated sessions can't clash with newly inserted ones.
    pub(crate) fn transfer_id_counter(&mut self, other: &Sessions) {
        self.next_id = other.next_id;
    }

    // Get next session ID.
    fn next_id(&mut self) -> SessionId {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }

    // Draws a new local discriminator, retrying until the value is non-zero
    // and unused.
    fn allocate_discr(&self) -> u32 {
        Self::allocate_discr_from(&mut rand::rng(), &self.discr_tree)
    }

    fn allocate_discr_from(
        rng: &mut impl RngCore,
        in_use: &HashMap<u32, SessionIndex>,
    ) -> u32 {
        loop {
            let discr = rng.next_u32();
            if discr != 0 && !in_use.contains_key(&discr) {
                return discr;
            }
        }
    }
}

impl std::ops::Index<SessionIndex> for Sessions {
    type Output = Session;

    fn index(&self, index: SessionIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl std::ops::IndexMut<SessionIndex> for Sessions {
    fn index_mut(&mut self, index: SessionIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use super::*;

    // Deterministic discriminator source for the allocator tests.
    struct SeqRng {
        values: Vec<u32>,
        pos: usize,
    }

    impl RngCore for SeqRng {
        fn next_u32(&mut self) -> u32 {
            let value = self.values[self.pos];
            self.pos += 1;
            value
        }

        fn next_u64(&mut self) -> u64 {
            self.next_u32() as u64
        }

        fn fill_bytes(&mut self, dst: &mut [u8]) {
            dst.fill(0);
        }
    }

    fn test_cfg(name: &str) -> SessionCfg {
        SessionCfg {
            name: name.to_owned(),
            neighbor: "192.0.2.1".parse().unwrap(),
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
            notify_vrrp: false,
            notify_checker: false,
        }
    }

    #[test]
    fn discr_allocation_skips_collisions() {
        let mut sessions = Sessions::default();
        let (sess_idx, _) = sessions.insert(test_cfg("peer1")).unwrap();
        let in_use_discr = sessions[sess_idx].state.local_discr;

        // The generator first yields zero, then a colliding value, then a
        // usable one.
        let mut rng = SeqRng {
            values: vec![0, in_use_discr, in_use_discr, 0xcafe],
            pos: 0,
        };
        let discr =
            Sessions::allocate_discr_from(&mut rng, &sessions.discr_tree);
        assert_eq!(discr, 0xcafe);
    }

    #[test]
    fn insert_rejects_duplicate_names() {
        let mut sessions = Sessions::default();
        sessions.insert(test_cfg("peer1")).unwrap();
        assert!(matches!(
            sessions.insert(test_cfg("peer1")),
            Err(Error::SessionNameInUse(_))
        ));
    }

    #[test]
    fn endpoint_lookup_honors_source_and_path_type() {
        let mut sessions = Sessions::default();
        let mut cfg = test_cfg("peer1");
        cfg.source = Some("192.0.2.100".parse().unwrap());
        sessions.insert(cfg).unwrap();

        let nbr: IpAddr = "192.0.2.1".parse().unwrap();
        let local: IpAddr = "192.0.2.100".parse().unwrap();
        let other: IpAddr = "192.0.2.200".parse().unwrap();

        assert!(
            sessions
                .get_mut_by_endpoint(&nbr, Some(&local), false)
                .is_some()
        );
        assert!(
            sessions
                .get_mut_by_endpoint(&nbr, Some(&other), false)
                .is_none()
        );
        // Path type must match.
        assert!(
            sessions
                .get_mut_by_endpoint(&nbr, Some(&local), true)
                .is_none()
        );

        // A session without a configured source matches any local address.
        let mut sessions = Sessions::default();
        sessions.insert(test_cfg("peer2")).unwrap();
        assert!(
            sessions
                .get_mut_by_endpoint(&nbr, Some(&other), false)
                .is_some()
        );
    }

    #[test]
    fn detection_time_follows_remote_timers() {
        let mut sessions = Sessions::default();
        let (_, sess) = sessions.insert(test_cfg("peer1")).unwrap();

        assert_eq!(sess.detection_time(), None);

        sess.state.remote = Some(SessionRemoteInfo::new(
            State::Up, 0x1111, 0, 5, 400_000, 300_000, false,
        ));
        // 5 * max(300000, 400000)
        assert_eq!(sess.detection_time(), Some(2_000_000));
    }

    #[test]
    fn idle_interval_is_clamped_to_one_second() {
        let mut cfg = test_cfg("peer1");
        cfg.idle_tx_interval = 100_000;
        let mut sessions = Sessions::default();
        let (_, sess) = sessions.insert(cfg).unwrap();
        assert_eq!(sess.idle_tx_interval(), 1_000_000);

        // While the session is not up, the advertised Desired Min Tx uses the
        // idle interval.
        assert_eq!(sess.desired_tx_interval(), 1_000_000);

        // The pacing never exceeds one packet per second while not up.
        assert_eq!(sess.negotiated_tx_interval(), Some(1_000_000));
    }
}
