//! Connections: single-path TCP, MPTCP masters, and MPTCP subflows.
//!
//! Grounded on `connection.py` (shared `Connection` base: state, bandwidth
//! cache, notify hooks), `tcpConnection.py` (the slow-start/congestion
//! avoidance state machine), and `mptcpConnection.py` (`MptcpConnection` +
//! `MptcpSubflow`).
//!
//! The original models this as a small class hierarchy (`Connection` <-
//! `TcpConnection` <- `MptcpConnection`, plus `MptcpSubflow(TcpConnection)`)
//! where a subflow holds a live reference to its master and calls back into
//! it, and a master holds live references to its subflows. Here everything
//! is one [`Connection`] type tagged by [`ConnKind`], addressed by id from
//! [`crate::transfer_manager::TransferManager`]'s arena: a subflow names its
//! master's [`ConnId`] instead of holding a reference to it. This collapses
//! the three-level class hierarchy into data, and turns the virtual-dispatch
//! callbacks (`_notifyIdle`, `master.onSubflowHandshakeDone`, `master.updateAvailableBw`,
//! ...) into explicit orchestration living in the transfer manager, which is
//! the only thing that ever has both a connection and its peers in scope at
//! once. See `DESIGN.md`.

use std::time::Duration;

use log::warn;

use crate::event::EventKind;
use crate::ids::{ConnId, InterfaceId, TransferId};
use crate::storage::PredictionFork;
use crate::time::{bytes_for_duration, duration_for_bytes, SimTime};

pub use crate::event::PRun;

pub const MSS: i64 = 1460;
pub const BW_TRANSFER_BYTES_ERROR_WARNING_THRESHOLD: i64 = 8;
pub const EVENT_TRANSFER_BYTES_ERROR_WARNING_THRESHOLD: i64 = 16;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ConnState {
    Idle,
    Busy,
    Closed,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SsState {
    New,
    Ss,
    Ca,
}

/// The kind-specific, run-invariant bits of identity: which interface(s) a
/// connection rides on, and (for a subflow) whose master it belongs to.
#[derive(Clone, Debug)]
pub enum ConnKind {
    Tcp {
        interface: InterfaceId,
        rtt: Duration,
    },
    MptcpMaster {
        interfaces: Vec<InterfaceId>,
        rtt0: Duration,
    },
    MptcpSubflow {
        master: ConnId,
        interface: InterfaceId,
        rtt: Duration,
    },
}

enum RttTag {
    Tcp(Duration),
    MptcpMaster(Duration),
    MptcpSubflow(Duration),
}

#[derive(Clone, Debug)]
struct ConnectionStorage {
    transfers: Vec<TransferId>,
    outstanding_bytes_sum: i64,
    transferred_bytes_sum: i64,
    state: ConnState,
    ss_state: SsState,
    cwnd: i64,
    available_bw: i64,
    desired_bw: i64,
    pending_event: Option<u64>,
    idle_timestamp: Option<SimTime>,
    curr_transfer_finish_time: Option<SimTime>,
    last_bw_update: SimTime,
    last_bw_update_transferred_bytes_sum: i64,
    subflows: Vec<ConnId>,
}

impl ConnectionStorage {
    fn new() -> Self {
        Self {
            transfers: Vec::new(),
            outstanding_bytes_sum: 0,
            transferred_bytes_sum: 0,
            state: ConnState::Idle,
            ss_state: SsState::New,
            cwnd: 10 * MSS,
            available_bw: 0,
            desired_bw: 0,
            pending_event: None,
            idle_timestamp: None,
            curr_transfer_finish_time: None,
            last_bw_update: SimTime::ZERO,
            last_bw_update_transferred_bytes_sum: 0,
            subflows: Vec::new(),
        }
    }
}

/// What a connection wants to do with its single outstanding event slot.
/// Mirrors `_checkReplaceEvent`/`_scheduleNextEvent`, minus the actual
/// queue manipulation (the transfer manager owns the [`crate::simulator::Simulator`]).
pub enum NextEvent {
    None,
    At(SimTime, EventKind),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Admission {
    Started,
    Enqueued,
}

fn div_trunc(amount: i64, rtt: Duration) -> i64 {
    (amount as f64 / rtt.as_secs_f64()) as i64
}

fn bw_times_rtt(bw: i64, rtt: Duration) -> i64 {
    (bw as f64 * rtt.as_secs_f64()) as i64
}

pub struct Connection {
    id: ConnId,
    kind: ConnKind,
    idle_timeout: Duration,
    ssl: bool,
    origin: String,
    handshake_delay: Duration,
    storage: PredictionFork<ConnectionStorage>,
}

impl Connection {
    pub fn new_tcp(
        id: ConnId,
        interface: InterfaceId,
        rtt: Duration,
        idle_timeout: Duration,
        ssl: bool,
        origin: impl Into<String>,
    ) -> Self {
        let handshake_delay = rtt * if ssl { 4u32 } else { 2u32 };
        Self {
            id,
            kind: ConnKind::Tcp { interface, rtt },
            idle_timeout,
            ssl,
            origin: origin.into(),
            handshake_delay,
            storage: PredictionFork::new(ConnectionStorage::new()),
        }
    }

    pub fn new_mptcp_master(
        id: ConnId,
        interfaces: Vec<InterfaceId>,
        rtt0: Duration,
        idle_timeout: Duration,
        ssl: bool,
        origin: impl Into<String>,
    ) -> Self {
        assert!(!interfaces.is_empty(), "mptcp connection needs at least one interface");
        let handshake_delay = rtt0 * if ssl { 4u32 } else { 2u32 };
        Self {
            id,
            kind: ConnKind::MptcpMaster { interfaces, rtt0 },
            idle_timeout,
            ssl,
            origin: origin.into(),
            handshake_delay,
            storage: PredictionFork::new(ConnectionStorage::new()),
        }
    }

    /// `handshake_delay` is precomputed by the caller: `rtt*2` for every
    /// subflow except possibly the first, which additionally pays the SSL
    /// handshake cost the master already accounted for once.
    pub fn new_mptcp_subflow(
        id: ConnId,
        master: ConnId,
        interface: InterfaceId,
        rtt: Duration,
        handshake_delay: Duration,
        idle_timeout: Duration,
        ssl: bool,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            id,
            kind: ConnKind::MptcpSubflow { master, interface, rtt },
            idle_timeout,
            ssl,
            origin: origin.into(),
            handshake_delay,
            storage: PredictionFork::new(ConnectionStorage::new()),
        }
    }

    fn rtt_tag(&self) -> RttTag {
        match &self.kind {
            ConnKind::Tcp { rtt, .. } => RttTag::Tcp(*rtt),
            ConnKind::MptcpMaster { rtt0, .. } => RttTag::MptcpMaster(*rtt0),
            ConnKind::MptcpSubflow { rtt, .. } => RttTag::MptcpSubflow(*rtt),
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }
    pub fn kind(&self) -> &ConnKind {
        &self.kind
    }
    pub fn ssl(&self) -> bool {
        self.ssl
    }
    pub fn origin(&self) -> &str {
        &self.origin
    }
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
    pub fn handshake_delay(&self) -> Duration {
        self.handshake_delay
    }
    pub fn is_subflow(&self) -> bool {
        matches!(self.kind, ConnKind::MptcpSubflow { .. })
    }
    pub fn master(&self) -> Option<ConnId> {
        match self.kind {
            ConnKind::MptcpSubflow { master, .. } => Some(master),
            _ => None,
        }
    }
    pub fn interface(&self) -> InterfaceId {
        match &self.kind {
            ConnKind::Tcp { interface, .. } | ConnKind::MptcpSubflow { interface, .. } => *interface,
            ConnKind::MptcpMaster { interfaces, .. } => interfaces[0],
        }
    }
    pub fn interfaces(&self) -> Vec<InterfaceId> {
        match &self.kind {
            ConnKind::Tcp { interface, .. } | ConnKind::MptcpSubflow { interface, .. } => vec![*interface],
            ConnKind::MptcpMaster { interfaces, .. } => interfaces.clone(),
        }
    }

    pub fn is_idle(&self, prun: PRun) -> bool {
        self.storage.get(prun).state == ConnState::Idle
    }
    pub fn is_busy(&self, prun: PRun) -> bool {
        self.storage.get(prun).state == ConnState::Busy
    }
    pub fn is_closed(&self, prun: PRun) -> bool {
        self.storage.get(prun).state == ConnState::Closed
    }
    pub fn idle_timestamp(&self, prun: PRun) -> Option<SimTime> {
        self.storage.get(prun).idle_timestamp
    }
    pub fn desired_bw(&self, prun: PRun) -> i64 {
        self.storage.get(prun).desired_bw
    }
    pub fn available_bw(&self, prun: PRun) -> i64 {
        self.storage.get(prun).available_bw
    }
    pub fn transfers(&self, prun: PRun) -> &[TransferId] {
        &self.storage.get(prun).transfers
    }
    pub fn front_transfer(&self, prun: PRun) -> Option<TransferId> {
        self.storage.get(prun).transfers.first().copied()
    }
    pub fn transferred_bytes_sum(&self, prun: PRun) -> i64 {
        self.storage.get(prun).transferred_bytes_sum
    }
    pub fn pending_event(&self, prun: PRun) -> Option<u64> {
        self.storage.get(prun).pending_event
    }
    pub fn set_pending_event(&mut self, seq: Option<u64>, prun: PRun) {
        self.storage.get_mut(prun).pending_event = seq;
    }
    pub fn subflows(&self, prun: PRun) -> &[ConnId] {
        &self.storage.get(prun).subflows
    }
    pub fn add_subflow(&mut self, subflow: ConnId, prun: PRun) {
        self.storage.get_mut(prun).subflows.push(subflow);
    }

    pub fn connect(&mut self, time: SimTime, prun: PRun) {
        let s = self.storage.get_mut(prun);
        s.state = ConnState::Idle;
        s.last_bw_update = time;
        s.last_bw_update_transferred_bytes_sum = s.transferred_bytes_sum;
    }

    /// Returns the pending event sequence to cancel, if any.
    pub fn close(&mut self, prun: PRun) -> Option<u64> {
        let s = self.storage.get_mut(prun);
        assert_ne!(s.state, ConnState::Closed, "connection already closed");
        let pending = s.pending_event.take();
        s.state = ConnState::Closed;
        pending
    }

    /// Appends `transfer` to the queue. Never valid on a subflow — real
    /// transfers are only ever handed to a TCP connection or an MPTCP
    /// master.
    pub fn add_transfer(&mut self, transfer: TransferId, outstanding_bytes: u64, prun: PRun) -> Admission {
        assert!(!self.is_subflow(), "subflows never receive transfers directly");
        let s = self.storage.get_mut(prun);
        s.transfers.push(transfer);
        s.outstanding_bytes_sum += outstanding_bytes as i64;
        match s.state {
            ConnState::Idle => {
                assert_eq!(s.transfers[0], transfer);
                s.state = ConnState::Busy;
                Admission::Started
            }
            ConnState::Busy => {
                assert_ne!(s.transfers[0], transfer);
                Admission::Enqueued
            }
            ConnState::Closed => panic!("added transfer to a closed connection"),
        }
    }

    /// Pops the finished head-of-line transfer. The caller is responsible
    /// for calling `Transfer::finish` with the same time/prun.
    pub fn pop_finished_transfer(&mut self, prun: PRun) -> TransferId {
        let s = self.storage.get_mut(prun);
        assert!(!s.transfers.is_empty());
        s.transfers.remove(0)
    }

    pub fn go_idle(&mut self, time: SimTime, prun: PRun) {
        let s = self.storage.get_mut(prun);
        s.state = ConnState::Idle;
        s.idle_timestamp = Some(time);
    }

    /// `master_busy` is only meaningful (and required) for a subflow.
    /// `master_desired_bw` likewise — only read in the subflow/CA branch.
    pub fn update_desired_bw(
        &mut self,
        master_busy: Option<bool>,
        master_desired_bw: Option<i64>,
        prun: PRun,
    ) -> Option<i64> {
        match self.rtt_tag() {
            RttTag::Tcp(rtt) => self.update_desired_bw_tcp(rtt, prun),
            RttTag::MptcpMaster(rtt0) => self.update_desired_bw_master(rtt0, prun),
            RttTag::MptcpSubflow(rtt) => self.update_desired_bw_subflow(
                rtt,
                master_busy.expect("subflow bandwidth update needs master's busy state"),
                master_desired_bw,
                prun,
            ),
        }
    }

    fn update_desired_bw_tcp(&mut self, rtt: Duration, prun: PRun) -> Option<i64> {
        let s = self.storage.get_mut(prun);
        let new_desired = match s.state {
            ConnState::Busy => match s.ss_state {
                SsState::New => 0,
                SsState::Ss => {
                    let v = div_trunc(s.cwnd, rtt);
                    assert_ne!(v, 0, "slowstart desired bandwidth must not be zero");
                    v
                }
                SsState::Ca => div_trunc(s.outstanding_bytes_sum, rtt).max(1),
            },
            ConnState::Idle => 0,
            ConnState::Closed => panic!("desired bandwidth requested on a closed connection"),
        };
        if new_desired != s.desired_bw {
            s.desired_bw = new_desired;
            Some(new_desired)
        } else {
            None
        }
    }

    fn update_desired_bw_master(&mut self, rtt0: Duration, prun: PRun) -> Option<i64> {
        let s = self.storage.get_mut(prun);
        let new_desired = match s.state {
            ConnState::Busy => div_trunc(s.outstanding_bytes_sum, rtt0).max(1),
            ConnState::Idle => 0,
            ConnState::Closed => panic!("desired bandwidth requested on a closed connection"),
        };
        if new_desired != s.desired_bw {
            s.desired_bw = new_desired;
            Some(new_desired)
        } else {
            None
        }
    }

    fn update_desired_bw_subflow(
        &mut self,
        rtt: Duration,
        master_busy: bool,
        master_desired_bw: Option<i64>,
        prun: PRun,
    ) -> Option<i64> {
        let s = self.storage.get_mut(prun);
        let new_desired = if master_busy {
            s.state = ConnState::Busy;
            match s.ss_state {
                SsState::New => 0,
                SsState::Ss => div_trunc(s.cwnd, rtt),
                SsState::Ca => master_desired_bw.expect("master desired bandwidth required in CA"),
            }
        } else {
            s.state = ConnState::Idle;
            0
        };
        if new_desired != s.desired_bw {
            s.desired_bw = new_desired;
            Some(new_desired)
        } else {
            None
        }
    }

    /// `master_idle`/`master_busy` are only read for a subflow.
    pub fn set_available_bw(
        &mut self,
        available_bw: i64,
        time: SimTime,
        master_idle: Option<bool>,
        master_busy: Option<bool>,
        master_desired_bw: Option<i64>,
        prun: PRun,
    ) -> bool {
        match self.rtt_tag() {
            RttTag::Tcp(rtt) => self.set_available_bw_tcp(rtt, available_bw, time, prun),
            RttTag::MptcpMaster(_) => self.set_available_bw_master(available_bw, time, prun),
            RttTag::MptcpSubflow(rtt) => self.set_available_bw_subflow(
                rtt,
                available_bw,
                master_idle.expect("subflow bandwidth apply needs master's idle state"),
                master_busy.expect("subflow bandwidth apply needs master's busy state"),
                master_desired_bw,
                prun,
            ),
        }
    }

    fn set_available_bw_tcp(&mut self, rtt: Duration, available_bw: i64, time: SimTime, prun: PRun) -> bool {
        let s = self.storage.get_mut(prun);
        if s.available_bw == available_bw && s.ss_state != SsState::Ss {
            return false;
        }
        if s.state == ConnState::Idle || s.ss_state == SsState::New {
            assert_eq!(available_bw, 0, "idle/new tcp connection got nonzero bandwidth");
        } else if available_bw == 0 {
            panic!("tcp connection {} got 0 byte/s bandwidth while busy", self.id);
        }
        s.available_bw = available_bw;
        s.last_bw_update = time;
        s.last_bw_update_transferred_bytes_sum = s.transferred_bytes_sum;

        if s.state == ConnState::Busy {
            match s.ss_state {
                SsState::Ss => {
                    if div_trunc(s.cwnd, rtt) > available_bw {
                        s.ss_state = SsState::Ca;
                        s.cwnd = bw_times_rtt(available_bw, rtt);
                        s.desired_bw = s.desired_bw.max(div_trunc(s.outstanding_bytes_sum, rtt));
                    }
                }
                SsState::Ca => s.cwnd = bw_times_rtt(available_bw, rtt),
                SsState::New => {}
            }
        }
        true
    }

    fn set_available_bw_master(&mut self, available_bw: i64, time: SimTime, prun: PRun) -> bool {
        let s = self.storage.get_mut(prun);
        if s.available_bw == available_bw {
            return false;
        }
        if s.state == ConnState::Idle {
            assert_eq!(available_bw, 0, "idle mptcp connection got nonzero bandwidth");
        }
        s.available_bw = available_bw;
        s.last_bw_update = time;
        s.last_bw_update_transferred_bytes_sum = s.transferred_bytes_sum;
        true
    }

    fn set_available_bw_subflow(
        &mut self,
        rtt: Duration,
        available_bw: i64,
        master_idle: bool,
        master_busy: bool,
        master_desired_bw: Option<i64>,
        prun: PRun,
    ) -> bool {
        let s = self.storage.get_mut(prun);
        if s.available_bw == available_bw && s.ss_state != SsState::Ss {
            return false;
        }
        s.available_bw = available_bw;

        if master_idle || s.ss_state == SsState::New {
            assert_eq!(available_bw, 0, "idle/new subflow got nonzero bandwidth");
        } else if master_busy {
            match s.ss_state {
                SsState::Ss => {
                    if div_trunc(s.cwnd, rtt) > available_bw {
                        s.ss_state = SsState::Ca;
                        s.cwnd = bw_times_rtt(available_bw, rtt);
                        s.desired_bw = s.desired_bw.max(master_desired_bw.unwrap_or(0));
                    }
                }
                SsState::Ca => s.cwnd = bw_times_rtt(available_bw, rtt),
                SsState::New => {}
            }
        }
        true
    }

    /// `head_outstanding` is meaningless for a subflow (it has no transfers
    /// of its own) and ignored there.
    pub fn schedule_next_event(
        &mut self,
        time: SimTime,
        head_outstanding: u64,
        master_busy: Option<bool>,
        prun: PRun,
    ) -> NextEvent {
        let id = self.id;
        match self.rtt_tag() {
            RttTag::Tcp(rtt) => self.schedule_next_event_tcp(id, rtt, time, head_outstanding, prun),
            RttTag::MptcpMaster(_) => self.schedule_next_event_master(id, time, head_outstanding, prun),
            RttTag::MptcpSubflow(rtt) => self.schedule_next_event_subflow(
                id,
                master_busy.expect("subflow scheduling needs master's busy state"),
                rtt,
                time,
                prun,
            ),
        }
    }

    fn schedule_next_event_tcp(
        &mut self,
        conn_id: ConnId,
        rtt: Duration,
        time: SimTime,
        head_outstanding: u64,
        prun: PRun,
    ) -> NextEvent {
        let s = self.storage.get_mut(prun);
        match (s.state, s.ss_state) {
            (ConnState::Idle, _) => {
                let deadline = s.idle_timestamp.expect("idle connection missing timestamp") + self.idle_timeout;
                NextEvent::At(deadline, EventKind::IdleTimeout { conn: conn_id })
            }
            (ConnState::Busy, SsState::Ss) => {
                assert!(s.available_bw > 0, "busy slowstart connection with zero available bandwidth");
                let finish_in = duration_for_bytes(head_outstanding, s.available_bw as u64);
                if finish_in <= rtt {
                    s.curr_transfer_finish_time = Some(time + finish_in);
                    NextEvent::At(time + finish_in, EventKind::TransferFinish { conn: conn_id })
                } else {
                    NextEvent::At(time + rtt, EventKind::SlowStartRound { conn: conn_id })
                }
            }
            (ConnState::Busy, SsState::Ca) => {
                assert!(s.available_bw > 0, "busy CA connection with zero available bandwidth");
                let finish_in = duration_for_bytes(head_outstanding, s.available_bw as u64);
                s.curr_transfer_finish_time = Some(time + finish_in);
                NextEvent::At(time + finish_in, EventKind::TransferFinish { conn: conn_id })
            }
            _ => panic!("broken tcp connection state machine"),
        }
    }

    fn schedule_next_event_master(
        &mut self,
        conn_id: ConnId,
        time: SimTime,
        head_outstanding: u64,
        prun: PRun,
    ) -> NextEvent {
        let s = self.storage.get_mut(prun);
        match s.state {
            ConnState::Idle => {
                let deadline = s.idle_timestamp.expect("idle connection missing timestamp") + self.idle_timeout;
                NextEvent::At(deadline, EventKind::IdleTimeout { conn: conn_id })
            }
            ConnState::Busy if s.available_bw == 0 => NextEvent::None,
            ConnState::Busy => {
                let finish_in = duration_for_bytes(head_outstanding, s.available_bw as u64);
                s.curr_transfer_finish_time = Some(time + finish_in);
                NextEvent::At(time + finish_in, EventKind::TransferFinish { conn: conn_id })
            }
            ConnState::Closed => panic!("scheduling event on a closed connection"),
        }
    }

    fn schedule_next_event_subflow(
        &mut self,
        conn_id: ConnId,
        master_busy: bool,
        rtt: Duration,
        time: SimTime,
        prun: PRun,
    ) -> NextEvent {
        let s = self.storage.get(prun);
        if master_busy && s.ss_state == SsState::Ss {
            NextEvent::At(time + rtt, EventKind::SlowStartRound { conn: conn_id })
        } else {
            NextEvent::None
        }
    }

    /// Advances byte accounting for `[start, end)`. Returns the number of
    /// bytes the head-of-line transfer should have deducted, if any (a
    /// subflow never returns `Some` — all real transfer progress happens on
    /// the master).
    pub fn tick(&mut self, start: SimTime, end: SimTime, head_outstanding: u64, prun: PRun) -> Option<i64> {
        match self.rtt_tag() {
            RttTag::Tcp(_) => self.tick_tcp(start, end, head_outstanding, prun),
            RttTag::MptcpMaster(_) => self.tick_master(start, end, head_outstanding, prun),
            RttTag::MptcpSubflow(_) => {
                self.tick_subflow(start, end, prun);
                None
            }
        }
    }

    fn corrected_transfer_bytes(
        s: &ConnectionStorage,
        conn_id: ConnId,
        start: SimTime,
        end: SimTime,
        head_outstanding: u64,
    ) -> i64 {
        let delta = end.duration_since(start);
        let mut transfer_bytes = bytes_for_duration(s.available_bw.max(0) as u64, delta) as i64;

        let bw_round_bytes =
            bytes_for_duration(s.available_bw.max(0) as u64, end.duration_since(s.last_bw_update)) as i64;
        let bw_round_sum = s.last_bw_update_transferred_bytes_sum + bw_round_bytes;
        let tick_sum = s.transferred_bytes_sum + transfer_bytes;
        if tick_sum > bw_round_sum {
            let error = tick_sum - bw_round_sum;
            if error.abs() > BW_TRANSFER_BYTES_ERROR_WARNING_THRESHOLD {
                warn!("connection {conn_id}: overshot {error} bytes due to numeric stability issues - adjusting");
            }
            transfer_bytes -= error;
            if transfer_bytes < 0 {
                transfer_bytes = 0;
            }
        }

        let transfer_bytes_error = transfer_bytes - head_outstanding as i64;
        if (Some(end) == s.curr_transfer_finish_time && transfer_bytes_error < 0) || transfer_bytes_error > 0 {
            if transfer_bytes_error.abs() > EVENT_TRANSFER_BYTES_ERROR_WARNING_THRESHOLD {
                warn!(
                    "connection {conn_id}: {}shot transfer by {} bytes - using exact bytes from event calculation",
                    if transfer_bytes_error > 0 { "over" } else { "under" },
                    transfer_bytes_error.abs()
                );
            }
            transfer_bytes = head_outstanding as i64;
        }
        transfer_bytes
    }

    fn tick_tcp(&mut self, start: SimTime, end: SimTime, head_outstanding: u64, prun: PRun) -> Option<i64> {
        let conn_id = self.id;
        let s = self.storage.get_mut(prun);
        if s.state != ConnState::Busy {
            return None;
        }
        let transfer_bytes = Self::corrected_transfer_bytes(s, conn_id, start, end, head_outstanding);
        match s.ss_state {
            SsState::New => None,
            SsState::Ss => {
                s.transferred_bytes_sum += transfer_bytes;
                s.outstanding_bytes_sum -= transfer_bytes;
                s.cwnd += transfer_bytes;
                Some(transfer_bytes)
            }
            SsState::Ca => {
                s.transferred_bytes_sum += transfer_bytes;
                s.outstanding_bytes_sum -= transfer_bytes;
                Some(transfer_bytes)
            }
        }
    }

    fn tick_master(&mut self, start: SimTime, end: SimTime, head_outstanding: u64, prun: PRun) -> Option<i64> {
        let conn_id = self.id;
        let s = self.storage.get_mut(prun);
        if s.state != ConnState::Busy {
            return None;
        }
        let transfer_bytes = Self::corrected_transfer_bytes(s, conn_id, start, end, head_outstanding);
        s.transferred_bytes_sum += transfer_bytes;
        s.outstanding_bytes_sum -= transfer_bytes;
        Some(transfer_bytes)
    }

    fn tick_subflow(&mut self, start: SimTime, end: SimTime, prun: PRun) {
        let s = self.storage.get_mut(prun);
        if s.state != ConnState::Busy {
            return;
        }
        let delta = end.duration_since(start);
        let transfer_bytes = bytes_for_duration(s.available_bw.max(0) as u64, delta) as i64;
        match s.ss_state {
            SsState::New => {}
            SsState::Ss => {
                s.transferred_bytes_sum += transfer_bytes;
                s.outstanding_bytes_sum -= transfer_bytes;
                s.cwnd += transfer_bytes;
            }
            SsState::Ca => {
                s.transferred_bytes_sum += transfer_bytes;
                s.outstanding_bytes_sum -= transfer_bytes;
            }
        }
    }

    /// Transition a subflow from NEW to SS on handshake completion, or
    /// re-evaluate desired bandwidth if already mid-slowstart. Returns
    /// `true` the first time (the master needs to know to spawn the rest of
    /// the mesh).
    pub fn subflow_enters_slowstart(&mut self, prun: PRun) -> bool {
        let s = self.storage.get_mut(prun);
        if s.ss_state == SsState::New {
            s.ss_state = SsState::Ss;
            true
        } else {
            false
        }
    }

    /// Transition a plain TCP connection (or an MPTCP master, whose own
    /// `ss_state` otherwise just sits unused) from NEW to SS.
    pub fn enters_slowstart_if_new(&mut self, prun: PRun) {
        let s = self.storage.get_mut(prun);
        if s.ss_state == SsState::New {
            s.ss_state = SsState::Ss;
        }
    }

    pub fn info(&self) -> String {
        match &self.kind {
            ConnKind::Tcp { .. } => format!("TCP id={} {}", self.id, self.origin),
            ConnKind::MptcpMaster { .. } => format!("MPTCP id={} {}", self.id, self.origin),
            ConnKind::MptcpSubflow { master, .. } => format!("MPTCP subflow id={} for {}", self.id, master),
        }
    }
}
