//! The authoritative index: owns every transfer, connection and interface,
//! and is the `World` the [`crate::simulator::Simulator`] drives.
//!
//! Grounded on `transferManager.py`'s `TransferManager`. The original keeps
//! transfers/connections as live, mutually-referencing Python objects and a
//! separate `TransferManager` that indexes them by membership in various
//! lists/sets; predictions run directly against the same objects, forking
//! only their own `_storageSwitch`-backed fields. Here every transfer,
//! connection and interface is owned by an arena (`HashMap` keyed by id) on
//! `TransferManager`, and the same index lists/sets from the original track
//! ids instead of objects.
//!
//! One structural difference worth calling out: the original only appends a
//! prediction-created connection to nothing durable (it's a fresh Python
//! object the garbage collector reclaims once the prediction's stack frame
//! unwinds). Our connections live in a `HashMap` that nothing ever shrinks,
//! so a prediction-only connection's entry outlives the prediction that
//! created it. This doesn't affect simulated results (a `ConnId` created
//! during a dead-end prediction is never looked up again), only long-run
//! memory footprint for policies that explore many speculative connections
//! per enabled transfer. TODO: recycle prediction-scoped connection ids
//! once a prediction ends.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use log::warn;

use crate::connection::{Admission, ConnKind, Connection, NextEvent};
use crate::error::BuildError;
use crate::event::{EventKind, PRun};
use crate::ids::{ConnId, IdAllocator, InterfaceId, TransferId};
use crate::interface::Interface;
use crate::policy::Policy;
use crate::simulator::{Simulator, World};
use crate::time::{Bandwidth, SimTime};
use crate::transfer::{ObjectTimings, Transfer, TransferTimes};

enum Shape {
    Tcp,
    Master,
    Subflow(ConnId),
}

pub struct TransferManager {
    ids: IdAllocator,

    interfaces: HashMap<InterfaceId, Interface>,
    interface_order: Vec<InterfaceId>,

    connections: HashMap<ConnId, Connection>,
    /// Connections visible in summaries/dumps: TCP connections and MPTCP
    /// masters created for the real run. Subflows are never listed here —
    /// they show up nested under their master, mirroring the original's
    /// `getSummary` (only `self.connections` -- never-subflows -- is
    /// dumped top-level).
    real_connections: Vec<ConnId>,

    transfers: HashMap<TransferId, Transfer>,
    all_transfers: Vec<TransferId>,
    new_transfers: Vec<TransferId>,
    enabled_transfers: Vec<TransferId>,
    enqueued_transfers: Vec<TransferId>,
    active_transfers: Vec<TransferId>,
    finished_transfers: Vec<TransferId>,

    busy_connections: HashSet<ConnId>,
    idle_connections: HashSet<ConnId>,
    closed_connections: HashSet<ConnId>,
    connection_origin: HashMap<String, HashSet<ConnId>>,

    finish_time: Option<SimTime>,
    predicting_transfer: Option<TransferId>,
    pending_notify: bool,
}

impl TransferManager {
    pub fn new() -> Self {
        Self {
            ids: IdAllocator::new(),
            interfaces: HashMap::new(),
            interface_order: Vec::new(),
            connections: HashMap::new(),
            real_connections: Vec::new(),
            transfers: HashMap::new(),
            all_transfers: Vec::new(),
            new_transfers: Vec::new(),
            enabled_transfers: Vec::new(),
            enqueued_transfers: Vec::new(),
            active_transfers: Vec::new(),
            finished_transfers: Vec::new(),
            busy_connections: HashSet::new(),
            idle_connections: HashSet::new(),
            closed_connections: HashSet::new(),
            connection_origin: HashMap::new(),
            finish_time: None,
            predicting_transfer: None,
            pending_notify: false,
        }
    }

    pub fn add_interface(
        &mut self,
        rtt: Duration,
        bandwidth: Bandwidth,
        description: impl Into<String>,
    ) -> Result<InterfaceId, BuildError> {
        let id = self.ids.next_interface();
        let iface = Interface::new(id, rtt, bandwidth, description)?;
        self.interfaces.insert(id, iface);
        self.interface_order.push(id);
        Ok(id)
    }

    pub fn interface(&self, id: InterfaceId) -> &Interface {
        &self.interfaces[&id]
    }
    pub fn interface_ids(&self) -> &[InterfaceId] {
        &self.interface_order
    }

    pub fn add_transfer(
        &mut self,
        size: u64,
        origin: impl Into<String>,
        ssl: bool,
        har_start_time: Option<f64>,
        har_finish_time: Option<f64>,
        object_timings: Option<ObjectTimings>,
    ) -> TransferId {
        let id = self.ids.next_transfer();
        let t = Transfer::new(id, size, origin, ssl, har_start_time, har_finish_time, object_timings);
        self.transfers.insert(id, t);
        self.all_transfers.push(id);
        self.new_transfers.push(id);
        id
    }

    pub fn add_child(&mut self, parent: TransferId, child: TransferId) {
        self.transfers.get_mut(&parent).unwrap().add_child(child);
    }

    pub fn transfer(&self, id: TransferId) -> &Transfer {
        &self.transfers[&id]
    }
    pub fn connection(&self, id: ConnId) -> &Connection {
        &self.connections[&id]
    }
    pub fn real_connection_ids(&self) -> &[ConnId] {
        &self.real_connections
    }
    pub fn all_transfer_ids(&self) -> &[TransferId] {
        &self.all_transfers
    }

    pub fn enabled_transfers(&self) -> Vec<TransferId> {
        self.enabled_transfers.clone()
    }
    pub fn busy_connections(&self) -> &HashSet<ConnId> {
        &self.busy_connections
    }
    pub fn idle_connections(&self) -> &HashSet<ConnId> {
        &self.idle_connections
    }
    pub fn closed_connections(&self) -> &HashSet<ConnId> {
        &self.closed_connections
    }
    pub fn connection_candidates(&self) -> Vec<ConnId> {
        self.busy_connections.iter().chain(self.idle_connections.iter()).copied().collect()
    }
    pub fn busy_connections_for_origin(&self, origin: &str) -> HashSet<ConnId> {
        self.connection_origin.get(origin).cloned().unwrap_or_default()
    }
    pub fn closing_candidate(&self, prun: PRun) -> Option<ConnId> {
        self.idle_connections
            .iter()
            .copied()
            .min_by_key(|&c| self.connections[&c].idle_timestamp(prun).unwrap_or(SimTime::MAX))
    }
    pub fn finish_time(&self) -> Option<SimTime> {
        self.finish_time
    }
    pub fn all_finished(&self) -> bool {
        self.finished_transfers.len() == self.all_transfers.len()
    }

    fn take_pending_notify(&mut self) -> bool {
        std::mem::replace(&mut self.pending_notify, false)
    }

    fn shape_of(&self, conn_id: ConnId) -> Shape {
        match self.connections[&conn_id].kind() {
            ConnKind::Tcp { .. } => Shape::Tcp,
            ConnKind::MptcpMaster { .. } => Shape::Master,
            ConnKind::MptcpSubflow { master, .. } => Shape::Subflow(*master),
        }
    }

    // ---- bandwidth cascade -------------------------------------------------

    fn recompute_interface_bw_share(&mut self, sim: &mut Simulator, time: SimTime, iface_id: InterfaceId, prun: PRun) {
        let shares = {
            let connections = &self.connections;
            self.interfaces
                .get(&iface_id)
                .unwrap()
                .update_bw_shares(time, prun, |id| connections[&id].desired_bw(prun))
        };
        for (conn_id, bw) in shares {
            self.apply_available_bw(sim, time, conn_id, bw as i64, prun);
        }
    }

    fn apply_available_bw(&mut self, sim: &mut Simulator, time: SimTime, conn_id: ConnId, bw: i64, prun: PRun) {
        let master = self.connections[&conn_id].master();
        let (master_idle, master_busy, master_desired) = match master {
            Some(m) => {
                let mc = &self.connections[&m];
                (Some(mc.is_idle(prun)), Some(mc.is_busy(prun)), Some(mc.desired_bw(prun)))
            }
            None => (None, None, None),
        };

        let changed = self
            .connections
            .get_mut(&conn_id)
            .unwrap()
            .set_available_bw(bw, time, master_idle, master_busy, master_desired, prun);
        if !changed {
            return;
        }

        if let Some(m) = master {
            self.update_master_available_bw(sim, time, m, prun);
        }
        self.reschedule(sim, time, conn_id, prun);
    }

    fn update_master_available_bw(&mut self, sim: &mut Simulator, time: SimTime, master: ConnId, prun: PRun) {
        let sum: i64 = self.connections[&master]
            .subflows(prun)
            .iter()
            .map(|&sf| self.connections[&sf].available_bw(prun))
            .sum();
        let changed = self
            .connections
            .get_mut(&master)
            .unwrap()
            .set_available_bw(sum, time, None, None, None, prun);
        if changed {
            self.reschedule(sim, time, master, prun);
        }
    }

    fn reschedule(&mut self, sim: &mut Simulator, time: SimTime, conn_id: ConnId, prun: PRun) {
        let master_busy = self.connections[&conn_id].master().map(|m| self.connections[&m].is_busy(prun));
        let head_outstanding = self
            .connections[&conn_id]
            .front_transfer(prun)
            .map(|t| self.transfers[&t].outstanding_bytes(prun))
            .unwrap_or(0);

        let next = self
            .connections
            .get_mut(&conn_id)
            .unwrap()
            .schedule_next_event(time, head_outstanding, master_busy, prun);

        match next {
            NextEvent::None => self.connections.get_mut(&conn_id).unwrap().set_pending_event(None, prun),
            NextEvent::At(t, kind) => {
                let seq = sim.schedule(prun, t, kind);
                self.connections.get_mut(&conn_id).unwrap().set_pending_event(seq, prun);
            }
        }
    }

    fn cascade_master_desired_bw(&mut self, sim: &mut Simulator, time: SimTime, master_id: ConnId, prun: PRun) {
        let master_busy = self.connections[&master_id].is_busy(prun);
        let master_desired = self.connections[&master_id].desired_bw(prun);
        let subflows: Vec<ConnId> = self.connections[&master_id].subflows(prun).to_vec();
        for sf in subflows {
            let changed = self
                .connections
                .get_mut(&sf)
                .unwrap()
                .update_desired_bw(Some(master_busy), Some(master_desired), prun);
            if changed.is_some() {
                let iface = self.connections[&sf].interface();
                self.recompute_interface_bw_share(sim, time, iface, prun);
            }
        }
        self.update_master_available_bw(sim, time, master_id, prun);
    }

    fn update_desired_bw_and_propagate(&mut self, sim: &mut Simulator, time: SimTime, conn_id: ConnId, prun: PRun) {
        match self.shape_of(conn_id) {
            Shape::Tcp => {
                let changed = self.connections.get_mut(&conn_id).unwrap().update_desired_bw(None, None, prun);
                if changed.is_some() {
                    let iface = self.connections[&conn_id].interface();
                    self.recompute_interface_bw_share(sim, time, iface, prun);
                }
            }
            Shape::Master => {
                let changed = self.connections.get_mut(&conn_id).unwrap().update_desired_bw(None, None, prun);
                if changed.is_some() {
                    self.cascade_master_desired_bw(sim, time, conn_id, prun);
                }
            }
            Shape::Subflow(master) => {
                let master_busy = self.connections[&master].is_busy(prun);
                let master_desired = self.connections[&master].desired_bw(prun);
                let changed = self
                    .connections
                    .get_mut(&conn_id)
                    .unwrap()
                    .update_desired_bw(Some(master_busy), Some(master_desired), prun);
                if changed.is_some() {
                    let iface = self.connections[&conn_id].interface();
                    self.recompute_interface_bw_share(sim, time, iface, prun);
                }
            }
        }
    }

    // ---- connect / close ---------------------------------------------------

    fn connect_connection(&mut self, sim: &mut Simulator, time: SimTime, conn_id: ConnId, prun: PRun) {
        let iface = self.connections[&conn_id].interface();
        let handshake_delay = self.connections[&conn_id].handshake_delay();

        self.connections.get_mut(&conn_id).unwrap().connect(time, prun);
        self.interfaces.get_mut(&iface).unwrap().add_connection(conn_id, prun);
        sim.register_listener(prun, conn_id);

        let seq = sim.schedule(prun, time + handshake_delay, EventKind::Handshake { conn: conn_id });
        self.connections.get_mut(&conn_id).unwrap().set_pending_event(seq, prun);
    }

    fn connect_mptcp_master(&mut self, sim: &mut Simulator, time: SimTime, master_id: ConnId, prun: PRun) {
        self.connections.get_mut(&master_id).unwrap().connect(time, prun);
        sim.register_listener(prun, master_id);
        let first_iface = self.connections[&master_id].interfaces()[0];
        self.spawn_subflow(sim, time, master_id, first_iface, prun);
    }

    fn spawn_subflow(&mut self, sim: &mut Simulator, time: SimTime, master_id: ConnId, iface_id: InterfaceId, prun: PRun) {
        let rtt = self.interfaces[&iface_id].rtt();
        let ssl = self.connections[&master_id].ssl();
        let origin = self.connections[&master_id].origin().to_string();
        let idle_timeout = self.connections[&master_id].idle_timeout();
        let is_first = self.connections[&master_id].subflows(prun).is_empty();
        let handshake_delay = if is_first { rtt * if ssl { 4u32 } else { 2u32 } } else { rtt * 2u32 };

        let sf_id = self.ids.next_conn();
        let sf = Connection::new_mptcp_subflow(sf_id, master_id, iface_id, rtt, handshake_delay, idle_timeout, ssl, origin);
        self.connections.insert(sf_id, sf);
        self.connections.get_mut(&master_id).unwrap().add_subflow(sf_id, prun);
        self.connect_connection(sim, time, sf_id, prun);
    }

    fn on_subflow_handshake_done(&mut self, sim: &mut Simulator, time: SimTime, master: ConnId, prun: PRun) {
        let interfaces = self.connections[&master].interfaces();
        for &iface_id in interfaces.iter().skip(1) {
            self.spawn_subflow(sim, time, master, iface_id, prun);
        }
    }

    fn close_connection(&mut self, sim: &mut Simulator, conn_id: ConnId, time: SimTime, prun: PRun) {
        if let ConnKind::MptcpMaster { .. } = self.connections[&conn_id].kind() {
            let subflows = self.connections[&conn_id].subflows(prun).to_vec();
            for sf in subflows {
                self.close_connection(sim, sf, time, prun);
            }
        }

        self.connections.get_mut(&conn_id).unwrap().close(prun);
        sim.unregister_listener(prun, conn_id);

        if !matches!(self.connections[&conn_id].kind(), ConnKind::MptcpMaster { .. }) {
            let iface = self.connections[&conn_id].interface();
            self.interfaces.get_mut(&iface).unwrap().remove_connection(conn_id, prun);
        }

        self.notify_closed(conn_id, prun);
    }

    // ---- real-run index maintenance (mirrors idledConnection/busiedConnection/closedConnection) ----

    fn notify_idle(&mut self, conn_id: ConnId, prun: PRun) {
        if prun.is_real() {
            self.busy_connections.remove(&conn_id);
            let origin = self.connections[&conn_id].origin().to_string();
            if let Some(set) = self.connection_origin.get_mut(&origin) {
                set.remove(&conn_id);
            }
            self.idle_connections.insert(conn_id);
            self.pending_notify = true;
        }
    }

    fn notify_busy(&mut self, conn_id: ConnId, prun: PRun) {
        if prun.is_real() {
            self.idle_connections.remove(&conn_id);
            self.busy_connections.insert(conn_id);
            let origin = self.connections[&conn_id].origin().to_string();
            self.connection_origin.entry(origin).or_default().insert(conn_id);
        }
    }

    fn notify_closed(&mut self, conn_id: ConnId, prun: PRun) {
        if prun.is_real() {
            if self.idle_connections.remove(&conn_id) {
                // expected path
            } else if self.busy_connections.remove(&conn_id) {
                warn!("closed a still-busy connection {conn_id}");
            } else {
                panic!("closed connection {conn_id} was neither idle nor busy");
            }
            self.closed_connections.insert(conn_id);
        }
    }

    // ---- transfer list bookkeeping ------------------------------------------

    fn enable_transfer(&mut self, transfer: TransferId, time: SimTime, prun: PRun) {
        if !prun.is_real() {
            return;
        }
        assert!(!self.transfers[&transfer].is_enabled(prun));
        if let Some(pos) = self.new_transfers.iter().position(|&t| t == transfer) {
            self.new_transfers.remove(pos);
        }
        self.transfers.get_mut(&transfer).unwrap().enable(time, prun);
        self.enabled_transfers.push(transfer);
        self.pending_notify = true;
    }

    /// Enable every root transfer (no parent) so the first `notify` has
    /// something to schedule. Call once after loading all transfers.
    pub fn enable_roots(&mut self, time: SimTime) {
        let roots: Vec<TransferId> = self.new_transfers.clone();
        let has_parent: HashSet<TransferId> = self
            .all_transfers
            .iter()
            .flat_map(|&t| self.transfers[&t].children().iter().copied())
            .collect();
        for t in roots {
            if !has_parent.contains(&t) {
                self.enable_transfer(t, time, PRun::Real);
            }
        }
    }

    fn record_started_transfer(&mut self, transfer: TransferId, prun: PRun) {
        if prun.is_real() {
            self.active_transfers.push(transfer);
            if let Some(pos) = self.enqueued_transfers.iter().position(|&t| t == transfer) {
                self.enqueued_transfers.remove(pos);
            } else if let Some(pos) = self.enabled_transfers.iter().position(|&t| t == transfer) {
                self.enabled_transfers.remove(pos);
            }
        }
    }

    fn record_enqueued_transfer(&mut self, transfer: TransferId, prun: PRun) {
        if prun.is_real() {
            if let Some(pos) = self.enabled_transfers.iter().position(|&t| t == transfer) {
                self.enabled_transfers.remove(pos);
            }
            self.enqueued_transfers.push(transfer);
        }
    }

    fn record_finished_transfer(&mut self, sim: &mut Simulator, transfer: TransferId, time: SimTime, prun: PRun) {
        if prun.is_real() {
            if let Some(pos) = self.active_transfers.iter().position(|&t| t == transfer) {
                self.active_transfers.remove(pos);
            }
            self.finished_transfers.push(transfer);

            let children = self.transfers[&transfer].children().to_vec();
            for child in children {
                self.enable_transfer(child, time, prun);
            }

            if self.finished_transfers.len() == self.all_transfers.len() {
                self.finish_time = Some(time);
            }
        } else if Some(transfer) == self.predicting_transfer {
            sim.end_prediction(prun);
        }
    }

    // ---- scheduling ---------------------------------------------------------

    fn schedule_transfer(
        &mut self,
        sim: &mut Simulator,
        transfer: TransferId,
        conn: Option<ConnId>,
        interfaces: Option<Vec<InterfaceId>>,
        idle_timeout: Duration,
        prun: PRun,
    ) {
        let time = sim.time(prun);
        let conn_id = match (conn, interfaces) {
            (None, Some(ifaces)) => {
                assert!(!ifaces.is_empty(), "at least one interface is required for a new connection");
                let ssl = self.transfers[&transfer].ssl();
                let origin = self.transfers[&transfer].origin().to_string();
                let id = self.ids.next_conn();
                if ifaces.len() == 1 {
                    let rtt = self.interfaces[&ifaces[0]].rtt();
                    let c = Connection::new_tcp(id, ifaces[0], rtt, idle_timeout, ssl, origin);
                    self.connections.insert(id, c);
                    if prun.is_real() {
                        self.real_connections.push(id);
                    }
                    self.connect_connection(sim, time, id, prun);
                } else {
                    let rtt0 = self.interfaces[&ifaces[0]].rtt();
                    let c = Connection::new_mptcp_master(id, ifaces, rtt0, idle_timeout, ssl, origin);
                    self.connections.insert(id, c);
                    if prun.is_real() {
                        self.real_connections.push(id);
                    }
                    self.connect_mptcp_master(sim, time, id, prun);
                }
                id
            }
            (Some(c), None) => {
                assert!(!self.connections[&c].is_closed(prun), "pipelining onto a closed connection");
                c
            }
            _ => panic!("schedule_transfer needs exactly one of an existing connection or a fresh interface list"),
        };

        let outstanding = self.transfers[&transfer].outstanding_bytes(prun);
        let admission = self.connections.get_mut(&conn_id).unwrap().add_transfer(transfer, outstanding, prun);
        match admission {
            Admission::Started => {
                self.transfers.get_mut(&transfer).unwrap().start(conn_id, time, prun);
                self.record_started_transfer(transfer, prun);
                self.update_desired_bw_and_propagate(sim, time, conn_id, prun);
                self.notify_busy(conn_id, prun);
            }
            Admission::Enqueued => {
                self.transfers.get_mut(&transfer).unwrap().enqueue(conn_id, time, prun);
                self.record_enqueued_transfer(transfer, prun);
                self.update_desired_bw_and_propagate(sim, time, conn_id, prun);
            }
        }
    }

    pub fn predict_transfer(
        &mut self,
        sim: &mut Simulator,
        transfer: TransferId,
        conn: Option<ConnId>,
        interfaces: Option<Vec<InterfaceId>>,
    ) -> TransferTimes {
        let prun = sim.begin_prediction();
        self.predicting_transfer = Some(transfer);
        self.schedule_transfer(sim, transfer, conn, interfaces, DEFAULT_IDLE_TIMEOUT, prun);
        sim.prediction_run(prun, self);
        self.predicting_transfer = None;
        self.transfers[&transfer].times(prun)
    }

    pub fn execute_prediction(
        &mut self,
        sim: &mut Simulator,
        transfer: TransferId,
        conn: Option<ConnId>,
        interfaces: Option<Vec<InterfaceId>>,
        time: SimTime,
    ) {
        assert!(
            conn.is_none() != interfaces.is_none(),
            "exactly one of connection or interfaces must be chosen"
        );
        if let Some(c) = conn {
            let conn_ref = &self.connections[&c];
            assert_eq!(conn_ref.origin(), self.transfers[&transfer].origin());
            assert_eq!(conn_ref.ssl(), self.transfers[&transfer].ssl());
            assert!(!conn_ref.is_closed(PRun::Real));
        }

        if self.busy_connections.len() + self.idle_connections.len() >= DEFAULT_GLOBAL_LIMIT {
            if let Some(candidate) = self.closing_candidate(PRun::Real) {
                if Some(candidate) != conn {
                    self.close_connection(sim, candidate, time, PRun::Real);
                }
            }
        }

        self.schedule_transfer(sim, transfer, conn, interfaces, DEFAULT_IDLE_TIMEOUT, PRun::Real);
    }

    pub fn notify(&mut self, sim: &mut Simulator, policy: &mut dyn Policy, time: SimTime) {
        let enabled = self.enabled_transfers();
        if enabled.is_empty() {
            return;
        }
        if self.busy_connections.len() >= DEFAULT_GLOBAL_LIMIT {
            return;
        }
        for transfer in enabled {
            let origin = self.transfers[&transfer].origin().to_string();
            if self.busy_connections_for_origin(&origin).len() >= DEFAULT_HOST_LIMIT {
                continue;
            }
            let prediction = policy.predict(self, sim, transfer);
            self.execute_prediction(sim, transfer, prediction.conn, prediction.interfaces, time);
        }
    }

    // ---- event dispatch -------------------------------------------------------

    fn on_handshake_done(&mut self, sim: &mut Simulator, time: SimTime, conn_id: ConnId, prun: PRun) {
        match self.shape_of(conn_id) {
            Shape::Subflow(master) => {
                let entered = self.connections.get_mut(&conn_id).unwrap().subflow_enters_slowstart(prun);
                if entered && self.connections[&master].subflows(prun).first().copied() == Some(conn_id) {
                    self.on_subflow_handshake_done(sim, time, master, prun);
                }
                self.update_desired_bw_and_propagate(sim, time, conn_id, prun);
            }
            Shape::Tcp => {
                self.connections.get_mut(&conn_id).unwrap().enters_slowstart_if_new(prun);
                self.update_desired_bw_and_propagate(sim, time, conn_id, prun);
            }
            Shape::Master => unreachable!("an mptcp master never owns a Handshake event directly"),
        }
    }

    fn on_slowstart_round(&mut self, sim: &mut Simulator, time: SimTime, conn_id: ConnId, prun: PRun) {
        self.update_desired_bw_and_propagate(sim, time, conn_id, prun);
    }

    fn on_transfer_finish(&mut self, sim: &mut Simulator, time: SimTime, conn_id: ConnId, prun: PRun) {
        let transfer_id = self.connections[&conn_id]
            .front_transfer(prun)
            .expect("transfer-finish event fired with no head-of-line transfer");
        assert_eq!(
            self.transfers[&transfer_id].outstanding_bytes(prun),
            0,
            "transfer-finish fired with bytes still outstanding"
        );

        self.connections.get_mut(&conn_id).unwrap().pop_finished_transfer(prun);
        self.transfers.get_mut(&transfer_id).unwrap().finish(conn_id, time, prun);
        self.record_finished_transfer(sim, transfer_id, time, prun);

        if self.connections[&conn_id].transfers(prun).is_empty() {
            self.connections.get_mut(&conn_id).unwrap().go_idle(time, prun);
            self.update_desired_bw_and_propagate(sim, time, conn_id, prun);
            self.notify_idle(conn_id, prun);
        } else {
            let next_transfer = self.connections[&conn_id].front_transfer(prun).unwrap();
            self.transfers.get_mut(&next_transfer).unwrap().start(conn_id, time, prun);
            self.record_started_transfer(next_transfer, prun);
            self.update_desired_bw_and_propagate(sim, time, conn_id, prun);
            self.reschedule(sim, time, conn_id, prun);
        }
    }

    fn on_idle_timeout(&mut self, sim: &mut Simulator, time: SimTime, conn_id: ConnId, prun: PRun) {
        assert!(self.connections[&conn_id].is_idle(prun), "idle-timeout fired on a non-idle connection");
        self.close_connection(sim, conn_id, time, prun);
    }
}

impl Default for TransferManager {
    fn default() -> Self {
        Self::new()
    }
}

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_GLOBAL_LIMIT: usize = 17;
pub const DEFAULT_HOST_LIMIT: usize = 6;

impl World for TransferManager {
    fn is_live(&self, kind: EventKind, seq: u64, prun: PRun) -> bool {
        let owner = kind.owner();
        self.connections.get(&owner).is_some_and(|c| c.pending_event(prun) == Some(seq))
    }

    fn dispatch(&mut self, sim: &mut Simulator, time: SimTime, kind: EventKind, prun: PRun) {
        let conn_id = kind.owner();
        self.connections.get_mut(&conn_id).unwrap().set_pending_event(None, prun);
        match kind {
            EventKind::Handshake { conn } => self.on_handshake_done(sim, time, conn, prun),
            EventKind::SlowStartRound { conn } => self.on_slowstart_round(sim, time, conn, prun),
            EventKind::TransferFinish { conn } => self.on_transfer_finish(sim, time, conn, prun),
            EventKind::IdleTimeout { conn } => self.on_idle_timeout(sim, time, conn, prun),
        }
    }

    fn tick(&mut self, listener: ConnId, start: SimTime, end: SimTime, prun: PRun) {
        match self.shape_of(listener) {
            Shape::Tcp | Shape::Master => {
                let head = self.connections[&listener].front_transfer(prun);
                let head_outstanding = head.map(|t| self.transfers[&t].outstanding_bytes(prun)).unwrap_or(0);
                if let Some(bytes) = self.connections.get_mut(&listener).unwrap().tick(start, end, head_outstanding, prun) {
                    if let Some(t) = head {
                        if bytes > 0 {
                            self.transfers.get_mut(&t).unwrap().transfer_bytes(bytes as u64, prun);
                        }
                    }
                }
            }
            Shape::Subflow(_) => {
                self.connections.get_mut(&listener).unwrap().tick(start, end, 0, prun);
            }
        }
    }
}

/// Pairs a [`TransferManager`] with the policy driving its real run, since
/// `World::dispatch` needs both but only ever gets `&mut Self` — see the
/// module doc comment on why the policy can't simply live as a field read
/// from inside `TransferManager` itself.
pub struct Runtime<P> {
    pub tm: TransferManager,
    pub policy: P,
}

impl<P: Policy> Runtime<P> {
    pub fn new(tm: TransferManager, policy: P) -> Self {
        Self { tm, policy }
    }

    /// Kicks off scheduling and runs the real event loop to completion.
    pub fn run(mut self, sim: &mut Simulator) -> TransferManager {
        self.tm.notify(sim, &mut self.policy, SimTime::ZERO);
        sim.real_run(&mut self);
        assert!(self.tm.all_finished(), "real run ended with unfinished transfers");
        self.tm
    }
}

impl<P: Policy> World for Runtime<P> {
    fn is_live(&self, kind: EventKind, seq: u64, prun: PRun) -> bool {
        self.tm.is_live(kind, seq, prun)
    }

    fn dispatch(&mut self, sim: &mut Simulator, time: SimTime, kind: EventKind, prun: PRun) {
        self.tm.dispatch(sim, time, kind, prun);
        if self.tm.take_pending_notify() {
            self.tm.notify(sim, &mut self.policy, time);
        }
    }

    fn tick(&mut self, listener: ConnId, start: SimTime, end: SimTime, prun: PRun) {
        self.tm.tick(listener, start, end, prun);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{EarliestArrivalFirst, MptcpFullMeshIfList, RoundRobin, UseOneInterfaceOnly};
    use std::time::Duration;

    fn fast_interface(tm: &mut TransferManager, name: &str) -> InterfaceId {
        tm.add_interface(Duration::from_millis(20), 10_000_000, name).unwrap()
    }

    #[test]
    fn single_transfer_over_one_interface_finishes() {
        let mut tm = TransferManager::new();
        let if1 = fast_interface(&mut tm, "if1");
        tm.add_transfer(1_048_576, "example.com", false, None, None, None);
        tm.enable_roots(SimTime::ZERO);

        let mut sim = Simulator::new();
        let runtime = Runtime::new(tm, UseOneInterfaceOnly::new(if1));
        let tm = runtime.run(&mut sim);

        assert!(tm.all_finished());
        assert!(tm.finish_time().unwrap() > SimTime::ZERO);
        assert_eq!(tm.real_connection_ids().len(), 1);
    }

    #[test]
    fn parent_child_fan_out_pipelines_onto_one_connection() {
        let mut tm = TransferManager::new();
        let if1 = fast_interface(&mut tm, "if1");
        let root = tm.add_transfer(4_096, "example.com", false, None, None, None);
        for _ in 0..5 {
            let child = tm.add_transfer(4_096, "example.com", false, None, None, None);
            tm.add_child(root, child);
        }
        tm.enable_roots(SimTime::ZERO);

        let mut sim = Simulator::new();
        let runtime = Runtime::new(tm, UseOneInterfaceOnly::new(if1));
        let tm = runtime.run(&mut sim);

        assert!(tm.all_finished());
        // every same-origin, same-ssl transfer should have pipelined onto the
        // single connection useOneInterfaceOnly ever opens.
        assert_eq!(tm.real_connection_ids().len(), 1);
    }

    #[test]
    fn round_robin_alternates_starting_interface() {
        let mut tm1 = TransferManager::new();
        let a = fast_interface(&mut tm1, "a");
        let b = fast_interface(&mut tm1, "b");
        tm1.add_transfer(4_096, "example.com", false, None, None, None);
        tm1.enable_roots(SimTime::ZERO);
        let mut sim1 = Simulator::new();
        let tm1 = Runtime::new(tm1, RoundRobin::with_order(vec![a, b])).run(&mut sim1);
        let first_iface = tm1.connection(tm1.real_connection_ids()[0]).interface();
        assert_eq!(first_iface, a);

        let mut tm2 = TransferManager::new();
        let a2 = fast_interface(&mut tm2, "a");
        let b2 = fast_interface(&mut tm2, "b");
        tm2.add_transfer(4_096, "example.com", false, None, None, None);
        tm2.enable_roots(SimTime::ZERO);
        let mut sim2 = Simulator::new();
        let tm2 = Runtime::new(tm2, RoundRobin::with_order(vec![b2, a2])).run(&mut sim2);
        let first_iface2 = tm2.connection(tm2.real_connection_ids()[0]).interface();
        assert_eq!(first_iface2, b2);
    }

    #[test]
    fn mptcp_full_mesh_spans_every_interface() {
        let mut tm = TransferManager::new();
        fast_interface(&mut tm, "if1");
        fast_interface(&mut tm, "if2");
        tm.add_transfer(1_048_576, "example.com", true, None, None, None);
        tm.enable_roots(SimTime::ZERO);

        let mut sim = Simulator::new();
        let tm = Runtime::new(tm, MptcpFullMeshIfList).run(&mut sim);

        assert_eq!(tm.real_connection_ids().len(), 1);
        let master = tm.connection(tm.real_connection_ids()[0]);
        assert!(matches!(master.kind(), ConnKind::MptcpMaster { .. }));
        assert_eq!(master.subflows(PRun::Real).len(), 2);
    }

    #[test]
    fn asymmetric_interfaces_finish_faster_with_earliest_arrival_first() {
        let mut tm = TransferManager::new();
        let slow = tm.add_interface(Duration::from_millis(20), 10_000, "slow").unwrap();
        let _fast = tm.add_interface(Duration::from_millis(20), 10_000_000, "fast").unwrap();
        tm.add_transfer(1_048_576, "example.com", false, None, None, None);
        tm.enable_roots(SimTime::ZERO);

        let mut sim = Simulator::new();
        let tm = Runtime::new(tm, EarliestArrivalFirst).run(&mut sim);

        let used = tm.connection(tm.real_connection_ids()[0]).interface();
        assert_ne!(used, slow, "earliestArrivalFirst should have preferred the fast interface");
    }
}
