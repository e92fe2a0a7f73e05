//! Tagged events and the min-heap that orders them.
//!
//! Grounded on the teacher's `core::work::event_queue::EventQueue`
//! (`BinaryHeap<Reverse<_>>` keyed by time, with a monotonic "time never goes
//! backward" assertion on both push and pop) and on the original simulator's
//! `Event`/`EventSimulator` (the prediction-fork and straggler-dropping
//! semantics, `eventSimulator.py`).
//!
//! One structural difference from the original: instead of two disabled bits
//! living on a shared, mutably-aliased `Event` object, each connection keeps a
//! `pending_event: Option<u64>` sequence number in its own (possibly forked)
//! storage. Replacing a scheduled event just bumps that number; a popped
//! event whose sequence number no longer matches is exactly the "disabled"
//! case the original modelled with bits. Because the per-object storage is
//! itself forked on first touch under a prediction (`storage_switch`), this
//! reproduces the "events disabled during a finished prediction look fresh to
//! a new one" behavior without needing a mutable handle shared between the
//! queue and the connection. See `DESIGN.md`.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::ids::ConnId;
use crate::time::SimTime;

/// `NOPREDICT` from the original simulator, made a proper sum type instead of
/// a sentinel integer.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum PRun {
    Real,
    Predicting(u64),
}

impl PRun {
    pub fn is_real(self) -> bool {
        matches!(self, PRun::Real)
    }
}

/// The kind of a scheduled event, carrying the id(s) of the connection(s) it
/// targets. Mirrors the "inner-class events" note: a tagged variant plus an
/// owning-connection id, dispatched on the kind by whoever owns the
/// connection arena.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum EventKind {
    /// A TCP connection's or MPTCP subflow's handshake delay elapsed. An
    /// MPTCP master never gets one of these directly — only its first
    /// subflow does, and the master learns about it via
    /// `TransferManager::on_subflow_handshake_done`.
    Handshake { conn: ConnId },
    /// A slow-start round finished without the active transfer completing.
    SlowStartRound { conn: ConnId },
    /// The active transfer on a connection is expected to finish.
    TransferFinish { conn: ConnId },
    /// An idle connection's idle timeout elapsed.
    IdleTimeout { conn: ConnId },
}

impl EventKind {
    /// The connection this event should be routed to for staleness checks
    /// and dispatch. For a subflow handshake this is the subflow itself
    /// (the master only finds out via `on_subflow_handshake_done`).
    pub fn owner(&self) -> ConnId {
        match *self {
            EventKind::Handshake { conn } => conn,
            EventKind::SlowStartRound { conn } => conn,
            EventKind::TransferFinish { conn } => conn,
            EventKind::IdleTimeout { conn } => conn,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct HeapEvent {
    time: SimTime,
    seq: u64,
    kind: EventKind,
}

impl PartialEq for HeapEvent {
    fn eq(&self, other: &Self) -> bool {
        (self.time, self.seq) == (other.time, other.seq)
    }
}
impl Eq for HeapEvent {}

impl PartialOrd for HeapEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

/// A popped, still-to-be-dispatched event.
#[derive(Copy, Clone, Debug)]
pub struct PoppedEvent {
    pub time: SimTime,
    pub seq: u64,
    pub kind: EventKind,
}

/// A queue of [`EventKind`]s ordered by `(time, insertion order)`, with the
/// tick-listener registry that gets ticked whenever time advances between two
/// popped events. This whole struct is what gets shallow-cloned when a
/// prediction begins.
#[derive(Clone, Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<HeapEvent>>,
    listeners: Vec<ConnId>,
    time: SimTime,
    last_popped_time: SimTime,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time(&self) -> SimTime {
        self.time
    }

    pub fn push(&mut self, time: SimTime, kind: EventKind, seq: u64) {
        assert!(
            time >= self.last_popped_time,
            "event scheduled in the past: {time:?} < {:?}",
            self.last_popped_time
        );
        self.heap.push(Reverse(HeapEvent { time, seq, kind }));
    }

    pub fn pop(&mut self) -> Option<PoppedEvent> {
        let Reverse(ev) = self.heap.pop()?;
        assert!(ev.time >= self.last_popped_time, "time moved backward");
        self.last_popped_time = ev.time;
        Some(PoppedEvent {
            time: ev.time,
            seq: ev.seq,
            kind: ev.kind,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn register_listener(&mut self, id: ConnId) {
        debug_assert!(!self.listeners.contains(&id));
        self.listeners.push(id);
    }

    pub fn unregister_listener(&mut self, id: ConnId) {
        if let Some(pos) = self.listeners.iter().position(|&l| l == id) {
            self.listeners.remove(pos);
        }
    }

    pub fn listeners(&self) -> &[ConnId] {
        &self.listeners
    }

    pub fn advance_time_to(&mut self, time: SimTime) {
        self.time = time;
    }
}
