//! A single HTTP object transfer and its lifecycle state.
//!
//! Grounded on `transfer.py`'s `Transfer`/`TransferStorage`/`state`. One
//! difference: the original's `enable`/`enqueue`/`start`/`finish` each call
//! back into the `TransferManager` to update its indices. Here `Transfer`
//! only owns its own state transition and assertions; [`crate::transfer_manager::TransferManager`]
//! is the one that calls these *and* updates its indices, since a transfer
//! holding a live reference back to its manager is exactly the kind of cycle
//! the id-arena approach avoids.

use crate::ids::{ConnId, TransferId};
use crate::storage::PredictionFork;
use crate::time::SimTime;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TransferState {
    New,
    Enabled,
    Enqueued,
    Active,
    Finished,
}

/// Timing breakdown lifted straight from a HAR entry's `timings` object, kept
/// around for the output summary even though the simulator itself doesn't
/// act on it.
#[derive(Clone, Debug, Default)]
pub struct ObjectTimings {
    pub connect: Option<f64>,
    pub receive: Option<f64>,
    pub wait: Option<f64>,
    pub blocked: Option<f64>,
    pub dns: Option<f64>,
    pub send: Option<f64>,
}

#[derive(Clone, Debug)]
struct TransferStorage {
    outstanding_bytes: u64,
    state: TransferState,
    start_time: Option<SimTime>,
    enable_time: Option<SimTime>,
    enqueue_time: Option<SimTime>,
    finish_time: Option<SimTime>,
    connection: Option<ConnId>,
}

impl TransferStorage {
    fn new(size: u64) -> Self {
        Self {
            outstanding_bytes: size,
            state: TransferState::New,
            start_time: None,
            enable_time: None,
            enqueue_time: None,
            finish_time: None,
            connection: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TransferTimes {
    pub start_time: Option<SimTime>,
    pub enable_time: Option<SimTime>,
    pub enqueue_time: Option<SimTime>,
    pub finish_time: Option<SimTime>,
    pub har_start_time: Option<f64>,
    pub har_finish_time: Option<f64>,
}

pub struct Transfer {
    id: TransferId,
    size: u64,
    origin: String,
    ssl: bool,
    har_start_time: Option<f64>,
    har_finish_time: Option<f64>,
    object_timings: Option<ObjectTimings>,
    children: Vec<TransferId>,
    storage: PredictionFork<TransferStorage>,
}

impl Transfer {
    pub fn new(
        id: TransferId,
        size: u64,
        origin: impl Into<String>,
        ssl: bool,
        har_start_time: Option<f64>,
        har_finish_time: Option<f64>,
        object_timings: Option<ObjectTimings>,
    ) -> Self {
        let origin = origin.into();
        assert!(size > 0, "transfer size must be positive");
        assert!(!origin.is_empty(), "transfer origin must not be empty");
        Self {
            id,
            size,
            origin,
            ssl,
            har_start_time,
            har_finish_time,
            object_timings,
            children: Vec::new(),
            storage: PredictionFork::new(TransferStorage::new(size)),
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }
    pub fn size(&self) -> u64 {
        self.size
    }
    pub fn origin(&self) -> &str {
        &self.origin
    }
    pub fn ssl(&self) -> bool {
        self.ssl
    }
    pub fn children(&self) -> &[TransferId] {
        &self.children
    }
    pub fn add_child(&mut self, child: TransferId) {
        self.children.push(child);
    }

    pub fn is_new(&self, prun: crate::event::PRun) -> bool {
        self.storage.get(prun).state == TransferState::New
    }
    pub fn is_enabled(&self, prun: crate::event::PRun) -> bool {
        self.storage.get(prun).state == TransferState::Enabled
    }
    pub fn is_enqueued(&self, prun: crate::event::PRun) -> bool {
        self.storage.get(prun).state == TransferState::Enqueued
    }
    pub fn is_active(&self, prun: crate::event::PRun) -> bool {
        self.storage.get(prun).state == TransferState::Active
    }
    pub fn is_finished(&self, prun: crate::event::PRun) -> bool {
        self.storage.get(prun).state == TransferState::Finished
    }

    pub fn outstanding_bytes(&self, prun: crate::event::PRun) -> u64 {
        self.storage.get(prun).outstanding_bytes
    }

    pub fn connection(&self, prun: crate::event::PRun) -> Option<ConnId> {
        self.storage.get(prun).connection
    }

    pub fn times(&self, prun: crate::event::PRun) -> TransferTimes {
        let s = self.storage.get(prun);
        TransferTimes {
            start_time: s.start_time,
            enable_time: s.enable_time,
            enqueue_time: s.enqueue_time,
            finish_time: s.finish_time,
            har_start_time: self.har_start_time,
            har_finish_time: self.har_finish_time,
        }
    }

    pub fn object_timings(&self) -> Option<&ObjectTimings> {
        self.object_timings.as_ref()
    }

    pub fn transfer_bytes(&mut self, amount: u64, prun: crate::event::PRun) {
        let s = self.storage.get_mut(prun);
        assert_eq!(s.state, TransferState::Active, "byte transfer on a non-active transfer");
        assert!(amount <= s.outstanding_bytes, "transferred more bytes than outstanding");
        s.outstanding_bytes -= amount;
    }

    pub fn enable(&mut self, time: SimTime, prun: crate::event::PRun) {
        let s = self.storage.get_mut(prun);
        assert_eq!(s.state, TransferState::New);
        s.state = TransferState::Enabled;
        s.enable_time = Some(time);
    }

    pub fn enqueue(&mut self, conn: ConnId, time: SimTime, prun: crate::event::PRun) {
        let s = self.storage.get_mut(prun);
        assert_eq!(s.state, TransferState::Enabled);
        s.state = TransferState::Enqueued;
        s.connection = Some(conn);
        s.enqueue_time = Some(time);
    }

    pub fn start(&mut self, conn: ConnId, time: SimTime, prun: crate::event::PRun) {
        let s = self.storage.get_mut(prun);
        assert!(matches!(s.state, TransferState::Enabled | TransferState::Enqueued));
        s.state = TransferState::Active;
        s.connection = Some(conn);
        s.start_time = Some(time);
    }

    pub fn finish(&mut self, conn: ConnId, time: SimTime, prun: crate::event::PRun) {
        let s = self.storage.get_mut(prun);
        assert_eq!(s.state, TransferState::Active);
        assert_eq!(s.outstanding_bytes, 0, "transfer finished with bytes outstanding");
        assert_eq!(s.connection, Some(conn), "transfer finished on the wrong connection");
        s.state = TransferState::Finished;
        s.finish_time = Some(time);
    }

    pub fn info(&self) -> String {
        format!(
            "id={} {}{} {}B",
            self.id,
            self.origin,
            if self.ssl { " (s)" } else { "" },
            self.size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::PRun;
    use crate::ids::IdAllocator;

    #[test]
    fn lifecycle_happy_path() {
        let mut ids = IdAllocator::new();
        let mut t = Transfer::new(ids.next_transfer(), 100, "example.com", false, None, None, None);
        let conn = ids.next_conn();

        assert!(t.is_new(PRun::Real));
        t.enable(SimTime::ZERO, PRun::Real);
        assert!(t.is_enabled(PRun::Real));
        t.start(conn, SimTime::ZERO, PRun::Real);
        assert!(t.is_active(PRun::Real));
        t.transfer_bytes(100, PRun::Real);
        assert_eq!(t.outstanding_bytes(PRun::Real), 0);
        t.finish(conn, SimTime::from_secs_f64(1.0), PRun::Real);
        assert!(t.is_finished(PRun::Real));
    }

    #[test]
    #[should_panic]
    fn finishing_with_outstanding_bytes_panics() {
        let mut ids = IdAllocator::new();
        let mut t = Transfer::new(ids.next_transfer(), 100, "example.com", false, None, None, None);
        let conn = ids.next_conn();
        t.enable(SimTime::ZERO, PRun::Real);
        t.start(conn, SimTime::ZERO, PRun::Real);
        t.finish(conn, SimTime::ZERO, PRun::Real);
    }

    #[test]
    fn prediction_progress_does_not_affect_real() {
        let mut ids = IdAllocator::new();
        let mut t = Transfer::new(ids.next_transfer(), 100, "example.com", false, None, None, None);
        let conn = ids.next_conn();
        t.enable(SimTime::ZERO, PRun::Real);
        t.start(conn, SimTime::ZERO, PRun::Real);

        let prun = PRun::Predicting(0);
        t.transfer_bytes(100, prun);
        assert_eq!(t.outstanding_bytes(prun), 0);
        assert_eq!(t.outstanding_bytes(PRun::Real), 100);
    }
}
