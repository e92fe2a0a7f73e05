//! The clock: owns the event queue(s) and drives the main loop, including
//! speculative "prediction" runs.
//!
//! Grounded on `eventSimulator.py`'s `EventSimulator` (the
//! `rStorage`/`pStorage` pair, `beginPrediction`/`predictionRun`/
//! `endPrecition`, and the straggler-dropping `addEvent`) and, structurally,
//! on the teacher's `core::work::event_queue::EventQueue` for the heap
//! itself.

use log::trace;

use crate::event::{EventKind, EventQueue, PRun};
use crate::ids::ConnId;
use crate::time::SimTime;

/// Implemented by whoever owns the connection/transfer arenas (the
/// `TransferManager`) so the simulator's main loop can stay generic over
/// "what an event actually does".
pub trait World {
    /// Is the event with this `seq` still the one its owning connection is
    /// waiting on? A `false` here is the "disabled" case from the original
    /// design: the event is a stale, superseded, or prediction-straggler
    /// event and should be dropped without ticking time.
    fn is_live(&self, kind: EventKind, seq: u64, prun: PRun) -> bool;

    /// Handle a live event. Implementations look the owning connection back
    /// up by the id embedded in `kind`.
    fn dispatch(&mut self, sim: &mut Simulator, time: SimTime, kind: EventKind, prun: PRun);

    /// Advance a single listener's byte accounting across `[start, end)`.
    fn tick(&mut self, listener: ConnId, start: SimTime, end: SimTime, prun: PRun);
}

/// Time-tagged log line prefix, mirroring the original's `timeLogAdapter`
/// (every log line is stamped `p=real t=1.2345s ...` or `p=3 t=1.2345s ...`).
/// Kept here rather than as a global so independent simulators (and tests
/// running in parallel) don't fight over one adapter.
pub fn log_prefix(time: SimTime, prun: PRun) -> String {
    match prun {
        PRun::Real => format!("p=real t={time}"),
        PRun::Predicting(id) => format!("p={id:>4} t={time}"),
    }
}

pub struct Simulator {
    real: EventQueue,
    prediction: Option<EventQueue>,
    /// `None` means the real run is active; `Some` identifies the live
    /// prediction. Matches `self.pRun` in the original.
    active: Option<u64>,
    next_prun_id: u64,
    next_seq: u64,
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            real: EventQueue::new(),
            prediction: None,
            active: None,
            next_prun_id: 0,
            next_seq: 0,
        }
    }

    pub fn current_prun(&self) -> PRun {
        match self.active {
            None => PRun::Real,
            Some(id) => PRun::Predicting(id),
        }
    }

    pub fn time(&self, prun: PRun) -> SimTime {
        self.queue(prun).time()
    }

    fn queue(&self, prun: PRun) -> &EventQueue {
        match prun {
            PRun::Real => &self.real,
            PRun::Predicting(id) => {
                let q = self.prediction.as_ref().expect("no prediction active");
                assert_eq!(self.active, Some(id), "stale prediction handle");
                q
            }
        }
    }

    fn queue_mut(&mut self, prun: PRun) -> &mut EventQueue {
        match prun {
            PRun::Real => &mut self.real,
            PRun::Predicting(id) => {
                assert_eq!(self.active, Some(id), "stale prediction handle");
                self.prediction.as_mut().expect("no prediction active")
            }
        }
    }

    /// Schedule a new event under `prun`. If `prun` is a prediction that has
    /// already ended (a straggler produced by a callback that outlived
    /// `end_prediction`), the event is silently dropped, per the original's
    /// `addEvent`.
    pub fn schedule(&mut self, prun: PRun, time: SimTime, kind: EventKind) -> Option<u64> {
        if prun != self.current_prun() {
            trace!("dropping straggler event for finished pRun {prun:?}");
            return None;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue_mut(prun).push(time, kind, seq);
        Some(seq)
    }

    pub fn register_listener(&mut self, prun: PRun, id: ConnId) {
        self.queue_mut(prun).register_listener(id);
    }

    pub fn unregister_listener(&mut self, prun: PRun, id: ConnId) {
        self.queue_mut(prun).unregister_listener(id);
    }

    /// Fork the real storage into a fresh prediction and return its id.
    pub fn begin_prediction(&mut self) -> PRun {
        assert!(self.active.is_none(), "prediction already active");
        let id = self.next_prun_id;
        self.next_prun_id += 1;
        self.prediction = Some(self.real.clone());
        self.active = Some(id);
        PRun::Predicting(id)
    }

    /// Tear down the active prediction. Further events addressed to it are
    /// dropped by `schedule`. Real storage is untouched.
    pub fn end_prediction(&mut self, prun: PRun) {
        match prun {
            PRun::Real => panic!("cannot end the real run as a prediction"),
            PRun::Predicting(id) => {
                assert_eq!(self.active, Some(id), "ending a non-active prediction");
                self.active = None;
            }
        }
    }

    /// Run the real event loop to exhaustion.
    pub fn real_run(&mut self, world: &mut impl World) {
        assert!(self.active.is_none());
        self.run_loop(PRun::Real, world);
    }

    /// Run the prediction loop until its queue empties or `end_prediction`
    /// is called on `prun` from inside a handler.
    pub fn prediction_run(&mut self, prun: PRun, world: &mut impl World) {
        assert_eq!(self.current_prun(), prun);
        self.run_loop(prun, world);
    }

    fn run_loop(&mut self, prun: PRun, world: &mut impl World) {
        loop {
            if self.current_prun() != prun {
                // an in-flight handler called end_prediction on us
                break;
            }
            let Some(popped) = self.queue_mut(prun).pop() else {
                break;
            };

            if !world.is_live(popped.kind, popped.seq, prun) {
                continue;
            }

            let queue_time = self.queue(prun).time();
            if popped.time > queue_time {
                let listeners: Vec<ConnId> = self.queue(prun).listeners().to_vec();
                for listener in listeners {
                    world.tick(listener, queue_time, popped.time, prun);
                }
                self.queue_mut(prun).advance_time_to(popped.time);
            }

            world.dispatch(self, popped.time, popped.kind, prun);
        }
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorder {
        order: Rc<RefCell<Vec<SimTime>>>,
    }

    impl World for Recorder {
        fn is_live(&self, _kind: EventKind, _seq: u64, _prun: PRun) -> bool {
            true
        }
        fn dispatch(&mut self, _sim: &mut Simulator, time: SimTime, _kind: EventKind, _prun: PRun) {
            self.order.borrow_mut().push(time);
        }
        fn tick(&mut self, _listener: ConnId, _start: SimTime, _end: SimTime, _prun: PRun) {}
    }

    #[test]
    fn events_pop_in_time_order() {
        let mut sim = Simulator::new();
        let conn = ConnId::new(0);
        sim.schedule(
            PRun::Real,
            SimTime::from_secs_f64(2.0),
            EventKind::IdleTimeout { conn },
        );
        sim.schedule(
            PRun::Real,
            SimTime::from_secs_f64(1.0),
            EventKind::IdleTimeout { conn },
        );
        let mut world = Recorder::default();
        let order = world.order.clone();
        sim.real_run(&mut world);
        let order = order.borrow();
        assert_eq!(
            *order,
            vec![SimTime::from_secs_f64(1.0), SimTime::from_secs_f64(2.0)]
        );
    }

    #[test]
    fn prediction_is_discarded_without_touching_real_queue() {
        let mut sim = Simulator::new();
        let conn = ConnId::new(0);
        sim.schedule(
            PRun::Real,
            SimTime::from_secs_f64(5.0),
            EventKind::IdleTimeout { conn },
        );

        let prun = sim.begin_prediction();
        sim.schedule(prun, SimTime::from_secs_f64(1.0), EventKind::IdleTimeout { conn });
        sim.end_prediction(prun);

        // a straggler scheduled after end_prediction must be dropped
        assert_eq!(
            sim.schedule(prun, SimTime::from_secs_f64(2.0), EventKind::IdleTimeout { conn }),
            None
        );

        let mut world = Recorder::default();
        let order = world.order.clone();
        sim.real_run(&mut world);
        assert_eq!(*order.borrow(), vec![SimTime::from_secs_f64(5.0)]);
    }
}
