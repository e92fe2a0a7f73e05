//! The copy-on-enter-prediction storage pattern shared by [`crate::interface::Interface`],
//! the connection types, and [`crate::transfer::Transfer`].
//!
//! The original reimplements the same `_storageSwitch` method on `Interface`,
//! `Connection`/`TcpConnection`/`MptcpConnection`, each doing: "if the
//! requested `pRun` differs from the one I last forked for, clone my real
//! storage into a fresh prediction storage tagged with this `pRun`; then
//! return whichever storage (real or prediction) the caller asked for."
//! [`PredictionFork`] is that method, written once and shared generically.
//!
//! One simplification versus the line-by-line original: the original reforks
//! on *every* pRun transition, including predicting-to-real, even though that
//! clone is immediately thrown away (real storage is never mutated by a
//! prediction, so there is nothing to refresh it from). We only fork when
//! asked for a prediction id distinct from whichever one is currently
//! cached — real storage is always returned directly, no clone involved.
//! Observably identical, fewer wasted clones.

use crate::event::PRun;

#[derive(Clone, Debug)]
pub struct PredictionFork<T> {
    real: T,
    cached: Option<(u64, T)>,
}

impl<T: Clone> PredictionFork<T> {
    pub fn new(real: T) -> Self {
        Self { real, cached: None }
    }

    pub fn real(&self) -> &T {
        &self.real
    }

    pub fn real_mut(&mut self) -> &mut T {
        &mut self.real
    }

    /// Read-only access. A prediction id that has never been written to via
    /// [`Self::get_mut`] has not diverged from `real` yet, so it reads as
    /// `real` unchanged.
    pub fn get(&self, prun: PRun) -> &T {
        match prun {
            PRun::Real => &self.real,
            PRun::Predicting(id) => match &self.cached {
                Some((cached_id, storage)) if *cached_id == id => storage,
                _ => &self.real,
            },
        }
    }

    /// Fork-on-first-touch accessor: lazily clones `real` the first time a
    /// new prediction id shows up, then hands back that prediction's copy.
    pub fn get_mut(&mut self, prun: PRun) -> &mut T {
        match prun {
            PRun::Real => &mut self.real,
            PRun::Predicting(id) => {
                let needs_fork = !matches!(&self.cached, Some((cached_id, _)) if *cached_id == id);
                if needs_fork {
                    self.cached = Some((id, self.real.clone()));
                }
                &mut self.cached.as_mut().unwrap().1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prediction_mutation_does_not_touch_real() {
        let mut fork = PredictionFork::new(vec![1, 2, 3]);
        let prun = PRun::Predicting(0);
        fork.get_mut(prun).push(4);
        assert_eq!(fork.get(prun), &vec![1, 2, 3, 4]);
        assert_eq!(fork.real(), &vec![1, 2, 3]);
    }

    #[test]
    fn new_prediction_id_reforks_from_real() {
        let mut fork = PredictionFork::new(vec![1]);
        fork.get_mut(PRun::Predicting(0)).push(2);
        assert_eq!(fork.get(PRun::Predicting(0)), &vec![1, 2]);
        // a later, distinct prediction starts fresh from real, not from #0's leftovers
        assert_eq!(fork.get(PRun::Predicting(1)), &vec![1]);
    }
}
