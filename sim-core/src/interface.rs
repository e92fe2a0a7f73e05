//! A network interface: fixed RTT and bandwidth, shared max-min fair among
//! whatever connections are currently attached to it.
//!
//! Grounded on `interface.py`'s `Interface`/`InterfaceStorage` and its
//! `updateConnectionBwShare` max-min allocator.

use std::time::Duration;

use crate::error::BuildError;
use crate::event::PRun;
use crate::ids::{ConnId, InterfaceId};
use crate::storage::PredictionFork;
use crate::time::{Bandwidth, SimTime};

#[derive(Clone, Debug, Default)]
struct InterfaceStorage {
    connections: Vec<ConnId>,
}

pub struct Interface {
    id: InterfaceId,
    rtt: Duration,
    bandwidth: Bandwidth,
    description: String,
    storage: PredictionFork<InterfaceStorage>,
}

impl Interface {
    pub fn new(
        id: InterfaceId,
        rtt: Duration,
        bandwidth: Bandwidth,
        description: impl Into<String>,
    ) -> Result<Self, BuildError> {
        if rtt.is_zero() {
            return Err(BuildError::NonPositiveRtt(rtt));
        }
        if bandwidth == 0 {
            return Err(BuildError::NonPositiveBandwidth(bandwidth as i64));
        }
        let description = description.into();
        if description.is_empty() {
            return Err(BuildError::EmptyInterfaceDescription);
        }
        Ok(Self {
            id,
            rtt,
            bandwidth,
            description,
            storage: PredictionFork::new(InterfaceStorage::default()),
        })
    }

    pub fn id(&self) -> InterfaceId {
        self.id
    }

    pub fn rtt(&self) -> Duration {
        self.rtt
    }

    pub fn bandwidth(&self) -> Bandwidth {
        self.bandwidth
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn add_connection(&mut self, conn: ConnId, prun: PRun) {
        let storage = self.storage.get_mut(prun);
        debug_assert!(!storage.connections.contains(&conn));
        storage.connections.push(conn);
    }

    pub fn remove_connection(&mut self, conn: ConnId, prun: PRun) {
        let storage = self.storage.get_mut(prun);
        if let Some(pos) = storage.connections.iter().position(|&c| c == conn) {
            storage.connections.remove(pos);
        }
    }

    pub fn connections(&self, prun: PRun) -> &[ConnId] {
        &self.storage.get(prun).connections
    }

    /// The max-min fair share calculation. `desired_bw` is called once per
    /// attached connection to get its current demand; the returned vec pairs
    /// each connection with the bandwidth it's granted. Connections that
    /// asked for 0 get 0; everyone else either gets exactly what they asked
    /// for (if that's below the fair share) or the fair share itself.
    ///
    /// `time` is unused by the allocation itself (the original threads it
    /// through only so `getDesiredBw`/`setAvailableBw` can log it) but is
    /// kept in the signature for parity with callers that need to timestamp
    /// their own bookkeeping.
    pub fn update_bw_shares(
        &self,
        _time: SimTime,
        prun: PRun,
        mut desired_bw: impl FnMut(ConnId) -> i64,
    ) -> Vec<(ConnId, Bandwidth)> {
        let conns = self.storage.get(prun).connections.clone();
        if conns.is_empty() {
            return Vec::new();
        }

        let mut result = Vec::with_capacity(conns.len());
        let mut bwb: Vec<(ConnId, i64)> = Vec::new();

        for &c in &conns {
            let desired = desired_bw(c);
            assert!(desired >= 0, "connection {c:?} has negative desired bandwidth");
            if desired == 0 {
                result.push((c, 0));
            } else {
                bwb.push((c, desired));
            }
        }

        let mut bw_low_sum: i64 = 0;
        let mut bw_share: i64 = 0;
        let max_rounds = conns.len();
        let mut round = 0;

        while !bwb.is_empty() && bw_share != (self.bandwidth as i64 - bw_low_sum) / bwb.len() as i64 {
            assert!(round < max_rounds, "bandwidth share calculation did not converge");
            assert!(bw_share >= 0);
            bw_share = (self.bandwidth as i64 - bw_low_sum) / bwb.len() as i64;

            let mut remaining = Vec::with_capacity(bwb.len());
            for (c, desired) in bwb {
                if desired <= bw_share {
                    bw_low_sum += desired;
                    result.push((c, desired as u64));
                } else {
                    remaining.push((c, desired));
                }
            }
            bwb = remaining;
            round += 1;
        }

        for (c, _) in bwb {
            result.push((c, bw_share as u64));
        }

        result
    }

    pub fn info(&self) -> String {
        format!("{} @{}B/s {:?}", self.description, self.bandwidth, self.rtt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn iface(bw: u64) -> Interface {
        Interface::new(InterfaceId::new(0), Duration::from_millis(20), bw, "eth0").unwrap()
    }

    #[test]
    fn idle_connections_get_zero() {
        let mut it = iface(1000);
        let a = ConnId::new(0);
        it.add_connection(a, PRun::Real);
        let shares = it.update_bw_shares(SimTime::ZERO, PRun::Real, |_| 0);
        assert_eq!(shares, vec![(a, 0)]);
    }

    #[test]
    fn equal_demand_splits_evenly() {
        let mut it = iface(1000);
        let a = ConnId::new(0);
        let b = ConnId::new(1);
        it.add_connection(a, PRun::Real);
        it.add_connection(b, PRun::Real);
        let shares: HashMap<_, _> = it
            .update_bw_shares(SimTime::ZERO, PRun::Real, |_| 10_000)
            .into_iter()
            .collect();
        assert_eq!(shares[&a], 500);
        assert_eq!(shares[&b], 500);
    }

    #[test]
    fn low_demand_connection_gets_exactly_what_it_asked_for() {
        let mut it = iface(1000);
        let low = ConnId::new(0);
        let hungry = ConnId::new(1);
        it.add_connection(low, PRun::Real);
        it.add_connection(hungry, PRun::Real);
        let shares: HashMap<_, _> = it
            .update_bw_shares(SimTime::ZERO, PRun::Real, |c| if c == low { 100 } else { 100_000 })
            .into_iter()
            .collect();
        assert_eq!(shares[&low], 100);
        assert_eq!(shares[&hungry], 900);
    }

    #[test]
    fn three_way_with_one_low_redistributes_remainder_to_other_two() {
        let mut it = iface(900);
        let low = ConnId::new(0);
        let a = ConnId::new(1);
        let b = ConnId::new(2);
        it.add_connection(low, PRun::Real);
        it.add_connection(a, PRun::Real);
        it.add_connection(b, PRun::Real);
        let shares: HashMap<_, _> = it
            .update_bw_shares(SimTime::ZERO, PRun::Real, |c| {
                if c == low {
                    100
                } else {
                    10_000
                }
            })
            .into_iter()
            .collect();
        assert_eq!(shares[&low], 100);
        assert_eq!(shares[&a], 400);
        assert_eq!(shares[&b], 400);
    }
}
