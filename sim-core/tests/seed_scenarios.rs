//! Black-box checks against the literal seed scenarios: bandwidth=8 Mbit/s
//! (1_048_576 B/s), rtt=20ms, MSS=1460, cwnd0=14600 unless stated otherwise.

use std::time::Duration;

use sim_core::event::PRun;
use sim_core::policy::{EarliestArrivalFirst, EarliestArrivalFirstMptcp, UseOneInterfaceOnly};
use sim_core::time::SimTime;
use sim_core::transfer_manager::{Runtime, TransferManager};

const MSS: f64 = 1460.0;
const CWND0: f64 = 14600.0;

fn slowstart_time(size: f64, rtt: f64, bw: f64) -> f64 {
    let mut ws = CWND0 / MSS;
    let mut remaining = size;
    let mut t = 0.0;
    while ws * MSS / rtt < bw && remaining > ws * MSS {
        remaining -= ws * MSS;
        t += rtt;
        ws *= 2.0;
    }
    t + remaining / bw
}

fn one_mib_interface(tm: &mut TransferManager) -> sim_core::InterfaceId {
    tm.add_interface(Duration::from_millis(20), 1_048_576, "if1").unwrap()
}

#[test]
fn single_transfer_one_interface_bounds_finish_time() {
    let mut tm = TransferManager::new();
    let if1 = one_mib_interface(&mut tm);
    tm.add_transfer(1024 * 1024, "example.com", false, None, None, None);
    tm.enable_roots(SimTime::ZERO);

    let mut sim = sim_core::Simulator::new();
    let tm = Runtime::new(tm, UseOneInterfaceOnly::new(if1)).run(&mut sim);

    let expected = 2.0 * 0.020 + slowstart_time(1024.0 * 1024.0, 0.020, 1_048_576.0);
    let actual = tm.finish_time().unwrap().as_secs_f64();
    assert!((actual - expected).abs() <= 0.020, "finish time {actual} not within 1 rtt of analytic {expected}");
}

#[test]
fn asymmetric_interfaces_beat_either_alone_under_earliest_arrival_first_mptcp() {
    let mut tm = TransferManager::new();
    let slow = tm.add_interface(Duration::from_millis(10), 1_048_576, "slow").unwrap();
    let fast = tm.add_interface(Duration::from_millis(500), 2_359_296, "fast").unwrap();
    tm.add_transfer(200 * 1024 * 1024, "example.com", false, None, None, None);
    tm.enable_roots(SimTime::ZERO);
    let mut sim = sim_core::Simulator::new();
    let mptcp_finish = Runtime::new(tm, EarliestArrivalFirstMptcp).run(&mut sim).finish_time().unwrap();

    let mut tm_slow = TransferManager::new();
    let if_slow = tm_slow.add_interface(Duration::from_millis(10), 1_048_576, "slow").unwrap();
    tm_slow.add_transfer(200 * 1024 * 1024, "example.com", false, None, None, None);
    tm_slow.enable_roots(SimTime::ZERO);
    let mut sim_slow = sim_core::Simulator::new();
    let slow_finish = Runtime::new(tm_slow, UseOneInterfaceOnly::new(if_slow)).run(&mut sim_slow).finish_time().unwrap();

    let mut tm_fast = TransferManager::new();
    let if_fast = tm_fast.add_interface(Duration::from_millis(500), 2_359_296, "fast").unwrap();
    tm_fast.add_transfer(200 * 1024 * 1024, "example.com", false, None, None, None);
    tm_fast.enable_roots(SimTime::ZERO);
    let mut sim_fast = sim_core::Simulator::new();
    let fast_finish = Runtime::new(tm_fast, UseOneInterfaceOnly::new(if_fast)).run(&mut sim_fast).finish_time().unwrap();

    let _ = slow;
    let _ = fast;
    assert!(mptcp_finish < slow_finish.min(fast_finish));
}

#[test]
fn hundred_node_forest_under_earliest_arrival_first_mptcp_stays_within_bound() {
    let mut tm = TransferManager::new();
    let if1 = tm.add_interface(Duration::from_millis(20), 1_048_576, "if1").unwrap();
    let if2 = tm.add_interface(Duration::from_millis(20), 1_048_576, "if2").unwrap();

    let root = tm.add_transfer(4_096, "example.com", false, None, None, None);
    let leaf_size = 64 * 1024u64;
    let mut total_bytes = 4_096u64;
    for _ in 0..99 {
        let child = tm.add_transfer(leaf_size, "example.com", false, None, None, None);
        tm.add_child(root, child);
        total_bytes += leaf_size;
    }
    tm.enable_roots(SimTime::ZERO);

    let mut sim = sim_core::Simulator::new();
    let tm = Runtime::new(tm, EarliestArrivalFirstMptcp).run(&mut sim);

    assert!(tm.all_finished());
    let max_rtt = 0.020;
    let lower_bound = total_bytes as f64 / (1_048_576.0 + 1_048_576.0);
    assert!(
        tm.finish_time().unwrap().as_secs_f64() <= lower_bound + 4.0 * max_rtt + 5.0,
        "forest finished slower than the analytic bound allows"
    );
    let _ = (if1, if2);
}

#[test]
fn distinct_origin_children_split_across_two_connections() {
    let rtt = 0.020;
    let bw = 1_048_576.0;
    let root_size = 1024.0 * 1024.0;
    let child_size = 200.0 * 1024.0;

    let mut tm = TransferManager::new();
    let if1 = tm.add_interface(Duration::from_millis(20), 1_048_576, "if1").unwrap();
    let root = tm.add_transfer(root_size as u64, "a.example.com", false, None, None, None);
    let c1 = tm.add_transfer(child_size as u64, "b.example.com", false, None, None, None);
    let c2 = tm.add_transfer(child_size as u64, "c.example.com", false, None, None, None);
    tm.add_child(root, c1);
    tm.add_child(root, c2);
    tm.enable_roots(SimTime::ZERO);

    let mut sim = sim_core::Simulator::new();
    let tm = Runtime::new(tm, EarliestArrivalFirst).run(&mut sim);

    assert!(tm.all_finished());
    // distinct origins must never share a connection
    assert_eq!(tm.real_connection_ids().len(), 3);

    let t0 = 2.0 * rtt + slowstart_time(root_size, rtt, bw);
    let expected_child_finish = t0 + 2.0 * rtt + slowstart_time(child_size, rtt, bw / 2.0);
    for (label, child) in [("child 1", c1), ("child 2", c2)] {
        let actual = tm.transfer(child).times(PRun::Real).finish_time.unwrap().as_secs_f64();
        assert!(
            (actual - expected_child_finish).abs() <= 2.0 * rtt,
            "{label} finish {actual} not within 2 rtt of analytic {expected_child_finish}"
        );
    }
    let _ = if1;
}

#[test]
fn pipelined_same_origin_children_share_the_parent_connection() {
    let rtt = 0.020;
    let bw = 1_048_576.0;
    let root_size = 1024.0 * 1024.0;
    let child_size = 200.0 * 1024.0;

    let mut tm = TransferManager::new();
    tm.add_interface(Duration::from_millis(20), 1_048_576, "if1").unwrap();
    let root = tm.add_transfer(root_size as u64, "example.com", false, None, None, None);
    let c1 = tm.add_transfer(child_size as u64, "example.com", false, None, None, None);
    let c2 = tm.add_transfer(child_size as u64, "example.com", false, None, None, None);
    tm.add_child(root, c1);
    tm.add_child(root, c2);
    tm.enable_roots(SimTime::ZERO);

    let mut sim = sim_core::Simulator::new();
    let tm = Runtime::new(tm, EarliestArrivalFirst).run(&mut sim);

    assert!(tm.all_finished());
    // same origin as the root's now-idle connection, so both children pipeline onto it
    assert_eq!(tm.real_connection_ids().len(), 1);

    let t0 = 2.0 * rtt + slowstart_time(root_size, rtt, bw);
    let expected = t0 + 2.0 * rtt + slowstart_time(2.0 * child_size, rtt, bw);
    let last_finish = [c1, c2]
        .iter()
        .map(|&c| tm.transfer(c).times(PRun::Real).finish_time.unwrap().as_secs_f64())
        .fold(0.0_f64, f64::max);
    assert!(
        (last_finish - expected).abs() <= 2.0 * rtt,
        "pipelined children finish {last_finish} not within 2 rtt of analytic {expected}"
    );
}

#[test]
fn three_transfer_no_pipeline_second_child_matches_split_bandwidth_bound() {
    let rtt = 0.020;
    let bw = 1_048_576.0;
    let root_size = 1024.0 * 1024.0;
    let child_size = 200.0 * 1024.0;

    let mut tm = TransferManager::new();
    tm.add_interface(Duration::from_millis(20), 1_048_576, "if1").unwrap();
    let root = tm.add_transfer(root_size as u64, "example.com", false, None, None, None);
    let c1 = tm.add_transfer(child_size as u64, "children.example.com", false, None, None, None);
    let c2 = tm.add_transfer(child_size as u64, "children.example.com", false, None, None, None);
    tm.add_child(root, c1);
    tm.add_child(root, c2);
    tm.enable_roots(SimTime::ZERO);

    let mut sim = sim_core::Simulator::new();
    let tm = Runtime::new(tm, EarliestArrivalFirst).run(&mut sim);

    assert!(tm.all_finished());
    // children share an origin with each other but not with the root, so the
    // first child has no warm connection to inherit and the second prefers a
    // concurrent fresh connection over queueing behind the first
    assert_eq!(tm.real_connection_ids().len(), 3);

    let t0 = 2.0 * rtt + slowstart_time(root_size, rtt, bw);
    let expected_c2 = t0 + 2.0 * rtt + slowstart_time(child_size, rtt, bw / 2.0);
    let actual_c2 = tm.transfer(c2).times(PRun::Real).finish_time.unwrap().as_secs_f64();
    assert!(
        (actual_c2 - expected_c2).abs() <= 2.0 * rtt,
        "transfer #2 finish {actual_c2} not within 2 rtt of analytic {expected_c2}"
    );
}
