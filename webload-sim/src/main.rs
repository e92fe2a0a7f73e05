//! `webload-sim`: estimate web page load time from a recorded HAR trace,
//! over one or two network interfaces, under a chosen transport policy.
//!
//! Grounded on `mainSingle.py`'s `__main__` block for the overall shape
//! (build interfaces, pick a policy by string key, run, print a CSV summary
//! line, dump the JSON result) and on the teacher's `main`/`core::main`
//! split for turning that into an `anyhow::Result`-returning `main` with
//! logging initialized first.

mod config;
mod har;
mod output;

use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};
use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sim_core::ids::InterfaceId;
use sim_core::policy::{
    EarliestArrivalFirst, EarliestArrivalFirstMptcp, MptcpFullMeshIfList, MptcpFullMeshRandomOrder, Policy, RoundRobin,
    UseOneInterfaceOnly,
};
use sim_core::simulator::Simulator;
use sim_core::time::SimTime;
use sim_core::transfer_manager::{Runtime, TransferManager};

use config::{CliOptions, PolicyKey};

/// Dispatches to one of the six concrete policies by key. Each arm owns its
/// concrete `Policy` type, so `Runtime<P>` still gets a single static type
/// per run instead of a trait object.
fn run_with_policy(
    tm: TransferManager,
    sim: &mut Simulator,
    policy_key: PolicyKey,
    if1: InterfaceId,
    if2: InterfaceId,
    rng_seed: u64,
) -> (TransferManager, String) {
    macro_rules! run {
        ($policy:expr) => {{
            let rt = Runtime::new(tm, $policy);
            let name = rt.policy.name().to_string();
            (rt.run(sim), name)
        }};
    }
    match policy_key {
        PolicyKey::Only11 => run!(UseOneInterfaceOnly::new(if1)),
        PolicyKey::Only12 => run!(UseOneInterfaceOnly::new(if2)),
        PolicyKey::Rr1 => run!(RoundRobin::with_order(vec![if1, if2])),
        PolicyKey::Rr2 => run!(RoundRobin::with_order(vec![if2, if1])),
        PolicyKey::Eaf => run!(EarliestArrivalFirst),
        PolicyKey::Mptcp => run!(MptcpFullMeshRandomOrder::new(ChaCha8Rng::seed_from_u64(rng_seed))),
        PolicyKey::Mptcp1 => run!(MptcpFullMeshIfList),
        PolicyKey::EafMptcp => run!(EarliestArrivalFirstMptcp),
    }
}

fn main() -> Result<()> {
    let opts = CliOptions::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(opts.default_log_filter())).init();

    config::validate(&opts)?;

    let mut tm = TransferManager::new();
    let if1_spec = opts.iface1();
    let if2_spec = opts.iface2();
    let if1 = tm.add_interface(if1_spec.rtt(), if1_spec.bandwidth, "if1").context("building interface 1")?;
    let if2 = tm.add_interface(if2_spec.rtt(), if2_spec.bandwidth, "if2").context("building interface 2")?;

    let har_file = File::open(&opts.har_file).with_context(|| format!("opening HAR file {}", opts.har_file.display()))?;
    let origin = har::load(BufReader::new(har_file), &mut tm, false).context("loading HAR file")?;
    tm.enable_roots(SimTime::ZERO);

    let mut sim = Simulator::new();
    let (tm, policy_name) = run_with_policy(tm, &mut sim, opts.policy, if1, if2, opts.rng_seed);

    let finish_time = tm.finish_time().context("run ended without a finish time")?;

    let (date, time_tag) = output::date_time_tag_from_filename(&opts.har_file);
    println!(
        "{}",
        output::csv_line(
            &origin,
            &date,
            &time_tag,
            &policy_name,
            if1_spec.bandwidth,
            if1_spec.rtt_ms,
            if2_spec.bandwidth,
            if2_spec.rtt_ms,
            finish_time,
        )
    );

    let out_file = File::create(&opts.output_file).with_context(|| format!("creating output file {}", opts.output_file.display()))?;
    output::write_json(&tm, &policy_name, &[(if1, if1_spec.rtt_ms), (if2, if2_spec.rtt_ms)], out_file).context("writing JSON output")?;

    Ok(())
}
