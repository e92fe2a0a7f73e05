//! CLI parsing.
//!
//! Grounded on `mainSingle.py`'s `__main__` block: two `(unit, value, rtt-ms)`
//! interface triples, a policy key from a closed set, an input HAR path and
//! an output JSON path. Restructured as a `clap` derive struct the way the
//! teacher's `core/configuration.rs` turns positional argv parsing into a
//! typed CLI surface.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};

const START_HELP_TEXT: &str = "\
    Estimate web page load time over one or two network interfaces under a \
    chosen transport policy.";

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BandwidthUnit {
    /// megabit/s: value * 1048576 / 8 bytes/s
    M,
    /// kilobit/s: value * 1024 / 8 bytes/s
    K,
}

impl BandwidthUnit {
    pub fn to_bytes_per_sec(self, value: f64) -> u64 {
        let bytes = match self {
            BandwidthUnit::M => value * 1_048_576.0 / 8.0,
            BandwidthUnit::K => value * 1_024.0 / 8.0,
        };
        bytes.round() as u64
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum PolicyKey {
    #[value(name = "only1-1")]
    Only11,
    #[value(name = "only1-2")]
    Only12,
    #[value(name = "rr-1")]
    Rr1,
    #[value(name = "rr-2")]
    Rr2,
    Eaf,
    Mptcp,
    #[value(name = "mptcp-1")]
    Mptcp1,
    #[value(name = "eaf-mptcp")]
    EafMptcp,
}

#[derive(Debug, Clone, Parser)]
#[clap(name = "webload-sim", about = START_HELP_TEXT)]
pub struct CliOptions {
    /// Bandwidth unit for interface 1
    pub bw1_unit: BandwidthUnit,
    /// Bandwidth value for interface 1, in `bw1_unit`
    pub bw1_value: f64,
    /// Round-trip time for interface 1, in milliseconds
    pub rtt1_ms: f64,

    /// Bandwidth unit for interface 2
    pub bw2_unit: BandwidthUnit,
    /// Bandwidth value for interface 2, in `bw2_unit`
    pub bw2_value: f64,
    /// Round-trip time for interface 2, in milliseconds
    pub rtt2_ms: f64,

    /// Scheduling policy
    pub policy: PolicyKey,

    /// Input HAR file
    pub har_file: PathBuf,

    /// Output NDJSON file
    pub output_file: PathBuf,

    /// Seed for the random interface order mptcp uses (determinism fix, see DESIGN.md)
    #[clap(long, default_value_t = 0xC0FFEE)]
    pub rng_seed: u64,

    /// Increase log verbosity (-v for info, -vv for debug). Overridden by RUST_LOG if set.
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub struct IfaceSpec {
    pub bandwidth: u64,
    pub rtt_ms: f64,
}

impl CliOptions {
    pub fn iface1(&self) -> IfaceSpec {
        IfaceSpec {
            bandwidth: self.bw1_unit.to_bytes_per_sec(self.bw1_value),
            rtt_ms: self.rtt1_ms,
        }
    }

    pub fn iface2(&self) -> IfaceSpec {
        IfaceSpec {
            bandwidth: self.bw2_unit.to_bytes_per_sec(self.bw2_value),
            rtt_ms: self.rtt2_ms,
        }
    }

    /// The `env_logger` default filter implied by `-v`/`-vv`, absent a `RUST_LOG` override.
    pub fn default_log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

impl IfaceSpec {
    pub fn rtt(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.rtt_ms * 0.001)
    }
}

pub fn validate(opts: &CliOptions) -> Result<()> {
    if opts.bw1_value <= 0.0 || opts.bw2_value <= 0.0 {
        bail!("interface bandwidth must be positive");
    }
    if opts.rtt1_ms <= 0.0 || opts.rtt2_ms <= 0.0 {
        bail!("interface rtt must be positive");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn megabit_conversion_matches_mainsingle_mbit() {
        // mainSingle.py's mbit(x) = x * 1024 * 1024 / 8
        assert_eq!(BandwidthUnit::M.to_bytes_per_sec(8.0), 1_048_576);
    }

    #[test]
    fn kilobit_conversion_matches_mainsingle_kbit() {
        // mainSingle.py's kbit(x) = x * 1024 / 8
        assert_eq!(BandwidthUnit::K.to_bytes_per_sec(8.0), 1_024);
    }

    #[test]
    fn cli_parses_positional_args_in_mainsingle_order() {
        let opts = CliOptions::parse_from([
            "webload-sim",
            "m",
            "10",
            "20",
            "k",
            "512",
            "40",
            "eaf",
            "trace.har",
            "out.json",
        ]);
        assert_eq!(opts.bw1_value, 10.0);
        assert_eq!(opts.rtt1_ms, 20.0);
        assert_eq!(opts.bw2_value, 512.0);
        assert_eq!(opts.rtt2_ms, 40.0);
        assert_eq!(opts.policy, PolicyKey::Eaf);
        assert_eq!(opts.har_file, PathBuf::from("trace.har"));
        assert_eq!(opts.output_file, PathBuf::from("out.json"));
    }

    #[test]
    fn policy_keys_accept_mainsingle_string_spelling() {
        for (raw, expected) in [
            ("only1-1", PolicyKey::Only11),
            ("only1-2", PolicyKey::Only12),
            ("rr-1", PolicyKey::Rr1),
            ("rr-2", PolicyKey::Rr2),
            ("eaf", PolicyKey::Eaf),
            ("mptcp", PolicyKey::Mptcp),
            ("mptcp-1", PolicyKey::Mptcp1),
            ("eaf-mptcp", PolicyKey::EafMptcp),
        ] {
            let opts = CliOptions::parse_from(["webload-sim", "m", "1", "1", "m", "1", "1", raw, "a.har", "o.json"]);
            assert_eq!(opts.policy, expected, "policy key {raw} did not parse as expected");
        }
    }

    #[test]
    fn validate_rejects_non_positive_bandwidth() {
        let mut opts = CliOptions::parse_from(["webload-sim", "m", "1", "1", "m", "1", "1", "eaf", "a.har", "o.json"]);
        opts.bw1_value = 0.0;
        assert!(validate(&opts).is_err());
    }
}
