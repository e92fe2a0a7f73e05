//! Error kinds raised while building the inputs to a run.
//!
//! Invariant violations discovered *during* a run (a broken state machine, a
//! connection with zero available bandwidth while busy, a negative byte
//! count) are not represented here: per the design, those are fatal and are
//! raised with `assert!`/`panic!` so that tests relying on them being loud
//! actually see a hard failure rather than a swallowed `Result`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("transfer size must be > 0, got {0}")]
    NonPositiveSize(i64),
    #[error("transfer origin must not be empty")]
    EmptyOrigin,
    #[error("interface rtt must be > 0, got {0:?}")]
    NonPositiveRtt(std::time::Duration),
    #[error("interface bandwidth must be > 0, got {0}")]
    NonPositiveBandwidth(i64),
    #[error("interface description must not be empty")]
    EmptyInterfaceDescription,
}
