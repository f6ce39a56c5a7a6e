use std::time::Duration;

use thiserror::Error;

use crate::console::{CommandError, TransportError};
use crate::inspect::InspectError;

pub mod phase;
pub mod report;
pub mod runner;

pub use phase::{MtuPhase, PhaseKind, Threshold, standard_phases};
pub use report::{PhaseReport, PollOutcome, RunReport};
pub use runner::Orchestrator;

/// How a run is carried out, apart from the phases themselves.
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// middle router interface whose MTU is changed
    pub interface: String,
    /// fixed pause after reconfiguring, before polling starts
    pub settle: Duration,
    pub poll_interval: Duration,
    /// `clear bgp neighbor *` on the client before the first poll
    pub clear_bgp_neighbors: bool,
    /// `show bgp summary` on server and client before the first phase
    pub preflight: bool,
}

impl Default for RunPlan {
    fn default() -> Self {
        Self {
            interface: String::new(),
            settle: Duration::from_secs(3),
            poll_interval: Duration::from_secs(1),
            clear_bgp_neighbors: true,
            preflight: true,
        }
    }
}

/// Conditions that end a run.
#[derive(Debug, Error)]
pub enum Fatal {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("command rejected: {0}")]
    Rejected(#[from] CommandError),
    #[error(transparent)]
    Inspect(InspectError),
}

#[derive(Debug, Error)]
#[error("run aborted during {stage}: {cause}")]
pub struct RunAborted {
    pub stage: String,
    /// phases finished before the abort, and the last MSS seen
    pub report: RunReport,
    #[source]
    pub cause: Fatal,
}
