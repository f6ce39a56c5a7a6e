use std::fmt;
use std::time::Duration;

use tracing::{info, warn};

use super::phase::{MtuPhase, PhaseKind};
use crate::stats::PollStats;

/// Terminal result of waiting for one phase to converge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Converged { mss: u32, elapsed: Duration },
    TimedOut { last_mss: Option<u32>, elapsed: Duration },
}

impl PollOutcome {
    pub fn converged(&self) -> bool {
        matches!(self, PollOutcome::Converged { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match *self {
            PollOutcome::Converged { elapsed, .. } | PollOutcome::TimedOut { elapsed, .. } => {
                elapsed
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub kind: PhaseKind,
    pub mtu: u32,
    /// wall time of the configure/commit sequence
    pub configure_time: Duration,
    pub outcome: PollOutcome,
    pub stats: PollStats,
}

impl PhaseReport {
    pub fn new(phase: &MtuPhase, configure_time: Duration, outcome: PollOutcome, stats: PollStats) -> Self {
        Self {
            kind: phase.kind,
            mtu: phase.mtu,
            configure_time,
            outcome,
            stats,
        }
    }

    pub fn log(&self) {
        match self.outcome {
            PollOutcome::Converged { mss, elapsed } => info!(
                phase = %self.kind,
                mtu = self.mtu,
                mss,
                samples = self.stats.samples,
                not_found = self.stats.not_found,
                errors = self.stats.errors,
                "ok - {} in {:.3}sec",
                self.kind.label(),
                elapsed.as_secs_f64()
            ),
            PollOutcome::TimedOut { last_mss, elapsed } => warn!(
                phase = %self.kind,
                mtu = self.mtu,
                last_mss = ?last_mss,
                samples = self.stats.samples,
                not_found = self.stats.not_found,
                errors = self.stats.errors,
                "FAIL - not {} after {:.3}sec",
                self.kind.label(),
                elapsed.as_secs_f64()
            ),
        }
    }
}

/// Everything a run produced, kept even when it stops early.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub phases: Vec<PhaseReport>,
    /// last MSS read anywhere in the run, for post-mortem
    pub last_mss: Option<u32>,
}

impl RunReport {
    pub fn outcomes(&self) -> Vec<PollOutcome> {
        self.phases.iter().map(|p| p.outcome).collect()
    }

    pub fn passed(&self) -> bool {
        !self.phases.is_empty() && self.phases.iter().all(|p| p.outcome.converged())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.phases {
            match p.outcome {
                PollOutcome::Converged { mss, elapsed } => writeln!(
                    f,
                    "{:<14} mtu={:<5} CONVERGED mss={} in {:.3}s ({} samples)",
                    p.kind.to_string(),
                    p.mtu,
                    mss,
                    elapsed.as_secs_f64(),
                    p.stats.attempts()
                )?,
                PollOutcome::TimedOut { last_mss, elapsed } => writeln!(
                    f,
                    "{:<14} mtu={:<5} TIMED OUT last_mss={} after {:.3}s ({} samples)",
                    p.kind.to_string(),
                    p.mtu,
                    last_mss.map_or_else(|| "none".to_string(), |m| m.to_string()),
                    elapsed.as_secs_f64(),
                    p.stats.attempts()
                )?,
            }
        }
        write!(
            f,
            "last observed mss: {}",
            self.last_mss
                .map_or_else(|| "none".to_string(), |m| m.to_string())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(kind: PhaseKind, outcome: PollOutcome) -> PhaseReport {
        PhaseReport {
            kind,
            mtu: 9100,
            configure_time: Duration::ZERO,
            outcome,
            stats: PollStats::new(),
        }
    }

    #[test]
    fn passes_only_when_every_phase_converged() {
        let ok = PollOutcome::Converged {
            mss: 9000,
            elapsed: Duration::from_secs(1),
        };
        let late = PollOutcome::TimedOut {
            last_mss: Some(1500),
            elapsed: Duration::from_secs(30),
        };
        let mut report = RunReport::default();
        assert!(!report.passed());
        report.phases.push(phase(PhaseKind::High, ok));
        assert!(report.passed());
        report.phases.push(phase(PhaseKind::Low, late));
        assert!(!report.passed());
        assert_eq!(report.outcomes(), vec![ok, late]);
    }

    #[test]
    fn summary_mentions_last_mss() {
        let report = RunReport {
            phases: vec![phase(
                PhaseKind::High,
                PollOutcome::TimedOut {
                    last_mss: None,
                    elapsed: Duration::from_millis(1500),
                },
            )],
            last_mss: Some(1500),
        };
        let text = report.to_string();
        assert!(text.contains("TIMED OUT last_mss=none after 1.500s"));
        assert!(text.ends_with("last observed mss: 1500"));
    }
}
