use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::phase::MtuPhase;
use super::report::{PhaseReport, PollOutcome, RunReport};
use super::{Fatal, RunAborted, RunPlan};
use crate::console::{Role, SessionPool};
use crate::console::command::{CliCommand, format_command};
use crate::inspect::{InspectError, TcpSessionInspector};
use crate::stats::PollStats;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Drives the MTU sequence on the middle router and watches the client's MSS.
pub struct Orchestrator<'a> {
    pool: &'a mut SessionPool,
    inspector: TcpSessionInspector,
    plan: RunPlan,
    last_mss: Option<u32>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(pool: &'a mut SessionPool, inspector: TcpSessionInspector, plan: RunPlan) -> Self {
        Self {
            pool,
            inspector,
            plan,
            last_mss: None,
        }
    }

    /// Last MSS read so far, across phases and failed samples.
    pub fn last_mss(&self) -> Option<u32> {
        self.last_mss
    }

    /// Run every phase in order. Timeouts are recorded and the run moves on;
    /// only fatal conditions stop it early.
    pub fn run(&mut self, phases: &[MtuPhase]) -> Result<RunReport, RunAborted> {
        let mut report = RunReport::default();

        if self.plan.preflight
            && let Err(cause) = self.preflight()
        {
            return Err(self.abort("pre-flight", report, cause));
        }

        for (idx, phase) in phases.iter().enumerate() {
            match self.run_phase(phase, idx == 0) {
                Ok(phase_report) => {
                    phase_report.log();
                    report.phases.push(phase_report);
                }
                Err(cause) => {
                    let stage = format!("{} phase (mtu {})", phase.kind, phase.mtu);
                    return Err(self.abort(&stage, report, cause));
                }
            }
        }

        report.last_mss = self.last_mss;
        Ok(report)
    }

    fn abort(&self, stage: &str, mut report: RunReport, cause: Fatal) -> RunAborted {
        report.last_mss = self.last_mss;
        warn!(stage, last_mss = ?self.last_mss, error = %cause, "aborting run");
        RunAborted {
            stage: stage.to_string(),
            report,
            cause,
        }
    }

    /// Confirm server and client consoles answer before touching anything.
    pub fn preflight(&mut self) -> Result<(), Fatal> {
        let cmd = format_command(&CliCommand::ShowBgpSummary);
        for role in [Role::Server, Role::Client] {
            let ch = self.pool.get_mut(role);
            let out = ch.send(&cmd, true)??;
            debug!(console = ch.name(), "bgp summary:\n{}", out);
        }
        Ok(())
    }

    fn run_phase(&mut self, phase: &MtuPhase, first: bool) -> Result<PhaseReport, Fatal> {
        info!(phase = %phase.kind, mtu = phase.mtu, target = %phase.threshold, "starting phase");
        let configure_time = self.set_middle_mtu(phase.mtu)?;

        if first && self.plan.clear_bgp_neighbors {
            self.clear_bgp_neighbors()?;
        }
        self.steady_sleep();

        let (outcome, stats) = self.poll_until_converged(phase)?;
        Ok(PhaseReport::new(phase, configure_time, outcome, stats))
    }

    /// Set the middle router's interface MTU and commit. Any CLI error is fatal.
    pub fn set_middle_mtu(&mut self, mtu: u32) -> Result<Duration, Fatal> {
        let start = Instant::now();
        let script = [
            CliCommand::Configure,
            CliCommand::InterfaceMtu {
                interface: self.plan.interface.clone(),
                mtu,
            },
            CliCommand::Commit,
            CliCommand::Exit,
        ];
        let middle = self.pool.middle();
        for cmd in &script {
            middle.send(&format_command(cmd), false)??;
        }
        let elapsed = start.elapsed();
        info!(mtu, "mtu set in {:.3} seconds", elapsed.as_secs_f64());
        Ok(elapsed)
    }

    /// Force the BGP session to renegotiate its MSS.
    pub fn clear_bgp_neighbors(&mut self) -> Result<(), Fatal> {
        let cmd = format_command(&CliCommand::ClearBgpNeighbors);
        self.pool.client().send(&cmd, false)??;
        info!("cleared bgp neighbors");
        Ok(())
    }

    fn steady_sleep(&self) {
        if !self.plan.settle.is_zero() {
            info!(
                "sleep {:.3} seconds in steady state",
                self.plan.settle.as_secs_f64()
            );
            thread::sleep(self.plan.settle);
        }
    }

    /// Sample the MSS until the phase threshold holds or the deadline passes.
    /// The deadline is only checked between samples.
    fn poll_until_converged(
        &mut self,
        phase: &MtuPhase,
    ) -> Result<(PollOutcome, PollStats), Fatal> {
        let mut stats = PollStats::new();
        loop {
            match self.inspector.current_mss(self.pool.client()) {
                Ok(mss) => {
                    stats.add_sample(mss);
                    self.last_mss = Some(mss);
                    info!(mss, target = %phase.threshold, "waiting for mss");
                    if phase.threshold.reached(mss) {
                        let outcome = PollOutcome::Converged {
                            mss,
                            elapsed: stats.elapsed(),
                        };
                        return Ok((outcome, stats));
                    }
                }
                Err(e) if e.is_fatal() => return Err(Fatal::Inspect(e)),
                Err(InspectError::NotFound(_)) => {
                    stats.inc_not_found();
                    info!("no relevant bgp session currently established");
                }
                Err(e) => {
                    stats.inc_errors();
                    warn!(error = %e, "session query failed, will try again later");
                }
            }

            let elapsed = stats.elapsed();
            if elapsed >= phase.timeout {
                let outcome = PollOutcome::TimedOut {
                    last_mss: stats.last_mss,
                    elapsed,
                };
                return Ok((outcome, stats));
            }
            let pause = self
                .plan
                .poll_interval
                .max(MIN_POLL_INTERVAL)
                .min(phase.timeout - elapsed);
            thread::sleep(pause);
        }
    }
}
