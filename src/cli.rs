use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Topology, parse_endpoint};
use crate::console::ChannelConfig;
use crate::inspect::FilterOrder;
use crate::pmtu::{MtuPhase, RunPlan, standard_phases};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "pmtu-check",
    about = "Check that BGP TCP MSS follows middle-router MTU changes (up, down, up)"
)]
pub struct Cli {
    /// Increase logging level
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Decrease logging level
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub quiet: u8,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Run the MTU up/down/up scenario against the lab routers
    Run(RunOpts),
    /// Print the client's current BGP session MSS once
    Mss(MssOpts),
    /// Run the scenario against simulated routers
    Simulate(SimOpts),
}

#[derive(Args, Debug, Clone)]
pub struct TopologyOpts {
    /// TOML file describing routers, transports and addresses
    #[arg(long)]
    pub topology: Option<PathBuf>,
    /// Client BGP address ("" disables the filter)
    #[arg(long, value_parser = endpoint)]
    pub client_address: Option<EndpointArg>,
    /// Server BGP address ("" disables the filter)
    #[arg(long, value_parser = endpoint)]
    pub server_address: Option<EndpointArg>,
    /// Middle router interface whose MTU is changed
    #[arg(long)]
    pub interface: Option<String>,
    /// Where the port filter goes in the session query
    #[arg(long, value_enum)]
    pub filter_order: Option<FilterOrder>,
}

/// A possibly blank address given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointArg(pub Option<IpAddr>);

fn endpoint(s: &str) -> Result<EndpointArg, String> {
    parse_endpoint(s)
        .map(EndpointArg)
        .map_err(|e| format!("{s:?}: {e}"))
}

impl TopologyOpts {
    /// Topology file (or built-in rig) with command-line overrides applied.
    pub fn resolve(&self) -> Result<Topology> {
        let mut topo = match &self.topology {
            Some(path) => Topology::load(path)?,
            None => Topology::default(),
        };
        if let Some(EndpointArg(addr)) = self.client_address {
            topo.client_address = addr;
        }
        if let Some(EndpointArg(addr)) = self.server_address {
            topo.server_address = addr;
        }
        if let Some(iface) = &self.interface {
            topo.middle_interface = iface.clone();
        }
        if let Some(order) = self.filter_order {
            topo.filter_order = order;
        }
        Ok(topo)
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConsoleOpts {
    /// Seconds to wait for any single command to return to the prompt
    #[arg(long, value_parser = seconds, default_value = "120")]
    pub read_timeout: Duration,
    /// Seconds to wait for each console's CLI to finish loading
    #[arg(long, value_parser = seconds, default_value = "120")]
    pub ready_timeout: Duration,
}

/// Non-negative, finite seconds, fractions allowed.
fn seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.trim().parse().map_err(|e| format!("{s:?}: {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{s:?}: {e}"))
}

impl ConsoleOpts {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            read_timeout: self.read_timeout,
            ..ChannelConfig::default()
        }
    }

    pub fn ready_timeout(&self) -> Duration {
        self.ready_timeout
    }
}

#[derive(Args, Debug, Clone)]
pub struct ScenarioOpts {
    /// High MTU
    #[arg(long, default_value_t = 9100)]
    pub himtu: u32,
    /// Low MTU
    #[arg(long, default_value_t = 2000)]
    pub lomtu: u32,
    /// How far below the high MTU the MSS may stay and still count as reached
    #[arg(long, default_value_t = 100)]
    pub mss_margin: u32,
    /// Timeout for initially reaching himss (seconds)
    #[arg(long, default_value_t = 30)]
    pub timeout_himss_reached: u64,
    /// Timeout for reaching lomss (seconds)
    #[arg(long, default_value_t = 30)]
    pub timeout_lomss_reached: u64,
    /// Timeout for restoring himss (seconds)
    #[arg(long, default_value_t = 300)]
    pub timeout_himss_restored: u64,
    /// Steady-state pause after each MTU change (seconds, 0 disables)
    #[arg(long, value_parser = seconds, default_value = "3")]
    pub steady_sleep: Duration,
    /// Pause between MSS samples (seconds)
    #[arg(long, value_parser = seconds, default_value = "1")]
    pub poll_interval: Duration,
    /// Keep bgp neighbors (skip `clear bgp neighbor *`)
    #[arg(long = "no-clear-bgp-neighbors", action = ArgAction::SetFalse)]
    pub clear_bgp_neighbors: bool,
}

impl ScenarioOpts {
    pub fn phases(&self) -> Vec<MtuPhase> {
        standard_phases(
            self.himtu,
            self.lomtu,
            self.mss_margin,
            [
                Duration::from_secs(self.timeout_himss_reached),
                Duration::from_secs(self.timeout_lomss_reached),
                Duration::from_secs(self.timeout_himss_restored),
            ],
        )
    }

    pub fn plan(&self, interface: &str) -> RunPlan {
        RunPlan {
            interface: interface.to_string(),
            settle: self.steady_sleep,
            poll_interval: self.poll_interval,
            clear_bgp_neighbors: self.clear_bgp_neighbors,
            preflight: true,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunOpts {
    #[command(flatten)]
    pub topo: TopologyOpts,
    #[command(flatten)]
    pub console: ConsoleOpts,
    #[command(flatten)]
    pub scenario: ScenarioOpts,
}

#[derive(Args, Debug, Clone)]
pub struct MssOpts {
    #[command(flatten)]
    pub topo: TopologyOpts,
    #[command(flatten)]
    pub console: ConsoleOpts,
}

#[derive(Args, Debug, Clone)]
pub struct SimOpts {
    #[command(flatten)]
    pub scenario: ScenarioOpts,
    /// Milliseconds before the simulated session picks up a new MTU
    #[arg(long, default_value_t = 2000)]
    pub lag_ms: u64,
    /// Fail this many session queries with a CLI error first
    #[arg(long, default_value_t = 0)]
    pub fail_queries: u32,
}
