use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{error, info};

use crate::cli::{MssOpts, RunOpts, SimOpts};
use crate::config::{NodeConfig, Topology};
use crate::console::{ChannelConfig, Marker, SessionChannel, SessionPool};
use crate::inspect::{InspectError, TcpSessionInspector};
use crate::pmtu::{MtuPhase, Orchestrator, RunPlan, RunReport};
use crate::sim::{SimConsole, SimNetwork};

/// Full scenario against the lab. Returns whether every phase converged.
pub fn run(opts: RunOpts) -> Result<bool> {
    let topo = opts.topo.resolve()?;
    let chan = opts.console.channel_config();

    let mut pool = SessionPool::new(
        open_channel(&topo.client, &chan)?,
        open_channel(&topo.middle, &chan)?,
        open_channel(&topo.server, &chan)?,
    );
    pool.bring_up(
        &Marker::Contains(topo.ready_banner.clone()),
        &chan.prompt,
        opts.console.ready_timeout(),
    )
    .context("bringing up consoles")?;

    let plan = opts.scenario.plan(&topo.middle_interface);
    execute(&mut pool, &topo, plan, &opts.scenario.phases())
}

/// One MSS reading from the client console.
pub fn mss(opts: MssOpts) -> Result<()> {
    let topo = opts.topo.resolve()?;
    let chan = opts.console.channel_config();
    let mut client = open_channel(&topo.client, &chan)?;
    client.await_ready(
        &Marker::Contains(topo.ready_banner.clone()),
        &chan.prompt,
        opts.console.ready_timeout(),
    )?;

    match inspector(&topo).current_mss(&mut client) {
        Ok(mss) => println!("{mss}"),
        Err(InspectError::NotFound(endpoints)) => {
            println!("none");
            info!(%endpoints, "no relevant bgp session currently established");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Full scenario against simulated routers, through the same console stack.
pub fn simulate(opts: SimOpts) -> Result<bool> {
    let topo = Topology::default();
    let net = SimNetwork::builder()
        .interface(&topo.middle_interface)
        .lag(Duration::from_millis(opts.lag_ms))
        .fail_queries(opts.fail_queries)
        .build();
    let chan = ChannelConfig {
        read_timeout: Duration::from_secs(5),
        ..ChannelConfig::default()
    };
    let channel = |node: &NodeConfig| {
        SessionChannel::new(
            &node.hostname,
            Box::new(SimConsole::new(&node.hostname, net.clone())),
            chan.clone(),
        )
    };
    let mut pool = SessionPool::new(
        channel(&topo.client),
        channel(&topo.middle),
        channel(&topo.server),
    );
    pool.bring_up(
        &Marker::Contains(topo.ready_banner.clone()),
        &chan.prompt,
        Duration::from_secs(5),
    )?;

    let plan = opts.scenario.plan(&topo.middle_interface);
    execute(&mut pool, &topo, plan, &opts.scenario.phases())
}

fn execute(
    pool: &mut SessionPool,
    topo: &Topology,
    plan: RunPlan,
    phases: &[MtuPhase],
) -> Result<bool> {
    let mut orch = Orchestrator::new(pool, inspector(topo), plan);
    match orch.run(phases) {
        Ok(report) => {
            print_report(&report);
            Ok(report.passed())
        }
        Err(aborted) => {
            print_report(&aborted.report);
            error!(stage = %aborted.stage, "{}", aborted.cause);
            Err(aborted.into())
        }
    }
}

fn print_report(report: &RunReport) {
    println!("{report}");
}

fn inspector(topo: &Topology) -> TcpSessionInspector {
    TcpSessionInspector {
        order: topo.filter_order,
        port: topo.port.clone(),
        ..TcpSessionInspector::new(topo.endpoints())
    }
}

fn open_channel(node: &NodeConfig, chan: &ChannelConfig) -> Result<SessionChannel> {
    let transport = node
        .open()
        .with_context(|| format!("opening console for {}", node.hostname))?;
    Ok(SessionChannel::new(&node.hostname, transport, chan.clone()))
}
