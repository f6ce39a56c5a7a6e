//! End-to-end scenario tests: the full console stack against the simulated
//! three-router topology.

use std::time::Duration;

use pmtu_check::config::{DEFAULT_READY_BANNER, Topology};
use pmtu_check::console::{ChannelConfig, Marker, SessionChannel, SessionPool};
use pmtu_check::inspect::{Endpoints, InspectError, TcpSessionInspector};
use pmtu_check::pmtu::{MtuPhase, Orchestrator, PollOutcome, RunPlan, standard_phases};
use pmtu_check::sim::{SimConsole, SimNetwork};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// 1500 initially, then 9000 for the high MTU and 2000 for the low one.
fn stepped_mss(mtu: u32) -> u32 {
    if mtu >= 9000 { 9000 } else { mtu }
}

fn channel_config() -> ChannelConfig {
    ChannelConfig {
        read_timeout: Duration::from_secs(2),
        ..ChannelConfig::default()
    }
}

/// Pool of freshly spawned consoles, brought up through the loading banner.
fn bring_up(net: &SimNetwork, topo: &Topology) -> SessionPool {
    let ch = |host: &str| {
        SessionChannel::new(
            host,
            Box::new(SimConsole::new(host, net.clone())),
            channel_config(),
        )
    };
    let mut pool = SessionPool::new(
        ch(&topo.client.hostname),
        ch(&topo.middle.hostname),
        ch(&topo.server.hostname),
    );
    pool.bring_up(
        &Marker::Contains(DEFAULT_READY_BANNER.into()),
        &Marker::TrailingPrompt("# ".into()),
        Duration::from_secs(1),
    )
    .expect("consoles come up");
    pool
}

fn plan(topo: &Topology) -> RunPlan {
    RunPlan {
        interface: topo.middle_interface.clone(),
        settle: Duration::ZERO,
        poll_interval: Duration::from_millis(10),
        clear_bgp_neighbors: true,
        preflight: true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// High, low, high again: every phase converges inside its timeout.
#[test]
fn up_down_up_converges_in_every_phase() {
    let topo = Topology::default();
    let net = SimNetwork::builder()
        .interface(&topo.middle_interface)
        .initial_mss(1500)
        .lag(Duration::from_millis(40))
        .mss_for_mtu(stepped_mss)
        .build();
    let mut pool = bring_up(&net, &topo);

    let phases = [
        MtuPhase::high(9100, 100, Duration::from_secs(30)),
        MtuPhase::low(2000, Duration::from_secs(300)),
        MtuPhase::high_restored(9100, 100, Duration::from_secs(300)),
    ];
    let inspector = TcpSessionInspector::new(topo.endpoints());
    let mut orch = Orchestrator::new(&mut pool, inspector, plan(&topo));
    let report = orch.run(&phases).expect("run completes");

    assert!(report.passed(), "{report}");
    let outcomes = report.outcomes();
    assert_eq!(outcomes.len(), 3);
    let converged: Vec<u32> = outcomes
        .iter()
        .map(|o| match o {
            PollOutcome::Converged { mss, .. } => *mss,
            PollOutcome::TimedOut { .. } => panic!("phase timed out: {o:?}"),
        })
        .collect();
    assert_eq!(converged, vec![9000, 2000, 9000]);

    for (outcome, phase) in outcomes.iter().zip(&phases) {
        assert!(outcome.elapsed() <= phase.timeout);
    }
    for p in &report.phases {
        assert!(p.stats.first_mss.is_some());
        assert!(p.stats.samples >= 1);
        let offsets = &p.stats.sample_offsets;
        assert_eq!(offsets.len() as u64, p.stats.samples);
        assert!(offsets.windows(2).all(|w| w[0] <= w[1]), "{offsets:?}");
        // the converging sample is the last one, read just before the outcome
        assert!(offsets.last().is_some_and(|t| *t <= p.outcome.elapsed()));
    }
    assert_eq!(report.last_mss, Some(9000));
    assert_eq!(net.committed_mtu(), 9100);
    assert_eq!(net.clears(), 1);
}

/// A middle router that never changes the path: the first phase times out,
/// the run still goes through every phase and reports what it saw.
#[test]
fn stuck_mss_times_out_but_run_continues() {
    let topo = Topology::default();
    let net = SimNetwork::builder()
        .interface(&topo.middle_interface)
        .lag(Duration::from_secs(3600))
        .build();
    let mut pool = bring_up(&net, &topo);

    let short = Duration::from_millis(60);
    let phases = standard_phases(9100, 2000, 100, [short, short, short]);
    let mut no_clear = plan(&topo);
    no_clear.clear_bgp_neighbors = false;
    let inspector = TcpSessionInspector::new(topo.endpoints());
    let mut orch = Orchestrator::new(&mut pool, inspector, no_clear);
    let report = orch.run(&phases).expect("timeouts do not abort");

    let outcomes = report.outcomes();
    assert_eq!(outcomes.len(), 3);
    assert!(matches!(
        outcomes[0],
        PollOutcome::TimedOut {
            last_mss: Some(1500),
            ..
        }
    ));
    // 1500 is already below the low MTU
    assert!(outcomes[1].converged());
    assert!(!outcomes[2].converged());
    assert!(!report.passed());
    assert_eq!(report.last_mss, Some(1500));
}

/// Injected CLI errors on the session query are retried, not fatal.
#[test]
fn transient_query_errors_are_swallowed() {
    let topo = Topology::default();
    let net = SimNetwork::builder()
        .interface(&topo.middle_interface)
        .lag(Duration::from_millis(20))
        .fail_queries(5)
        .build();
    let mut pool = bring_up(&net, &topo);

    let inspector = TcpSessionInspector::new(topo.endpoints());
    let mut orch = Orchestrator::new(&mut pool, inspector, plan(&topo));
    let report = orch
        .run(&[MtuPhase::high(9100, 100, Duration::from_secs(10))])
        .expect("run completes");

    assert!(report.passed());
    assert_eq!(report.phases[0].stats.errors, 5);
}

/// Reading the MSS directly, with and without endpoint filters.
#[test]
fn inspector_reads_client_session() {
    let topo = Topology::default();
    let net = SimNetwork::builder()
        .interface(&topo.middle_interface)
        .build();
    let mut pool = bring_up(&net, &topo);

    let filtered = TcpSessionInspector::new(topo.endpoints());
    assert_eq!(filtered.current_mss(pool.client()).unwrap(), 1500);

    let elsewhere = TcpSessionInspector::new(Endpoints {
        server: "12.12.12.12".parse().ok(),
        client: None,
    });
    assert!(matches!(
        elsewhere.current_mss(pool.client()),
        Err(InspectError::NotFound(_))
    ));

    net.set_duplicate_session(true);
    let err = filtered.current_mss(pool.client()).unwrap_err();
    assert!(matches!(err, InspectError::Ambiguous { .. }));
}
