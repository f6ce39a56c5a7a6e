//! In-process stand-in for the three-router topology.
//!
//! Every [`SimConsole`] speaks a small DNOS-like CLI (echo, `host# ` and
//! `host(cfg)# ` prompts, `ERROR:` replies) and shares one [`SimNetwork`]
//! whose BGP session picks up a newly committed MTU after a lag.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::DEFAULT_READY_BANNER;
use crate::console::command::{CliCommand, CommandParseError, parse_command};
use crate::transport::Transport;

const CLIENT_ADDR: &str = "18.18.18.18";
const SERVER_ADDR: &str = "11.11.11.11";

/// MSS the session settles on for a path MTU: IP and TCP headers plus options.
pub fn default_mss_for_mtu(mtu: u32) -> u32 {
    mtu.saturating_sub(100)
}

struct NetState {
    interface: String,
    committed_mtu: u32,
    mss: u32,
    /// MSS the session moves to, and when
    pending: Option<(Instant, u32)>,
    session_down_until: Option<Instant>,
    lag: Duration,
    mss_for_mtu: fn(u32) -> u32,
    fail_queries: u32,
    garble_queries: u32,
    duplicate: bool,
    clears: u32,
}

impl NetState {
    fn advance(&mut self, now: Instant) {
        if let Some((due, mss)) = self.pending
            && now >= due
        {
            self.mss = mss;
            self.pending = None;
        }
        if let Some(until) = self.session_down_until
            && now >= until
        {
            self.session_down_until = None;
        }
    }

    fn session_rows(&self) -> Vec<String> {
        let mut rows = vec![
            "| Protocol | Local Address | Remote Address | State | MSS |".to_string(),
            "| TCP | 18.18.18.18:22 | 10.0.0.1:60001 | ESTABLISHED | 1460 |".to_string(),
        ];
        if self.session_down_until.is_none() {
            rows.push(format!(
                "| TCP | {CLIENT_ADDR}:179 | {SERVER_ADDR}:40112 | ESTABLISHED | {} |",
                self.mss
            ));
            if self.duplicate {
                rows.push(format!(
                    "| TCP | {CLIENT_ADDR}:179 | {SERVER_ADDR}:40113 | ESTABLISHED | {} |",
                    self.mss
                ));
            }
        } else {
            rows.push(format!(
                "| TCP | {CLIENT_ADDR}:179 | {SERVER_ADDR}:40112 | SYN_SENT | 0 |"
            ));
        }
        rows
    }
}

/// Shared state of the simulated topology. Clones share the same network.
#[derive(Clone)]
pub struct SimNetwork {
    state: Arc<Mutex<NetState>>,
}

pub struct SimNetworkBuilder {
    interface: String,
    initial_mss: u32,
    lag: Duration,
    mss_for_mtu: fn(u32) -> u32,
    fail_queries: u32,
    garble_queries: u32,
}

impl SimNetworkBuilder {
    pub fn interface(mut self, name: &str) -> Self {
        self.interface = name.to_string();
        self
    }

    pub fn initial_mss(mut self, mss: u32) -> Self {
        self.initial_mss = mss;
        self
    }

    /// Delay between a commit and the session reflecting the new MTU.
    pub fn lag(mut self, lag: Duration) -> Self {
        self.lag = lag;
        self
    }

    pub fn mss_for_mtu(mut self, f: fn(u32) -> u32) -> Self {
        self.mss_for_mtu = f;
        self
    }

    /// Answer the next `n` session queries with a CLI error.
    pub fn fail_queries(mut self, n: u32) -> Self {
        self.fail_queries = n;
        self
    }

    /// Answer the next `n` session queries with text that is not a table.
    pub fn garble_queries(mut self, n: u32) -> Self {
        self.garble_queries = n;
        self
    }

    pub fn build(self) -> SimNetwork {
        SimNetwork {
            state: Arc::new(Mutex::new(NetState {
                interface: self.interface,
                committed_mtu: self.initial_mss + 100,
                mss: self.initial_mss,
                pending: None,
                session_down_until: None,
                lag: self.lag,
                mss_for_mtu: self.mss_for_mtu,
                fail_queries: self.fail_queries,
                garble_queries: self.garble_queries,
                duplicate: false,
                clears: 0,
            })),
        }
    }
}

impl SimNetwork {
    pub fn builder() -> SimNetworkBuilder {
        SimNetworkBuilder {
            interface: "ge100-0/0/18.2232".to_string(),
            initial_mss: 1500,
            lag: Duration::from_millis(50),
            mss_for_mtu: default_mss_for_mtu,
            fail_queries: 0,
            garble_queries: 0,
        }
    }

    fn lock(&self) -> MutexGuard<'_, NetState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn committed_mtu(&self) -> u32 {
        self.lock().committed_mtu
    }

    pub fn clears(&self) -> u32 {
        self.lock().clears
    }

    pub fn set_duplicate_session(&self, on: bool) {
        self.lock().duplicate = on;
    }

    fn has_interface(&self, name: &str) -> bool {
        self.lock().interface == name
    }

    fn commit_mtu(&self, mtu: u32) {
        let mut st = self.lock();
        if st.committed_mtu == mtu {
            return;
        }
        st.committed_mtu = mtu;
        let target = (st.mss_for_mtu)(mtu);
        st.pending = Some((Instant::now() + st.lag, target));
    }

    fn clear_bgp(&self) {
        let mut st = self.lock();
        let now = Instant::now();
        st.clears += 1;
        st.session_down_until = Some(now + st.lag);
        let target = (st.mss_for_mtu)(st.committed_mtu);
        st.pending = Some((now + st.lag, target));
    }

    /// Session rows kept by the `| include` filters, or a CLI error.
    fn sessions(&self, includes: &[String]) -> Result<Vec<String>, String> {
        let mut st = self.lock();
        if st.fail_queries > 0 {
            st.fail_queries -= 1;
            return Err("ERROR: Failed to retrieve system sessions, try again later".into());
        }
        if st.garble_queries > 0 {
            st.garble_queries -= 1;
            return Ok(vec![
                "% session table is being rebuilt".into(),
                format!("| TCP | {CLIENT_ADDR}:179 | {SERVER_ADDR}:40112 | ESTAB"),
            ]);
        }
        st.advance(Instant::now());
        Ok(st
            .session_rows()
            .into_iter()
            .filter(|row| includes.iter().all(|t| row.contains(t.as_str())))
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Exec,
    Config,
}

/// One simulated router console.
pub struct SimConsole {
    host: String,
    net: SimNetwork,
    mode: Mode,
    candidate_mtu: Option<u32>,
    input: Vec<u8>,
    out: VecDeque<u8>,
}

impl SimConsole {
    /// A console that has just been spawned: login noise, loading banner, prompt.
    pub fn new(host: &str, net: SimNetwork) -> Self {
        let mut console = Self::ready(host, net);
        let greeting = format!(
            "Last login: Thu Oct 15 09:12:01 2026\r\n{DEFAULT_READY_BANNER}...\r\n\r\n{}",
            console.prompt()
        );
        console.out.extend(greeting.bytes());
        console
    }

    /// A console already past start-up, silent until it gets a command.
    pub fn ready(host: &str, net: SimNetwork) -> Self {
        Self {
            host: host.to_string(),
            net,
            mode: Mode::Exec,
            candidate_mtu: None,
            input: Vec::new(),
            out: VecDeque::new(),
        }
    }

    fn prompt(&self) -> String {
        match self.mode {
            Mode::Exec => format!("{}# ", self.host),
            Mode::Config => format!("{}(cfg)# ", self.host),
        }
    }

    fn execute(&mut self, line: &str) -> Result<Vec<String>, String> {
        let unknown = || format!("ERROR: Unknown word: '{}'.", line.trim());
        let cmd = match parse_command(line) {
            Ok(cmd) => cmd,
            Err(CommandParseError::Empty) => return Ok(Vec::new()),
            Err(_) => return Err(unknown()),
        };
        match (self.mode, cmd) {
            (Mode::Exec, CliCommand::ShowBgpSummary) => Ok(vec![
                "BGP router identifier 18.18.18.18, local AS number 65001".into(),
                "Neighbor        V  AS     Up/Down  State/PfxRcd".into(),
                format!("{SERVER_ADDR}     4  65002  00:12:44 3"),
            ]),
            (Mode::Exec, CliCommand::ShowSystemSessions { includes }) => {
                self.net.sessions(&includes)
            }
            (Mode::Exec, CliCommand::ClearBgpNeighbors) => {
                self.net.clear_bgp();
                Ok(Vec::new())
            }
            (Mode::Exec, CliCommand::Configure) => {
                self.mode = Mode::Config;
                Ok(Vec::new())
            }
            (Mode::Config, CliCommand::InterfaceMtu { interface, mtu }) => {
                if !self.net.has_interface(&interface) {
                    return Err(format!("ERROR: interface {interface} does not exist"));
                }
                self.candidate_mtu = Some(mtu);
                Ok(Vec::new())
            }
            (Mode::Config, CliCommand::Commit) => match self.candidate_mtu.take() {
                Some(mtu) => {
                    self.net.commit_mtu(mtu);
                    Ok(vec!["Commit succeeded by dnroot".into()])
                }
                None => Ok(vec!["Commit action is not applicable. no configuration changes were made".into()]),
            },
            (Mode::Config, CliCommand::Exit) => {
                self.candidate_mtu = None;
                self.mode = Mode::Exec;
                Ok(Vec::new())
            }
            (Mode::Exec, CliCommand::Exit) => Ok(Vec::new()),
            _ => Err(unknown()),
        }
    }

    fn respond(&mut self, line: &str) {
        let mut reply = format!("{line}\r\n");
        match self.execute(line) {
            Ok(lines) => {
                for l in lines {
                    reply.push_str(&l);
                    reply.push_str("\r\n");
                }
            }
            Err(msg) => {
                reply.push_str(&msg);
                reply.push_str("\r\n");
            }
        }
        reply.push_str(&self.prompt());
        self.out.extend(reply.bytes());
    }
}

impl Transport for SimConsole {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.input.extend_from_slice(data);
        while let Some(nl) = self.input.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.input.drain(..=nl).collect();
            let line = String::from_utf8_lossy(&raw).trim_end().to_string();
            self.respond(&line);
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if self.out.is_empty() {
            thread::sleep(timeout);
            return Err(io::Error::new(io::ErrorKind::TimedOut, "simulated console idle"));
        }
        let n = buf.len().min(self.out.len());
        for (dst, src) in buf.iter_mut().zip(self.out.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}
