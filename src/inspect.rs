//! Reads the negotiated MSS of the one BGP TCP session between the test
//! endpoints from the client router's session table.

use std::net::IpAddr;

use thiserror::Error;
use tracing::debug;

use crate::console::command::{CliCommand, format_command};
use crate::console::{CommandError, SessionChannel, TransportError};
use crate::table::{self, ParseError, TableRow};

pub const BGP_PORT: &str = "179";

const PROTO_TCP: &str = "TCP";
const STATE_ESTABLISHED: &str = "ESTABLISHED";

// column layout of `show system sessions`; MSS is the last column
const COL_PROTO: usize = 0;
const COL_LOCAL: usize = 1;
const COL_REMOTE: usize = 2;
const COL_STATE: usize = 3;
const MIN_COLUMNS: usize = 5;

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("no established TCP session matches {0}")]
    NotFound(Endpoints),
    #[error("more than one established TCP session matches {endpoints} ({first}, {second})")]
    Ambiguous {
        endpoints: Endpoints,
        first: String,
        second: String,
    },
    #[error("session MSS is not an integer: {0:?}")]
    BadMss(String),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl InspectError {
    /// Errors that mean the run cannot go on. Everything else only means
    /// there was no usable sample this time.
    pub fn is_fatal(&self) -> bool {
        matches!(self, InspectError::Ambiguous { .. } | InspectError::Transport(_))
    }
}

/// Addresses the session must connect. `None` matches any host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub server: Option<IpAddr>,
    pub client: Option<IpAddr>,
}

impl std::fmt::Display for Endpoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |a: Option<IpAddr>| a.map_or_else(|| "*".to_string(), |a| a.to_string());
        write!(f, "server={} client={}", show(self.server), show(self.client))
    }
}

/// Where the port filter goes relative to the address filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FilterOrder {
    /// `| include <server> | include <client> | include <port>`
    #[default]
    AddressFirst,
    /// `| include <port> | include <server> | include <client>`
    PortFirst,
}

/// One row of the session table, read as a TCP session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSessionRecord<'a> {
    pub protocol: &'a str,
    pub local: &'a str,
    pub remote: &'a str,
    pub state: &'a str,
    pub mss: &'a str,
}

impl<'a> TcpSessionRecord<'a> {
    pub fn from_row(row: &'a TableRow) -> Option<Self> {
        if row.len() < MIN_COLUMNS {
            return None;
        }
        Some(Self {
            protocol: row.get(COL_PROTO)?,
            local: row.get(COL_LOCAL)?,
            remote: row.get(COL_REMOTE)?,
            state: row.get(COL_STATE)?,
            mss: row.last()?,
        })
    }

    pub fn is_established_tcp(&self) -> bool {
        self.protocol == PROTO_TCP && self.state == STATE_ESTABLISHED
    }

    /// Both configured hosts must appear among the two ends, in either direction.
    pub fn connects(&self, endpoints: &Endpoints) -> bool {
        let hosts = [host_of(self.local), host_of(self.remote)];
        let has = |want: Option<IpAddr>| want.is_none_or(|ip| hosts.contains(&Some(ip)));
        has(endpoints.server) && has(endpoints.client)
    }

    pub fn mss(&self) -> Result<u32, InspectError> {
        self.mss
            .parse::<u32>()
            .map_err(|_| InspectError::BadMss(self.mss.to_string()))
    }
}

/// Host portion of `addr:port`, `[v6]:port`, or a bare address.
fn host_of(endpoint: &str) -> Option<IpAddr> {
    if let Ok(ip) = endpoint.parse::<IpAddr>() {
        return Some(ip);
    }
    let (host, _port) = endpoint.rsplit_once(':')?;
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .ok()
}

#[derive(Debug, Clone)]
pub struct TcpSessionInspector {
    pub endpoints: Endpoints,
    pub order: FilterOrder,
    pub port: String,
}

impl TcpSessionInspector {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            endpoints,
            order: FilterOrder::default(),
            port: BGP_PORT.to_string(),
        }
    }

    /// Filtered listing so the device does the narrowing.
    pub fn query(&self) -> CliCommand {
        let mut includes: Vec<String> = [self.endpoints.server, self.endpoints.client]
            .into_iter()
            .flatten()
            .map(|ip| ip.to_string())
            .collect();
        match self.order {
            FilterOrder::AddressFirst => includes.push(self.port.clone()),
            FilterOrder::PortFirst => includes.insert(0, self.port.clone()),
        }
        CliCommand::ShowSystemSessions { includes }
    }

    /// Current MSS of the single matching session on the client console.
    pub fn current_mss(&self, client: &mut SessionChannel) -> Result<u32, InspectError> {
        let output = client.send(&format_command(&self.query()), true)??;
        let rows = table::parse(&output, None)?;
        self.select_mss(&rows)
    }

    /// Pick the one established TCP session between the endpoints; a second
    /// match rejects the whole table.
    pub fn select_mss(&self, rows: &[TableRow]) -> Result<u32, InspectError> {
        let mut found: Option<TcpSessionRecord<'_>> = None;
        for record in rows.iter().filter_map(TcpSessionRecord::from_row) {
            if !record.is_established_tcp() || !record.connects(&self.endpoints) {
                continue;
            }
            if let Some(first) = &found {
                return Err(InspectError::Ambiguous {
                    endpoints: self.endpoints,
                    first: format!("{} -> {}", first.local, first.remote),
                    second: format!("{} -> {}", record.local, record.remote),
                });
            }
            found = Some(record);
        }
        let record = found.ok_or(InspectError::NotFound(self.endpoints))?;
        let mss = record.mss()?;
        debug!(mss, local = record.local, remote = record.remote, "session mss");
        Ok(mss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rig() -> TcpSessionInspector {
        TcpSessionInspector::new(Endpoints {
            server: Some("11.11.11.11".parse().unwrap()),
            client: Some("18.18.18.18".parse().unwrap()),
        })
    }

    fn rows(text: &str) -> Vec<TableRow> {
        table::parse(text, None).unwrap()
    }

    #[test]
    fn query_puts_port_last_by_default() {
        assert_eq!(
            format_command(&rig().query()),
            "show system sessions | include 11.11.11.11 | include 18.18.18.18 | include 179"
        );
    }

    #[test]
    fn query_port_first_and_unset_addresses() {
        let mut insp = TcpSessionInspector::new(Endpoints {
            server: Some("11.11.11.11".parse().unwrap()),
            client: None,
        });
        insp.order = FilterOrder::PortFirst;
        assert_eq!(
            format_command(&insp.query()),
            "show system sessions | include 179 | include 11.11.11.11"
        );
    }

    #[test]
    fn single_match_returns_mss() {
        let r = rows(
            "| TCP | 18.18.18.18:179 | 11.11.11.11:40112 | ESTABLISHED | 9000 |\n\
             | TCP | 18.18.18.18:179 | 12.12.12.12:40113 | ESTABLISHED | 1460 |\n\
             | TCP | 18.18.18.18:179 | 11.11.11.11:40999 | TIME_WAIT   | 1500 |",
        );
        assert_eq!(rig().select_mss(&r).unwrap(), 9000);
    }

    #[test]
    fn reverse_direction_matches() {
        let r = rows("| TCP | 11.11.11.11:179 | 18.18.18.18:55012 | ESTABLISHED | 2000 |");
        assert_eq!(rig().select_mss(&r).unwrap(), 2000);
    }

    #[test]
    fn header_and_udp_rows_are_ignored() {
        let r = rows(
            "| Protocol | Local | Remote | State | MSS |\n\
             | UDP | 18.18.18.18:179 | 11.11.11.11:179 | ESTABLISHED | 0 |",
        );
        assert!(matches!(rig().select_mss(&r), Err(InspectError::NotFound(_))));
    }

    #[test]
    fn protocol_must_be_upper_case_tcp() {
        let r = rows("| tcp | 18.18.18.18:179 | 11.11.11.11:40112 | ESTABLISHED | 9000 |");
        assert!(matches!(rig().select_mss(&r), Err(InspectError::NotFound(_))));
    }

    #[test]
    fn no_match_is_not_found() {
        assert!(matches!(rig().select_mss(&[]), Err(InspectError::NotFound(_))));
        let r = rows("| TCP | 18.18.18.18:179 | 11.11.11.11:40112 | SYN_SENT | 0 |");
        assert!(matches!(rig().select_mss(&r), Err(InspectError::NotFound(_))));
    }

    #[test]
    fn port_is_not_part_of_address_match() {
        // 11.11.11.110 must not match 11.11.11.11 even though it contains it
        let r = rows("| TCP | 18.18.18.18:179 | 11.11.11.110:40112 | ESTABLISHED | 9000 |");
        assert!(matches!(rig().select_mss(&r), Err(InspectError::NotFound(_))));
    }

    #[test]
    fn two_matches_are_ambiguous() {
        let r = rows(
            "| TCP | 18.18.18.18:179 | 11.11.11.11:40112 | ESTABLISHED | 9000 |\n\
             | TCP | 18.18.18.18:179 | 11.11.11.11:40112 | ESTABLISHED | 9000 |",
        );
        let err = rig().select_mss(&r).unwrap_err();
        assert!(matches!(err, InspectError::Ambiguous { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn non_integer_mss_is_a_missed_sample() {
        let r = rows("| TCP | 18.18.18.18:179 | 11.11.11.11:40112 | ESTABLISHED | n/a |");
        let err = rig().select_mss(&r).unwrap_err();
        assert!(matches!(&err, InspectError::BadMss(cell) if cell == "n/a"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn unfiltered_endpoints_match_any_host() {
        let insp = TcpSessionInspector::new(Endpoints::default());
        let r = rows("| TCP | 1.1.1.1:179 | 2.2.2.2:1 | ESTABLISHED | 1400 |");
        assert_eq!(insp.select_mss(&r).unwrap(), 1400);
    }

    #[test]
    fn host_parsing() {
        assert_eq!(host_of("10.0.0.1:179"), "10.0.0.1".parse().ok());
        assert_eq!(host_of("10.0.0.1"), "10.0.0.1".parse().ok());
        assert_eq!(host_of("[2001:db8::1]:179"), "2001:db8::1".parse().ok());
        assert_eq!(host_of("*:*"), None);
    }
}
