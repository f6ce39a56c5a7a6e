use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer};

use crate::inspect::{BGP_PORT, Endpoints, FilterOrder};
use crate::transport::{ProcessTransport, SerialTransport, Transport};

pub const DEFAULT_READY_BANNER: &str = "DRIVENETS CLI Loading";
const DEFAULT_SSH_USER: &str = "dnroot";
const DEFAULT_PASSWORD_FILE: &str = ".drivenets-default-dnroot-passwd.txt";

/// How to reach one router console
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// `sshpass -f <password_file> ssh -tt <user>@<hostname>`
    Ssh {
        #[serde(default = "default_ssh_user")]
        user: String,
        /// Defaults to ~/.drivenets-default-dnroot-passwd.txt
        password_file: Option<PathBuf>,
    },
    /// Any command line, run through `bash -c`
    Command { cmd: String },
    /// Serial console, 8N1
    Serial { dev: String, baud: u32 },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Ssh {
            user: default_ssh_user(),
            password_file: None,
        }
    }
}

fn default_ssh_user() -> String {
    DEFAULT_SSH_USER.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeConfig {
    pub hostname: String,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl NodeConfig {
    fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            transport: TransportConfig::default(),
        }
    }

    pub fn open(&self) -> Result<Box<dyn Transport>> {
        match &self.transport {
            TransportConfig::Ssh {
                user,
                password_file,
            } => {
                let password_file = match password_file {
                    Some(p) => p.clone(),
                    None => default_password_file()?,
                };
                if !password_file.exists() {
                    bail!("Please write ssh password to {}", password_file.display());
                }
                let args = [
                    "-f".to_string(),
                    password_file.display().to_string(),
                    "ssh".to_string(),
                    "-tt".to_string(),
                    format!("{user}@{}", self.hostname),
                ];
                let t = ProcessTransport::spawn("sshpass", &args)
                    .with_context(|| format!("connecting to {}", self.hostname))?;
                Ok(Box::new(t))
            }
            TransportConfig::Command { cmd } => Ok(Box::new(
                ProcessTransport::shell(cmd)
                    .with_context(|| format!("connecting to {}", self.hostname))?,
            )),
            TransportConfig::Serial { dev, baud } => Ok(Box::new(SerialTransport::open(dev, *baud)?)),
        }
    }
}

fn default_password_file() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").context("HOME is not set; give password_file explicitly")?;
    Ok(PathBuf::from(home).join(DEFAULT_PASSWORD_FILE))
}

/// The three routers, the interface whose MTU is changed, and the BGP
/// session endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Topology {
    pub client: NodeConfig,
    pub middle: NodeConfig,
    pub server: NodeConfig,
    /// middle router interface facing the server
    pub middle_interface: String,
    #[serde(deserialize_with = "empty_as_none")]
    pub client_address: Option<IpAddr>,
    #[serde(deserialize_with = "empty_as_none")]
    pub server_address: Option<IpAddr>,
    pub filter_order: FilterOrder,
    /// token narrowing the session listing to BGP
    pub port: String,
    pub ready_banner: String,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            client: NodeConfig::new("dn40-re01"),
            middle: NodeConfig::new("WC81917W80011"),
            server: NodeConfig::new("kvm29-ncc0"),
            middle_interface: "ge100-0/0/18.2232".to_string(),
            client_address: "18.18.18.18".parse().ok(),
            server_address: "11.11.11.11".parse().ok(),
            filter_order: FilterOrder::default(),
            port: BGP_PORT.to_string(),
            ready_banner: DEFAULT_READY_BANNER.to_string(),
        }
    }
}

impl Topology {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading topology {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing topology {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            server: self.server_address,
            client: self.client_address,
        }
    }
}

/// An address that may be blank; blank means "don't filter on it".
pub fn parse_endpoint(s: &str) -> Result<Option<IpAddr>, std::net::AddrParseError> {
    let s = s.trim();
    if s.is_empty() {
        Ok(None)
    } else {
        s.parse().map(Some)
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<IpAddr>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s {
        None => Ok(None),
        Some(s) => parse_endpoint(&s).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_the_lab_rig() {
        let t = Topology::default();
        assert_eq!(t.middle.hostname, "WC81917W80011");
        assert_eq!(t.middle_interface, "ge100-0/0/18.2232");
        assert_eq!(t.endpoints().server, "11.11.11.11".parse().ok());
        assert_eq!(t.port, "179");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let t = Topology::from_toml(
            r#"
            middle_interface = "ge100-0/0/7"
            client_address = ""
            filter_order = "port-first"

            [client]
            hostname = "lab-client"
            transport = { kind = "command", cmd = "ssh -tt admin@lab-client" }

            [server]
            hostname = "lab-server"
            transport = { kind = "serial", dev = "/dev/ttyUSB0", baud = 9600 }
            "#,
        )
        .unwrap();
        assert_eq!(t.middle_interface, "ge100-0/0/7");
        assert_eq!(t.client_address, None);
        assert_eq!(t.server_address, "11.11.11.11".parse().ok());
        assert_eq!(t.filter_order, FilterOrder::PortFirst);
        assert_eq!(
            t.client.transport,
            TransportConfig::Command {
                cmd: "ssh -tt admin@lab-client".into()
            }
        );
        assert!(matches!(
            t.server.transport,
            TransportConfig::Serial { baud: 9600, .. }
        ));
        assert_eq!(t.middle.hostname, "WC81917W80011");
        assert_eq!(t.middle.transport, TransportConfig::default());
    }

    #[test]
    fn bad_address_is_rejected() {
        assert!(Topology::from_toml("server_address = \"11.11.11\"").is_err());
    }

    #[test]
    fn missing_password_file_is_reported() {
        let node = NodeConfig {
            hostname: "r1".into(),
            transport: TransportConfig::Ssh {
                user: "dnroot".into(),
                password_file: Some("/nonexistent/pmtu-check-passwd".into()),
            },
        };
        let err = node.open().err().unwrap();
        assert!(err.to_string().contains("Please write ssh password to"));
    }

    #[test]
    fn endpoint_strings() {
        assert_eq!(parse_endpoint("  ").unwrap(), None);
        assert_eq!(
            parse_endpoint("18.18.18.18").unwrap(),
            "18.18.18.18".parse().ok()
        );
        assert!(parse_endpoint("host.example").is_err());
    }
}
