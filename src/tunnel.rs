//! WireGuard tunnel handling
//!
//! Provides:
//! - Read-only parsing of the wg-quick config (addresses, DNS, peer endpoints)
//! - Bringing the tunnel up and down inside the namespace with wg-quick
//! - Parsing `wg show` output into a status report

use crate::error::{Error, Result};
use crate::network::{Interface, Namespace};
use crate::sys::Shell;
use serde::Serialize;
use std::fs;
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};

/// A `[Peer]` section of the tunnel config
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSection {
    pub public_key: Option<String>,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<String>,
}

/// The parts of a wg-quick config vpnns cares about
///
/// Keys are never kept, only whether one is present.
#[derive(Debug, Clone, Default)]
pub struct TunnelConfig {
    pub path: PathBuf,
    pub has_private_key: bool,
    pub addresses: Vec<String>,
    pub dns: Vec<String>,
    pub peers: Vec<PeerSection>,
}

impl TunnelConfig {
    /// Read and parse a wg-quick config
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::TunnelConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(Self::parse(path, &content))
    }

    /// Parse wg-quick INI content
    ///
    /// Keys are case-insensitive; unknown sections and keys are skipped.
    pub fn parse(path: &Path, content: &str) -> Self {
        enum Section {
            None,
            Interface,
            Peer,
        }

        let mut config = TunnelConfig {
            path: path.to_path_buf(),
            ..Default::default()
        };
        let mut section = Section::None;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                let name = line[1..line.len() - 1].trim();
                section = if name.eq_ignore_ascii_case("Interface") {
                    Section::Interface
                } else if name.eq_ignore_ascii_case("Peer") {
                    config.peers.push(PeerSection::default());
                    Section::Peer
                } else {
                    Section::None
                };
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match section {
                Section::Interface => match key.as_str() {
                    "privatekey" => config.has_private_key = !value.is_empty(),
                    "address" => config.addresses.extend(split_list(value)),
                    "dns" => config.dns.extend(split_list(value)),
                    _ => {}
                },
                Section::Peer => {
                    if let Some(peer) = config.peers.last_mut() {
                        match key.as_str() {
                            "publickey" => peer.public_key = Some(value.to_string()),
                            "endpoint" => peer.endpoint = Some(value.to_string()),
                            "allowedips" => peer.allowed_ips.extend(split_list(value)),
                            _ => {}
                        }
                    }
                }
                Section::None => {}
            }
        }

        config
    }

    /// Host part of the first peer endpoint
    pub fn endpoint_host(&self) -> Result<String> {
        let endpoint = self
            .peers
            .iter()
            .find_map(|p| p.endpoint.as_deref())
            .ok_or_else(|| Error::TunnelConfig {
                path: self.path.clone(),
                message: "no peer has an Endpoint".to_string(),
            })?;

        let host = endpoint_host(endpoint).ok_or_else(|| Error::TunnelConfig {
            path: self.path.clone(),
            message: format!("Endpoint '{}' is not host:port", endpoint),
        })?;

        // The peer route goes through the IPv4 veth gateway
        if host.parse::<Ipv6Addr>().is_ok() {
            return Err(Error::TunnelConfig {
                path: self.path.clone(),
                message: format!("IPv6 Endpoint '{}' cannot be routed over the veth pair", endpoint),
            });
        }

        Ok(host.to_string())
    }
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Everything before the last colon of `host:port`
///
/// Brackets around an IPv6 literal are dropped.
pub fn endpoint_host(endpoint: &str) -> Option<&str> {
    let (host, port) = endpoint.rsplit_once(':')?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() || port.is_empty() {
        return None;
    }
    Some(host)
}

/// A wg-quick managed tunnel living inside the namespace
#[derive(Debug, Clone)]
pub struct Tunnel {
    config_path: PathBuf,
    interface: String,
}

impl Tunnel {
    pub fn new(config_path: impl Into<PathBuf>, interface: impl Into<String>) -> Self {
        Self {
            config_path: config_path.into(),
            interface: interface.into(),
        }
    }

    /// Tunnel interface name
    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn config_arg(&self) -> String {
        self.config_path.to_string_lossy().into_owned()
    }

    /// Bring the tunnel up inside `ns`
    pub fn up(&self, shell: &Shell, ns: &Namespace) -> Result<()> {
        ns.exec(shell, "wg-quick", &["up", &self.config_arg()])
    }

    /// Bring the tunnel down inside `ns`
    pub fn down(&self, shell: &Shell, ns: &Namespace) -> Result<()> {
        ns.exec(shell, "wg-quick", &["down", &self.config_arg()])
    }

    /// Whether the tunnel interface exists in `ns`
    pub fn is_present(&self, shell: &Shell, ns: &Namespace) -> Result<bool> {
        Interface::in_namespace(&self.interface, ns.name()).exists(shell)
    }

    /// Current peer and handshake state, None when `wg show` fails
    pub fn status(&self, shell: &Shell, ns: &Namespace) -> Result<Option<TunnelStatus>> {
        let output = ns.exec_query(shell, "wg", &["show", &self.interface])?;

        if !output.success {
            tracing::debug!(
                interface = %self.interface,
                "wg show failed: {}",
                output.stderr.trim()
            );
            return Ok(None);
        }

        Ok(Some(TunnelStatus::parse(&output.stdout)))
    }
}

/// One peer as reported by `wg show`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeerStatus {
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_ips: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_handshake: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer: Option<String>,
}

/// Parsed `wg show <iface>` output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TunnelStatus {
    pub interface: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listening_port: Option<u16>,
    pub peers: Vec<PeerStatus>,
}

impl TunnelStatus {
    /// Parse `wg show` text output
    pub fn parse(output: &str) -> Self {
        let mut status = TunnelStatus::default();

        for line in output.lines() {
            let Some((key, value)) = line.trim().split_once(':') else {
                continue;
            };
            let value = value.trim().to_string();

            match key.trim() {
                "interface" => status.interface = value,
                "listening port" => status.listening_port = value.parse().ok(),
                "peer" => status.peers.push(PeerStatus {
                    public_key: value,
                    ..Default::default()
                }),
                other => {
                    let Some(peer) = status.peers.last_mut() else {
                        continue;
                    };
                    match other {
                        "endpoint" => peer.endpoint = Some(value),
                        "allowed ips" => peer.allowed_ips = Some(value),
                        "latest handshake" => peer.latest_handshake = Some(value),
                        "transfer" => peer.transfer = Some(value),
                        _ => {}
                    }
                }
            }
        }

        status
    }

    /// Whether any peer has completed a handshake
    pub fn has_handshake(&self) -> bool {
        self.peers.iter().any(|p| p.latest_handshake.is_some())
    }
}
