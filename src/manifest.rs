//! Configuration file parsing for vpnns
//!
//! Parses `vpnns.toml` using serde. Every field has a default, so a missing
//! file yields the stock `vpn` namespace routed through
//! `/etc/wireguard/protonvpn.conf`.

use crate::error::{Error, Result};
use ipnet::Ipv4Net;
use serde::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Where the config is looked up when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/vpnns/vpnns.toml";

/// Linux IFNAMSIZ minus the trailing NUL
const MAX_IFNAME_LEN: usize = 15;

/// Load configuration from a file
pub fn load(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: Config = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Load the config named on the command line, or the default one if present
///
/// An explicit path must exist. The default path is optional and falls back
/// to built-in defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load(path),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                load(default_path)
            } else {
                tracing::debug!(path = DEFAULT_CONFIG_PATH, "no config file, using defaults");
                let config = Config::default();
                config.validate()?;
                Ok(config)
            }
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Network namespace name
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Physical uplink interface that gets masqueraded
    #[serde(default = "default_uplink")]
    pub uplink: String,

    /// WireGuard config handed to wg-quick
    #[serde(default = "default_tunnel_config")]
    pub tunnel_config: PathBuf,

    /// Root of the per-namespace /etc overlay used by `ip netns exec`
    #[serde(default = "default_netns_etc_dir")]
    pub netns_etc_dir: PathBuf,

    /// Directory holding the per-namespace lock file
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,

    /// How privileged commands are run
    #[serde(default)]
    pub elevation: Elevation,

    /// What start does when the tunnel never comes up
    #[serde(default)]
    pub on_tunnel_failure: TunnelFailurePolicy,

    /// Kill external commands running longer than this
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,

    /// Virtual ethernet pair
    #[serde(default)]
    pub veth: VethConfig,

    /// Namespace resolver
    #[serde(default)]
    pub dns: DnsConfig,

    /// Post-start connectivity probes
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Tunnel bring-up retry
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            uplink: default_uplink(),
            tunnel_config: default_tunnel_config(),
            netns_etc_dir: default_netns_etc_dir(),
            lock_dir: default_lock_dir(),
            elevation: Elevation::default(),
            on_tunnel_failure: TunnelFailurePolicy::default(),
            command_timeout_secs: None,
            veth: VethConfig::default(),
            dns: DnsConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() || self.namespace.contains('/') {
            return Err(Error::ConfigValidation(format!(
                "Invalid namespace name: '{}'",
                self.namespace
            )));
        }

        let tunnel = self.tunnel_interface()?;
        for (what, name) in [
            ("uplink", self.uplink.as_str()),
            ("veth.host", self.veth.host.as_str()),
            ("veth.peer", self.veth.peer.as_str()),
            ("tunnel interface", tunnel.as_str()),
        ] {
            validate_ifname(what, name)?;
        }

        if self.veth.host == self.veth.peer {
            return Err(Error::ConfigValidation(format!(
                "veth.host and veth.peer are both '{}'",
                self.veth.host
            )));
        }

        if self.veth.host_address.addr() == self.veth.peer_address.addr() {
            return Err(Error::ConfigValidation(format!(
                "veth ends share the address {}",
                self.veth.host_address.addr()
            )));
        }

        if !self.veth.host_address.contains(&self.veth.peer_address.addr()) {
            return Err(Error::ConfigValidation(format!(
                "veth.peer_address {} is not on the host subnet {}",
                self.veth.peer_address,
                self.veth.host_address.trunc()
            )));
        }

        if self.dns.nameservers.is_empty() {
            return Err(Error::ConfigValidation(
                "At least one DNS nameserver is required".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::ConfigValidation(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.command_timeout_secs == Some(0) {
            return Err(Error::ConfigValidation(
                "command_timeout_secs must be at least 1".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(Error::ConfigValidation(format!(
                "retry.jitter_factor must be within 0.0-1.0, got {}",
                self.retry.jitter_factor
            )));
        }

        Ok(())
    }

    /// Name of the WireGuard interface wg-quick creates for `tunnel_config`
    ///
    /// wg-quick names the interface after the config file stem.
    pub fn tunnel_interface(&self) -> Result<String> {
        self.tunnel_config
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                Error::ConfigValidation(format!(
                    "Cannot derive an interface name from '{}'",
                    self.tunnel_config.display()
                ))
            })
    }

    /// Path of the resolver file seen inside the namespace
    pub fn resolv_conf_path(&self) -> PathBuf {
        self.netns_etc_dir.join(&self.namespace).join("resolv.conf")
    }

    /// Path of the lock file guarding this namespace
    pub fn lock_path(&self) -> PathBuf {
        self.lock_dir.join(format!("{}.lock", self.namespace))
    }
}

fn validate_ifname(what: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_IFNAME_LEN {
        return Err(Error::ConfigValidation(format!(
            "{} interface name '{}' must be 1-{} bytes",
            what, name, MAX_IFNAME_LEN
        )));
    }

    if name
        .chars()
        .any(|c| c.is_whitespace() || c == '/' || c == ':')
    {
        return Err(Error::ConfigValidation(format!(
            "{} interface name '{}' contains invalid characters",
            what, name
        )));
    }

    Ok(())
}

fn default_namespace() -> String {
    "vpn".into()
}

fn default_uplink() -> String {
    "eth0".into()
}

fn default_tunnel_config() -> PathBuf {
    PathBuf::from("/etc/wireguard/protonvpn.conf")
}

fn default_netns_etc_dir() -> PathBuf {
    PathBuf::from("/etc/netns")
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from("/run/vpnns")
}

/// Privilege escalation for external commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Elevation {
    /// Use sudo unless already running as root
    #[default]
    Auto,
    /// Always prefix commands with sudo
    Sudo,
    /// Run commands as-is
    None,
}

/// Behavior when every tunnel bring-up attempt fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelFailurePolicy {
    /// Keep provisioning routes and filter rules in degraded mode
    #[default]
    Continue,
    /// Stop before touching routes
    Abort,
}

fn default_host_veth() -> String {
    "veth0".into()
}

fn default_peer_veth() -> String {
    "veth1".into()
}

fn default_host_address() -> Ipv4Net {
    Ipv4Net::new_assert(Ipv4Addr::new(10, 200, 200, 1), 24)
}

fn default_peer_address() -> Ipv4Net {
    Ipv4Net::new_assert(Ipv4Addr::new(10, 200, 200, 2), 24)
}

/// Veth pair linking the host to the namespace
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VethConfig {
    /// Host-side end
    #[serde(default = "default_host_veth")]
    pub host: String,

    /// End moved into the namespace
    #[serde(default = "default_peer_veth")]
    pub peer: String,

    /// Address assigned to the host end when it has none
    #[serde(default = "default_host_address")]
    pub host_address: Ipv4Net,

    /// Address assigned to the namespace end when it has none
    #[serde(default = "default_peer_address")]
    pub peer_address: Ipv4Net,
}

impl Default for VethConfig {
    fn default() -> Self {
        Self {
            host: default_host_veth(),
            peer: default_peer_veth(),
            host_address: default_host_address(),
            peer_address: default_peer_address(),
        }
    }
}

fn default_nameservers() -> Vec<String> {
    vec!["1.1.1.1".into()]
}

/// Resolver written for the namespace
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsConfig {
    #[serde(default = "default_nameservers")]
    pub nameservers: Vec<String>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            nameservers: default_nameservers(),
        }
    }
}

fn default_diagnostics_enabled() -> bool {
    true
}

fn default_ping_count() -> u32 {
    3
}

fn default_probe_targets() -> Vec<String> {
    vec!["1.1.1.1".into()]
}

/// Connectivity probes run at the end of start
///
/// The tunnel peer is always probed first, followed by `targets`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_diagnostics_enabled")]
    pub enabled: bool,

    /// ICMP echo requests per target
    #[serde(default = "default_ping_count")]
    pub ping_count: u32,

    /// Extra hosts to probe after the tunnel peer
    #[serde(default = "default_probe_targets")]
    pub targets: Vec<String>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: default_diagnostics_enabled(),
            ping_count: default_ping_count(),
            targets: default_probe_targets(),
        }
    }
}

// Retry configuration defaults: three attempts one second apart
fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_max_attempts() -> u8 {
    3
}

fn default_jitter_factor() -> f64 {
    0.0
}

/// Retry configuration for tunnel bring-up
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Base delay in milliseconds before first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds between retries
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Total number of attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,

    /// Jitter factor (0.0-1.0) to randomize delays
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
            jitter_factor: default_jitter_factor(),
        }
    }
}
