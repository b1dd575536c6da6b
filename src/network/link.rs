//! Interface address and link state
//!
//! An [`Interface`] is addressed either on the host or inside a named
//! namespace; commands for the latter go through `ip -n <ns>`.

use crate::error::Result;
use crate::sys::Shell;
use ipnet::Ipv4Net;

/// A network interface on the host or inside a namespace
#[derive(Debug, Clone)]
pub struct Interface {
    name: String,
    namespace: Option<String>,
}

impl Interface {
    /// Interface in the host namespace
    pub fn host(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Interface inside a named namespace
    pub fn in_namespace(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Prefix `args` with `-n <ns>` for namespaced interfaces
    fn ip_args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(ns) = &self.namespace {
            full.push("-n");
            full.push(ns.as_str());
        }
        full.extend_from_slice(args);
        full
    }

    /// Check whether the interface exists
    pub fn exists(&self, shell: &Shell) -> Result<bool> {
        let output = shell.query("ip", &self.ip_args(&["link", "show", &self.name]))?;
        Ok(output.success)
    }

    /// Current IPv4 address, if any
    pub fn address(&self, shell: &Shell) -> Result<Option<Ipv4Net>> {
        let output = shell.query(
            "ip",
            &self.ip_args(&["-4", "-o", "addr", "show", "dev", &self.name]),
        )?;

        // A missing device has no address to report
        if !output.success {
            return Ok(None);
        }

        Ok(parse_inet(&output.stdout))
    }

    /// Assign an IPv4 address
    pub fn add_address(&self, shell: &Shell, addr: Ipv4Net) -> Result<()> {
        let addr = addr.to_string();
        shell.apply("ip", &self.ip_args(&["addr", "add", &addr, "dev", &self.name]))
    }

    /// Bring the interface administratively up
    pub fn set_up(&self, shell: &Shell) -> Result<()> {
        shell.apply("ip", &self.ip_args(&["link", "set", &self.name, "up"]))
    }

    /// Keep the observed address or assign `default`, then bring the link up
    ///
    /// Returns the address the interface ends up with.
    pub fn ensure_address(&self, shell: &Shell, default: Ipv4Net) -> Result<Ipv4Net> {
        let addr = match self.address(shell)? {
            Some(current) => {
                tracing::debug!(interface = %self.name, address = %current, "keeping address");
                current
            }
            None => {
                self.add_address(shell, default)?;
                tracing::info!(interface = %self.name, address = %default, "assigned address");
                default
            }
        };

        self.set_up(shell)?;
        Ok(addr)
    }

    /// Delete the interface
    pub fn delete(&self, shell: &Shell) -> Result<()> {
        shell.apply("ip", &self.ip_args(&["link", "delete", &self.name]))
    }
}

/// First `inet` address in `ip -4 -o addr show` output
///
/// Lines look like
/// `3: veth0    inet 10.200.200.1/24 scope global veth0\       valid_lft forever ...`
pub fn parse_inet(stdout: &str) -> Option<Ipv4Net> {
    stdout.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        tokens.find(|t| *t == "inet")?;
        tokens.next()?.parse().ok()
    })
}
