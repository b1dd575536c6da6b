//! IPv4 forwarding and packet filter rules
//!
//! The rule set is disposable: every start flushes the NAT table and the
//! FORWARD chain and appends the full set again. Nothing is diffed.

use crate::error::Result;
use crate::sys::Shell;
use std::fmt;

/// Enable kernel IPv4 forwarding
pub fn enable_ip_forwarding(shell: &Shell) -> Result<()> {
    shell.apply("sysctl", &["-w", "net.ipv4.ip_forward=1"])
}

/// Flush the NAT table and the FORWARD chain
pub fn flush(shell: &Shell) -> Result<()> {
    shell.apply("iptables", &["-t", "nat", "-F"])?;
    shell.apply("iptables", &["-F", "FORWARD"])?;
    tracing::debug!("flushed nat table and FORWARD chain");
    Ok(())
}

/// iptables table a rule lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Filter,
    Nat,
}

/// A single appended rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    table: Table,
    chain: &'static str,
    in_iface: Option<String>,
    out_iface: Option<String>,
    target: &'static str,
}

impl Rule {
    /// Masquerade everything leaving `iface`
    pub fn masquerade(iface: &str) -> Self {
        Self {
            table: Table::Nat,
            chain: "POSTROUTING",
            in_iface: None,
            out_iface: Some(iface.to_string()),
            target: "MASQUERADE",
        }
    }

    /// Accept forwarded traffic between `from` and `to`
    ///
    /// `from = None` matches any input interface.
    pub fn forward(from: Option<&str>, to: &str) -> Self {
        Self {
            table: Table::Filter,
            chain: "FORWARD",
            in_iface: from.map(|s| s.to_string()),
            out_iface: Some(to.to_string()),
            target: "ACCEPT",
        }
    }

    /// iptables arguments that append this rule
    pub fn append_args(&self) -> Vec<&str> {
        let mut args = Vec::new();
        if self.table == Table::Nat {
            args.extend(["-t", "nat"]);
        }
        args.extend(["-A", self.chain]);
        if let Some(iface) = &self.in_iface {
            args.extend(["-i", iface.as_str()]);
        }
        if let Some(iface) = &self.out_iface {
            args.extend(["-o", iface.as_str()]);
        }
        args.extend(["-j", self.target]);
        args
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.append_args().join(" "))
    }
}

/// The NAT and forwarding rules routing the namespace through the tunnel
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Rules for a namespace reached over `host_veth` and tunneled out of `tunnel`
    pub fn for_tunnel(uplink: &str, tunnel: &str, host_veth: &str) -> Self {
        Self {
            rules: vec![
                Rule::masquerade(uplink),
                Rule::masquerade(tunnel),
                Rule::forward(Some(tunnel), host_veth),
                Rule::forward(Some(host_veth), tunnel),
                Rule::forward(None, tunnel),
            ],
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Flush and append every rule in order
    pub fn apply(&self, shell: &Shell) -> Result<()> {
        flush(shell)?;

        for rule in self.rules() {
            shell.apply("iptables", &rule.append_args())?;
            tracing::debug!(rule = %rule, "appended rule");
        }

        tracing::info!(count = self.rules.len(), "applied packet filter rules");
        Ok(())
    }
}
