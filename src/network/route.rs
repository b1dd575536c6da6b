//! Route reconciliation inside a namespace
//!
//! Routes are matched on destination only. An existing route for the same
//! destination is left alone, never replaced.

use crate::error::Result;
use crate::network::netns::Namespace;
use crate::sys::Shell;
use std::fmt;
use std::net::Ipv4Addr;

/// Where a route sends its traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextHop {
    /// Through a gateway reachable on a device
    Via { gateway: Ipv4Addr, dev: String },
    /// Straight out of a device
    Dev(String),
}

/// A route in a namespace's main table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    destination: String,
    next_hop: NextHop,
}

impl Route {
    /// Host route to `destination` through `gateway` on `dev`
    pub fn host(destination: impl Into<String>, gateway: Ipv4Addr, dev: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            next_hop: NextHop::Via {
                gateway,
                dev: dev.into(),
            },
        }
    }

    /// Default route out of `dev`
    pub fn default_dev(dev: impl Into<String>) -> Self {
        Self {
            destination: "default".into(),
            next_hop: NextHop::Dev(dev.into()),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Arguments after `ip route add`
    fn spec_args(&self) -> Vec<String> {
        let mut args = vec![self.destination.clone()];
        match &self.next_hop {
            NextHop::Via { gateway, dev } => {
                args.extend(["via".into(), gateway.to_string(), "dev".into(), dev.clone()]);
            }
            NextHop::Dev(dev) => {
                args.extend(["dev".into(), dev.clone()]);
            }
        }
        args
    }

    /// Whether a route for this destination exists in `ns`
    pub fn exists(&self, shell: &Shell, ns: &Namespace) -> Result<bool> {
        let output = shell.query(
            "ip",
            &["-n", ns.name(), "route", "show", &self.destination],
        )?;
        Ok(output.success && !output.stdout.trim().is_empty())
    }

    /// Add the route unless one for this destination exists
    ///
    /// Returns true when the route was added.
    pub fn ensure(&self, shell: &Shell, ns: &Namespace) -> Result<bool> {
        if self.exists(shell, ns)? {
            tracing::debug!(route = %self, namespace = %ns.name(), "route already present");
            return Ok(false);
        }

        let spec = self.spec_args();
        let mut args = vec!["-n", ns.name(), "route", "add"];
        args.extend(spec.iter().map(String::as_str));
        shell.apply("ip", &args)?;

        tracing::info!(route = %self, namespace = %ns.name(), "added route");
        Ok(true)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.spec_args().join(" "))
    }
}
