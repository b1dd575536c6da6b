//! Namespace provisioning
//!
//! The [`Provisioner`] reconciles the host towards a namespace whose only way
//! out is a WireGuard tunnel:
//! - `start` builds the namespace, veth pair, resolver, tunnel, routes and
//!   filter rules, skipping anything that already exists
//! - `stop` tears it down again
//! - `status` reports without changing anything
//!
//! Every step re-reads kernel state; nothing is remembered between runs.

use crate::error::Result;
use crate::manifest::{Config, TunnelFailurePolicy};
use crate::network::{Namespace, Route, RuleSet, VethPair, firewall};
use crate::retry::RetryPolicy;
use crate::sys::Shell;
use crate::tunnel::{Tunnel, TunnelConfig, TunnelStatus};
use serde::Serialize;
use std::fs;

/// What `start` ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Namespace was already active; nothing else was touched
    AlreadyActive,
    /// Everything provisioned and the tunnel came up
    Started,
    /// Provisioned without a working tunnel
    Degraded,
}

/// What `stop` ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Namespace was not active
    NotActive,
    /// Namespace, veth pair and rules removed
    Stopped,
}

/// Result of `status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub namespace: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<TunnelStatus>,
}

/// Provisioner for the isolated namespace
pub struct Provisioner<'a> {
    config: &'a Config,
    shell: Shell<'a>,
    namespace: Namespace,
    veth: VethPair,
    tunnel: Tunnel,
    retry: RetryPolicy,
}

impl<'a> Provisioner<'a> {
    /// Create a provisioner from config
    pub fn new(config: &'a Config, shell: Shell<'a>) -> Result<Self> {
        let tunnel = Tunnel::new(&config.tunnel_config, config.tunnel_interface()?);

        Ok(Self {
            config,
            shell,
            namespace: Namespace::new(&config.namespace),
            veth: VethPair::new(&config.veth.host, &config.veth.peer),
            tunnel,
            retry: RetryPolicy::from_config(&config.retry),
        })
    }

    /// Whether the namespace is currently listed
    pub fn is_active(&self) -> Result<bool> {
        self.namespace.exists(&self.shell)
    }

    /// Provision the namespace and route it through the tunnel
    pub fn start(&self) -> Result<StartOutcome> {
        let shell = &self.shell;
        let ns = &self.namespace;

        firewall::enable_ip_forwarding(shell)?;

        if self.is_active()? {
            tracing::info!(namespace = %ns.name(), "namespace already active, nothing to do");
            return Ok(StartOutcome::AlreadyActive);
        }

        tracing::info!(namespace = %ns.name(), "starting");

        ns.ensure(shell)?;
        self.veth.ensure(shell, ns)?;

        let host_addr = self
            .veth
            .host_interface()
            .ensure_address(shell, self.config.veth.host_address)?;
        self.veth
            .peer_interface(ns)
            .ensure_address(shell, self.config.veth.peer_address)?;
        ns.loopback_up(shell)?;

        ns.write_resolv_conf(
            shell,
            &self.config.resolv_conf_path(),
            &self.config.dns.nameservers,
        )?;

        let tunnel_up = self.bring_up_tunnel()?;

        let tunnel_config = TunnelConfig::load(&self.config.tunnel_config)?;
        let peer_host = tunnel_config.endpoint_host()?;

        Route::host(&peer_host, host_addr.addr(), self.veth.peer_side()).ensure(shell, ns)?;

        if tunnel_up || shell.is_dry_run() || self.tunnel.is_present(shell, ns)? {
            Route::default_dev(self.tunnel.interface()).ensure(shell, ns)?;
        } else {
            tracing::warn!(
                interface = %self.tunnel.interface(),
                "tunnel interface missing, skipping default route"
            );
        }

        RuleSet::for_tunnel(
            &self.config.uplink,
            self.tunnel.interface(),
            self.veth.host_side(),
        )
        .apply(shell)?;

        if self.config.diagnostics.enabled {
            self.diagnose(&peer_host);
        }

        if tunnel_up {
            tracing::info!(namespace = %ns.name(), "started");
            Ok(StartOutcome::Started)
        } else {
            tracing::warn!(namespace = %ns.name(), "started without a working tunnel");
            Ok(StartOutcome::Degraded)
        }
    }

    /// Run wg-quick under the retry policy
    ///
    /// Returns false when every attempt failed and the failure policy allows
    /// carrying on.
    fn bring_up_tunnel(&self) -> Result<bool> {
        let result = self.retry.run("tunnel bring-up", |attempt| {
            tracing::debug!(attempt, max = self.retry.max_attempts(), "bringing tunnel up");
            self.tunnel.up(&self.shell, &self.namespace)
        });

        match result {
            Ok(()) => Ok(true),
            Err(e) => match self.config.on_tunnel_failure {
                TunnelFailurePolicy::Abort => Err(e),
                TunnelFailurePolicy::Continue => {
                    tracing::error!("{}; continuing without tunnel", e);
                    Ok(false)
                }
            },
        }
    }

    /// Print the namespace resolver and probe connectivity
    ///
    /// Purely informational; failures are reported and ignored.
    fn diagnose(&self, peer_host: &str) {
        let ns = &self.namespace;
        let shell = &self.shell;

        if shell.is_dry_run() {
            tracing::info!("skipping diagnostics in dry run");
            return;
        }

        let resolv = self.config.resolv_conf_path();
        match fs::read_to_string(&resolv) {
            Ok(content) => {
                println!("{}:", resolv.display());
                print!("{}", content);
            }
            Err(e) => tracing::warn!("cannot read {}: {}", resolv.display(), e),
        }

        let count = self.config.diagnostics.ping_count.to_string();
        let targets = std::iter::once(peer_host)
            .chain(self.config.diagnostics.targets.iter().map(String::as_str));

        for target in targets {
            println!("Pinging {} from namespace {}...", target, ns.name());
            match ns.exec_probe(shell, "ping", &["-c", &count, target]) {
                Some(output) => {
                    print!("{}", output.output());
                    if !output.success {
                        tracing::warn!(host = %target, "ping failed");
                    }
                }
                None => tracing::warn!(host = %target, "ping could not run"),
            }
        }
    }

    /// Tear the namespace down
    pub fn stop(&self) -> Result<StopOutcome> {
        let shell = &self.shell;
        let ns = &self.namespace;

        if !self.is_active()? {
            tracing::info!(namespace = %ns.name(), "namespace not active, nothing to stop");
            return Ok(StopOutcome::NotActive);
        }

        tracing::info!(namespace = %ns.name(), "stopping");

        // Deleting the namespace destroys the tunnel interface anyway
        if let Err(e) = self.tunnel.down(shell, ns) {
            tracing::warn!("tunnel down failed: {}", e);
        }

        ns.delete(shell)?;
        self.veth.destroy(shell)?;
        firewall::flush(shell)?;

        tracing::info!(namespace = %ns.name(), "stopped");
        Ok(StopOutcome::Stopped)
    }

    /// Report whether the namespace is active and how the tunnel is doing
    pub fn status(&self) -> Result<StatusReport> {
        let active = self.is_active()?;

        let tunnel = if active {
            self.tunnel.status(&self.shell, &self.namespace)?
        } else {
            None
        };

        Ok(StatusReport {
            namespace: self.namespace.name().to_string(),
            active,
            tunnel,
        })
    }
}
