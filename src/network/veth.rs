//! Veth pair management
//!
//! A veth pair is a virtual ethernet cable. One end stays on the host, the
//! other is moved into the namespace. Deleting the namespace destroys the
//! peer end, which takes the host end down with it.

use crate::error::Result;
use crate::network::link::Interface;
use crate::network::netns::Namespace;
use crate::sys::Shell;

/// A veth pair linking the host to a namespace
#[derive(Debug, Clone)]
pub struct VethPair {
    /// Host-side interface name (e.g., "veth0")
    host_side: String,
    /// Namespace-side interface name (e.g., "veth1")
    peer_side: String,
}

impl VethPair {
    pub fn new(host_side: impl Into<String>, peer_side: impl Into<String>) -> Self {
        Self {
            host_side: host_side.into(),
            peer_side: peer_side.into(),
        }
    }

    /// Get the host-side interface name
    pub fn host_side(&self) -> &str {
        &self.host_side
    }

    /// Get the namespace-side interface name
    pub fn peer_side(&self) -> &str {
        &self.peer_side
    }

    /// Host end as an [`Interface`]
    pub fn host_interface(&self) -> Interface {
        Interface::host(&self.host_side)
    }

    /// Namespace end as an [`Interface`]
    pub fn peer_interface(&self, ns: &Namespace) -> Interface {
        Interface::in_namespace(&self.peer_side, ns.name())
    }

    /// Whether the host end exists
    pub fn exists(&self, shell: &Shell) -> Result<bool> {
        self.host_interface().exists(shell)
    }

    /// Create the pair and move the peer into `ns` unless the host end exists
    ///
    /// A pair whose peer never left the host namespace gets the peer moved.
    /// Returns true when the pair was created.
    pub fn ensure(&self, shell: &Shell, ns: &Namespace) -> Result<bool> {
        if self.exists(shell)? {
            if Interface::host(&self.peer_side).exists(shell)? {
                tracing::info!(peer = %self.peer_side, "moving stray veth peer into namespace");
                self.move_peer(shell, ns)?;
            } else {
                tracing::debug!(veth = %self.host_side, "veth pair already exists");
            }
            return Ok(false);
        }

        shell.apply(
            "ip",
            &[
                "link",
                "add",
                &self.host_side,
                "type",
                "veth",
                "peer",
                "name",
                &self.peer_side,
            ],
        )?;

        self.move_peer(shell, ns)?;

        tracing::info!(
            host = %self.host_side,
            peer = %self.peer_side,
            namespace = %ns.name(),
            "created veth pair"
        );
        Ok(true)
    }

    fn move_peer(&self, shell: &Shell, ns: &Namespace) -> Result<()> {
        shell.apply("ip", &["link", "set", &self.peer_side, "netns", ns.name()])
    }

    /// Delete the host end if it is still present
    ///
    /// Destroying either end destroys both.
    pub fn destroy(&self, shell: &Shell) -> Result<()> {
        if !self.exists(shell)? {
            tracing::debug!(veth = %self.host_side, "veth pair already gone");
            return Ok(());
        }

        self.host_interface().delete(shell)?;
        tracing::info!(veth = %self.host_side, "deleted veth pair");
        Ok(())
    }
}
