//! Named network namespace management
//!
//! Namespaces are handled through `ip netns`. Files under
//! `/etc/netns/<name>/` are bind-mounted over `/etc` by `ip netns exec`, which
//! is how the namespace gets its own resolver.

use crate::error::{Error, Result};
use crate::sys::{CommandOutput, Shell};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// A named network namespace
#[derive(Debug, Clone)]
pub struct Namespace {
    name: String,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Get the namespace name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check whether `ip netns list` reports this namespace
    pub fn exists(&self, shell: &Shell) -> Result<bool> {
        let output = shell.query("ip", &["netns", "list"])?;

        if !output.success {
            return Err(Error::Network(format!(
                "Failed to list namespaces: {}",
                output.stderr.trim()
            )));
        }

        Ok(is_listed(&output.stdout, &self.name))
    }

    /// Create the namespace unless it already exists
    ///
    /// Returns true when it was created.
    pub fn ensure(&self, shell: &Shell) -> Result<bool> {
        if self.exists(shell)? {
            tracing::debug!(namespace = %self.name, "namespace already exists");
            return Ok(false);
        }

        shell.apply("ip", &["netns", "add", &self.name])?;
        tracing::info!(namespace = %self.name, "created namespace");
        Ok(true)
    }

    /// Delete the namespace, destroying every interface inside it
    pub fn delete(&self, shell: &Shell) -> Result<()> {
        shell.apply("ip", &["netns", "delete", &self.name])?;
        tracing::info!(namespace = %self.name, "deleted namespace");
        Ok(())
    }

    /// Bring the namespace loopback interface up
    pub fn loopback_up(&self, shell: &Shell) -> Result<()> {
        shell.apply("ip", &["-n", &self.name, "link", "set", "lo", "up"])
    }

    /// Run a state-changing command inside the namespace
    pub fn exec(&self, shell: &Shell, program: &str, args: &[&str]) -> Result<()> {
        shell.apply("ip", &self.exec_args(program, args))
    }

    /// Run a read-only command inside the namespace
    pub fn exec_query(&self, shell: &Shell, program: &str, args: &[&str]) -> Result<CommandOutput> {
        shell.query("ip", &self.exec_args(program, args))
    }

    /// Run a diagnostic command inside the namespace
    pub fn exec_probe(&self, shell: &Shell, program: &str, args: &[&str]) -> Option<CommandOutput> {
        shell.probe("ip", &self.exec_args(program, args))
    }

    fn exec_args<'a>(&'a self, program: &'a str, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = vec!["netns", "exec", self.name.as_str(), program];
        full.extend_from_slice(args);
        full
    }

    /// Overwrite the namespace resolver with the given nameservers
    ///
    /// The file is staged in a private temp file and put in place with
    /// `install -D` through the shell, so it is written with the same
    /// elevation as every other change.
    pub fn write_resolv_conf(&self, shell: &Shell, path: &Path, nameservers: &[String]) -> Result<()> {
        if shell.is_dry_run() {
            tracing::info!("would write {}", path.display());
            return Ok(());
        }

        let mut staged = NamedTempFile::new()?;
        staged.write_all(resolv_conf(nameservers).as_bytes())?;
        staged.flush()?;

        let source = staged.path().to_string_lossy().into_owned();
        let target = path.to_string_lossy().into_owned();
        shell.apply("install", &["-D", "-m", "0644", &source, &target])?;

        tracing::info!(path = %path.display(), "wrote namespace resolver");
        Ok(())
    }
}

/// Render resolv.conf content
fn resolv_conf(nameservers: &[String]) -> String {
    nameservers
        .iter()
        .map(|ns| format!("nameserver {}\n", ns))
        .collect()
}

/// Whether `ip netns list` output contains `name`
///
/// Lines look like `vpn (id: 0)` or just `vpn`.
fn is_listed(stdout: &str, name: &str) -> bool {
    stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|entry| entry == name)
}
