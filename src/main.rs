//! vpnns - network namespace routed through a WireGuard tunnel
//!
//! Provisions a named Linux network namespace whose traffic leaves only
//! through a wg-quick tunnel, reconciling against live kernel state on every
//! run.

mod cli;
mod error;
mod lock;
mod manifest;
mod network;
mod provision;
mod retry;
mod sys;
mod tunnel;

#[cfg(test)]
mod testing;

use clap::Parser;
use cli::{Cli, Commands};
use error::Result;
use lock::RunLock;
use manifest::Config;
use provision::{Provisioner, StartOutcome, StatusReport, StopOutcome};
use sys::{Shell, SystemRunner};
use tracing_subscriber::{EnvFilter, fmt};
use tunnel::TunnelConfig;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = cli::parse_exit_code(&e);
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

/// Log to stderr; RUST_LOG overrides the verbosity flag
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let load = || manifest::load_or_default(cli.config.as_deref());

    match cli.command {
        Commands::Start { dry_run } => start(&load()?, dry_run),
        Commands::Stop { dry_run } => stop(&load()?, dry_run),
        Commands::Status { json } => status(&load()?, json),
        Commands::Check => check(&load()?),
        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
            Ok(())
        }
    }
}

fn runner(config: &Config) -> SystemRunner {
    SystemRunner::new(config.elevation, config.command_timeout_secs)
}

fn start(config: &Config, dry_run: bool) -> Result<()> {
    let _lock = take_lock(config, dry_run)?;
    let runner = runner(config);
    let prov = Provisioner::new(config, Shell::new(&runner, dry_run))?;

    match prov.start()? {
        StartOutcome::AlreadyActive => {
            println!("Namespace '{}' is already active.", config.namespace)
        }
        StartOutcome::Started => println!("Namespace '{}' started.", config.namespace),
        StartOutcome::Degraded => println!(
            "Namespace '{}' started without a working tunnel.",
            config.namespace
        ),
    }
    Ok(())
}

fn stop(config: &Config, dry_run: bool) -> Result<()> {
    let _lock = take_lock(config, dry_run)?;
    let runner = runner(config);
    let prov = Provisioner::new(config, Shell::new(&runner, dry_run))?;

    match prov.stop()? {
        StopOutcome::NotActive => println!("Namespace '{}' is not active.", config.namespace),
        StopOutcome::Stopped => println!("Namespace '{}' stopped.", config.namespace),
    }
    Ok(())
}

fn status(config: &Config, json: bool) -> Result<()> {
    let runner = runner(config);
    let prov = Provisioner::new(config, Shell::new(&runner, false))?;
    let report = prov.status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_status(&report);
    }
    Ok(())
}

/// Serialize start/stop runs; dry runs change nothing and skip the lock
///
/// Falls back to a per-user lock directory when the configured one cannot
/// be created by the invoking user.
fn take_lock(config: &Config, dry_run: bool) -> Result<Option<RunLock>> {
    if dry_run {
        return Ok(None);
    }

    let candidates = [
        config.lock_path(),
        lock::user_lock_dir().join(format!("{}.lock", config.namespace)),
    ];
    RunLock::acquire_first(&candidates).map(Some)
}

fn print_status(report: &StatusReport) {
    let state = if report.active { "active" } else { "inactive" };
    println!("{:<12} {}", "NAMESPACE", report.namespace);
    println!("{:<12} {}", "STATE", state);

    let Some(tunnel) = &report.tunnel else {
        if report.active {
            println!("{:<12} down", "TUNNEL");
        }
        return;
    };

    let handshake = if tunnel.has_handshake() {
        "handshake ok"
    } else {
        "no handshake"
    };
    println!("{:<12} {} ({})", "TUNNEL", tunnel.interface, handshake);
    if let Some(port) = tunnel.listening_port {
        println!("{:<12} {}", "PORT", port);
    }
    for peer in &tunnel.peers {
        println!();
        println!("  peer:             {}", peer.public_key);
        if let Some(endpoint) = &peer.endpoint {
            println!("  endpoint:         {}", endpoint);
        }
        println!(
            "  latest handshake: {}",
            peer.latest_handshake.as_deref().unwrap_or("never")
        );
        if let Some(transfer) = &peer.transfer {
            println!("  transfer:         {}", transfer);
        }
    }
}

fn check(config: &Config) -> Result<()> {
    // Configuration was already validated on load
    println!("Configuration is valid.");
    println!("\nNamespace:  {}", config.namespace);
    println!("Uplink:     {}", config.uplink);
    println!(
        "Veth:       {} ({}) <-> {} ({})",
        config.veth.host, config.veth.host_address, config.veth.peer, config.veth.peer_address
    );
    println!("Resolver:   {}", config.resolv_conf_path().display());

    let tunnel = TunnelConfig::load(&config.tunnel_config)?;
    let endpoint = tunnel.endpoint_host()?;
    println!("\nTunnel config: {}", config.tunnel_config.display());
    println!("  interface: {}", config.tunnel_interface()?);
    println!("  endpoint:  {}", endpoint);
    if !tunnel.addresses.is_empty() {
        println!("  address:   {}", tunnel.addresses.join(", "));
    }
    if !tunnel.dns.is_empty() {
        println!("  dns:       {}", tunnel.dns.join(", "));
    }
    for peer in &tunnel.peers {
        println!(
            "  peer:      {} allowed {}",
            peer.public_key.as_deref().unwrap_or("(no key)"),
            peer.allowed_ips.join(", ")
        );
    }
    if !tunnel.has_private_key {
        tracing::warn!("tunnel config has no PrivateKey");
    }

    Ok(())
}
