//! In-memory host for tests
//!
//! [`FakeHost`] answers the `ip`, `wg-quick`, `wg`, `iptables`, `sysctl` and
//! `ping` invocations vpnns issues, keeping namespaces, links, addresses,
//! routes and filter rules in memory. Failures mimic the real tools: a
//! non-zero exit with a message on stderr.

use crate::error::Result;
use crate::sys::{CommandOutput, CommandRunner, render};
use crate::tunnel::TunnelConfig;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone)]
struct Link {
    namespace: Option<String>,
    name: String,
    up: bool,
    addrs: Vec<String>,
    peer: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    commands: Vec<String>,
    forwarding: bool,
    namespaces: Vec<String>,
    links: Vec<Link>,
    routes: BTreeMap<String, Vec<String>>,
    iptables: Vec<String>,
    endpoints: BTreeMap<String, String>,
    tunnel_failures: u32,
    fail_pings: bool,
    fail_iptables: bool,
}

impl State {
    fn link(&self, ns: Option<&str>, name: &str) -> Option<&Link> {
        self.links
            .iter()
            .find(|l| l.namespace.as_deref() == ns && l.name == name)
    }

    fn link_mut(&mut self, ns: Option<&str>, name: &str) -> Option<&mut Link> {
        self.links
            .iter_mut()
            .find(|l| l.namespace.as_deref() == ns && l.name == name)
    }

    fn push_link(&mut self, ns: Option<&str>, name: &str, peer: Option<&str>) {
        self.links.push(Link {
            namespace: ns.map(str::to_string),
            name: name.to_string(),
            up: false,
            addrs: Vec::new(),
            peer: peer.map(str::to_string),
        });
    }

    /// Remove a link and its veth peer wherever it lives
    fn remove_link(&mut self, ns: Option<&str>, name: &str) {
        let peer = self.link(ns, name).and_then(|l| l.peer.clone());
        self.links
            .retain(|l| !(l.namespace.as_deref() == ns && l.name == name));
        if let Some(peer) = peer {
            self.links.retain(|l| l.name != peer);
        }
    }
}

/// Simulated host network stack
#[derive(Debug, Default)]
pub struct FakeHost {
    state: RefCell<State>,
}

fn missing_device(name: &str) -> CommandOutput {
    CommandOutput::failed(1, format!("Device \"{}\" does not exist.\n", name))
}

fn cannot_find(name: &str) -> CommandOutput {
    CommandOutput::failed(1, format!("Cannot find device \"{}\"\n", name))
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    // Inspection

    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state.borrow_mut().commands.clear();
    }

    pub fn ran(&self, command: &str) -> bool {
        self.state.borrow().commands.iter().any(|c| c == command)
    }

    pub fn forwarding_enabled(&self) -> bool {
        self.state.borrow().forwarding
    }

    pub fn namespace_exists(&self, name: &str) -> bool {
        self.state.borrow().namespaces.iter().any(|n| n == name)
    }

    pub fn link_exists(&self, ns: Option<&str>, name: &str) -> bool {
        self.state.borrow().link(ns, name).is_some()
    }

    pub fn is_up(&self, ns: Option<&str>, name: &str) -> bool {
        self.state.borrow().link(ns, name).is_some_and(|l| l.up)
    }

    pub fn address(&self, ns: Option<&str>, name: &str) -> Option<String> {
        self.state
            .borrow()
            .link(ns, name)
            .and_then(|l| l.addrs.first().cloned())
    }

    pub fn routes(&self, ns: &str) -> Vec<String> {
        self.state
            .borrow()
            .routes
            .get(ns)
            .cloned()
            .unwrap_or_default()
    }

    pub fn iptables_rules(&self) -> Vec<String> {
        self.state.borrow().iptables.clone()
    }

    // Seeding

    pub fn add_link(&self, ns: Option<&str>, name: &str) {
        self.state.borrow_mut().push_link(ns, name, None);
    }

    /// Veth pair with both ends still on the host
    pub fn add_veth_pair(&self, host: &str, peer: &str) {
        let mut state = self.state.borrow_mut();
        state.push_link(None, host, Some(peer));
        state.push_link(None, peer, Some(host));
    }

    pub fn set_address(&self, ns: Option<&str>, name: &str, addr: &str) {
        if let Some(link) = self.state.borrow_mut().link_mut(ns, name) {
            link.addrs.push(addr.to_string());
        }
    }

    pub fn add_route(&self, ns: &str, route: &str) {
        self.state
            .borrow_mut()
            .routes
            .entry(ns.to_string())
            .or_default()
            .push(route.to_string());
    }

    // Fault injection

    /// Fail the next `count` wg-quick up invocations
    pub fn fail_tunnel_attempts(&self, count: u32) {
        self.state.borrow_mut().tunnel_failures = count;
    }

    pub fn fail_pings(&self) {
        self.state.borrow_mut().fail_pings = true;
    }

    pub fn fail_iptables(&self) {
        self.state.borrow_mut().fail_iptables = true;
    }

    // Tools

    fn sysctl(&self, args: &[&str]) -> CommandOutput {
        match args {
            ["-w", "net.ipv4.ip_forward=1"] => {
                self.state.borrow_mut().forwarding = true;
                CommandOutput::ok("net.ipv4.ip_forward = 1\n")
            }
            _ => CommandOutput::failed(255, "sysctl: unsupported\n"),
        }
    }

    fn iptables(&self, args: &[&str]) -> CommandOutput {
        let mut state = self.state.borrow_mut();
        if state.fail_iptables {
            return CommandOutput::failed(
                4,
                "iptables: Permission denied (you must be root).\n",
            );
        }

        match args {
            ["-t", "nat", "-F"] => state.iptables.retain(|r| !r.starts_with("-t nat")),
            ["-F", "FORWARD"] => state.iptables.retain(|r| !r.starts_with("-A FORWARD")),
            _ if args.contains(&"-A") => state.iptables.push(args.join(" ")),
            _ => return CommandOutput::failed(2, "iptables: bad arguments\n"),
        }

        CommandOutput::ok("")
    }

    fn ip(&self, args: &[&str]) -> CommandOutput {
        let (ns, args) = match args {
            ["-n", ns, rest @ ..] => (Some(*ns), rest),
            _ => (None, args),
        };

        if let Some(ns) = ns
            && !self.namespace_exists(ns)
        {
            return CommandOutput::failed(
                1,
                format!(
                    "Cannot open network namespace \"{}\": No such file or directory\n",
                    ns
                ),
            );
        }

        match args {
            ["netns", rest @ ..] => self.netns(rest),
            ["link", rest @ ..] => self.link(ns, rest),
            ["-4", "-o", "addr", "show", "dev", name] => self.addr_show(ns, name),
            ["addr", "add", addr, "dev", name] => self.addr_add(ns, addr, name),
            ["route", "show", dest] => self.route_show(ns.unwrap_or(""), dest),
            ["route", "add", rest @ ..] => self.route_add(ns.unwrap_or(""), rest),
            _ => CommandOutput::failed(255, format!("ip: unsupported {:?}\n", args)),
        }
    }

    fn netns(&self, args: &[&str]) -> CommandOutput {
        match args {
            ["list"] => {
                let state = self.state.borrow();
                let listing: String = state
                    .namespaces
                    .iter()
                    .enumerate()
                    .rev()
                    .map(|(id, name)| format!("{} (id: {})\n", name, id))
                    .collect();
                CommandOutput::ok(listing)
            }
            ["add", name] => {
                if self.namespace_exists(name) {
                    return CommandOutput::failed(
                        1,
                        format!("Cannot create namespace file \"/run/netns/{}\": File exists\n", name),
                    );
                }
                let mut state = self.state.borrow_mut();
                state.namespaces.push(name.to_string());
                state.push_link(Some(*name), "lo", None);
                CommandOutput::ok("")
            }
            ["delete", name] => {
                if !self.namespace_exists(name) {
                    return CommandOutput::failed(
                        1,
                        format!(
                            "Cannot remove namespace file \"/run/netns/{}\": No such file or directory\n",
                            name
                        ),
                    );
                }
                let mut state = self.state.borrow_mut();
                state.namespaces.retain(|n| n != name);
                let inside: Vec<String> = state
                    .links
                    .iter()
                    .filter(|l| l.namespace.as_deref() == Some(*name))
                    .map(|l| l.name.clone())
                    .collect();
                for link in inside {
                    state.remove_link(Some(*name), &link);
                }
                state.routes.remove(*name);
                state.endpoints.remove(*name);
                CommandOutput::ok("")
            }
            ["exec", name, program, rest @ ..] => {
                if !self.namespace_exists(name) {
                    return CommandOutput::failed(
                        1,
                        format!(
                            "Cannot open network namespace \"{}\": No such file or directory\n",
                            name
                        ),
                    );
                }
                self.exec(name, program, rest)
            }
            _ => CommandOutput::failed(255, "ip netns: unsupported\n"),
        }
    }

    fn exec(&self, ns: &str, program: &str, args: &[&str]) -> CommandOutput {
        match (program, args) {
            ("wg-quick", ["up", path]) => self.wg_quick_up(ns, path),
            ("wg-quick", ["down", path]) => {
                let iface = stem(path);
                let mut state = self.state.borrow_mut();
                if state.link(Some(ns), &iface).is_none() {
                    return CommandOutput::failed(
                        1,
                        format!("wg-quick: `{}' is not a WireGuard interface\n", iface),
                    );
                }
                state.remove_link(Some(ns), &iface);
                state.endpoints.remove(ns);
                if let Some(routes) = state.routes.get_mut(ns) {
                    let dev = format!("dev {}", iface);
                    routes.retain(|r| !r.ends_with(&dev));
                }
                CommandOutput::ok("")
            }
            ("wg", ["show", iface]) => {
                let state = self.state.borrow();
                if state.link(Some(ns), iface).is_none() {
                    return CommandOutput::failed(
                        1,
                        format!("Unable to access interface: No such device\n{}\n", iface),
                    );
                }
                let endpoint = state.endpoints.get(ns).cloned().unwrap_or_default();
                CommandOutput::ok(format!(
                    "interface: {iface}\n  public key: ZmFrZQ==\n  private key: (hidden)\n  listening port: 51820\n\npeer: cGVlcg==\n  endpoint: {endpoint}\n  allowed ips: 0.0.0.0/0\n  latest handshake: 5 seconds ago\n  transfer: 1.00 KiB received, 2.00 KiB sent\n"
                ))
            }
            ("ping", _) => {
                if self.state.borrow().fail_pings {
                    CommandOutput::failed(1, "3 packets transmitted, 0 received, 100% packet loss\n")
                } else {
                    CommandOutput::ok("3 packets transmitted, 3 received, 0% packet loss\n")
                }
            }
            _ => CommandOutput::failed(127, format!("{}: command not found\n", program)),
        }
    }

    fn wg_quick_up(&self, ns: &str, path: &str) -> CommandOutput {
        let mut state = self.state.borrow_mut();

        if state.tunnel_failures > 0 {
            state.tunnel_failures -= 1;
            return CommandOutput::failed(
                1,
                "RTNETLINK answers: Operation not supported\n",
            );
        }

        let Ok(content) = std::fs::read_to_string(path) else {
            return CommandOutput::failed(1, format!("wg-quick: `{}' does not exist\n", path));
        };

        let iface = stem(path);
        if state.link(Some(ns), &iface).is_some() {
            return CommandOutput::failed(1, format!("wg-quick: `{}' already exists\n", iface));
        }

        state.push_link(Some(ns), &iface, None);
        if let Some(link) = state.link_mut(Some(ns), &iface) {
            link.up = true;
        }

        let config = TunnelConfig::parse(Path::new(path), &content);
        if let Some(endpoint) = config.peers.iter().find_map(|p| p.endpoint.clone()) {
            state.endpoints.insert(ns.to_string(), endpoint);
        }

        CommandOutput::ok("")
    }

    fn link(&self, ns: Option<&str>, args: &[&str]) -> CommandOutput {
        let mut state = self.state.borrow_mut();

        match args {
            ["show", name] => match state.link(ns, name) {
                Some(link) => CommandOutput::ok(format!(
                    "4: {}: <BROADCAST,MULTICAST{}> mtu 1500\n",
                    link.name,
                    if link.up { ",UP" } else { "" }
                )),
                None => missing_device(name),
            },
            ["add", host, "type", "veth", "peer", "name", peer] => {
                if state.link(ns, host).is_some() || state.link(ns, peer).is_some() {
                    return CommandOutput::failed(2, "RTNETLINK answers: File exists\n");
                }
                state.push_link(ns, host, Some(*peer));
                state.push_link(ns, peer, Some(*host));
                CommandOutput::ok("")
            }
            ["set", name, "netns", target] => {
                if !state.namespaces.iter().any(|n| n == target) {
                    return CommandOutput::failed(
                        1,
                        format!("Invalid \"netns\" value \"{}\"\n", target),
                    );
                }
                match state.link_mut(ns, name) {
                    Some(link) => {
                        link.namespace = Some(target.to_string());
                        link.up = false;
                        CommandOutput::ok("")
                    }
                    None => cannot_find(name),
                }
            }
            ["set", name, "up"] => match state.link_mut(ns, name) {
                Some(link) => {
                    link.up = true;
                    CommandOutput::ok("")
                }
                None => cannot_find(name),
            },
            ["delete", name] => {
                if state.link(ns, name).is_none() {
                    return cannot_find(name);
                }
                state.remove_link(ns, name);
                CommandOutput::ok("")
            }
            _ => CommandOutput::failed(255, format!("ip link: unsupported {:?}\n", args)),
        }
    }

    fn addr_show(&self, ns: Option<&str>, name: &str) -> CommandOutput {
        let state = self.state.borrow();
        match state.link(ns, name) {
            Some(link) => CommandOutput::ok(
                link.addrs
                    .iter()
                    .map(|a| {
                        format!(
                            "4: {name}    inet {a} scope global {name}\\       valid_lft forever preferred_lft forever\n"
                        )
                    })
                    .collect::<String>(),
            ),
            None => missing_device(name),
        }
    }

    fn addr_add(&self, ns: Option<&str>, addr: &str, name: &str) -> CommandOutput {
        let mut state = self.state.borrow_mut();
        match state.link_mut(ns, name) {
            Some(link) if link.addrs.iter().any(|a| a == addr) => {
                CommandOutput::failed(2, "RTNETLINK answers: File exists\n")
            }
            Some(link) => {
                link.addrs.push(addr.to_string());
                CommandOutput::ok("")
            }
            None => cannot_find(name),
        }
    }

    fn route_show(&self, ns: &str, dest: &str) -> CommandOutput {
        let state = self.state.borrow();
        let matching: String = state
            .routes
            .get(ns)
            .into_iter()
            .flatten()
            .filter(|r| r.split_whitespace().next() == Some(dest))
            .map(|r| format!("{}\n", r))
            .collect();
        CommandOutput::ok(matching)
    }

    fn route_add(&self, ns: &str, spec: &[&str]) -> CommandOutput {
        let mut state = self.state.borrow_mut();
        let Some(dest) = spec.first() else {
            return CommandOutput::failed(255, "ip route: missing destination\n");
        };

        let scope = if ns.is_empty() { None } else { Some(ns) };
        if let Some(pos) = spec.iter().position(|t| *t == "dev")
            && let Some(dev) = spec.get(pos + 1)
            && state.link(scope, dev).is_none()
        {
            return cannot_find(dev);
        }

        let routes = state.routes.entry(ns.to_string()).or_default();
        if routes
            .iter()
            .any(|r| r.split_whitespace().next() == Some(*dest))
        {
            return CommandOutput::failed(2, "RTNETLINK answers: File exists\n");
        }

        routes.push(spec.join(" "));
        CommandOutput::ok("")
    }
}

/// `install -D -m MODE SRC DST` against the real filesystem
fn install(args: &[&str]) -> CommandOutput {
    let ["-D", "-m", _, source, target] = args else {
        return CommandOutput::failed(1, "install: unsupported arguments\n");
    };

    let target = Path::new(target);
    let copied = target
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|_| std::fs::copy(source, target));

    match copied {
        Ok(_) => CommandOutput::ok(""),
        Err(e) => CommandOutput::failed(1, format!("install: {}\n", e)),
    }
}

/// Interface name wg-quick derives from a config path
fn stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl CommandRunner for FakeHost {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        self.state
            .borrow_mut()
            .commands
            .push(render(program, args));

        let output = match program {
            "ip" => self.ip(args),
            "iptables" => self.iptables(args),
            "sysctl" => self.sysctl(args),
            "install" => install(args),
            _ => CommandOutput::failed(127, format!("{}: command not found\n", program)),
        };

        Ok(output)
    }
}
