//! Network plumbing for the isolated namespace
//!
//! Provides:
//! - Named network namespace management and its resolver overlay
//! - Interface address and link state handling
//! - Veth pair creation linking the host to the namespace
//! - Route reconciliation inside the namespace
//! - IPv4 forwarding and the NAT/forward rule set

pub mod firewall;
pub mod link;
pub mod netns;
pub mod route;
pub mod veth;

pub use firewall::RuleSet;
pub use link::Interface;
pub use netns::Namespace;
pub use route::Route;
pub use veth::VethPair;
