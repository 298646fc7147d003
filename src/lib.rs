//! # lanwatch
//!
//! Per-interface LAN host-presence detector. Two independent signal sources
//! feed one aggregator:
//!
//! * **[`pinger`]**: actively sweeps every usable address in the interface's
//!   IPv4 network with ICMP echo requests and listens for replies.
//! * **[`watcher`]**: passively captures ARP traffic on the interface.
//! * **[`reporter`]**: folds both kinds of sightings into a per-host
//!   presence state that decays to offline after a silence window, and
//!   exports state to Prometheus ([`metrics`]) and InfluxDB ([`storage`]).
//!
//! Sightings flow one way, from pinger and watcher through a bounded queue
//! into the reporter. Shutdown flows
//! the other way: a broadcast stop signal ends every send/capture loop, and
//! the pinger closes its raw endpoint to unblock its receive loop.

pub mod cli;
pub mod metrics;
pub mod net;
pub mod pinger;
pub mod presence;
pub mod reporter;
pub mod storage;
pub mod watcher;
