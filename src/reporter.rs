use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use pnet::util::MacAddr;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::metrics;
use crate::presence;
use crate::storage::StorageSink;

/// Capacity of the sighting queue. Kept small so a stalled reporter applies
/// backpressure to the pingers and watchers instead of growing memory.
pub const SIGHTING_QUEUE_DEPTH: usize = 10;

/// One observation that a host is alive, from either the active or the
/// passive source. ICMP sightings carry no hardware address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    pub ip: Ipv4Addr,
    pub mac: Option<MacAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PresenceState {
    New,
    Online,
    Offline,
}

// Maybe remove hosts after X days of being offline?
#[derive(Debug, Clone, PartialEq, Eq)]
struct HostRecord {
    mac: Option<MacAddr>,
    seen: Instant,
    state: PresenceState,
}

/// Single consumer of the sighting queue and sole owner of the host table.
///
/// Ingestion is continuous, classification happens once per report interval;
/// that split keeps arrival jitter out of the presence decisions and gives a
/// single serialized point where state changes are decided.
pub struct Reporter<S> {
    interval: Duration,
    offline_lag: Duration,
    sightings: mpsc::Receiver<Sighting>,
    storage: S,
    hosts: HashMap<String, HostRecord>,
}

impl<S: StorageSink> Reporter<S> {
    pub fn new(
        interval: Duration,
        offline_lag: Duration,
        sightings: mpsc::Receiver<Sighting>,
        storage: S,
    ) -> Self {
        Self {
            interval,
            offline_lag,
            sightings,
            storage,
            hosts: HashMap::new(),
        }
    }

    /// Runs until every sighting producer is gone.
    pub async fn run(mut self) {
        // First tick fires one full interval after start, like the senders.
        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                sighting = self.sightings.recv() => match sighting {
                    Some(sighting) => self.process_at(sighting, Instant::now()),
                    None => return,
                },
                _ = ticker.tick() => self.sweep_at(Instant::now()),
            }
        }
    }

    fn process_at(&mut self, sighting: Sighting, now: Instant) {
        match sighting.mac {
            Some(mac) => debug!("IP {} is at {}", sighting.ip, mac),
            None => debug!("IP {} is alive", sighting.ip),
        }

        let ip = sighting.ip.to_string();
        match self.hosts.get_mut(&ip) {
            Some(record) => {
                if let Some(mac) = sighting.mac {
                    if let Some(old) = record.mac
                        && old != mac
                    {
                        info!("{ip} changed from {old} to {mac}");
                    }
                    record.mac = Some(mac);
                }
                record.seen = now;
            }
            None => {
                self.hosts.insert(ip, HostRecord {
                    mac: sighting.mac,
                    seen: now,
                    state: PresenceState::New,
                });
            }
        }
    }

    fn sweep_at(&mut self, now: Instant) {
        metrics::KNOWN_HOSTS.set(self.hosts.len() as i64);

        let silence_limit = self.interval + self.offline_lag;
        for (ip, record) in self.hosts.iter_mut() {
            if record.state == PresenceState::New {
                info!("new host discovered: {ip}");
                record.state = PresenceState::Online;
                presence::new_host(ip, record.mac);
            }

            if now.duration_since(record.seen) >= silence_limit {
                if record.state != PresenceState::Offline {
                    info!(
                        "IP {} ({}) not seen in last {}",
                        ip,
                        fmt_mac(record.mac),
                        humantime::format_duration(silence_limit)
                    );
                    record.state = PresenceState::Offline;
                    presence::host_offline(ip, record.mac);
                }
            } else if record.state == PresenceState::Offline {
                info!("IP {} ({}) is back", ip, fmt_mac(record.mac));
                record.state = PresenceState::Online;
                presence::host_online(ip, record.mac);
            }

            // Hosts that have only ever been seen over ICMP are tracked but
            // not exported; export requires a learned hardware address.
            if let Some(mac) = record.mac {
                let online = record.state == PresenceState::Online;
                metrics::HOST_UP
                    .with_label_values(&[ip.as_str(), &mac.to_string()])
                    .set(i64::from(online));
                self.storage.write_point(ip, mac, online);
            }
        }
    }
}

fn fmt_mac(mac: Option<MacAddr>) -> String {
    mac.map(|mac| mac.to_string()).unwrap_or_else(|| "unknown".to_string())
}



// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
