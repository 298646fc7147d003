use std::time::Duration;

use anyhow::{Context, bail};
use pnet::datalink::{self, Channel, Config, DataLinkReceiver};
use pnet::packet::Packet;
use pnet::packet::arp::{ArpOperations, ArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::util::MacAddr;
use tokio::sync::{mpsc, watch};
use tokio::task;
use tracing::{error, info};

use crate::net::scope::NetworkScope;
use crate::reporter::Sighting;

// How long a capture read may block before the loop re-checks the stop signal.
const CAPTURE_POLL: Duration = Duration::from_millis(200);

/// Passive observer for one interface: captures ARP frames and turns every
/// non-self-originated one into an IP+MAC sighting.
pub struct Watcher {
    scope: NetworkScope,
    sightings: mpsc::Sender<Sighting>,
}

impl Watcher {
    pub fn new(scope: NetworkScope, sightings: mpsc::Sender<Sighting>) -> Self {
        Self { scope, sightings }
    }

    /// Opens the capture channel and spawns the capture loop. Setup errors
    /// are returned here, before the loop starts; once running, a capture
    /// read error terminates the loop and is logged against the interface.
    pub fn start(self, stop: watch::Receiver<bool>) -> anyhow::Result<task::JoinHandle<()>> {
        let config = Config {
            read_timeout: Some(CAPTURE_POLL),
            ..Default::default()
        };
        let rx = match datalink::channel(&self.scope.interface, config) {
            Ok(Channel::Ethernet(tx, rx)) => {
                drop(tx); // the watcher only listens
                rx
            }
            Ok(_) => bail!("non-ethernet channel for {}", self.scope.iface_name()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("opening capture on {}", self.scope.iface_name()));
            }
        };

        info!("watcher capturing ARP on {}", self.scope.iface_name());
        Ok(task::spawn_blocking(move || {
            let iface = self.scope.iface_name().to_string();
            if let Err(err) = self.capture_loop(rx, stop) {
                error!("watcher on interface {iface} crashed: {err:#}");
            }
        }))
    }

    // The channel halves are dropped on every exit path, releasing the
    // capture handle.
    fn capture_loop(
        self,
        mut rx: Box<dyn DataLinkReceiver>,
        stop: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        loop {
            if *stop.borrow() {
                return Ok(());
            }
            match rx.next() {
                Ok(frame) => {
                    let Some(sighting) = parse_frame(frame, self.scope.mac()) else {
                        continue;
                    };
                    if self.sightings.blocking_send(sighting).is_err() {
                        return Ok(());
                    }
                }
                Err(err) if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::Interrupted
                ) => continue,
                Err(err) => return Err(err).context("packet capture read failed"),
            }
        }
    }
}

/// Extracts a sighting from a captured frame. Non-ARP frames are filtered
/// out, as are ARP requests whose sender is the local interface itself (a
/// probe this process or the OS stack generated, not a foreign host).
fn parse_frame(frame: &[u8], own_mac: MacAddr) -> Option<Sighting> {
    let ethernet = EthernetPacket::new(frame)?;
    if ethernet.get_ethertype() != EtherTypes::Arp {
        return None;
    }
    let arp = ArpPacket::new(ethernet.payload())?;
    if arp.get_operation() == ArpOperations::Request && arp.get_sender_hw_addr() == own_mac {
        return None;
    }
    Some(Sighting {
        ip: arp.get_sender_proto_addr(),
        mac: Some(arp.get_sender_hw_addr()),
    })
}



// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
