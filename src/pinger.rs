use std::io::Read;
use std::net::{Shutdown, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use pnet::packet::Packet;
use pnet::packet::icmp::echo_request::{IcmpCodes, MutableEchoRequestPacket};
use pnet::packet::icmp::{IcmpPacket, IcmpTypes, checksum};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::sync::{mpsc, watch};
use tokio::task;
use tokio::time;
use tracing::{info, warn};

use crate::metrics;
use crate::net::scope::NetworkScope;
use crate::reporter::Sighting;

const ICMP_HEADER_LEN: usize = 8;
const RECV_BUFFER_LEN: usize = 1500;
// How long a read may block before the receive loop re-checks for closure.
const RECV_POLL: Duration = Duration::from_millis(500);
// Inter-sweep pause floor when a sweep overran its interval.
const MIN_SWEEP_PAUSE: Duration = Duration::from_millis(100);

/// Active prober for one interface: sweeps every address in the scope with
/// an ICMP echo request and listens for echo replies on the same raw
/// endpoint. Replies become IP-only sightings.
pub struct Pinger {
    scope: NetworkScope,
    interval: Duration,
    sightings: mpsc::Sender<Sighting>,
}

impl Pinger {
    pub fn new(scope: NetworkScope, interval: Duration, sightings: mpsc::Sender<Sighting>) -> Self {
        Self { scope, interval, sightings }
    }

    /// Runs the send and receive loops until the stop signal fires or either
    /// loop hits a fatal error; either loop's exit tears down the other.
    /// Closing the shared endpoint is the receive loop's cancellation
    /// signal: once `closed` is set, any read error is a clean termination,
    /// not a failure.
    pub async fn run(self, stop: watch::Receiver<bool>) -> anyhow::Result<()> {
        let socket = Arc::new(self.open_endpoint()?);
        let closed = Arc::new(AtomicBool::new(false));
        info!("pinger listening for ICMP on {}", self.scope.source_addr());

        let mut receiver = {
            let socket = Arc::clone(&socket);
            let closed = Arc::clone(&closed);
            let sightings = self.sightings.clone();
            task::spawn_blocking(move || receive_loop(&*socket, &closed, sightings))
        };

        tokio::select! {
            send_result = self.send_loop(&socket, stop) => {
                closed.store(true, Ordering::Relaxed);
                let _ = socket.shutdown(Shutdown::Both);
                let recv_result = receiver.await.context("pinger receive loop panicked")?;
                send_result?;
                recv_result
            }
            recv_result = &mut receiver => {
                // The receive loop only exits on its own on a fatal read
                // error or a closed sighting queue; stop sweeping either way.
                closed.store(true, Ordering::Relaxed);
                let _ = socket.shutdown(Shutdown::Both);
                recv_result.context("pinger receive loop panicked")?
            }
        }
    }

    fn open_endpoint(&self) -> anyhow::Result<Socket> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .context("opening raw ICMP endpoint")?;
        let bind_addr = SocketAddrV4::new(self.scope.source_addr(), 0);
        socket
            .bind(&bind_addr.into())
            .with_context(|| format!("binding ICMP endpoint to {bind_addr}"))?;
        socket
            .set_read_timeout(Some(RECV_POLL))
            .context("setting ICMP read timeout")?;
        Ok(socket)
    }

    async fn send_loop(&self, socket: &Arc<Socket>, mut stop: watch::Receiver<bool>) -> anyhow::Result<()> {
        let echo_request = build_echo_request()?;

        loop {
            let elapsed = {
                let socket = Arc::clone(socket);
                let scope = self.scope.clone();
                let payload = echo_request.clone();
                task::spawn_blocking(move || sweep(&socket, &scope, &payload))
                    .await
                    .context("pinger sweep task panicked")??
            };

            let pause = match self.interval.checked_sub(elapsed) {
                Some(pause) => pause,
                None => {
                    warn!("pinger on {} is sending slower than the sweep interval", self.scope.iface_name());
                    MIN_SWEEP_PAUSE
                }
            };

            tokio::select! {
                _ = stop.wait_for(|stopped| *stopped) => return Ok(()),
                _ = time::sleep(pause) => {}
            }
        }
    }
}

/// One full sweep: one echo request to every usable address in the scope.
/// A send failure to any address is fatal to the whole pinger.
fn sweep(socket: &Socket, scope: &NetworkScope, echo_request: &[u8]) -> anyhow::Result<Duration> {
    let start = Instant::now();
    for addr in scope.hosts() {
        let dst: SockAddr = SocketAddrV4::new(addr, 0).into();
        socket
            .send_to(echo_request, &dst)
            .with_context(|| format!("sending echo request to {addr}"))?;
    }
    let elapsed = start.elapsed();
    metrics::PINGER_SEND_DURATION
        .with_label_values(&[scope.iface_name()])
        .observe(elapsed.as_secs_f64());
    Ok(elapsed)
}

// Generic over the reader so the loop can be driven without a raw socket.
fn receive_loop<R: Read>(
    mut reader: R,
    closed: &AtomicBool,
    sightings: mpsc::Sender<Sighting>,
) -> anyhow::Result<()> {
    let mut buffer = [0u8; RECV_BUFFER_LEN];
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(n) => n,
            // Expected when the send loop closed the endpoint under us.
            Err(_) if closed.load(Ordering::Relaxed) => return Ok(()),
            Err(err) if matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ) => continue,
            Err(err) => return Err(err).context("reading from ICMP endpoint"),
        };

        let Some(sighting) = parse_echo_reply(&buffer[..n]) else {
            continue;
        };
        if sightings.blocking_send(sighting).is_err() {
            // Aggregator is gone, nothing left to report to.
            return Ok(());
        }
    }
}

/// Echo request with the process id as identifier, sequence 1 and an empty
/// payload, checksummed.
fn build_echo_request() -> anyhow::Result<Vec<u8>> {
    let mut buffer = vec![0u8; ICMP_HEADER_LEN];
    let mut echo = MutableEchoRequestPacket::new(&mut buffer)
        .context("failed to create mutable echo request packet")?;
    echo.set_icmp_type(IcmpTypes::EchoRequest);
    echo.set_icmp_code(IcmpCodes::NoCode);
    echo.set_identifier((std::process::id() & 0xffff) as u16);
    echo.set_sequence_number(1);
    let sum = checksum(
        &IcmpPacket::new(echo.packet()).context("failed to reparse echo request packet")?,
    );
    echo.set_checksum(sum);
    Ok(buffer)
}

/// A raw IPv4 ICMP read hands back the full IP datagram. Echo replies become
/// sightings of the sender; every other ICMP type is ignored. Malformed
/// datagrams are logged and skipped.
fn parse_echo_reply(datagram: &[u8]) -> Option<Sighting> {
    let Some(ipv4) = Ipv4Packet::new(datagram) else {
        warn!("failed to parse inbound IPv4 datagram ({} bytes)", datagram.len());
        return None;
    };
    if ipv4.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
        return None;
    }
    let Some(icmp) = IcmpPacket::new(ipv4.payload()) else {
        warn!("failed to parse ICMP message from {}", ipv4.get_source());
        return None;
    };
    match icmp.get_icmp_type() {
        IcmpTypes::EchoReply => Some(Sighting { ip: ipv4.get_source(), mac: None }),
        // Ignore.
        _ => None,
    }
}



// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use pnet::packet::icmp::{IcmpType, MutableIcmpPacket};
    use pnet::packet::ipv4::MutableIpv4Packet;

    const IPV4_HEADER_LEN: usize = 20;

    fn build_mock_reply(source: Ipv4Addr, icmp_type: IcmpType) -> Vec<u8> {
        let total_len = IPV4_HEADER_LEN + ICMP_HEADER_LEN;
        let mut buffer = vec![0u8; total_len];
        {
            let mut ipv4 = MutableIpv4Packet::new(&mut buffer).unwrap();
            ipv4.set_version(4);
            ipv4.set_header_length((IPV4_HEADER_LEN / 4) as u8);
            ipv4.set_total_length(total_len as u16);
            ipv4.set_ttl(64);
            ipv4.set_next_level_protocol(IpNextHeaderProtocols::Icmp);
            ipv4.set_source(source);
            ipv4.set_destination(Ipv4Addr::new(192, 168, 1, 2));
        }
        {
            let mut icmp = MutableIcmpPacket::new(&mut buffer[IPV4_HEADER_LEN..]).unwrap();
            icmp.set_icmp_type(icmp_type);
        }
        buffer
    }

    #[test]
    fn echo_request_has_pid_identifier_and_sequence_one() {
        let buffer = build_echo_request().expect("packet creation failed");
        assert_eq!(buffer.len(), ICMP_HEADER_LEN);

        let packet = pnet::packet::icmp::echo_request::EchoRequestPacket::new(&buffer).unwrap();
        assert_eq!(packet.get_icmp_type(), IcmpTypes::EchoRequest);
        assert_eq!(packet.get_identifier(), (std::process::id() & 0xffff) as u16);
        assert_eq!(packet.get_sequence_number(), 1);
        assert!(packet.payload().is_empty());

        let reparsed = IcmpPacket::new(&buffer).unwrap();
        assert_ne!(packet.get_checksum(), 0);
        // A correct checksum survives a recompute over the checksummed bytes.
        let mut zeroed = buffer.clone();
        zeroed[2] = 0;
        zeroed[3] = 0;
        let expected = checksum(&IcmpPacket::new(&zeroed).unwrap());
        assert_eq!(reparsed.get_checksum(), expected);
    }

    #[test]
    fn echo_reply_becomes_an_ip_only_sighting() {
        let source = Ipv4Addr::new(192, 168, 1, 77);
        let datagram = build_mock_reply(source, IcmpTypes::EchoReply);
        let sighting = parse_echo_reply(&datagram).expect("expected a sighting");
        assert_eq!(sighting.ip, source);
        assert_eq!(sighting.mac, None);
    }

    #[test]
    fn other_icmp_types_are_ignored() {
        let datagram =
            build_mock_reply(Ipv4Addr::new(192, 168, 1, 77), IcmpTypes::DestinationUnreachable);
        assert!(parse_echo_reply(&datagram).is_none());
    }

    #[test]
    fn truncated_datagram_is_skipped() {
        assert!(parse_echo_reply(&[0u8; 4]).is_none());
    }

    /// Read source scripted with canned outcomes, standing in for the raw
    /// endpoint.
    struct ScriptedReader {
        outcomes: std::collections::VecDeque<std::io::Result<Vec<u8>>>,
    }

    impl ScriptedReader {
        fn new(outcomes: Vec<std::io::Result<Vec<u8>>>) -> Self {
            Self { outcomes: outcomes.into_iter().collect() }
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
            match self.outcomes.pop_front() {
                Some(Ok(datagram)) => {
                    buffer[..datagram.len()].copy_from_slice(&datagram);
                    Ok(datagram.len())
                }
                Some(Err(err)) => Err(err),
                None => panic!("receive loop read past the scripted outcomes"),
            }
        }
    }

    fn io_error(kind: std::io::ErrorKind) -> std::io::Error {
        std::io::Error::from(kind)
    }

    #[test]
    fn receive_loop_fatal_read_error_propagates() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let closed = AtomicBool::new(false);
        let reader = ScriptedReader::new(vec![
            Err(io_error(std::io::ErrorKind::TimedOut)),
            Err(io_error(std::io::ErrorKind::ConnectionRefused)),
        ]);

        let result = receive_loop(reader, &closed, tx);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("reading from ICMP endpoint"));
    }

    #[test]
    fn receive_loop_treats_closed_endpoint_as_clean_shutdown() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let closed = AtomicBool::new(true);
        let reader = ScriptedReader::new(vec![
            Err(io_error(std::io::ErrorKind::NotConnected)),
        ]);

        assert!(receive_loop(reader, &closed, tx).is_ok());
    }

    #[test]
    fn receive_loop_emits_sightings_until_the_endpoint_errors() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let closed = AtomicBool::new(false);
        let source = Ipv4Addr::new(192, 168, 1, 77);
        let reader = ScriptedReader::new(vec![
            Ok(build_mock_reply(source, IcmpTypes::EchoReply)),
            Err(io_error(std::io::ErrorKind::TimedOut)),
            Err(io_error(std::io::ErrorKind::BrokenPipe)),
        ]);

        assert!(receive_loop(reader, &closed, tx).is_err());
        let sighting = rx.try_recv().unwrap();
        assert_eq!(sighting.ip, source);
        assert_eq!(sighting.mac, None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn receive_loop_stops_cleanly_when_the_aggregator_is_gone() {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        drop(rx);
        let closed = AtomicBool::new(false);
        let reader = ScriptedReader::new(vec![
            Ok(build_mock_reply(Ipv4Addr::new(192, 168, 1, 77), IcmpTypes::EchoReply)),
        ]);

        assert!(receive_loop(reader, &closed, tx).is_ok());
    }

    #[test]
    fn non_icmp_datagram_is_ignored() {
        let mut datagram = build_mock_reply(Ipv4Addr::new(192, 168, 1, 77), IcmpTypes::EchoReply);
        {
            let mut ipv4 = MutableIpv4Packet::new(&mut datagram).unwrap();
            ipv4.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        }
        assert!(parse_echo_reply(&datagram).is_none());
    }
}
