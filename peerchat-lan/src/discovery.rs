//! LAN discovery: UDP multicast beacons for a named service, per-peer liveness.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use peerchat_core::wire::{decode_frame, encode_frame};
use peerchat_core::{
    EventSender, LinkMessage, PeerIdentity, PublicKey, TransportEvent, PROTOCOL_VERSION,
};
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 60, 61);
const BEACON_INTERVAL: Duration = Duration::from_secs(2);
const PEER_TIMEOUT: Duration = Duration::from_secs(8);

struct PeerState {
    addr: SocketAddr,
    last_seen: Instant,
}

#[derive(Default)]
struct DiscoveryState {
    advertising: Option<String>,
    browsing: Option<String>,
    peers: HashMap<PeerIdentity, PeerState>,
}

/// Discovery switches shared by the adapter and the discovery tasks.
#[derive(Clone, Default)]
pub struct Discovery {
    state: Arc<Mutex<DiscoveryState>>,
    wake_beacon: Arc<Notify>,
}

impl Discovery {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DiscoveryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start (Some) or stop (None) beaconing a service.
    pub fn set_advertising(&self, service: Option<String>) {
        self.state().advertising = service;
        self.wake_beacon.notify_one();
    }

    /// Start (Some) or stop (None) listening for a service. Stopping forgets every peer.
    pub fn set_browsing(&self, service: Option<String>) {
        let mut state = self.state();
        if service.is_none() {
            state.peers.clear();
        }
        state.browsing = service;
    }

    /// Session address last advertised by `peer`.
    pub fn address_of(&self, peer: &PeerIdentity) -> Option<SocketAddr> {
        self.state().peers.get(peer).map(|p| p.addr)
    }

    /// Record a received beacon. Returns the peer when it was not known before.
    /// Our own beacons (matched by link key, not by name) and beacons for other
    /// services are dropped.
    fn observe(
        &self,
        msg: LinkMessage,
        from: SocketAddr,
        own_key: &PublicKey,
    ) -> Option<PeerIdentity> {
        let LinkMessage::Beacon {
            protocol_version,
            service,
            name,
            public_key,
            listen_port,
        } = msg
        else {
            return None;
        };
        if protocol_version != PROTOCOL_VERSION || public_key == *own_key {
            return None;
        }
        let mut state = self.state();
        if state.browsing.as_deref() != Some(service.as_str()) {
            return None;
        }
        let peer = PeerState {
            addr: SocketAddr::new(from.ip(), listen_port),
            last_seen: Instant::now(),
        };
        state.peers.insert(name.clone(), peer).is_none().then_some(name)
    }
}

pub async fn run_discovery(
    discovery: Discovery,
    name: PeerIdentity,
    public_key: PublicKey,
    discovery_port: u16,
    transport_port: u16,
    events: EventSender,
) -> std::io::Result<()> {
    let socket = Arc::new(make_multicast_socket(discovery_port).await?);
    info!(port = discovery_port, group = %MULTICAST_GROUP, "discovery listening");

    let beacon_task = tokio::spawn(beacon_loop(
        socket.clone(),
        discovery.clone(),
        name,
        public_key.clone(),
        discovery_port,
        transport_port,
    ));
    let recv_task = tokio::spawn(recv_loop(socket, discovery.clone(), public_key, events.clone()));
    let timeout_task = tokio::spawn(peer_timeout_loop(discovery, events));

    let _ = tokio::try_join!(beacon_task, recv_task, timeout_task);
    Ok(())
}

async fn make_multicast_socket(discovery_port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, discovery_port))?;
    std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

async fn beacon_loop(
    socket: Arc<UdpSocket>,
    discovery: Discovery,
    name: PeerIdentity,
    public_key: PublicKey,
    discovery_port: u16,
    transport_port: u16,
) -> std::io::Result<()> {
    let dest = SocketAddr::from((MULTICAST_GROUP, discovery_port));
    loop {
        let service = discovery.state().advertising.clone();
        if let Some(service) = service {
            let beacon = LinkMessage::Beacon {
                protocol_version: PROTOCOL_VERSION,
                service,
                name: name.clone(),
                public_key: public_key.clone(),
                listen_port: transport_port,
            };
            let frame = encode_frame(&beacon)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            if let Err(e) = socket.send_to(&frame, dest).await {
                warn!(error = %e, "beacon send failed");
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(BEACON_INTERVAL) => {}
            _ = discovery.wake_beacon.notified() => {}
        }
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    discovery: Discovery,
    own_key: PublicKey,
    events: EventSender,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; 65536];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        let Ok((msg, _)) = decode_frame(&buf[..n]) else {
            debug!(%from, "ignoring undecodable datagram");
            continue;
        };
        if let Some(peer) = discovery.observe(msg, from, &own_key) {
            if events.send(TransportEvent::PeerFound(peer)).is_err() {
                return Ok(());
            }
        }
    }
}

async fn peer_timeout_loop(discovery: Discovery, events: EventSender) -> std::io::Result<()> {
    loop {
        tokio::time::sleep(BEACON_INTERVAL).await;
        let now = Instant::now();
        let timed_out: Vec<PeerIdentity> = {
            let mut state = discovery.state();
            let list: Vec<PeerIdentity> = state
                .peers
                .iter()
                .filter(|(_, s)| now.duration_since(s.last_seen) >= PEER_TIMEOUT)
                .map(|(name, _)| name.clone())
                .collect();
            for name in &list {
                state.peers.remove(name);
            }
            list
        };
        for peer in timed_out {
            debug!(%peer, "peer beacon timed out");
            if events.send(TransportEvent::PeerLost(peer)).is_err() {
                return Ok(());
            }
        }
    }
}
