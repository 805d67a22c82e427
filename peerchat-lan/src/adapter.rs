//! `TransportAdapter` over multicast discovery and TCP links.

use std::time::Duration;

use peerchat_core::{PeerIdentity, TransportAdapter, TransportError};
use tracing::debug;

use crate::discovery::Discovery;
use crate::transport::{InviteRequest, Links};

pub struct LanTransport {
    discovery: Discovery,
    links: Links,
}

impl LanTransport {
    pub fn new(discovery: Discovery, links: Links) -> Self {
        Self { discovery, links }
    }
}

impl TransportAdapter for LanTransport {
    /// A new discovery cycle ends any link from the previous one.
    fn start_advertising(&mut self, service: &str) -> Result<(), TransportError> {
        debug!(service, "advertising");
        self.links.close_all();
        self.discovery.set_advertising(Some(service.to_string()));
        Ok(())
    }

    fn stop_advertising(&mut self) {
        self.discovery.set_advertising(None);
    }

    fn start_browsing(&mut self, service: &str) -> Result<(), TransportError> {
        debug!(service, "browsing");
        self.links.close_all();
        self.discovery.set_browsing(Some(service.to_string()));
        Ok(())
    }

    fn stop_browsing(&mut self) {
        self.discovery.set_browsing(None);
    }

    fn invite(&mut self, peer: &PeerIdentity, timeout: Duration) -> Result<(), TransportError> {
        let addr = self
            .discovery
            .address_of(peer)
            .ok_or_else(|| TransportError::UnknownPeer(peer.clone()))?;
        self.links.invite(InviteRequest {
            peer: peer.clone(),
            addr,
            timeout,
        })
    }

    fn respond_to_invitation(
        &mut self,
        inviter: &PeerIdentity,
        accept: bool,
    ) -> Result<(), TransportError> {
        self.links.respond(inviter, accept)
    }

    fn send_reliable(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.links.broadcast(bytes)
    }
}
