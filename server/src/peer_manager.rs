//! Peer tracking for the store server
//!
//! This module keeps the server-side roster of addresses talking to the store:
//! - Peer lifecycle (first packet, explicit unsubscribe, timeout)
//! - Which peers want the change feed
//! - Heartbeat-based liveness and automatic cleanup
//! - Capacity limits
//!
//! A peer is registered by the first packet it sends. Requests and heartbeats
//! keep it alive; only subscribed peers receive `Change` packets.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Represents one address talking to the store
#[derive(Debug)]
pub struct Peer {
    /// Identifier assigned by the server, only used for logging
    pub id: u32,
    /// Network address for replies and change events
    pub addr: SocketAddr,
    /// Last time we received any packet from this peer
    pub last_seen: Instant,
    /// Whether change events are fanned out to this peer
    pub subscribed: bool,
}

impl Peer {
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            subscribed: false,
        }
    }

    /// Checks if the peer has gone quiet for longer than `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages every peer known to the server
///
/// Peers are indexed by id; lookups by address are linear, which is fine for
/// the handful of clients a single arena holds.
pub struct PeerManager {
    peers: HashMap<u32, Peer>,
    next_peer_id: u32,
    max_peers: usize,
}

impl PeerManager {
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: HashMap::new(),
            next_peer_id: 1,
            max_peers,
        }
    }

    /// Registers a new peer
    ///
    /// Returns Some(peer_id) if successful, None if the server is at capacity.
    pub fn add_peer(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.peers.len() >= self.max_peers {
            return None;
        }

        let peer_id = self.next_peer_id;
        self.next_peer_id += 1;

        info!("Peer {} registered from {}", peer_id, addr);
        self.peers.insert(peer_id, Peer::new(peer_id, addr));

        Some(peer_id)
    }

    /// Returns the id for `addr`, registering it first if needed
    ///
    /// Refreshes the peer's last seen time. None means the server is full.
    pub fn touch(&mut self, addr: SocketAddr) -> Option<u32> {
        match self.find_peer_by_addr(addr) {
            Some(peer_id) => {
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.last_seen = Instant::now();
                }
                Some(peer_id)
            }
            None => self.add_peer(addr),
        }
    }

    pub fn remove_peer(&mut self, peer_id: &u32) -> bool {
        if let Some(peer) = self.peers.remove(peer_id) {
            info!("Peer {} removed", peer.id);
            true
        } else {
            false
        }
    }

    pub fn find_peer_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.peers
            .iter()
            .find(|(_, peer)| peer.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Turns the change feed on or off for a peer. Returns false for
    /// unknown peers.
    pub fn set_subscribed(&mut self, peer_id: u32, subscribed: bool) -> bool {
        match self.peers.get_mut(&peer_id) {
            Some(peer) => {
                if peer.subscribed != subscribed {
                    info!(
                        "Peer {} {}",
                        peer_id,
                        if subscribed { "subscribed" } else { "unsubscribed" }
                    );
                }
                peer.subscribed = subscribed;
                true
            }
            None => false,
        }
    }

    /// Addresses of every peer receiving the change feed
    pub fn subscriber_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.peers
            .values()
            .filter(|peer| peer.subscribed)
            .map(|peer| (peer.id, peer.addr))
            .collect()
    }

    /// Checks for and removes peers that have gone quiet
    ///
    /// Returns the removed peer ids.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<u32> {
        let timed_out: Vec<u32> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for peer_id in &timed_out {
            self.remove_peer(peer_id);
        }

        timed_out
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
