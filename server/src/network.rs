//! Server network layer: UDP request handling over the shared tables and
//! change-event fan-out to subscribed peers

use crate::peer_manager::PeerManager;
use log::{debug, error, info, warn};
use shared::protocol::{decode, encode, MAX_DATAGRAM};
use shared::{split_reply, ChangeEvent, Packet, StoreError, Tables};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;

type SendError = Box<dyn std::error::Error + Send + Sync>;

const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(5);
const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    PeerTimeout { peer_id: u32 },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    /// Sent to every subscribed peer
    BroadcastChange { packet: Packet },
}

/// Reference implementation of the shared table store
pub struct Server {
    socket: Arc<UdpSocket>,
    peers: Arc<RwLock<PeerManager>>,
    tables: Tables,
    peer_timeout: Duration,
    /// Snake rows whose owner has not pushed for this long are deleted
    stale_after: Option<Duration>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,

    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    pub async fn new(
        addr: &str,
        max_peers: usize,
        stale_after: Option<Duration>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            peers: Arc::new(RwLock::new(PeerManager::new(max_peers))),
            tables: Tables::new(),
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            stale_after,
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx,
            tasks: Vec::new(),
        })
    }

    pub fn with_peer_timeout(mut self, peer_timeout: Duration) -> Self {
        self.peer_timeout = peer_timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender that can stop `run` from another task
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match decode(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    /// Spawns task that processes the outgoing packet queue
    fn spawn_network_sender(&mut self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let peers = Arc::clone(&self.peers);
        let mut outbound_rx =
            std::mem::replace(&mut self.outbound_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    OutboundMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    OutboundMessage::BroadcastChange { packet } => {
                        let subscribers = {
                            let peers_guard = peers.read().await;
                            peers_guard.subscriber_addrs()
                        };

                        for (peer_id, addr) in subscribers {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to peer {}: {}", peer_id, e);
                            }
                        }
                    }
                }
            }
        })
    }

    /// Spawns task that monitors peer heartbeats
    fn spawn_timeout_checker(&self) -> JoinHandle<()> {
        let peers = Arc::clone(&self.peers);
        let server_tx = self.server_tx.clone();
        let peer_timeout = self.peer_timeout;

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut peers_guard = peers.write().await;
                    peers_guard.check_timeouts(peer_timeout)
                };

                for peer_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::PeerTimeout { peer_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        })
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), SendError> {
        let data = encode(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self
            .outbound_tx
            .send(OutboundMessage::SendPacket { packet, addr })
        {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_changes(&self, events: Vec<ChangeEvent>) {
        for event in events {
            let packet = Packet::Change { event };
            if let Err(e) = self
                .outbound_tx
                .send(OutboundMessage::BroadcastChange { packet })
            {
                error!("Failed to queue change event: {}", e);
                return;
            }
        }
    }

    /// Processes one incoming packet
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        let peer_id = {
            let mut peers = self.peers.write().await;
            peers.touch(addr)
        };

        let Some(peer_id) = peer_id else {
            warn!("Rejecting {}: server full", addr);
            if let Packet::Request { request_id, .. } = packet {
                let outcome = Err(StoreError::Unavailable("server full".to_string()));
                self.send_packet(Packet::reply(request_id, outcome), addr);
            }
            return;
        };

        match packet {
            Packet::Subscribe => {
                let mut peers = self.peers.write().await;
                peers.set_subscribed(peer_id, true);
            }

            Packet::Unsubscribe => {
                let mut peers = self.peers.write().await;
                peers.set_subscribed(peer_id, false);
            }

            Packet::Heartbeat => {}

            Packet::Request { request_id, op } => {
                let (outcome, events) = self.tables.execute(op);
                if let Err(e) = &outcome {
                    debug!("Request {} from peer {} failed: {}", request_id, peer_id, e);
                }
                let parts = split_reply(request_id, outcome);
                if parts.len() > 1 {
                    debug!("Reply to request {} split into {} parts", request_id, parts.len());
                }
                for part in parts {
                    self.send_packet(part, addr);
                }
                self.broadcast_changes(events);
            }

            Packet::Reply { .. } | Packet::Change { .. } => {
                warn!("Unexpected packet type from peer at {}", addr);
            }
        }
    }

    /// Deletes snake rows abandoned by clients that stopped pushing
    fn reap_stale(&mut self) {
        let Some(stale_after) = self.stale_after else {
            return;
        };

        let events = self.tables.reap_stale_snakes(stale_after);
        if !events.is_empty() {
            info!("Reaped {} stale snakes", events.len());
            self.broadcast_changes(events);
        }
    }

    /// Main server loop
    pub async fn run(&mut self) {
        let receiver = self.spawn_network_receiver();
        let sender = self.spawn_network_sender();
        let checker = self.spawn_timeout_checker();
        self.tasks.extend([receiver, sender, checker]);

        let mut reap_interval = interval(REAP_INTERVAL);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::PeerTimeout { peer_id }) => {
                            debug!("Peer {} timed out", peer_id);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = reap_interval.tick() => {
                    self.reap_stale();
                },
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
