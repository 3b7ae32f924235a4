//! `RemoteStore` backed by the UDP store server.

use crate::store::{RemoteStore, Subscription, SubscriptionId};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use shared::protocol::{decode, encode, MAX_DATAGRAM, MAX_INSERT_BATCH};
use shared::{
    ChangeEvent, EntityId, Food, FoodId, NewFood, NewSnake, Packet, ReplyAssembler, SnakePatch,
    SnakeQuery, SnakeRecord, StoreError, StoreOp, StoreReply,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

type Pending = Arc<Mutex<HashMap<u32, oneshot::Sender<Result<StoreReply, StoreError>>>>>;
type Subscribers = Arc<Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<ChangeEvent>>>>;

pub struct UdpStore {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    fake_ping_ms: u64,
    request_timeout: Duration,

    next_request: AtomicU32,
    next_subscription: AtomicU32,
    pending: Pending,
    subscribers: Subscribers,

    tasks: Vec<JoinHandle<()>>,
}

impl UdpStore {
    /// Binds an ephemeral local port and starts the receive and heartbeat
    /// tasks. `fake_ping_ms` adds half its value to every send and receive.
    pub async fn connect(
        server_addr: &str,
        fake_ping_ms: u64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let server_addr: SocketAddr = server_addr.parse()?;
        info!("Using store server at {}", server_addr);

        let mut store = UdpStore {
            socket,
            server_addr,
            fake_ping_ms,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            next_request: AtomicU32::new(1),
            next_subscription: AtomicU32::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            tasks: Vec::new(),
        };

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        store.tasks.push(store.spawn_receiver(inbound_tx));
        store.tasks.push(store.spawn_dispatcher(inbound_rx));
        store.tasks.push(store.spawn_heartbeat());
        Ok(store)
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Reads datagrams off the socket. With a fake ping each packet waits
    /// out its delay in its own task, so one slow packet never holds up the
    /// ones behind it.
    fn spawn_receiver(&self, inbound: mpsc::UnboundedSender<Packet>) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let delay = Duration::from_millis(self.fake_ping_ms / 2);

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, _)) => {
                        let packet = match decode(&buffer[..len]) {
                            Ok(packet) => packet,
                            Err(e) => {
                                warn!("Failed to decode datagram: {}", e);
                                continue;
                            }
                        };

                        if delay.is_zero() {
                            if inbound.send(packet).is_err() {
                                break;
                            }
                        } else {
                            let inbound = inbound.clone();
                            tokio::spawn(async move {
                                sleep(delay).await;
                                let _ = inbound.send(packet);
                            });
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    /// Routes replies to their waiting request and change events to every
    /// open subscription. Multi-part replies are reassembled here.
    fn spawn_dispatcher(&self, mut inbound: mpsc::UnboundedReceiver<Packet>) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        let subscribers = Arc::clone(&self.subscribers);

        tokio::spawn(async move {
            let mut assembler = ReplyAssembler::new();

            while let Some(packet) = inbound.recv().await {
                match packet {
                    Packet::Reply {
                        request_id,
                        part,
                        parts,
                        outcome,
                    } => {
                        let mut pending = pending.lock().await;
                        if !pending.contains_key(&request_id) {
                            debug!("Late reply for request {}", request_id);
                            assembler.retain(|id| pending.contains_key(&id));
                            continue;
                        }

                        if let Some(outcome) = assembler.accept(request_id, part, parts, outcome) {
                            if let Some(tx) = pending.remove(&request_id) {
                                let _ = tx.send(outcome);
                            }
                            assembler.retain(|id| pending.contains_key(&id));
                        }
                    }
                    Packet::Change { event } => {
                        let mut subscribers = subscribers.lock().await;
                        subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
                    }
                    _ => warn!("Unexpected packet type from store server"),
                }
            }
        })
    }

    /// Keeps this address registered with the server. While anything is
    /// subscribed the heartbeat is a `Subscribe`, which also restores the
    /// feed after the server timed this client out.
    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let subscribers = Arc::clone(&self.subscribers);
        let server_addr = self.server_addr;

        tokio::spawn(async move {
            let mut ticker = interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                let packet = if subscribers.lock().await.is_empty() {
                    Packet::Heartbeat
                } else {
                    Packet::Subscribe
                };
                if let Err(e) = send_packet_impl(&socket, &packet, server_addr).await {
                    warn!("Heartbeat failed: {}", e);
                }
            }
        })
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), StoreError> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }
        send_packet_impl(&self.socket, packet, self.server_addr).await
    }

    async fn request(&self, op: StoreOp) -> Result<StoreReply, StoreError> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, tx);

        if let Err(e) = self.send_packet(&Packet::Request { request_id, op }).await {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(StoreError::Unavailable("receiver stopped".to_string())),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(StoreError::TimedOut)
            }
        }
    }
}

async fn send_packet_impl(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> Result<(), StoreError> {
    let data = encode(packet)?;
    socket
        .send_to(&data, addr)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
    Ok(())
}

impl Drop for UdpStore {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl RemoteStore for UdpStore {
    async fn insert_snake(&self, snake: NewSnake) -> Result<SnakeRecord, StoreError> {
        self.request(StoreOp::InsertSnake(snake)).await?.into_snake()
    }

    async fn update_snake(&self, id: EntityId, patch: SnakePatch) -> Result<(), StoreError> {
        self.request(StoreOp::UpdateSnake { id, patch }).await?.into_done()
    }

    async fn delete_snake(&self, id: EntityId) -> Result<(), StoreError> {
        self.request(StoreOp::DeleteSnake { id }).await?.into_done()
    }

    async fn query_snakes(&self, query: SnakeQuery) -> Result<Vec<SnakeRecord>, StoreError> {
        self.request(StoreOp::QuerySnakes(query)).await?.into_snakes()
    }

    /// Large inserts go out in batches that each fit a datagram. A failed
    /// batch stops the insert; rows from earlier batches stay in the store.
    async fn insert_foods(&self, foods: Vec<NewFood>) -> Result<Vec<Food>, StoreError> {
        let mut inserted = Vec::with_capacity(foods.len());
        for batch in foods.chunks(MAX_INSERT_BATCH) {
            let rows = self
                .request(StoreOp::InsertFoods(batch.to_vec()))
                .await?
                .into_foods()?;
            inserted.extend(rows);
        }
        Ok(inserted)
    }

    async fn delete_food(&self, id: FoodId) -> Result<(), StoreError> {
        self.request(StoreOp::DeleteFood { id }).await?.into_done()
    }

    async fn query_foods(&self) -> Result<Vec<Food>, StoreError> {
        self.request(StoreOp::QueryFoods).await?.into_foods()
    }

    async fn subscribe(&self) -> Result<Subscription, StoreError> {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.insert(id, tx);
        self.send_packet(&Packet::Subscribe).await?;
        Ok(Subscription { id, events: rx })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError> {
        let now_empty = {
            let mut subscribers = self.subscribers.lock().await;
            subscribers.remove(&id);
            subscribers.is_empty()
        };
        if now_empty {
            self.send_packet(&Packet::Unsubscribe).await?;
        }
        Ok(())
    }
}
