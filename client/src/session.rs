//! Synchronization layer for one game session.
//!
//! A `Session` owns the local snake and the remote cache. The frame loop
//! calls [`Session::tick`], which never waits on the network: store
//! mutations are spawned and left to finish on their own, and everything
//! coming back from the store (change feed, periodic polls) is queued in an
//! inbox that is drained at the start of the next tick. The cache is
//! therefore only ever written between steps.

use crate::cache::RemoteCache;
use crate::input::{FrameView, InputSnapshot};
use crate::sim::{random_food, scatter_food, Snake, StepEvents};
use crate::store::{top_up_food, RemoteStore, SubscriptionId};
use log::{debug, error, info, trace, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    now_millis, ChangeEvent, EntityId, Food, GameConfig, LeaderboardEntry, SnakeQuery,
    SnakeRecord, StoreError, Vec2,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};

/// Lifecycle of a session. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    /// Creating the snake row and pulling the initial tables.
    Initializing,
    Running,
    /// Dead, torn down, or failed to start. Ticks do nothing.
    Terminated,
}

/// Why `start` failed. Everything after a successful start degrades
/// instead of failing.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session was already started")]
    AlreadyStarted,
    #[error("could not create the local snake: {0}")]
    Spawn(#[source] StoreError),
}

/// Everything that may update the remote cache arrives as one of these.
#[derive(Debug)]
pub enum SyncMessage {
    Change(ChangeEvent),
    /// Full peer roster; replaces the cached snakes.
    Peers(Vec<SnakeRecord>),
    Leaderboard(Vec<SnakeRecord>),
    /// Rows this client inserted itself, merged into the cache.
    FoodsInserted(Vec<Food>),
}

/// Result of one [`Session::tick`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    Running,
    GameOver { final_score: f32 },
    /// The session is not running; nothing was simulated.
    Stopped,
}

/// Observers of a session, handed out once at construction.
#[derive(Debug)]
pub struct SessionHandle {
    /// Current score, updated every tick.
    pub score: watch::Receiver<f32>,
    /// Resolves exactly once with the final score.
    pub game_over: oneshot::Receiver<f32>,
}

/// One player's connection to the shared world.
///
/// The session is driven from a single task: `tick` takes `&mut self` and
/// background work only ever talks back through the inbox.
pub struct Session<S: RemoteStore> {
    store: Arc<S>,
    config: GameConfig,
    phase: SessionPhase,
    rng: StdRng,

    snake: Option<Snake>,
    cache: RemoteCache,
    leaderboard: Vec<LeaderboardEntry>,

    inbox_tx: mpsc::UnboundedSender<SyncMessage>,
    inbox_rx: mpsc::UnboundedReceiver<SyncMessage>,
    subscription: Option<SubscriptionId>,

    // Pollers and the change-feed forwarder
    tasks: Vec<JoinHandle<()>>,
    // Fire-and-forget store mutations
    in_flight: Vec<JoinHandle<()>>,

    last_push: Option<Instant>,
    entity_deleted: bool,
    closed: bool,

    score_tx: watch::Sender<f32>,
    game_over_tx: Option<oneshot::Sender<f32>>,

    pushes: u64,
    particles: u64,
}

impl<S: RemoteStore> Session<S> {
    /// Creates an idle session. Nothing touches the store until `start`.
    pub fn new(store: Arc<S>, config: GameConfig) -> (Self, SessionHandle) {
        Self::with_rng(store, config, StdRng::from_entropy())
    }

    /// Deterministic variant for tests and replays.
    pub fn with_seed(store: Arc<S>, config: GameConfig, seed: u64) -> (Self, SessionHandle) {
        Self::with_rng(store, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(store: Arc<S>, config: GameConfig, rng: StdRng) -> (Self, SessionHandle) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (score_tx, score_rx) = watch::channel(0.0);
        let (game_over_tx, game_over_rx) = oneshot::channel();

        let session = Self {
            store,
            config,
            phase: SessionPhase::Uninitialized,
            rng,
            snake: None,
            cache: RemoteCache::new(),
            leaderboard: Vec::new(),
            inbox_tx,
            inbox_rx,
            subscription: None,
            tasks: Vec::new(),
            in_flight: Vec::new(),
            last_push: None,
            entity_deleted: false,
            closed: false,
            score_tx,
            game_over_tx: Some(game_over_tx),
            pushes: 0,
            particles: 0,
        };

        let handle = SessionHandle {
            score: score_rx,
            game_over: game_over_rx,
        };
        (session, handle)
    }

    /// Joins the world at a random spawn point.
    pub async fn start(&mut self, name: &str) -> Result<(), SessionError> {
        self.ensure_uninitialized()?;
        let snake = Snake::initialize(name, &self.config, &mut self.rng);
        self.launch(snake).await
    }

    /// Joins the world with the head at `spawn`.
    pub async fn start_at(&mut self, name: &str, spawn: Vec2) -> Result<(), SessionError> {
        self.ensure_uninitialized()?;
        let snake = Snake::spawn_at(name, spawn, &self.config);
        self.launch(snake).await
    }

    fn ensure_uninitialized(&self) -> Result<(), SessionError> {
        if self.phase == SessionPhase::Uninitialized {
            Ok(())
        } else {
            Err(SessionError::AlreadyStarted)
        }
    }

    /// Inserts the snake row, then pulls food, peers and the leaderboard and
    /// starts the background tasks. Only the snake insert is fatal; every
    /// later failure is logged and left for the polls to repair.
    async fn launch(&mut self, mut snake: Snake) -> Result<(), SessionError> {
        self.phase = SessionPhase::Initializing;
        info!("Starting session for {}", snake.name);

        snake.last_update = now_millis();
        let record = match self.store.insert_snake(snake.to_new_snake(snake.last_update)).await {
            Ok(record) => record,
            Err(e) => {
                error!("Failed to create snake for {}: {}", snake.name, e);
                self.phase = SessionPhase::Terminated;
                self.closed = true;
                return Err(SessionError::Spawn(e));
            }
        };
        let local_id = record.id;
        snake.id = Some(local_id);
        self.cache.set_local_id(local_id);
        self.snake = Some(snake);
        info!("Snake created with id {}", local_id);

        self.seed_food().await;

        match self.store.subscribe().await {
            Ok(subscription) => {
                self.subscription = Some(subscription.id);
                let forwarder = self.spawn_change_forwarder(subscription.events);
                self.tasks.push(forwarder);
            }
            Err(e) => warn!("Change feed unavailable, relying on polls: {}", e),
        }

        match self.store.query_snakes(SnakeQuery::peers(local_id)).await {
            Ok(peers) => self.cache.replace_snakes(peers),
            Err(e) => warn!("Initial peer pull failed: {}", e),
        }
        match self
            .store
            .query_snakes(SnakeQuery::leaderboard(self.config.leaderboard_limit))
            .await
        {
            Ok(rows) => self.set_leaderboard(&rows),
            Err(e) => warn!("Initial leaderboard pull failed: {}", e),
        }

        let peers = self.spawn_peer_poller(local_id);
        let leaderboard = self.spawn_leaderboard_poller();
        let top_up = self.spawn_food_top_up();
        self.tasks.extend([peers, leaderboard, top_up]);

        self.publish_score();
        self.phase = SessionPhase::Running;
        info!(
            "Session running with {} peers and {} food",
            self.cache.snake_count(),
            self.cache.food_count()
        );
        Ok(())
    }

    /// Pulls the food table and tops it up to the minimum count.
    async fn seed_food(&mut self) {
        let foods = match self.store.query_foods().await {
            Ok(foods) => foods,
            Err(e) => {
                warn!("Initial food pull failed: {}", e);
                return;
            }
        };

        let missing = self.config.min_food_count.saturating_sub(foods.len());
        self.cache.replace_foods(foods);
        if missing == 0 {
            return;
        }

        let batch = (0..missing)
            .map(|_| random_food(&self.config, &mut self.rng))
            .collect();
        match self.store.insert_foods(batch).await {
            Ok(inserted) => {
                debug!("Seeded {} food items", inserted.len());
                for food in inserted {
                    self.cache.insert_food(food);
                }
            }
            Err(e) => warn!("Food top-up failed: {}", e),
        }
    }

    /// Moves change events from the store subscription into the inbox.
    fn spawn_change_forwarder(
        &self,
        mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    ) -> JoinHandle<()> {
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if inbox.send(SyncMessage::Change(event)).is_err() {
                    break;
                }
            }
            debug!("Change feed closed");
        })
    }

    fn spawn_peer_poller(&self, local_id: EntityId) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        spawn_poller(
            self.inbox_tx.clone(),
            self.config.peer_poll_interval,
            "Peer poll",
            move || {
                let store = Arc::clone(&store);
                async move {
                    store
                        .query_snakes(SnakeQuery::peers(local_id))
                        .await
                        .map(SyncMessage::Peers)
                }
            },
        )
    }

    fn spawn_leaderboard_poller(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let limit = self.config.leaderboard_limit;
        spawn_poller(
            self.inbox_tx.clone(),
            self.config.leaderboard_poll_interval,
            "Leaderboard poll",
            move || {
                let store = Arc::clone(&store);
                async move {
                    store
                        .query_snakes(SnakeQuery::leaderboard(limit))
                        .await
                        .map(SyncMessage::Leaderboard)
                }
            },
        )
    }

    /// Periodically refills the food table to `min_food_count`.
    fn spawn_food_top_up(&mut self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        let mut rng = StdRng::seed_from_u64(self.rng.gen());
        let inbox = self.inbox_tx.clone();
        let period = self.config.food_top_up_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let result =
                    top_up_food(&*store, config.min_food_count, || random_food(&config, &mut rng))
                        .await;
                match result {
                    Ok(inserted) if inserted.is_empty() => {}
                    Ok(inserted) => {
                        if inbox.send(SyncMessage::FoodsInserted(inserted)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Food top-up failed: {}", e),
                }
            }
        })
    }

    /// Advances the session by one frame.
    ///
    /// `now` drives the push throttle; `dt` is the normalized frame time.
    pub fn tick(&mut self, input: &InputSnapshot, dt: f32, now: Instant) -> TickOutcome {
        if self.phase != SessionPhase::Running {
            return TickOutcome::Stopped;
        }

        self.drain_inbox();
        self.in_flight.retain(|task| !task.is_finished());

        let events = match self.snake.as_mut() {
            Some(snake) => {
                let events = snake.step(input, dt, &self.cache, &self.config, &mut self.rng);
                snake.last_update = now_millis();
                events
            }
            None => return TickOutcome::Stopped,
        };

        let died = events.died;
        self.apply_step_events(events);
        self.publish_score();

        if died {
            let final_score = self.handle_death();
            return TickOutcome::GameOver { final_score };
        }

        self.maybe_push(now);
        TickOutcome::Running
    }

    fn apply_step_events(&mut self, events: StepEvents) {
        self.particles += events.particles.len() as u64;

        for consumed in events.consumed {
            // A food can only be started on its way out once
            if self.cache.begin_food_delete(consumed.food_id).is_none() {
                continue;
            }
            let id = consumed.food_id;
            trace!("Ate food {} worth {}", id, consumed.value);
            self.spawn_mutation("Food delete", move |store| async move {
                store.delete_food(id).await
            });
        }

        if !events.spawned.is_empty() {
            let batch = events.spawned;
            self.spawn_mutation("Food respawn", move |store| async move {
                store.insert_foods(batch).await
            });
        }
    }

    /// Pushes the full snake row unless the last push was too recent.
    fn maybe_push(&mut self, now: Instant) {
        if let Some(last) = self.last_push {
            if now.saturating_duration_since(last) < self.config.push_interval {
                return;
            }
        }

        let Some(snake) = self.snake.as_ref() else {
            return;
        };
        let Some(id) = snake.id else {
            return;
        };
        let patch = snake.to_patch();

        self.last_push = Some(now);
        self.pushes += 1;
        self.spawn_mutation("Push", move |store| async move {
            store.update_snake(id, patch).await
        });
    }

    /// Deletes the snake, scatters its body as food and tears down.
    /// Returns the final score.
    fn handle_death(&mut self) -> f32 {
        let (final_score, segments) = match self.snake.as_ref() {
            Some(snake) => (snake.score, snake.segments.clone()),
            None => return 0.0,
        };
        info!("Snake died with score {:.1}", final_score);

        self.delete_entity();

        let scatter = scatter_food(&segments, &self.config, &mut self.rng);
        debug!("Scattering {} food items", scatter.len());
        self.spawn_mutation("Death scatter", move |store| async move {
            store.insert_foods(scatter).await
        });

        self.teardown();
        final_score
    }

    /// Deletes the local snake remotely, at most once per session.
    fn delete_entity(&mut self) {
        if self.entity_deleted {
            return;
        }
        let Some(id) = self.snake.as_ref().and_then(|snake| snake.id) else {
            return;
        };
        self.entity_deleted = true;
        self.spawn_mutation("Snake delete", move |store| async move {
            store.delete_snake(id).await
        });
    }

    /// Ends the session: stops background tasks, deletes the snake if it
    /// still exists and closes the change feed. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.delete_entity();

        if let Some(subscription) = self.subscription.take() {
            self.spawn_mutation("Unsubscribe", move |store| async move {
                store.unsubscribe(subscription).await
            });
        }

        self.phase = SessionPhase::Terminated;
        let final_score = self.score();
        if self.snake.is_some() {
            if let Some(tx) = self.game_over_tx.take() {
                let _ = tx.send(final_score);
            }
        }
        info!("Session terminated with score {:.1}", final_score);
    }

    /// Waits for every spawned store mutation to finish.
    pub async fn settle(&mut self) {
        for task in self.in_flight.drain(..) {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Store call panicked: {}", e);
                }
            }
        }
    }

    /// Applies queued cache updates. Returns how many were applied.
    pub fn drain_inbox(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(message) = self.inbox_rx.try_recv() {
            self.apply_message(message);
            applied += 1;
        }
        applied
    }

    fn apply_message(&mut self, message: SyncMessage) {
        match message {
            SyncMessage::Change(event) => {
                self.cache.apply_change(&event);
            }
            SyncMessage::Peers(peers) => {
                debug!("Peer roster refreshed with {} snakes", peers.len());
                self.cache.replace_snakes(peers);
            }
            SyncMessage::Leaderboard(rows) => self.set_leaderboard(&rows),
            SyncMessage::FoodsInserted(foods) => {
                for food in foods {
                    self.cache.insert_food(food);
                }
            }
        }
    }

    /// Sender for feeding the cache from outside the session.
    pub fn inbox(&self) -> mpsc::UnboundedSender<SyncMessage> {
        self.inbox_tx.clone()
    }

    fn set_leaderboard(&mut self, rows: &[SnakeRecord]) {
        self.leaderboard = rows.iter().map(LeaderboardEntry::from).collect();
    }

    fn publish_score(&self) {
        self.score_tx.send_replace(self.score());
    }

    /// Starts a store write without waiting for it. Lost races are logged
    /// at debug, other failures at warn; the state they carried is resent
    /// by the next push or poll.
    fn spawn_mutation<F, Fut, T>(&mut self, what: &'static str, op: F)
    where
        F: FnOnce(Arc<S>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        let call = op(Arc::clone(&self.store));
        self.in_flight.push(tokio::spawn(async move {
            match call.await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => debug!("{} lost a race: {}", what, e),
                Err(e) => warn!("{} failed: {}", what, e),
            }
        }));
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == SessionPhase::Running
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn snake(&self) -> Option<&Snake> {
        self.snake.as_ref()
    }

    pub fn local_id(&self) -> Option<EntityId> {
        self.snake.as_ref().and_then(|snake| snake.id)
    }

    pub fn score(&self) -> f32 {
        self.snake.as_ref().map(|snake| snake.score).unwrap_or(0.0)
    }

    pub fn cache(&self) -> &RemoteCache {
        &self.cache
    }

    pub fn leaderboard(&self) -> &[LeaderboardEntry] {
        &self.leaderboard
    }

    /// Number of snake pushes started, failed ones included.
    pub fn pushes(&self) -> u64 {
        self.pushes
    }

    pub fn particles_emitted(&self) -> u64 {
        self.particles
    }

    /// Read-only view for input sources, while a snake exists.
    pub fn frame_view(&self) -> Option<FrameView<'_>> {
        self.snake.as_ref().map(|snake| FrameView {
            snake,
            cache: &self.cache,
            config: &self.config,
        })
    }
}

impl<S: RemoteStore> Drop for Session<S> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Runs `poll` every `period` (first run after one period) and forwards
/// each successful result to the inbox. Failures wait for the next period.
fn spawn_poller<F, Fut>(
    inbox: mpsc::UnboundedSender<SyncMessage>,
    period: Duration,
    what: &'static str,
    mut poll: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<SyncMessage, StoreError>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match poll().await {
                Ok(message) => {
                    if inbox.send(message).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("{} failed: {}", what, e),
            }
        }
    })
}
