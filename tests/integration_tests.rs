//! Integration tests across the shared, client and server crates
//!
//! These tests run real sessions against both store implementations and
//! exercise the UDP store server over loopback sockets.

use client::cache::RemoteCache;
use client::input::InputSnapshot;
use client::network::UdpStore;
use client::session::{Session, SessionHandle, SessionPhase, TickOutcome};
use client::sim::{scatter_food, Snake};
use client::store::{MemoryStore, RemoteStore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use server::network::{Server, ServerMessage};
use shared::{
    now_millis, ChangeKind, GameConfig, NewFood, NewSnake, SnakePatch, SnakeQuery, Vec2,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_test::{assert_err, assert_ok};

fn quiet_config() -> GameConfig {
    GameConfig {
        min_food_count: 0,
        food_respawn_chance: 0.0,
        trail_particle_chance: 0.0,
        ..GameConfig::default()
    }
}

fn forward() -> InputSnapshot {
    InputSnapshot::toward(0.0, false)
}

fn new_food(x: f32, y: f32) -> NewFood {
    NewFood {
        position: Vec2::new(x, y),
        color: "hsl(42, 100%, 50%)".to_string(),
        value: 1.0,
    }
}

async fn start_server(stale_after: Option<Duration>) -> (SocketAddr, mpsc::UnboundedSender<ServerMessage>) {
    let mut server = Server::new("127.0.0.1:0", 16, stale_after).await.unwrap();
    let addr = server.local_addr().unwrap();
    let control = server.control();
    tokio::spawn(async move { server.run().await });
    (addr, control)
}

async fn connect(addr: SocketAddr) -> UdpStore {
    UdpStore::connect(&addr.to_string(), 0).await.unwrap()
}

async fn pump<S: RemoteStore>(session: &mut Session<S>) {
    sleep(Duration::from_millis(100)).await;
    session.drain_inbox();
}

/// UDP STORE SERVER TESTS
mod udp_store_tests {
    use super::*;

    /// Full create/update/query/delete cycle through the real server
    #[tokio::test]
    async fn snake_row_lifecycle_over_udp() {
        let (addr, _control) = start_server(None).await;
        let store = connect(addr).await;

        let record = store
            .insert_snake(NewSnake {
                name: "udp".to_string(),
                score: 10.0,
                position: Vec2::new(100.0, 100.0),
                angle: 0.0,
                segments: vec![Vec2::new(100.0, 100.0)],
                alive: true,
                last_update: now_millis(),
            })
            .await
            .unwrap();

        store
            .update_snake(
                record.id,
                SnakePatch {
                    score: Some(25.0),
                    ..SnakePatch::default()
                },
            )
            .await
            .unwrap();

        let board = store.query_snakes(SnakeQuery::leaderboard(10)).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].score, 25.0);

        assert_ok!(store.delete_snake(record.id).await);
        let err = assert_err!(store.delete_snake(record.id).await);
        assert!(err.is_not_found());
        let err = assert_err!(store.update_snake(record.id, SnakePatch::default()).await);
        assert!(err.is_not_found());
    }

    /// Two clients racing for the same food: exactly one delete succeeds
    #[tokio::test]
    async fn double_food_delete_is_not_found() {
        let (addr, _control) = start_server(None).await;
        let first = connect(addr).await;
        let second = connect(addr).await;

        let foods = first.insert_foods(vec![new_food(5.0, 5.0)]).await.unwrap();
        let id = foods[0].id;

        let (a, b) = tokio::join!(first.delete_food(id), second.delete_food(id));
        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.is_not_found()));
    }

    /// Change events reach every subscriber, including the writer
    #[tokio::test]
    async fn change_feed_reaches_subscribers() {
        let (addr, _control) = start_server(None).await;
        let writer = connect(addr).await;
        let reader = connect(addr).await;

        let mut writer_feed = writer.subscribe().await.unwrap();
        let mut reader_feed = reader.subscribe().await.unwrap();
        sleep(Duration::from_millis(50)).await;

        let foods = writer.insert_foods(vec![new_food(1.0, 1.0)]).await.unwrap();
        writer.delete_food(foods[0].id).await.unwrap();

        for feed in [&mut writer_feed, &mut reader_feed] {
            let first = timeout(Duration::from_secs(2), feed.events.recv())
                .await
                .unwrap()
                .unwrap();
            let second = timeout(Duration::from_secs(2), feed.events.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(first.kind(), ChangeKind::Insert);
            assert_eq!(second.kind(), ChangeKind::Delete);
        }
    }

    /// Staleness is judged by the server's clock, whatever the writers'
    /// clocks say
    #[tokio::test]
    async fn stale_snakes_are_reaped_by_server_clock() {
        let (addr, _control) = start_server(Some(Duration::from_millis(500))).await;
        let store = connect(addr).await;
        let hour_ms = 3_600_000;

        let row = |name: &str, last_update: u64| NewSnake {
            name: name.to_string(),
            score: 10.0,
            position: Vec2::new(100.0, 100.0),
            angle: 0.0,
            segments: vec![Vec2::new(100.0, 100.0)],
            alive: true,
            last_update,
        };

        // Clock an hour fast, then silent
        let crashed = store
            .insert_snake(row("crashed", now_millis() + hour_ms))
            .await
            .unwrap();
        // Clock an hour slow, but still pushing
        let alive = store
            .insert_snake(row("alive", now_millis() - hour_ms))
            .await
            .unwrap();

        for _ in 0..8 {
            sleep(Duration::from_millis(200)).await;
            let patch = SnakePatch {
                last_update: Some(now_millis() - hour_ms),
                ..SnakePatch::default()
            };
            assert_ok!(store.update_snake(alive.id, patch).await);
        }

        let rows = store.query_snakes(SnakeQuery::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, alive.id);
        assert!(rows.iter().all(|r| r.id != crashed.id));
    }

    /// Tables far larger than one datagram still insert and query whole
    #[tokio::test]
    async fn large_food_table_over_udp() {
        let (addr, _control) = start_server(None).await;
        let store = connect(addr).await;

        let batch: Vec<NewFood> = (0..1600)
            .map(|i| new_food((i % 3000) as f32, (i / 3000) as f32 + 1.0))
            .collect();
        let inserted = store.insert_foods(batch).await.unwrap();
        assert_eq!(inserted.len(), 1600);

        let mut ids: Vec<u64> = inserted.iter().map(|f| f.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 1600);

        let foods = store.query_foods().await.unwrap();
        assert_eq!(foods.len(), 1600);
    }

    /// A stopped server surfaces as a timeout, not a hang
    #[tokio::test]
    async fn stopped_server_times_out() {
        let (addr, control) = start_server(None).await;
        let store = connect(addr).await.with_request_timeout(Duration::from_millis(200));
        assert_ok!(store.query_foods().await);

        control.send(ServerMessage::Shutdown).unwrap();
        sleep(Duration::from_millis(50)).await;

        let err = assert_err!(store.query_foods().await);
        assert_eq!(err, shared::StoreError::TimedOut);
    }
}

/// SESSION TESTS AGAINST SHARED STORES
mod session_tests {
    use super::*;

    async fn started<S: RemoteStore>(
        store: &Arc<S>,
        name: &str,
        spawn: Vec2,
        seed: u64,
    ) -> (Session<S>, SessionHandle) {
        let (mut session, handle) = Session::with_seed(Arc::clone(store), quiet_config(), seed);
        session.start_at(name, spawn).await.unwrap();
        (session, handle)
    }

    /// Two sessions on one in-process store see each other move
    #[tokio::test]
    async fn two_sessions_converge_in_memory() {
        let store = Arc::new(MemoryStore::new());
        let (mut alice, _a) = started(&store, "alice", Vec2::new(500.0, 500.0), 1).await;
        let (mut bob, _b) = started(&store, "bob", Vec2::new(2000.0, 2000.0), 2).await;

        let base = Instant::now();
        for frame in 0..10u64 {
            let now = base + Duration::from_millis(frame * 120);
            alice.tick(&forward(), 1.0, now);
            bob.tick(&forward(), 1.0, now);
            alice.settle().await;
            bob.settle().await;
        }
        pump(&mut alice).await;
        pump(&mut bob).await;

        let bob_id = bob.local_id().unwrap();
        let alice_id = alice.local_id().unwrap();
        let seen_bob = alice.cache().snake(bob_id).unwrap();
        let seen_alice = bob.cache().snake(alice_id).unwrap();

        assert_eq!(seen_bob.position, bob.snake().unwrap().position);
        assert_eq!(seen_alice.position, alice.snake().unwrap().position);
        assert!(alice.cache().snake(alice_id).is_none());
        assert!(bob.cache().snake(bob_id).is_none());
    }

    /// A session seeding a large food table over UDP, and a second
    /// session pulling it back in full
    #[tokio::test]
    async fn sessions_share_large_food_table_over_udp() {
        let (addr, _control) = start_server(None).await;
        let store_a = Arc::new(connect(addr).await);
        let store_b = Arc::new(connect(addr).await);
        let config = GameConfig {
            min_food_count: 1600,
            ..quiet_config()
        };

        let (mut first, _a) = Session::with_seed(Arc::clone(&store_a), config.clone(), 11);
        first.start_at("seeder", Vec2::new(500.0, 500.0)).await.unwrap();
        assert_eq!(first.cache().food_count(), 1600);

        let (mut second, _b) = Session::with_seed(Arc::clone(&store_b), config, 12);
        second.start_at("joiner", Vec2::new(2500.0, 2500.0)).await.unwrap();
        assert_eq!(second.cache().food_count(), 1600);
        assert_eq!(assert_ok!(store_b.query_foods().await).len(), 1600);
    }

    /// Two sessions through the UDP server converge the same way
    #[tokio::test]
    async fn two_sessions_converge_over_udp() {
        let (addr, _control) = start_server(None).await;
        let store_a = Arc::new(connect(addr).await);
        let store_b = Arc::new(connect(addr).await);
        let (mut alice, _a) = started(&store_a, "alice", Vec2::new(500.0, 500.0), 1).await;
        let (mut bob, _b) = started(&store_b, "bob", Vec2::new(2000.0, 2000.0), 2).await;

        let base = Instant::now();
        for frame in 0..10u64 {
            let now = base + Duration::from_millis(frame * 120);
            alice.tick(&forward(), 1.0, now);
            bob.tick(&forward(), 1.0, now);
            alice.settle().await;
            bob.settle().await;
        }
        pump(&mut alice).await;
        pump(&mut bob).await;

        let seen_bob = alice.cache().snake(bob.local_id().unwrap()).unwrap();
        assert_eq!(seen_bob.position, bob.snake().unwrap().position);

        bob.teardown();
        bob.settle().await;
        pump(&mut alice).await;
        assert_eq!(alice.cache().snake_count(), 0);
    }

    /// A death becomes food that the other player can see and eat
    #[tokio::test]
    async fn death_scatter_visible_to_peers() {
        let store = Arc::new(MemoryStore::new());
        let (mut victim, handle) = started(&store, "victim", Vec2::new(1000.0, 1000.0), 3).await;
        let (mut witness, _w) = started(&store, "witness", Vec2::new(2500.0, 2500.0), 4).await;

        // A body lying across the victim's path
        store
            .insert_snake(NewSnake {
                name: "wall".to_string(),
                score: 40.0,
                position: Vec2::new(1010.0, 1200.0),
                angle: 0.0,
                segments: (0..40)
                    .map(|i| Vec2::new(1010.0, 1200.0 - 10.0 * i as f32))
                    .collect(),
                alive: true,
                last_update: now_millis(),
            })
            .await
            .unwrap();
        pump(&mut victim).await;

        let outcome = victim.tick(&forward(), 1.0, Instant::now());
        assert!(matches!(outcome, TickOutcome::GameOver { .. }));
        victim.settle().await;
        assert_eq!(victim.phase(), SessionPhase::Terminated);
        assert_eq!(handle.game_over.await.unwrap(), 10.0);

        pump(&mut witness).await;
        assert_eq!(witness.cache().food_count(), 10);
        assert!(witness.cache().snake(victim.local_id().unwrap()).is_none());
    }
}

/// END-TO-END SCENARIOS
mod scenario_tests {
    use super::*;
    use shared::{Food, SnakeRecord};

    /// Initial chain of length 10, spacing 8, spawned at (1000, 1000)
    #[test]
    fn initial_chain_coordinates() {
        let snake = Snake::spawn_at("p", Vec2::new(1000.0, 1000.0), &GameConfig::default());
        let expected: Vec<Vec2> = (0..10)
            .map(|i| Vec2::new(1000.0 - 8.0 * i as f32, 1000.0))
            .collect();
        assert_eq!(snake.segments, expected);
    }

    /// Food exactly at 16.0 stays, food at 15.99 is eaten
    #[test]
    fn food_consumption_boundary() {
        let config = quiet_config();
        let mut rng = StdRng::seed_from_u64(1);
        let mut snake = Snake::spawn_at("p", Vec2::new(1000.0, 1000.0), &config);

        // Zero-length step keeps the head at (1000, 1000)
        let mut cache = RemoteCache::new();
        cache.insert_food(Food {
            id: 1,
            position: Vec2::new(1016.0, 1000.0),
            color: "hsl(0, 100%, 50%)".to_string(),
            value: 1.0,
        });
        cache.insert_food(Food {
            id: 2,
            position: Vec2::new(1000.0, 1015.99),
            color: "hsl(0, 100%, 50%)".to_string(),
            value: 1.0,
        });

        let events = snake.step(&forward(), 0.0, &cache, &config, &mut rng);
        assert_eq!(snake.position, Vec2::new(1000.0, 1000.0));
        assert_eq!(events.consumed.len(), 1);
        assert_eq!(events.consumed[0].food_id, 2);
        assert_eq!(snake.score, 11.0);
    }

    /// N body segments become exactly N food items near their segments
    #[test]
    fn death_scatter_counts_and_bounds() {
        let config = GameConfig::default();
        let mut rng = StdRng::seed_from_u64(9);
        let mut snake = Snake::spawn_at("p", Vec2::new(1000.0, 1000.0), &config);
        snake.score = 37.0;
        let cache = RemoteCache::new();
        snake.step(&forward(), 1.0, &cache, &config, &mut rng);
        assert_eq!(snake.segments.len(), 37);

        let foods = scatter_food(&snake.segments, &config, &mut rng);
        assert_eq!(foods.len(), 37);
        for (food, segment) in foods.iter().zip(&snake.segments) {
            assert!((food.position.x - segment.x).abs() <= 10.0);
            assert!((food.position.y - segment.y).abs() <= 10.0);
        }
    }

    /// Inbound events naming the local id never reach the cache
    #[test]
    fn cache_never_holds_local_identity() {
        let mut cache = RemoteCache::new();
        cache.set_local_id(3);
        let me = SnakeRecord {
            id: 3,
            name: "me".to_string(),
            score: 10.0,
            position: Vec2::new(1.0, 1.0),
            angle: 0.0,
            segments: vec![Vec2::new(1.0, 1.0)],
            alive: true,
            last_update: 0,
        };

        for event in [
            shared::ChangeEvent::snake_inserted(me.clone()),
            shared::ChangeEvent::snake_updated(me.clone(), me.clone()),
        ] {
            assert!(!cache.apply_change(&event));
            assert_eq!(cache.snake_count(), 0);
        }
    }

    /// Game over fires once even when several overlaps happen in one frame
    #[tokio::test]
    async fn game_over_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let (mut session, mut handle) = Session::with_seed(Arc::clone(&store), quiet_config(), 8);
        session
            .start_at("doomed", Vec2::new(1000.0, 1000.0))
            .await
            .unwrap();

        // Two bodies overlapping the head at once
        for x in [1004.0, 1006.0] {
            store
                .insert_snake(NewSnake {
                    name: "wall".to_string(),
                    score: 20.0,
                    position: Vec2::new(x, 1100.0),
                    angle: 0.0,
                    segments: (0..20).map(|i| Vec2::new(x, 1100.0 - 10.0 * i as f32)).collect(),
                    alive: true,
                    last_update: now_millis(),
                })
                .await
                .unwrap();
        }
        pump(&mut session).await;
        assert_eq!(session.cache().snake_count(), 2);

        let outcomes: Vec<TickOutcome> = (0..3)
            .map(|_| session.tick(&forward(), 1.0, Instant::now()))
            .collect();
        assert!(matches!(outcomes[0], TickOutcome::GameOver { .. }));
        assert_eq!(outcomes[1], TickOutcome::Stopped);
        assert_eq!(outcomes[2], TickOutcome::Stopped);

        session.teardown();
        session.settle().await;
        assert!(handle.game_over.try_recv().is_ok());
        assert_eq!(store.snake_count().await, 2);
    }

    /// Eating the same food twice in quick succession scores once
    #[tokio::test]
    async fn consumption_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let (mut session, _handle) = Session::with_seed(Arc::clone(&store), quiet_config(), 8);
        session
            .start_at("hungry", Vec2::new(1000.0, 1000.0))
            .await
            .unwrap();

        let food = store
            .insert_foods(vec![new_food(1004.0, 1000.0)])
            .await
            .unwrap()
            .remove(0);
        pump(&mut session).await;

        // Redeliver the insert before and after the bite
        let inbox = session.inbox();
        let again = client::session::SyncMessage::Change(shared::ChangeEvent::food_inserted(food.clone()));
        session.tick(&forward(), 1.0, Instant::now());
        inbox.send(again).unwrap();
        session.tick(&forward(), 1.0, Instant::now());
        session.tick(&forward(), 1.0, Instant::now());

        assert_eq!(session.score(), 11.0);
        session.settle().await;
        assert_eq!(store.food_count().await, 0);
    }
}
