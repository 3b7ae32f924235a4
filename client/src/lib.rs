//! # Snake Client Library
//!
//! This library holds everything a client needs to play one snake in a shared
//! arena: the local simulation, collision checks, the cache of other players
//! and food, and the synchronization layer that keeps the shared table store
//! eventually consistent with what this client sees.
//!
//! ## Architecture Overview
//!
//! Every client is authoritative for its own snake. There is no simulation on
//! the store side: clients push their snake's full state at a throttled rate,
//! read everyone else's through polls and a row-level change feed, and decide
//! locally when they have eaten food or run into another body.
//!
//! ### Local Simulation
//! The simulation advances the local snake once per frame from an input
//! snapshot and a normalized delta time. It reads the remote cache but never
//! writes it, and reports what happened (food eaten, food to spawn, death) as
//! plain step events.
//!
//! ### Synchronization
//! The session turns step events into store mutations without waiting for
//! them, and funnels every inbound update (change events, peer polls,
//! leaderboard polls, its own food top-ups) through a single inbox that is
//! drained between frames. Collision checks therefore always see one
//! consistent snapshot per frame.
//!
//! ### Failure Handling
//! Only failing to create the local snake ends a session. Lost races on
//! deletes are ignored, and every other failure waits for the next push or
//! poll; there are no retries with backoff.
//!
//! ## Module Organization
//!
//! ### Simulation Module (`sim`)
//! - Spawning and the initial body chain
//! - Per-frame steering, boost cost, movement and wall clamping
//! - Follow-the-leader chain relaxation
//! - Converting a dead snake's body into food
//!
//! ### Collision Module (`collision`)
//! Circle-overlap tests for food, other snakes' bodies and the snake's own body.
//!
//! ### Cache Module (`cache`)
//! The local mirror of the snakes and foods tables, with delete tombstones so
//! redelivered events cannot resurrect rows.
//!
//! ### Store and Network Modules (`store`, `network`)
//! The `RemoteStore` trait, the in-process `MemoryStore` and the UDP-backed
//! `UdpStore` that talks to the reference store server.
//!
//! ### Session Module (`session`)
//! The per-session state machine, throttled pushes, periodic polls and the
//! change-feed forwarder.
//!
//! ### Driver and Input Modules (`driver`, `input`)
//! The frame loop and the sources of steering input.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::driver::GameLoop;
//! use client::input::Autopilot;
//! use client::session::Session;
//! use client::store::MemoryStore;
//! use shared::GameConfig;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let (mut session, handle) = Session::new(store, GameConfig::default());
//!     session.start("player").await?;
//!
//!     let exit = GameLoop::new(60)
//!         .run(&mut session, &mut Autopilot::new(7), async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//!
//!     println!("{:?}, final score {}", exit, handle.game_over.await?);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod collision;
pub mod driver;
pub mod input;
pub mod network;
pub mod session;
pub mod sim;
pub mod store;
