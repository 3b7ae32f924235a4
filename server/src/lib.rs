//! # Store Server Library
//!
//! This library provides a reference implementation of the shared table store
//! that snake clients synchronize through. It holds two tables, snakes and
//! foods, answers row-level requests over UDP and fans every change out to the
//! peers that subscribed to the change feed.
//!
//! ## Core Responsibilities
//!
//! ### Table Storage
//! All operations run through `shared::Tables`, the same table semantics the
//! in-process store uses, so ids, query filters and change events behave
//! identically whichever store a client talks to.
//!
//! ### Change Feed
//! Every successful mutation produces change events carrying the old and new
//! row. They are sent to each subscribed peer as individual `Change` packets.
//! Delivery is best effort: a lost datagram is simply lost, and clients rely on
//! their periodic polls to converge.
//!
//! ### Peer Management
//! Handles the lifecycle of peer addresses:
//! - Registration on first packet, subject to a capacity limit
//! - Subscription flags toggled by `Subscribe` and `Unsubscribe`
//! - Heartbeat timeouts that drop silent peers from the fan-out
//!
//! ### Stale Row Reaping
//! A client that crashes never deletes its snake. When configured, the server
//! deletes snake rows it has not seen written for a fixed age and broadcasts
//! the deletes like any other change. Age is measured on the server's own
//! clock; the client-written `last_update` is never trusted for this.
//!
//! ### Multi-Part Replies
//! Query results too large for one datagram are split into parts sharing the
//! request id. Clients reassemble them before completing the request.
//!
//! ## Architecture Design
//!
//! ### Single-Owner Event Loop
//! The tables are owned by the main loop and mutated only there, one packet at
//! a time. Network receive, network send and timeout checks run as separate
//! tasks that talk to the loop through channels.
//!
//! ### No Game Logic
//! The server never simulates or validates anything. Clients are authoritative
//! for their own snakes and the server stores whatever they report.
//!
//! ## Module Organization
//!
//! ### Peer Manager Module (`peer_manager`)
//! - Peer tracking by address
//! - Subscription state
//! - Timeout detection and cleanup
//!
//! ### Network Module (`network`)
//! - UDP socket management and packet decoding
//! - Request execution and replies
//! - Change-event fan-out and stale-row reaping
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Up to 64 peers; snakes silent for 30s are deleted
//!     let mut server = Server::new("127.0.0.1:8080", 64, Some(Duration::from_secs(30))).await?;
//!
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod peer_manager;
