//! # Realm Server Library
//!
//! Authoritative server for a real-time multiplayer world split into rooms.
//! Each room owns the only copy of its players, enemies and dropped coins,
//! validates every client intent against that state and pushes snapshots
//! back out. Rooms share players through a process-wide coordination bus
//! that holds parties, persistent profiles, chat relay and the leaderboard.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Clients only report intent: where they think they are, which way they
//! swing, what they want to buy. Movement is checked against the server's
//! own clock and speed budget, melee hits are computed every tick from the
//! same orbit and hitbox math a client previews with, and all rewards are
//! decided on the server.
//!
//! ### Session Continuity
//! A dropped connection does not remove a player. The room marks it
//! disconnected and keeps it for a grace period; rejoining with the same
//! identity picks up exactly where it left off. Consented leaves and grace
//! expiry write the player's profile to the bus so the next join in any room
//! restores it. A disciplinary kick skips the grace period and wipes the
//! profile.
//!
//! ### Cross-Room Coordination
//! Party membership, invites, relayed chat, death announcements and the
//! leaderboard all go through the `bus`. The bus never touches a room's
//! state directly; it queues events that the room applies in its own task.
//!
//! ## Architecture Design
//!
//! ### One Task Per Room
//! Every room is a tokio task that receives client messages, bus events,
//! grace timers and its tick interval through one `select!`. Nothing inside
//! a room is shared, so nothing inside a room is locked. The bus is the only
//! state touched from several tasks and sits behind a mutex.
//!
//! ### UDP-Based Communication
//! Packets are bincode-encoded `shared::Packet` datagrams. The network layer
//! maps addresses to sessions, sessions to rooms, and runs separate tasks for
//! receiving, sending and heartbeat timeouts.
//!
//! ### Fixed Tick Order
//! A room tick runs coin pickup, weapon hits, regeneration, potion drain,
//! party sync, respawns and enemy AI in that order, then pushes profile
//! deltas and a snapshot when their intervals have elapsed.
//!
//! ## Module Organization
//!
//! - `ai`: enemy target selection, chasing and melee
//! - `bus`: parties, profiles, chat relay, kicks and the leaderboard
//! - `client_manager`: UDP sessions, heartbeats and capacity
//! - `config`: tunable game rules, loadable from JSON
//! - `content`: enemy/weapon/object registries and map sources
//! - `economy`: kill rewards, coin drops and coin pickup
//! - `entity`: player and enemy records plus pending respawns and coins
//! - `game`: room state, joins, leaves and intent handlers
//! - `network`: socket tasks and routing of packets to rooms
//! - `room`: room tasks and the registry that starts them on demand
//! - `simulation`: the ordered room tick
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::bus::Bus;
//! use server::config::GameConfig;
//! use server::content::{BuiltinMapSource, Registry};
//! use server::network::{Server, ServerSettings};
//! use server::room::RoomContext;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GameConfig::default();
//!     let context = RoomContext {
//!         bus: Arc::new(Bus::new(config.max_party_size, config.party_name_max_len)),
//!         maps: Arc::new(BuiltinMapSource),
//!         registry: Arc::new(Registry::builtin()),
//!         config: Arc::new(config),
//!         admin_token: None,
//!     };
//!     let settings = ServerSettings {
//!         max_clients: 64,
//!         default_map: "meadow".to_string(),
//!         heartbeat_timeout: Duration::from_secs(5),
//!     };
//!
//!     let mut server = Server::new("127.0.0.1:8080", settings, context).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod ai;
pub mod bus;
pub mod client_manager;
pub mod config;
pub mod content;
pub mod economy;
pub mod entity;
pub mod game;
pub mod network;
pub mod room;
pub mod simulation;
