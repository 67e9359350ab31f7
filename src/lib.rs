//! # EmberKV - A Minimal In-Memory Key-Value Server
//!
//! EmberKV is a small TCP key-value server speaking a subset of the RESP
//! wire protocol. It keeps every entry in memory behind a single lock,
//! supports per-key expiry, and serves each client from its own async
//! task.
//!
//! ## Features
//!
//! - **RESP-Subset Protocol**: Array-of-bulk-strings requests plus an
//!   inline form for hand-typed sessions
//! - **Binary-Safe Values**: Keys and values are raw byte strings
//! - **TTL Support**: `SET key value EX seconds`, with lazy expiry on
//!   access and a background sweep for untouched keys
//! - **Async I/O**: Built on Tokio, one task per connection
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           EmberKV                            │
//! │                                                              │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐       │
//! │  │ TCP Server  │───>│   Session   │───>│ Dispatcher  │       │
//! │  │ (Listener)  │    │ (per client)│    │             │       │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘       │
//! │                           │                  │              │
//! │                           ▼                  ▼              │
//! │                    ┌─────────────┐    ┌─────────────┐       │
//! │                    │ RESP codec  │    │    Store    │       │
//! │                    │             │    │ RwLock<Map> │       │
//! │                    └─────────────┘    └─────────────┘       │
//! │                                              ▲              │
//! │                                              │              │
//! │                                       ┌─────────────┐       │
//! │                                       │   Reaper    │       │
//! │                                       │ (bg task)   │       │
//! │                                       └─────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use emberkv::commands::Dispatcher;
//! use emberkv::connection::{handle_connection, ConnectionStats};
//! use emberkv::storage::{Reaper, Store, DEFAULT_SWEEP_PERIOD};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(Store::new());
//!     let reaper = Reaper::start(Arc::clone(&store), DEFAULT_SWEEP_PERIOD);
//!     let stats = Arc::new(ConnectionStats::new());
//!
//!     let listener = TcpListener::bind("127.0.0.1:6378").await.unwrap();
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await.unwrap();
//!         let dispatcher = Dispatcher::new(Arc::clone(&store));
//!         let stats = Arc::clone(&stats);
//!
//!         tokio::spawn(handle_connection(stream, addr, dispatcher, stats));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `ECHO message`
//! - `SET key value [EX seconds]`
//! - `GET key`
//! - `DEL key [key ...]`
//! - `QUIT`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP-subset decoder and reply encoder
//! - [`storage`]: The in-memory store and its expiry reaper
//! - [`commands`]: Command dispatch over decoded requests
//! - [`connection`]: Client connection management
//!
//! ## Design Highlights
//!
//! ### One Lock, Two Expiry Paths
//!
//! All entries live in one `RwLock<HashMap>`. Expiry is enforced both
//! lazily (an expired entry is removed the moment a lookup touches it)
//! and actively (the [`storage::Reaper`] sweeps on a fixed period), so
//! memory is reclaimed even for keys nobody reads again. Both paths go
//! through the same lock, so a sweep can never revive or miss an entry
//! a concurrent command just wrote.
//!
//! ### Cheap Byte Handling
//!
//! Decoded arguments are `bytes::Bytes`, so storing a value or echoing
//! one back is a reference-count bump rather than a copy.

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{Dispatcher, Outcome};
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{decode_command, ProtocolError, Reply};
pub use storage::{Reaper, Store, DEFAULT_SWEEP_PERIOD};

/// The default port EmberKV listens on
pub const DEFAULT_PORT: u16 = 6378;

/// The default host EmberKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
