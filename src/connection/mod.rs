//! Client connection handling.
//!
//! The listener in `main.rs` accepts sockets and spawns one task per
//! client:
//!
//! ```text
//!        TCP listener
//!             │ accept()
//!             ▼
//!      spawn(handle_connection)
//!             │
//!             ▼
//! ┌──────────────────────────────────────────┐
//! │ Session                                  │
//! │  read bytes ─▶ decode ─▶ dispatch ─▶ reply │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Sessions share nothing with each other except the store (through a
//! [`Dispatcher`](crate::commands::Dispatcher)) and the aggregate
//! [`ConnectionStats`] counters.
//!
//! ## Example
//!
//! ```ignore
//! use emberkv::commands::Dispatcher;
//! use emberkv::connection::{handle_connection, ConnectionStats};
//! use emberkv::storage::Store;
//! use std::sync::Arc;
//!
//! let store = Arc::new(Store::new());
//! let stats = Arc::new(ConnectionStats::new());
//!
//! // For each accepted connection...
//! let (stream, addr) = listener.accept().await?;
//! let dispatcher = Dispatcher::new(Arc::clone(&store));
//! tokio::spawn(handle_connection(stream, addr, dispatcher, Arc::clone(&stats)));
//! ```

pub mod handler;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionError, ConnectionStats, Session};
