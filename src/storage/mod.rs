//! Key-value storage with TTL expiry.
//!
//! One [`Store`] holds the whole keyspace behind a single reader-writer
//! lock. Every connection task and the background [`Reaper`] share it
//! through an `Arc`; all mutation goes through `Store` methods.
//!
//! ```text
//!  connection tasks ──┐
//!                     ├──▶  Store (RwLock<HashMap<Bytes, Entry>>)
//!  Reaper (1s tick) ──┘
//! ```
//!
//! Expired entries disappear through two complementary paths: a read
//! removes the dead entry it just found (lazy expiry), and the reaper
//! periodically removes every dead entry regardless of reads (active
//! sweep). Both run under the same lock.
//!
//! ## Example
//!
//! ```
//! use emberkv::storage::Store;
//! use bytes::Bytes;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let store = Arc::new(Store::new());
//!
//! store.set(Bytes::from("name"), Bytes::from("ember"));
//! assert_eq!(store.get(&Bytes::from("name")), Some(Bytes::from("ember")));
//!
//! store.set_with_ttl(
//!     Bytes::from("session"),
//!     Bytes::from("token123"),
//!     Duration::from_secs(3600),
//! );
//! ```

pub mod reaper;
pub mod store;

pub use reaper::{Reaper, DEFAULT_SWEEP_PERIOD};
pub use store::{Entry, Store};
