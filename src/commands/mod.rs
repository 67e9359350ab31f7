//! Command processing.
//!
//! Decoded argument lists come in from the connection layer, store
//! operations happen here, and a reply plus a close flag go back out.
//!
//! ```text
//! client bytes
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ protocol parser │
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │   Dispatcher    │  (this module)
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │      Store      │
//! └─────────────────┘
//! ```
//!
//! Supported commands: `PING`, `ECHO`, `SET` (with `EX`), `GET`, `DEL`,
//! `QUIT`.

pub mod dispatch;

pub use dispatch::{Dispatcher, Outcome};
