//! Wire protocol codec.
//!
//! The server speaks a small RESP subset: requests arrive as
//! array-of-bulk-string frames or inline text lines, replies leave as one
//! of five typed values. Decoding and encoding are pure functions over
//! byte buffers with no I/O of their own.
//!
//! - `parser`: incremental decoding of one command from an accumulation
//!   buffer
//! - `types`: the [`Reply`] value and its wire encoding
//!
//! ## Example
//!
//! ```
//! use emberkv::protocol::{decode_command, Reply};
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (argv, consumed) = decode_command(data).unwrap().unwrap();
//! assert_eq!(consumed, data.len());
//! assert_eq!(&argv[0][..], b"GET");
//!
//! let reply = Reply::bulk("value");
//! assert_eq!(reply.encode(), b"$5\r\nvalue\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{decode_command, ProtocolError, ProtocolResult, MAX_BULK_LEN};
pub use types::Reply;
