//! Command dispatch.
//!
//! Takes a decoded argument list, validates it, runs the matching store
//! operation, and produces a reply. Every path through here yields a
//! reply value; nothing escapes to the transport as a failure.
//!
//! ## Commands
//!
//! - `PING [message]` - pong, or echo the message
//! - `ECHO message` - echo the message
//! - `SET key value [EX seconds]` - store a value, optionally expiring
//! - `GET key` - fetch a value
//! - `DEL key [key ...]` - remove keys, counting the ones that existed
//! - `QUIT` - acknowledge and close the connection
//!
//! Command keywords are case-insensitive; keys and arguments are not.

use crate::protocol::Reply;
use crate::storage::Store;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// What the connection should do with a dispatched command: write
/// `reply`, then close if `close` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub reply: Reply,
    pub close: bool,
}

/// Maps command names to store operations.
///
/// Cheap to clone; every connection task carries one over the shared
/// store.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Arc<Store>,
}

impl Dispatcher {
    /// Creates a dispatcher over the shared store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Executes one command.
    ///
    /// `argv` is the decoded argument list, command name first. An empty
    /// list and an unknown name produce error replies, not failures.
    pub fn dispatch(&self, argv: &[Bytes]) -> Outcome {
        let Some(name) = argv.first() else {
            return Outcome {
                reply: Reply::error("ERR no command given"),
                close: false,
            };
        };

        let command = String::from_utf8_lossy(name).to_ascii_uppercase();
        let rest = &argv[1..];

        let reply = match command.as_str() {
            "PING" => self.cmd_ping(rest),
            "ECHO" => self.cmd_echo(rest),
            "SET" => self.cmd_set(rest),
            "GET" => self.cmd_get(rest),
            "DEL" => self.cmd_del(rest),
            "QUIT" => {
                return Outcome {
                    reply: Reply::ok(),
                    close: true,
                }
            }
            _ => Reply::error(format!(
                "ERR unknown command '{}'",
                String::from_utf8_lossy(name)
            )),
        };

        Outcome {
            reply,
            close: false,
        }
    }

    /// PING [message]
    fn cmd_ping(&self, rest: &[Bytes]) -> Reply {
        match rest {
            [] => Reply::pong(),
            [message] => Reply::bulk(message.clone()),
            _ => Reply::error("ERR wrong number of arguments for 'PING' command"),
        }
    }

    /// ECHO message
    fn cmd_echo(&self, rest: &[Bytes]) -> Reply {
        match rest {
            [message] => Reply::bulk(message.clone()),
            _ => Reply::error("ERR wrong number of arguments for 'ECHO' command"),
        }
    }

    /// SET key value [EX seconds]
    ///
    /// Always replies OK. The key's previous expiration, if any, is
    /// replaced by whatever this call establishes.
    fn cmd_set(&self, rest: &[Bytes]) -> Reply {
        if rest.len() < 2 {
            return Reply::error("ERR wrong number of arguments for 'SET' command");
        }

        let key = rest[0].clone();
        let value = rest[1].clone();

        match parse_ex_ttl(&rest[2..]) {
            Some(ttl) => self.store.set_with_ttl(key, value, ttl),
            None => self.store.set(key, value),
        }

        Reply::ok()
    }

    /// GET key
    fn cmd_get(&self, rest: &[Bytes]) -> Reply {
        match rest {
            [key] => match self.store.get(key) {
                Some(value) => Reply::bulk(value),
                None => Reply::null(),
            },
            _ => Reply::error("ERR wrong number of arguments for 'GET' command"),
        }
    }

    /// DEL key [key ...]
    fn cmd_del(&self, rest: &[Bytes]) -> Reply {
        if rest.is_empty() {
            return Reply::error("ERR wrong number of arguments for 'DEL' command");
        }

        let removed = rest.iter().filter(|key| self.store.delete(key)).count();
        Reply::integer(removed as i64)
    }
}

/// Reads an `EX <seconds>` option from the tail of a SET command.
///
/// The keyword is case-insensitive. Unparsable or non-positive seconds
/// mean no expiration, as does any tail that is not an EX pair; none of
/// these are errors.
fn parse_ex_ttl(tail: &[Bytes]) -> Option<Duration> {
    let (keyword, seconds) = match tail {
        [keyword, seconds, ..] => (keyword, seconds),
        _ => return None,
    };

    if !keyword.eq_ignore_ascii_case(b"EX") {
        return None;
    }

    let seconds = std::str::from_utf8(seconds).ok()?.parse::<i64>().ok()?;
    (seconds > 0).then(|| Duration::from_secs(seconds as u64))
}
