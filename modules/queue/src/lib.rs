//! Queue client abstraction for the jobs and results lists.
//!
//! The broker is fully replaceable behind the [`Queue`] trait; the shipped
//! implementation is a Redis list client speaking RESP directly.

mod resp;

pub use resp::{Reply, RespConnection};

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

/// Key of the jobs list: one test line per element.
pub const JOBS_KEY: &str = "overseer.jobs";

/// Key of the results list: one JSON result record per element.
pub const RESULTS_KEY: &str = "overseer.results";

/// A FIFO list store with a blocking pop.
#[async_trait]
pub trait Queue: Send {
    /// Pop the oldest element of `key`, waiting up to `timeout`.
    ///
    /// `None` waits forever. Returns `Ok(None)` only when a finite wait
    /// expired without an element arriving.
    async fn blocking_pop(
        &mut self,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>>;

    /// Append `value` to the tail of `key`.
    async fn push(&mut self, key: &str, value: &str) -> Result<()>;
}

/// Redis implementation of [`Queue`].
pub struct RedisQueue {
    conn: RespConnection,
}

impl RedisQueue {
    /// Connect to the given `host:port`, authenticate when a password is
    /// supplied, and verify the connection with a PING.
    pub async fn connect(addr: &str, password: Option<&str>) -> Result<Self> {
        let mut conn = RespConnection::connect(addr).await?;

        if let Some(password) = password.filter(|p| !p.is_empty()) {
            match conn.command(&["AUTH", password]).await? {
                Reply::Simple(_) => {}
                Reply::Error(e) => bail!("queue authentication failed: {}", e),
                other => bail!("unexpected AUTH reply: {:?}", other),
            }
        }

        match conn.command(&["PING"]).await? {
            Reply::Simple(ref pong) if pong == "PONG" => {}
            Reply::Error(e) => bail!("queue ping failed: {}", e),
            other => bail!("unexpected PING reply: {:?}", other),
        }

        Ok(Self { conn })
    }

    /// The underlying RESP connection, for callers issuing non-list
    /// commands over the same link.
    pub fn connection(&mut self) -> &mut RespConnection {
        &mut self.conn
    }
}

#[async_trait]
impl Queue for RedisQueue {
    async fn blocking_pop(
        &mut self,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>> {
        // BLPOP's unit is whole seconds; zero blocks forever.
        let secs = match timeout {
            None => 0,
            Some(t) => t.as_secs().max(1),
        };
        let secs = secs.to_string();

        match self.conn.command(&["BLPOP", key, secs.as_str()]).await? {
            Reply::Array(Some(items)) => match items.into_iter().nth(1) {
                Some(Reply::Bulk(Some(value))) => Ok(Some(value)),
                other => bail!("unexpected BLPOP element: {:?}", other),
            },
            Reply::Array(None) | Reply::Bulk(None) => Ok(None),
            Reply::Error(e) => bail!("BLPOP failed: {}", e),
            other => bail!("unexpected BLPOP reply: {:?}", other),
        }
    }

    async fn push(&mut self, key: &str, value: &str) -> Result<()> {
        match self.conn.command(&["RPUSH", key, value]).await? {
            Reply::Integer(_) => Ok(()),
            Reply::Error(e) => bail!("RPUSH failed: {}", e),
            other => bail!("unexpected RPUSH reply: {:?}", other),
        }
    }
}
