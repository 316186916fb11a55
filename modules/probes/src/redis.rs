//! Redis service tester.

use std::net::IpAddr;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::time::timeout;

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};
use queue::{Reply, RespConnection};

use crate::util;

pub struct RedisProbe;

#[async_trait]
impl Probe for RedisProbe {
    fn schema(&self) -> Schema {
        let mut known = base_schema();
        known.insert("port", "^[0-9]+$");
        known.insert("password", ".*");
        known.insert("list", ".*");
        known.insert("set", ".*");
        known.insert("max_size", "^[0-9]+$");
        known
    }

    fn example(&self) -> &'static str {
        r"
Redis Tester
------------
 The redis tester connects to a remote host and ensures it answers a
 PING, authenticating first when a password is supplied.

 When 'list' or 'set' is given together with 'max_size' the test also
 fails if the named key holds that many entries or more, which catches
 consumers that have stopped draining a work-queue.

 This test is invoked via input like so:

    cache.example.com must run redis [with password 'secret'] [with list 'jobs' with max_size 1000]
"
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        let port = util::port_arg(test, 6379)?;
        let stream = util::connect(ip, port, opts.timeout).await?;
        let mut conn = RespConnection::from_stream(stream);

        if let Some(password) = test.arguments.get("password").filter(|p| !p.is_empty()) {
            match command(&mut conn, &["AUTH", password.as_str()], opts).await? {
                Reply::Simple(_) => {}
                Reply::Error(e) => bail!("authentication failed: {}", e),
                other => bail!("unexpected AUTH reply: {:?}", other),
            }
        }

        match command(&mut conn, &["PING"], opts).await? {
            Reply::Simple(ref pong) if pong == "PONG" => {}
            Reply::Error(e) => bail!("PING failed: {}", e),
            other => bail!("unexpected PING reply: {:?}", other),
        }

        let max_size = match test.arguments.get("max_size").filter(|m| !m.is_empty()) {
            Some(raw) => Some(raw.parse::<i64>()?),
            None => None,
        };

        if let Some(max_size) = max_size {
            if let Some(list) = test.arguments.get("list").filter(|l| !l.is_empty()) {
                let len =
                    integer_reply(command(&mut conn, &["LLEN", list.as_str()], opts).await?)?;
                if len >= max_size {
                    bail!("list {} contains {} entries, limit is {}", list, len, max_size);
                }
            }
            if let Some(set) = test.arguments.get("set").filter(|s| !s.is_empty()) {
                let len =
                    integer_reply(command(&mut conn, &["SCARD", set.as_str()], opts).await?)?;
                if len >= max_size {
                    bail!("set {} contains {} entries, limit is {}", set, len, max_size);
                }
            }
        }

        Ok(())
    }
}

async fn command(conn: &mut RespConnection, args: &[&str], opts: &Options) -> Result<Reply> {
    timeout(opts.timeout, conn.command(args))
        .await
        .map_err(|_| anyhow!("redis command timed out"))?
}

fn integer_reply(reply: Reply) -> Result<i64> {
    match reply {
        Reply::Integer(n) => Ok(n),
        Reply::Error(e) => bail!("redis error: {}", e),
        other => bail!("expected an integer reply, got {:?}", other),
    }
}

pub fn register(registry: &Registry) {
    registry.register("redis", || Box::new(RedisProbe));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_with(args: &[(&str, &str)]) -> Test {
        let mut arguments = BTreeMap::new();
        for (k, v) in args {
            arguments.insert(k.to_string(), v.to_string());
        }
        Test {
            target: "cache.example.com".to_string(),
            kind: "redis".to_string(),
            input: String::new(),
            arguments,
            max_retries: None,
        }
    }

    /// A scripted server: answers each received command with the next
    /// canned reply.
    async fn scripted(replies: Vec<&'static [u8]>) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            for reply in replies {
                let _ = sock.read(&mut buf).await;
                sock.write_all(reply).await.unwrap();
            }
        });
        port
    }

    #[tokio::test]
    async fn ping_pass() {
        let port = scripted(vec![b"+PONG\r\n"]).await;
        let test = test_with(&[("port", &port.to_string())]);
        RedisProbe
            .run(&test, IpAddr::V4(Ipv4Addr::LOCALHOST), &Options::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn oversized_list_fails() {
        let port = scripted(vec![b"+PONG\r\n", b":1000\r\n"]).await;
        let test = test_with(&[
            ("port", &port.to_string()),
            ("list", "jobs"),
            ("max_size", "100"),
        ]);
        let err = RedisProbe
            .run(&test, IpAddr::V4(Ipv4Addr::LOCALHOST), &Options::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("list jobs contains 1000"));
    }

    #[tokio::test]
    async fn set_within_limit_passes() {
        let port = scripted(vec![b"+PONG\r\n", b":7\r\n"]).await;
        let test = test_with(&[
            ("port", &port.to_string()),
            ("set", "members"),
            ("max_size", "100"),
        ]);
        RedisProbe
            .run(&test, IpAddr::V4(Ipv4Addr::LOCALHOST), &Options::default())
            .await
            .unwrap();
    }
}
