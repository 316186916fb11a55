//! NNTP service tester.

use std::net::IpAddr;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufStream};

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

use crate::util;

pub struct NntpProbe;

#[async_trait]
impl Probe for NntpProbe {
    fn schema(&self) -> Schema {
        let mut known = base_schema();
        known.insert("port", "^[0-9]+$");
        known.insert("username", ".*");
        known.insert("password", ".*");
        known
    }

    fn example(&self) -> &'static str {
        r"
NNTP Tester
-----------
 The NNTP tester connects to a remote host and ensures that a response
 is received that looks like a news-server banner.

 If a username and password are supplied an AUTHINFO exchange is
 performed, and the test fails if the server rejects the credentials.

 This test is invoked via input like so:

    news.example.com must run nntp [with port 1190] [with username 'reader' with password 'secret']
"
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        let port = util::port_arg(test, 119)?;
        let stream = util::connect(ip, port, opts.timeout).await?;
        let mut stream = BufStream::new(stream);

        let banner = util::read_line(&mut stream, opts.timeout).await?;
        if !banner.contains("200") && !banner.contains("201") {
            bail!("banner doesn't look like a news server: '{}'", banner.trim());
        }

        let username = test.arguments.get("username").filter(|v| !v.is_empty());
        let password = test.arguments.get("password").filter(|v| !v.is_empty());
        if let (Some(username), Some(password)) = (username, password) {
            stream
                .write_all(format!("AUTHINFO USER {}\r\n", username).as_bytes())
                .await?;
            stream.flush().await?;
            let reply = util::read_line(&mut stream, opts.timeout).await?;
            if !reply.starts_with("381") {
                bail!("AUTHINFO USER rejected: '{}'", reply.trim());
            }

            stream
                .write_all(format!("AUTHINFO PASS {}\r\n", password).as_bytes())
                .await?;
            stream.flush().await?;
            let reply = util::read_line(&mut stream, opts.timeout).await?;
            if !reply.starts_with("281") {
                bail!("authentication failed: '{}'", reply.trim());
            }
        }

        Ok(())
    }
}

pub fn register(registry: &Registry) {
    registry.register("nntp", || Box::new(NntpProbe));
}
