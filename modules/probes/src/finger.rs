//! Finger service tester.

use std::net::IpAddr;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufStream};

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

use crate::util;

pub struct FingerProbe;

#[async_trait]
impl Probe for FingerProbe {
    fn schema(&self) -> Schema {
        let mut known = base_schema();
        known.insert("port", "^[0-9]+$");
        known.insert("user", ".*");
        known.insert("content", ".*");
        known
    }

    fn example(&self) -> &'static str {
        r"
Finger Tester
-------------
 The finger tester requests the plan of the given user and ensures the
 server sends a response. If 'content' is supplied the response must
 contain it.

 This test is invoked via input like so:

    host.example.com must run finger with user 'steve' [with content 'on holiday']
"
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        let port = util::port_arg(test, 79)?;
        let stream = util::connect(ip, port, opts.timeout).await?;
        let mut stream = BufStream::new(stream);

        let user = test.arguments.get("user").map(String::as_str).unwrap_or("");
        stream.write_all(format!("{}\r\n", user).as_bytes()).await?;
        stream.flush().await?;

        let output = util::read_line(&mut stream, opts.timeout).await?;
        if output.trim().is_empty() {
            bail!("the server didn't send a response");
        }

        if let Some(content) = test.arguments.get("content").filter(|c| !c.is_empty()) {
            if !output.contains(content.as_str()) {
                bail!("the finger-output did not contain the required text '{}'", content);
            }
        }

        Ok(())
    }
}

pub fn register(registry: &Registry) {
    registry.register("finger", || Box::new(FingerProbe));
}
