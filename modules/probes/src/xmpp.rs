//! XMPP service tester.

use std::net::IpAddr;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufStream};

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

use crate::util;

pub struct XmppProbe;

#[async_trait]
impl Probe for XmppProbe {
    fn schema(&self) -> Schema {
        let mut known = base_schema();
        known.insert("port", "^[0-9]+$");
        known
    }

    fn example(&self) -> &'static str {
        r"
XMPP Tester
-----------
 The XMPP tester opens a client stream to a remote host and ensures
 that the reply looks like an XMPP stream header.

 This test is invoked via input like so:

    chat.example.com must run xmpp [with port 5223]
"
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        let port = util::port_arg(test, 5222)?;
        let stream = util::connect(ip, port, opts.timeout).await?;
        let mut stream = BufStream::new(stream);

        // The server only speaks once the initiating entity opens a stream.
        let open = format!(
            "<?xml version='1.0'?><stream:stream to='{}' xmlns='jabber:client' \
             xmlns:stream='http://etherx.jabber.org/streams' version='1.0'>",
            util::target_host(test)
        );
        stream.write_all(open.as_bytes()).await?;
        stream.flush().await?;

        let banner = util::read_until(&mut stream, b'>', opts.timeout).await?;
        if !banner.contains("<?xml") {
            bail!("banner doesn't look like an XMPP server: '{}'", banner.trim());
        }

        Ok(())
    }
}

pub fn register(registry: &Registry) {
    registry.register("xmpp", || Box::new(XmppProbe));
}
