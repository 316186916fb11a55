//! FTP service tester.

use std::net::IpAddr;

use anyhow::Result;
use async_trait::async_trait;

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

use crate::util;

pub struct FtpProbe;

#[async_trait]
impl Probe for FtpProbe {
    fn schema(&self) -> Schema {
        let mut known = base_schema();
        known.insert("port", "^[0-9]+$");
        known
    }

    fn example(&self) -> &'static str {
        r"
FTP Tester
----------
 The FTP tester connects to a remote host and ensures that a response
 is received that looks like an ftp-server greeting.

 This test is invoked via input like so:

    host.example.com must run ftp [with port 2121]
"
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        util::expect_banner(test, ip, opts, 21, "220", "an FTP server").await?;
        Ok(())
    }
}

pub fn register(registry: &Registry) {
    registry.register("ftp", || Box::new(FtpProbe));
}
