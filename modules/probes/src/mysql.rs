//! MySQL service tester.

use std::net::IpAddr;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use tokio::time::timeout;

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

pub struct MysqlProbe;

#[async_trait]
impl Probe for MysqlProbe {
    fn schema(&self) -> Schema {
        let mut known = base_schema();
        known.insert("port", "^[0-9]+$");
        known.insert("username", ".*");
        known.insert("password", ".*");
        known
    }

    fn example(&self) -> &'static str {
        r"
MySQL Tester
------------
 The MySQL tester connects to the database with the supplied
 credentials and pings it.

 Specifying a username is mandatory, because otherwise we cannot
 connect; the password might legitimately be blank.

 This test is invoked via input like so:

    db.example.com must run mysql with username 'root' with password 'secret' [with port 3307]
"
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        let username = test
            .arguments
            .get("username")
            .filter(|u| !u.is_empty())
            .ok_or_else(|| anyhow!("no username specified"))?;
        let password = test.arguments.get("password").cloned().unwrap_or_default();
        let port = crate::util::port_arg(test, 3306)?;

        let builder = mysql_async::OptsBuilder::default()
            .ip_or_hostname(ip.to_string())
            .tcp_port(port)
            .user(Some(username.clone()))
            .pass(Some(password));

        let mut conn = timeout(opts.timeout, mysql_async::Conn::new(builder))
            .await
            .map_err(|_| anyhow!("MySQL connection timed out"))??;

        let ping = timeout(opts.timeout, conn.ping())
            .await
            .map_err(|_| anyhow!("MySQL ping timed out"))
            .and_then(|r| r.map_err(Into::into));

        let _ = conn.disconnect().await;
        ping
    }
}

pub fn register(registry: &Registry) {
    registry.register("mysql", || Box::new(MysqlProbe));
}
