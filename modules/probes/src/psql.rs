//! PostgreSQL service tester.

use std::net::IpAddr;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::time::timeout;
use tokio_postgres::config::SslMode;
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

use crate::util;

pub struct PsqlProbe;

#[async_trait]
impl Probe for PsqlProbe {
    fn schema(&self) -> Schema {
        let mut known = base_schema();
        known.insert("port", "^[0-9]+$");
        known.insert("username", ".*");
        known.insert("password", ".*");
        known.insert("sslmode", "^(disable|require|verify-ca|verify-full)$");
        known
    }

    fn example(&self) -> &'static str {
        r"
PostgreSQL Tester
-----------------
 The PostgreSQL tester connects to the database with the supplied
 credentials and runs a trivial query.

 Specifying a username is mandatory, because otherwise we cannot
 connect. 'sslmode' accepts disable, require, verify-ca, and
 verify-full, defaulting to disable.

 This test is invoked via input like so:

    db.example.com must run psql with username 'postgres' with password 'secret' [with sslmode require]
"
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        let username = test
            .arguments
            .get("username")
            .filter(|u| !u.is_empty())
            .ok_or_else(|| anyhow!("no username specified"))?;
        let port = util::port_arg(test, 5432)?;
        let sslmode = test
            .arguments
            .get("sslmode")
            .map(String::as_str)
            .unwrap_or("disable");

        let mut config = tokio_postgres::Config::new();
        config
            .host(&util::target_host(test))
            .hostaddr(ip)
            .port(port)
            .user(username)
            .dbname(username)
            .connect_timeout(opts.timeout);
        if let Some(password) = test.arguments.get("password").filter(|p| !p.is_empty()) {
            config.password(password);
        }

        match sslmode {
            "disable" => {
                config.ssl_mode(SslMode::Disable);
                let (client, connection) = timeout(opts.timeout, config.connect(NoTls))
                    .await
                    .map_err(|_| anyhow!("PostgreSQL connection timed out"))??;
                tokio::spawn(connection);
                timeout(opts.timeout, client.simple_query("SELECT 1"))
                    .await
                    .map_err(|_| anyhow!("PostgreSQL query timed out"))??;
            }
            mode => {
                config.ssl_mode(SslMode::Require);
                // 'require' encrypts without verifying the peer; the two
                // verify modes check the chain and hostname.
                let insecure = mode == "require";
                let tls = MakeRustlsConnect::new(util::tls_client_config(insecure));
                let (client, connection) = timeout(opts.timeout, config.connect(tls))
                    .await
                    .map_err(|_| anyhow!("PostgreSQL connection timed out"))??;
                tokio::spawn(connection);
                timeout(opts.timeout, client.simple_query("SELECT 1"))
                    .await
                    .map_err(|_| anyhow!("PostgreSQL query timed out"))??;
            }
        }

        Ok(())
    }
}

pub fn register(registry: &Registry) {
    registry.register("psql", || Box::new(PsqlProbe));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn username_is_required() {
        let test = Test {
            target: "db.example.com".to_string(),
            kind: "psql".to_string(),
            input: String::new(),
            arguments: BTreeMap::new(),
            max_retries: None,
        };
        let err = PsqlProbe
            .run(&test, IpAddr::V4(Ipv4Addr::LOCALHOST), &Options::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no username"));
    }

    #[test]
    fn sslmode_schema_accepts_known_modes() {
        let schema = PsqlProbe.schema();
        let pattern = regex::Regex::new(schema["sslmode"]).unwrap();
        for mode in ["disable", "require", "verify-ca", "verify-full"] {
            assert!(pattern.is_match(mode));
        }
        assert!(!pattern.is_match("prefer"));
    }
}
