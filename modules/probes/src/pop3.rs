//! POP3 and POP3S service testers.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufStream};

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

use crate::util;

pub struct Pop3Probe {
    tls: bool,
}

#[async_trait]
impl Probe for Pop3Probe {
    fn schema(&self) -> Schema {
        let mut known = base_schema();
        known.insert("port", "^[0-9]+$");
        known.insert("username", ".*");
        known.insert("password", ".*");
        known.insert("tls", "insecure");
        known
    }

    fn example(&self) -> &'static str {
        if self.tls {
            r"
POP3S Tester
------------
 The POP3S tester connects to a remote host over TLS and ensures that
 this succeeds. If you supply a username & password a login will be
 made, and the test will fail if this login fails.

 Because POP3S uses TLS the validity of the certificate is part of the
 test; to disable that add 'with tls insecure'.

 This test is invoked via input like so:

    mail.example.com must run pop3s [with username 'steve' with password 'secret']
"
        } else {
            r"
POP3 Tester
-----------
 The POP3 tester connects to a remote host and ensures that this
 succeeds. If you supply a username & password a login will be made,
 and the test will fail if this login fails.

 This test is invoked via input like so:

    mail.example.com must run pop3 [with username 'steve' with password 'secret']
"
        }
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        let default_port = if self.tls { 995 } else { 110 };
        let port = util::port_arg(test, default_port)?;
        let stream = util::connect(ip, port, opts.timeout).await?;

        if self.tls {
            let host = util::target_host(test);
            let tls = util::tls_connect(stream, &host, util::tls_insecure(test), opts.timeout).await?;
            session(test, BufStream::new(tls), opts.timeout).await
        } else {
            session(test, BufStream::new(stream), opts.timeout).await
        }
    }
}

async fn session<S>(test: &Test, mut stream: BufStream<S>, deadline: Duration) -> Result<()>
where
    BufStream<S>: AsyncBufRead + AsyncWrite + Unpin + Send,
{
    let greeting = util::read_line(&mut stream, deadline).await?;
    if !greeting.starts_with("+OK") {
        bail!("greeting doesn't look like a POP3 server: '{}'", greeting.trim());
    }

    let username = test.arguments.get("username").filter(|v| !v.is_empty());
    let password = test.arguments.get("password").filter(|v| !v.is_empty());
    let (username, password) = match (username, password) {
        (Some(u), Some(p)) => (u, p),
        _ => return Ok(()),
    };

    let reply = command(&mut stream, &format!("USER {}", username), deadline).await?;
    if !reply.starts_with("+OK") {
        bail!("USER was rejected: '{}'", reply.trim());
    }

    let reply = command(&mut stream, &format!("PASS {}", password), deadline).await?;
    if !reply.starts_with("+OK") {
        bail!("login failed: '{}'", reply.trim());
    }

    Ok(())
}

async fn command<S>(stream: &mut S, line: &str, deadline: Duration) -> Result<String>
where
    S: AsyncBufRead + AsyncWrite + Unpin + Send,
{
    stream.write_all(format!("{}\r\n", line).as_bytes()).await?;
    stream.flush().await?;
    util::read_line(stream, deadline).await
}

pub fn register(registry: &Registry) {
    registry.register("pop3", || Box::new(Pop3Probe { tls: false }));
    registry.register("pop3s", || Box::new(Pop3Probe { tls: true }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};

    fn test_with(args: &[(&str, &str)]) -> Test {
        let mut arguments = BTreeMap::new();
        for (k, v) in args {
            arguments.insert(k.to_string(), v.to_string());
        }
        Test {
            target: "mail.example.com".to_string(),
            kind: "pop3".to_string(),
            input: String::new(),
            arguments,
            max_retries: None,
        }
    }

    #[tokio::test]
    async fn user_pass_login() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut stream = BufStream::new(sock);
            stream.write_all(b"+OK POP3 ready\r\n").await.unwrap();
            stream.flush().await.unwrap();
            for _ in 0..2 {
                let mut line = String::new();
                stream.read_line(&mut line).await.unwrap();
                stream.write_all(b"+OK\r\n").await.unwrap();
                stream.flush().await.unwrap();
            }
        });

        let probe = Pop3Probe { tls: false };
        let test = test_with(&[
            ("port", &port.to_string()),
            ("username", "steve"),
            ("password", "secret"),
        ]);
        probe
            .run(&test, IpAddr::V4(Ipv4Addr::LOCALHOST), &Options::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bad_greeting_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut stream = BufStream::new(sock);
            stream.write_all(b"-ERR go away\r\n").await.unwrap();
            stream.flush().await.unwrap();
        });

        let probe = Pop3Probe { tls: false };
        let test = test_with(&[("port", &port.to_string())]);
        let err = probe
            .run(&test, IpAddr::V4(Ipv4Addr::LOCALHOST), &Options::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("doesn't look like a POP3 server"));
    }
}
