//! IMAP and IMAPS service testers.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufStream};

use overseer_core::{base_schema, Options, Probe, Registry, Schema, Test};

use crate::util;

pub struct ImapProbe {
    tls: bool,
}

#[async_trait]
impl Probe for ImapProbe {
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
IMAPS Tester
------------
 The IMAPS tester connects to a remote host over TLS and ensures that
 this succeeds. If you supply a username & password a login will be
 made, and the test will fail if this login fails.

 Because IMAPS uses TLS the validity of the certificate is part of the
 test; to disable that add 'with tls insecure'.

 This test is invoked via input like so:

    mail.example.com must run imaps [with username 'steve' with password 'secret']
"
        } else {
            r"
IMAP Tester
-----------
 The IMAP tester connects to a remote host and ensures that this
 succeeds. If you supply a username & password a login will be made,
 and the test will fail if this login fails.

 This test is invoked via input like so:

    mail.example.com must run imap [with username 'steve' with password 'secret']
"
        }
    }

    async fn run(&self, test: &Test, ip: IpAddr, opts: &Options) -> Result<()> {
        let default_port = if self.tls { 993 } else { 143 };
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
    if !greeting.starts_with("* OK") {
        bail!("greeting doesn't look like an IMAP server: '{}'", greeting.trim());
    }

    let username = test.arguments.get("username").filter(|v| !v.is_empty());
    let password = test.arguments.get("password").filter(|v| !v.is_empty());
    let (username, password) = match (username, password) {
        (Some(u), Some(p)) => (u, p),
        _ => return Ok(()),
    };

    stream
        .write_all(format!("a1 LOGIN \"{}\" \"{}\"\r\n", username, password).as_bytes())
        .await?;
    stream.flush().await?;

    // Skip untagged responses until the tagged completion arrives.
    loop {
        let line = util::read_line(&mut stream, deadline).await?;
        if let Some(status) = line.strip_prefix("a1 ") {
            if status.starts_with("OK") {
                return Ok(());
            }
            bail!("login failed: '{}'", line.trim());
        }
    }
}

pub fn register(registry: &Registry) {
    registry.register("imap", || Box::new(ImapProbe { tls: false }));
    registry.register("imaps", || Box::new(ImapProbe { tls: true }));
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
            kind: "imap".to_string(),
            input: String::new(),
            arguments,
            max_retries: None,
        }
    }

    #[tokio::test]
    async fn greeting_and_login() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut stream = BufStream::new(sock);
            stream
                .write_all(b"* OK IMAP4rev1 ready\r\n")
                .await
                .unwrap();
            stream.flush().await.unwrap();
            let mut line = String::new();
            stream.read_line(&mut line).await.unwrap();
            assert!(line.starts_with("a1 LOGIN"));
            stream
                .write_all(b"* CAPABILITY IMAP4rev1\r\na1 OK LOGIN completed\r\n")
                .await
                .unwrap();
            stream.flush().await.unwrap();
        });

        let probe = ImapProbe { tls: false };
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
    async fn rejected_login_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut stream = BufStream::new(sock);
            stream.write_all(b"* OK ready\r\n").await.unwrap();
            stream.flush().await.unwrap();
            let mut line = String::new();
            stream.read_line(&mut line).await.unwrap();
            stream
                .write_all(b"a1 NO [AUTHENTICATIONFAILED] invalid credentials\r\n")
                .await
                .unwrap();
            stream.flush().await.unwrap();
        });

        let probe = ImapProbe { tls: false };
        let test = test_with(&[
            ("port", &port.to_string()),
            ("username", "steve"),
            ("password", "wrong"),
        ]);
        let err = probe
            .run(&test, IpAddr::V4(Ipv4Addr::LOCALHOST), &Options::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("login failed"));
    }
}
