//! A minimal RESP client connection.
//!
//! Speaks just enough of the Redis wire protocol for the queue and the
//! redis probe: inline commands out, the five reply types back.

use std::future::Future;
use std::pin::Pin;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// One server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<String>),
    Array(Option<Vec<Reply>>),
}

/// A connected RESP peer.
pub struct RespConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl RespConnection {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connecting to {}", addr))?;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read),
            writer: write,
        })
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    /// Send one command and read its reply.
    pub async fn command(&mut self, args: &[&str]) -> Result<Reply> {
        self.writer.write_all(&encode_command(args)).await?;
        self.writer.flush().await?;
        read_reply(&mut self.reader).await
    }
}

/// Encode a command as a RESP array of bulk strings.
pub fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

async fn read_crlf_line<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        bail!("connection closed while awaiting reply");
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Read one reply. Arrays recurse, so the future is boxed.
pub fn read_reply<'a, R>(reader: &'a mut R) -> Pin<Box<dyn Future<Output = Result<Reply>> + Send + 'a>>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        let line = read_crlf_line(reader).await?;
        let mut chars = line.chars();
        let tag = chars.next().context("empty reply line")?;
        let rest: String = chars.collect();

        match tag {
            '+' => Ok(Reply::Simple(rest)),
            '-' => Ok(Reply::Error(rest)),
            ':' => Ok(Reply::Integer(rest.parse().context("bad integer reply")?)),
            '$' => {
                let len: i64 = rest.parse().context("bad bulk length")?;
                if len < 0 {
                    return Ok(Reply::Bulk(None));
                }
                let mut buf = vec![0u8; len as usize + 2];
                reader.read_exact(&mut buf).await?;
                buf.truncate(len as usize);
                Ok(Reply::Bulk(Some(String::from_utf8_lossy(&buf).into_owned())))
            }
            '*' => {
                let len: i64 = rest.parse().context("bad array length")?;
                if len < 0 {
                    return Ok(Reply::Array(None));
                }
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(read_reply(reader).await?);
                }
                Ok(Reply::Array(Some(items)))
            }
            other => bail!("unexpected reply tag '{}'", other),
        }
    })
}
