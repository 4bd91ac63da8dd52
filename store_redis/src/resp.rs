//! Minimal RESP2 wire codec.
//!
//! Only the slice of the protocol this client needs: multi-bulk command
//! encoding on the request side, and the five reply types on the response
//! side. Inline/pipelined commands, RESP3 frames, and pub/sub pushes are out
//! of contract.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use blockcast_store::StoreError;

/// A single server reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// `+OK`-style simple string.
    Simple(String),
    /// `-ERR …` error line.
    Error(String),
    /// `:n` integer.
    Integer(i64),
    /// `$n` bulk string.
    Bulk(String),
    /// `$-1` null bulk string.
    Nil,
    /// `*n` array of replies.
    Array(Vec<Reply>),
}

/// Encode a command as a RESP multi-bulk frame.
pub fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

fn protocol_err(msg: impl Into<String>) -> StoreError {
    StoreError::Protocol(msg.into())
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, StoreError> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(StoreError::Unreachable("connection closed".into()));
    }
    if !line.ends_with("\r\n") {
        return Err(protocol_err("reply line missing CRLF terminator"));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

/// Read one complete reply frame.
pub async fn read_reply<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Reply, StoreError> {
    let line = read_line(reader).await?;
    let prefix = match line.chars().next() {
        Some(c) if c.is_ascii() => c,
        Some(_) => return Err(protocol_err("non-ASCII reply prefix")),
        None => return Err(protocol_err("empty reply line")),
    };
    let rest = &line[1..];
    match prefix {
        '+' => Ok(Reply::Simple(rest.to_string())),
        '-' => Ok(Reply::Error(rest.to_string())),
        ':' => rest
            .parse::<i64>()
            .map(Reply::Integer)
            .map_err(|_| protocol_err(format!("bad integer reply: {rest}"))),
        '$' => {
            let len: i64 = rest
                .parse()
                .map_err(|_| protocol_err(format!("bad bulk length: {rest}")))?;
            if len < 0 {
                return Ok(Reply::Nil);
            }
            let mut buf = vec![0u8; len as usize + 2];
            reader.read_exact(&mut buf).await?;
            if &buf[len as usize..] != b"\r\n" {
                return Err(protocol_err("bulk payload missing CRLF terminator"));
            }
            buf.truncate(len as usize);
            String::from_utf8(buf)
                .map(Reply::Bulk)
                .map_err(|_| protocol_err("bulk payload is not UTF-8"))
        }
        '*' => {
            let len: i64 = rest
                .parse()
                .map_err(|_| protocol_err(format!("bad array length: {rest}")))?;
            if len < 0 {
                return Ok(Reply::Nil);
            }
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(Box::pin(read_reply(reader)).await?);
            }
            Ok(Reply::Array(items))
        }
        other => Err(protocol_err(format!("unknown reply prefix: {other}"))),
    }
}
