//! RESP wire codec
//!
//! Minimal client-side implementation of the Redis serialization
//! protocol: command encoding (always as arrays of bulk strings) and
//! reply parsing for the five RESP2 reply kinds the service uses.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use super::StoreError;

/// One parsed server reply
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `+OK`-style status line
    Simple(String),
    /// `-ERR ...` error line
    Error(String),
    /// `:`-prefixed signed integer
    Integer(i64),
    /// `$`-prefixed bulk string; `None` is the null bulk (`$-1`)
    Bulk(Option<Vec<u8>>),
    /// `*`-prefixed array; `None` is the null array (`*-1`)
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Unwrap an integer reply
    pub fn into_integer(self) -> Result<i64, StoreError> {
        match self {
            Reply::Integer(n) => Ok(n),
            Reply::Error(e) => Err(StoreError::Command(e)),
            other => Err(StoreError::Protocol(format!(
                "expected integer, got {:?}",
                other
            ))),
        }
    }

    /// Unwrap a bulk reply as UTF-8 text; null bulk becomes `None`
    pub fn into_text(self) -> Result<Option<String>, StoreError> {
        match self {
            Reply::Bulk(Some(bytes)) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StoreError::Protocol(format!("non-UTF-8 bulk reply: {}", e))),
            Reply::Bulk(None) => Ok(None),
            Reply::Error(e) => Err(StoreError::Command(e)),
            other => Err(StoreError::Protocol(format!(
                "expected bulk string, got {:?}",
                other
            ))),
        }
    }

    /// Unwrap an array reply; the null array reads as empty
    pub fn into_array(self) -> Result<Vec<Reply>, StoreError> {
        match self {
            Reply::Array(Some(items)) => Ok(items),
            Reply::Array(None) => Ok(Vec::new()),
            Reply::Error(e) => Err(StoreError::Command(e)),
            other => Err(StoreError::Protocol(format!(
                "expected array, got {:?}",
                other
            ))),
        }
    }

    /// Accept `+OK` (or any status), reject errors
    pub fn expect_ok(self) -> Result<(), StoreError> {
        match self {
            Reply::Simple(_) => Ok(()),
            Reply::Error(e) => Err(StoreError::Command(e)),
            other => Err(StoreError::Protocol(format!(
                "expected status, got {:?}",
                other
            ))),
        }
    }
}

/// Encode a command as a RESP array of bulk strings
#[must_use]
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

/// Read one CRLF-terminated line, without the terminator
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, StoreError> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(StoreError::Connection(
            "store closed the connection".to_string(),
        ));
    }
    if !line.ends_with("\r\n") {
        return Err(StoreError::Protocol(format!(
            "reply line missing CRLF: {:?}",
            line
        )));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

fn parse_length(line: &str) -> Result<i64, StoreError> {
    line.parse::<i64>()
        .map_err(|_| StoreError::Protocol(format!("bad length prefix: {:?}", line)))
}

/// Read and parse one reply
///
/// Recurses one level per nested array; the commands this client issues
/// only ever see flat arrays.
pub async fn read_reply<R: AsyncBufRead + Unpin + Send>(
    reader: &mut R,
) -> Result<Reply, StoreError> {
    let line = read_line(reader).await?;
    let Some(kind) = line.chars().next() else {
        return Err(StoreError::Protocol("empty reply line".to_string()));
    };
    let rest = &line[1..];

    match kind {
        '+' => Ok(Reply::Simple(rest.to_string())),
        '-' => Ok(Reply::Error(rest.to_string())),
        ':' => Ok(Reply::Integer(parse_length(rest)?)),
        '$' => {
            let len = parse_length(rest)?;
            if len < 0 {
                return Ok(Reply::Bulk(None));
            }
            let mut payload = vec![0u8; len as usize + 2];
            reader.read_exact(&mut payload).await?;
            if &payload[len as usize..] != b"\r\n" {
                return Err(StoreError::Protocol(
                    "bulk payload missing CRLF terminator".to_string(),
                ));
            }
            payload.truncate(len as usize);
            Ok(Reply::Bulk(Some(payload)))
        }
        '*' => {
            let len = parse_length(rest)?;
            if len < 0 {
                return Ok(Reply::Array(None));
            }
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(Box::pin(read_reply(reader)).await?);
            }
            Ok(Reply::Array(Some(items)))
        }
        other => Err(StoreError::Protocol(format!(
            "unknown reply type byte: {:?}",
            other
        ))),
    }
}

/// Interpret an HGETALL reply as field/value pairs
pub fn reply_to_field_pairs(reply: Reply) -> Result<Vec<(String, String)>, StoreError> {
    let items = reply.into_array()?;
    if items.len() % 2 != 0 {
        return Err(StoreError::Protocol(
            "field map reply has odd element count".to_string(),
        ));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        let field = field
            .into_text()?
            .ok_or_else(|| StoreError::Protocol("null field name in field map".to_string()))?;
        let value = value
            .into_text()?
            .ok_or_else(|| StoreError::Protocol("null value in field map".to_string()))?;
        pairs.push((field, value));
    }
    Ok(pairs)
}
