// https://redis.io/docs/reference/protocol-spec

use std::io;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::core::command::Command;
use crate::core::conn::ConnectionError;

static CRLF: &[u8; 2] = b"\r\n";

/// One RESP2 reply value. The client returns these raw; decoding into typed
/// results is left to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<RespValue>),
}

/// Serialize a command as a RESP array of bulk strings.
pub fn encode_command(command: &Command, buf: &mut Vec<u8>) {
    buf.push(b'*');
    buf.extend_from_slice((1 + command.args().len()).to_string().as_bytes());
    buf.extend_from_slice(CRLF);

    encode_bulk(command.name().as_bytes(), buf);
    for arg in command.args() {
        encode_bulk(arg, buf);
    }
}

fn encode_bulk(data: &[u8], buf: &mut Vec<u8>) {
    buf.push(b'$');
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(CRLF);
    buf.extend_from_slice(data);
    buf.extend_from_slice(CRLF);
}

/// Read one reply value from the stream.
///
/// Socket failures (including EOF mid-reply) surface as transport errors;
/// malformed framing surfaces as protocol errors.
pub fn read_value<'a, R>(reader: &'a mut R) -> BoxFuture<'a, Result<RespValue, ConnectionError>>
where
    R: AsyncBufRead + Unpin + Send,
{
    async move {
        let line = read_line(reader).await?;
        let (kind, rest) = line
            .split_first()
            .ok_or_else(|| ConnectionError::Protocol("empty reply line".to_string()))?;

        match kind {
            b'+' => Ok(RespValue::Simple(into_text(rest)?)),
            b'-' => Ok(RespValue::Error(into_text(rest)?)),
            b':' => Ok(RespValue::Integer(parse_integer(rest)?)),
            // $<length>\r\n<data>\r\n
            b'$' => {
                let length = parse_integer(rest)?;
                if length < 0 {
                    return Ok(RespValue::Null);
                }

                let mut data = vec![0u8; length as usize];
                reader.read_exact(&mut data).await?;
                let mut crlf = [0u8; 2];
                reader.read_exact(&mut crlf).await?;
                if crlf != *CRLF {
                    return Err(ConnectionError::Protocol("bulk string missing CRLF".to_string()));
                }

                Ok(RespValue::Bulk(Bytes::from(data)))
            }
            // *<number-of-elements>\r\n<element-1>...<element-n>
            b'*' => {
                let length = parse_integer(rest)?;
                if length < 0 {
                    return Ok(RespValue::Null);
                }

                let mut values = Vec::with_capacity(length as usize);
                for _ in 0..length {
                    values.push(read_value(reader).await?);
                }

                Ok(RespValue::Array(values))
            }
            other => Err(ConnectionError::Protocol(format!(
                "invalid reply type byte: 0x{:02x}",
                other
            ))),
        }
    }
    .boxed()
}

async fn read_line<R>(reader: &mut R) -> Result<Vec<u8>, ConnectionError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let read = reader.read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Err(ConnectionError::Transport(io::Error::from(
            io::ErrorKind::UnexpectedEof,
        )));
    }
    if line.len() < 2 || line[line.len() - 2] != b'\r' {
        return Err(ConnectionError::Protocol("reply line missing CRLF".to_string()));
    }

    line.truncate(line.len() - 2);
    Ok(line)
}

fn into_text(data: &[u8]) -> Result<String, ConnectionError> {
    String::from_utf8(data.to_vec())
        .map_err(|_| ConnectionError::Protocol("reply is not valid UTF-8".to_string()))
}

fn parse_integer(data: &[u8]) -> Result<i64, ConnectionError> {
    into_text(data)?
        .parse::<i64>()
        .map_err(|_| ConnectionError::Protocol("reply integer is malformed".to_string()))
}
