//! Framed transport to one simulator process
//!
//! One authenticated TCP connection per simulator instance, carrying
//! length/id/type framed packets with strictly ordered request/response
//! semantics. There is no pipelining for single commands and no retry
//! policy here - both belong to the layers above. The multi-command
//! primitive (`send_batch`) pipelines the writes of one batch and reads
//! the replies back in submission order, so a whole batch costs one
//! network round trip while the per-connection ordering guarantee holds.

use crate::error::ProtocolError;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Packet type: authentication request.
const PACKET_AUTH: i32 = 3;
/// Packet type: command execution request.
const PACKET_EXEC: i32 = 2;
/// Packet type: command response.
const PACKET_RESPONSE: i32 = 0;

/// Largest command body we will put on the wire.
const MAX_BODY: usize = 4096 - 10;

/// One command of a batch round trip.
#[derive(Debug, Clone)]
pub struct BatchCommand {
    /// Caller-chosen identifier, unique within the batch.
    pub id: String,
    /// Full command text as it goes on the wire.
    pub body: String,
}

/// One raw reply from a batch round trip.
#[derive(Debug, Clone)]
pub struct RawReply {
    /// Identifier of the command this reply answers.
    pub id: String,
    /// Raw reply body, undecoded.
    pub body: String,
    /// Time from batch submission until this reply was read. Replies are
    /// read in submission order, so these are monotonically non-decreasing.
    pub elapsed: Duration,
}

/// An ordered request/response channel to one simulator process.
///
/// Implementations serialize all traffic; concurrent use of one transport
/// from two logical callers is a caller bug, which the `&mut self`
/// receivers make unrepresentable.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Send one command and block for its text reply.
    async fn send(&mut self, command: &str) -> Result<String, ProtocolError>;

    /// Send a batch of commands as one round trip and return the raw
    /// replies in submission order.
    async fn send_batch(
        &mut self,
        commands: &[BatchCommand],
    ) -> Result<Vec<RawReply>, ProtocolError>;

    /// Tear down and re-establish the underlying channel. Used by the
    /// world-handle boundary when recovering from connection loss.
    async fn reconnect(&mut self) -> Result<(), ProtocolError>;

    /// Close the channel. Idempotent and safe from cleanup paths.
    async fn close(&mut self) -> Result<(), ProtocolError>;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;
}

/// TCP implementation of the simulator control protocol.
///
/// Frame layout, all integers little-endian: `size` (length of the rest),
/// `id`, `type`, body bytes, two NUL terminators. Authentication is a
/// single `PACKET_AUTH` exchange at connect time; the server echoes our id
/// on success and answers `-1` on bad credentials.
pub struct RconTransport {
    host: String,
    port: u16,
    password: String,
    stream: Option<TcpStream>,
    next_id: i32,
}

impl RconTransport {
    /// Connect and authenticate against one simulator control endpoint.
    pub async fn connect(
        host: impl Into<String>,
        port: u16,
        password: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let mut transport = Self {
            host: host.into(),
            port,
            password: password.into(),
            stream: None,
            next_id: 0,
        };
        transport.establish().await?;
        Ok(transport)
    }

    async fn establish(&mut self) -> Result<(), ProtocolError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        self.next_id = 0;

        let auth_id = self.take_id();
        let password = self.password.clone();
        self.write_packet(auth_id, PACKET_AUTH, &password).await?;
        // Some servers send an empty response packet ahead of the auth
        // acknowledgement; skip it.
        let (mut id, mut kind, _) = self.read_packet().await?;
        if kind == PACKET_RESPONSE && id == auth_id {
            let next = self.read_packet().await?;
            id = next.0;
            kind = next.1;
        }
        if id == -1 {
            self.stream = None;
            return Err(ProtocolError::AuthFailed);
        }
        if id != auth_id {
            self.stream = None;
            return Err(ProtocolError::ReplyIdMismatch {
                expected: auth_id,
                got: id,
            });
        }
        let _ = kind;
        tracing::debug!(host = %self.host, port = self.port, "transport authenticated");
        Ok(())
    }

    fn take_id(&mut self) -> i32 {
        self.next_id = self.next_id.wrapping_add(1) & 0x3fff_ffff;
        self.next_id
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream, ProtocolError> {
        self.stream.as_mut().ok_or(ProtocolError::NotConnected)
    }

    async fn write_packet(
        &mut self,
        id: i32,
        kind: i32,
        body: &str,
    ) -> Result<(), ProtocolError> {
        if body.len() > MAX_BODY {
            return Err(ProtocolError::BodyTooLarge {
                size: body.len(),
                max: MAX_BODY,
            });
        }
        let size = (body.len() + 10) as i32;
        let mut frame = Vec::with_capacity(body.len() + 14);
        frame.extend_from_slice(&size.to_le_bytes());
        frame.extend_from_slice(&id.to_le_bytes());
        frame.extend_from_slice(&kind.to_le_bytes());
        frame.extend_from_slice(body.as_bytes());
        frame.extend_from_slice(&[0, 0]);
        let stream = self.stream_mut()?;
        stream.write_all(&frame).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ProtocolError> {
        self.stream_mut()?.flush().await?;
        Ok(())
    }

    async fn read_packet(&mut self) -> Result<(i32, i32, String), ProtocolError> {
        let stream = self.stream_mut()?;
        let mut header = [0u8; 4];
        if let Err(e) = stream.read_exact(&mut header).await {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Err(ProtocolError::ConnectionClosed);
            }
            return Err(ProtocolError::Io(e));
        }
        let size = i32::from_le_bytes(header);
        if !(10..=1_048_576).contains(&size) {
            return Err(ProtocolError::MalformedFrame(format!(
                "frame size {size} out of range"
            )));
        }
        let mut rest = vec![0u8; size as usize];
        stream.read_exact(&mut rest).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtocolError::ConnectionClosed
            } else {
                ProtocolError::Io(e)
            }
        })?;
        let id = i32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
        let kind = i32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]);
        let body_bytes = &rest[8..rest.len() - 2];
        if rest[rest.len() - 2] != 0 || rest[rest.len() - 1] != 0 {
            return Err(ProtocolError::MalformedFrame(
                "missing frame terminators".to_string(),
            ));
        }
        let body = String::from_utf8_lossy(body_bytes).into_owned();
        Ok((id, kind, body))
    }
}

#[async_trait::async_trait]
impl Transport for RconTransport {
    async fn send(&mut self, command: &str) -> Result<String, ProtocolError> {
        let id = self.take_id();
        self.write_packet(id, PACKET_EXEC, command).await?;
        self.flush().await?;
        let (reply_id, _kind, body) = self.read_packet().await?;
        if reply_id != id {
            return Err(ProtocolError::ReplyIdMismatch {
                expected: id,
                got: reply_id,
            });
        }
        Ok(body)
    }

    async fn send_batch(
        &mut self,
        commands: &[BatchCommand],
    ) -> Result<Vec<RawReply>, ProtocolError> {
        let mut wire_ids = Vec::with_capacity(commands.len());
        for command in commands {
            let id = self.take_id();
            self.write_packet(id, PACKET_EXEC, &command.body).await?;
            wire_ids.push(id);
        }
        self.flush().await?;

        let started = Instant::now();
        let mut replies = Vec::with_capacity(commands.len());
        for (command, wire_id) in commands.iter().zip(wire_ids) {
            let (reply_id, _kind, body) = self.read_packet().await?;
            if reply_id != wire_id {
                return Err(ProtocolError::ReplyIdMismatch {
                    expected: wire_id,
                    got: reply_id,
                });
            }
            replies.push(RawReply {
                id: command.id.clone(),
                body,
                elapsed: started.elapsed(),
            });
        }
        Ok(replies)
    }

    async fn reconnect(&mut self) -> Result<(), ProtocolError> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.establish().await
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl std::fmt::Debug for RconTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RconTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("open", &self.is_open())
            .finish()
    }
}
