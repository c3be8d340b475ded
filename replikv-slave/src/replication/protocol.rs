//! Master link - connection primitives used by the run loop
//!
//! The run loop only sees the [`MasterConnector`] / [`MasterLink`] traits.
//! [`TcpMasterConnector`] is the bundled implementation: length-prefixed
//! bincode frames over TCP.
//!
//! Frame layout: `u32` big-endian payload length, then the bincode payload of
//! a [`ReplicationCommand`].

use super::config::ReplicationConfig;
use super::types::{
    MasterEvent, MasterTarget, ReplicationCommand, ReplicationError, ReplicationResult,
};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};
use uuid::Uuid;

/// Frames above this size are treated as a corrupt stream
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Opens replication links to a master
#[async_trait]
pub trait MasterConnector: Send + Sync {
    /// Connect and announce the offset replication should resume from
    async fn connect(
        &self,
        target: &MasterTarget,
        offset: u64,
    ) -> ReplicationResult<Box<dyn MasterLink>>;
}

/// An established replication stream. Dropping it disconnects.
#[async_trait]
pub trait MasterLink: Send {
    /// Next operation or heartbeat, `Ok(None)` once the master closed the stream
    async fn next_event(&mut self) -> ReplicationResult<Option<MasterEvent>>;
}

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// Write one frame
pub async fn write_frame<W>(writer: &mut W, command: &ReplicationCommand) -> ReplicationResult<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = bincode::serde::encode_to_vec(command, bincode_config())?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(ReplicationError::Protocol(format!(
            "frame of {} bytes exceeds limit",
            payload.len()
        )));
    }

    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `Ok(None)` on a clean end of stream
pub async fn read_frame<R>(reader: &mut R) -> ReplicationResult<Option<ReplicationCommand>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(ReplicationError::Protocol(format!(
            "frame length {} exceeds limit",
            len
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    let (command, _) =
        bincode::serde::decode_from_slice::<ReplicationCommand, _>(&payload, bincode_config())?;
    Ok(Some(command))
}

/// TCP connector for the bundled replication protocol
#[derive(Debug, Clone)]
pub struct TcpMasterConnector {
    replica_id: String,
    connect_timeout: Duration,
    heartbeat_timeout: Duration,
}

impl TcpMasterConnector {
    pub fn new(config: &ReplicationConfig) -> Self {
        Self {
            replica_id: Uuid::new_v4().to_string(),
            connect_timeout: config.connect_timeout(),
            heartbeat_timeout: config.heartbeat_timeout(),
        }
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }
}

#[async_trait]
impl MasterConnector for TcpMasterConnector {
    async fn connect(
        &self,
        target: &MasterTarget,
        offset: u64,
    ) -> ReplicationResult<Box<dyn MasterLink>> {
        let addr = target.to_string();
        debug!("Connecting to master at {}", addr);

        let mut stream =
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return Err(ReplicationError::ConnectionFailed(format!("{}: {}", addr, e)));
                }
                Err(_) => {
                    return Err(ReplicationError::Timeout(
                        self.connect_timeout.as_millis() as u64,
                    ));
                }
            };
        stream.set_nodelay(true)?;

        let handshake = ReplicationCommand::Handshake {
            replica_id: self.replica_id.clone(),
            offset,
        };
        write_frame(&mut stream, &handshake).await?;

        info!("Connected to master {} (resuming at offset {})", addr, offset);

        Ok(Box::new(TcpMasterLink {
            stream,
            heartbeat_timeout: self.heartbeat_timeout,
        }))
    }
}

/// Replication stream over a TCP connection
pub struct TcpMasterLink {
    stream: TcpStream,
    heartbeat_timeout: Duration,
}

#[async_trait]
impl MasterLink for TcpMasterLink {
    async fn next_event(&mut self) -> ReplicationResult<Option<MasterEvent>> {
        let heartbeat_timeout = self.heartbeat_timeout;
        let frame = tokio::time::timeout(heartbeat_timeout, read_frame(&mut self.stream))
            .await
            .map_err(|_| ReplicationError::Timeout(heartbeat_timeout.as_millis() as u64))??;

        match frame {
            None => Ok(None),
            Some(ReplicationCommand::Operation(op)) => Ok(Some(MasterEvent::Operation(op))),
            Some(ReplicationCommand::Heartbeat {
                master_offset,
                timestamp,
            }) => {
                debug!(
                    "Heartbeat received, master offset: {} (ts {})",
                    master_offset, timestamp
                );
                Ok(Some(MasterEvent::Heartbeat { master_offset }))
            }
            Some(other) => Err(ReplicationError::Protocol(format!(
                "unexpected command from master: {:?}",
                other
            ))),
        }
    }
}
