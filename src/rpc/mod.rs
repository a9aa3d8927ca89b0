//! Controller RPC surface
//!
//! Inter-node membership traffic (join handshakes, configuration-update
//! forwards, hello pings) travels over TCP with length-prefixed JSON
//! frames. Each request opens a fresh connection, sends one frame and reads
//! one frame back.

pub mod client;
pub mod server;

use crate::error::{ClusterError, ErrorCode, Result};
use crate::types::{Broker, NodeId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub use client::ControllerClient;
pub use server::ControllerRpcServer;

/// Upper bound on a single frame; protects against corrupt length prefixes
const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Request to join the cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinNodeRequest {
    /// Logical version of the joining node's build
    pub logical_version: u32,

    /// Raw node UUID bytes; empty on legacy nodes
    pub node_uuid: Vec<u8>,

    /// The joining node's advertised broker record
    pub node: Broker,
}

/// Reply to a join request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinNodeReply {
    /// Whether the node may join (or was assigned an id)
    pub success: bool,

    /// Assigned or confirmed node id; unassigned sentinel on failure
    pub id: NodeId,
}

/// Request to update a member's advertised configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigurationUpdateRequest {
    /// The updated broker record
    pub node: Broker,

    /// The node this request is addressed to
    pub target_node: NodeId,
}

/// Reply to a configuration update request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigurationUpdateReply {
    /// Whether the update was accepted
    pub success: bool,
}

/// Best-effort greeting sent to peers on startup
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloRequest {
    /// Sender's node id
    pub peer: NodeId,

    /// Sender's process start time, milliseconds since the unix epoch
    pub start_time_ms: i64,
}

/// Reply to a hello request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloReply {
    /// Outcome code
    pub error: ErrorCode,
}

/// Frames a client can send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestFrame {
    JoinNode(JoinNodeRequest),
    UpdateNodeConfiguration(ConfigurationUpdateRequest),
    Hello(HelloRequest),
}

/// Frames a server can send back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseFrame {
    JoinNode(std::result::Result<JoinNodeReply, ErrorCode>),
    UpdateNodeConfiguration(std::result::Result<ConfigurationUpdateReply, ErrorCode>),
    Hello(HelloReply),
}

/// Write one length-prefixed JSON frame
pub(crate) async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = serde_json::to_vec(frame)?;
    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed JSON frame
pub(crate) async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ClusterError::Protocol(format!(
            "frame length {} exceeds limit",
            len
        )));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}
