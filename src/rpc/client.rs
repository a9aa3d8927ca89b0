//! One-shot controller RPC client
//!
//! Each call opens a fresh TCP connection with a connect timeout, exchanges
//! a single frame pair under a request timeout and closes the connection.
//! Clients are cheap value objects; the connection cache hands out clones.

use super::{
    read_frame, write_frame, ConfigurationUpdateReply, ConfigurationUpdateRequest, HelloReply,
    HelloRequest, JoinNodeReply, JoinNodeRequest, RequestFrame, ResponseFrame,
};
use crate::config::RpcTlsConfig;
use crate::error::{ClusterError, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Default connect/request timeout for controller RPC
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(2);

/// A client for one peer's controller RPC endpoint
#[derive(Debug, Clone)]
pub struct ControllerClient {
    addr: SocketAddr,
    timeout: Duration,
    tls: RpcTlsConfig,
}

impl ControllerClient {
    /// Create a client for the given endpoint with the default timeout
    pub fn new(addr: SocketAddr, tls: RpcTlsConfig) -> Self {
        Self {
            addr,
            timeout: DEFAULT_RPC_TIMEOUT,
            tls,
        }
    }

    /// Override the connect/request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Target address of this client
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// TLS settings this client was built with
    pub fn tls(&self) -> &RpcTlsConfig {
        &self.tls
    }

    /// Send a join request
    pub async fn join_node(&self, req: JoinNodeRequest) -> Result<JoinNodeReply> {
        match self.send(RequestFrame::JoinNode(req)).await? {
            ResponseFrame::JoinNode(reply) => reply.map_err(ClusterError::Code),
            other => Err(unexpected(&other)),
        }
    }

    /// Send a configuration update request
    pub async fn update_node_configuration(
        &self,
        req: ConfigurationUpdateRequest,
    ) -> Result<ConfigurationUpdateReply> {
        match self.send(RequestFrame::UpdateNodeConfiguration(req)).await? {
            ResponseFrame::UpdateNodeConfiguration(reply) => reply.map_err(ClusterError::Code),
            other => Err(unexpected(&other)),
        }
    }

    /// Send a hello greeting
    pub async fn hello(&self, req: HelloRequest) -> Result<HelloReply> {
        match self.send(RequestFrame::Hello(req)).await? {
            ResponseFrame::Hello(reply) => Ok(reply),
            other => Err(unexpected(&other)),
        }
    }

    async fn send(&self, frame: RequestFrame) -> Result<ResponseFrame> {
        debug!(addr = %self.addr, "opening one-shot controller connection");
        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| ClusterError::Rpc(format!("connect to {} timed out", self.addr)))?
            .map_err(|e| ClusterError::Rpc(format!("connect to {} failed: {}", self.addr, e)))?;

        tokio::time::timeout(self.timeout, async {
            write_frame(&mut stream, &frame).await?;
            read_frame(&mut stream).await
        })
        .await
        .map_err(|_| ClusterError::Rpc(format!("request to {} timed out", self.addr)))?
    }
}

fn unexpected(frame: &ResponseFrame) -> ClusterError {
    ClusterError::Protocol(format!("unexpected response frame: {:?}", frame))
}
