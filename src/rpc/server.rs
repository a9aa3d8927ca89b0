//! Controller RPC server
//!
//! Accept loop for the inbound membership surface: join requests,
//! configuration-update forwards and hello greetings are decoded off the
//! wire and dispatched to the members manager; its outcome goes back as a
//! single response frame.

use super::{read_frame, write_frame, RequestFrame, ResponseFrame};
use crate::error::Result;
use crate::manager::MembersManager;
use crate::shutdown::AbortWatch;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// Listener for the controller RPC endpoint
pub struct ControllerRpcServer {
    local_addr: SocketAddr,
}

impl ControllerRpcServer {
    /// Bind the listener and start serving requests against `manager`.
    ///
    /// The accept loop runs until the abort source fires.
    pub async fn start(
        addr: SocketAddr,
        manager: Arc<MembersManager>,
        abort: AbortWatch,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "starting controller rpc listener");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = abort.fired() => {
                        debug!(%local_addr, "stopping controller rpc listener");
                        break;
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "accepted controller connection");
                            let manager = manager.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, manager).await {
                                    debug!(%peer, error = %e, "controller connection closed");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept controller connection");
                        }
                    },
                }
            }
        });

        Ok(Self { local_addr })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Serve frames on one connection until the peer closes it
async fn handle_connection(mut stream: TcpStream, manager: Arc<MembersManager>) -> Result<()> {
    loop {
        let request: RequestFrame = match read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(e) => return Err(e),
        };

        let response = match request {
            RequestFrame::JoinNode(req) => {
                let reply = manager.handle_join_request(req).await;
                ResponseFrame::JoinNode(reply.map_err(|e| e.error_code()))
            }
            RequestFrame::UpdateNodeConfiguration(req) => {
                let reply = manager.handle_configuration_update_request(req).await;
                ResponseFrame::UpdateNodeConfiguration(reply.map_err(|e| e.error_code()))
            }
            RequestFrame::Hello(req) => ResponseFrame::Hello(manager.handle_hello(req).await),
        };

        write_frame(&mut stream, &response).await?;
    }
}
