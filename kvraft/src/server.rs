//! A thin RPC façade over the request coordinator (§1: the wire transport itself is out of
//! scope — this module defines the request/reply shapes of §6 and a trivial length-prefixed
//! JSON-over-TCP listener good enough for the demo binary and manual testing; a real deployment
//! would swap this for a proper RPC framework without touching [`crate::coordinator`]).

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::debug;
use tracing::warn;

use crate::command::OpType;
use crate::consensus::ConsensusModule;
use crate::coordinator::RequestCoordinator;
use crate::error::ErrCode;

#[derive(Serialize, Deserialize)]
pub struct OpenSessionRequest {
    pub password: String,
    pub op: OpType,
}

#[derive(Serialize, Deserialize)]
pub struct OpenSessionReply {
    pub session_id: String,
    pub err_code: ErrCode,
}

#[derive(Serialize, Deserialize)]
pub struct GetRequest {
    pub key: String,
    pub session_id: String,
    pub op: OpType,
}

#[derive(Serialize, Deserialize)]
pub struct GetReply {
    pub value: String,
    pub err_code: ErrCode,
}

#[derive(Serialize, Deserialize)]
pub struct UpdateRequest {
    pub key: String,
    pub value: String,
    pub op: OpType,
    pub session_id: String,
}

#[derive(Serialize, Deserialize)]
pub struct UpdateReply {
    pub err_code: ErrCode,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", content = "body")]
enum Request {
    OpenSession(OpenSessionRequest),
    Get(GetRequest),
    Update(UpdateRequest),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", content = "body")]
enum Reply {
    OpenSession(OpenSessionReply),
    Get(GetReply),
    Update(UpdateReply),
}

/// Serve the three RPCs on `listener`, one task per connection, one connection expected to
/// carry one request. Runs until the listener errors or the process is torn down.
pub async fn serve<C: ConsensusModule>(listener: TcpListener, coordinator: Arc<RequestCoordinator<C>>) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, &coordinator).await {
                debug!(peer = %peer, error = %e, "connection closed with an error");
            }
        });
    }
}

async fn handle_connection<C: ConsensusModule>(
    mut socket: tokio::net::TcpStream,
    coordinator: &RequestCoordinator<C>,
) -> anyhow::Result<()> {
    let len = socket.read_u32().await?;
    let mut buf = vec![0u8; len as usize];
    socket.read_exact(&mut buf).await?;
    let request: Request = serde_json::from_slice(&buf)?;

    let reply = match request {
        Request::OpenSession(req) => {
            let r = coordinator.open_session(&req.password, req.op).await;
            Reply::OpenSession(OpenSessionReply {
                session_id: r.session_id,
                err_code: r.err_code,
            })
        }
        Request::Get(req) => {
            let r = coordinator.get(&req.key, &req.session_id, req.op).await;
            Reply::Get(GetReply {
                value: r.value,
                err_code: r.err_code,
            })
        }
        Request::Update(req) => {
            let r = coordinator.update(&req.key, &req.value, req.op, &req.session_id).await;
            Reply::Update(UpdateReply { err_code: r.err_code })
        }
    };

    let bytes = serde_json::to_vec(&reply)?;
    socket.write_u32(bytes.len() as u32).await?;
    socket.write_all(&bytes).await?;
    Ok(())
}
