//! Peer transport for raft messages over HTTP.
//!
//! Outbound messages are queued per peer and posted in batches to
//! `POST /raft/messages`; the body is a bincode `Vec<Vec<u8>>` of
//! protobuf-encoded `eraftpb::Message`s. Queues are bounded and drop on
//! overflow, raft retransmits whatever is lost.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use bytes::Bytes;
use protobuf::Message as ProtobufMessage;
use raft::eraftpb::Message;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use super::node::{RaftHandle, Transport};
use crate::common::{Error, Result};

pub const RAFT_MESSAGES_PATH: &str = "/raft/messages";

const PEER_QUEUE_CAPACITY: usize = 1024;
const MAX_BATCH: usize = 256;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

pub fn encode_batch(messages: &[Message]) -> Result<Vec<u8>> {
    let frames = messages
        .iter()
        .map(|m| m.write_to_bytes())
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(bincode::serialize(&frames)?)
}

pub fn decode_batch(body: &[u8]) -> Result<Vec<Message>> {
    let frames: Vec<Vec<u8>> = bincode::deserialize(body)?;
    frames
        .iter()
        .map(|frame| Message::parse_from_bytes(frame).map_err(Error::from))
        .collect()
}

/// Sends raft messages to peers through one queue and task per peer
pub struct HttpTransport {
    queues: HashMap<u64, mpsc::Sender<Message>>,
}

impl HttpTransport {
    /// Spawn a sender task for every member except `self_id`.
    ///
    /// Tasks exit once the transport is dropped.
    pub fn new(self_id: u64, members: &HashMap<u64, String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        let mut queues = HashMap::new();
        for (&id, addr) in members {
            if id == self_id {
                continue;
            }
            let (tx, rx) = mpsc::channel(PEER_QUEUE_CAPACITY);
            tokio::spawn(peer_sender(addr.clone(), rx, client.clone()));
            queues.insert(id, tx);
        }
        Ok(Self { queues })
    }
}

impl Transport for HttpTransport {
    fn send(&self, messages: Vec<Message>) {
        for message in messages {
            match self.queues.get(&message.to) {
                Some(queue) => {
                    if queue.try_send(message).is_err() {
                        tracing::debug!("Peer queue full, dropping raft message");
                    }
                }
                None => tracing::debug!("No route to raft node {:016x}", message.to),
            }
        }
    }
}

async fn peer_sender(addr: String, mut rx: mpsc::Receiver<Message>, client: reqwest::Client) {
    let url = format!("http://{}{}", addr, RAFT_MESSAGES_PATH);
    let mut reachable = true;

    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while batch.len() < MAX_BATCH {
            match rx.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }

        let body = match encode_batch(&batch) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("Failed to encode raft batch for {}: {}", addr, e);
                continue;
            }
        };

        match client.post(&url).body(body).send().await {
            Ok(resp) if resp.status().is_success() => {
                if !reachable {
                    tracing::info!("Raft peer {} is reachable again", addr);
                    reachable = true;
                }
            }
            Ok(resp) => {
                tracing::warn!("Raft peer {} rejected batch: {}", addr, resp.status());
            }
            Err(e) => {
                // Log once per outage, peers are expected to come and go
                if reachable {
                    tracing::warn!("Raft peer {} unreachable: {}", addr, e);
                    reachable = false;
                }
            }
        }
    }
}

/// Router accepting raft messages for the local node
pub fn router(handle: RaftHandle) -> Router {
    Router::new()
        .route(RAFT_MESSAGES_PATH, post(receive_messages))
        .with_state(handle)
}

async fn receive_messages(State(handle): State<RaftHandle>, body: Bytes) -> StatusCode {
    match decode_batch(&body) {
        Ok(messages) => {
            for message in messages {
                handle.step(message);
            }
            StatusCode::NO_CONTENT
        }
        Err(e) => {
            tracing::warn!("Rejected malformed raft batch: {}", e);
            StatusCode::BAD_REQUEST
        }
    }
}

/// Serve the raft router on `listener` until shutdown is signaled
pub async fn serve(listener: TcpListener, handle: RaftHandle, mut shutdown: watch::Receiver<bool>) {
    let app = router(handle);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    });
    if let Err(e) = server.await {
        tracing::error!("Raft transport listener failed: {}", e);
    }
}
