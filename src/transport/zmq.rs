/**
 * Copyright (c) 2024-2025 ArcX, Inc.
 *
 * This file is part of ArcX Gateway
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

//! ZeroMQ ROUTER transport (spec §6): three-frame envelope
//! `[identity, empty, payload]`. One `ServerFrame` for the whole socket,
//! since ROUTER already demultiplexes by identity at the wire level --
//! `process_response` just needs to remember which identity a request's id
//! came in under.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use scc::HashMap as ConcurrentMap;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use zeromq::{RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::frame::{ResponseSink, ServerFrame};
use crate::jsonrpc::{self, ResponseObject};

struct ZmqSink {
    tx: mpsc::UnboundedSender<ZmqMessage>,
    /// request id -> originating ROUTER identity frame, so a response can be
    /// routed back to the socket that asked for it. Entries are removed once
    /// the matching response goes out.
    identities: Arc<ConcurrentMap<String, Bytes>>,
}

#[async_trait]
impl ResponseSink for ZmqSink {
    async fn send(&self, response: ResponseObject) {
        let id_key = response.id.to_string();
        let identity = self.identities.remove_async(&id_key).await.map(|(_, v)| v);
        let Some(identity) = identity else {
            warn!(id = %id_key, "zmq transport: no identity recorded for response id, dropping");
            return;
        };

        let payload = jsonrpc::serialize(&response);
        let mut message = ZmqMessage::from(identity);
        message.push_back(Bytes::new());
        message.push_back(Bytes::from(payload));
        let _ = self.tx.send(message);
    }
}

/// Binds a ROUTER socket at `endpoint` (e.g. `tcp://0.0.0.0:5571`) and runs
/// the recv/dispatch/send loop until shutdown.
pub async fn serve(
    endpoint: &str,
    config: crate::ConfigSnapshot,
    semaphores: Arc<crate::Semaphores>,
    gatherer: &crate::Gatherer,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut socket = RouterSocket::new();
    socket.bind(endpoint).await?;
    info!(%endpoint, "zmq ROUTER transport listening");

    let (tx, mut rx) = mpsc::unbounded_channel::<ZmqMessage>();
    let identities = Arc::new(ConcurrentMap::default());
    let sink = Arc::new(ZmqSink {
        tx,
        identities: Arc::clone(&identities),
    });
    let frame = ServerFrame::new(config, sink);
    frame.spawn_proxy_workers(gatherer.subscribe(), semaphores, shutdown.clone());

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let message = match incoming {
                    Ok(message) => message,
                    Err(err) => {
                        warn!(error = %err, "zmq transport: recv failed");
                        continue;
                    }
                };
                let frames: Vec<Bytes> = message.into_vec();
                if frames.len() < 3 {
                    warn!(frames = frames.len(), "zmq transport: malformed envelope, dropping");
                    continue;
                }
                let identity = frames[0].clone();
                let payload = &frames[2];

                match jsonrpc::deserialize(payload) {
                    Ok(request) => {
                        if !request.is_notification() {
                            identities
                                .upsert_async(request.response_id().to_string(), identity)
                                .await;
                        }
                        frame.put_request(request).await;
                    }
                    Err(response) => {
                        // parse errors carry a null id; there is no id to route a
                        // reply by, so answer on the same identity immediately.
                        let payload = jsonrpc::serialize(&response);
                        let mut out = ZmqMessage::from(identity);
                        out.push_back(Bytes::new());
                        out.push_back(Bytes::from(payload));
                        if let Err(err) = socket.send(out).await {
                            warn!(error = %err, "zmq transport: failed to send parse-error response");
                        }
                    }
                }
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Some(message) => {
                        if let Err(err) = socket.send(message).await {
                            warn!(error = %err, "zmq transport: send failed");
                        }
                    }
                    None => {}
                }
            }
            _ = shutdown.changed() => return Ok(()),
        }
    }
}
