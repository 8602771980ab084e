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

//! WebSocket transport (spec §6): one JSON message per frame, bound by
//! `SERVER_WEBSOCKET_HOST:PORT`. Each accepted connection gets its own
//! `ServerFrame` so responses never cross wires between clients; proxies
//! themselves are still harvested once, process-wide, and shared across
//! every connection's workers via the same Gatherer subscription.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::frame::{ResponseSink, ServerFrame};
use crate::jsonrpc::{self, ResponseObject};

struct WsSink {
    tx: mpsc::UnboundedSender<Message>,
}

#[async_trait]
impl ResponseSink for WsSink {
    async fn send(&self, response: ResponseObject) {
        let bytes = jsonrpc::serialize(&response);
        let _ = self.tx.send(Message::Text(String::from_utf8_lossy(&bytes).into_owned()));
    }
}

/// Binds `host:port` and serves one `ServerFrame` per accepted connection
/// until shutdown. Mirrors the teacher lineage's accept-loop-over-a-listener
/// shape: every connection is handled on its own spawned task so one slow
/// client never blocks another's traffic.
pub async fn serve(
    host: &str,
    port: u16,
    config: crate::ConfigSnapshot,
    semaphores: Arc<crate::Semaphores>,
    gatherer: Arc<crate::Gatherer>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "websocket transport listening");

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.changed() => return Ok(()),
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "websocket transport: accept failed");
                continue;
            }
        };

        let config = config.clone();
        let semaphores = Arc::clone(&semaphores);
        let proxies = gatherer.subscribe();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, config, semaphores, proxies, shutdown).await {
                warn!(%peer, error = %err, "websocket connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    config: crate::ConfigSnapshot,
    semaphores: Arc<crate::Semaphores>,
    proxies: tokio::sync::broadcast::Receiver<Arc<crate::Proxy>>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let sink = Arc::new(WsSink { tx });
    let frame = ServerFrame::new(config, sink);
    frame.spawn_proxy_workers(proxies, semaphores, shutdown.clone());

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if write.send(message).await.is_err() {
                break;
            }
        }
    });

    loop {
        let next = tokio::select! {
            next = read.next() => next,
            _ = shutdown.changed() => break,
        };
        match next {
            Some(Ok(Message::Text(text))) => match jsonrpc::deserialize(text.as_bytes()) {
                Ok(request) => frame.put_request(request).await,
                Err(response) => frame.send(response).await,
            },
            Some(Ok(Message::Binary(bytes))) => match jsonrpc::deserialize(&bytes) {
                Ok(request) => frame.put_request(request).await,
                Err(response) => frame.send(response).await,
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(err.into()),
        }
    }

    writer.abort();
    Ok(())
}
