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

//! Line-delimited JSON on stdin/stdout (spec §6). One request object per
//! line in, one response object per line out.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::frame::{ResponseSink, ServerFrame};
use crate::jsonrpc::{self, ResponseObject};

struct StdoutSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl ResponseSink for StdoutSink {
    async fn send(&self, response: ResponseObject) {
        let bytes = jsonrpc::serialize(&response);
        // an Err here means the writer task already exited (stdout closed);
        // nothing useful to do but drop the response.
        let _ = self.tx.send(bytes);
    }
}

/// Builds a Server Frame wired to stdin/stdout and runs its inbound loop
/// until EOF or shutdown. One line in, dispatched via `put_request`; the
/// writer task drains responses out as they complete, independent of the
/// reader, so a slow handler never blocks reading the next line.
pub async fn serve(config: crate::ConfigSnapshot, semaphores: Arc<crate::Semaphores>, gatherer: &crate::Gatherer, mut shutdown: watch::Receiver<bool>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let sink = Arc::new(StdoutSink { tx });
    let frame = ServerFrame::new(config, sink);
    frame.spawn_proxy_workers(gatherer.subscribe(), semaphores, shutdown.clone());

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(mut line) = rx.recv().await {
            line.push(b'\n');
            if stdout.write_all(&line).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.changed() => break,
        };
        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match jsonrpc::deserialize(line.as_bytes()) {
                    Ok(request) => frame.put_request(request).await,
                    Err(response) => frame.send(response).await,
                }
            }
            Ok(None) => {
                debug!("stdio transport: stdin closed");
                break;
            }
            Err(err) => {
                warn!(error = %err, "stdio transport: read error");
                break;
            }
        }
    }
    drop(frame);
    writer.abort();
}
