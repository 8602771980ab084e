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

//! Redis list-pump transport (spec §6): `BRPOPLPUSH` from
//! `SERVER_REDIS_REQUEST_KEY` into a work-in-progress list, response pushed
//! via `LPUSH` to `SERVER_REDIS_RESPONSE_KEY_PREFIX + id`.

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::frame::{ResponseSink, ServerFrame};
use crate::jsonrpc::{self, ResponseObject};

struct RedisSink {
    conn: redis::aio::MultiplexedConnection,
    response_key_prefix: String,
}

#[async_trait]
impl ResponseSink for RedisSink {
    async fn send(&self, response: ResponseObject) {
        let key = format!("{}{}", self.response_key_prefix, id_as_key(&response.id));
        let bytes = jsonrpc::serialize(&response);
        let mut conn = self.conn.clone();
        if let Err(err) = conn.lpush::<_, _, ()>(&key, bytes).await {
            warn!(%key, error = %err, "redis transport: failed to push response");
        }
    }
}

fn id_as_key(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Connects to `redis_url`, subscribes a `ServerFrame`, and drains the
/// request list until shutdown. Each popped entry is moved onto
/// `<request_key>:processing` by `BRPOPLPUSH` before being handled, so a
/// crash mid-dispatch leaves the request recoverable rather than lost --
/// though per spec §1 this crate makes no durability promise beyond that
/// single list move; nothing re-delivers from the processing list today.
pub async fn serve(
    redis_url: &str,
    request_key: &str,
    response_key_prefix: &str,
    config: crate::ConfigSnapshot,
    semaphores: Arc<crate::Semaphores>,
    gatherer: &crate::Gatherer,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let client = redis::Client::open(redis_url)?;
    let mut reader = client.get_multiplexed_async_connection().await?;
    let sink_conn = client.get_multiplexed_async_connection().await?;
    info!(%redis_url, %request_key, "redis transport connected");

    let sink = Arc::new(RedisSink {
        conn: sink_conn,
        response_key_prefix: response_key_prefix.to_string(),
    });
    let frame = ServerFrame::new(config, sink);
    frame.spawn_proxy_workers(gatherer.subscribe(), semaphores, shutdown.clone());

    let processing_key = format!("{request_key}:processing");

    loop {
        let popped: Option<Vec<u8>> = tokio::select! {
            popped = reader.brpoplpush(request_key, &processing_key, 1.0) => match popped {
                Ok(v) => v,
                Err(err) => {
                    warn!(error = %err, "redis transport: brpoplpush failed");
                    None
                }
            },
            _ = shutdown.changed() => return Ok(()),
        };

        let Some(payload) = popped else { continue };
        match jsonrpc::deserialize(&payload) {
            Ok(request) => frame.put_request(request).await,
            Err(response) => frame.send(response).await,
        }
    }
}
