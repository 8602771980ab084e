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

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::cache::ResponseCache;
use crate::config::ConfigSnapshot;
use crate::dispatcher::{self, encode_body};
use crate::inflight::InFlightMap;
use crate::jsonrpc::{RequestObject, ResponseObject};
use crate::proxy::Proxy;
use crate::queue::PriorityQueue;
use crate::worker::{ProxyWorker, Semaphores};

/// What a transport adapter gives a Server Frame to deliver outbound
/// responses through. Implemented once per adapter (spec §6); a frame never
/// knows which concrete transport, or which of a transport's connections,
/// it's talking to — any per-connection routing is the adapter's concern,
/// encoded into the id it handed in with the request.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn send(&self, response: ResponseObject);
}

/// One transport's complete broker state (spec §5): its own queue, cache,
/// in-flight map and config snapshot. Never shared across frames — running
/// the stdio and the websocket transport side by side means two independent
/// frames, each scheduling its own proxies drawn from the one process-wide
/// Proxy Registry.
pub struct ServerFrame {
    queue: PriorityQueue,
    cache: ResponseCache,
    inflight: InFlightMap,
    config: RwLock<ConfigSnapshot>,
    sink: Arc<dyn ResponseSink>,
}

impl ServerFrame {
    pub fn new(config: ConfigSnapshot, sink: Arc<dyn ResponseSink>) -> Arc<Self> {
        let cache = ResponseCache::new(config.fetch_request_cache_maxsize, config.fetch_request_cache_timeout);
        let queue = PriorityQueue::new(config.queue_max_len);
        Arc::new(ServerFrame {
            queue,
            cache,
            inflight: InFlightMap::new(),
            config: RwLock::new(config),
            sink,
        })
    }

    pub fn queue(&self) -> &PriorityQueue {
        &self.queue
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn inflight(&self) -> &InFlightMap {
        &self.inflight
    }

    /// Cheap clone of the current config, read once per dequeue/dispatch so
    /// an in-flight `update_config` never has to coordinate with readers.
    pub fn config_snapshot(&self) -> ConfigSnapshot {
        self.config.read().expect("config lock poisoned").clone()
    }

    pub fn update_config(&self, patch: &Map<String, Value>) -> Vec<String> {
        self.config.write().expect("config lock poisoned").merge(patch)
    }

    pub async fn send(&self, response: ResponseObject) {
        self.sink.send(response).await;
    }

    /// Entry point every transport adapter calls for each deserialized
    /// request (spec §6 adapter contract).
    pub async fn put_request(&self, request: RequestObject) {
        dispatcher::handle(self, request).await;
    }

    /// Called by a Proxy Worker once a fetch for `url` has succeeded: caches
    /// the body if caching is enabled, then answers every request that was
    /// waiting on this url (spec §4.4 step 3). Notification ids (`null`)
    /// never get a reply, matching plain JSON-RPC 2.0 notification semantics.
    pub async fn complete_fetch(&self, url: &str, body: Bytes, cache_enabled: bool) {
        if cache_enabled {
            self.cache.insert(url.to_string(), body.clone()).await;
        }
        let waiters = self.inflight.take(url).await;
        if waiters.is_empty() {
            return;
        }
        let result = encode_body(&body);
        for id in waiters {
            if id.is_null() {
                continue;
            }
            self.sink.send(ResponseObject::ok(id, result.clone())).await;
        }
    }

    /// Subscribes to the process-wide Gatherer and spawns one `ProxyWorker`
    /// per newly harvested proxy, scoped to this frame's queue/cache/in-flight
    /// state. The frame only ever holds a `Receiver`, never an `Arc` back to
    /// the Gatherer, so the two can't form a reference cycle; this spawner
    /// task itself upgrades a `Weak<ServerFrame>` rather than a strong `Arc`
    /// so the frame can still be torn down while the task is parked on
    /// `recv`.
    pub fn spawn_proxy_workers(
        self: &Arc<Self>,
        mut proxies: broadcast::Receiver<Arc<Proxy>>,
        semaphores: Arc<Semaphores>,
        shutdown: watch::Receiver<bool>,
    ) {
        let frame = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let proxy = match proxies.recv().await {
                    Ok(proxy) => proxy,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "proxy worker spawner lagged behind gatherer broadcast");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                let Some(frame) = frame.upgrade() else {
                    return;
                };
                info!(proxy = %proxy.key(), "spawning proxy worker");
                let worker = ProxyWorker::new(proxy, Arc::clone(&frame), Arc::clone(&semaphores));
                tokio::spawn(worker.run(shutdown.clone()));
            }
        });
    }
}
