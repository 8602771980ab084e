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

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::Mutex;

struct Entry {
    body: Bytes,
    inserted_at: Instant,
    // position in `order`, used to splice this entry out on touch/evict
    // without a linear scan of the whole list.
    order_index: usize,
}

/// Bounded TTL cache mapping URL to response body (spec §3). The size bound
/// is measured in response-body bytes, not entry count; eviction is
/// least-recently-updated once the byte bound is exceeded, and an entry also
/// expires once its own TTL elapses. Per spec §9 this never purges on a
/// cache *hit* beyond what TTL/size already dictate.
///
/// Generalizes the teacher lineage's `scc::HashMap`-backed cache storage
/// (`SccMemoryCache`) into byte-bound LRU + TTL semantics; byte-bound LRU
/// needs an access order that a bare concurrent map doesn't track, so this
/// keeps everything behind one `tokio::sync::Mutex` — acceptable since a
/// Response Cache is owned and mutated only within its Server Frame's
/// scheduler (spec §5), never shared cross-frame.
pub struct ResponseCache {
    inner: Mutex<Inner>,
    max_bytes: usize,
    ttl: Duration,
}

struct Inner {
    entries: HashMap<String, Entry>,
    // most-recently-used at the back; index into this list is `order_index`.
    order: Vec<Option<String>>,
    total_bytes: usize,
}

impl ResponseCache {
    pub fn new(max_bytes: usize, ttl: Duration) -> Self {
        ResponseCache {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
                total_bytes: 0,
            }),
            max_bytes,
            ttl,
        }
    }

    pub async fn get(&self, url: &str) -> Option<Bytes> {
        let mut inner = self.inner.lock().await;
        let expired = match inner.entries.get(url) {
            Some(entry) => entry.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            inner.remove(url);
            return None;
        }
        let body = inner.entries.get(url).map(|e| e.body.clone());
        if body.is_some() {
            inner.touch(url);
        }
        body
    }

    pub async fn insert(&self, url: String, body: Bytes) {
        if body.len() > self.max_bytes {
            // a single entry bigger than the whole budget can never fit.
            return;
        }
        let mut inner = self.inner.lock().await;
        inner.remove(&url);
        while inner.total_bytes + body.len() > self.max_bytes {
            if !inner.evict_oldest() {
                break;
            }
        }
        inner.insert(url, body);
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}

impl Inner {
    fn insert(&mut self, url: String, body: Bytes) {
        let index = self.order.len();
        self.order.push(Some(url.clone()));
        self.total_bytes += body.len();
        self.entries.insert(
            url,
            Entry {
                body,
                inserted_at: Instant::now(),
                order_index: index,
            },
        );
    }

    fn remove(&mut self, url: &str) {
        if let Some(entry) = self.entries.remove(url) {
            self.total_bytes -= entry.body.len();
            self.order[entry.order_index] = None;
        }
    }

    fn touch(&mut self, url: &str) {
        let Some(entry) = self.entries.get_mut(url) else {
            return;
        };
        self.order[entry.order_index] = None;
        let new_index = self.order.len();
        self.order.push(Some(url.to_string()));
        entry.order_index = new_index;
    }

    /// Evicts the least-recently-updated live entry. Returns `false` if
    /// nothing was left to evict.
    fn evict_oldest(&mut self) -> bool {
        while let Some(slot) = self.order.first() {
            match slot {
                None => {
                    self.order.remove(0);
                }
                Some(url) => {
                    let url = url.clone();
                    self.order.remove(0);
                    if let Some(entry) = self.entries.remove(&url) {
                        self.total_bytes -= entry.body.len();
                        return true;
                    }
                }
            }
        }
        false
    }
}
