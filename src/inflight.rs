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

use ahash::RandomState;
use scc::HashMap;
use serde_json::Value;

/// URL -> set of request ids awaiting the same outstanding fetch (spec §3).
/// A URL appears here iff a worker has begun, but not finished, fetching it.
///
/// Built on `scc::HashMap`, the same lock-free concurrent map the teacher
/// lineage reaches for in its cache storage layer, since membership here
/// needs no ordering — unlike the Response Cache's byte-bound LRU.
pub struct InFlightMap {
    inner: HashMap<String, Vec<Value>, RandomState>,
}

impl InFlightMap {
    pub fn new() -> Self {
        InFlightMap {
            inner: HashMap::with_hasher(RandomState::new()),
        }
    }

    /// If `url` is already in flight, merges `id` into its waiter set and
    /// returns `true` (caller must not issue another outbound fetch). If not,
    /// starts tracking `url` with `id` as its sole waiter and returns `false`
    /// (caller owns the fetch).
    pub async fn join_or_start(&self, url: &str, id: Value) -> bool {
        match self.inner.entry_async(url.to_string()).await {
            scc::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().push(id);
                true
            }
            scc::hash_map::Entry::Vacant(entry) => {
                entry.insert_entry(vec![id]);
                false
            }
        }
    }

    /// Removes `url` from the map and returns every waiting id, to be
    /// delivered the same response (spec §4.4 step 3).
    pub async fn take(&self, url: &str) -> Vec<Value> {
        self.inner
            .remove_async(url)
            .await
            .map(|(_, ids)| ids)
            .unwrap_or_default()
    }
}

impl Default for InFlightMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn second_join_merges_into_first() {
        let map = InFlightMap::new();
        let joined_first = map.join_or_start("http://example.com", json!("r1")).await;
        assert!(!joined_first);
        let joined_second = map.join_or_start("http://example.com", json!("r2")).await;
        assert!(joined_second);

        let ids = map.take("http://example.com").await;
        assert_eq!(ids, vec![json!("r1"), json!("r2")]);
    }

    #[tokio::test]
    async fn take_on_unknown_url_is_empty() {
        let map = InFlightMap::new();
        assert!(map.take("http://nowhere.example").await.is_empty());
    }
}
