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

use std::fs::File;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BrokerError;

/// A Server Frame's recognized config keys (spec §3, §6), held as a typed
/// snapshot rather than a generic string-keyed map so `update_config` can be
/// validated against real field types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSnapshot {
    pub proxy_test_max_concurrent_conn: usize,
    pub proxy_test_url: String,
    pub proxy_test_timeout: Duration,
    pub proxy_heartbeat: Duration,
    pub proxy_refresh_list_interval: Duration,
    pub fetcher_fetch_interval_per_proxy: Duration,
    pub fetcher_global_concurrent_conn: usize,
    pub fetch_request_timeout: Duration,
    pub fetch_request_cache: bool,
    pub fetch_request_cache_maxsize: usize,
    pub fetch_request_cache_timeout: Duration,
    pub queue_max_len: usize,
    pub server_websocket_host: String,
    pub server_websocket_port: u16,
    pub server_redis_request_key: String,
    pub server_redis_response_key_prefix: String,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        ConfigSnapshot {
            proxy_test_max_concurrent_conn: 20,
            proxy_test_url: "http://myexternalip.com/json".to_string(),
            proxy_test_timeout: Duration::from_secs(10),
            proxy_heartbeat: Duration::from_secs(120),
            proxy_refresh_list_interval: Duration::from_secs(300),
            fetcher_fetch_interval_per_proxy: Duration::from_secs(3),
            fetcher_global_concurrent_conn: 1000,
            fetch_request_timeout: Duration::from_secs(20),
            fetch_request_cache: false,
            fetch_request_cache_maxsize: 500 * 1024,
            fetch_request_cache_timeout: Duration::from_secs(3600),
            queue_max_len: 10_000,
            server_websocket_host: "127.0.0.1".to_string(),
            server_websocket_port: 9712,
            server_redis_request_key: "proxybroker:requests".to_string(),
            server_redis_response_key_prefix: "proxybroker:responses:".to_string(),
        }
    }
}

/// Parses a JSON value into a `Duration` for a config patch. Spec §6
/// documents every duration key as a plain seconds number (e.g.
/// `PROXY_HEARTBEAT = 120 s`), which is the shape a real `update_config`
/// patch carries -- not `serde`'s own `{secs, nanos}` encoding of `Duration`,
/// which only the config struct's *own* round trip (e.g. via `serde_yaml`)
/// ever produces. Accepts both so a patch built from a previously-read
/// snapshot still applies.
fn parse_duration_seconds(value: &Value) -> Option<Duration> {
    if let Some(secs) = value.as_f64() {
        return Some(Duration::from_secs_f64(secs));
    }
    if let Some(obj) = value.as_object() {
        let secs = obj.get("secs")?.as_u64()?;
        let nanos = obj.get("nanos").and_then(Value::as_u64).unwrap_or(0) as u32;
        return Some(Duration::new(secs, nanos));
    }
    None
}

impl ConfigSnapshot {
    /// Shallow-merge a `{KEY: value}` patch (spec §4.4 `update_config`).
    /// Unknown keys are rejected rather than silently ignored or stored,
    /// resolving the spec's open validation question; known keys are
    /// matched and type-checked field by field rather than round-tripped
    /// through `serde_json::Value` as a whole struct, so a patch that fails
    /// to apply one key (wrong type, or a plain seconds number for a
    /// `Duration` field) doesn't silently drop every other key in the same
    /// call. Returns every key that was rejected -- unknown name or wrong
    /// shape -- for the caller to log.
    pub fn merge(&mut self, patch: &serde_json::Map<String, Value>) -> Vec<String> {
        let mut rejected = Vec::new();
        for (key, value) in patch {
            let applied = match key.to_lowercase().as_str() {
                "proxy_test_max_concurrent_conn" => value.as_u64().map(|v| self.proxy_test_max_concurrent_conn = v as usize),
                "proxy_test_url" => value.as_str().map(|v| self.proxy_test_url = v.to_string()),
                "proxy_test_timeout" => parse_duration_seconds(value).map(|v| self.proxy_test_timeout = v),
                "proxy_heartbeat" => parse_duration_seconds(value).map(|v| self.proxy_heartbeat = v),
                "proxy_refresh_list_interval" => parse_duration_seconds(value).map(|v| self.proxy_refresh_list_interval = v),
                "fetcher_fetch_interval_per_proxy" => parse_duration_seconds(value).map(|v| self.fetcher_fetch_interval_per_proxy = v),
                "fetcher_global_concurrent_conn" => value.as_u64().map(|v| self.fetcher_global_concurrent_conn = v as usize),
                "fetch_request_timeout" => parse_duration_seconds(value).map(|v| self.fetch_request_timeout = v),
                "fetch_request_cache" => value.as_bool().map(|v| self.fetch_request_cache = v),
                "fetch_request_cache_maxsize" => value.as_u64().map(|v| self.fetch_request_cache_maxsize = v as usize),
                "fetch_request_cache_timeout" => parse_duration_seconds(value).map(|v| self.fetch_request_cache_timeout = v),
                "queue_max_len" => value.as_u64().map(|v| self.queue_max_len = v as usize),
                "server_websocket_host" => value.as_str().map(|v| self.server_websocket_host = v.to_string()),
                "server_websocket_port" => value.as_u64().and_then(|v| u16::try_from(v).ok()).map(|v| self.server_websocket_port = v),
                "server_redis_request_key" => value.as_str().map(|v| self.server_redis_request_key = v.to_string()),
                "server_redis_response_key_prefix" => value.as_str().map(|v| self.server_redis_response_key_prefix = v.to_string()),
                _ => None,
            };
            if applied.is_none() {
                rejected.push(key.clone());
            }
        }
        rejected
    }
}

/// Raw on-disk representation: every field optional so a partial file only
/// overrides what it mentions, the rest falling back to `ConfigSnapshot`'s
/// reference defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
struct FileConfig {
    proxy_test_max_concurrent_conn: Option<usize>,
    proxy_test_url: Option<String>,
    proxy_test_timeout_seconds: Option<u64>,
    proxy_heartbeat_seconds: Option<u64>,
    proxy_refresh_list_interval_seconds: Option<u64>,
    fetcher_fetch_interval_per_proxy_seconds: Option<u64>,
    fetcher_global_concurrent_conn: Option<usize>,
    fetch_request_timeout_seconds: Option<u64>,
    fetch_request_cache: Option<bool>,
    fetch_request_cache_maxsize: Option<usize>,
    fetch_request_cache_timeout_seconds: Option<u64>,
    queue_max_len: Option<usize>,
    server_websocket_host: Option<String>,
    server_websocket_port: Option<u16>,
    server_redis_request_key: Option<String>,
    server_redis_response_key_prefix: Option<String>,
    proxy_sources: Option<Vec<String>>,
}

pub struct LoadedConfig {
    pub snapshot: ConfigSnapshot,
    /// listing URLs for additional `PaginatedListSource`/`EliteListSource`
    /// instances beyond the two built-in defaults (spec §4.2: sources are
    /// pluggable).
    pub extra_proxy_sources: Vec<String>,
}

/// Load a `ConfigSnapshot` from a YAML file, falling back to reference
/// defaults for anything the file doesn't mention. A missing file is not an
/// error: it just means "use the defaults", matching how most of the teacher
/// lineage's `config.yaml` loading only runs when operators opt in.
pub fn load(path: &str) -> Result<LoadedConfig, BrokerError> {
    let file_config = match File::open(path) {
        Ok(file) => serde_yaml::from_reader(file)
            .map_err(|source| BrokerError::ConfigParse { path: path.to_string(), source })?,
        Err(_) => FileConfig::default(),
    };

    let mut snapshot = ConfigSnapshot::default();
    if let Some(v) = file_config.proxy_test_max_concurrent_conn {
        snapshot.proxy_test_max_concurrent_conn = v;
    }
    if let Some(v) = file_config.proxy_test_url {
        snapshot.proxy_test_url = v;
    }
    if let Some(v) = file_config.proxy_test_timeout_seconds {
        snapshot.proxy_test_timeout = Duration::from_secs(v);
    }
    if let Some(v) = file_config.proxy_heartbeat_seconds {
        snapshot.proxy_heartbeat = Duration::from_secs(v);
    }
    if let Some(v) = file_config.proxy_refresh_list_interval_seconds {
        snapshot.proxy_refresh_list_interval = Duration::from_secs(v);
    }
    if let Some(v) = file_config.fetcher_fetch_interval_per_proxy_seconds {
        snapshot.fetcher_fetch_interval_per_proxy = Duration::from_secs(v);
    }
    if let Some(v) = file_config.fetcher_global_concurrent_conn {
        snapshot.fetcher_global_concurrent_conn = v;
    }
    if let Some(v) = file_config.fetch_request_timeout_seconds {
        snapshot.fetch_request_timeout = Duration::from_secs(v);
    }
    if let Some(v) = file_config.fetch_request_cache {
        snapshot.fetch_request_cache = v;
    }
    if let Some(v) = file_config.fetch_request_cache_maxsize {
        snapshot.fetch_request_cache_maxsize = v;
    }
    if let Some(v) = file_config.fetch_request_cache_timeout_seconds {
        snapshot.fetch_request_cache_timeout = Duration::from_secs(v);
    }
    if let Some(v) = file_config.queue_max_len {
        snapshot.queue_max_len = v;
    }
    if let Some(v) = file_config.server_websocket_host {
        snapshot.server_websocket_host = v;
    }
    if let Some(v) = file_config.server_websocket_port {
        snapshot.server_websocket_port = v;
    }
    if let Some(v) = file_config.server_redis_request_key {
        snapshot.server_redis_request_key = v;
    }
    if let Some(v) = file_config.server_redis_response_key_prefix {
        snapshot.server_redis_response_key_prefix = v;
    }

    Ok(LoadedConfig {
        snapshot,
        extra_proxy_sources: file_config.proxy_sources.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_spec_reference_values() {
        let c = ConfigSnapshot::default();
        assert_eq!(c.proxy_test_max_concurrent_conn, 20);
        assert_eq!(c.fetch_request_cache_maxsize, 500 * 1024);
        assert!(!c.fetch_request_cache);
    }

    #[test]
    fn merge_updates_known_key() {
        let mut c = ConfigSnapshot::default();
        let patch = json!({"fetch_request_cache": true}).as_object().unwrap().clone();
        let unknown = c.merge(&patch);
        assert!(unknown.is_empty());
        assert!(c.fetch_request_cache);
    }

    #[test]
    fn merge_rejects_unknown_key() {
        let mut c = ConfigSnapshot::default();
        let patch = json!({"not_a_real_key": 1}).as_object().unwrap().clone();
        let unknown = c.merge(&patch);
        assert_eq!(unknown, vec!["not_a_real_key".to_string()]);
    }

    #[test]
    fn merge_updates_duration_key_given_as_a_plain_seconds_number() {
        let mut c = ConfigSnapshot::default();
        let patch = json!({"proxy_heartbeat": 60}).as_object().unwrap().clone();
        let rejected = c.merge(&patch);
        assert!(rejected.is_empty());
        assert_eq!(c.proxy_heartbeat, Duration::from_secs(60));
    }

    #[test]
    fn merge_applies_every_other_key_even_if_one_in_the_same_patch_is_bad() {
        let mut c = ConfigSnapshot::default();
        let patch = json!({
            "fetch_request_cache": true,
            "proxy_heartbeat": "not a number",
        })
        .as_object()
        .unwrap()
        .clone();
        let rejected = c.merge(&patch);
        assert_eq!(rejected, vec!["proxy_heartbeat".to_string()]);
        assert!(c.fetch_request_cache);
        assert_eq!(c.proxy_heartbeat, ConfigSnapshot::default().proxy_heartbeat);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let loaded = load("/nonexistent/broker.yaml").unwrap();
        assert_eq!(
            loaded.snapshot.proxy_test_max_concurrent_conn,
            ConfigSnapshot::default().proxy_test_max_concurrent_conn
        );
    }
}
