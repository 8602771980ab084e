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

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde_json::Value;
use tracing::warn;

use crate::frame::ServerFrame;
use crate::jsonrpc::{RequestObject, ResponseObject, INTERNAL_ERROR};
use crate::queue::PriorityClass;

/// Routes one deserialized request to its handler (spec §4.4). Parse
/// failures never reach here — a transport answers those itself straight
/// from `jsonrpc::deserialize`. Anything a handler can't satisfy synchronously
/// collapses to a `-32000` response rather than propagating, since a
/// client-supplied request can never be allowed to take the frame down.
pub async fn handle(frame: &ServerFrame, request: RequestObject) {
    match request.method.as_str() {
        "update_config" => handle_update_config(frame, request).await,
        "fetch" | "prefetch" => handle_fetch(frame, request).await,
        _ => {
            if !request.is_notification() {
                frame
                    .send(ResponseObject::method_not_found(request.response_id()))
                    .await;
            }
        }
    }
}

/// Spec §4.4 `update_config`: unrecognized keys and keys whose value doesn't
/// fit the field's type are rejected (logged, not surfaced as a protocol
/// error) and the call always acknowledges with `{result: true}` once
/// applied, whether or not every key in the patch was understood.
async fn handle_update_config(frame: &ServerFrame, request: RequestObject) {
    let id = request.response_id();
    let patch = request.params.as_object().cloned().unwrap_or_default();
    for key in frame.update_config(&patch) {
        warn!(key = %key, "update_config: rejected key (unknown name or wrong value shape)");
    }
    if !request.is_notification() {
        frame.send(ResponseObject::ok(id, Value::Bool(true))).await;
    }
}

/// Spec §4.4 `fetch`/`prefetch`: identical reply shape (the fetched body),
/// differing only in the priority class they enter the queue under. A cache
/// hit or an already-in-flight duplicate short-circuits before ever touching
/// a proxy.
async fn handle_fetch(frame: &ServerFrame, mut request: RequestObject) {
    let id = request.response_id();
    let notification = request.is_notification();

    let url = match request.params.get("url").and_then(Value::as_str) {
        Some(url) => url.to_string(),
        None => {
            if !notification {
                frame
                    .send(ResponseObject::err(id, INTERNAL_ERROR, "missing required 'url' param"))
                    .await;
            }
            return;
        }
    };

    let config = frame.config_snapshot();
    // `prefetch` is always cacheable (spec §4.4); `fetch` takes its own
    // `cache` param, falling back to the frame's config default.
    let cache_enabled = request.method == "prefetch"
        || request
            .params
            .get("cache")
            .and_then(Value::as_bool)
            .unwrap_or(config.fetch_request_cache);

    if cache_enabled {
        if let Some(body) = frame.cache().get(&url).await {
            if !notification {
                frame.send(ResponseObject::ok(id, encode_body(&body))).await;
            }
            return;
        }
    }

    // joins an outstanding fetch for the same url if one exists; otherwise
    // this request becomes that fetch's sole owner. Must run before the
    // queue back-pressure check below: joining costs nothing (no new queue
    // entry), so it must never be rejected for overflow that doesn't apply
    // to it.
    if frame.inflight().join_or_start(&url, id).await {
        return;
    }

    if frame.queue().is_full() {
        if !notification {
            frame
                .send(ResponseObject::err(id, INTERNAL_ERROR, "queue overflow"))
                .await;
        }
        // back out of the in-flight map: nothing else will ever complete
        // this url's fetch, so its entry must not linger and make a future
        // request believe a fetch is already underway.
        frame.inflight().take(&url).await;
        return;
    }

    // stash the resolved cache decision in the queued params so the Proxy
    // Worker that eventually completes this fetch knows whether to cache
    // the result, without re-deriving it against a (possibly since-changed)
    // config snapshot.
    match request.params.as_object_mut() {
        Some(obj) => {
            obj.insert("cache".to_string(), Value::Bool(cache_enabled));
        }
        None => request.params = serde_json::json!({"url": url, "cache": cache_enabled}),
    }

    let class = PriorityClass::classify(&request.method, false);
    let seq = frame.queue().next_seq();
    frame.queue().push(class, seq, request);
}

pub fn encode_body(body: &Bytes) -> Value {
    Value::String(BASE64.encode(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ServerFrame;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[test]
    fn encode_body_is_base64() {
        let encoded = encode_body(&Bytes::from_static(b"hi"));
        assert_eq!(encoded, Value::String("aGk=".to_string()));
    }

    struct RecordingSink {
        tx: mpsc::UnboundedSender<ResponseObject>,
    }

    #[async_trait::async_trait]
    impl crate::frame::ResponseSink for RecordingSink {
        async fn send(&self, response: ResponseObject) {
            let _ = self.tx.send(response);
        }
    }

    fn request(id: &str, method: &str, params: Value) -> RequestObject {
        serde_json::from_value(json!({"id": id, "method": method, "params": params})).unwrap()
    }

    /// A fetch that joins an already in-flight url must never be rejected
    /// for queue back-pressure: it costs no queue entry, since the worker
    /// already serving the first request answers every joined id once it
    /// completes. A queue at capacity must only reject the request that
    /// would actually need to push onto it.
    #[tokio::test]
    async fn joining_an_in_flight_url_ignores_a_full_queue() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut config = crate::config::ConfigSnapshot::default();
        config.queue_max_len = 0;
        let frame = ServerFrame::new(config, Arc::new(RecordingSink { tx }));

        // simulate a worker already mid-fetch for this url.
        frame.inflight().join_or_start("http://example.com", json!("r1")).await;

        handle(&frame, request("r2", "fetch", json!({"url": "http://example.com"}))).await;

        // no response at all yet: r2 joined silently, waiting on r1's fetch.
        assert!(rx.try_recv().is_err());
        let waiters = frame.inflight().take("http://example.com").await;
        assert_eq!(waiters, vec![json!("r1"), json!("r2")]);
    }

    /// The request that actually owns a fresh url (not joining anything)
    /// still gets rejected once the queue is genuinely full.
    #[tokio::test]
    async fn fresh_url_is_rejected_when_queue_is_full() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut config = crate::config::ConfigSnapshot::default();
        config.queue_max_len = 0;
        let frame = ServerFrame::new(config, Arc::new(RecordingSink { tx }));

        handle(&frame, request("r1", "fetch", json!({"url": "http://example.com"}))).await;

        let response = rx.try_recv().expect("expected an overflow response");
        assert_eq!(response.id, json!("r1"));
        assert_eq!(response.error.unwrap().code, INTERNAL_ERROR);
        // the url must not be left dangling in the in-flight map once its
        // would-be owner was rejected.
        assert!(frame.inflight().take("http://example.com").await.is_empty());
    }
}
