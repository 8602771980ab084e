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

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use crate::frame::ServerFrame;
use crate::proxy::Proxy;

/// Process-wide concurrency limits (spec §5): proxy self-tests and live
/// fetches each draw from their own pool, shared by every Server Frame and
/// every Proxy Worker in the process — never per-frame, since the limits
/// exist to protect the one physical network link out, not any one client.
pub struct Semaphores {
    pub proxy_test: Semaphore,
    pub fetch: Semaphore,
}

impl Semaphores {
    pub fn new(proxy_test_max_concurrent: usize, fetch_max_concurrent: usize) -> Self {
        Semaphores {
            proxy_test: Semaphore::new(proxy_test_max_concurrent),
            fetch: Semaphore::new(fetch_max_concurrent),
        }
    }
}

#[derive(Deserialize)]
struct SelfTestBody {
    ip: String,
}

/// Drives one harvested proxy through its lifecycle (spec §4.3): an
/// Unhealthy proxy self-tests before ever serving a request; a Healthy one
/// drains its frame's queue until a fetch through it fails, at which point
/// it goes back to Unhealthy for a fresh self-test. A proxy that fails
/// self-test, or is ever caught lying about its own egress IP, is
/// terminated permanently — its worker simply exits and is never retried.
///
/// Mirrors the teacher lineage's background-service shape (poll-or-shutdown
/// select loop) generalized from "one fixed interval" to "self-test once,
/// then serve forever or die."
pub struct ProxyWorker {
    proxy: Arc<Proxy>,
    frame: Arc<ServerFrame>,
    semaphores: Arc<Semaphores>,
}

enum HealthOutcome {
    Healthy,
    Terminated,
}

impl ProxyWorker {
    pub fn new(proxy: Arc<Proxy>, frame: Arc<ServerFrame>, semaphores: Arc<Semaphores>) -> Self {
        ProxyWorker {
            proxy,
            frame,
            semaphores,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            match self.self_test().await {
                HealthOutcome::Terminated => {
                    info!(proxy = %self.proxy.key(), "proxy terminated permanently");
                    return;
                }
                HealthOutcome::Healthy => {}
            }

            let stay_healthy = self.serve_while_healthy(&mut shutdown).await;
            if *shutdown.borrow() {
                return;
            }
            if !stay_healthy {
                // a transport failure sent us back for another self-test.
                continue;
            }
        }
    }

    /// Proxies are verified, not trusted: a proxy must prove both that it is
    /// reachable and that it actually is the IP it claims to be, by echoing
    /// back the `config.proxy_test_url` response and comparing the `ip` field
    /// against the proxy's declared host. Anything else — unreachable,
    /// malformed body, mismatched ip — permanently disqualifies it.
    async fn self_test(&self) -> HealthOutcome {
        let config = self.frame.config_snapshot();
        let _permit = self.semaphores.proxy_test.acquire().await;

        let connector = match self.proxy.connector() {
            Ok(client) => client,
            Err(err) => {
                warn!(proxy = %self.proxy.key(), error = %err, "failed to build proxy connector");
                return HealthOutcome::Terminated;
            }
        };

        let outcome = crate::fetch::fetch_one(&config.proxy_test_url, config.proxy_test_timeout, Some(connector)).await;
        let Some(outcome) = outcome else {
            debug!(proxy = %self.proxy.key(), "self-test unreachable");
            return HealthOutcome::Terminated;
        };
        if !outcome.status.is_success() {
            debug!(proxy = %self.proxy.key(), status = %outcome.status, "self-test non-success status");
            return HealthOutcome::Terminated;
        }

        let reported: Result<SelfTestBody, _> = serde_json::from_slice(&outcome.body);
        match reported {
            Ok(body) if body.ip == self.proxy.host => HealthOutcome::Healthy,
            Ok(body) => {
                warn!(proxy = %self.proxy.key(), reported_ip = %body.ip, "proxy lied about its egress ip");
                HealthOutcome::Terminated
            }
            Err(_) => {
                debug!(proxy = %self.proxy.key(), "self-test body did not parse");
                HealthOutcome::Terminated
            }
        }
    }

    /// Drains the frame's queue until a fetch transport-fails. Returns
    /// `true` if shutdown stopped us while otherwise healthy, `false` if a
    /// transport failure sent the proxy back for another self-test.
    async fn serve_while_healthy(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            let config = self.frame.config_snapshot();

            let entry = tokio::select! {
                entry = self.frame.queue().recv() => entry,
                _ = tokio::time::sleep(config.proxy_heartbeat) => {
                    debug!(proxy = %self.proxy.key(), "idle heartbeat, re-validating proxy");
                    return false;
                }
                _ = shutdown.changed() => return true,
            };

            let url = match entry.request.params.get("url").and_then(|v| v.as_str()) {
                Some(url) => url.to_string(),
                None => {
                    // malformed params never should have reached the queue; drop it.
                    warn!(proxy = %self.proxy.key(), "queued request missing url, dropping");
                    continue;
                }
            };
            // dispatcher::handle_fetch resolves and stashes the effective
            // cache decision (prefetch-always, or fetch's own `cache` param)
            // onto the queued request; re-deriving it from the live config
            // here would miss a `prefetch` and could disagree with what was
            // decided at intake if `update_config` ran meanwhile.
            let cache_enabled = entry
                .request
                .params
                .get("cache")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            let _permit = self.semaphores.fetch.acquire().await;
            let connector = match self.proxy.connector() {
                Ok(client) => client,
                Err(_) => return false,
            };
            let result = crate::fetch::fetch_one(&url, config.fetch_request_timeout, Some(connector)).await;

            match result {
                Some(outcome) => {
                    self.frame.complete_fetch(&url, outcome.body, cache_enabled).await;
                }
                None => {
                    debug!(proxy = %self.proxy.key(), url = %url, "fetch transport failure, requeueing");
                    let seq = self.frame.queue().next_seq();
                    self.frame
                        .queue()
                        .push(entry.class.downgrade(), seq, entry.request);
                    return false;
                }
            }

            tokio::time::sleep(config.fetcher_fetch_interval_per_proxy).await;
        }
    }
}

