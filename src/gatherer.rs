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

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::proxy::Proxy;

/// Spreads refresh cycles across a +/-10% window so many broker processes
/// started at the same time don't all hit the same listing sites in lockstep.
fn jittered(interval: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..=1.1);
    interval.mul_f64(factor)
}

/// One proxy harvesting backend (spec §4.2). A source is asked to list every
/// proxy it currently knows about; the Gatherer is responsible for
/// deduplicating across sources and across refreshes.
#[async_trait]
pub trait ProxySource: Send + Sync {
    fn name(&self) -> &str;
    async fn list(&self) -> Vec<Proxy>;
}

/// A source that publishes its whole proxy list on a single page, already
/// IP:port-per-line or similarly trivial to parse. Parsing here is
/// deliberately minimal — the spec treats HTML/markup scraping as out of
/// scope, so this only handles plain `ip:port` rows.
pub struct EliteListSource {
    name: String,
    url: String,
    client: reqwest::Client,
    row: Regex,
}

impl EliteListSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        EliteListSource {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::new(),
            row: Regex::new(r"(?m)^(\d{1,3}(?:\.\d{1,3}){3}):(\d{1,5})\s*$").unwrap(),
        }
    }
}

#[async_trait]
impl ProxySource for EliteListSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> Vec<Proxy> {
        let body = match self.client.get(&self.url).send().await {
            Ok(response) => match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    warn!(source = %self.name, error = %err, "failed to read elite list body");
                    return Vec::new();
                }
            },
            Err(err) => {
                warn!(source = %self.name, error = %err, "failed to fetch elite list");
                return Vec::new();
            }
        };

        self.row
            .captures_iter(&body)
            .filter_map(|caps| {
                let host = caps.get(1)?.as_str().to_string();
                let port: u16 = caps.get(2)?.as_str().parse().ok()?;
                Some(Proxy::new(host, port, self.name.clone()).with_elite(true))
            })
            .collect()
    }
}

/// A source whose proxy list is spread across numbered pages of a
/// near-identical row format, terminating either at a fixed page cap or once
/// a page repeats the previous page's rows verbatim (a common sign the site
/// has looped back rather than run out of pages).
pub struct PaginatedListSource {
    name: String,
    page_url_template: String, // must contain "{page}"
    client: reqwest::Client,
    row: Regex,
    max_pages: usize,
}

impl PaginatedListSource {
    pub fn new(name: impl Into<String>, page_url_template: impl Into<String>) -> Self {
        PaginatedListSource {
            name: name.into(),
            page_url_template: page_url_template.into(),
            client: reqwest::Client::new(),
            row: Regex::new(r"(?m)^(\d{1,3}(?:\.\d{1,3}){3}):(\d{1,5})\s*$").unwrap(),
            max_pages: 20,
        }
    }

    fn parse_rows(&self, body: &str) -> Vec<(String, u16)> {
        self.row
            .captures_iter(body)
            .filter_map(|caps| {
                let host = caps.get(1)?.as_str().to_string();
                let port: u16 = caps.get(2)?.as_str().parse().ok()?;
                Some((host, port))
            })
            .collect()
    }
}

#[async_trait]
impl ProxySource for PaginatedListSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self) -> Vec<Proxy> {
        let mut out = Vec::new();
        let mut previous_rows: Option<Vec<(String, u16)>> = None;

        for page in 1..=self.max_pages {
            let url = self.page_url_template.replace("{page}", &page.to_string());
            let body = match self.client.get(&url).send().await {
                Ok(response) => match response.text().await {
                    Ok(body) => body,
                    Err(_) => break,
                },
                Err(_) => break,
            };

            let rows = self.parse_rows(&body);
            if rows.is_empty() {
                break;
            }
            // spec §4.2: stop once the first row of this page equals the
            // first row of the previous one, not once the whole page matches
            // -- a page can repeat its lead row (the loop-back signal) while
            // later rows still churn.
            if previous_rows.as_ref().and_then(|p| p.first()) == rows.first() {
                debug!(source = %self.name, page, "first row repeats previous page, stopping");
                break;
            }

            out.extend(
                rows.iter()
                    .map(|(host, port)| Proxy::new(host.clone(), *port, self.name.clone())),
            );
            previous_rows = Some(rows);
        }

        out
    }
}

/// Periodically polls every registered `ProxySource` and broadcasts each
/// proxy it yields to subscribers (Server Frames). Mirrors the teacher
/// lineage's `DiscoveryBackgroundService` refresh-on-interval-or-shutdown
/// shape, generalized from a single backend poll to a list of pluggable
/// sources.
///
/// Per spec §4.2, dedup only applies within a single source's single
/// `list()` call; the same `host:port` may be announced again on a later
/// refresh, or by a different source, and that's fine -- the ProxyWorker's
/// self-test is idempotent, and §4.3/§9 rely on exactly this: a proxy whose
/// worker terminated can be re-admitted once the Gatherer re-emits it on a
/// future refresh.
pub struct Gatherer {
    sources: Vec<Arc<dyn ProxySource>>,
    refresh_interval: Duration,
    sender: broadcast::Sender<Arc<Proxy>>,
}

impl Gatherer {
    pub fn new(sources: Vec<Arc<dyn ProxySource>>, refresh_interval: Duration) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Gatherer {
            sources,
            refresh_interval,
            sender,
        }
    }

    /// Registers a Server Frame to receive every proxy harvested from now on.
    /// Frames hold only this `Receiver`, never a strong reference back to the
    /// Gatherer, so the Gatherer and its frames can't form a reference cycle.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Proxy>> {
        self.sender.subscribe()
    }

    /// Runs the refresh loop until `shutdown` fires. Intended to be spawned
    /// once for the process's lifetime.
    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            self.refresh_once().await;

            tokio::select! {
                _ = tokio::time::sleep(jittered(self.refresh_interval)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Polls every source once. Dedup is scoped to one source's one `list()`
    /// call (spec §4.2): a fresh `HashSet` per source catches a source
    /// repeating a row within the same scrape, but never suppresses the same
    /// `host:port` reappearing on a later refresh or from another source.
    async fn refresh_once(&self) {
        for source in &self.sources {
            let proxies = source.list().await;
            let mut seen = HashSet::new();
            let mut fresh = 0usize;
            for proxy in proxies {
                if seen.insert(proxy.key()) {
                    fresh += 1;
                    // no active subscribers is routine at startup; nothing to act on.
                    let _ = self.sender.send(Arc::new(proxy));
                }
            }
            info!(source = source.name(), new_proxies = fresh, "gatherer refresh");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticSource {
        name: String,
        hosts: Vec<&'static str>,
    }

    #[async_trait]
    impl ProxySource for StaticSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn list(&self) -> Vec<Proxy> {
            self.hosts
                .iter()
                .map(|host| Proxy::new(host.to_string(), 8080, self.name.clone()))
                .collect()
        }
    }

    #[tokio::test]
    async fn duplicate_proxy_within_one_refresh_is_announced_once() {
        struct RepeatingSource;
        #[async_trait]
        impl ProxySource for RepeatingSource {
            fn name(&self) -> &str {
                "repeating"
            }
            async fn list(&self) -> Vec<Proxy> {
                vec![
                    Proxy::new("1.1.1.1".into(), 8080, "repeating".into()),
                    Proxy::new("1.1.1.1".into(), 8080, "repeating".into()),
                ]
            }
        }

        let gatherer = Gatherer::new(vec![Arc::new(RepeatingSource)], Duration::from_secs(3600));
        let mut rx = gatherer.subscribe();

        gatherer.refresh_once().await;

        assert_eq!(rx.try_recv().unwrap().key(), "1.1.1.1:8080");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn same_proxy_is_re_announced_on_a_later_refresh() {
        let source = Arc::new(StaticSource {
            name: "static".into(),
            hosts: vec!["1.1.1.1", "2.2.2.2"],
        });
        let gatherer = Gatherer::new(vec![source], Duration::from_secs(3600));
        let mut rx = gatherer.subscribe();

        // spec §4.2: cross-refresh duplicates may occur and are handled
        // downstream by the ProxyWorker's idempotent self-test, so a proxy
        // terminated after one refresh can still be re-admitted on the next.
        gatherer.refresh_once().await;
        gatherer.refresh_once().await;

        let mut keys: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok()).map(|p| p.key()).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "1.1.1.1:8080".to_string(),
                "1.1.1.1:8080".to_string(),
                "2.2.2.2:8080".to_string(),
                "2.2.2.2:8080".to_string(),
            ]
        );
    }

    /// Serves one plain-text body per page number (parsed out of a
    /// `...?page=N` query string) over raw HTTP, counting how many page
    /// requests it actually received.
    async fn start_paginated_stub(pages: Vec<&'static str>) -> (std::net::SocketAddr, Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_for_loop = Arc::clone(&hits);
        let pages: Vec<String> = pages.into_iter().map(str::to_string).collect();

        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                let pages = pages.clone();
                let hits = Arc::clone(&hits_for_loop);
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let n = match stream.read(&mut buf).await {
                        Ok(n) => n,
                        Err(_) => return,
                    };
                    let text = String::from_utf8_lossy(&buf[..n]);
                    let request_line = text.lines().next().unwrap_or("");
                    let path = request_line.split_whitespace().nth(1).unwrap_or("");
                    let page: usize = path
                        .rsplit("page=")
                        .next()
                        .and_then(|tail| tail.split(['&', ' ']).next())
                        .and_then(|n| n.parse().ok())
                        .unwrap_or(0);
                    hits.fetch_add(1, Ordering::SeqCst);

                    let body = pages.get(page.saturating_sub(1)).cloned().unwrap_or_default();
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = stream.write_all(head.as_bytes()).await;
                    let _ = stream.write_all(body.as_bytes()).await;
                });
            }
        });

        (addr, hits)
    }

    #[tokio::test]
    async fn paginated_source_stops_when_first_row_repeats_previous_page() {
        // page 1: two distinct rows. page 2: first row repeats page 1's
        // first row, but the second row differs -- spec §4.2 says this must
        // still stop, since only the lead row is compared across pages.
        let (addr, hits) = start_paginated_stub(vec!["1.1.1.1:80\n2.2.2.2:80\n", "1.1.1.1:80\n3.3.3.3:80\n"]).await;

        let source = PaginatedListSource::new("paginated", format!("http://{addr}/list?page={{page}}"));
        let proxies = source.list().await;

        let keys: Vec<String> = proxies.iter().map(|p| p.key()).collect();
        assert_eq!(keys, vec!["1.1.1.1:80".to_string(), "2.2.2.2:80".to_string()]);
        // only page 1 and page 2 were ever requested: page 2's lead row
        // repeating page 1's must stop the scrape before a third request.
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn paginated_source_keeps_going_while_later_rows_still_change() {
        let (addr, hits) = start_paginated_stub(vec!["1.1.1.1:80\n", "2.2.2.2:80\n", "2.2.2.2:80\n"]).await;

        let source = PaginatedListSource::new("paginated", format!("http://{addr}/list?page={{page}}"));
        let proxies = source.list().await;

        let keys: Vec<String> = proxies.iter().map(|p| p.key()).collect();
        assert_eq!(keys, vec!["1.1.1.1:80".to_string(), "2.2.2.2:80".to_string()]);
        // page 3's lead row repeats page 2's, so the scrape stops there.
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
