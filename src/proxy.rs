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

use once_cell::sync::OnceCell;
use reqwest::Client;

use crate::fetch::build_proxy_client;

/// One harvested proxy endpoint (spec §3). `elite`/`scraped_at` are
/// diagnostics carried through from the source list; neither affects
/// scheduling or health, only what gets logged/reported.
pub struct Proxy {
    pub host: String,
    pub port: u16,
    pub country: Option<String>,
    pub source: String,
    pub elite: bool,
    /// unix seconds, as harvested; `None` when the source didn't supply one.
    pub scraped_at: Option<i64>,
    connector: OnceCell<Client>,
}

impl Proxy {
    pub fn new(host: String, port: u16, source: String) -> Self {
        Proxy {
            host,
            port,
            country: None,
            source,
            elite: false,
            scraped_at: None,
            connector: OnceCell::new(),
        }
    }

    pub fn with_country(mut self, country: Option<String>) -> Self {
        self.country = country;
        self
    }

    pub fn with_elite(mut self, elite: bool) -> Self {
        self.elite = elite;
        self
    }

    pub fn with_scraped_at(mut self, scraped_at: Option<i64>) -> Self {
        self.scraped_at = scraped_at;
        self
    }

    /// Stable identity used to dedup across Gatherer refreshes and as the
    /// Proxy Registry key (spec §3, §4.2).
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Lazily builds (once) and returns the `reqwest::Client` tunneling all
    /// traffic for this proxy. Built lazily, not at harvest time, since most
    /// harvested proxies are never dequeued before the registry moves on.
    pub fn connector(&self) -> reqwest::Result<&Client> {
        self.connector
            .get_or_try_init(|| build_proxy_client(&self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_host_colon_port() {
        let proxy = Proxy::new("10.0.0.1".into(), 8080, "elite-list".into());
        assert_eq!(proxy.key(), "10.0.0.1:8080");
    }

    #[test]
    fn connector_is_built_lazily_and_cached() {
        let proxy = Proxy::new("10.0.0.1".into(), 8080, "elite-list".into());
        assert!(proxy.connector.get().is_none());
        let first = proxy.connector().unwrap() as *const Client;
        let second = proxy.connector().unwrap() as *const Client;
        assert_eq!(first, second);
    }
}
