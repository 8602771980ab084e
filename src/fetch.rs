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

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, StatusCode};

/// Redirects are capped to bound worst-case latency against a malicious or
/// looping redirect chain; exceeding it collapses into the same
/// transport-failure sentinel as any other unreachable outcome, since it
/// can't succeed and isn't the target site's fault to report as a status.
const MAX_REDIRECTS: usize = 10;

pub struct FetchOutcome {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Issues one HTTP request, optionally tunneled through `connector`
/// (a client pre-configured with a proxy), with an overall wall-clock
/// timeout. Spec §4.1: every transport-level failure — connection refused,
/// proxy-tunnel failure, timeout, malformed framing, decode failure, too
/// many redirects — collapses to `None`. A non-2xx status is returned as-is;
/// only transport failure implicates the proxy.
pub async fn fetch_one(url: &str, timeout: Duration, connector: Option<&Client>) -> Option<FetchOutcome> {
    let owned_client;
    let client = match connector {
        Some(client) => client,
        None => {
            owned_client = Client::builder()
                .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
                .build()
                .ok()?;
            &owned_client
        }
    };

    let response = tokio::time::timeout(timeout, client.get(url).send())
        .await
        .ok()? // timed out
        .ok()?; // transport error (connect refused, tunnel failure, TLS, ...)

    let status = response.status();
    let body = tokio::time::timeout(timeout, response.bytes()).await.ok()?.ok()?;
    Some(FetchOutcome { status, body })
}

/// Builds a `Client` tunneling all traffic through one HTTP forward proxy,
/// used as a Proxy record's lazily-created Connector.
pub fn build_proxy_client(host: &str, port: u16) -> reqwest::Result<Client> {
    let proxy_url = format!("http://{host}:{port}");
    Client::builder()
        .proxy(reqwest::Proxy::all(proxy_url)?)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
}
