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

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use proxybroker::config;
use proxybroker::gatherer::{EliteListSource, Gatherer, PaginatedListSource, ProxySource};
use proxybroker::transport;
use proxybroker::worker::Semaphores;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Transport {
    Stdio,
    #[cfg(feature = "transport-ws")]
    Ws,
    #[cfg(feature = "transport-zmq")]
    Zmq,
    #[cfg(feature = "transport-redis")]
    Redis,
}

/// A proxied HTTP fetch broker: clients submit URL fetches over one of
/// several transports, the broker routes each one through a rotating pool
/// of harvested, untrusted HTTP proxies.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the broker's YAML config file.
    #[arg(short, long, value_name = "file", default_value = "broker.yaml")]
    config: PathBuf,

    /// Which transport adapter to serve on.
    #[arg(short, long, value_enum, default_value = "stdio")]
    transport: Transport,

    /// Tracing filter (e.g. "info", "proxybroker=debug").
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON rather than compact text.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_json);

    let loaded = config::load(args.config.to_string_lossy().as_ref())?;
    let snapshot = loaded.snapshot;

    let semaphores = Arc::new(Semaphores::new(
        snapshot.proxy_test_max_concurrent_conn,
        snapshot.fetcher_global_concurrent_conn,
    ));

    let mut sources: Vec<Arc<dyn ProxySource>> = vec![
        Arc::new(EliteListSource::new(
            "free-proxy-list-elite",
            "https://free-proxy-list.net/",
        )),
        Arc::new(PaginatedListSource::new(
            "proxyscrape-paginated",
            "https://api.proxyscrape.com/v2/?page={page}",
        )),
    ];
    for (i, url) in loaded.extra_proxy_sources.into_iter().enumerate() {
        sources.push(Arc::new(EliteListSource::new(format!("extra-{i}"), url)));
    }

    let gatherer = Arc::new(Gatherer::new(sources, snapshot.proxy_refresh_list_interval));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gatherer_for_refresh = Arc::clone(&gatherer);
    let gatherer_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        gatherer_for_refresh.start(gatherer_shutdown).await;
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    match args.transport {
        Transport::Stdio => {
            transport::stdio::serve(snapshot, semaphores, &gatherer, shutdown_rx).await;
        }
        #[cfg(feature = "transport-ws")]
        Transport::Ws => {
            let host = snapshot.server_websocket_host.clone();
            let port = snapshot.server_websocket_port;
            if let Err(err) = transport::ws::serve(&host, port, snapshot, semaphores, gatherer, shutdown_rx).await {
                error!(error = %err, "websocket transport exited with error");
            }
        }
        #[cfg(feature = "transport-zmq")]
        Transport::Zmq => {
            let endpoint = format!("tcp://{}:{}", snapshot.server_websocket_host, snapshot.server_websocket_port);
            if let Err(err) = transport::zmq::serve(&endpoint, snapshot, semaphores, &gatherer, shutdown_rx).await {
                error!(error = %err, "zmq transport exited with error");
            }
        }
        #[cfg(feature = "transport-redis")]
        Transport::Redis => {
            let redis_url = "redis://127.0.0.1:6379".to_string();
            let request_key = snapshot.server_redis_request_key.clone();
            let response_prefix = snapshot.server_redis_response_key_prefix.clone();
            if let Err(err) = transport::redis::serve(
                &redis_url,
                &request_key,
                &response_prefix,
                snapshot,
                semaphores,
                &gatherer,
                shutdown_rx,
            )
            .await
            {
                error!(error = %err, "redis transport exited with error");
            }
        }
    }

    Ok(())
}

fn init_logging(filter: &str, json: bool) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
