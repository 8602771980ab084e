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

/// Errors that can stop the broker from starting at all. This sits strictly
/// outside the JSON-RPC error taxonomy in spec §7: it never reaches a
/// client, it only ever surfaces on the operator's stderr/log sink.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("failed to parse config file {path}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("transport '{transport}' failed to bind {addr}")]
    TransportBind {
        transport: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport '{transport}' failed to connect to backing store")]
    TransportConnect {
        transport: &'static str,
        #[source]
        source: anyhow::Error,
    },
}
