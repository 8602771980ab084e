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

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fetch;
pub mod frame;
pub mod gatherer;
pub mod inflight;
pub mod jsonrpc;
pub mod proxy;
pub mod queue;
pub mod transport;
pub mod worker;

pub use config::ConfigSnapshot;
pub use frame::ServerFrame;
pub use gatherer::Gatherer;
pub use proxy::Proxy;
pub use worker::Semaphores;
