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

//! Transport adapters (spec §6). Each adapter is a thin translation layer
//! between one wire protocol and `ServerFrame::put_request`/`ResponseSink`;
//! none of them touch the queue, cache, or in-flight map directly. A frame
//! never knows which transport it's paired with.

pub mod stdio;

#[cfg(feature = "transport-ws")]
pub mod ws;

#[cfg(feature = "transport-zmq")]
pub mod zmq;

#[cfg(feature = "transport-redis")]
pub mod redis;
