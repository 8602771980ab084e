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

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INTERNAL_ERROR: i64 = -32000;

/// One inbound JSON-RPC 2.0 request object.
///
/// `id` missing or JSON `null` marks a notification: the caller expects no
/// response, though one is still produced internally and handed to a
/// transport's `process_response`.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestObject {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RequestObject {
    pub fn is_notification(&self) -> bool {
        matches!(self.id, None | Some(Value::Null))
    }

    /// The id to echo back in a response, `Value::Null` for notifications.
    pub fn response_id(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseObject {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl ResponseObject {
    pub fn ok(id: Value, result: Value) -> Self {
        ResponseObject {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        ResponseObject {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn parse_error() -> Self {
        ResponseObject::err(Value::Null, PARSE_ERROR, "Parse error")
    }

    pub fn method_not_found(id: Value) -> Self {
        ResponseObject::err(id, METHOD_NOT_FOUND, "Method not found")
    }
}

/// Deserialize one wire message into a request object, per the adapter
/// contract in spec §6: a deserialize failure is always reported as a
/// parse-error response with a null id.
pub fn deserialize(bytes: &[u8]) -> Result<RequestObject, ResponseObject> {
    serde_json::from_slice(bytes).map_err(|_| ResponseObject::parse_error())
}

pub fn serialize(response: &ResponseObject) -> Vec<u8> {
    // a ResponseObject always serializes; treat failure as unreachable rather
    // than threading an error through every transport's hot path.
    serde_json::to_vec(response).unwrap_or_else(|_| b"{}".to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_has_no_id() {
        let req: RequestObject =
            serde_json::from_str(r#"{"method":"fetch","params":{}}"#).unwrap();
        assert!(req.is_notification());
        let req: RequestObject =
            serde_json::from_str(r#"{"id":null,"method":"fetch","params":{}}"#).unwrap();
        assert!(req.is_notification());
        let req: RequestObject =
            serde_json::from_str(r#"{"id":"r1","method":"fetch","params":{}}"#).unwrap();
        assert!(!req.is_notification());
    }

    #[test]
    fn parse_error_has_null_id() {
        let err = deserialize(b"not json").unwrap_err();
        assert_eq!(err.id, Value::Null);
        assert_eq!(err.error.unwrap().code, PARSE_ERROR);
    }

    #[test]
    fn method_not_found_round_trips() {
        let resp = ResponseObject::method_not_found(Value::String("r1".into()));
        let bytes = serialize(&resp);
        let v: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["error"]["code"], -32601);
        assert_eq!(v["id"], "r1");
    }
}
