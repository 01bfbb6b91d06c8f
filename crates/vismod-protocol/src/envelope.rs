//! RPC envelopes and result encoding.
//!
//! Host → sandbox: `{token, type, requestId, props}`.
//! Sandbox → host: `{token, type, requestId, result: {ok, ...}}`.
//! Boot signal (once): `{token, ready: true}`.
//!
//! Results are `Result<Value, RpcError>` in Rust and `{ok:true, ...}` /
//! `{ok:false, error, message}` on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ErrorKind, ProtocolError, RpcError};
use crate::token::SessionToken;
use crate::track::MethodSpec;

/// Message type names.
pub mod message_type {
    pub const INIT_TRACK: &str = "initTrack";
    pub const SET_MATRIX_FOR_INSTANCE: &str = "setMatrixForInstance";
    pub const INVOKE_ON_INSTANCE: &str = "invokeOnInstance";
    pub const INTROSPECT_MODULE: &str = "introspectModule";
    pub const DESTROY_TRACK: &str = "destroyTrack";
    pub const DESTROY_INSTANCE: &str = "destroyInstance";
    pub const WORKSPACE_CHANGED: &str = "workspaceChanged";
    pub const SDK_READ_ASSET_TEXT: &str = "sdk:readAssetText";
    pub const SDK_LIST_ASSETS: &str = "sdk:listAssets";
}

// ─── Envelopes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub token: SessionToken,
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: String,
    #[serde(default)]
    pub props: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub token: SessionToken,
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: String,
    pub result: Value,
}

impl ResponseEnvelope {
    pub fn new(
        token: SessionToken,
        kind: impl Into<String>,
        request_id: impl Into<String>,
        result: Result<Value, RpcError>,
    ) -> Self {
        Self {
            token,
            kind: kind.into(),
            request_id: request_id.into(),
            result: encode_result(result),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootSignal {
    pub token: SessionToken,
    pub ready: bool,
}

impl BootSignal {
    pub fn ready(token: SessionToken) -> Self {
        Self { token, ready: true }
    }
}

/// Anything that travels over a link.
///
/// Variant order matters for untagged decoding: a response is the only frame
/// carrying `result`, a request the only one carrying `type` without it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Response(ResponseEnvelope),
    Request(RequestEnvelope),
    Ready(BootSignal),
}

impl Frame {
    pub fn token(&self) -> &SessionToken {
        match self {
            Frame::Response(r) => &r.token,
            Frame::Request(r) => &r.token,
            Frame::Ready(b) => &b.token,
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

// ─── Result encoding ────────────────────────────────────────────────────

/// Encode a handler result as the wire `{ok, ...}` object.
pub fn encode_result(result: Result<Value, RpcError>) -> Value {
    match result {
        Ok(Value::Object(mut map)) => {
            map.insert("ok".to_string(), Value::Bool(true));
            Value::Object(map)
        }
        Ok(Value::Null) => json!({ "ok": true }),
        Ok(other) => json!({ "ok": true, "value": other }),
        Err(e) => json!({ "ok": false, "error": e.kind, "message": e.message }),
    }
}

/// Decode a wire `{ok, ...}` object back into a `Result`.
///
/// Unknown error codes from a foreign sandbox decode as `SANDBOX_FAULT`.
pub fn decode_result(result: Value) -> Result<Value, RpcError> {
    let Value::Object(mut map) = result else {
        return Err(RpcError::new(
            ErrorKind::SandboxFault,
            "malformed result: expected an object",
        ));
    };
    match map.remove("ok") {
        Some(Value::Bool(true)) => Ok(Value::Object(map)),
        Some(Value::Bool(false)) => {
            let kind = map
                .get("error")
                .cloned()
                .and_then(|v| serde_json::from_value::<ErrorKind>(v).ok())
                .unwrap_or(ErrorKind::SandboxFault);
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| kind.to_string());
            Err(RpcError::new(kind, message))
        }
        _ => Err(RpcError::new(
            ErrorKind::SandboxFault,
            "malformed result: missing 'ok' flag",
        )),
    }
}

// ─── Reply payloads ─────────────────────────────────────────────────────

/// Success payload of `introspectModule`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrospectReply {
    pub callable_methods: Vec<String>,
    pub name: String,
    pub category: String,
    pub methods: Vec<MethodSpec>,
}

/// Success payload of `sdk:readAssetText`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadAssetTextReply {
    #[serde(default)]
    pub text: Option<String>,
}

/// Success payload of `sdk:listAssets`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListAssetsReply {
    #[serde(default)]
    pub entries: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> SessionToken {
        SessionToken::from_string("t-1")
    }

    #[test]
    fn test_request_wire_shape() {
        let frame = Frame::Request(RequestEnvelope {
            token: token(),
            kind: message_type::INIT_TRACK.into(),
            request_id: "r-1".into(),
            props: json!({"assetsBaseUrl": "http://x/"}),
        });
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["token"], "t-1");
        assert_eq!(value["type"], "initTrack");
        assert_eq!(value["requestId"], "r-1");
        assert_eq!(value["props"]["assetsBaseUrl"], "http://x/");
    }

    #[test]
    fn test_untagged_frame_decoding() {
        let response =
            r#"{"token":"t-1","type":"initTrack","requestId":"r-1","result":{"ok":true}}"#;
        assert!(matches!(Frame::from_json(response).unwrap(), Frame::Response(_)));

        let request = r#"{"token":"t-1","type":"destroyTrack","requestId":"r-2"}"#;
        match Frame::from_json(request).unwrap() {
            Frame::Request(r) => {
                assert_eq!(r.kind, "destroyTrack");
                assert!(r.props.is_null());
            }
            other => panic!("expected request, got {other:?}"),
        }

        let boot = r#"{"token":"t-1","ready":true}"#;
        assert!(matches!(Frame::from_json(boot).unwrap(), Frame::Ready(b) if b.ready));
    }

    #[test]
    fn test_garbage_frame_rejected() {
        assert!(Frame::from_json(r#"{"hello":"world"}"#).is_err());
    }

    #[test]
    fn test_encode_ok_merges_payload() {
        let encoded = encode_result(Ok(json!({"entries": ["a.txt"]})));
        assert_eq!(encoded, json!({"ok": true, "entries": ["a.txt"]}));
        assert_eq!(encode_result(Ok(Value::Null)), json!({"ok": true}));
    }

    #[test]
    fn test_encode_error() {
        let encoded = encode_result(Err(RpcError::new(ErrorKind::UnknownMessageType, "nope")));
        assert_eq!(
            encoded,
            json!({"ok": false, "error": "UNKNOWN_MESSAGE_TYPE", "message": "nope"})
        );
    }

    #[test]
    fn test_decode_result() {
        assert_eq!(
            decode_result(json!({"ok": true, "text": "hi"})).unwrap(),
            json!({"text": "hi"})
        );
        let err = decode_result(json!({"ok": false, "error": "INSTANCE_NOT_FOUND"})).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InstanceNotFound);
        assert_eq!(err.message, "INSTANCE_NOT_FOUND");
    }

    #[test]
    fn test_decode_unknown_error_code_is_fault() {
        let err = decode_result(json!({"ok": false, "error": "WHATEVER", "message": "m"}))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::SandboxFault);
        assert_eq!(err.message, "m");
    }

    #[test]
    fn test_decode_malformed() {
        assert!(decode_result(json!("nope")).is_err());
        assert!(decode_result(json!({"text": "no flag"})).is_err());
    }
}
