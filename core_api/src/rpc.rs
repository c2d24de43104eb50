//! JSON RPC types for the client-to-client methods carried inside
//! envelopes. The relay never sees these: they travel encrypted as opaque
//! messages.

mod params;

use {
    relay_rpc::domain::MessageId,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::{fmt::Debug, sync::Arc},
};

pub use params::*;

/// Version of the JSON RPC protocol that we're implementing.
pub const JSON_RPC_VERSION_STR: &str = "2.0";

pub static JSON_RPC_VERSION: once_cell::sync::Lazy<Arc<str>> =
    once_cell::sync::Lazy::new(|| Arc::from(JSON_RPC_VERSION_STR));

/// Errors covering payload validation problems.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid JSON RPC version")]
    JsonRpcVersion,
}

/// Data structure representing a JSON RPC request with a known method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// ID this message corresponds to.
    pub id: MessageId,

    /// The JSON RPC version.
    pub jsonrpc: Arc<str>,

    /// The parameters required to fulfill this request.
    #[serde(flatten)]
    pub params: RequestParams,
}

impl Request {
    /// Create a new instance.
    pub fn new(id: MessageId, params: RequestParams) -> Self {
        Self {
            id,
            jsonrpc: JSON_RPC_VERSION_STR.into(),
            params,
        }
    }

    /// Validates the request payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.jsonrpc.as_ref() != JSON_RPC_VERSION_STR {
            return Err(ValidationError::JsonRpcVersion);
        }

        Ok(())
    }
}

/// Request shape used for inbound dispatch: the method as a plain string,
/// the parameters opaque. Outer clients (Sign, Auth) register methods this
/// crate knows nothing about, so inbound parsing cannot assume a closed
/// method set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRequest {
    /// ID this message corresponds to.
    pub id: MessageId,

    /// The JSON RPC version.
    pub jsonrpc: Arc<str>,

    /// The method name.
    pub method: String,

    /// Opaque method parameters.
    #[serde(default)]
    pub params: Value,
}

/// Data structure representing a JSON RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// ID this message corresponds to.
    pub id: MessageId,

    /// RPC version.
    pub jsonrpc: Arc<str>,

    /// The parameters required to fulfill this response.
    #[serde(flatten)]
    pub params: ResponseParams,
}

impl Response {
    /// Create a new instance.
    pub fn new(id: MessageId, params: ResponseParams) -> Self {
        Self {
            id,
            jsonrpc: JSON_RPC_VERSION.clone(),
            params,
        }
    }

    /// Validates the parameters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.jsonrpc.as_ref() != JSON_RPC_VERSION_STR {
            return Err(ValidationError::JsonRpcVersion);
        }

        Ok(())
    }
}

/// Enum representing a decrypted JSON RPC payload.
///
/// Discrimination is structural: a request carries a `method`, a response
/// carries a `result` or an `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawPayload {
    Request(RawRequest),
    Response(Response),
}

impl RawPayload {
    pub fn id(&self) -> MessageId {
        match self {
            Self::Request(request) => request.id,
            Self::Response(response) => response.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_request_serialization() {
        let request = Request::new(
            1.into(),
            RequestParams::PairPing(PairPingRequest {}),
        );

        let serialized = serde_json::to_string(&request).unwrap();

        assert_eq!(
            serialized,
            r#"{"id":1,"jsonrpc":"2.0","method":"wc_pairingPing","params":{}}"#
        );
    }

    #[test]
    fn raw_payload_discrimination() {
        let request: RawPayload = serde_json::from_str(
            r#"{"id":1,"jsonrpc":"2.0","method":"wc_somethingCustom","params":{"x":1}}"#,
        )
        .unwrap();
        assert!(matches!(&request, RawPayload::Request(r) if r.method == "wc_somethingCustom"));

        let success: RawPayload =
            serde_json::from_str(r#"{"id":2,"jsonrpc":"2.0","result":true}"#).unwrap();
        assert!(matches!(
            &success,
            RawPayload::Response(Response {
                params: ResponseParams::Success(_),
                ..
            })
        ));

        let error: RawPayload = serde_json::from_str(
            r#"{"id":3,"jsonrpc":"2.0","error":{"code":6000,"message":"User disconnected"}}"#,
        )
        .unwrap();
        assert!(matches!(
            &error,
            RawPayload::Response(Response {
                params: ResponseParams::Err(_),
                ..
            })
        ));
    }

    #[test]
    fn float_ids_are_accepted() {
        let payload: RawPayload =
            serde_json::from_str(r#"{"id":1675757972688031.0,"jsonrpc":"2.0","result":true}"#)
                .unwrap();

        assert_eq!(payload.id(), 1675757972688031.into());
    }
}
