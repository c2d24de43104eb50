pub(super) mod pair_delete;
pub(super) mod pair_ping;
pub(super) mod shared_types;

use {
    paste::paste,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::result::Result,
};
pub use {pair_delete::*, pair_ping::*, shared_types::*};

/// Errors covering payload parameter conversion issues.
#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    /// Serialization/deserialization issues.
    #[error("Failure serializing/deserializing request parameters: {0}")]
    Serde(#[from] serde_json::Error),

    /// Invalid response tag.
    #[error("Response tag={0} does not match any of the known methods")]
    ResponseTag(u32),
}

/// Relay protocol metadata.
///
/// Every method carries a fixed tag and TTL that the relay uses to decide
/// retention and push behavior for the (opaque) publish.
pub trait RelayProtocolMetadata {
    /// Retrieves relay protocol metadata.
    ///
    /// Every method must return corresponding metadata.
    fn irn_metadata(&self) -> IrnMetadata;
}

pub trait RelayProtocolHelpers {
    type Params;

    /// Converts "unnamed" payload parameters into typed.
    ///
    /// Example: success and error response payload does not specify the
    /// method. Thus the only way to deserialize the data into typed
    /// parameters, is to use the tag to determine the response method.
    fn irn_try_from_tag(value: Value, tag: u32) -> Result<Self::Params, ParamsError>;
}

/// Relay protocol metadata attached to a published method.
#[derive(Debug, Clone, Copy)]
pub struct IrnMetadata {
    pub tag: u32,
    pub ttl: u64,
    pub prompt: bool,
}

// Convenience macro to de-duplicate implementation for different parameter
// sets.
macro_rules! impl_relay_protocol_metadata {
    ($param_type:ty,$meta:ident) => {
        paste! {
            impl RelayProtocolMetadata for $param_type {
                fn irn_metadata(&self) -> IrnMetadata {
                    match self {
                        [<$param_type>]::PairPing(_) => pair_ping::[<IRN_ $meta:upper _METADATA>],
                        [<$param_type>]::PairDelete(_) => pair_delete::[<IRN_ $meta:upper _METADATA>],
                    }
                }
            }
        }
    }
}

// Convenience macro to de-duplicate implementation for different parameter
// sets.
macro_rules! impl_relay_protocol_helpers {
    ($param_type:ty) => {
        paste! {
            impl RelayProtocolHelpers for $param_type {
                type Params = Self;

                fn irn_try_from_tag(value: Value, tag: u32) -> Result<Self::Params, ParamsError> {
                    if tag == pair_ping::IRN_RESPONSE_METADATA.tag {
                        Ok(Self::PairPing(serde_json::from_value(value)?))
                    } else if tag == pair_delete::IRN_RESPONSE_METADATA.tag {
                        Ok(Self::PairDelete(serde_json::from_value(value)?))
                    } else {
                        Err(ParamsError::ResponseTag(tag))
                    }
                }
            }
        }
    };
}

/// Pairing API request parameters.
#[derive(Debug, Serialize, Eq, Deserialize, Clone, PartialEq)]
#[serde(tag = "method", content = "params")]
pub enum RequestParams {
    #[serde(rename = "wc_pairingPing")]
    PairPing(PairPingRequest),

    #[serde(rename = "wc_pairingDelete")]
    PairDelete(PairDeleteRequest),
}

impl RequestParams {
    /// The wire name of the method.
    pub fn method(&self) -> &'static str {
        match self {
            Self::PairPing(_) => METHOD_PAIRING_PING,
            Self::PairDelete(_) => METHOD_PAIRING_DELETE,
        }
    }
}
impl_relay_protocol_metadata!(RequestParams, request);

/// https://www.jsonrpc.org/specification#response_object
///
/// JSON RPC 2.0 response object can either carry success or error data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseParams {
    /// A response with a result.
    #[serde(rename = "result")]
    Success(Value),

    /// A response for a failed request.
    #[serde(rename = "error")]
    Err(Value),
}

/// Typed success response parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseParamsSuccess {
    PairPing(bool),
    PairDelete(bool),
}
impl_relay_protocol_metadata!(ResponseParamsSuccess, response);
impl_relay_protocol_helpers!(ResponseParamsSuccess);

impl TryFrom<ResponseParamsSuccess> for ResponseParams {
    type Error = ParamsError;

    fn try_from(value: ResponseParamsSuccess) -> Result<Self, Self::Error> {
        Ok(Self::Success(serde_json::to_value(value)?))
    }
}

/// Response error data.
#[derive(Debug, Clone, Eq, Serialize, Deserialize, PartialEq)]
pub struct ErrorParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub code: Option<i64>,

    pub message: String,
}

impl ErrorParams {
    pub fn unknown() -> Self {
        Self {
            code: Some(1),
            message: "Unknown Error".to_string(),
        }
    }

    pub fn no_matching_topic(topic: impl std::fmt::Display) -> Self {
        Self {
            code: Some(2),
            message: format!("No matching topic: {topic}"),
        }
    }
}

/// Typed error response parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseParamsError {
    PairPing(ErrorParams),
    PairDelete(ErrorParams),
}
impl_relay_protocol_metadata!(ResponseParamsError, response);
impl_relay_protocol_helpers!(ResponseParamsError);

impl TryFrom<ResponseParamsError> for ResponseParams {
    type Error = ParamsError;

    fn try_from(value: ResponseParamsError) -> Result<Self, Self::Error> {
        Ok(Self::Err(serde_json::to_value(value)?))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use {super::*, anyhow::Result, serde::de::DeserializeOwned, serde_json};

    /// Trims json of the whitespaces and newlines.
    ///
    /// Allows to use "pretty json" in unittest, and still get consistent
    /// results post serialization/deserialization.
    pub fn param_json_trim(json: &str) -> String {
        json.chars()
            .filter(|c| !c.is_whitespace() && *c != '\n')
            .collect::<String>()
    }

    /// Tests input json serialization/deserialization into the specified
    /// type.
    pub fn param_serde_test<T>(json: &str) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
    {
        let expected = param_json_trim(json);
        let deserialized: T = serde_json::from_str(&expected)?;
        let actual = serde_json::to_string(&deserialized)?;

        assert_eq!(expected, actual);

        Ok(())
    }

    #[test]
    fn request_metadata() {
        let ping = RequestParams::PairPing(PairPingRequest {});
        assert_eq!(ping.irn_metadata().tag, 1002);
        assert_eq!(ping.irn_metadata().ttl, 30);
        assert_eq!(ping.method(), "wc_pairingPing");

        let delete = RequestParams::PairDelete(PairDeleteRequest::user_disconnected());
        assert_eq!(delete.irn_metadata().tag, 1001);
        assert_eq!(delete.irn_metadata().ttl, 86400);
        assert_eq!(delete.method(), "wc_pairingDelete");
    }
}
