use {super::IrnMetadata, serde::{Deserialize, Serialize}};

pub const METHOD_PAIRING_DELETE: &str = "wc_pairingDelete";

pub(super) const IRN_REQUEST_METADATA: IrnMetadata = IrnMetadata {
    tag: 1001,
    ttl: 86400,
    prompt: false,
};

pub(super) const IRN_RESPONSE_METADATA: IrnMetadata = IrnMetadata {
    tag: 1000,
    ttl: 86400,
    prompt: false,
};

/// Reason code carried by a locally initiated pairing delete.
pub const USER_DISCONNECTED_CODE: i64 = 6000;

#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PairDeleteRequest {
    pub code: i64,
    pub message: String,
}

impl PairDeleteRequest {
    pub fn user_disconnected() -> Self {
        Self {
            code: USER_DISCONNECTED_CODE,
            message: "User disconnected".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::{super::tests::param_serde_test, *}, anyhow::Result};

    #[test]
    fn test_serde_pair_delete_request() -> Result<()> {
        let json = r#"
        {
            "code": 6000,
            "message": "User disconnected"
        }
        "#;

        param_serde_test::<PairDeleteRequest>(json)
    }
}
