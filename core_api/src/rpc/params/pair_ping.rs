use {super::IrnMetadata, serde::{Deserialize, Serialize}};

pub const METHOD_PAIRING_PING: &str = "wc_pairingPing";

pub(super) const IRN_REQUEST_METADATA: IrnMetadata = IrnMetadata {
    tag: 1002,
    ttl: 30,
    prompt: false,
};

pub(super) const IRN_RESPONSE_METADATA: IrnMetadata = IrnMetadata {
    tag: 1003,
    ttl: 30,
    prompt: false,
};

#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct PairPingRequest {}

#[cfg(test)]
mod tests {
    use {super::{super::tests::param_serde_test, *}, anyhow::Result};

    #[test]
    fn test_serde_pair_ping_request() -> Result<()> {
        let json = r#"{}"#;

        param_serde_test::<PairPingRequest>(json)
    }
}
