use serde::{Deserialize, Serialize};

/// Default relay protocol carried in pairing URIs.
pub const RELAY_PROTOCOL: &str = "iridium";

/// Relay protocol options attached to a pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayProtocol {
    pub protocol: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<String>,
}

impl Default for RelayProtocol {
    fn default() -> Self {
        Self {
            protocol: RELAY_PROTOCOL.to_owned(),
            data: None,
        }
    }
}

/// Peer metadata exchanged over an established pairing.
#[derive(Debug, Serialize, PartialEq, Eq, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    pub description: String,
    pub url: String,
    pub icons: Vec<String>,
}

#[cfg(test)]
mod tests {
    use {super::{super::tests::param_serde_test, *}, anyhow::Result};

    #[test]
    fn test_serde_metadata() -> Result<()> {
        let json = r#"
        {
            "name": "Example Dapp",
            "description": "An example dapp",
            "url": "https://example.com",
            "icons": ["https://example.com/icon.png"]
        }
        "#;

        param_serde_test::<Metadata>(json)
    }

    #[test]
    fn test_relay_protocol_defaults() {
        let relay = RelayProtocol::default();

        assert_eq!(relay.protocol, "iridium");
        assert_eq!(
            serde_json::to_string(&relay).unwrap(),
            r#"{"protocol":"iridium"}"#
        );
    }
}
