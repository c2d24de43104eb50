//! Pairing URI (EIP-1328) parsing and construction:
//! `wc:<topic>@<version>?symKey=<hex>&relay-protocol=<protocol>`.

use {
    crate::{
        crypto::payload::{SymKey, SYM_KEY_LENGTH},
        rpc::RelayProtocol,
    },
    data_encoding::HEXLOWER_PERMISSIVE,
    regex::Regex,
    relay_rpc::domain::{DecodedTopic, Topic},
    std::{
        collections::BTreeMap,
        fmt::{self, Debug, Display, Formatter},
        str::FromStr,
    },
    url::Url,
};

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ParseError {
    #[error("Expecting protocol \"wc\" but \"{protocol}\" is found.")]
    UnexpectedProtocol { protocol: String },

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error("Failed to parse topic and version")]
    InvalidTopicAndVersion,

    #[error("Invalid topic")]
    InvalidTopic,

    #[error("Relay protocol not found")]
    RelayProtocolNotFound,

    #[error("Key not found")]
    KeyNotFound,

    #[error("Invalid symmetric key")]
    InvalidKey,
}

/// Query parameters of a pairing URI.
///
/// Parameters outside the specified set are preserved for round-tripping
/// and otherwise ignored.
#[derive(Clone, Eq, PartialEq)]
pub struct PairingParams {
    pub relay: RelayProtocol,
    pub sym_key: SymKey,
    pub unknown: BTreeMap<String, String>,
}

/// https://github.com/ethereum/EIPs/blob/master/EIPS/eip-1328.md
#[derive(Clone, Eq, PartialEq)]
pub struct PairingUri {
    pub topic: Topic,
    pub version: String,
    pub params: PairingParams,
}

impl PairingUri {
    pub fn new(topic: Topic, sym_key: SymKey, relay: RelayProtocol) -> Self {
        Self {
            topic,
            version: "2".to_owned(),
            params: PairingParams {
                relay,
                sym_key,
                unknown: BTreeMap::new(),
            },
        }
    }

    fn parse_topic_and_version(path: &str) -> Result<(Topic, String), ParseError> {
        let caps = Regex::new(r"^(?P<topic>[[:word:]-]+)@(?P<version>\d+)$")
            .expect("invalid regex")
            .captures(path)
            .ok_or(ParseError::InvalidTopicAndVersion)?;

        let topic = caps
            .name("topic")
            .ok_or(ParseError::InvalidTopicAndVersion)?
            .as_str();
        let version = caps
            .name("version")
            .ok_or(ParseError::InvalidTopicAndVersion)?
            .as_str()
            .to_owned();

        // A topic is always the hex form of 32 bytes. The version is
        // recorded as-is; enforcing it is the caller's decision.
        let topic: DecodedTopic = topic.parse().map_err(|_| ParseError::InvalidTopic)?;

        Ok((Topic::from(topic), version))
    }

    fn parse_params(url: &Url) -> Result<PairingParams, ParseError> {
        let mut relay_protocol: Option<String> = None;
        let mut sym_key: Option<String> = None;
        let mut relay_data: Option<String> = None;
        let mut unknown = BTreeMap::new();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "relay-protocol" => relay_protocol = Some((*value).to_owned()),
                "symKey" => sym_key = Some((*value).to_owned()),
                "relay-data" => relay_data = Some((*value).to_owned()),
                _ => {
                    unknown.insert((*key).to_owned(), (*value).to_owned());
                }
            }
        }

        let sym_key = sym_key.ok_or(ParseError::KeyNotFound)?;
        let decoded = HEXLOWER_PERMISSIVE
            .decode(sym_key.as_bytes())
            .map_err(|_| ParseError::InvalidKey)?;

        if decoded.len() != SYM_KEY_LENGTH {
            return Err(ParseError::InvalidKey);
        }

        let sym_key: SymKey = decoded.try_into().map_err(|_| ParseError::InvalidKey)?;

        Ok(PairingParams {
            relay: RelayProtocol {
                protocol: relay_protocol.ok_or(ParseError::RelayProtocolNotFound)?,
                data: relay_data,
            },
            sym_key,
            unknown,
        })
    }
}

impl Debug for PairingUri {
    /// Debug with the key masked.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingUri")
            .field("topic", &self.topic)
            .field("version", &self.version)
            .field("relay-protocol", &self.params.relay.protocol)
            .field("symKey", &"***")
            .field(
                "relay-data",
                &self.params.relay.data.as_deref().unwrap_or(""),
            )
            .finish()
    }
}

impl Display for PairingUri {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wc:{}@{}?relay-protocol={}",
            self.topic, self.version, self.params.relay.protocol
        )?;

        if let Some(data) = &self.params.relay.data {
            write!(f, "&relay-data={data}")?;
        }

        write!(f, "&symKey={}", HEXLOWER_PERMISSIVE.encode(&self.params.sym_key))?;

        for (key, value) in &self.params.unknown {
            write!(f, "&{key}={value}")?;
        }

        Ok(())
    }
}

impl FromStr for PairingUri {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = Url::from_str(s)?;

        if url.scheme() != "wc" {
            return Err(ParseError::UnexpectedProtocol {
                protocol: url.scheme().to_owned(),
            });
        }

        let (topic, version) = Self::parse_topic_and_version(url.path())?;

        Ok(Self {
            topic,
            version,
            params: Self::parse_params(&url)?,
        })
    }
}
