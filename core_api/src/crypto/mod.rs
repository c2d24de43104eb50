pub mod keychain;
pub mod payload;

pub use {
    keychain::{derive_topic, Keychain},
    payload::{EnvelopeType, PayloadError, SymKey},
};

use {
    crate::error::{Error, Result},
    data_encoding::HEXLOWER_PERMISSIVE,
    relay_rpc::domain::Topic,
    std::sync::Arc,
};

/// Envelope encryption and decryption bound to the [`Keychain`].
#[derive(Debug, Clone)]
pub struct Crypto {
    keychain: Arc<Keychain>,
}

impl Crypto {
    pub fn new(keychain: Arc<Keychain>) -> Self {
        Self { keychain }
    }

    pub fn keychain(&self) -> &Arc<Keychain> {
        &self.keychain
    }

    /// Encrypts `payload` with the symmetric key stored for `topic` and
    /// encodes the envelope for transport.
    pub fn encode(
        &self,
        topic: &Topic,
        payload: &str,
        envelope_type: EnvelopeType,
    ) -> Result<String> {
        let key = self.keychain.get_sym_key(topic)?;

        Ok(payload::encrypt_and_encode(envelope_type, payload, &key)?)
    }

    /// Decodes and decrypts a type 0 envelope received on `topic`.
    ///
    /// Type 1 envelopes carry a sender public key and need the receiver key
    /// for the agreement, see [`Crypto::decode_type1`].
    pub fn decode(&self, topic: &Topic, message: &str) -> Result<String> {
        let envelope = payload::decode(message)?;

        match &envelope.envelope_type {
            EnvelopeType::Type0 => {
                let key = self.keychain.get_sym_key(topic)?;

                Ok(payload::decrypt_envelope(&envelope, &key)?)
            }

            EnvelopeType::Type1 { .. } => Err(Error::InvalidEnvelope(
                "type 1 envelope requires the receiver public key".into(),
            )),
        }
    }

    /// Decodes and decrypts a type 1 envelope: derives the symmetric key
    /// from our keypair (addressed by `receiver_public_key`) and the sender
    /// public key carried in the envelope, stores it under `topic`, then
    /// decrypts.
    pub fn decode_type1(
        &self,
        topic: &Topic,
        message: &str,
        receiver_public_key: &str,
    ) -> Result<String> {
        let envelope = payload::decode(message)?;

        let EnvelopeType::Type1 { sender_public_key } = &envelope.envelope_type else {
            return Err(Error::InvalidEnvelope("expected a type 1 envelope".into()));
        };

        let sender_hex = HEXLOWER_PERMISSIVE.encode(sender_public_key);
        let derived =
            self.keychain
                .generate_shared_key(receiver_public_key, &sender_hex, Some(topic.clone()))?;
        let key = self.keychain.get_sym_key(&derived)?;

        Ok(payload::decrypt_envelope(&envelope, &key)?)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::storage::MemoryKvStorage, anyhow::Result};

    fn crypto() -> Crypto {
        Crypto::new(Arc::new(
            Keychain::new(Arc::new(MemoryKvStorage::new())).unwrap(),
        ))
    }

    #[test]
    fn encode_decode_roundtrip() -> Result<()> {
        let crypto = crypto();
        let topic = crypto.keychain().set_sym_key([9u8; 32])?;

        let payload = r#"{"id":1}"#;
        let encoded = crypto.encode(&topic, payload, EnvelopeType::Type0)?;

        assert_eq!(crypto.decode(&topic, &encoded)?, payload);

        Ok(())
    }

    #[test]
    fn unknown_topic_is_rejected() {
        let crypto = crypto();
        let topic = Topic::generate();

        assert!(matches!(
            crypto.encode(&topic, "payload", EnvelopeType::Type0),
            Err(Error::NoMatchingKey(_))
        ));
    }

    #[test]
    fn tampered_message_fails_authentication() -> Result<()> {
        let crypto = crypto();
        let topic = crypto.keychain().set_sym_key([8u8; 32])?;

        let encoded = crypto.encode(&topic, "payload", EnvelopeType::Type0)?;

        let mut data = base64::Engine::decode(
            &base64::prelude::BASE64_STANDARD,
            encoded.as_bytes(),
        )?;
        if let Some(byte) = data.last_mut() {
            *byte ^= 0xff;
        }
        let tampered =
            base64::Engine::encode(&base64::prelude::BASE64_STANDARD, &data);

        assert!(matches!(
            crypto.decode(&topic, &tampered),
            Err(Error::AuthenticationFailed)
        ));

        Ok(())
    }

    #[test]
    fn type1_decode_derives_shared_key() -> Result<()> {
        let sender = crypto();
        let receiver = crypto();

        let sender_public = sender.keychain().generate_key_pair()?;
        let receiver_public = receiver.keychain().generate_key_pair()?;

        // The sender derives the shared key against the receiver public key
        // and seals a type 1 envelope carrying its own public key.
        let topic = sender
            .keychain()
            .generate_shared_key(&sender_public, &receiver_public, None)?;

        let sender_key_bytes: crate::crypto::payload::PubKey = {
            let decoded = HEXLOWER_PERMISSIVE.decode(sender_public.as_bytes())?;
            decoded.try_into().expect("32-byte public key")
        };

        let key = sender.keychain().get_sym_key(&topic)?;
        let encoded = payload::encrypt_and_encode(
            EnvelopeType::Type1 {
                sender_public_key: sender_key_bytes,
            },
            r#"{"id":42}"#,
            &key,
        )?;

        // The receiver only has its own keypair and the envelope.
        let decoded = receiver.decode_type1(&topic, &encoded, &receiver_public)?;
        assert_eq!(decoded, r#"{"id":42}"#);

        // The derived key is now stored under the topic, so type 0 traffic
        // can continue on it.
        assert!(receiver.keychain().has_keys(topic.as_ref()));

        Ok(())
    }
}
