use {
    crate::{
        crypto::payload::{SymKey, SYM_KEY_LENGTH},
        error::{Error, Result},
        storage::KeyValueStorage,
        store::Store,
    },
    dashmap::DashMap,
    data_encoding::HEXLOWER_PERMISSIVE,
    hkdf::Hkdf,
    rand::rngs::OsRng,
    relay_rpc::domain::{DecodedTopic, Topic},
    sha2::{Digest, Sha256},
    std::sync::Arc,
    x25519_dalek::{PublicKey, StaticSecret},
};

const KEYCHAIN_STORE: &str = "keychain";

/// Derives the topic addressing a symmetric key: `sha256(key)`, hex encoded.
pub fn derive_topic(key: &SymKey) -> Topic {
    Topic::from(DecodedTopic(Sha256::digest(key).into()))
}

/// Persistent map of secrets.
///
/// Symmetric keys are stored under their topic, X25519 private keys under
/// the hex encoding of their public key. The keychain holds the only
/// persistent copy of each secret; callers receive by-value copies and must
/// not cache them.
pub struct Keychain {
    keys: DashMap<String, SymKey>,
    store: Store<String>,
}

impl std::fmt::Debug for Keychain {
    // Key material stays out of debug output.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keychain(keys={})", self.keys.len())
    }
}

impl Keychain {
    /// Creates the keychain, rehydrating previously persisted keys.
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Result<Self> {
        let store = Store::<String>::new(KEYCHAIN_STORE, storage);
        let keys = DashMap::new();

        for tag in store.keys()? {
            if let Some(encoded) = store.try_get(&tag)? {
                keys.insert(tag, decode_key(&encoded)?);
            }
        }

        Ok(Self { keys, store })
    }

    fn set(&self, tag: &str, key: SymKey) -> Result<()> {
        self.store.set(tag, &HEXLOWER_PERMISSIVE.encode(&key))?;
        self.keys.insert(tag.to_owned(), key);

        Ok(())
    }

    fn get(&self, tag: &str) -> Result<SymKey> {
        self.keys
            .get(tag)
            .map(|key| *key)
            .ok_or_else(|| Error::NoMatchingKey(tag.to_owned()))
    }

    /// Persists the key under its derived topic. Idempotent.
    pub fn set_sym_key(&self, key: SymKey) -> Result<Topic> {
        let topic = derive_topic(&key);
        self.set(topic.as_ref(), key)?;

        Ok(topic)
    }

    /// Persists the key under a topic known out-of-band, e.g. from a pairing
    /// URI.
    pub fn set_sym_key_for_topic(&self, key: SymKey, topic: &Topic) -> Result<()> {
        self.set(topic.as_ref(), key)
    }

    pub fn has_keys(&self, tag: &str) -> bool {
        self.keys.contains_key(tag)
    }

    pub fn get_sym_key(&self, topic: &Topic) -> Result<SymKey> {
        self.get(topic.as_ref())
    }

    /// Removes the key for the topic. Idempotent.
    pub fn delete_sym_key(&self, topic: &Topic) -> Result<()> {
        if self.keys.remove(topic.as_ref()).is_some() {
            self.store.delete(topic.as_ref(), "symmetric key deleted")?;
        }

        Ok(())
    }

    /// Creates an X25519 keypair, persists the private key under the hex
    /// encoding of the public key, and returns that encoding.
    pub fn generate_key_pair(&self) -> Result<String> {
        let private_key = StaticSecret::random_from_rng(OsRng);
        let public_key = PublicKey::from(&private_key);
        let public_hex = HEXLOWER_PERMISSIVE.encode(public_key.as_bytes());

        self.set(&public_hex, private_key.to_bytes())?;

        Ok(public_hex)
    }

    /// Performs X25519 key agreement between our keypair (looked up by the
    /// hex of its public key) and the peer public key, expands the shared
    /// secret with HKDF-SHA256, and stores the resulting symmetric key under
    /// `override_topic`, or under its derived topic when none is given.
    pub fn generate_shared_key(
        &self,
        self_public: &str,
        peer_public: &str,
        override_topic: Option<Topic>,
    ) -> Result<Topic> {
        let private_key = StaticSecret::from(self.get(self_public)?);
        let peer_key = PublicKey::from(decode_key(peer_public)?);
        let shared_secret = private_key.diffie_hellman(&peer_key);

        let hk = Hkdf::<Sha256>::new(None, shared_secret.as_bytes());
        let mut sym_key = [0u8; SYM_KEY_LENGTH];
        hk.expand(&[], &mut sym_key)
            .map_err(|err| Error::InvalidKey(err.to_string()))?;

        match override_topic {
            Some(topic) => {
                self.set_sym_key_for_topic(sym_key, &topic)?;
                Ok(topic)
            }

            None => self.set_sym_key(sym_key),
        }
    }
}

fn decode_key(encoded: &str) -> Result<SymKey> {
    let bytes = HEXLOWER_PERMISSIVE
        .decode(encoded.as_bytes())
        .map_err(|err| Error::InvalidKey(err.to_string()))?;

    bytes
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("unexpected key length in {} chars", encoded.len())))
}

#[cfg(test)]
mod tests {
    use {super::*, crate::storage::MemoryKvStorage, anyhow::Result};

    fn keychain() -> Keychain {
        Keychain::new(Arc::new(MemoryKvStorage::new())).unwrap()
    }

    #[test]
    fn sym_key_lifecycle() -> Result<()> {
        let keychain = keychain();
        let key = [3u8; SYM_KEY_LENGTH];

        let topic = keychain.set_sym_key(key)?;
        assert_eq!(topic, derive_topic(&key));
        assert_eq!(topic.as_ref().len(), 64);
        assert!(keychain.has_keys(topic.as_ref()));
        assert_eq!(keychain.get_sym_key(&topic)?, key);

        // Idempotent set.
        assert_eq!(keychain.set_sym_key(key)?, topic);

        keychain.delete_sym_key(&topic)?;
        assert!(!keychain.has_keys(topic.as_ref()));
        assert!(matches!(
            keychain.get_sym_key(&topic),
            Err(Error::NoMatchingKey(_))
        ));

        // Idempotent delete.
        keychain.delete_sym_key(&topic)?;

        Ok(())
    }

    #[test]
    fn forced_topic() -> Result<()> {
        let keychain = keychain();
        let key = [4u8; SYM_KEY_LENGTH];
        let topic = Topic::generate();

        keychain.set_sym_key_for_topic(key, &topic)?;
        assert_eq!(keychain.get_sym_key(&topic)?, key);

        Ok(())
    }

    #[test]
    fn rehydration() -> Result<()> {
        let storage = Arc::new(MemoryKvStorage::new());
        let key = [5u8; SYM_KEY_LENGTH];

        let topic = {
            let keychain = Keychain::new(storage.clone())?;
            keychain.set_sym_key(key)?
        };

        let restored = Keychain::new(storage)?;
        assert_eq!(restored.get_sym_key(&topic)?, key);

        Ok(())
    }

    #[test]
    fn shared_key_agreement() -> Result<()> {
        let alice = keychain();
        let bob = keychain();

        let alice_public = alice.generate_key_pair()?;
        let bob_public = bob.generate_key_pair()?;

        // Both sides derive the same symmetric key, hence the same topic.
        let alice_topic = alice.generate_shared_key(&alice_public, &bob_public, None)?;
        let bob_topic = bob.generate_shared_key(&bob_public, &alice_public, None)?;

        assert_eq!(alice_topic, bob_topic);
        assert_eq!(
            alice.get_sym_key(&alice_topic)?,
            bob.get_sym_key(&bob_topic)?
        );

        Ok(())
    }

    #[test]
    fn shared_key_override_topic() -> Result<()> {
        let keychain = keychain();
        let self_public = keychain.generate_key_pair()?;
        let peer_public = keychain.generate_key_pair()?;
        let forced = Topic::generate();

        let topic =
            keychain.generate_shared_key(&self_public, &peer_public, Some(forced.clone()))?;

        assert_eq!(topic, forced);
        assert!(keychain.has_keys(forced.as_ref()));

        Ok(())
    }
}
