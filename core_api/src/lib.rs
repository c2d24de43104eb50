//! The core of the relay protocol client: end-to-end encrypted,
//! topic-addressed JSON RPC messaging between two peers mediated by an
//! untrusted relay.
//!
//! The building blocks are assembled by [`Core`]: the [`Keychain`] and
//! envelope [`Crypto`], the typed persistent [`Store`], the [`Expirer`],
//! the [`Relayer`] over the websocket transport, the [`MessageHandler`]
//! dispatch and the [`PairingManager`]. Higher-level clients (Sign, Auth)
//! build on top of these and are out of scope here.

pub use {
    crate::{
        crypto::{Crypto, Keychain},
        error::{Error, Result},
        expirer::{Expirer, ExpirerEvent, ExpiryTarget},
        message_handler::{
            HandlerToken, MessageHandler, RequestContext, ResponseContext, ResponseReceiver,
        },
        pairing::{PairingEvent, PairingManager, PairingRecord, PairingUri},
        relayer::{InboundMessage, PublishOptions, Relayer},
        storage::{KeyValueStorage, MemoryKvStorage},
        store::Store,
    },
    relay_client::ConnectionOptions,
};

pub mod crypto;
pub mod error;
pub mod expirer;
pub mod message_handler;
pub mod pairing;
pub mod relayer;
pub mod rpc;
pub mod storage;
pub mod store;

use std::sync::Arc;

/// Current unix time in whole seconds.
pub(crate) fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// The assembled core client.
///
/// Owns every subsystem. Subsystems only hold handles downward (keychain,
/// relayer, stores), so the core can be dropped as a unit; the pairing
/// manager's inbound handlers hold weak references back into it.
///
/// Construction requires a running tokio runtime: the expirer, the relayer
/// and the message handler spawn their worker tasks immediately.
pub struct Core {
    storage: Arc<dyn KeyValueStorage>,
    keychain: Arc<Keychain>,
    crypto: Crypto,
    expirer: Arc<Expirer>,
    relayer: Relayer,
    message_handler: MessageHandler,
    pairing: Arc<PairingManager>,
}

impl Core {
    pub fn new(opts: ConnectionOptions, storage: Arc<dyn KeyValueStorage>) -> Result<Self> {
        let keychain = Arc::new(Keychain::new(storage.clone())?);
        let crypto = Crypto::new(keychain.clone());
        let expirer = Arc::new(Expirer::new(storage.clone())?);

        let (relayer, messages) = Relayer::new(opts, storage.clone())?;
        let message_handler = MessageHandler::new(crypto.clone(), relayer.clone(), messages);

        let pairing = PairingManager::new(
            storage.clone(),
            keychain.clone(),
            relayer.clone(),
            message_handler.clone(),
            expirer.clone(),
        );

        Ok(Self {
            storage,
            keychain,
            crypto,
            expirer,
            relayer,
            message_handler,
            pairing,
        })
    }

    /// Opens the relay connection and re-establishes persisted
    /// subscriptions.
    pub async fn connect(&self) -> Result<()> {
        self.relayer.connect().await
    }

    pub fn pairing(&self) -> &Arc<PairingManager> {
        &self.pairing
    }

    pub fn relayer(&self) -> &Relayer {
        &self.relayer
    }

    pub fn message_handler(&self) -> &MessageHandler {
        &self.message_handler
    }

    pub fn crypto(&self) -> &Crypto {
        &self.crypto
    }

    pub fn keychain(&self) -> &Arc<Keychain> {
        &self.keychain
    }

    pub fn expirer(&self) -> &Arc<Expirer> {
        &self.expirer
    }

    pub fn storage(&self) -> &Arc<dyn KeyValueStorage> {
        &self.storage
    }
}
