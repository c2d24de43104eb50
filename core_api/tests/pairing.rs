//! End-to-end pairing scenarios against an in-process relay.

mod common;

use {
    common::MockRelay,
    core_api::{
        pairing::{PairingEvent, PairingUri, INACTIVE_PAIRING_TTL},
        ConnectionOptions, Core, Error, ExpiryTarget, MemoryKvStorage,
    },
    std::{sync::Arc, time::Duration},
    tokio::{sync::broadcast, time::timeout},
};

const EVENT_DEADLINE: Duration = Duration::from_secs(5);

async fn connected_core(address: &str) -> anyhow::Result<Core> {
    let opts = ConnectionOptions::new("test-project-id").with_address(address.to_owned());
    let core = Core::new(opts, Arc::new(MemoryKvStorage::new()))?;

    core.connect().await?;

    Ok(core)
}

async fn next_event(
    events: &mut broadcast::Receiver<PairingEvent>,
) -> anyhow::Result<PairingEvent> {
    Ok(timeout(EVENT_DEADLINE, events.recv()).await??)
}

fn now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// S2: a created pairing round-trips through its URI.
#[tokio::test(flavor = "multi_thread")]
async fn create_uri_roundtrip() -> anyhow::Result<()> {
    let relay = MockRelay::start().await?;
    let dapp = connected_core(&relay.address).await?;

    let (topic, uri) = dapp.pairing().create().await?;

    let parsed: PairingUri = uri.parse()?;
    assert_eq!(parsed.topic, topic);
    assert_eq!(parsed.version, "2");

    // The URI carries the same key the keychain persisted for the topic.
    assert_eq!(parsed.params.sym_key, dapp.keychain().get_sym_key(&topic)?);

    let record = dapp.pairing().get(&topic)?;
    assert!(!record.active);
    assert!(dapp.relayer().is_subscribed(&topic));

    Ok(())
}

/// S1: pairing from a URI creates exactly one inactive record with the
/// five-minute expiry, and a second pair of the same URI fails without
/// touching state.
#[tokio::test(flavor = "multi_thread")]
async fn pair_round_trip() -> anyhow::Result<()> {
    let relay = MockRelay::start().await?;
    let dapp = connected_core(&relay.address).await?;
    let wallet = connected_core(&relay.address).await?;

    let (topic, uri) = dapp.pairing().create().await?;

    let before = now();
    let record = wallet.pairing().pair(&uri, false).await?;

    assert_eq!(record.topic, topic);
    assert!(!record.active);
    assert!(record.expiry >= before + INACTIVE_PAIRING_TTL - 2);
    assert!(record.expiry <= now() + INACTIVE_PAIRING_TTL + 2);

    let topics: Vec<_> = wallet
        .pairing()
        .pairings()?
        .into_iter()
        .map(|record| record.topic)
        .collect();
    assert_eq!(topics, vec![topic.clone()]);

    assert!(wallet.keychain().has_keys(topic.as_ref()));
    assert!(wallet.expirer().has(&ExpiryTarget::Topic(topic.clone())));

    // Pairing the same URI again must fail and leave the record alone.
    assert!(matches!(
        wallet.pairing().pair(&uri, false).await,
        Err(Error::AlreadyExists(_))
    ));
    assert_eq!(wallet.pairing().pairings()?.len(), 1);

    Ok(())
}

/// S3: ping resolves on peer acknowledgement and fires `Pinged` on both
/// sides.
#[tokio::test(flavor = "multi_thread")]
async fn ping_success() -> anyhow::Result<()> {
    let relay = MockRelay::start().await?;
    let dapp = connected_core(&relay.address).await?;
    let wallet = connected_core(&relay.address).await?;

    let (topic, uri) = dapp.pairing().create().await?;
    wallet.pairing().pair(&uri, true).await?;

    let mut dapp_events = dapp.pairing().subscribe_events();
    let mut wallet_events = wallet.pairing().subscribe_events();

    let id = wallet.pairing().ping(&topic).await?;

    let PairingEvent::Pinged {
        topic: pinged_topic,
        id: pinged_id,
    } = next_event(&mut wallet_events).await?
    else {
        anyhow::bail!("expected a Pinged event on the requesting side");
    };
    assert_eq!(pinged_topic, topic);
    assert_eq!(pinged_id, id);

    let PairingEvent::Pinged { topic: peer_topic, .. } = next_event(&mut dapp_events).await?
    else {
        anyhow::bail!("expected a Pinged event on the receiving side");
    };
    assert_eq!(peer_topic, topic);

    Ok(())
}

/// Pinging a never-paired topic fails with `NoMatchingKey`; pinging an
/// inactive pairing is rejected.
#[tokio::test(flavor = "multi_thread")]
async fn ping_validation() -> anyhow::Result<()> {
    let relay = MockRelay::start().await?;
    let dapp = connected_core(&relay.address).await?;
    let wallet = connected_core(&relay.address).await?;

    assert!(matches!(
        wallet.pairing().ping(&relay_rpc::domain::Topic::generate()).await,
        Err(Error::NoMatchingKey(_))
    ));

    let (topic, uri) = dapp.pairing().create().await?;
    wallet.pairing().pair(&uri, false).await?;

    assert!(matches!(
        wallet.pairing().ping(&topic).await,
        Err(Error::PairingInactive(_))
    ));

    Ok(())
}

/// S4 + S5: a local disconnect publishes one `wc_pairingDelete`, tears all
/// local state down, and the peer answers, tears down and emits
/// `PairingDeleted`. Repeating the disconnect raises `NoMatchingKey`, and
/// so does a subsequent ping on the peer.
#[tokio::test(flavor = "multi_thread")]
async fn disconnect_tears_down_both_sides() -> anyhow::Result<()> {
    let relay = MockRelay::start().await?;
    let dapp = connected_core(&relay.address).await?;
    let wallet = connected_core(&relay.address).await?;

    let (topic, uri) = dapp.pairing().create().await?;
    wallet.pairing().pair(&uri, true).await?;

    let mut dapp_events = dapp.pairing().subscribe_events();

    wallet.pairing().disconnect(&topic).await?;

    // Local teardown is complete.
    assert!(matches!(
        wallet.pairing().get(&topic),
        Err(Error::NoMatchingKey(_))
    ));
    assert!(!wallet.keychain().has_keys(topic.as_ref()));
    assert!(!wallet.expirer().has(&ExpiryTarget::Topic(topic.clone())));
    assert!(!wallet.relayer().is_subscribed(&topic));

    // Repeated disconnect raises NoMatchingKey.
    assert!(matches!(
        wallet.pairing().disconnect(&topic).await,
        Err(Error::NoMatchingKey(_))
    ));

    // Peer side: replies, tears down, emits PairingDeleted.
    let PairingEvent::Deleted { topic: deleted } = next_event(&mut dapp_events).await? else {
        anyhow::bail!("expected a Deleted event on the peer");
    };
    assert_eq!(deleted, topic);

    assert!(matches!(
        dapp.pairing().get(&topic),
        Err(Error::NoMatchingKey(_))
    ));
    assert!(!dapp.keychain().has_keys(topic.as_ref()));
    assert!(matches!(
        dapp.pairing().ping(&topic).await,
        Err(Error::NoMatchingKey(_))
    ));

    Ok(())
}

/// Expiry fires teardown and the `Expired` event.
#[tokio::test(flavor = "multi_thread")]
async fn pairing_expiry_tears_down() -> anyhow::Result<()> {
    let relay = MockRelay::start().await?;
    let dapp = connected_core(&relay.address).await?;
    let wallet = connected_core(&relay.address).await?;

    let (topic, uri) = dapp.pairing().create().await?;
    wallet.pairing().pair(&uri, false).await?;

    let mut wallet_events = wallet.pairing().subscribe_events();

    // Pull the expiry into the immediate future.
    wallet.pairing().update_expiry(&topic, now() + 1)?;

    let PairingEvent::Expired { topic: expired } = next_event(&mut wallet_events).await? else {
        anyhow::bail!("expected an Expired event");
    };
    assert_eq!(expired, topic);

    assert!(matches!(
        wallet.pairing().get(&topic),
        Err(Error::NoMatchingKey(_))
    ));
    assert!(!wallet.keychain().has_keys(topic.as_ref()));

    Ok(())
}

/// Request/response demultiplexing: two concurrent pings each resolve with
/// their own id.
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_pings_resolve_independently() -> anyhow::Result<()> {
    let relay = MockRelay::start().await?;
    let dapp = connected_core(&relay.address).await?;
    let wallet = connected_core(&relay.address).await?;

    let (topic, uri) = dapp.pairing().create().await?;
    wallet.pairing().pair(&uri, true).await?;

    let (first, second) = tokio::join!(
        wallet.pairing().ping(&topic),
        wallet.pairing().ping(&topic),
    );

    let first = first?;
    let second = second?;
    assert_ne!(first, second);

    Ok(())
}
