use {
    core_api::{ConnectionOptions, Core, MemoryKvStorage},
    std::{sync::Arc, time::Duration},
    structopt::StructOpt,
};

#[derive(StructOpt)]
struct Args {
    /// Specify WebSocket address.
    #[structopt(short, long, default_value = "wss://relay.walletconnect.com")]
    address: String,

    /// Specify WalletConnect project ID.
    #[structopt(short, long, default_value = "3cbaa32f8fbf3cdcc87d27ca1fa68069")]
    project_id: String,
}

fn create_core(args: &Args) -> anyhow::Result<Core> {
    let opts = ConnectionOptions::new(args.project_id.clone()).with_address(args.address.clone());

    Ok(Core::new(opts, Arc::new(MemoryKvStorage::new()))?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::from_args();

    let dapp = create_core(&args)?;
    dapp.connect().await?;

    let wallet = create_core(&args)?;
    wallet.connect().await?;

    let (topic, uri) = dapp.pairing().create().await?;
    println!("[dapp] created pairing: topic={topic}");
    println!("[dapp] uri={uri}");

    let record = wallet.pairing().pair(&uri, true).await?;
    println!("[wallet] paired: topic={} active={}", record.topic, record.active);

    let id = wallet.pairing().ping(&topic).await?;
    println!("[wallet] ping acknowledged: id={id}");

    wallet.pairing().disconnect(&topic).await?;
    println!("[wallet] disconnected");

    // Let the peer process the delete before shutting down.
    tokio::time::sleep(Duration::from_millis(500)).await;

    println!("[dapp] pairings left: {}", dapp.pairing().pairings()?.len());

    Ok(())
}
