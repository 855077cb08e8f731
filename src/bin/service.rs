#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use clap::Parser;
use simple_kerberos::keystore::{KeyDirectory, KeyStore};
use simple_kerberos::server::ServiceServer;
use simple_kerberos::transport::{create_udp_server, CoreAction};
use simple_kerberos::ProtocolConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[clap(about = "A service that only greets clients holding a valid service ticket")]
struct Opt {
    /// The principal id of this service.
    #[clap(long)]
    id: String,
    #[clap(long)]
    address: SocketAddr,
    /// Directory holding `<id>.key`, as written by `kdc service-key`.
    #[clap(long)]
    key_dir: PathBuf,
    #[clap(long)]
    freshness_window_secs: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ()> {
    tracing_subscriber::fmt::init();

    let opt = Opt::parse();

    let key = KeyDirectory::new(&opt.key_dir).lookup(&opt.id).map_err(|e| {
        error!(
            "Could not load key for {} from {:?}: {:?}",
            opt.id, opt.key_dir, e
        );
    })?;

    let mut config = ProtocolConfig::default();
    if let Some(secs) = opt.freshness_window_secs {
        config = config.with_freshness_window(Duration::from_secs(secs));
    }

    let server = ServiceServer::new(&opt.id, key, &config);

    let (tx, _) = broadcast::channel(1);
    let (handle, address) = create_udp_server(opt.address, Arc::new(server), tx.subscribe())
        .await
        .map_err(|e| {
            error!("Could not start service {} -> {:?}", opt.id, e);
        })?;
    info!("Service {} listening on {}", opt.id, address);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to wait for interrupt: {:?}", e);
    }

    info!("Signal received, shutting down");
    if tx.send(CoreAction::Shutdown).is_ok() {
        if let Err(e) = handle.await {
            error!("Service task failed to finish: {:?}", e);
        }
    }

    Ok(())
}
