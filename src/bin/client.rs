#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use clap::{Parser, Subcommand};
use simple_kerberos::ccache;
use simple_kerberos::constants::DEFAULT_TGS_PORT;
use simple_kerberos::transport::UdpTransport;
use simple_kerberos::{ClientAgent, KeySize, ProtocolConfig};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::error;

#[derive(Debug, Parser)]
#[clap(about = "Obtain tickets and use them to access services")]
struct OptParser {
    /// The client principal id.
    #[clap(short, long)]
    client: String,
    /// `FILE:<path>` or `MEMORY:`.
    #[clap(long, env = "KRB_TICKET_CACHE")]
    cache: Option<String>,
    #[clap(long, default_value_t = 128)]
    key_bits: u16,
    /// Seconds to wait for each reply. Waits forever when unset.
    #[clap(long)]
    timeout: Option<u64>,
    #[clap(subcommand)]
    command: Opt,
}

#[derive(Debug, Subcommand)]
enum Opt {
    /// Log in at the AS and store a ticket granting ticket.
    Auth {
        #[clap(long, default_value = "tgs1")]
        tgs: String,
        #[clap(long)]
        kdc: Option<SocketAddr>,
        #[clap(long, env = "KRB_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Exchange the ticket granting ticket for a service ticket.
    Ticket {
        #[clap(long, default_value = "tgs1")]
        tgs: String,
        #[clap(long)]
        tgs_address: Option<SocketAddr>,
        service: String,
    },
    /// Present the service ticket to a service.
    Access {
        service: String,
        address: SocketAddr,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ()> {
    tracing_subscriber::fmt::init();

    let opt = OptParser::parse();

    let key_size = KeySize::try_from(opt.key_bits).map_err(|e| {
        error!("Unsupported key size {} -> {:?}", opt.key_bits, e);
    })?;
    let config = ProtocolConfig::default().with_key_size(key_size);

    let cache = ccache::resolve(opt.cache.as_deref()).map_err(|e| {
        error!("Could not open ticket cache -> {:?}", e);
    })?;

    let mut transport = UdpTransport::default();
    if let Some(secs) = opt.timeout {
        transport = transport.with_timeout(Duration::from_secs(secs));
    }

    let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let mut agent = ClientAgent::new(config.clone(), &opt.client, transport, cache);

    match opt.command {
        Opt::Auth { tgs, kdc, password } => {
            let kdc = kdc.unwrap_or(SocketAddr::new(localhost, config.as_port));
            let tgt = agent
                .authenticate_with_password(&password, &tgs, kdc)
                .await
                .map_err(|e| {
                    error!("Authentication failed -> {:?}", e);
                })?;
            println!(
                "Obtained ticket for {}, valid until {} (ms since epoch)",
                tgt.target_id,
                tgt.expires_at()
            );
        }
        Opt::Ticket {
            tgs,
            tgs_address,
            service,
        } => {
            // The default deployment runs the n-th TGS on 127.0.0.(n+1).
            let tgs_address = tgs_address.unwrap_or_else(|| default_tgs_address(&tgs));
            let ticket = agent
                .request_service_ticket(&tgs, tgs_address, &service)
                .await
                .map_err(|e| {
                    error!("Ticket request failed -> {:?}", e);
                })?;
            println!(
                "Obtained ticket for {}, valid until {} (ms since epoch)",
                ticket.target_id,
                ticket.expires_at()
            );
        }
        Opt::Access { service, address } => {
            let greeting = agent.access_service(&service, address).await.map_err(|e| {
                error!("Service access failed -> {:?}", e);
            })?;
            println!("{greeting}");
        }
    }

    Ok(())
}

fn default_tgs_address(tgs_id: &str) -> SocketAddr {
    let host = tgs_id
        .strip_prefix("tgs")
        .and_then(|n| n.parse::<u8>().ok())
        .and_then(|n| n.checked_add(1))
        .unwrap_or(2);
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, host)), DEFAULT_TGS_PORT)
}
