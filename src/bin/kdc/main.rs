#![warn(unused_extern_crates)]
// Enable some groups of clippy lints.
#![deny(clippy::suspicious)]
#![deny(clippy::perf)]
// Specific lints to enforce.
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::disallowed_types)]
#![deny(clippy::manual_let_else)]
#![allow(clippy::unreachable)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;

use clap::{Parser, Subcommand};
use config::{Config, ServerState, TaskName};
use simple_kerberos::keystore::store_key_file;
use simple_kerberos::server::{AuthenticationServer, TicketGrantServer};
use simple_kerberos::transport::{create_udp_server, CoreAction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

#[derive(Debug, clap::Parser)]
#[clap(about = "Authentication and ticket granting servers for a single realm")]
struct OptParser {
    #[clap(subcommand)]
    command: Opt,
}

#[derive(Debug, Subcommand)]
enum Opt {
    /// Run the AS and every configured TGS until interrupted.
    Run { config: PathBuf },
    /// Write a registered service's key into a key directory.
    ServiceKey {
        config: PathBuf,
        service: String,
        output: PathBuf,
    },
}

struct CoreHandle {
    clean_shutdown: bool,
    tx: broadcast::Sender<CoreAction>,
    handles: Vec<(TaskName, tokio::task::JoinHandle<()>)>,
}

impl CoreHandle {
    async fn shutdown(&mut self) {
        if self.tx.send(CoreAction::Shutdown).is_err() {
            eprintln!("No receivers acked shutdown request. Treating as unclean.");
            return;
        }

        // Wait on the handles.
        while let Some((handle_name, handle)) = self.handles.pop() {
            if let Err(error) = handle.await {
                eprintln!("Task {handle_name} failed to finish: {error:?}");
            }
        }

        self.clean_shutdown = true;
    }
}

impl Drop for CoreHandle {
    fn drop(&mut self) {
        if !self.clean_shutdown {
            eprintln!("⚠️  UNCLEAN SHUTDOWN OCCURRED ⚠️ ");
        }
    }
}

async fn create_server_core(config: &Config) -> Result<CoreHandle, ()> {
    let (broadcast_tx, mut _broadcast_rx) = broadcast::channel(4);

    let server_state = ServerState::try_from(config).map_err(|e| {
        error!("Could not get server state from config -> {:?}", e);
    })?;

    let mut handles: Vec<(TaskName, tokio::task::JoinHandle<()>)> = vec![];

    let as_server = AuthenticationServer::new(
        server_state.protocol.clone(),
        server_state.tgs_ids(),
        server_state.principals.clone(),
    );

    let (as_handle, as_address) = create_udp_server(
        server_state.address,
        Arc::new(as_server),
        broadcast_tx.subscribe(),
    )
    .await
    .map_err(|e| {
        error!("Could not start {} -> {:?}", TaskName::AuthenticationUdp, e);
    })?;
    info!("Started task {} on {}", TaskName::AuthenticationUdp, as_address);
    handles.push((TaskName::AuthenticationUdp, as_handle));

    for tgs in server_state.tgs {
        let task_name = TaskName::TicketGrantUdp(tgs.id.clone());
        let tgs_server = TicketGrantServer::new(
            &tgs.id,
            tgs.key,
            server_state.protocol.clone(),
            tgs.services,
        );

        let (tgs_handle, tgs_address) =
            create_udp_server(tgs.address, Arc::new(tgs_server), broadcast_tx.subscribe())
                .await
                .map_err(|e| {
                    error!("Could not start {} -> {:?}", task_name, e);
                })?;
        info!("Started task {} on {}", task_name, tgs_address);
        handles.push((task_name, tgs_handle));
    }

    Ok(CoreHandle {
        clean_shutdown: false,
        tx: broadcast_tx,
        handles,
    })
}

fn service_key_extract_run(service: &str, output: &Path, config: &Config) -> Result<(), ()> {
    let server_state = ServerState::try_from(config).map_err(|e| {
        error!("Could not get server state from config -> {:?}", e);
    })?;

    let Some(key) = server_state.service_key(service) else {
        error!("No service {} is registered with any TGS", service);
        return Err(());
    };

    let path = store_key_file(output, service, &key).map_err(|e| {
        error!("Could not write key for {} -> {:?}", service, e);
    })?;

    info!("Wrote key for {} to {}", service, path.display());
    Ok(())
}

async fn wait_for_signal(tx: &broadcast::Sender<CoreAction>) {
    let mut listener = tx.subscribe();
    tokio::select! {
        Ok(()) = tokio::signal::ctrl_c() => {}
        Some(()) = async move {
            let sigterm = tokio::signal::unix::SignalKind::terminate();
            match tokio::signal::unix::signal(sigterm) {
                Ok(mut signal) => signal.recv().await,
                Err(_) => std::future::pending().await,
            }
        } => {}
        // we got a message on the broadcast from somewhere else
        Ok(msg) = async move {
            listener.recv().await
        } => {
            debug!("Main loop received message: {:?}", msg);
        }
        else => {}
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ()> {
    tracing_subscriber::fmt::init();

    let opt = OptParser::parse();

    match opt.command {
        Opt::Run { config } => {
            let cfg = Config::parse(&config).map_err(|e| {
                error!("Could not parse config file {:?}: {:?}", config, e);
            })?;

            let Ok(mut sctx) = create_server_core(&cfg).await else {
                error!("Failed to start server core!");
                return Err(());
            };

            wait_for_signal(&sctx.tx).await;
            info!("Signal received, shutting down");
            // Send a broadcast that we are done.
            sctx.shutdown().await;
        }
        Opt::ServiceKey {
            config,
            service,
            output,
        } => {
            let cfg = Config::parse(&config).map_err(|e| {
                error!("Could not parse config file {:?}: {:?}", config, e);
            })?;
            service_key_extract_run(&service, &output, &cfg)?;
        }
    }

    Ok(())
}
