//! `holonet-core`: the orchestrator binary wiring together the Job
//! Queue, Dispatcher, Scheduler, Worker Registry and Gatekeeper.

mod config;

use std::sync::Arc;

use clap::Parser;
use core_dispatch::DispatcherContext;
use core_gatekeeper::{Gatekeeper, NetboxClient};
use core_queue::JobQueue;
use core_registry::WorkerRegistry;
use core_scheduler::{Scheduler, StubRunner};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use config::{apply_config_file, CliArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = apply_config_file(CliArgs::parse())?;

    let database_url = args
        .database_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("database URL not set (--database-url / HOLONET_DATABASE_URL)"))?;

    let pool = core_db::connect(&database_url, args.db_max_connections).await?;
    core_db::ping(&pool).await?;
    info!("connected to store");

    let queue = Arc::new(JobQueue::new(pool.clone()));
    let recovered = queue.recover_on_startup().await?;
    if recovered > 0 {
        warn!(count = recovered, "released queue entries held by workers that never checked back in");
    }

    let scheduler = Scheduler::new(pool.clone(), Arc::new(StubRunner::default()))
        .with_max_execution_age(args.max_execution_age());
    scheduler.recover_on_startup().await?;

    match resolve_netbox_client(&pool, &args).await? {
        Some(client) => {
            let gatekeeper = Gatekeeper::new(client);
            gatekeeper.set_rate_limit(args.rate_limit_per_minute);
            if let Err(err) = gatekeeper.verify_upstream().await {
                error!(%err, "upstream inventory service failed version verification");
                return Err(err.into());
            }
            info!("upstream inventory service verified");
        }
        None => warn!("no NetBox host/token configured, Gatekeeper egress is unavailable"),
    }

    let registry = Arc::new(WorkerRegistry::new());
    let ctx = DispatcherContext {
        pool: pool.clone(),
        queue: queue.clone(),
        registry: registry.clone(),
    };

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);

    let scheduler_handle = {
        let cancel_rx = cancel_rx.clone();
        tokio::spawn(async move { scheduler.run(cancel_rx).await })
    };

    let listener = TcpListener::bind(&args.bind).await?;
    info!(addr = %args.bind, "listening for worker connections");

    let accept_loop = {
        let cancel_rx = cancel_rx.clone();
        async move {
            let mut cancel_rx = cancel_rx;
            loop {
                tokio::select! {
                    _ = cancel_rx.changed() => {
                        info!("accept loop shutting down");
                        break;
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                let ctx = ctx.clone();
                                // handle_connection runs on its own task so a
                                // panic there is caught at the task boundary
                                // (`spec.md` §7) instead of taking down the
                                // accept loop; the supervising task below
                                // inspects the JoinHandle and just logs it,
                                // since the session's own queue rows were
                                // already released inside handle_connection
                                // before a panic could occur there, and any
                                // panic mid-session leaves cleanup to the
                                // crash-recovery sweep the same way a killed
                                // process would.
                                let handle = tokio::spawn(core_dispatch::handle_connection(stream, ctx));
                                tokio::spawn(async move {
                                    match handle.await {
                                        Ok(Ok(())) => {}
                                        Ok(Err(err)) => {
                                            warn!(%peer, %err, "worker session ended with an error");
                                        }
                                        Err(join_err) => {
                                            error!(%peer, error = %join_err, "worker session task panicked");
                                        }
                                    }
                                });
                            }
                            Err(err) => {
                                warn!(%err, "failed to accept connection");
                            }
                        }
                    }
                }
            }
        }
    };

    tokio::select! {
        _ = accept_loop => {}
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            let _ = cancel_tx.send(true);
        }
    }

    let _ = scheduler_handle.await;
    Ok(())
}

/// Builds the upstream client, preferring a credentials row stored in
/// the store over the static `--netbox-host`/`--netbox-token` flags
/// (`SPEC_FULL.md` §12: the Gatekeeper's client is meant to authenticate
/// using credentials looked up from `netbox_credentials`, not only a
/// single global CLI token). Falls back to the CLI flags when no
/// credentials user id is configured, and to the CLI host when the
/// stored row doesn't carry its own.
async fn resolve_netbox_client(pool: &sqlx::PgPool, args: &CliArgs) -> anyhow::Result<Option<NetboxClient>> {
    if let Some(user_id) = args.netbox_credentials_user_id {
        let creds = core_db::queries::get_netbox_credentials(pool, user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no netbox credentials stored for user {user_id}"))?;
        let host = creds
            .netbox_host
            .or_else(|| args.netbox_host.clone())
            .ok_or_else(|| anyhow::anyhow!("no netbox host configured or stored for user {user_id}"))?;
        let token = creds
            .netbox_token
            .ok_or_else(|| anyhow::anyhow!("stored netbox credentials for user {user_id} have no token"))?;
        info!(user_id, "loaded netbox credentials from the store");
        return Ok(Some(NetboxClient::new(host, token)));
    }

    Ok(match (args.netbox_host.clone(), args.netbox_token.clone()) {
        (Some(host), Some(token)) => Some(NetboxClient::new(host, token)),
        _ => None,
    })
}

/// Waits for either Ctrl+C or, on unix, SIGTERM — whichever arrives
/// first triggers graceful shutdown (`spec.md` §5).
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
