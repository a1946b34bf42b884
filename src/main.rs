mod config;
mod db;
mod error;
mod models;
mod service;
mod ton;

use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::io::AsyncBufReadExt;
use tracing::Level;

use crate::config::Config;
use crate::db::db::DBClient;
use crate::db::gigdb::{init_schema, GigStore};
use crate::service::command::{Engine, EngineCommand};
use crate::service::dispute_service::DisputeService;
use crate::service::gig_service::GigService;
use crate::service::notification_service::{EscrowNotifier, LogNotifier};
use crate::service::settlement_watcher::SettlementWatcher;
use crate::ton::escrow::EscrowProtocol;
use crate::ton::provider::HttpProvider;
use crate::ton::sequencer::TransferSequencer;
use crate::ton::wallet::CustodyWallet;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();
    dotenv().ok();
    let config = Config::init();

    let pool = match PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => {
            tracing::info!("connected to the database");
            pool
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to the database");
            std::process::exit(1);
        }
    };

    let db_client = DBClient::new(pool);
    if let Err(e) = init_schema(&db_client).await {
        tracing::error!(error = %e, "schema initialization failed");
        std::process::exit(1);
    }

    let store: Arc<dyn GigStore> = Arc::new(db_client);
    let provider = Arc::new(HttpProvider::new(
        config.ton_api_url.clone(),
        config.ton_api_key.clone(),
    ));
    let wallet = CustodyWallet::new(
        provider.clone(),
        config.custody_address.clone(),
        config.reserve_floor_nano,
        config.warn_threshold_nano,
    );
    let sequencer = TransferSequencer::spawn(wallet.clone(), store.clone());
    let escrow = Arc::new(EscrowProtocol::new(
        provider,
        wallet,
        sequencer,
        config.custody_address.clone(),
    ));

    let notifier: Arc<dyn EscrowNotifier> = Arc::new(LogNotifier);
    let gigs = Arc::new(GigService::new(
        store.clone(),
        escrow.clone(),
        notifier.clone(),
    ));
    let disputes = Arc::new(DisputeService::new(
        store.clone(),
        escrow.clone(),
        notifier.clone(),
    ));

    let watcher = Arc::new(SettlementWatcher::new(
        store,
        escrow,
        gigs.clone(),
        disputes.clone(),
        notifier,
        Duration::from_secs(config.confirmation_timeout_secs),
    ));
    tokio::spawn(watcher.run(Duration::from_secs(config.settlement_poll_secs)));

    let engine = Engine::new(gigs, disputes);

    tracing::info!(
        custody_wallet = %config.custody_address,
        endpoint = %config.ton_api_url,
        "gig escrow engine running"
    );

    // One JSON command per line on stdin, one JSON reply per line on stdout.
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let reply = match serde_json::from_str::<EngineCommand>(line) {
                            Ok(command) => match engine.dispatch(command).await {
                                Ok(reply) => serde_json::to_value(&reply)
                                    .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() })),
                                Err(e) => serde_json::json!({ "error": e.to_string() }),
                            },
                            Err(e) => serde_json::json!({ "error": format!("bad command: {e}") }),
                        };
                        println!("{reply}");
                    }
                    Ok(None) => {
                        tracing::info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to read command");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }
    tracing::info!("shutting down");
}
