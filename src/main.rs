use std::{process, sync::Arc};

use mpc_rendezvous::{
    config::Config,
    dispatcher::Dispatcher,
    room::RoomCoordinator,
    routes,
    session::SessionService,
    signer::{relay::RelaySigner, Signers},
    store::SessionStore,
    Scheme,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[rocket::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mpc_rendezvous=info,rocket=warn")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {}", e);
            process::exit(1);
        }
    };

    let http = reqwest::Client::new();
    let relay = |scheme| {
        Arc::new(RelaySigner::new(
            http.clone(),
            &config.signer_url,
            scheme,
            &config.api_key,
        ))
    };
    let signers = Signers::new(relay(Scheme::Ecdsa), relay(Scheme::Ed25519));

    let store = SessionStore::new(config.store());
    let dispatcher = Arc::new(Dispatcher::start(
        config.dispatcher(),
        signers.clone(),
        store.clone(),
        config.protocol(),
    ));
    dispatcher.spawn_sweeper(store.clone(), config.sweep_interval);

    let rooms = RoomCoordinator::new(signers.clone(), config.party_count, &config.api_key);
    let service = SessionService::new(store, rooms, signers, dispatcher.clone());

    info!(
        signer_url = %config.signer_url,
        parties = config.party_count,
        threshold = config.threshold,
        share_ttl = ?config.share_ttl,
        "starting rendezvous server"
    );

    let launched = routes::build(service).launch().await;
    dispatcher.shutdown().await;

    if let Err(e) = launched {
        error!("server failed: {}", e);
        process::exit(1);
    }
    info!("rendezvous server stopped");
}
