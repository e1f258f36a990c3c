use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use push_dispatch::backend::{BackendSet, Reconciler};
use push_dispatch::config::Config;
use push_dispatch::discovery::HttpFeed;
use push_dispatch::dispatch::Dispatcher;
use push_dispatch::intake;
use push_dispatch::room::RoomRegistry;
use push_dispatch::rpc::TcpConnector;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(
        version = VERSION,
        region = %config.region,
        zone = %config.zone,
        "push-dispatch starting"
    );

    let backends = BackendSet::new();
    let connector = Arc::new(TcpConnector::new(config.rpc));
    let reconciler = Reconciler::new(
        backends.clone(),
        connector,
        config.zone.clone(),
        config.startup_timeout,
    );

    // Load the first membership snapshot (bounded) before consuming records,
    // then keep reconciling in the background.
    let mut feed = HttpFeed::spawn(config.discovery_nodes.clone());
    reconciler.init(&mut feed).await;
    let membership = tokio::spawn(reconciler.watch(feed));

    let rooms = RoomRegistry::new(backends.clone(), config.room);
    let dispatcher = Arc::new(Dispatcher::new(backends.clone(), rooms));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut intake_task = tokio::spawn({
        let config = config.clone();
        let dispatcher = dispatcher.clone();
        async move { intake::run(&config, dispatcher, shutdown_rx).await }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("signal received, shutting down");
            // Stop pulling records; the in-flight dispatch finishes first.
            let _ = shutdown_tx.send(true);
            match (&mut intake_task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(?e, "queue intake failed during shutdown"),
                Err(e) => tracing::error!(?e, "queue intake task panicked"),
            }
        }
        result = &mut intake_task => match result {
            Ok(Ok(())) => tracing::warn!("queue intake exited"),
            Ok(Err(e)) => tracing::error!(?e, "queue intake failed"),
            Err(e) => tracing::error!(?e, "queue intake task panicked"),
        },
    }

    backends.cancel_all();
    membership.abort();
    tracing::info!(version = VERSION, "push-dispatch exit");
}
