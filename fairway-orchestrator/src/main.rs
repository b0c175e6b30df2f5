use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fairway_orchestrator::api::{self, AppState};
use fairway_orchestrator::bus::EventBus;
use fairway_orchestrator::config::Config;
use fairway_orchestrator::control::ControlProcessor;
use fairway_orchestrator::dispatcher::Dispatcher;
use fairway_orchestrator::queue::SequenceQueue;
use fairway_orchestrator::resolver::{DefinitionResolver, InMemoryResourceStore};
use fairway_orchestrator::store::StateStore;
use fairway_orchestrator::sweeper::TimeoutSweeper;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fairway_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Fairway Orchestrator...");

    let config = Config::from_env().expect("Invalid configuration");

    // Construct the engine's collaborators once and inject them by handle;
    // nothing is reached through globals.
    let resources = Arc::new(InMemoryResourceStore::new());
    let resolver = Arc::new(DefinitionResolver::new(resources.clone()));
    let store = Arc::new(StateStore::new());
    let queue = Arc::new(SequenceQueue::new());
    let bus = Arc::new(EventBus::new());

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        queue.clone(),
        resolver.clone(),
        bus.clone(),
    ));
    let control = Arc::new(ControlProcessor::new(
        store.clone(),
        queue.clone(),
        dispatcher.clone(),
    ));

    let sweeper = Arc::new(TimeoutSweeper::new(
        store.clone(),
        dispatcher.clone(),
        config.clone(),
    ));
    let _sweeper_handle = sweeper.spawn();

    // Build router with all API endpoints
    let app = api::create_router(AppState {
        dispatcher,
        control,
        store,
        resources,
    });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
