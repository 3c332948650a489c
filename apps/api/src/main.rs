use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use case_booking_cell::{BookingRepository, SupabaseBookingRepository};
use case_management_cell::CaseWorkflowService;
use case_management_cell::router::CaseManagementState;
use notification_cell::{EdgeFunctionEmailDispatcher, NotificationOutbox, NotificationService, SupabaseRuleStore};
use offline_sync_cell::{HybridStorage, LocalPersistence, LocalStore, MemoryStore, RedisStore, UiEventBus};
use shared_config::AppConfig;

const REDIS_NAMESPACE: &str = "case-booking";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Case Booking API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    // Local store: Redis when configured, otherwise process memory
    let store: Arc<dyn LocalStore> = match config.redis_url.as_deref() {
        Some(url) => match RedisStore::new(url, REDIS_NAMESPACE).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!("Redis unavailable ({}), falling back to in-memory local store", e);
                Arc::new(MemoryStore::new())
            }
        },
        None => Arc::new(MemoryStore::new()),
    };
    let persistence = Arc::new(LocalPersistence::new(store));

    let repository: Arc<dyn BookingRepository> = Arc::new(SupabaseBookingRepository::new(&config));
    let storage = Arc::new(HybridStorage::assemble(
        repository,
        persistence.clone(),
        UiEventBus::default(),
        &config.sync,
    ));
    storage
        .monitor()
        .restore()
        .await
        .context("Failed to restore connection state")?;

    let outbox = Arc::new(NotificationOutbox::new(persistence, &config.sync));
    let notifier = Arc::new(NotificationService::new(
        Arc::new(SupabaseRuleStore::new(&config)),
        Arc::new(EdgeFunctionEmailDispatcher::new(&config)),
        storage.clone(),
    )?);

    // Background workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = [
        tokio::spawn(storage.queue().clone().run(storage.monitor().subscribe(), shutdown_rx.clone())),
        tokio::spawn(storage.clone().run_health_probe(shutdown_rx.clone())),
        tokio::spawn(outbox.clone().run(notifier, shutdown_rx)),
    ];

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Create shared state
    let state = CaseManagementState {
        config,
        workflow: Arc::new(CaseWorkflowService::new(storage, outbox)),
    };

    // Build the application router
    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await.context("Failed to bind listener")?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    // Let the workers finish their current pass
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            warn!("Background worker ended abnormally: {}", e);
        }
    }

    info!("Case Booking API stopped");
    Ok(())
}
