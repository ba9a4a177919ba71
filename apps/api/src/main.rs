use std::net::SocketAddr;
use std::sync::Arc;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::router::AppointmentState;
use appointment_cell::services::booking::ReservationCoordinator;
use appointment_cell::services::notification::{NotificationDispatcher, TracingNotifier, WebhookNotifier};
use payment_cell::router::PaymentState;
use payment_cell::services::gateway::PaymentService;
use payment_cell::services::razorpay::RazorpayClient;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_database::{InMemoryDatabase, PostgrestStore, Repositories};
use shared_models::error::set_error_detail_exposure;

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

    info!("Starting clinic reservation API");

    let config = Arc::new(AppConfig::from_env());
    set_error_detail_exposure(config.expose_error_details());

    let repos = if config.is_database_configured() {
        info!("Using PostgREST store at {}", config.supabase_url);
        Repositories::from_store(Arc::new(PostgrestStore::new(Arc::new(SupabaseClient::new(&config)))))
    } else {
        warn!("Database not configured - using in-memory store, data will not persist");
        Repositories::from_store(Arc::new(InMemoryDatabase::new()))
    };

    let notifier: Arc<dyn NotificationDispatcher> = match &config.notification_webhook_url {
        Some(url) => {
            info!("Notifications delivered via webhook");
            Arc::new(WebhookNotifier::new(url.clone()))
        }
        None => Arc::new(TracingNotifier),
    };

    let appointments = AppointmentState {
        config: config.clone(),
        coordinator: Arc::new(ReservationCoordinator::new(repos.clone(), notifier.clone())),
    };

    let payments = match RazorpayClient::new(&config) {
        Ok(client) => Some(PaymentState {
            config: config.clone(),
            payments: Arc::new(PaymentService::new(
                repos,
                Arc::new(client),
                notifier,
                config.payment_currency.clone(),
            )),
        }),
        Err(e) => {
            warn!("{} - payment routes disabled", e);
            None
        }
    };

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(appointments, payments)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
