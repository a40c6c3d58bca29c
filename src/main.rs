//! invite-gateway server entry point.
//!
//! Loads configuration, connects storage, starts the lifecycle sweeper and
//! serves the REST API until Ctrl+C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use invite_gateway::api;
use invite_gateway::app_state::AppState;
use invite_gateway::billing::{HttpPaymentGateway, PaymentGateway, SandboxPaymentGateway};
use invite_gateway::config::GatewayConfig;
use invite_gateway::persistence::{
    InMemoryRateLimiter, InMemoryStore, PostgresRateLimiter, PostgresStore, RateLimiter, Store,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(addr = %config.listen_addr, "starting invite-gateway");

    // Build persistence layer
    let (store, limiter): (Arc<dyn Store>, Arc<dyn RateLimiter>) = if config.persistence_enabled {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;
        if config.run_migrations {
            sqlx::migrate!().run(&pool).await?;
            tracing::info!("database migrations applied");
        }
        (
            Arc::new(PostgresStore::new(pool.clone())),
            Arc::new(PostgresRateLimiter::new(pool)),
        )
    } else {
        tracing::warn!("persistence disabled, state is kept in process memory");
        (
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryRateLimiter::new()),
        )
    };

    // Payment gateway
    let gateway: Arc<dyn PaymentGateway> = if config.payment.api_key.is_empty() {
        tracing::warn!("PAYMENT_API_KEY unset, using the sandbox payment gateway");
        Arc::new(SandboxPaymentGateway::new(&format!(
            "http://{}",
            config.listen_addr
        )))
    } else {
        Arc::new(HttpPaymentGateway::new(
            &config.payment.gateway_url,
            &config.payment.api_key,
        ))
    };

    // Build application state
    let sweep_interval = config.engine.sweep_interval_secs;
    let sweep_limiter = Arc::clone(&limiter);
    let app_state = AppState::new(
        store,
        limiter,
        gateway,
        config.engine.clone(),
        config.abuse.clone(),
        config.payment.clone(),
    );

    // Lifecycle and rate-limit sweeper
    if sweep_interval > 0 {
        let state_machine = Arc::clone(&app_state.state_machine);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(sweep_interval));
            loop {
                ticker.tick().await;
                match state_machine.sweep(chrono::Utc::now()).await {
                    Ok(0) => {}
                    Ok(moved) => tracing::info!(moved, "lifecycle sweep"),
                    Err(err) => tracing::error!(error = %err, "lifecycle sweep failed"),
                }
                match sweep_limiter.prune().await {
                    Ok(0) => {}
                    Ok(dropped) => tracing::debug!(dropped, "rate limit windows pruned"),
                    Err(err) => tracing::warn!(error = %err, "rate limit prune failed"),
                }
            }
        });
    }

    // Build router
    let app = api::build_router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
        }
    })
    .await?;

    Ok(())
}
