use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use webapp::database;
use webapp::rate_limiter::{RateLimiter, RateLimiterConfig};
use webapp::repositories::PostgresUserStore;
use webapp::routes;
use webapp::session::{SessionConfig, SessionStore};
use webapp::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting web application");

    // Initialize database connection pool
    let db_config = database::DatabaseConfig::from_env()?;
    let pool = database::init_pool(&db_config).await?;

    // Check database connectivity
    if database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    // The session store lives for the whole process and is handed to every
    // component through the application state.
    let state = AppState {
        user_store: Arc::new(PostgresUserStore::new(pool)),
        sessions: SessionStore::new(SessionConfig::default()),
        rate_limiter: RateLimiter::new(RateLimiterConfig::default()),
    };

    let app = routes::create_router(state);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Web application listening on {}", bind_addr);

    // connect-info makes the peer address visible to the IP resolver
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
