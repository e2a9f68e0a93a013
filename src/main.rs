use std::sync::Arc;

use anyhow::Result;

use serviceman_backend::services::{LogDelivery, NotificationDelivery, PaystackClient, RedisQueueDelivery};
use serviceman_backend::store::PgWorkflowStore;
use serviceman_backend::{app, config, db, logging};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = config::Settings::from_env()?;

    // Initialize logging
    logging::init_logging(&settings.env);

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        "Starting serviceman backend"
    );

    // Create database pool and bring the schema up to date
    let pool = db::create_pool(&settings).await?;
    db::run_migrations(&pool).await?;
    let store = Arc::new(PgWorkflowStore::new(pool));

    // Outbound notification queue; in-app records still work without it
    let delivery: Arc<dyn NotificationDelivery> =
        match RedisQueueDelivery::connect(&settings.redis_url, settings.notification_queue_key.clone()).await {
            Ok(queue) => Arc::new(queue),
            Err(e) => {
                tracing::warn!(error = %e, "Notification queue unavailable - falling back to log delivery");
                Arc::new(LogDelivery)
            }
        };

    // Payment gateway
    let gateway = Arc::new(PaystackClient::new(
        &settings.paystack_base_url,
        &settings.paystack_secret_key,
        settings.paystack_timeout_seconds,
    )?);

    // Create application state
    let state = app::AppState::new(store, settings.clone(), delivery, gateway);

    // Build application
    let app = app::create_app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
