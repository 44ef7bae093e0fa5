use copay_ledger::{
    api::{self, AppState},
    config::{database, server::resolve_bind_address, settings},
    core::{
        allocation::seed_allocations,
        expiry::{expire_lapsed_allocations, format_expiry_summary, is_sweep_needed},
        recovery::RecoveryPolicy,
    },
    errors::Result,
};
use chrono::Utc;
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Load the service configuration
    let config = settings::load_default_config()
        .inspect_err(|e| error!("Failed to load configuration: {}", e))?;
    let recovery = RecoveryPolicy::from(&config.recovery);

    // 4. Connect and create tables, retrying while the database is unreachable
    let db = recovery
        .run("connect", database::create_connection)
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Seed allocations listed in the config; existing periods are skipped
    let seeded = seed_allocations(&db, &config.allocations)
        .await
        .inspect_err(|e| error!("Failed to seed allocations: {}", e))?;
    if seeded > 0 {
        info!(seeded, "Seeded allocations from config");
    }

    // 6. Expire lapsed allocations unless that already happened today
    let today = Utc::now().date_naive();
    if is_sweep_needed(&db, today).await? {
        let result = expire_lapsed_allocations(&db, today).await?;
        info!("{}", format_expiry_summary(&result));
    }

    // 7. Serve the API
    let bind_address = resolve_bind_address(&config.server);
    let listener = TcpListener::bind(&bind_address)
        .await
        .inspect_err(|e| error!("Failed to bind {}: {}", bind_address, e))?;
    let state = AppState::new(db, recovery, config.ledger.reconciliation_tolerance);

    api::serve(listener, Arc::new(state)).await
}
