use std::sync::Arc;

use sms_autopilot::config::{EngineConfig, Lexicons};
use sms_autopilot::engine::Engine;
use sms_autopilot::store::{LibSqlStore, RecordStore};
use sms_autopilot::transport::{HttpTransport, SmsTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::from_env()?;

    let api_base = std::env::var("SMS_API_BASE_URL").unwrap_or_else(|_| {
        eprintln!("Error: SMS_API_BASE_URL not set");
        std::process::exit(1);
    });
    let api_key = std::env::var("SMS_API_KEY").unwrap_or_else(|_| {
        eprintln!("Error: SMS_API_KEY not set");
        std::process::exit(1);
    });

    let db_path =
        std::env::var("AUTOPILOT_DB_PATH").unwrap_or_else(|_| "./data/autopilot.db".to_string());

    eprintln!("SMS Autopilot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {db_path}");
    eprintln!(
        "   Quiet hours: {}-{} {} ({})",
        config.quiet_start_hour,
        config.quiet_end_hour,
        config.business_timezone,
        if config.quiet_hours_enabled { "enforced" } else { "off" }
    );

    let store: Arc<dyn RecordStore> =
        Arc::new(LibSqlStore::new_local(std::path::Path::new(&db_path)).await?);

    let transport: Arc<dyn SmsTransport> = Arc::new(HttpTransport::new(
        api_base,
        secrecy::SecretString::from(api_key),
    )?);

    let poll_interval = config.poll_interval;
    let engine = Engine::new(config, &Lexicons::default(), store, transport);

    tracing::info!(interval = ?poll_interval, "Worker loop starting");
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        let now = chrono::Utc::now();

        match engine.poll_once(now).await {
            Ok(0) => {}
            Ok(n) => tracing::info!(processed = n, "Inbound batch processed"),
            Err(e) => tracing::error!(error = %e, "Inbound poll failed"),
        }

        if let Err(e) = engine.flush_deferred(now).await {
            tracing::error!(error = %e, "Deferred flush failed");
        }
    }
}
