use std::error::Error;
use std::time::Duration;

use serde_json::json;
use smash_cloud::{
    config::Settings,
    db::{establish_connection, record_component_state, seed_defaults},
    router,
    voice::startup_greeting,
    AppState,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("smash_cloud=info,tower_http=info")),
        )
        .init();

    let settings = Settings::from_env();
    tokio::fs::create_dir_all(&settings.static_dir).await?;
    tokio::fs::create_dir_all(&settings.storage_dir).await?;

    tracing::info!(path = %settings.database_path, "opening database");
    let conn = establish_connection(&settings.database_path)?;
    seed_defaults(&conn, &settings).await?;

    let state = AppState::new(settings, conn)?;
    record_component_state(
        &state.db,
        "api",
        "active",
        Some(&json!({ "version": env!("CARGO_PKG_VERSION") })),
    )
    .await?;

    {
        // First tick fires immediately, so leftovers from the last run go too.
        let voice = state.voice.clone();
        tokio::spawn(async move {
            let mut hourly = tokio::time::interval(Duration::from_secs(3_600));
            loop {
                hourly.tick().await;
                if let Err(err) = voice.prune_audio().await {
                    tracing::warn!(error = %err, "audio cleanup failed");
                }
            }
        });
    }

    {
        let voice = state.voice.clone();
        let settings = state.settings.clone();
        tokio::spawn(async move { startup_greeting(&voice, &settings).await });
    }

    let addr = state.settings.bind_addr();
    let voice = state.voice.clone();
    let db = state.db.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "SMASH Cloud listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await?;

    voice.cleanup();
    record_component_state(&db, "api", "stopped", None).await?;
    Ok(())
}
