use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use awakened_backend::core::logging;
use awakened_backend::server::router::router;
use awakened_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let state = AppState::initialize().await?;
    logging::init(&state.paths);

    let bind_addr = format!("{}:{}", state.settings.server.host, state.settings.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;

    tracing::info!(
        corpus = %state.paths.corpus_db_path.display(),
        conversations = %state.paths.conversations_db_path.display(),
        "Stores ready"
    );
    tracing::info!("Listening on {}", addr);

    let app: Router = router(state.clone());
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
