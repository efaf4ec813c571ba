use crate::logger::{self, LogTag};
use crate::shutdown;
use crate::webserver::routes::build_router;
use crate::webserver::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

/// Serve the control surface until shutdown is requested.
pub async fn start_server(state: Arc<AppState>, host: &str, port: u16) -> Result<(), String> {
    let app = build_router(state).layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| format!("Invalid bind address {}:{}: {}", host, port, e))?;

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    logger::info(
        LogTag::Webserver,
        &format!("Listening on http://{}", addr),
    );

    let shutdown_signal = async {
        shutdown::shutdown_notify().notified().await;
        logger::info(LogTag::Webserver, "Stopping webserver");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| format!("Server error: {}", e))?;

    Ok(())
}
