use std::net::SocketAddr;

use axum::{routing::get, Json, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::accounts;
use crate::accounts::dto::MessageResponse;
use crate::state::AppState;

async fn root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Welcome to the userhub account API".into(),
        detail: Some("See /auth/register and /auth/login to get started".into()),
    })
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(|| async { "ok" }))
        .merge(accounts::router())
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
