use axum::{routing::get, Router};

pub mod ws;

pub fn router() -> Router {
    Router::new()
        .route("/", get(health))
        .nest("/ws", ws::router())
}

async fn health() -> &'static str {
    "Backend running"
}
