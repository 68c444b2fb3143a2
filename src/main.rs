mod coordinator;
mod dispatch;
mod error;
mod presence;
mod protocol;
mod reactions;
mod routes;
mod session;
mod state;
mod store;
mod utils {
    pub mod secret;
}

use axum::{
    http::{HeaderValue, Method},
    Extension, Router,
};
use sqlx::SqlitePool;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::coordinator::RoomCoordinator;
use crate::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let pool = SqlitePool::connect(&std::env::var("DATABASE_URL")?).await?;
    let store = Store::new(pool);
    store.init_schema().await?;

    let coordinator = RoomCoordinator::new(store);

    let app = Router::new()
        .merge(routes::router())
        .layer(Extension(coordinator))
        .layer(cors_layer());

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5001".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "relay listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

// same contract the old Express server exposed: explicit frontend origins,
// GET/POST, credentials allowed
fn cors_layer() -> CorsLayer {
    let origins: Vec<HeaderValue> = std::env::var("ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000".into())
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_credentials(true)
}
