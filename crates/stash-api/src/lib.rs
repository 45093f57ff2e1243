//! stash-api - sync server for stash
//!
//! Serves `POST /sync/pull` and `POST /sync/push` over a libSQL-backed
//! document store. Every document belongs to exactly one owner and is
//! replaced as a whole on push.

pub mod config;
pub mod error;
pub mod rate_limit;
pub mod routes;
pub mod store;

use std::future::Future;

use tokio::net::TcpListener;

pub use config::AppConfig;
pub use routes::{app_router, AppState};
pub use store::DocumentStore;

/// Serve the sync API on `listener` until `shutdown` resolves.
///
/// In-flight requests are allowed to finish; the store stays open and is
/// closed by the caller.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
