//! Axum router construction.

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

use super::{handlers, middleware, state::AppState};

/// Build the application [`Router`] with all routes and middleware attached.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/users", post(handlers::create_user))
        .route("/users/lookup", get(handlers::lookup_user))
        .route("/users/:id", get(handlers::get_user).put(handlers::update_user))
        .route("/users/:id/goal", get(handlers::get_goal).put(handlers::put_goal))
        .route(
            "/users/:id/journal",
            get(handlers::list_journal_entries).put(handlers::put_journal_entry),
        )
        .route(
            "/users/:id/journal/:local_date",
            delete(handlers::delete_journal_entry),
        )
        .route("/users/:id/import", post(handlers::import))
        .fallback(handlers::fallback)
        .layer(DefaultBodyLimit::max(middleware::MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(middleware::REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .with_state(state)
}
