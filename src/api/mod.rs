//! A read-only HTTP introspection surface over a running scenario, gated
//! behind the `api` feature. Exposes the same facts C7's `get_progress`
//! gives simulators, to a human watching from outside.

mod handlers;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::remote::SharedWorld;

pub fn router(world: Arc<SharedWorld>) -> Router {
    Router::new()
        .route("/progress", get(handlers::get_progress))
        .route("/simulators", get(handlers::get_simulators))
        .with_state(world)
}
