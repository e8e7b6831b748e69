use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::remote::SharedWorld;

/// `GET /progress`: the minimum progress across every simulator, i.e. the
/// time up to which the whole run's outputs are settled.
pub async fn get_progress(State(world): State<Arc<SharedWorld>>) -> Json<Value> {
    Json(json!({ "progress": world.min_progress().ticks() }))
}

/// `GET /simulators`: every simulator id in the sealed scenario.
pub async fn get_simulators(State(world): State<Arc<SharedWorld>>) -> Json<Value> {
    let ids: Vec<String> = world.graph.simulator_ids().map(|id| id.to_string()).collect();
    Json(json!({ "simulators": ids }))
}
