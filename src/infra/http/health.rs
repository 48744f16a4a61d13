use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::ingest::InternalState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Readiness {
    status: &'static str,
    cache_mode: &'static str,
}

pub(super) async fn liveness() -> &'static str {
    "ok"
}

pub(super) async fn readiness(State(state): State<InternalState>) -> Json<Readiness> {
    Json(Readiness {
        status: "ok",
        cache_mode: state.orchestrator.mode().as_str(),
    })
}
