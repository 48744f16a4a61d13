//! HTTP event binding for the internal listener.
//!
//! The management server (or a relay) POSTs envelopes here; they are handed
//! straight to the receiver registry. Broker bindings replace this route in
//! deployments that run a real transport.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::cache::CacheOrchestrator;
use crate::events::{EventEnvelope, ReceiverRegistry};

#[derive(Clone)]
pub struct InternalState {
    pub orchestrator: Arc<CacheOrchestrator>,
    pub receiver: Arc<ReceiverRegistry>,
}

pub(super) async fn receive_event(
    State(state): State<InternalState>,
    Json(envelope): Json<EventEnvelope>,
) -> StatusCode {
    state.receiver.process(&envelope);
    StatusCode::ACCEPTED
}
