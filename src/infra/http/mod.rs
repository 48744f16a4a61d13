//! HTTP surfaces: the public edge API for SDKs and the internal listener
//! for events and health, on two separate sockets.

use axum::routing::{get, post};
use axum::Router;

mod edge;
mod health;
mod ingest;

pub use edge::{EdgeState, FeaturesResponse};
pub use ingest::InternalState;

pub fn build_edge_router(state: EdgeState) -> Router {
    Router::new()
        .route(
            "/edge/v1/environments/{environment_id}/features",
            get(edge::environment_features),
        )
        .with_state(state)
}

pub fn build_internal_router(state: InternalState) -> Router {
    Router::new()
        .route("/internal/v1/events", post(ingest::receive_event))
        .route("/internal/v1/health/liveness", get(health::liveness))
        .route("/internal/v1/health/readiness", get(health::readiness))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::cache::{CacheConfig, CacheOrchestrator};
    use crate::domain::events::{PublishAction, ServiceAccountChange};
    use crate::events::{DeliveryPool, EventEnvelope, ReceiverRegistry};
    use crate::upstream::MemoryUpstream;

    fn internal_state() -> (InternalState, Arc<ReceiverRegistry>) {
        let upstream = Arc::new(MemoryUpstream::new());
        let orchestrator = Arc::new(CacheOrchestrator::new(CacheConfig::default(), upstream));
        let receiver = Arc::new(ReceiverRegistry::new(Arc::new(DeliveryPool::new(4))));
        (
            InternalState {
                orchestrator,
                receiver: receiver.clone(),
            },
            receiver,
        )
    }

    #[tokio::test]
    async fn liveness_responds_ok() {
        let (state, _) = internal_state();
        let router = build_internal_router(state);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/internal/v1/health/liveness")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_reports_the_cache_mode() {
        let (state, _) = internal_state();
        let router = build_internal_router(state);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/internal/v1/health/readiness")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["cacheMode"], "passthrough");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn posted_events_reach_registered_handlers() {
        let (state, receiver) = internal_state();
        let router = build_internal_router(state);

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        receiver.listen::<ServiceAccountChange>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let envelope = EventEnvelope::encode(
            &ServiceAccountChange {
                action: PublishAction::Empty,
                service_account: None,
            },
            false,
        )
        .unwrap();

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/internal/v1/events")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&envelope).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        for _ in 0..100 {
            if delivered.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("event never reached the handler");
    }
}
