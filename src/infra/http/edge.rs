//! The SDK-facing read surface.
//!
//! One route: resolve the feature list for an (environment, SDK key) pair.
//! Everything the cache reports as absent is a bare 404; a caller holding
//! the wrong key learns nothing about what exists.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::header::{ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use metrics::histogram;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::{CacheOrchestrator, FeatureCollection};
use crate::domain::features::{EnvironmentFeature, RoleType};

const METRIC_LOOKUP_MS: &str = "switchyard_edge_lookup_ms";

const SDK_KEY_HEADER: &str = "x-sdk-key";

#[derive(Clone)]
pub struct EdgeState {
    pub orchestrator: Arc<CacheOrchestrator>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturesQuery {
    sdk_key: Option<String>,
    exclude_retired: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturesResponse {
    pub environment_id: Uuid,
    pub service_account_id: Uuid,
    pub etag: String,
    pub features: Vec<EnvironmentFeature>,
}

pub(super) async fn environment_features(
    State(state): State<EdgeState>,
    Path(environment_id): Path<Uuid>,
    Query(query): Query<FeaturesQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(sdk_key) = sdk_key(&headers, &query) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let started_at = Instant::now();
    let collection = state.orchestrator.lookup(environment_id, &sdk_key).await;
    histogram!(METRIC_LOOKUP_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

    let Some(collection) = collection else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let etag = collection.snapshot.etag();
    let quoted = format!("\"{etag}\"");
    if headers
        .get(IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|candidate| candidate == quoted)
    {
        return StatusCode::NOT_MODIFIED.into_response();
    }

    let body = features_response(
        environment_id,
        &collection,
        query.exclude_retired.unwrap_or(false),
        etag,
    );
    ([(ETAG, quoted)], Json(body)).into_response()
}

fn sdk_key(headers: &HeaderMap, query: &FeaturesQuery) -> Option<String> {
    headers
        .get(SDK_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.sdk_key.clone())
        .filter(|key| !key.is_empty())
}

fn features_response(
    environment_id: Uuid,
    collection: &FeatureCollection,
    exclude_retired: bool,
    etag: String,
) -> FeaturesResponse {
    // Enrichment properties are extended data; strip them unless the grant
    // says otherwise.
    let extended = collection.grant.has_role(RoleType::ExtendedData);

    let features: Vec<EnvironmentFeature> = collection
        .snapshot
        .features()
        .into_iter()
        .filter(|feature| {
            !exclude_retired || !feature.state.as_ref().is_some_and(|state| state.retired)
        })
        .map(|feature| {
            if extended {
                feature
            } else {
                feature.without_properties()
            }
        })
        .collect();

    FeaturesResponse {
        environment_id,
        service_account_id: collection.service_account_id,
        etag,
        features,
    }
}
