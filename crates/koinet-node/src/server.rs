//! HTTP server: the five peer-facing endpoints.
//!
//! Every request body is a signed envelope, validated before dispatch;
//! every successful response is a signed envelope addressed back to the
//! caller. Validation failures map onto the wire error model with a
//! non-200 status.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use koinet_protocol::api::{
    BundlesPayload, ErrorResponse, EventsPayload, FetchBundles, FetchManifests, FetchRids,
    ManifestsPayload, PollEvents, RidsPayload, BROADCAST_EVENTS_PATH, FETCH_BUNDLES_PATH,
    FETCH_MANIFESTS_PATH, FETCH_RIDS_PATH, POLL_EVENTS_PATH,
};
use koinet_protocol::SignedEnvelope;
use koinet_storage::Cache;
use koinet_types::{KoiNetError, Result, Rid};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::knowledge::{KnowledgeObject, KnowledgeSource};
use crate::network::event_queue::NetworkEventQueue;
use crate::pipeline::KnowledgePipeline;
use crate::secure::Secure;

/// Shared state behind every route.
pub struct ServerState {
    pub(crate) cache: Arc<dyn Cache>,
    pub(crate) secure: Arc<Secure>,
    pub(crate) pipeline: Arc<KnowledgePipeline>,
    pub(crate) event_queue: Arc<NetworkEventQueue>,
}

/// Builds the protocol router.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route(BROADCAST_EVENTS_PATH, post(broadcast_events))
        .route(POLL_EVENTS_PATH, post(poll_events))
        .route(FETCH_RIDS_PATH, post(fetch_rids))
        .route(FETCH_MANIFESTS_PATH, post(fetch_manifests))
        .route(FETCH_BUNDLES_PATH, post(fetch_bundles))
        .with_state(state)
}

fn error_response(err: &KoiNetError) -> Response {
    match ErrorResponse::from_error(err) {
        Some(body) => {
            let status = match body.error {
                koinet_protocol::api::WireErrorKind::UnknownNode => StatusCode::NOT_FOUND,
                koinet_protocol::api::WireErrorKind::InvalidKey
                | koinet_protocol::api::WireErrorKind::InvalidSignature => {
                    StatusCode::UNAUTHORIZED
                }
                koinet_protocol::api::WireErrorKind::InvalidTarget => StatusCode::FORBIDDEN,
            };
            (status, Json(body)).into_response()
        }
        None => {
            warn!(error = %err, "internal error handling request");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Validates the inbound envelope and wraps `reply` back to the caller.
async fn enveloped<T: Serialize>(
    state: &ServerState,
    envelope: &SignedEnvelope,
    reply: Result<T>,
) -> Response {
    match reply.and_then(|payload| {
        state
            .secure
            .create_envelope(&payload, &envelope.source_node)
    }) {
        Ok(out) => Json(out).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn broadcast_events(
    State(state): State<Arc<ServerState>>,
    Json(envelope): Json<SignedEnvelope>,
) -> Response {
    if let Err(e) = state.secure.validate_envelope(&envelope).await {
        return error_response(&e);
    }
    let reply = handle_broadcast(&state, &envelope);
    enveloped(&state, &envelope, reply).await
}

fn handle_broadcast(state: &ServerState, envelope: &SignedEnvelope) -> Result<serde_json::Value> {
    let payload: EventsPayload = envelope.payload_as()?;
    let source = envelope.source_node.clone();
    debug!(%source, count = payload.events.len(), "received event broadcast");
    for event in payload.events {
        state.pipeline.enqueue(KnowledgeObject::from_event(
            event,
            KnowledgeSource::External(source.clone()),
        ));
    }
    // Process after responding; the drain guard serializes with any
    // concurrent drains.
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        if let Err(e) = pipeline.drain().await {
            warn!(error = %e, "pipeline drain after broadcast failed");
        }
    });
    Ok(json!({}))
}

async fn poll_events(
    State(state): State<Arc<ServerState>>,
    Json(envelope): Json<SignedEnvelope>,
) -> Response {
    if let Err(e) = state.secure.validate_envelope(&envelope).await {
        return error_response(&e);
    }
    let reply = envelope.payload_as::<PollEvents>().map(|payload| {
        let events = state.event_queue.drain_poll(&payload.rid, payload.limit);
        debug!(peer = %payload.rid, count = events.len(), "drained poll mailbox");
        EventsPayload { events }
    });
    enveloped(&state, &envelope, reply).await
}

async fn fetch_rids(
    State(state): State<Arc<ServerState>>,
    Json(envelope): Json<SignedEnvelope>,
) -> Response {
    if let Err(e) = state.secure.validate_envelope(&envelope).await {
        return error_response(&e);
    }
    let reply = envelope
        .payload_as::<FetchRids>()
        .and_then(|payload| list_rids(state.cache.as_ref(), &payload.rid_types))
        .map(|rids| RidsPayload { rids });
    enveloped(&state, &envelope, reply).await
}

fn list_rids(cache: &dyn Cache, rid_types: &[String]) -> Result<Vec<Rid>> {
    let mut rids = cache.list_rids()?;
    if !rid_types.is_empty() {
        rids.retain(|rid| rid_types.iter().any(|p| rid.has_type(p)));
    }
    Ok(rids)
}

async fn fetch_manifests(
    State(state): State<Arc<ServerState>>,
    Json(envelope): Json<SignedEnvelope>,
) -> Response {
    if let Err(e) = state.secure.validate_envelope(&envelope).await {
        return error_response(&e);
    }
    let reply = envelope
        .payload_as::<FetchManifests>()
        .and_then(|payload| handle_fetch_manifests(&state, payload));
    enveloped(&state, &envelope, reply).await
}

fn handle_fetch_manifests(
    state: &ServerState,
    payload: FetchManifests,
) -> Result<ManifestsPayload> {
    let mut reply = ManifestsPayload::default();
    let rids = if payload.rids.is_empty() {
        list_rids(state.cache.as_ref(), &payload.rid_types)?
    } else {
        payload.rids
    };
    for rid in rids {
        match state.cache.read(&rid)? {
            Some(bundle) => reply.manifests.push(bundle.manifest),
            None => reply.not_found.push(rid),
        }
    }
    Ok(reply)
}

async fn fetch_bundles(
    State(state): State<Arc<ServerState>>,
    Json(envelope): Json<SignedEnvelope>,
) -> Response {
    if let Err(e) = state.secure.validate_envelope(&envelope).await {
        return error_response(&e);
    }
    let reply = envelope.payload_as::<FetchBundles>().and_then(|payload| {
        let mut out = BundlesPayload::default();
        for rid in payload.rids {
            match state.cache.read(&rid)? {
                Some(bundle) => out.bundles.push(bundle),
                None => out.not_found.push(rid),
            }
        }
        Ok(out)
    });
    enveloped(&state, &envelope, reply).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
