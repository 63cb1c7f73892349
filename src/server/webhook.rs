//! Webhook endpoint handler.
//!
//! Ingress runs cheap checks first and never processes inline: source
//! allowlist, then signature, then parse, then hand-off to the dispatcher.
//! A delivery is answered 202 the moment it is queued; everything after
//! that is asynchronous and audited through execution records.

use std::net::IpAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{debug, warn};

use super::AppState;
use crate::dispatch::{BacklogFull, Delivery, Enqueued};
use crate::types::DeliveryId;
use crate::webhooks::{ParseError, parse_event, verify_signature};

/// Header name for GitHub event type.
const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub delivery ID.
const HEADER_DELIVERY: &str = "x-github-delivery";
/// Header name for GitHub signature.
const HEADER_SIGNATURE: &str = "x-hub-signature-256";
/// Proxy-provided client address, honored only when configured.
const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";

/// Reasons a delivery is rejected at ingress.
#[derive(Debug, Error)]
pub enum IngressError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// Source address outside every allowed range.
    #[error("source address not allowed: {0}")]
    ForbiddenSource(IpAddr),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("unparseable payload: {0}")]
    Unparseable(#[from] ParseError),

    /// The entity's queue is full; GitHub will redeliver.
    #[error(transparent)]
    Backlog(#[from] BacklogFull),
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngressError::MissingHeader(_) | IngressError::Unparseable(_) => {
                StatusCode::BAD_REQUEST
            }
            IngressError::ForbiddenSource(_) => StatusCode::FORBIDDEN,
            IngressError::InvalidSignature => StatusCode::UNAUTHORIZED,
            IngressError::Backlog(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.to_string()).into_response()
    }
}

/// Accepts a GitHub webhook delivery and queues it for processing.
///
/// Responses:
/// - 202: queued (or duplicate/no-op, both acknowledged)
/// - 400: missing headers or unparseable payload for a known event type
/// - 401: signature mismatch
/// - 403: source address outside the allowlist
/// - 503: the entity's queue is full; redelivery will be accepted later
pub async fn webhook_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), IngressError> {
    let event_type = get_header(&headers, HEADER_EVENT)?;
    let delivery_id = DeliveryId::new(get_header(&headers, HEADER_DELIVERY)?);
    debug!(delivery = %delivery_id, event = %event_type, "received webhook");

    if let Some(allowlist) = state.allowlist() {
        let addr = client_ip(&headers, peer.ip(), state.trust_forwarded());
        if !allowlist.is_allowed(addr) {
            warn!(delivery = %delivery_id, %addr, "rejecting delivery from outside allowlist");
            return Err(IngressError::ForbiddenSource(addr));
        }
    }

    if let Some(secret) = state.webhook_secret() {
        let signature = get_header(&headers, HEADER_SIGNATURE)?;
        if !verify_signature(&body, &signature, secret) {
            warn!(delivery = %delivery_id, "invalid webhook signature");
            return Err(IngressError::InvalidSignature);
        }
    }

    let event = parse_event(&event_type, &body)?;

    match state
        .dispatcher()
        .enqueue(Delivery::new(delivery_id, event))
        .await?
    {
        Enqueued::Queued => Ok((StatusCode::ACCEPTED, "accepted")),
        Enqueued::Duplicate => Ok((StatusCode::ACCEPTED, "accepted (duplicate)")),
        Enqueued::Unroutable => Ok((StatusCode::ACCEPTED, "accepted (nothing to do)")),
    }
}

/// Extracts a required header value as a string.
fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, IngressError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(IngressError::MissingHeader(name))
}

/// The address to allowlist-check: the first `x-forwarded-for` hop when the
/// deployment trusts its proxy, otherwise the socket peer.
fn client_ip(headers: &HeaderMap, peer: IpAddr, trust_forwarded: bool) -> IpAddr {
    if trust_forwarded {
        if let Some(forwarded) = headers.get(HEADER_FORWARDED_FOR).and_then(|v| v.to_str().ok())
        {
            if let Some(first) = forwarded.split(',').next() {
                if let Ok(addr) = first.trim().parse() {
                    return addr;
                }
            }
        }
    }
    peer
}
