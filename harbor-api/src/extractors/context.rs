//! Per-request context.
//!
//! Built fresh for every request from its headers and connection info, and
//! passed to handlers as an extractor value.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Header carrying a caller-supplied request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Facts about the request being served.
#[derive(Debug, Clone, Serialize)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub method: String,
    pub path: String,
    /// `x-real-ip`, then the first `x-forwarded-for` hop, then the peer.
    pub client_ip: Option<IpAddr>,
    pub received_at: DateTime<Utc>,
}

impl RequestContext {
    /// Build the context from request parts.
    pub fn from_parts(parts: &Parts) -> Self {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Self {
            request_id: request_id(&parts.headers),
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            client_ip: client_ip(&parts.headers, peer),
            received_at: Utc::now(),
        }
    }
}

fn request_id(headers: &HeaderMap) -> Uuid {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .unwrap_or_else(Uuid::now_v7)
}

/// Resolve the client address, trusting proxy headers first.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
    let header_ip = |name: &str| -> Option<IpAddr> {
        headers
            .get(name)?
            .to_str()
            .ok()?
            .split(',')
            .next()?
            .trim()
            .parse()
            .ok()
    };
    header_ip("x-real-ip")
        .or_else(|| header_ip("x-forwarded-for"))
        .or(peer)
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<RequestContext>() {
            return Ok(existing.clone());
        }
        let context = RequestContext::from_parts(parts);
        parts.extensions.insert(context.clone());
        Ok(context)
    }
}
