use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{info_span, warn, Level};

use crate::{
    limiter::{Decision, Limiter},
    policy::Policy,
};

pub fn router(limiter: Arc<Limiter>) -> Router {
    Router::new()
        .route("/limited", get(limited))
        .route("/unlimited", get(unlimited))
        .with_state(limiter)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

// method, path and user agent on the span; status and latency come from the
// response event
fn request_span(request: &Request<Body>) -> tracing::Span {
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");

    info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        user_agent,
    )
}

#[derive(Debug, Deserialize)]
struct LimitedParams {
    user: Option<String>,
}

#[derive(Debug, Serialize)]
struct RejectedBody {
    error: &'static str,
    retry_at: Option<String>,
}

async fn limited(
    State(limiter): State<Arc<Limiter>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(params): Query<LimitedParams>,
) -> Response {
    let (key, policy) = match params.user {
        Some(user) => (format!("user:{user}"), Policy::Authenticated),
        None => {
            let ip = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));
            (format!("ip:{ip}"), Policy::Anonymous)
        }
    };

    match limiter.check(&key, &policy.config()) {
        Decision::Allowed => (StatusCode::OK, "Limited, don't over use me!").into_response(),
        Decision::Rejected { retry_after } => {
            warn!(key = %key, ?retry_after, "rate limit exceeded");
            too_many_requests(retry_after)
        }
    }
}

async fn unlimited() -> &'static str {
    "Unlimited! Let's Go!"
}

fn too_many_requests(retry_after: Duration) -> Response {
    let secs = retry_after
        .as_secs()
        .saturating_add(u64::from(retry_after.subsec_nanos() > 0));
    let retry_at = TimeDelta::from_std(retry_after)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .map(|at| at.to_rfc3339());

    let body = RejectedBody {
        error: "Rate limit exceeded - please try again later.",
        retry_at,
    };

    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, secs.to_string())],
        Json(body),
    )
        .into_response()
}

/// First hop of `X-Forwarded-For`, then `X-Real-IP`, then the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(first) = header_value("x-forwarded-for").and_then(|v| v.split(',').next()) {
        return first.trim().to_string();
    }
    if let Some(real_ip) = header_value("x-real-ip") {
        return real_ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
