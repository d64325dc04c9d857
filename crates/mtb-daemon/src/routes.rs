//! Axum router and all HTTP handlers for mtb-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Every path is mounted under the configured base path,
//! and the route index under the configured docs path.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use mtb_broker::BrokerError;
use mtb_schemas::{
    AckResponse, PendingResponse, PostResponseReply, PostResponseRequest, SetCallbackRequest,
    SetTokenRequest, TerminalMessage,
};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::{
    api_types::{
        CallbackResponse, ErrorResponse, EventResponse, HealthResponse, PendingQuery, RouteDoc,
        RouteIndex, StatusResponse, TakeQuery,
    },
    state::{AppState, BusMsg, RouteSettings},
};

/// Header accepted as an alternative to `Authorization: Bearer`.
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// (method, path under base, auth, summary). Drives both the router and the
/// route index, so the two cannot drift apart.
const ROUTES: &[(&str, &str, &str, &str)] = &[
    ("GET", "/health", "none", "liveness"),
    ("GET", "/status", "none", "queue depth, callback and token state"),
    ("GET", "/stream", "none", "server-sent broker events and heartbeats"),
    ("POST", "/commands/:name", "optional", "queue a command (body = payload) and wait for its response"),
    ("GET", "/commands/:name", "optional", "queue a command (raw query = payload) and wait for its response"),
    ("POST", "/terminal", "optional", "queue a caret-delimited terminal message and wait for its reply"),
    ("GET", "/poll/pending", "token", "has-command check; ?wait_ms= long-polls"),
    ("POST", "/poll/take", "token", "take the oldest pending command; 204 when empty; ?format=text"),
    ("POST", "/poll/response", "token", "answer a command by id or name"),
    ("POST", "/poll/callback", "token", "register or clear the event callback"),
    ("POST", "/poll/event", "token", "push an event to the registered callback"),
    ("POST", "/poll/auth-token", "token", "replace or clear the auth token"),
];

/// `base` + `path`, with a root base collapsing to the bare path.
fn mount(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Fails when the docs path would land on a mounted API route. A `:param`
/// segment matches anything, so `/v1/commands/docs` collides too.
pub fn check_mounts(routes: &RouteSettings) -> anyhow::Result<()> {
    let docs = segments(&routes.docs_path);
    for (_, path, _, _) in ROUTES {
        let mounted = mount(&routes.base_path, path);
        let route = segments(&mounted);
        let overlaps = route.len() == docs.len()
            && route
                .iter()
                .zip(&docs)
                .all(|(r, d)| r.starts_with(':') || r == d);
        if overlaps {
            anyhow::bail!(
                "'{}' collides with the mounted route '{}'",
                routes.docs_path,
                mounted
            );
        }
    }
    Ok(())
}

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let base = state.routes.base_path.clone();
    let docs = state.routes.docs_path.clone();

    Router::new()
        .route(&mount(&base, "/health"), get(health))
        .route(&mount(&base, "/status"), get(status_handler))
        .route(&mount(&base, "/stream"), get(stream))
        .route(
            &mount(&base, "/commands/:name"),
            post(post_command).get(get_command),
        )
        .route(&mount(&base, "/terminal"), post(terminal))
        .route(&mount(&base, "/poll/pending"), get(poll_pending))
        .route(&mount(&base, "/poll/take"), post(poll_take))
        .route(&mount(&base, "/poll/response"), post(poll_response))
        .route(&mount(&base, "/poll/callback"), post(poll_callback))
        .route(&mount(&base, "/poll/event"), post(poll_event))
        .route(&mount(&base, "/poll/auth-token"), post(poll_auth_token))
        .route(&docs, get(route_index))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Boundary wrapper: every broker failure leaves the daemon as one of these.
#[derive(Debug)]
pub struct ApiError(pub BrokerError);

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BrokerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            BrokerError::Unauthorized => StatusCode::UNAUTHORIZED,
            BrokerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            BrokerError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            BrokerError::DeliveryFailed(_) => StatusCode::BAD_GATEWAY,
            // Benign by contract; only reachable from /poll/response.
            BrokerError::NotFound(_) => {
                return (
                    StatusCode::OK,
                    Json(PostResponseReply {
                        resolved: false,
                        command_id: None,
                    }),
                )
                    .into_response()
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                kind: self.0.kind().to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, BrokerError> {
    serde_json::from_str(body).map_err(|e| BrokerError::InvalidRequest(format!("malformed body: {e}")))
}

/// Token from `Authorization: Bearer <t>` or `X-Auth-Token: <t>`.
pub fn presented_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, rest) = v.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| rest.trim().to_string())
        });
    bearer.or_else(|| {
        headers
            .get(AUTH_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
    })
}

fn text(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))],
        body,
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /health  /status
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(StatusResponse {
            service: st.build.service.to_string(),
            daemon_uptime_secs: st.uptime_secs(),
            config_hash: st.config_hash.clone(),
            broker: st.controller.status(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Inbound commands
// ---------------------------------------------------------------------------

async fn run_command(st: &AppState, headers: &HeaderMap, name: &str, payload: &str) -> ApiResult {
    st.controller
        .authorize_inbound(presented_token(headers).as_deref())?;
    let response = st
        .controller
        .handle_inbound_request(name, payload, st.controller.command_wait_timeout())
        .await?;
    Ok(text(StatusCode::OK, response))
}

pub(crate) async fn post_command(
    State(st): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: String,
) -> ApiResult {
    run_command(&st, &headers, &name, &body).await
}

pub(crate) async fn get_command(
    State(st): State<Arc<AppState>>,
    Path(name): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> ApiResult {
    run_command(&st, &headers, &name, query.as_deref().unwrap_or_default()).await
}

/// The message code names the command; the whole line is the payload.
pub(crate) async fn terminal(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> ApiResult {
    let request = TerminalMessage::parse(&body)
        .map_err(|e| BrokerError::InvalidRequest(format!("terminal message: {e}")))?;

    let resp = run_command(
        &st,
        &headers,
        &request.code,
        body.trim_end_matches(['\r', '\n']),
    ).await?;

    // Peek at the reply only to flag mismatched codes; it is returned as is.
    let (parts, reply) = resp.into_parts();
    let reply = axum::body::to_bytes(reply, usize::MAX)
        .await
        .map_err(|e| BrokerError::InvalidRequest(format!("reply body: {e}")))?;
    if let Ok(line) = std::str::from_utf8(&reply) {
        match TerminalMessage::parse(line) {
            Ok(m) if m.code != request.code => {
                warn!(request_code = %request.code, reply_code = %m.code, "terminal reply code differs from request");
            }
            Ok(_) => {}
            Err(e) => warn!(request_code = %request.code, error = %e, "terminal reply is not a caret message"),
        }
    }
    Ok(Response::from_parts(parts, axum::body::Body::from(reply)))
}

// ---------------------------------------------------------------------------
// Polling surface
// ---------------------------------------------------------------------------

pub(crate) async fn poll_pending(
    State(st): State<Arc<AppState>>,
    Query(q): Query<PendingQuery>,
    headers: HeaderMap,
) -> ApiResult {
    let token = presented_token(&headers);
    let pending = match q.wait_ms.filter(|ms| *ms > 0) {
        Some(ms) => {
            st.controller
                .poll_wait_for_command(token.as_deref(), Duration::from_millis(ms))
                .await?
        }
        None => st.controller.poll_has_command(token.as_deref())?,
    };
    Ok(Json(PendingResponse {
        pending,
        pending_count: st.controller.status().pending,
    })
    .into_response())
}

pub(crate) async fn poll_take(
    State(st): State<Arc<AppState>>,
    Query(q): Query<TakeQuery>,
    headers: HeaderMap,
) -> ApiResult {
    let Some(envelope) = st
        .controller
        .poll_take_command(presented_token(&headers).as_deref())?
    else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    match q.format.as_deref() {
        Some(f) if f.eq_ignore_ascii_case("text") => {
            Ok(text(StatusCode::OK, envelope.to_caret_line()))
        }
        _ => Ok(Json(envelope).into_response()),
    }
}

pub(crate) async fn poll_response(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> ApiResult {
    let token = presented_token(&headers);
    // Token first: a rejected caller learns nothing about the body.
    st.controller.authorize(token.as_deref())?;
    let req: PostResponseRequest = parse_json(&body)?;
    let command_id =
        st.controller
            .post_command_response(token.as_deref(), &req.command, &req.response)?;
    Ok(Json(PostResponseReply {
        resolved: command_id.is_some(),
        command_id,
    })
    .into_response())
}

pub(crate) async fn poll_callback(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> ApiResult {
    let token = presented_token(&headers);
    st.controller.authorize(token.as_deref())?;
    let req: SetCallbackRequest = parse_json(&body)?;
    let registration = st
        .controller
        .set_callback(token.as_deref(), &req.url, &req.format)?;
    Ok(Json(CallbackResponse {
        registered: registration.is_some(),
        url: registration.as_ref().map(|r| r.url.clone()),
        format: registration.map(|r| r.format.to_string()),
    })
    .into_response())
}

pub(crate) async fn poll_event(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> ApiResult {
    let dispatched = st
        .controller
        .raise_event(presented_token(&headers).as_deref(), &body)?;
    Ok(Json(EventResponse { dispatched }).into_response())
}

pub(crate) async fn poll_auth_token(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> ApiResult {
    let token = presented_token(&headers);
    st.controller.authorize(token.as_deref())?;
    let req: SetTokenRequest = parse_json(&body)?;
    st.controller.set_auth_token(token.as_deref(), &req.token)?;
    let _ = st.bus.send(BusMsg::LogLine {
        level: "INFO".to_string(),
        msg: "auth token replaced".to_string(),
    });
    Ok(Json(AckResponse { ok: true }).into_response())
}

// ---------------------------------------------------------------------------
// GET {docs_path}
// ---------------------------------------------------------------------------

pub(crate) async fn route_index(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let base = &st.routes.base_path;
    let mut routes: Vec<RouteDoc> = ROUTES
        .iter()
        .map(|(method, path, auth, summary)| RouteDoc {
            method: method.to_string(),
            path: mount(base, path),
            auth: auth.to_string(),
            summary: summary.to_string(),
        })
        .collect();
    routes.push(RouteDoc {
        method: "GET".to_string(),
        path: st.routes.docs_path.clone(),
        auth: "none".to_string(),
        summary: "this index".to_string(),
    });
    Json(RouteIndex {
        service: st.build.service.to_string(),
        version: st.build.version.to_string(),
        base_path: base.clone(),
        routes,
    })
}

// ---------------------------------------------------------------------------
// GET /stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    info!("sse client attached");
    let events = broadcast_to_sse(st.bus.subscribe()).take_until(st.shutdown_signal());

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(m.event_name()).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
