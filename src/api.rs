//! HTTP command surface: the REST endpoints, the `/ws` push channel and `/metrics`.
//!
//! | Route              | Purpose                                       |
//! |--------------------|-----------------------------------------------|
//! | `POST /api/start`  | start a server-driven task                    |
//! | `POST /api/stop`   | stop whatever is running (idempotent)         |
//! | `GET /api/status`  | current task snapshot                         |
//! | `GET /ws`          | WebSocket upgrade into an observer session    |
//! | `GET /metrics`     | Prometheus text exposition                    |
//! | `GET /health`      | liveness                                      |

use hyper::header::{
    HeaderName, HeaderValue, CONNECTION, CONTENT_TYPE, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE,
};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::errors::ApiError;
use crate::gateway::Gateway;
use crate::metrics::gather_metrics_string;
use crate::scheduler::CommandResult;
use crate::task::TaskRequest;

const KNOWN_PATHS: [&str; 6] = [
    "/api/start",
    "/api/stop",
    "/api/status",
    "/ws",
    "/metrics",
    "/health",
];

/// Routes one request.
pub async fn handle_request(
    req: Request<Body>,
    gateway: Gateway,
) -> Result<Response<Body>, hyper::Error> {
    debug!(method = %req.method(), path = req.uri().path(), "Request");

    let response = match (req.method(), req.uri().path()) {
        (&Method::POST, "/api/start") => start_handler(req, &gateway).await?,
        (&Method::POST, "/api/stop") => json_response(StatusCode::OK, &gateway.scheduler().stop()),
        (&Method::GET, "/api/status") => {
            json_response(StatusCode::OK, &gateway.scheduler().snapshot())
        }
        (&Method::GET, "/ws") => websocket_upgrade(req, gateway),
        (&Method::GET, "/metrics") => {
            let mut response =
                Response::new(Body::from(gather_metrics_string(prometheus::default_registry())));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        (&Method::GET, "/health") => {
            json_response(StatusCode::OK, &serde_json::json!({"status": "ok"}))
        }
        (_, path) if KNOWN_PATHS.contains(&path) => {
            text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
        }
        _ => text_response(StatusCode::NOT_FOUND, "not found"),
    };

    Ok(response)
}

async fn start_handler(req: Request<Body>, gateway: &Gateway) -> Result<Response<Body>, hyper::Error> {
    let body = hyper::body::to_bytes(req.into_body()).await?;

    let request: TaskRequest = if body.iter().all(u8::is_ascii_whitespace) {
        TaskRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                return Ok(json_response(
                    StatusCode::BAD_REQUEST,
                    &CommandResult::failure(format!("Invalid JSON body: {}", e)),
                ));
            }
        }
    };

    let result = gateway.scheduler().start(&request.into_server_mode());
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    Ok(json_response(status, &result))
}

fn is_websocket_request(req: &Request<Body>) -> bool {
    let header_has = |name: HeaderName, token: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .any(|part| part.trim().eq_ignore_ascii_case(token))
            })
            .unwrap_or(false)
    };
    header_has(CONNECTION, "upgrade") && header_has(UPGRADE, "websocket")
}

/// Answers the handshake and hands the upgraded connection to the gateway.
fn websocket_upgrade(mut req: Request<Body>, gateway: Gateway) -> Response<Body> {
    if !is_websocket_request(&req) {
        return text_response(StatusCode::BAD_REQUEST, "expected a WebSocket upgrade");
    }
    let accept = match req.headers().get(SEC_WEBSOCKET_KEY) {
        Some(key) => derive_accept_key(key.as_bytes()),
        None => return text_response(StatusCode::BAD_REQUEST, "missing Sec-WebSocket-Key"),
    };
    let accept = match HeaderValue::from_str(&accept) {
        Ok(value) => value,
        Err(_) => return text_response(StatusCode::INTERNAL_SERVER_ERROR, "bad accept key"),
    };

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let ws = WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;
                gateway.serve_observer(ws).await;
            }
            Err(e) => warn!(error = %e, "WebSocket upgrade failed"),
        }
    });

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    response
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => text_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("failed to encode response: {}", e),
        ),
    }
}

fn text_response(status: StatusCode, text: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(text.to_string()));
    *response.status_mut() = status;
    response
}

/// Binds the listener and returns its address plus the future that runs it.
///
/// The server drains in-flight requests once `shutdown` resolves.
pub fn bind<F>(
    addr: SocketAddr,
    gateway: Gateway,
    shutdown: F,
) -> Result<(SocketAddr, impl Future<Output = Result<(), ApiError>>), ApiError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let builder = Server::try_bind(&addr).map_err(|source| ApiError::Bind {
        addr: addr.to_string(),
        source,
    })?;

    let make_svc = make_service_fn(move |_conn| {
        let gateway = gateway.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| handle_request(req, gateway.clone())))
        }
    });

    let server = builder.serve(make_svc);
    let local_addr = server.local_addr();
    info!(addr = %local_addr, "Command surface listening (REST under /api, push channel at /ws)");

    let run = async move {
        server
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ApiError::from)
    };
    Ok((local_addr, run))
}

/// Binds and runs until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, gateway: Gateway, shutdown: F) -> Result<(), ApiError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (_, run) = bind(addr, gateway, shutdown)?;
    run.await
}
