//! 🌐 The Server — axum out front, the gateway in the back.
//!
//! Every path lands in one fallback handler. It checks the caller against the
//! allow-list, routes the path, runs the operation, and wraps the outcome in an
//! envelope. Strangers get "Really?!" and a closed door. 🦆

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, DefaultBodyLimit, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::app_config::ServerConfig;
use crate::dispatcher::route;
use crate::envelope::Envelope;
use crate::handlers::Gateway;

/// 🚫 What a caller outside the allow-list gets. Not an envelope. Not negotiable.
pub const REJECTION_MESSAGE: &str = "Really?!";

#[derive(Debug, Clone)]
pub struct ServerState {
    gateway: Arc<Gateway>,
    allowed_ips: Arc<[IpAddr]>,
    path_prefix: Arc<str>,
}

impl ServerState {
    pub fn new(gateway: Gateway, config: &ServerConfig) -> Self {
        Self {
            gateway: Arc::new(gateway),
            allowed_ips: config.allowed_ips.iter().map(IpAddr::to_canonical).collect(),
            path_prefix: Arc::from(config.path_prefix.as_str()),
        }
    }

    /// 🔒 IPv4 callers on a dual-stack socket show up as `::ffff:a.b.c.d`. Canonicalize first.
    fn is_allowed(&self, peer: IpAddr) -> bool {
        self.allowed_ips.contains(&peer.to_canonical())
    }
}

/// 🏗️ The whole HTTP surface: one fallback, a body limit, and request tracing.
pub fn router(state: ServerState, max_body_bytes: usize) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn dispatch(
    State(state): State<ServerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    if !state.is_allowed(peer.ip()) {
        warn!("🚫 {} tried {} {} and was turned away", peer.ip(), method, uri.path());
        return (StatusCode::FORBIDDEN, REJECTION_MESSAGE).into_response();
    }

    let call = match route(uri.path(), &state.path_prefix) {
        Ok(call) => call,
        Err(err) => return err.into_response(),
    };

    match state.gateway.handle(&method, &call, &body).await {
        Ok(result) => Envelope::ok(result).into_response(),
        Err(err) => err.into_response(),
    }
}

/// 🚀 Bind, serve, and keep serving until ctrl-c.
pub async fn serve(gateway: Gateway, config: &ServerConfig) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("💀 Could not bind to '{}'. Is something else already sitting there?", config.bind))?;
    info!("🌐 esgate listening on {}", config.bind);

    let app = router(ServerState::new(gateway, config), config.max_body_bytes);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("💀 The server fell over mid-flight")?;

    info!("👋 esgate has left the building");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("⚠️ Could not listen for ctrl-c ({}). Shutting down right away.", err);
        return;
    }
    info!("🛑 ctrl-c received, draining in-flight requests");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::ImportConfig;
    use crate::backends::{InMemoryBackend, SearchBackend};
    use crate::session::{DEFAULT_SESSION_TTL_SECS, InMemorySessionStore, SessionBackend};
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app_for(peer: &str) -> Router {
        let gateway = Gateway::new(
            SearchBackend::InMemory(InMemoryBackend::new()),
            SessionBackend::InMemory(InMemorySessionStore::new(DEFAULT_SESSION_TTL_SECS)),
            ImportConfig::default(),
        );
        let config = ServerConfig::default();
        let peer: SocketAddr = peer.parse().expect("💀 test peer must parse");
        router(ServerState::new(gateway, &config), config.max_body_bytes).layer(MockConnectInfo(peer))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Vec<u8>) {
        let body = if body.is_null() {
            Body::empty()
        } else {
            Body::from(serde_json::to_vec(&body).expect("💀 serialize"))
        };
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .expect("💀 request must build");
        let response = app.clone().oneshot(request).await.expect("💀 router is infallible");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("💀 body must collect")
            .to_bytes()
            .to_vec();
        (status, bytes)
    }

    fn envelope(bytes: &[u8]) -> Envelope {
        serde_json::from_slice(bytes).expect("💀 every answer is an envelope")
    }

    #[tokio::test]
    async fn the_one_where_strangers_get_really_and_nothing_else() {
        let app = app_for("203.0.113.9:5555");
        let (status, body) = send(&app, "GET", "/api/currentDB", Value::Null).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, REJECTION_MESSAGE.as_bytes());
    }

    #[tokio::test]
    async fn the_one_where_a_mapped_ipv4_caller_is_still_local() {
        let app = app_for("[::ffff:127.0.0.1]:5555");
        let (status, body) = send(&app, "GET", "/api/currentDB", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert!(envelope(&body).success);
    }

    #[tokio::test]
    async fn the_one_where_a_write_and_a_read_ride_in_envelopes() {
        let app = app_for("127.0.0.1:4000");
        let (status, body) = send(
            &app,
            "PUT",
            "/api/insert",
            json!({"database": "people", "table": "person", "key": "7", "fields": {"username": "seven"}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(envelope(&body), Envelope::ok(json!({"version": 1})));

        let (_, body) = send(&app, "GET", "/api/select/people/person/7", Value::Null).await;
        assert_eq!(envelope(&body).result, json!({"username": "seven"}));

        let (status, body) = send(&app, "DELETE", "/api/deleteDocument/people/person/404", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        let missing = envelope(&body);
        assert!(!missing.success);
        assert_eq!(missing.error_code, Some(702));
        assert_eq!(missing.error_description.as_deref(), Some("not found"));
    }

    #[tokio::test]
    async fn the_one_where_unknown_operations_get_a_404_envelope() {
        let app = app_for("127.0.0.1:4000");
        let (status, body) = send(&app, "GET", "/api/__destruct/now", Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(envelope(&body).error_code, Some(705));
    }

    #[tokio::test]
    async fn the_one_where_the_wrong_verb_is_700_over_the_wire() {
        let app = app_for("127.0.0.1:4000");
        let (status, body) = send(&app, "POST", "/api/search/websites/website/0/10/!x", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        let wrong = envelope(&body);
        assert_eq!(wrong.error_code, Some(700));
        assert_eq!(wrong.error_description.as_deref(), Some("http method must be GET"));
    }
}
