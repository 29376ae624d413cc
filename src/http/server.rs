//! HTTP server setup and request handling.
//!
//! # Responsibilities
//! - Create the Axum Router with the catch-all gateway handler
//! - Wire up middleware (tracing, correlation id, timeout, auth, rate limit)
//! - Dispatch requests to the proxy forwarder or the command producer
//! - Swap the route table when a reloaded config arrives
//! - Observability (metrics per request and channel)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::auth::{authenticate, Identity, JwtVerifier, RejectedToken, StaticRolePermissions};
use crate::broker::{BrokerChannel, CommandProducer, RequestSnapshot};
use crate::config::{ConfigError, GatewayConfig};
use crate::dispatch::{DispatchRequest, Dispatcher};
use crate::error::GatewayError;
use crate::http::request::{
    correlation_id, propagate_correlation_id_layer, set_correlation_id_layer,
};
use crate::observability::metrics;
use crate::proxy::{ForwardRequest, Forwarder, ForwarderSettings};
use crate::routing::{self, RouteTable, RouteTarget, SharedRouteTable};
use crate::security::{rate_limit_middleware, RateLimiterState};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub forwarder: Forwarder,
    pub producer: Arc<CommandProducer>,
    pub max_body_bytes: usize,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    routes: SharedRouteTable,
    config: GatewayConfig,
}

impl HttpServer {
    /// Build the server. Fails if a route does not compile.
    pub fn new(config: GatewayConfig, channel: Arc<dyn BrokerChannel>) -> Result<Self, ConfigError> {
        let table = RouteTable::from_config(&config.routes)?;
        metrics::set_route_count(table.len());
        let routes = routing::shared(table);

        let dispatcher = Dispatcher::new(
            routes.clone(),
            Arc::new(StaticRolePermissions::default()),
            config.auth.super_role.clone(),
        );

        let forwarder = Forwarder::new(ForwarderSettings {
            timeout: Duration::from_millis(config.timeouts.backend_ms),
            connect_timeout: Duration::from_millis(config.timeouts.connect_ms),
            normalize_error_bodies: config.proxy.normalize_error_bodies,
            ..ForwarderSettings::default()
        });

        let producer = Arc::new(CommandProducer::new(
            channel,
            config.broker.queue.clone(),
            Duration::from_millis(config.timeouts.publish_ms),
        ));

        let state = AppState {
            dispatcher,
            forwarder,
            producer,
            max_body_bytes: config.proxy.max_body_bytes,
        };

        let router = Self::build_router(&config, state);
        Ok(Self {
            router,
            routes,
            config,
        })
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Outermost first: tracing, correlation id, timeout, auth, then rate
    /// limiting (which needs the identity).
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let mut gateway = Router::new()
            .route("/", any(gateway_handler))
            .route("/{*path}", any(gateway_handler))
            .with_state(state);

        if config.rate_limit.enabled {
            let limiter = Arc::new(RateLimiterState::from_config(&config.rate_limit));
            gateway = gateway.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
        }

        let verifier = Arc::new(JwtVerifier::new(&config.auth.jwt_secret));

        Router::new()
            .route("/health", get(health_handler))
            .merge(gateway.layer(middleware::from_fn_with_state(verifier, authenticate)))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(set_correlation_id_layer())
                    .layer(propagate_correlation_id_layer())
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
    }

    /// Live route table snapshot.
    pub fn routes(&self) -> SharedRouteTable {
        self.routes.clone()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run the server until `shutdown` fires.
    ///
    /// Configs arriving on `config_updates` replace the route table; a config
    /// whose routes fail to compile is logged and ignored.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.routes.load().len(),
            "HTTP server starting"
        );

        let routes = self.routes.clone();
        let reload = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                match RouteTable::from_config(&config.routes) {
                    Ok(table) => {
                        let count = table.len();
                        routes.store(Arc::new(table));
                        metrics::set_route_count(count);
                        tracing::info!(routes = count, "Route table reloaded");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Rejected reloaded routes; keeping current table");
                    }
                }
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        reload.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Main gateway handler: resolve, authorize, then proxy or publish.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let (parts, body) = request.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();
    let identity = parts.extensions.get::<Identity>().cloned();
    let rejected_token = parts.extensions.get::<RejectedToken>().map(|r| r.0.clone());
    let request_id = correlation_id(&parts.headers);

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        user_id = identity.as_ref().map(|i| i.user_id.as_str()).unwrap_or("-"),
        "Dispatching request"
    );

    let decision = match state.dispatcher.dispatch(&DispatchRequest {
        method: &method,
        path: &path,
        identity: identity.as_ref(),
        rejected_token: rejected_token.as_ref(),
    }) {
        Ok(decision) => decision,
        Err(e) => {
            metrics::record_request(method.as_str(), e.status().as_u16(), "none", start_time);
            return e.respond(&method, &path);
        }
    };
    let channel = decision.route.channel();

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, path = %path, error = %e, "Request body rejected");
            let error = GatewayError::PayloadTooLarge;
            metrics::record_request(method.as_str(), error.status().as_u16(), channel.as_str(), start_time);
            return error.respond(&method, &path);
        }
    };

    let response = match &decision.route.target {
        RouteTarget::Proxy { base_url } => {
            let forward = ForwardRequest {
                method: method.clone(),
                uri: parts.uri.clone(),
                headers: parts.headers.clone(),
                body,
                identity: identity.clone(),
                client_addr: parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| *addr),
                matched_pattern: decision.matched_pattern().to_string(),
            };
            match state.forwarder.forward(forward, base_url).await {
                Ok(response) => response,
                Err(e) => e.into_response(),
            }
        }
        RouteTarget::Command(target) => {
            let snapshot = RequestSnapshot::capture(
                &method,
                &path,
                parts.uri.query(),
                &decision.params,
                &parts.headers,
                &body,
                identity.as_ref(),
            );
            match state.producer.publish(target, &snapshot, &request_id).await {
                Ok(ack) => (StatusCode::ACCEPTED, Json(ack)).into_response(),
                Err(e) => GatewayError::from(e).respond(&method, &path),
            }
        }
    };

    metrics::record_request(
        method.as_str(),
        response.status().as_u16(),
        channel.as_str(),
        start_time,
    );
    response
}
