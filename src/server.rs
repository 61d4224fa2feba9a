//! HTTP surface of the mock server.
//!
//! Every `/api/{system}/{module}/...` request runs through the same pipeline:
//!
//! 1. route lookup (the registry is loaded and endpoints bound on first use)
//! 2. fault injection, which may short-circuit with a simulated failure
//! 3. request normalization
//! 4. handler execution, isolated so that a panic becomes a 500
//!
//! Admin routes under `/_mock` expose systems, health and counters.

use crate::binder::{split_api_path, BindReport, BoundRoute, EndpointBinder, RouteTable};
use crate::config::{GlobalSettings, MockServerConfig, YamlConfigSource};
use crate::error::{MockError, Result};
use crate::handler::{HandlerContext, HandlerError};
use crate::injector::{Category, ErrorBody, ErrorInjector, InjectionTarget, Severity};
use crate::model::HttpMethod;
use crate::registry::{HandlerCatalog, SystemRegistry};
use crate::request::normalize;
use crate::resolver::DataResolver;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Request pipeline options.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_body_bytes: usize,
    pub log_requests: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&GlobalSettings::default())
    }
}

impl From<&GlobalSettings> for PipelineOptions {
    fn from(settings: &GlobalSettings) -> Self {
        Self {
            max_body_bytes: settings.max_body_bytes,
            log_requests: settings.log_requests,
        }
    }
}

/// Counters exposed on `/_mock/stats`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServerStats {
    pub initialized: bool,
    pub requests_total: u64,
    pub requests_unmatched: u64,
    pub faults_injected: u64,
    pub handler_failures: u64,
    pub routes_bound: usize,
    pub routes_skipped: usize,
    pub cache_entries: usize,
}

/// The mock server: registry, resolver and injector behind one pipeline.
pub struct MockServer {
    registry: Arc<SystemRegistry>,
    resolver: Arc<DataResolver>,
    injector: Arc<ErrorInjector>,
    options: PipelineOptions,
    routes: OnceCell<(RouteTable, BindReport)>,
    requests_total: AtomicU64,
    requests_unmatched: AtomicU64,
    handler_failures: AtomicU64,
}

impl MockServer {
    pub fn new(
        registry: Arc<SystemRegistry>,
        resolver: Arc<DataResolver>,
        injector: Arc<ErrorInjector>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            registry,
            resolver,
            injector,
            options,
            routes: OnceCell::new(),
            requests_total: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    /// Build a server from a parsed configuration file plus code-defined endpoints.
    pub fn from_config(config: MockServerConfig, catalog: HandlerCatalog) -> Result<Self> {
        let settings = config.settings.clone();
        let resolver = Arc::new(DataResolver::new(settings.resolver_config()));
        let injector = Arc::new(ErrorInjector::new(settings.injector_settings())?);
        let registry = Arc::new(SystemRegistry::new(
            Arc::new(YamlConfigSource::new(config)),
            catalog,
        ));
        Ok(Self::new(
            registry,
            resolver,
            injector,
            PipelineOptions::from(&settings),
        ))
    }

    pub fn registry(&self) -> &Arc<SystemRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &Arc<DataResolver> {
        &self.resolver
    }

    pub fn injector(&self) -> &Arc<ErrorInjector> {
        &self.injector
    }

    /// Routes, loading the registry and binding endpoints on first call.
    pub async fn route_table(&self) -> Result<&RouteTable> {
        let (table, _) = self
            .routes
            .get_or_try_init(|| async {
                self.registry.initialize().await?;
                Ok::<_, MockError>(EndpointBinder::bind(&self.registry))
            })
            .await?;
        Ok(table)
    }

    /// Outcome of the bind pass, once it has run.
    pub fn bind_report(&self) -> Option<&BindReport> {
        self.routes.get().map(|(_, report)| report)
    }

    pub fn stats(&self) -> ServerStats {
        let report = self.bind_report();
        ServerStats {
            initialized: report.is_some(),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_unmatched: self.requests_unmatched.load(Ordering::Relaxed),
            faults_injected: self.injector.injected_count(),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            routes_bound: report.map(|r| r.bound).unwrap_or(0),
            routes_skipped: report.map(|r| r.skipped.len()).unwrap_or(0),
            cache_entries: self.resolver.cache_len(),
        }
    }

    /// Run one request through the pipeline.
    pub async fn handle(&self, request: Request) -> Response {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let path = request.uri().path().to_string();

        let Some((system_id, module_id, rest)) = split_api_path(&path) else {
            return self.unmatched(&path, request.method().as_str());
        };

        let method = match request.method().as_str().parse::<HttpMethod>() {
            Ok(method) => method,
            Err(_) => {
                return method_not_allowed(request.method().as_str(), &path);
            }
        };

        let table = match self.route_table().await {
            Ok(table) => table,
            Err(e) => return unavailable(&e),
        };

        let Some(found) = table.find(method, system_id, module_id, rest) else {
            if !table.allowed_methods(system_id, module_id, rest).is_empty() {
                return method_not_allowed(method.as_str(), &path);
            }
            return self.unmatched(&path, method.as_str());
        };

        if self.options.log_requests {
            info!(
                method = %method,
                path = %path,
                route = %found.route.route_path(),
                "Request matched endpoint"
            );
        }

        let response = self.serve(found.route, found.params, method, request).await;
        debug!(
            path = %path,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    }

    async fn serve(
        &self,
        route: &BoundRoute,
        params: HashMap<String, String>,
        method: HttpMethod,
        request: Request,
    ) -> Response {
        let target = InjectionTarget {
            system_id: &route.system_id,
            module_id: &route.module_id,
            endpoint_path: route.template.as_str(),
        };

        if let Some(injection) =
            self.injector
                .should_inject(target, &route.endpoint.error_rules, request.headers())
        {
            let fault = self.injector.build_response(&injection.rule, target);
            self.injector
                .record(&injection, target, method.as_str(), request.uri().path(), &fault);
            if !fault.delay.is_zero() {
                tokio::time::sleep(fault.delay).await;
            }
            return fault.into_response();
        }

        let normalized = match normalize(request, method, params, self.options.max_body_bytes).await {
            Ok(normalized) => normalized,
            Err(e) => return self.handler_error(route, e),
        };

        let handler = route.endpoint.handler.clone();
        let ctx = HandlerContext {
            system_id: route.system_id.clone(),
            module_id: route.module_id.clone(),
            resolver: self.resolver.clone(),
        };

        match tokio::spawn(async move { handler.handle(normalized, ctx).await }).await {
            Ok(Ok(value)) => (StatusCode::OK, Json(value)).into_response(),
            Ok(Err(e)) => self.handler_error(route, e),
            Err(join) => {
                self.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    route = %route.route_path(),
                    panicked = join.is_panic(),
                    "Endpoint handler aborted"
                );
                internal_error()
            }
        }
    }

    fn handler_error(&self, route: &BoundRoute, err: HandlerError) -> Response {
        match err {
            HandlerError::NotFound { message } => error_response(
                StatusCode::NOT_FOUND,
                ErrorBody::new("DATA_NOT_FOUND", message, Severity::Warning, Category::Business),
            ),
            HandlerError::BadRequest { message } => error_response(
                StatusCode::BAD_REQUEST,
                ErrorBody::new("BAD_REQUEST", message, Severity::Warning, Category::Request),
            ),
            HandlerError::Internal(e) => {
                self.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(route = %route.route_path(), error = %format!("{:#}", e), "Endpoint handler failed");
                internal_error()
            }
        }
    }

    fn unmatched(&self, path: &str, method: &str) -> Response {
        self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
        warn!(method = %method, path = %path, "No endpoint matched");
        error_response(
            StatusCode::NOT_FOUND,
            ErrorBody::new(
                "ROUTE_NOT_FOUND",
                format!("No endpoint for {} {}", method, path),
                Severity::Warning,
                Category::Request,
            ),
        )
    }

    /// Axum router with the pipeline and admin routes.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/_mock/systems", get(list_systems))
            .route("/_mock/systems/{id}/health", get(system_health))
            .route("/_mock/stats", get(stats))
            .route("/_mock/cache", delete(clear_cache))
            .fallback(dispatch)
            .with_state(self)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until Ctrl+C.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!(address = %addr, "Mock server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Mock server stopped");
        Ok(())
    }
}

fn error_response(status: StatusCode, body: ErrorBody) -> Response {
    (status, Json(body)).into_response()
}

/// Generic 500; failure detail stays in the server log.
fn internal_error() -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorBody::new(
            "INTERNAL_ERROR",
            "Internal server error",
            Severity::Error,
            Category::System,
        ),
    )
}

fn unavailable(err: &MockError) -> Response {
    error!(error = %err, "Mock server initialization failed");
    error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        ErrorBody::new(
            "SERVICE_UNAVAILABLE",
            "Mock server is not initialized",
            Severity::Critical,
            Category::System,
        ),
    )
}

fn method_not_allowed(method: &str, path: &str) -> Response {
    error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        ErrorBody::new(
            "METHOD_NOT_ALLOWED",
            format!("Method {} is not allowed for {}", method, path),
            Severity::Warning,
            Category::Request,
        ),
    )
}

async fn dispatch(State(server): State<Arc<MockServer>>, request: Request) -> Response {
    server.handle(request).await
}

async fn list_systems(State(server): State<Arc<MockServer>>) -> Response {
    if let Err(e) = server.route_table().await {
        return unavailable(&e);
    }

    let registry = server.registry();
    let systems: Vec<_> = registry
        .list_all()
        .iter()
        .map(|system| {
            let modules: Vec<_> = registry
                .modules_for(&system.id)
                .iter()
                .map(|m| json!({ "id": m.id, "name": m.name, "endpoints": m.endpoints.len() }))
                .collect();
            json!({
                "id": system.id,
                "name": system.name,
                "type": system.system_type,
                "connection": system.connection,
                "modules": modules,
                "healthy": registry.health_of(&system.id).healthy,
            })
        })
        .collect();
    Json(systems).into_response()
}

async fn system_health(
    State(server): State<Arc<MockServer>>,
    Path(system_id): Path<String>,
) -> Response {
    if let Err(e) = server.route_table().await {
        return unavailable(&e);
    }
    let health = server.registry().health_of(&system_id);
    let status = if health.registered {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (status, Json(health)).into_response()
}

async fn stats(State(server): State<Arc<MockServer>>) -> Json<ServerStats> {
    Json(server.stats())
}

async fn clear_cache(State(server): State<Arc<MockServer>>) -> Json<serde_json::Value> {
    let cleared = server.resolver().cache_len();
    server.resolver().clear_cache();
    Json(json!({ "cleared": cleared }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
