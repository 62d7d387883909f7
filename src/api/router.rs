//! HTTP routing configuration with per-IP rate limiting.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{Request, Response, StatusCode},
    middleware::{self, Next},
    response::IntoResponse,
    routing::{get, post},
};
use governor::{Quota, RateLimiter};
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::app::AppState;
use crate::app::service::MAX_RECEIPT_BYTES;
use crate::domain::{ErrorDetail, ErrorResponse, RateLimitResponse};

use super::handlers::{
    activate_sol_handler, audit_log_handler, complete_transfer_handler, create_payment_handler,
    create_sol_handler, csv_report_handler, get_sol_handler, health_check_handler,
    join_sol_handler, list_participants_handler, list_payments_handler, list_sols_handler,
    list_transfers_handler, liveness_handler, login_handler, me_handler, metrics_handler,
    pdf_report_handler, readiness_handler, register_handler, reject_payment_handler,
    upload_receipt_handler, validate_payment_handler, webhook_handler,
};
use super::middleware::auth_middleware;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per second for general endpoints
    pub general_rps: u32,
    /// Burst size for general endpoints
    pub general_burst: u32,
    /// Requests per second for credential endpoints (register/login)
    pub auth_rps: u32,
    /// Burst size for credential endpoints
    pub auth_burst: u32,
    /// Requests per second for health endpoints
    pub health_rps: u32,
    /// Burst size for health endpoints
    pub health_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general_rps: 20,
            general_burst: 40,
            auth_rps: 2,
            auth_burst: 5,
            health_rps: 100,
            health_burst: 100,
        }
    }
}

impl RateLimitConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            general_rps: env_u32("RATE_LIMIT_RPS", defaults.general_rps),
            general_burst: env_u32("RATE_LIMIT_BURST", defaults.general_burst),
            auth_rps: env_u32("RATE_LIMIT_AUTH_RPS", defaults.auth_rps),
            auth_burst: env_u32("RATE_LIMIT_AUTH_BURST", defaults.auth_burst),
            health_rps: defaults.health_rps,
            health_burst: defaults.health_burst,
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

type IpLimiter = RateLimiter<
    IpAddr,
    governor::state::keyed::DashMapStateStore<IpAddr>,
    governor::clock::DefaultClock,
>;

/// Shared rate limiter state (keyed by client IP to prevent global DoS)
pub struct RateLimitState {
    general_limiter: IpLimiter,
    auth_limiter: IpLimiter,
    health_limiter: IpLimiter,
    config: RateLimitConfig,
}

impl RateLimitState {
    pub fn new(config: RateLimitConfig) -> Self {
        let general_quota = Quota::per_second(NonZeroU32::new(config.general_rps).unwrap())
            .allow_burst(NonZeroU32::new(config.general_burst).unwrap());
        let auth_quota = Quota::per_second(NonZeroU32::new(config.auth_rps).unwrap())
            .allow_burst(NonZeroU32::new(config.auth_burst).unwrap());
        let health_quota = Quota::per_second(NonZeroU32::new(config.health_rps).unwrap())
            .allow_burst(NonZeroU32::new(config.health_burst).unwrap());

        Self {
            general_limiter: RateLimiter::dashmap(general_quota),
            auth_limiter: RateLimiter::dashmap(auth_quota),
            health_limiter: RateLimiter::dashmap(health_quota),
            config,
        }
    }
}

/// Extract client IP from request (X-Forwarded-For, X-Real-IP, or ConnectInfo).
/// Falls back to 0.0.0.0 when unknown to avoid blocking; unknown clients share one bucket.
fn client_ip_from_request<B>(request: &Request<B>) -> IpAddr {
    // Prefer proxy headers (client is first in X-Forwarded-For)
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(s) = forwarded.to_str() {
            if let Some(first) = s.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }
    }
    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(s) = real_ip.to_str() {
            if let Ok(ip) = s.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }
    // ConnectInfo may inject SocketAddr when using into_make_service_with_connect_info
    if let Some(addr) = request.extensions().get::<SocketAddr>() {
        return addr.ip();
    }
    // Fallback: unknown clients share one bucket (prevents total global DoS)
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn too_many_requests(limit: u32, retry_after: u64) -> Response<Body> {
    let body = RateLimitResponse {
        error: ErrorDetail {
            r#type: "rate_limited".to_string(),
            message: "Rate limit exceeded. Please slow down your requests.".to_string(),
        },
        retry_after,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", limit.to_string().parse().unwrap());
    headers.insert("X-RateLimit-Remaining", "0".parse().unwrap());
    headers.insert("Retry-After", retry_after.to_string().parse().unwrap());
    response
}

fn retry_after_secs(not_until: &governor::NotUntil<governor::clock::QuantaInstant>) -> u64 {
    not_until
        .wait_time_from(governor::clock::Clock::now(
            &governor::clock::DefaultClock::default(),
        ))
        .as_secs()
}

/// Rate limit middleware for general API endpoints (per-IP)
async fn rate_limit_general_middleware(
    State(rate_limit): State<Arc<RateLimitState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let client_ip = client_ip_from_request(&request);
    match rate_limit.general_limiter.check_key(&client_ip) {
        Ok(_) => {
            let mut response = next.run(request).await;
            response.headers_mut().insert(
                "X-RateLimit-Limit",
                rate_limit.config.general_rps.to_string().parse().unwrap(),
            );
            response
        }
        Err(not_until) => too_many_requests(
            rate_limit.config.general_rps,
            retry_after_secs(&not_until),
        ),
    }
}

/// Stricter rate limit for register/login, which hit the password hasher
async fn rate_limit_auth_middleware(
    State(rate_limit): State<Arc<RateLimitState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let client_ip = client_ip_from_request(&request);
    match rate_limit.auth_limiter.check_key(&client_ip) {
        Ok(_) => next.run(request).await,
        Err(not_until) => too_many_requests(
            rate_limit.config.auth_rps,
            retry_after_secs(&not_until),
        ),
    }
}

/// Rate limit middleware for health endpoints (per-IP)
async fn rate_limit_health_middleware(
    State(rate_limit): State<Arc<RateLimitState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let client_ip = client_ip_from_request(&request);
    match rate_limit.health_limiter.check_key(&client_ip) {
        Ok(_) => next.run(request).await,
        Err(not_until) => {
            let body = ErrorResponse {
                error: ErrorDetail {
                    r#type: "rate_limited".to_string(),
                    message: "Rate limit exceeded".to_string(),
                },
            };
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            response.headers_mut().insert(
                "Retry-After",
                retry_after_secs(&not_until).to_string().parse().unwrap(),
            );
            response
        }
    }
}

fn auth_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .route(
            "/me",
            get(me_handler).route_layer(middleware::from_fn_with_state(
                app_state,
                auth_middleware,
            )),
        )
}

fn sol_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_sol_handler).get(list_sols_handler))
        .route("/{id}", get(get_sol_handler))
        .route("/{id}/join", post(join_sol_handler))
        .route("/{id}/activate", post(activate_sol_handler))
        .route("/{id}/participants", get(list_participants_handler))
        .route("/{id}/payments", get(list_payments_handler))
        .route("/{id}/transfers", get(list_transfers_handler))
        .route("/{id}/report.csv", get(csv_report_handler))
        .route("/{id}/report.pdf", get(pdf_report_handler))
        .layer(middleware::from_fn_with_state(app_state, auth_middleware))
}

fn payment_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_payment_handler))
        .route(
            "/{id}/receipt",
            post(upload_receipt_handler)
                // multipart framing overhead on top of the receipt itself
                .layer(DefaultBodyLimit::max(MAX_RECEIPT_BYTES + 64 * 1024)),
        )
        .route("/{id}/validate", post(validate_payment_handler))
        .route("/{id}/reject", post(reject_payment_handler))
        .layer(middleware::from_fn_with_state(app_state, auth_middleware))
}

fn admin_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/transfers/{id}/complete", post(complete_transfer_handler))
        .route("/audit", get(audit_log_handler))
        .layer(middleware::from_fn_with_state(app_state, auth_middleware))
}

fn health_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(health_check_handler))
        .route("/live", get(liveness_handler))
        .route("/ready", get(readiness_handler))
}

/// Create router without rate limiting
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ));

    Router::new()
        .nest("/auth", auth_routes(Arc::clone(&app_state)))
        .nest("/sols", sol_routes(Arc::clone(&app_state)))
        .nest("/payments", payment_routes(Arc::clone(&app_state)))
        .nest("/admin", admin_routes(Arc::clone(&app_state)))
        .nest("/health", health_routes())
        .route("/webhooks/gateway", post(webhook_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware_stack)
        .with_state(app_state)
}

/// Create router with rate limiting enabled
pub fn create_router_with_rate_limit(app_state: Arc<AppState>, config: RateLimitConfig) -> Router {
    let rate_limit_state = Arc::new(RateLimitState::new(config));

    let middleware_stack = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ));

    let auth = auth_routes(Arc::clone(&app_state)).layer(middleware::from_fn_with_state(
        Arc::clone(&rate_limit_state),
        rate_limit_auth_middleware,
    ));

    let general = Router::new()
        .nest("/sols", sol_routes(Arc::clone(&app_state)))
        .nest("/payments", payment_routes(Arc::clone(&app_state)))
        .nest("/admin", admin_routes(Arc::clone(&app_state)))
        .route("/webhooks/gateway", post(webhook_handler))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&rate_limit_state),
            rate_limit_general_middleware,
        ));

    let health = health_routes().layer(middleware::from_fn_with_state(
        Arc::clone(&rate_limit_state),
        rate_limit_health_middleware,
    ));

    Router::new()
        .nest("/auth", auth)
        .merge(general)
        .nest("/health", health)
        .route("/metrics", get(metrics_handler))
        .layer(middleware_stack)
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        middleware,
        response::IntoResponse,
        routing::get,
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    use super::*;
    use crate::test_utils::test_state;

    async fn dummy_handler() -> impl IntoResponse {
        StatusCode::OK
    }

    #[test]
    fn test_rate_limit_config_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.general_rps, 20);
        assert_eq!(config.general_burst, 40);
        assert_eq!(config.auth_rps, 2);
        assert_eq!(config.health_rps, 100);
    }

    #[tokio::test]
    async fn test_rate_limit_general_middleware_blocks_request() {
        let config = RateLimitConfig {
            general_rps: 1,
            general_burst: 1,
            ..Default::default()
        };
        let state = Arc::new(RateLimitState::new(config));

        let app = Router::new()
            .route("/", get(dummy_handler))
            .layer(middleware::from_fn_with_state(
                state,
                rate_limit_general_middleware,
            ));

        app.clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("Retry-After"));
        assert_eq!(
            response.headers().get("X-RateLimit-Remaining").unwrap(),
            "0"
        );
    }

    #[tokio::test]
    async fn test_rate_limit_success_includes_limit_header() {
        let config = RateLimitConfig {
            general_rps: 100,
            general_burst: 100,
            ..Default::default()
        };
        let state = Arc::new(RateLimitState::new(config));

        let app = Router::new()
            .route("/", get(dummy_handler))
            .layer(middleware::from_fn_with_state(
                state,
                rate_limit_general_middleware,
            ));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("X-RateLimit-Limit").unwrap(), "100");
    }

    /// One IP exhausting its bucket must not block another IP.
    #[tokio::test]
    async fn test_rate_limit_per_ip_prevents_global_dos() {
        let config = RateLimitConfig {
            general_rps: 1,
            general_burst: 1,
            ..Default::default()
        };
        let state = Arc::new(RateLimitState::new(config));

        let app = Router::new()
            .route("/", get(dummy_handler))
            .layer(middleware::from_fn_with_state(
                state,
                rate_limit_general_middleware,
            ));

        let req = |ip: &str| {
            Request::builder()
                .uri("/")
                .header("X-Forwarded-For", ip)
                .body(Body::empty())
                .unwrap()
        };

        app.clone().oneshot(req("192.168.1.1")).await.unwrap();
        let blocked = app.clone().oneshot(req("192.168.1.1")).await.unwrap();
        assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);

        let other = app.oneshot(req("10.0.0.1")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_rate_limit_is_stricter() {
        let config = RateLimitConfig {
            auth_rps: 1,
            auth_burst: 2,
            ..Default::default()
        };
        let state = Arc::new(RateLimitState::new(config));

        let app = Router::new()
            .route("/", get(dummy_handler))
            .layer(middleware::from_fn_with_state(
                state,
                rate_limit_auth_middleware,
            ));

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_router_health_endpoints() {
        let router = create_router(Arc::new(test_state()));

        for uri in ["/health", "/health/live", "/health/ready"] {
            let res = router
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK, "{uri} should be OK");
        }
    }

    #[tokio::test]
    async fn test_router_protected_routes_require_token() {
        let router = create_router(Arc::new(test_state()));

        let res = router
            .oneshot(
                Request::builder()
                    .uri("/sols")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_router_metrics_disabled_returns_not_found() {
        let router = create_router(Arc::new(test_state()));

        let res = router
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_router_with_rate_limit_health_accessible() {
        let router =
            create_router_with_rate_limit(Arc::new(test_state()), RateLimitConfig::default());

        let res = router
            .oneshot(
                Request::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_router_webhook_without_signature_unauthorized() {
        let router = create_router(Arc::new(test_state()));

        let res = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/gateway")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
