/// Application state and router builder
///
/// # Example
///
/// ```no_run
/// use canteiro_api::{app::AppState, config::Config};
/// use sqlx::PgPool;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = PgPool::connect(&config.database.url).await?;
/// let state = AppState::new(pool, config);
/// let app = canteiro_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{
    config::Config,
    middleware::{rate_limit::RateLimiter, security::SecurityHeadersLayer},
};
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::{from_fn_with_state, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use canteiro_shared::{
    auth::middleware::authenticate,
    biometric::{BiometricMatcher, DigestMatcher},
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// Cloned for each request handler via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,

    /// Token buckets for the identification functions
    pub rate_limiter: Arc<RateLimiter>,

    /// Resolves biometric samples to employees
    pub matcher: Arc<dyn BiometricMatcher>,
}

impl AppState {
    /// Creates state with the digest matcher over the same pool
    pub fn new(db: PgPool, config: Config) -> Self {
        let matcher = Arc::new(DigestMatcher::new(db.clone()));
        Self::with_matcher(db, config, matcher)
    }

    pub fn with_matcher(db: PgPool, config: Config, matcher: Arc<dyn BiometricMatcher>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::per_minute(config.identify.rate_per_minute));
        Self {
            db,
            config: Arc::new(config),
            rate_limiter,
            matcher,
        }
    }

    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }

    pub fn badge_secret(&self) -> &[u8] {
        self.config.badge.secret.as_bytes()
    }

    pub fn workflow_ttl(&self) -> chrono::Duration {
        self.config.workflow_ttl()
    }
}

/// Builds the complete router with all routes and middleware
///
/// ```text
/// /health                          public
/// /v1/auth/{register,login,refresh} public
/// /v1/...                          bearer token required
///   company, employees, contracts, ppe, assets, trainings, vacations,
///   timesheets, health-certificates, notifications, audit-logs, reports,
///   functions (rate limited), workflows
/// ```
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    let auth_routes = Router::new()
        .route("/register", post(routes::auth::register))
        .route("/login", post(routes::auth::login))
        .route("/refresh", post(routes::auth::refresh));

    let company_routes = Router::new().route(
        "/",
        get(routes::company::get_company).patch(routes::company::update_company),
    );

    let employee_routes = Router::new()
        .route(
            "/",
            get(routes::employees::list_employees).post(routes::employees::create_employee),
        )
        .route(
            "/:id",
            get(routes::employees::get_employee)
                .patch(routes::employees::update_employee)
                .delete(routes::employees::delete_employee),
        )
        .route(
            "/:id/ppe",
            get(routes::employees::list_active_ppe).post(routes::employees::deliver_ppe),
        )
        .route("/:id/badge", post(routes::employees::regenerate_badge))
        .route(
            "/:id/biometrics",
            get(routes::employees::list_biometrics).post(routes::employees::enroll_biometric),
        )
        .route("/:id/biometrics/:kind", delete(routes::employees::delete_biometrics));

    let contract_routes = Router::new()
        .route(
            "/",
            get(routes::contracts::list_contracts).post(routes::contracts::create_contract),
        )
        .route(
            "/:id",
            get(routes::contracts::get_contract)
                .patch(routes::contracts::update_contract)
                .delete(routes::contracts::delete_contract),
        );

    let ppe_routes = Router::new()
        .route("/items", get(routes::ppe::list_items).post(routes::ppe::create_item))
        .route(
            "/items/:id",
            get(routes::ppe::get_item)
                .patch(routes::ppe::update_item)
                .delete(routes::ppe::delete_item),
        )
        .route("/items/:id/stock", post(routes::ppe::adjust_stock))
        .route("/deliveries", get(routes::ppe::list_deliveries))
        .route("/deliveries/:id", get(routes::ppe::get_delivery))
        .route("/deliveries/:id/return", post(routes::ppe::return_delivery));

    let asset_routes = Router::new()
        .route("/", get(routes::assets::list_assets).post(routes::assets::create_asset))
        .route(
            "/:id",
            get(routes::assets::get_asset)
                .patch(routes::assets::update_asset)
                .delete(routes::assets::delete_asset),
        )
        .route("/:id/movements", get(routes::assets::list_movements))
        .route("/:id/checkout", post(routes::assets::checkout))
        .route("/:id/checkin", post(routes::assets::checkin))
        .route("/:id/consume", post(routes::assets::consume));

    let training_routes = Router::new()
        .route(
            "/",
            get(routes::trainings::list_trainings).post(routes::trainings::create_training),
        )
        .route(
            "/:id",
            get(routes::trainings::get_training)
                .patch(routes::trainings::update_training)
                .delete(routes::trainings::delete_training),
        );

    let vacation_routes = Router::new()
        .route(
            "/",
            get(routes::vacations::list_vacations).post(routes::vacations::create_vacation),
        )
        .route(
            "/:id",
            get(routes::vacations::get_vacation)
                .patch(routes::vacations::update_vacation)
                .delete(routes::vacations::delete_vacation),
        )
        .route("/:id/approve", post(routes::vacations::approve_vacation))
        .route("/:id/reject", post(routes::vacations::reject_vacation))
        .route("/:id/cancel", post(routes::vacations::cancel_vacation));

    let timesheet_routes = Router::new()
        .route(
            "/",
            get(routes::timesheets::list_entries).post(routes::timesheets::create_entry),
        )
        .route("/clock", post(routes::timesheets::clock))
        .route("/summary", get(routes::timesheets::summary))
        .route(
            "/:id",
            get(routes::timesheets::get_entry)
                .patch(routes::timesheets::update_entry)
                .delete(routes::timesheets::delete_entry),
        );

    let certificate_routes = Router::new()
        .route(
            "/",
            get(routes::health_certificates::list_certificates)
                .post(routes::health_certificates::create_certificate),
        )
        .route(
            "/:id",
            get(routes::health_certificates::get_certificate)
                .patch(routes::health_certificates::update_certificate)
                .delete(routes::health_certificates::delete_certificate),
        );

    let notification_routes = Router::new()
        .route("/", get(routes::notifications::list_notifications))
        .route("/unread-count", get(routes::notifications::unread_count))
        .route("/read-all", post(routes::notifications::mark_all_read))
        .route("/:id/read", post(routes::notifications::mark_read));

    let audit_routes = Router::new()
        .route("/", get(routes::audit::list_entries))
        .route("/verify", get(routes::audit::verify_chain));

    let report_routes = Router::new().route("/dashboard", get(routes::reports::dashboard));

    // Rate limiter reads the AuthContext, so it is layered inside the JWT layer
    let function_routes = Router::new()
        .route("/verify-qr-code", post(routes::functions::verify_qr_code))
        .route("/process-biometric", post(routes::functions::process_biometric))
        .layer(from_fn_with_state(
            state.clone(),
            crate::middleware::rate_limit::identify_rate_limit,
        ));

    let workflow_routes = Router::new()
        .route(
            "/",
            get(routes::workflows::list_open).post(routes::workflows::start_workflow),
        )
        .route(
            "/:id",
            get(routes::workflows::get_workflow).delete(routes::workflows::cancel_workflow),
        )
        .route("/:id/authenticate", post(routes::workflows::authenticate))
        .route("/:id/items", post(routes::workflows::add_item))
        .route("/:id/items/done", post(routes::workflows::finish_scanning))
        .route("/:id/items/:item_id", delete(routes::workflows::remove_item))
        .route("/:id/details", post(routes::workflows::set_details))
        .route("/:id/back", post(routes::workflows::back))
        .route("/:id/confirm", post(routes::workflows::confirm));

    let protected = Router::new()
        .nest("/company", company_routes)
        .nest("/employees", employee_routes)
        .nest("/contracts", contract_routes)
        .nest("/ppe", ppe_routes)
        .nest("/assets", asset_routes)
        .nest("/trainings", training_routes)
        .nest("/vacations", vacation_routes)
        .nest("/timesheets", timesheet_routes)
        .nest("/health-certificates", certificate_routes)
        .nest("/notifications", notification_routes)
        .nest("/audit-logs", audit_routes)
        .nest("/reports", report_routes)
        .nest("/functions", function_routes)
        .nest("/workflows", workflow_routes)
        .layer(from_fn_with_state(state.clone(), jwt_auth_layer));

    let v1_routes = Router::new().nest("/auth", auth_routes).merge(protected);

    Router::new()
        .merge(health_routes)
        .nest("/v1", v1_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(cors_layer(&state.config))
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.api.cors_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .api
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

/// Validates the bearer token and stores the `AuthContext` in the request extensions
async fn jwt_auth_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, crate::error::ApiError> {
    let auth = authenticate(req.headers(), state.jwt_secret())?;
    req.extensions_mut().insert(auth);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode};
    use canteiro_shared::db::pool::{create_lazy_pool, DatabaseConfig};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let config = Config::for_tests("postgresql://localhost:1/canteiro_test");
        let pool = create_lazy_pool(DatabaseConfig {
            url: config.database.url.clone(),
            ..DatabaseConfig::default()
        })
        .unwrap();
        build_router(AppState::new(pool, config))
    }

    #[tokio::test]
    async fn test_protected_route_requires_token() {
        let response = test_router()
            .oneshot(Request::builder().uri("/v1/employees").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_malformed_authorization_is_bad_request() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/v1/workflows")
                    .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_token_rejected_before_rate_limit() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/functions/verify-qr-code")
                    .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"qrHash":"x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let response = test_router()
            .oneshot(Request::builder().uri("/v2/anything").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
