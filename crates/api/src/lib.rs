pub mod auth;
mod import;
mod rate_limit;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use apr_assistant::WaterAssistant;
use apr_core::{Account, ChatInput, ReportKind, Role, Sector, ServiceInfo};
use apr_observability::AppMetrics;
use apr_storage::{
    ChatLogRepository, DirectoryRepository, NewAccount, NewBill, NewReport, NewSector,
    ReportRepository, SectorUpdate, Store,
};
use axum::body::Body;
use axum::extract::{Json, Path, Query, State};
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::rate_limit::IpRateLimiter;

pub use crate::import::ImportSummary;

const MAX_BODY_BYTES: usize = 256 * 1024;

#[derive(Clone)]
#[allow(private_interfaces)]
pub struct ApiState {
    pub assistant: Arc<WaterAssistant<Store>>,
    pub store: Arc<Store>,
    pub metrics: Arc<AppMetrics>,
    pub service_info: ServiceInfo,
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
    pub limiter: IpRateLimiter,
    pub auth_limiter: IpRateLimiter,
    pub allowed_origins: Arc<Vec<String>>,
}

pub async fn build_app() -> Result<Router> {
    let metrics = AppMetrics::shared();

    let store = if let Ok(database_url) = env::var("APR_DATABASE_URL") {
        Store::sqlite(&database_url).await?
    } else {
        Store::memory()
    };
    let store = Arc::new(store);
    let assistant = Arc::new(WaterAssistant::new(store.clone(), metrics.clone()));

    let jwt_secret = env::var("APR_JWT_SECRET").unwrap_or_else(|_| "dev-apr-secret".to_string());
    let token_ttl_minutes = env::var("APR_TOKEN_TTL_MINUTES")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(60);
    let api_rate_limit_window = Duration::from_secs(
        env::var("APR_API_RATE_LIMIT_WINDOW_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(60),
    );
    let api_rate_limit_max = env::var("APR_API_RATE_LIMIT_MAX")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(120);
    let auth_rate_limit_window = Duration::from_secs(
        env::var("APR_AUTH_RATE_LIMIT_WINDOW_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(60),
    );
    let auth_rate_limit_max = env::var("APR_AUTH_RATE_LIMIT_MAX")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(10);

    let state = ApiState {
        assistant,
        store,
        metrics,
        service_info: ServiceInfo::default(),
        jwt_secret,
        token_ttl_minutes,
        limiter: IpRateLimiter::new(api_rate_limit_window, api_rate_limit_max),
        auth_limiter: IpRateLimiter::new(auth_rate_limit_window, auth_rate_limit_max),
        allowed_origins: Arc::new(parse_allowed_origins()),
    };

    Ok(build_router(state))
}

/// Router over an already-built store. Lets embedders and test
/// harnesses seed the store before the first request. Only the JWT
/// secret comes from the environment; token lifetime and rate limits
/// stay at the defaults.
pub fn build_router_with_store(store: Arc<Store>) -> Router {
    let metrics = AppMetrics::shared();
    let assistant = Arc::new(WaterAssistant::new(store.clone(), metrics.clone()));

    let state = ApiState {
        assistant,
        store,
        metrics,
        service_info: ServiceInfo::default(),
        jwt_secret: env::var("APR_JWT_SECRET").unwrap_or_else(|_| "dev-apr-secret".to_string()),
        token_ttl_minutes: 60,
        limiter: IpRateLimiter::new(Duration::from_secs(60), 120),
        auth_limiter: IpRateLimiter::new(Duration::from_secs(60), 10),
        allowed_origins: Arc::new(parse_allowed_origins()),
    };

    build_router(state)
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info/service-status", get(service_status))
        .route("/auth/token", post(auth_token))
        .route("/chat/interact", post(chat_interact))
        .route("/chat/feedback", post(chat_feedback))
        .route("/chat/log", get(chat_log))
        .route("/reports", post(report_submit).get(reports_list))
        .route("/reports/{id}/respond", post(report_respond))
        .route("/accounts", post(account_create))
        .route("/accounts/staff/all", get(staff_list))
        .route("/accounts/{rut}", get(account_profile))
        .route("/accounts/{rut}/bills", get(account_bills))
        .route("/sectors", get(sectors_list).post(sector_create))
        .route("/sectors/{id}", put(sector_update))
        .route("/bills", post(bill_create))
        .route("/admin/import", post(admin_import))
        .layer(build_cors_layer(&state.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            staff_gate_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    metrics: apr_observability::MetricsSnapshot,
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            timestamp_utc: Utc::now().to_rfc3339(),
            metrics: state.metrics.snapshot(),
        }),
    )
}

#[derive(Debug, Serialize)]
struct ServiceStatusResponse {
    office_hours: String,
    emergency_phone: String,
    sectors_with_outage: Vec<String>,
}

async fn service_status(State(state): State<ApiState>) -> Response {
    match state.store.sectors_with_outage().await {
        Ok(sectors) => (
            StatusCode::OK,
            Json(ServiceStatusResponse {
                office_hours: state.service_info.office_hours.clone(),
                emergency_phone: state.service_info.emergency_phone.clone(),
                sectors_with_outage: sectors.into_iter().map(|sector| sector.name).collect(),
            }),
        )
            .into_response(),
        Err(error) => storage_error(error),
    }
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    rut: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    role: String,
}

async fn auth_token(
    State(state): State<ApiState>,
    Json(request): Json<TokenRequest>,
) -> Response {
    let profile = match state.store.find_by_rut(&request.rut).await {
        Ok(profile) => profile,
        Err(error) => return storage_error(error),
    };
    // Customers never carry credentials, so an unknown rut and a
    // customer rut fail the same way.
    let Some(profile) = profile.filter(|p| p.account.role.is_privileged()) else {
        return invalid_credentials();
    };

    let stored = match state.store.credential_for_rut(&request.rut).await {
        Ok(stored) => stored,
        Err(error) => return storage_error(error),
    };
    let Some(stored) = stored else {
        return invalid_credentials();
    };
    if !auth::verify_password(&request.password, &stored) {
        return invalid_credentials();
    }

    match auth::issue_token(
        &state.jwt_secret,
        &profile.account.rut,
        profile.account.role.as_code(),
        state.token_ttl_minutes,
    ) {
        Ok(token) => (
            StatusCode::OK,
            Json(TokenResponse {
                access_token: token,
                token_type: "bearer",
                role: profile.account.role.as_code().to_string(),
            }),
        )
            .into_response(),
        Err(error) => {
            tracing::error!(error = %error, "token signing failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "token_issue_failed",
                "no se pudo emitir el token",
            )
        }
    }
}

fn invalid_credentials() -> Response {
    error_response(
        StatusCode::UNAUTHORIZED,
        "invalid_credentials",
        "rut o contraseña incorrectos",
    )
}

async fn chat_interact(
    State(state): State<ApiState>,
    Json(input): Json<ChatInput>,
) -> impl IntoResponse {
    let reply = state.assistant.handle_chat(input).await;
    (StatusCode::OK, Json(reply))
}

#[derive(Debug, Deserialize)]
struct FeedbackRequest {
    interaction_id: i64,
    useful: bool,
}

async fn chat_feedback(
    State(state): State<ApiState>,
    Json(request): Json<FeedbackRequest>,
) -> Response {
    match state
        .assistant
        .set_feedback(request.interaction_id, request.useful)
        .await
    {
        Ok(true) => (
            StatusCode::OK,
            Json(serde_json::json!({ "updated": true })),
        )
            .into_response(),
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            "interaction_not_found",
            "no existe esa interacción",
        ),
        Err(error) => storage_error(error),
    }
}

#[derive(Debug, Deserialize)]
struct ChatLogQuery {
    limit: Option<usize>,
}

async fn chat_log(
    State(state): State<ApiState>,
    Query(query): Query<ChatLogQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50).min(500);
    match state.store.recent_interactions(limit).await {
        Ok(interactions) => (StatusCode::OK, Json(interactions)).into_response(),
        Err(error) => storage_error(error),
    }
}

#[derive(Debug, Deserialize)]
struct ReportSubmitRequest {
    rut: String,
    kind: String,
    description: String,
}

async fn report_submit(
    State(state): State<ApiState>,
    Json(request): Json<ReportSubmitRequest>,
) -> Response {
    let Ok(kind) = request.kind.parse::<ReportKind>() else {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_report_kind",
            "kind debe ser corte, reclamo o sugerencia",
        );
    };

    let profile = match state.store.find_by_rut(&request.rut).await {
        Ok(profile) => profile,
        Err(error) => return storage_error(error),
    };
    let Some(profile) = profile else {
        return account_not_found();
    };

    match state
        .store
        .create_report(NewReport {
            account_id: profile.account.id,
            kind,
            description: request.description,
        })
        .await
    {
        Ok(report) => (StatusCode::CREATED, Json(report)).into_response(),
        Err(error) => storage_error(error),
    }
}

async fn reports_list(State(state): State<ApiState>) -> Response {
    match state.store.list_reports().await {
        Ok(reports) => (StatusCode::OK, Json(reports)).into_response(),
        Err(error) => storage_error(error),
    }
}

#[derive(Debug, Deserialize)]
struct ReportRespondRequest {
    status: Option<String>,
    response: String,
}

async fn report_respond(
    State(state): State<ApiState>,
    Path(report_id): Path<i64>,
    Json(request): Json<ReportRespondRequest>,
) -> Response {
    let status = request.status.as_deref().unwrap_or("resolved");
    match state
        .store
        .respond_report(report_id, status, &request.response)
        .await
    {
        Ok(true) => (
            StatusCode::OK,
            Json(serde_json::json!({ "updated": true })),
        )
            .into_response(),
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            "report_not_found",
            "no existe ese reporte",
        ),
        Err(error) => storage_error(error),
    }
}

#[derive(Debug, Serialize)]
struct AccountProfileResponse {
    account: Account,
    sector: Sector,
    total_debt: i64,
}

async fn account_profile(
    State(state): State<ApiState>,
    Path(rut): Path<String>,
) -> Response {
    match state.store.find_by_rut(&rut).await {
        Ok(Some(profile)) => {
            let total_debt = profile.total_debt();
            (
                StatusCode::OK,
                Json(AccountProfileResponse {
                    account: profile.account,
                    sector: profile.sector,
                    total_debt,
                }),
            )
                .into_response()
        }
        Ok(None) => account_not_found(),
        Err(error) => storage_error(error),
    }
}

async fn account_bills(
    State(state): State<ApiState>,
    Path(rut): Path<String>,
) -> Response {
    match state.store.find_by_rut(&rut).await {
        Ok(Some(profile)) => (StatusCode::OK, Json(profile.bills)).into_response(),
        Ok(None) => account_not_found(),
        Err(error) => storage_error(error),
    }
}

#[derive(Debug, Deserialize)]
struct AccountCreateRequest {
    rut: String,
    full_name: String,
    address: String,
    role: Option<String>,
    sector_id: i64,
    password: Option<String>,
}

async fn account_create(
    State(state): State<ApiState>,
    Json(request): Json<AccountCreateRequest>,
) -> Response {
    let role = Role::from_optional_str(request.role.as_deref());
    let password_hash = if role.is_privileged() {
        let Some(password) = request.password.as_deref().filter(|p| !p.is_empty()) else {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "password_required",
                "las cuentas de personal requieren contraseña",
            );
        };
        Some(auth::hash_password(password))
    } else {
        None
    };

    match state
        .store
        .create_account(NewAccount {
            rut: request.rut,
            full_name: request.full_name,
            address: request.address,
            role,
            sector_id: request.sector_id,
            password_hash,
        })
        .await
    {
        Ok(account) => (StatusCode::CREATED, Json(account)).into_response(),
        Err(error) => error_response(
            StatusCode::CONFLICT,
            "account_create_failed",
            &error.to_string(),
        ),
    }
}

async fn staff_list(State(state): State<ApiState>) -> Response {
    match state.store.list_staff().await {
        Ok(staff) => (StatusCode::OK, Json(staff)).into_response(),
        Err(error) => storage_error(error),
    }
}

async fn sectors_list(State(state): State<ApiState>) -> Response {
    match state.store.list_sectors().await {
        Ok(sectors) => (StatusCode::OK, Json(sectors)).into_response(),
        Err(error) => storage_error(error),
    }
}

async fn sector_create(
    State(state): State<ApiState>,
    Json(request): Json<NewSector>,
) -> Response {
    match state.store.create_sector(request).await {
        Ok(sector) => (StatusCode::CREATED, Json(sector)).into_response(),
        Err(error) => error_response(
            StatusCode::CONFLICT,
            "sector_create_failed",
            &error.to_string(),
        ),
    }
}

async fn sector_update(
    State(state): State<ApiState>,
    Path(sector_id): Path<i64>,
    Json(update): Json<SectorUpdate>,
) -> Response {
    match state.store.update_sector(sector_id, update).await {
        Ok(Some(sector)) => (StatusCode::OK, Json(sector)).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "sector_not_found",
            "no existe ese sector",
        ),
        Err(error) => storage_error(error),
    }
}

#[derive(Debug, Deserialize)]
struct BillCreateRequest {
    account_id: i64,
    period: String,
    amount: i64,
    due_at: Option<DateTime<Utc>>,
}

async fn bill_create(
    State(state): State<ApiState>,
    Json(request): Json<BillCreateRequest>,
) -> Response {
    if request.amount <= 0 {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_amount",
            "el monto debe ser mayor que cero",
        );
    }

    match state.store.find_account_by_id(request.account_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return account_not_found(),
        Err(error) => return storage_error(error),
    }

    match state
        .store
        .create_bill(NewBill {
            account_id: request.account_id,
            period: request.period,
            amount: request.amount,
            due_at: request
                .due_at
                .unwrap_or_else(|| Utc::now() + chrono::Duration::days(30)),
        })
        .await
    {
        Ok(bill) => (StatusCode::CREATED, Json(bill)).into_response(),
        Err(error) => storage_error(error),
    }
}

async fn admin_import(State(state): State<ApiState>, body: String) -> Response {
    match import::import_accounts_csv(state.store.as_ref(), &body).await {
        Ok(summary) => {
            tracing::info!(
                accounts_created = summary.accounts_created,
                accounts_updated = summary.accounts_updated,
                rows_skipped = summary.rows_skipped,
                "bulk import finished"
            );
            (StatusCode::OK, Json(summary)).into_response()
        }
        Err(error) => storage_error(error),
    }
}

async fn staff_gate_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS
        || !requires_staff(request.method(), request.uri().path())
    {
        return next.run(request).await;
    }

    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let Some(token) = bearer else {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "missing_token",
            "se requiere un token bearer",
        );
    };

    let claims = match auth::decode_token(&state.jwt_secret, token) {
        Ok(claims) => claims,
        Err(_) => {
            return error_response(
                StatusCode::UNAUTHORIZED,
                "invalid_token",
                "token inválido o expirado",
            )
        }
    };

    if !Role::from_optional_str(Some(&claims.role)).is_privileged() {
        return error_response(
            StatusCode::FORBIDDEN,
            "insufficient_role",
            "se requiere una cuenta de personal",
        );
    }

    next.run(request).await
}

fn requires_staff(method: &Method, path: &str) -> bool {
    if path.starts_with("/admin/") {
        return true;
    }
    if *method == Method::POST {
        return matches!(path, "/accounts" | "/sectors" | "/bills")
            || (path.starts_with("/reports/") && path.ends_with("/respond"));
    }
    if *method == Method::GET {
        return matches!(path, "/accounts/staff/all" | "/reports" | "/chat/log");
    }
    if *method == Method::PUT {
        return path.starts_with("/sectors/");
    }
    false
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    let ip = request_ip(&request);

    if path == "/auth/token" {
        let auth_key = format!("auth:{}", ip);
        if !state.auth_limiter.allow(&auth_key) {
            return error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "auth_rate_limited",
                "demasiados intentos de acceso desde esta IP",
            );
        }
        return next.run(request).await;
    }

    if path == "/health" {
        return next.run(request).await;
    }

    if !state.limiter.allow(&ip) {
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "límite de solicitudes excedido para esta IP",
        );
    }

    next.run(request).await
}

fn request_ip(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .next()
                .unwrap_or("unknown")
                .trim()
                .to_string()
        })
        .unwrap_or_else(|| "local".to_string())
}

fn parse_allowed_origins() -> Vec<String> {
    env::var("APR_ALLOWED_ORIGINS")
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(|origin| origin.trim().trim_end_matches('/').to_string())
                .filter(|origin| !origin.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn build_cors_layer(allowed_origins: &Arc<Vec<String>>) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();
    let origins = if origins.is_empty() {
        vec![HeaderValue::from_static("http://localhost:5173")]
    } else {
        origins
    };

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": error,
            "message": message
        })),
    )
        .into_response()
}

fn account_not_found() -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "account_not_found",
        "no existe una cuenta con ese rut",
    )
}

fn storage_error(error: anyhow::Error) -> Response {
    tracing::error!(error = %error, "storage operation failed");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "storage_unavailable",
        "el almacenamiento no está disponible",
    )
}
