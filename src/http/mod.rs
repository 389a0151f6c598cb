use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Extension, FromRequest, Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    backup::BackupHandle,
    captcha::CaptchaVerifier,
    config::Config,
    domain::{Registration, normalize_email},
    mailer::Mailer,
    otp::OtpGate,
    pending::PendingRegistry,
    store::{StoreError, StudentStore},
};


#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub students: Arc<Mutex<StudentStore>>,
    pub otp: Arc<OtpGate>,
    pub pending: Arc<PendingRegistry>,
    pub backup: BackupHandle,
    pub mailer: Arc<dyn Mailer>,
    pub captcha: CaptchaVerifier,
}

#[derive(Debug)]
pub struct ApiError {
    code: &'static str,
    message: String,
    status: StatusCode,
    details: Map<String, Value>,
}

impl ApiError {
    fn new(code: &'static str, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status,
            details: Map::new(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new("invalid_request", StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", StatusCode::NOT_FOUND, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", StatusCode::UNAUTHORIZED, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal", StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Duplicate { .. } => ApiError::conflict(value.to_string()),
            StoreError::Io(_) | StoreError::SerdeJson(_) => ApiError::internal(value.to_string()),
            StoreError::SchemaVersionMismatch { .. } => ApiError::internal(value.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    details: Map<String, Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code.to_string(),
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    axum::Json<T>: FromRequest<S>,
    <axum::Json<T> as FromRequest<S>>::Rejection: std::fmt::Display,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = axum::Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::invalid_request(e.to_string()))?;
        Ok(Self(value))
    }
}

pub fn build_router(
    config: Config,
    students: Arc<Mutex<StudentStore>>,
    otp: Arc<OtpGate>,
    pending: Arc<PendingRegistry>,
    backup: BackupHandle,
    mailer: Arc<dyn Mailer>,
    captcha: CaptchaVerifier,
) -> Router {
    let auth_state = AdminAuthState {
        admin_token: config.admin_token.clone(),
    };
    let app_state = AppState {
        config: Arc::new(config),
        students,
        otp,
        pending,
        backup,
        mailer,
        captcha,
    };

    let student = Router::new()
        .route("/register", post(register_student))
        .route("/verify", post(verify_student))
        .route("/resend-otp", get(resend_otp))
        .route("/validate", post(validate_captcha));

    let admin = Router::new()
        .route("/stats", get(admin_stats))
        .route("/backup", post(admin_force_backup))
        .route("/backup/info", get(admin_backup_info))
        .layer(middleware::from_fn_with_state(auth_state, admin_auth));

    let api = Router::new()
        .route("/health", get(health))
        .nest("/student", student)
        .nest("/admin", admin)
        .fallback(fallback_not_found);

    Router::new()
        .nest("/api/v1", api)
        .layer(Extension(app_state))
}

#[derive(Clone)]
struct AdminAuthState {
    admin_token: String,
}

async fn admin_auth(
    State(auth): State<AdminAuthState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if auth.admin_token.is_empty() {
        return ApiError::unauthorized("admin endpoints are disabled").into_response();
    }
    match extract_bearer_token(req.headers()) {
        Some(token) if token == auth.admin_token => next.run(req).await,
        _ => ApiError::unauthorized("missing or invalid authorization token").into_response(),
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?;
    let raw = raw.to_str().ok()?;
    let raw = raw.strip_prefix("Bearer ")?;
    Some(raw.to_string())
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn fallback_not_found() -> ApiError {
    ApiError::not_found("unknown API route")
}

#[derive(Serialize)]
struct FlowResponse {
    message: String,
    success: bool,
}

fn duplicate_message(check: &crate::store::DuplicateCheck) -> String {
    let mut parts = Vec::new();
    if check.student_number {
        parts.push("Student number is already registered");
    }
    if check.roll_number {
        parts.push("University roll number is already registered");
    }
    if check.student_email {
        parts.push("College email is already registered");
    }
    format!(
        "{}. Please contact support if you need assistance.",
        parts.join(". ")
    )
}

async fn register_student(
    Extension(state): Extension<AppState>,
    ApiJson(registration): ApiJson<Registration>,
) -> Result<Json<FlowResponse>, ApiError> {
    registration
        .validate()
        .map_err(|e| ApiError::invalid_request(e.to_string()))?;

    let email = registration.normalized_email();
    {
        let students = state.students.lock().await;
        let check = students.check_duplicates(&registration);
        if check.any() {
            return Err(ApiError::conflict(duplicate_message(&check)));
        }
    }

    let restaged = state.pending.take(&email).is_some();
    state.pending.stage(registration);
    if restaged {
        info!(email = %email, "re-staged pending registration, reissuing code");
        if state.config.revoke_otp_on_restage {
            state.otp.revoke(&email);
        }
    }

    let code = state.otp.issue(&email);
    if !state.mailer.send_code(&email, &code).await {
        return Err(ApiError::internal("Failed to send verification email"));
    }

    Ok(Json(FlowResponse {
        message: "Registration initiated. Please check your email for verification code."
            .to_string(),
        success: true,
    }))
}

#[derive(Deserialize)]
struct VerifyRequest {
    email: String,
    otp: String,
}

async fn verify_student(
    Extension(state): Extension<AppState>,
    ApiJson(request): ApiJson<VerifyRequest>,
) -> Result<Json<FlowResponse>, ApiError> {
    let email = normalize_email(&request.email);
    if !state.otp.verify(&email, request.otp.trim()) {
        return Err(ApiError::invalid_request("Invalid or expired OTP"));
    }

    let Some(registration) = state.pending.take(&email) else {
        return Err(ApiError::invalid_request(
            "Registration data not found. Please register again.",
        ));
    };

    let record = {
        let mut students = state.students.lock().await;
        students.create(&registration)?
    };
    // Durable now; the staged copy is no longer needed.
    state.pending.discard(&email);
    info!(email = %email, id = %record.id, "verified registration persisted");

    if !state.mailer.send_confirmation(&email).await {
        warn!(email = %email, "confirmation email failed after commit");
    }

    Ok(Json(FlowResponse {
        message: "Email verified successfully! Registration completed.".to_string(),
        success: true,
    }))
}

#[derive(Deserialize)]
struct ResendQuery {
    email: String,
}

async fn resend_otp(
    Extension(state): Extension<AppState>,
    Query(query): Query<ResendQuery>,
) -> Result<Json<FlowResponse>, ApiError> {
    let email = normalize_email(&query.email);

    {
        let students = state.students.lock().await;
        if students.find_by_email(&email).is_some() {
            return Err(ApiError::invalid_request(
                "Student is already verified. No need to resend OTP.",
            ));
        }
    }
    if state.pending.take(&email).is_none() {
        return Err(ApiError::not_found(
            "No pending registration found. Please register first.",
        ));
    }

    let code = state.otp.issue(&email);
    if !state.mailer.send_code(&email, &code).await {
        return Err(ApiError::internal("Failed to send verification email"));
    }

    Ok(Json(FlowResponse {
        message: "Verification code sent successfully".to_string(),
        success: true,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptchaRequest {
    recaptcha_value: String,
}

async fn validate_captcha(
    Extension(state): Extension<AppState>,
    ApiJson(request): ApiJson<CaptchaRequest>,
) -> Result<Json<FlowResponse>, ApiError> {
    if !state.captcha.verify(&request.recaptcha_value).await {
        return Err(ApiError::invalid_request("Invalid reCAPTCHA"));
    }
    Ok(Json(FlowResponse {
        message: "reCAPTCHA validated successfully".to_string(),
        success: true,
    }))
}

async fn admin_stats(Extension(state): Extension<AppState>) -> Json<Value> {
    let verified = {
        let students = state.students.lock().await;
        students.count()
    };
    let run_state = state.backup.run_state().await;
    Json(json!({
        "memory_storage": {
            "pending_registrations": state.pending.staged(),
            "active_otps": state.otp.outstanding(),
        },
        "verified_students": verified,
        "backup": run_state,
    }))
}

async fn admin_force_backup(Extension(state): Extension<AppState>) -> Json<Value> {
    let outcome = state.backup.force().await;
    Json(json!({
        "result": outcome.as_str(),
        "success": true,
    }))
}

async fn admin_backup_info(Extension(state): Extension<AppState>) -> Json<Value> {
    let info = state.backup.info().await;
    Json(serde_json::to_value(info).unwrap_or_else(|_| json!({"exists": false})))
}
