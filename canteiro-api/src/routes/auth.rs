/// Authentication endpoints
///
/// - `POST /v1/auth/register` - Register an operator together with their company
/// - `POST /v1/auth/login` - Login and get tokens
/// - `POST /v1/auth/refresh` - Refresh access token

use super::record_audit;
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{extract::State, http::StatusCode, Json};
use canteiro_shared::{
    auth::{
        jwt::{self, TokenPair},
        middleware::AuthContext,
        password,
    },
    models::{
        company::{Company, CreateCompany},
        membership::{Membership, MembershipRole},
        user::{CreateUser, User},
    },
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

/// Register request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Checked for strength after the length rule
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: Option<String>,

    pub company_name: String,

    pub cnpj: Option<String>,
}

/// Register response
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub company_id: Uuid,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub password: String,
}

/// Login response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    /// Company of the operator's oldest membership
    pub company_id: Uuid,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

/// Register a new operator
///
/// Creates the user, their company and an owner membership in one transaction, so a
/// failure (duplicate email or CNPJ) leaves nothing behind.
///
/// ```text
/// POST /v1/auth/register
///
/// {
///   "email": "ana@construtora.com.br",
///   "password": "SecureP@ss123",
///   "name": "Ana Souza",
///   "company_name": "Construtora Horizonte",
///   "cnpj": "11.222.333/0001-81"
/// }
/// ```
///
/// # Errors
///
/// - `409 Conflict`: email or CNPJ already registered
/// - `422 Unprocessable Entity`: validation failed
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    req.validate()?;
    password::validate_password_strength(&req.password).map_err(|e| ApiError::field("password", e))?;

    let company_data = CreateCompany {
        name: req.company_name,
        cnpj: req.cnpj,
    };
    company_data.validate()?;

    let password_hash = password::hash_password(&req.password)?;

    let mut tx = state.db.begin().await?;

    let user = User::create(
        &mut *tx,
        CreateUser {
            email: req.email,
            password_hash,
            name: req.name,
        },
    )
    .await?;
    let company = Company::create(&mut *tx, company_data).await?;
    Membership::create(&mut *tx, company.id, user.id, MembershipRole::Owner).await?;

    tx.commit().await?;

    tracing::info!(user_id = %user.id, company_id = %company.id, "Operator registered");

    let auth = AuthContext::new(user.id, company.id);
    record_audit(
        &state,
        &auth,
        "company.created",
        "company",
        Some(company.id),
        json!({ "name": company.name, "owner": user.email }),
    )
    .await;

    let tokens = jwt::issue_token_pair(user.id, company.id, state.jwt_secret())?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: user.id,
            company_id: company.id,
            tokens,
        }),
    ))
}

/// Login with email and password
///
/// Unknown email and wrong password return the same error.
///
/// # Errors
///
/// - `401 Unauthorized`: invalid credentials
/// - `403 Forbidden`: the operator has no company
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    req.validate()?;

    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());

    let user = User::find_by_email(&state.db, &req.email)
        .await?
        .ok_or_else(invalid)?;

    if !password::verify_password(&req.password, &user.password_hash)? {
        tracing::warn!(user_id = %user.id, "Failed login attempt");
        return Err(invalid());
    }

    let membership = Membership::default_for_user(&state.db, user.id)
        .await?
        .ok_or_else(|| ApiError::Forbidden("Operator is not a member of any company".to_string()))?;

    User::update_last_login(&state.db, user.id).await?;

    let tokens = jwt::issue_token_pair(user.id, membership.company_id, state.jwt_secret())?;

    tracing::info!(user_id = %user.id, company_id = %membership.company_id, "Operator logged in");

    Ok(Json(LoginResponse {
        user_id: user.id,
        company_id: membership.company_id,
        tokens,
    }))
}

/// Exchange a refresh token for a new access token
///
/// # Errors
///
/// - `401 Unauthorized`: refresh token invalid, expired or an access token
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    let access_token = jwt::refresh_access_token(&req.refresh_token, state.jwt_secret())?;

    Ok(Json(RefreshResponse { access_token }))
}
