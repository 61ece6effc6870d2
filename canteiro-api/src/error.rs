/// Error handling for the API server
///
/// Handlers return `ApiResult<T>`; every error converts into a JSON body
/// `{"error": code, "message": text, "details": [{field, message}]}` with the matching
/// status code.
///
/// # Example
///
/// ```
/// use canteiro_api::error::{ApiError, ApiResult};
/// use axum::Json;
/// use serde_json::json;
///
/// async fn handler(found: bool) -> ApiResult<Json<serde_json::Value>> {
///     if !found {
///         return Err(ApiError::NotFound("Employee not found".to_string()));
///     }
///     Ok(Json(json!({ "ok": true })))
/// }
/// ```

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use canteiro_shared::{
    auth::{
        authorization::AuthzError,
        jwt::JwtError,
        middleware::AuthError,
        password::PasswordError,
    },
    badge::BadgeError,
    biometric::BiometricError,
    models::ListError,
    qr::QrError,
    workflow::WorkflowError,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Unauthorized (401)
    Unauthorized(String),

    /// Forbidden (403)
    Forbidden(String),

    /// Not found (404)
    NotFound(String),

    /// Conflict (409), e.g. duplicate CPF or wrong workflow step
    Conflict(String),

    /// Gone (410), e.g. an expired workflow session
    Gone(String),

    /// Unprocessable entity (422) with per-field details
    ValidationError(Vec<ValidationErrorDetail>),

    /// Too many requests (429)
    RateLimitExceeded { retry_after: u64, message: String },

    /// Internal server error (500); the message is logged, never returned
    InternalError(String),

    /// Service unavailable (503)
    ServiceUnavailable(String),
}

/// Validation error detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    /// Field that failed validation; `__all__` for checks spanning several fields
    pub field: String,
    pub message: String,
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g. "bad_request", "unauthorized")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ApiError {
    /// Single-field validation error
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::ValidationError(vec![ValidationErrorDetail {
            field: field.into(),
            message: message.into(),
        }])
    }

    pub fn not_found(resource: &str) -> Self {
        ApiError::NotFound(format!("{} not found", resource))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Gone(_) => "gone",
            ApiError::ValidationError(_) => "validation_error",
            ApiError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            ApiError::InternalError(_) => "internal_error",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::Gone(msg) => write!(f, "Gone: {}", msg),
            ApiError::ValidationError(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::RateLimitExceeded { message, .. } => write!(f, "Rate limit exceeded: {}", message),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let mut retry_after = None;
        let (message, details) = match self {
            ApiError::ValidationError(errors) => ("Request validation failed".to_string(), Some(errors)),
            ApiError::RateLimitExceeded { retry_after: secs, message } => {
                retry_after = Some(secs);
                (message, None)
            }
            ApiError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                ("An internal error occurred".to_string(), None)
            }
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Gone(msg)
            | ApiError::ServiceUnavailable(msg) => (msg, None),
        };

        let body = Json(ErrorResponse {
            error: code.to_string(),
            message,
            details,
        });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

fn constraint_message(constraint: &str) -> String {
    match constraint {
        "users_email_key" => "Email already exists".to_string(),
        "companies_cnpj_key" => "A company with this CNPJ already exists".to_string(),
        "employees_cpf_key" => "An employee with this CPF already exists".to_string(),
        "assets_code_key" => "An asset with this code already exists".to_string(),
        "biometric_templates_digest_key" => "This sample is already enrolled".to_string(),
        "timesheet_entries_open_key" => "Employee already has an open timesheet entry".to_string(),
        other => format!("Constraint violation: {}", other),
    }
}

/// Convert sqlx errors to API errors
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().unwrap_or_default().to_string();

                if db_err.is_unique_violation() {
                    return ApiError::Conflict(constraint_message(&constraint));
                }
                if db_err.is_check_violation() {
                    return ApiError::field("__all__", format!("Check failed: {}", constraint));
                }
                if db_err.is_foreign_key_violation() {
                    return ApiError::Conflict(format!("Referenced record is missing or still in use ({})", constraint));
                }

                ApiError::InternalError(format!("Database error: {}", db_err))
            }
            sqlx::Error::PoolTimedOut => ApiError::ServiceUnavailable("Database is busy".to_string()),
            _ => ApiError::InternalError(format!("Database error: {}", err)),
        }
    }
}

/// Convert validator errors, sorted by field for stable responses
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut details: Vec<ValidationErrorDetail> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| ValidationErrorDetail {
                    field: field.to_string(),
                    message: error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Validation failed".to_string()),
                })
            })
            .collect();
        details.sort_by(|a, b| a.field.cmp(&b.field));

        ApiError::ValidationError(details)
    }
}

impl From<ListError> for ApiError {
    fn from(err: ListError) -> Self {
        ApiError::field(err.field(), err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials => ApiError::Unauthorized("Missing credentials".to_string()),
            AuthError::InvalidFormat(msg) => ApiError::BadRequest(msg),
            AuthError::InvalidToken(msg) => ApiError::Unauthorized(msg),
        }
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::NotMember(_) => ApiError::Forbidden("Not a member of this company".to_string()),
            AuthzError::InsufficientRole { .. } => ApiError::Forbidden("Insufficient permissions".to_string()),
            AuthzError::DatabaseError(err) => ApiError::from(err),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::InternalError(format!("Password operation failed: {}", err))
    }
}

impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => ApiError::Unauthorized("Token expired".to_string()),
            JwtError::InvalidIssuer => ApiError::Unauthorized("Invalid token issuer".to_string()),
            JwtError::CreateError(msg) => ApiError::InternalError(format!("Token creation failed: {}", msg)),
            other => ApiError::Unauthorized(format!("Invalid token: {}", other)),
        }
    }
}

impl From<QrError> for ApiError {
    fn from(err: QrError) -> Self {
        ApiError::field("payload", err.to_string())
    }
}

impl From<BadgeError> for ApiError {
    fn from(err: BadgeError) -> Self {
        match err {
            BadgeError::WeakSecret => ApiError::InternalError(err.to_string()),
            BadgeError::NotABadge | BadgeError::Payload(_) => ApiError::field("qrHash", err.to_string()),
        }
    }
}

impl From<BiometricError> for ApiError {
    fn from(err: BiometricError) -> Self {
        match err {
            BiometricError::Database(err) => ApiError::from(err),
            other => ApiError::field("sample", other.to_string()),
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Database(err) => ApiError::from(err),
            WorkflowError::Expired => ApiError::Gone(err.to_string()),
            WorkflowError::ItemNotFound(_) => ApiError::NotFound(err.to_string()),
            WorkflowError::InvalidQuantity => ApiError::field("quantity", err.to_string()),
            WorkflowError::ItemNotAllowed { .. } => ApiError::field("payload", err.to_string()),
            WorkflowError::NoItems => ApiError::field("items", err.to_string()),
            WorkflowError::DetailsMismatch { .. } | WorkflowError::InvalidDetails(_) => {
                ApiError::field("details", err.to_string())
            }
            WorkflowError::WrongStep { .. }
            | WorkflowError::CannotGoBack(_)
            | WorkflowError::AlreadyComplete
            | WorkflowError::EmployeeUnavailable
            | WorkflowError::ItemUnavailable { .. } => ApiError::Conflict(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canteiro_shared::workflow::WorkflowStep;
    use validator::Validate;

    #[test]
    fn test_error_display() {
        let err = ApiError::BadRequest("Invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: Invalid input");

        let err = ApiError::NotFound("Employee not found".to_string());
        assert_eq!(err.to_string(), "Not found: Employee not found");
    }

    #[test]
    fn test_validation_error() {
        let errors = vec![
            ValidationErrorDetail {
                field: "cpf".to_string(),
                message: "Invalid CPF".to_string(),
            },
            ValidationErrorDetail {
                field: "name".to_string(),
                message: "Name must be 1 to 255 characters".to_string(),
            },
        ];

        let err = ApiError::ValidationError(errors);
        assert_eq!(err.to_string(), "Validation failed: 2 errors");
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let response = ApiError::RateLimitExceeded {
            retry_after: 12,
            message: "Slow down".to_string(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "12");
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let response = ApiError::InternalError("connection refused at 10.0.0.3".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.error, "internal_error");
        assert!(!body.message.contains("10.0.0.3"));
        assert!(body.details.is_none());
    }

    #[test]
    fn test_validator_errors_are_sorted_by_field() {
        #[derive(Validate)]
        struct Input {
            #[validate(length(min = 3, message = "too short"))]
            name: String,
            #[validate(email(message = "bad email"))]
            email: String,
        }

        let errors = Input {
            name: "a".to_string(),
            email: "nope".to_string(),
        }
        .validate()
        .unwrap_err();

        match ApiError::from(errors) {
            ApiError::ValidationError(details) => {
                let fields: Vec<_> = details.iter().map(|d| d.field.as_str()).collect();
                assert_eq!(fields, vec!["email", "name"]);
                assert_eq!(details[0].message, "bad email");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_workflow_error_mapping() {
        assert_eq!(ApiError::from(WorkflowError::Expired).status(), StatusCode::GONE);
        assert_eq!(
            ApiError::from(WorkflowError::WrongStep {
                expected: WorkflowStep::Confirm,
                actual: WorkflowStep::Details,
            })
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(WorkflowError::NoItems).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(WorkflowError::ItemNotFound(uuid::Uuid::nil())).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_list_and_qr_errors_are_field_errors() {
        match ApiError::from(ListError::InvalidLimit) {
            ApiError::ValidationError(details) => assert_eq!(details[0].field, "limit"),
            other => panic!("unexpected error: {:?}", other),
        }
        match ApiError::from(QrError::UnknownPrefix) {
            ApiError::ValidationError(details) => assert_eq!(details[0].field, "payload"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_sqlx_row_not_found() {
        assert_eq!(ApiError::from(sqlx::Error::RowNotFound).status(), StatusCode::NOT_FOUND);
    }
}
