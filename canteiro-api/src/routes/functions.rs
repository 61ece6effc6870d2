/// Identification functions called by scanners and capture devices
///
/// - `POST /v1/functions/verify-qr-code` - Resolve a badge to an active employee
/// - `POST /v1/functions/process-biometric` - Resolve a face or fingerprint sample
///
/// Both are rate limited per company (see `middleware::rate_limit`). Bodies and
/// responses use camelCase keys, as the capture clients send them.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{extract::State, Json};
use canteiro_shared::{
    auth::{
        authorization::{require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    badge::extract_badge_hash,
    biometric::{decode_sample, BiometricKind},
    models::employee::{Employee, EmployeeSummary},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQrRequest {
    /// Bare hash or full `CANTEIRO:EMP:` payload
    pub qr_hash: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQrResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee: Option<EmployeeSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiometricRequest {
    pub kind: BiometricKind,
    /// Base64 or `data:` URL
    pub sample: String,
    /// Must be the caller's company
    pub tenant_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BiometricResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Verify a scanned badge
///
/// ```text
/// POST /v1/functions/verify-qr-code
///
/// { "qrHash": "CANTEIRO:EMP:9f2c..." }
/// ```
///
/// ```json
/// { "success": true, "employee": { "id": "...", "name": "João Pereira", ... } }
/// { "success": false, "message": "Badge not recognized" }
/// ```
///
/// A malformed payload is a `422`; a well-formed badge that resolves to nobody (revoked,
/// another company, inactive employee) is `success: false`.
pub async fn verify_qr_code(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<VerifyQrRequest>,
) -> ApiResult<Json<VerifyQrResponse>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let hash = extract_badge_hash(&req.qr_hash)?;

    match Employee::find_active_by_qr_hash(&state.db, auth.company_id, &hash).await? {
        Some(employee) => {
            tracing::debug!(company_id = %auth.company_id, employee_id = %employee.id, "Badge verified");
            Ok(Json(VerifyQrResponse {
                success: true,
                employee: Some(employee),
                message: None,
            }))
        }
        None => {
            tracing::info!(company_id = %auth.company_id, "Unrecognized badge scanned");
            Ok(Json(VerifyQrResponse {
                success: false,
                employee: None,
                message: Some("Badge not recognized".to_string()),
            }))
        }
    }
}

/// Identify an employee from a biometric sample
///
/// # Errors
///
/// - `403 Forbidden`: `tenantId` is not the caller's company
/// - `422 Unprocessable Entity`: empty, oversized or undecodable sample
pub async fn process_biometric(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<BiometricRequest>,
) -> ApiResult<Json<BiometricResponse>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    if req.tenant_id != auth.company_id {
        tracing::warn!(
            company_id = %auth.company_id,
            tenant_id = %req.tenant_id,
            "Biometric request for another company"
        );
        return Err(ApiError::Forbidden("Tenant does not match the authenticated company".to_string()));
    }

    let sample = decode_sample(&req.sample)?;
    let found = state.matcher.identify(auth.company_id, req.kind, &sample).await?;

    let response = match found {
        Some(found) => BiometricResponse {
            success: true,
            employee_id: Some(found.employee_id),
            employee_name: Some(found.employee_name),
            message: None,
        },
        None => BiometricResponse {
            success: false,
            employee_id: None,
            employee_name: None,
            message: Some(format!("No employee matches this {} sample", req.kind)),
        },
    };

    tracing::debug!(company_id = %auth.company_id, kind = %req.kind, matched = response.success, "Biometric processed");

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_biometric_request_uses_camel_case() {
        let tenant = Uuid::new_v4();
        let req: BiometricRequest = serde_json::from_value(json!({
            "kind": "face",
            "sample": "aGVsbG8=",
            "tenantId": tenant,
        }))
        .unwrap();

        assert_eq!(req.kind, BiometricKind::Face);
        assert_eq!(req.tenant_id, tenant);
    }

    #[test]
    fn test_failed_match_omits_employee_fields() {
        let value = serde_json::to_value(BiometricResponse {
            success: false,
            employee_id: None,
            employee_name: None,
            message: Some("No match".to_string()),
        })
        .unwrap();

        assert_eq!(value, json!({ "success": false, "message": "No match" }));
    }

    #[test]
    fn test_verify_request_field_name() {
        let req: VerifyQrRequest = serde_json::from_value(json!({ "qrHash": "abc" })).unwrap();
        assert_eq!(req.qr_hash, "abc");
    }
}
