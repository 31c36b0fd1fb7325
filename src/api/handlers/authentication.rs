use crate::{
    api::handlers::extract_bearer_token,
    auth::{AuthError, AuthRequest, AuthResult, AuthenticationService, ErrorBody, StrategyName},
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;

/// Documented shape of a create-session body. Fields beyond `strategy` are
/// read by the selected strategy.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    strategy: StrategyName,
    /// `local`: login field (email or username, as configured).
    email: Option<String>,
    /// `local`: password.
    password: Option<String>,
    /// `jwt`: token, when not sent as a bearer header.
    access_token: Option<String>,
    /// `google`, `facebook`, `github`: authorization code.
    code: Option<String>,
}

#[utoipa::path(
    post,
    path= "/authentication",
    request_body = SessionRequest,
    responses (
        (status = 201, description = "Session created", body = AuthResult, content_type = "application/json"),
        (status = 400, description = "Missing or unknown strategy", body = ErrorBody),
        (status = 401, description = "Credentials rejected or strategy not allowed", body = ErrorBody),
        (status = 403, description = "Credentials incorrect", body = ErrorBody),
    ),
    tag= "authentication"
)]
#[instrument(skip(service, headers, payload))]
pub async fn create(
    service: Extension<Arc<AuthenticationService>>,
    headers: HeaderMap,
    payload: Option<Json<AuthRequest>>,
) -> Response {
    let request = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    debug!("request: {:?}", request);

    let request = request.with_bearer(extract_bearer_token(&headers));

    match service.create(request).await {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path= "/authentication",
    responses (
        (status = 200, description = "Session removed; the token is revoked", body = AuthResult, content_type = "application/json"),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag= "authentication"
)]
#[instrument(skip(service, headers))]
pub async fn remove(
    service: Extension<Arc<AuthenticationService>>,
    headers: HeaderMap,
) -> Result<Json<AuthResult>, AuthError> {
    service
        .remove(extract_bearer_token(&headers))
        .await
        .map(Json)
}
