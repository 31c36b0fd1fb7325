use crate::auth::{AuthError, AuthResult, AuthenticationService, ErrorBody, Provider};
use axum::{
    extract::{Extension, Path, Query},
    response::{Json, Redirect},
};
use serde::Deserialize;
use std::{fmt, sync::Arc};
use tracing::{debug, instrument};
use utoipa::IntoParams;

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    /// Set by the provider when the user denied access.
    error: Option<String>,
}

impl fmt::Debug for CallbackParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackParams")
            .field("has_code", &self.code.is_some())
            .field("has_state", &self.state.is_some())
            .field("error", &self.error)
            .finish()
    }
}

#[utoipa::path(
    get,
    path= "/auth/{provider}",
    params(("provider" = String, Path, description = "google, facebook or github")),
    responses (
        (status = 303, description = "Redirect to the provider consent page"),
        (status = 400, description = "Provider is not configured", body = ErrorBody),
        (status = 401, description = "Provider is not allowed", body = ErrorBody),
    ),
    tag= "oauth"
)]
#[instrument(skip(service))]
pub async fn authorize(
    service: Extension<Arc<AuthenticationService>>,
    Path(provider): Path<String>,
) -> Result<Redirect, AuthError> {
    let provider = provider.parse::<Provider>()?;
    let url = service.authorization_url(provider).await?;

    debug!("redirecting to {provider} consent page");

    Ok(Redirect::to(url.as_str()))
}

#[utoipa::path(
    get,
    path= "/auth/{provider}/callback",
    params(
        ("provider" = String, Path, description = "google, facebook or github"),
        CallbackParams
    ),
    responses (
        (status = 200, description = "Session created", body = AuthResult, content_type = "application/json"),
        (status = 401, description = "Invalid state, denied consent or rejected code", body = ErrorBody),
        (status = 403, description = "Credentials incorrect", body = ErrorBody),
    ),
    tag= "oauth"
)]
#[instrument(skip(service, params))]
pub async fn callback(
    service: Extension<Arc<AuthenticationService>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<AuthResult>, AuthError> {
    let provider = provider.parse::<Provider>()?;

    if let Some(error) = params.error {
        return Err(AuthError::Verification(format!(
            "{provider} denied access: {error}"
        )));
    }

    let (Some(code), Some(state)) = (params.code, params.state) else {
        return Err(AuthError::Verification("Missing code or state".to_string()));
    };

    service.callback(provider, &code, &state).await.map(Json)
}
