use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

use super::StrategyName;

/// Every way an authentication request can be rejected.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A strategy refused the presented credentials.
    #[error("{0}")]
    Verification(String),
    /// Verification finished without resolving a principal.
    #[error("Credentials incorrect")]
    Permission,
    /// Session removal without a verifiable bearer token.
    #[error("{0}")]
    Authorization(String),
    #[error("A strategy is required")]
    MissingStrategy,
    #[error("Unknown authentication strategy '{0}'")]
    UnknownStrategy(String),
    #[error("Strategy '{0}' is not permitted")]
    StrategyNotAllowed(StrategyName),
    #[error("User's email is not yet verified.")]
    NotVerified,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    #[must_use]
    pub fn invalid_login() -> Self {
        Self::Verification("Invalid login".to_string())
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Verification(_) | Self::Authorization(_) | Self::StrategyNotAllowed(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::Permission => StatusCode::FORBIDDEN,
            Self::MissingStrategy | Self::UnknownStrategy(_) | Self::NotVerified => {
                StatusCode::BAD_REQUEST
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error `name` and `className` as exposed to clients.
    const fn class(&self) -> (&'static str, &'static str) {
        match self {
            Self::Verification(_) | Self::Authorization(_) | Self::StrategyNotAllowed(_) => {
                ("NotAuthenticated", "not-authenticated")
            }
            Self::Permission => ("Forbidden", "forbidden"),
            Self::MissingStrategy | Self::UnknownStrategy(_) | Self::NotVerified => {
                ("BadRequest", "bad-request")
            }
            Self::Internal(_) => ("GeneralError", "general-error"),
        }
    }

    #[must_use]
    pub fn body(&self) -> ErrorBody {
        let (name, class_name) = self.class();
        let message = match self {
            // Internal details stay in the logs.
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            name: name.to_string(),
            message,
            code: self.status().as_u16(),
            class_name: class_name.to_string(),
        }
    }
}

/// JSON error payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub name: String,
    pub message: String,
    pub code: u16,
    pub class_name: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            error!("Authentication failed with internal error: {err:#}");
        }
        (self.status(), Json(self.body())).into_response()
    }
}
