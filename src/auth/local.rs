use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::{
    password::verify_password, AuthError, AuthRequest, LocalConfig, Strategy, StrategyName,
    Verification,
};
use crate::users::UserStore;

/// Username/password strategy backed by the user store.
pub struct LocalStrategy {
    config: LocalConfig,
    users: Arc<dyn UserStore>,
}

impl LocalStrategy {
    #[must_use]
    pub fn new(config: LocalConfig, users: Arc<dyn UserStore>) -> Self {
        Self { config, users }
    }
}

#[async_trait]
impl Strategy for LocalStrategy {
    fn name(&self) -> StrategyName {
        StrategyName::Local
    }

    #[instrument(skip(self, request))]
    async fn verify(&self, request: &AuthRequest) -> Result<Verification, AuthError> {
        let field = self.config.username_field();

        // Every failure below reads the same to the caller.
        let (Some(login), Some(password)) = (
            request.field_str(field.as_str()),
            request.field_str(self.config.password_field()),
        ) else {
            debug!("local login missing {} or password", field.as_str());
            return Err(AuthError::invalid_login());
        };

        let Some(user) = self
            .users
            .find_by_login(field, login)
            .await
            .context("Failed to look up user")?
        else {
            debug!("no user for local login");
            return Err(AuthError::invalid_login());
        };

        let Some(hash) = user.password.as_deref() else {
            debug!("user {} has no local password", user.id);
            return Err(AuthError::invalid_login());
        };

        if !verify_password(password, hash)? {
            debug!("password mismatch for user {}", user.id);
            return Err(AuthError::invalid_login());
        }

        Ok(Verification::principal(user))
    }
}
