//! User records and the store the strategies resolve principals from.
//!
//! Two backends implement [`UserStore`]: Postgres for deployments and an
//! in-memory store used when no DSN is configured (and by tests).

mod memory;
mod postgres;

pub use memory::MemoryUserStore;
pub use postgres::PgUserStore;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

use crate::auth::Provider;

/// A stored user. `password` holds the argon2 PHC hash, never a raw password.
#[derive(Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facebook_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub profile: Option<Value>,
}

impl User {
    #[must_use]
    pub fn provider_id(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Google => self.google_id.as_deref(),
            Provider::Facebook => self.facebook_id.as_deref(),
            Provider::Github => self.github_id.as_deref(),
        }
    }

    pub(crate) fn set_provider_id(&mut self, provider: Provider, id: String) {
        match provider {
            Provider::Google => self.google_id = Some(id),
            Provider::Facebook => self.facebook_id = Some(id),
            Provider::Github => self.github_id = Some(id),
        }
    }

    /// Remove the password hash so the record can leave the service.
    pub fn strip_secrets(&mut self) {
        self.password = None;
    }

    fn login_value(&self, field: LoginField) -> Option<&str> {
        match field {
            LoginField::Email => self.email.as_deref(),
            LoginField::Username => self.username.as_deref(),
        }
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("is_verified", &self.is_verified)
            .field("google_id", &self.google_id)
            .field("facebook_id", &self.facebook_id)
            .field("github_id", &self.github_id)
            .finish_non_exhaustive()
    }
}

/// Identity linked to a user by an OAuth provider.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderIdentity {
    pub provider: Provider,
    pub id: String,
    pub profile: Value,
}

/// Fields for a user that does not exist yet.
#[derive(Clone, Default)]
pub struct NewUser {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password_hash: Option<String>,
    pub is_verified: bool,
    pub identity: Option<ProviderIdentity>,
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password_hash", &self.password_hash.as_ref().map(|_| "***"))
            .field("is_verified", &self.is_verified)
            .field("identity", &self.identity)
            .finish()
    }
}

/// Entity field the `local` strategy looks users up by.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoginField {
    #[default]
    Email,
    Username,
}

impl LoginField {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Username => "username",
        }
    }
}

impl FromStr for LoginField {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "email" => Ok(Self::Email),
            "username" => Ok(Self::Username),
            other => Err(format!(
                "unsupported username field '{other}' (expected 'email' or 'username')"
            )),
        }
    }
}

#[derive(Debug)]
pub enum CreateOutcome {
    Created(User),
    Conflict,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>>;

    async fn find_by_login(&self, field: LoginField, value: &str) -> Result<Option<User>>;

    async fn find_by_provider(&self, provider: Provider, provider_id: &str)
        -> Result<Option<User>>;

    /// Insert a user. Returns `Conflict` when the email, username or provider
    /// id is already taken.
    async fn create(&self, user: NewUser) -> Result<CreateOutcome>;

    /// Attach (or refresh) a provider identity on an existing user.
    async fn link_provider(&self, id: i64, identity: &ProviderIdentity) -> Result<Option<User>>;

    async fn ping(&self) -> Result<()>;
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
