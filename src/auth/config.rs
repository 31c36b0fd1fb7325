//! Authentication configuration, assembled once at startup and never mutated.

use secrecy::SecretString;
use std::time::Duration;

use super::{oauth::ProviderEndpoints, Provider, StrategyName};
use crate::users::LoginField;

const DEFAULT_ISSUER: &str = "turnstile";
const DEFAULT_AUDIENCE: &str = "https://yourdomain.com";
const DEFAULT_SUBJECT: &str = "anonymous";
const DEFAULT_EXPIRES_IN_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_OAUTH_STATE_TTL_SECONDS: u64 = 5 * 60;
const DEFAULT_PASSWORD_FIELD: &str = "password";

/// Request/entity field mapping for the `local` strategy.
#[derive(Clone, Debug)]
pub struct LocalConfig {
    username_field: LoginField,
    password_field: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            username_field: LoginField::Email,
            password_field: DEFAULT_PASSWORD_FIELD.to_string(),
        }
    }
}

impl LocalConfig {
    #[must_use]
    pub fn new(username_field: LoginField, password_field: String) -> Self {
        Self {
            username_field,
            password_field,
        }
    }

    #[must_use]
    pub fn username_field(&self) -> LoginField {
        self.username_field
    }

    #[must_use]
    pub fn password_field(&self) -> &str {
        &self.password_field
    }
}

/// OAuth2 client registration for one provider.
#[derive(Clone, Debug)]
pub struct OAuthProviderConfig {
    client_id: String,
    client_secret: SecretString,
    callback_url: String,
    endpoints: Option<ProviderEndpoints>,
}

impl OAuthProviderConfig {
    #[must_use]
    pub fn new(client_id: String, client_secret: SecretString, callback_url: String) -> Self {
        Self {
            client_id,
            client_secret,
            callback_url,
            endpoints: None,
        }
    }

    /// Override the provider's public endpoints.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: ProviderEndpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> &SecretString {
        &self.client_secret
    }

    #[must_use]
    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    #[must_use]
    pub fn endpoints(&self, provider: Provider) -> ProviderEndpoints {
        self.endpoints
            .clone()
            .unwrap_or_else(|| ProviderEndpoints::for_provider(provider))
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    secret: SecretString,
    strategies: Vec<StrategyName>,
    issuer: String,
    audience: String,
    subject: String,
    expires_in: Duration,
    local: LocalConfig,
    google: Option<OAuthProviderConfig>,
    facebook: Option<OAuthProviderConfig>,
    github: Option<OAuthProviderConfig>,
    require_verified: bool,
    oauth_state_ttl: Duration,
}

impl AuthConfig {
    /// Defaults: `local` and `jwt` allowed, tokens valid for one day.
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            strategies: vec![StrategyName::Local, StrategyName::Jwt],
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            subject: DEFAULT_SUBJECT.to_string(),
            expires_in: Duration::from_secs(DEFAULT_EXPIRES_IN_SECONDS),
            local: LocalConfig::default(),
            google: None,
            facebook: None,
            github: None,
            require_verified: false,
            oauth_state_ttl: Duration::from_secs(DEFAULT_OAUTH_STATE_TTL_SECONDS),
        }
    }

    /// Strategies allowed to create a session.
    #[must_use]
    pub fn with_strategies(mut self, strategies: Vec<StrategyName>) -> Self {
        self.strategies = strategies;
        self
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: String) -> Self {
        self.audience = audience;
        self
    }

    #[must_use]
    pub fn with_subject(mut self, subject: String) -> Self {
        self.subject = subject;
        self
    }

    #[must_use]
    pub fn with_expires_in_seconds(mut self, seconds: u64) -> Self {
        self.expires_in = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_local(mut self, local: LocalConfig) -> Self {
        self.local = local;
        self
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Provider, config: OAuthProviderConfig) -> Self {
        match provider {
            Provider::Google => self.google = Some(config),
            Provider::Facebook => self.facebook = Some(config),
            Provider::Github => self.github = Some(config),
        }
        self
    }

    #[must_use]
    pub fn with_require_verified(mut self, require: bool) -> Self {
        self.require_verified = require;
        self
    }

    #[must_use]
    pub fn with_oauth_state_ttl_seconds(mut self, seconds: u64) -> Self {
        self.oauth_state_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    #[must_use]
    pub fn strategies(&self) -> &[StrategyName] {
        &self.strategies
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn expires_in(&self) -> Duration {
        self.expires_in
    }

    #[must_use]
    pub fn local(&self) -> &LocalConfig {
        &self.local
    }

    #[must_use]
    pub fn provider(&self, provider: Provider) -> Option<&OAuthProviderConfig> {
        match provider {
            Provider::Google => self.google.as_ref(),
            Provider::Facebook => self.facebook.as_ref(),
            Provider::Github => self.github.as_ref(),
        }
    }

    #[must_use]
    pub fn require_verified(&self) -> bool {
        self.require_verified
    }

    #[must_use]
    pub fn oauth_state_ttl(&self) -> Duration {
        self.oauth_state_ttl
    }
}
