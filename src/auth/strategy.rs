//! Strategy names, the verification capability, and the registration table.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};
use utoipa::ToSchema;

use super::{jwt::Claims, AuthError};
use crate::users::User;

/// Closed set of credential strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StrategyName {
    Local,
    Jwt,
    Google,
    Facebook,
    Github,
}

impl StrategyName {
    pub const ALL: [Self; 5] = [
        Self::Local,
        Self::Jwt,
        Self::Google,
        Self::Facebook,
        Self::Github,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Jwt => "jwt",
            Self::Google => "google",
            Self::Facebook => "facebook",
            Self::Github => "github",
        }
    }

    /// OAuth provider behind this strategy, if any.
    #[must_use]
    pub const fn provider(self) -> Option<Provider> {
        match self {
            Self::Google => Some(Provider::Google),
            Self::Facebook => Some(Provider::Facebook),
            Self::Github => Some(Provider::Github),
            Self::Local | Self::Jwt => None,
        }
    }
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyName {
    type Err = AuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == value)
            .ok_or_else(|| AuthError::UnknownStrategy(value.to_string()))
    }
}

/// Parse a comma separated allow-list such as `local,jwt,github`.
///
/// # Errors
/// Returns an error for unknown names or an empty list.
pub fn parse_strategy_list(list: &str) -> Result<Vec<StrategyName>, AuthError> {
    let mut names = Vec::new();
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let name = item.parse::<StrategyName>()?;
        if !names.contains(&name) {
            names.push(name);
        }
    }
    if names.is_empty() {
        return Err(AuthError::MissingStrategy);
    }
    Ok(names)
}

/// Third-party identity providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Facebook,
    Github,
}

impl Provider {
    pub const ALL: [Self; 3] = [Self::Google, Self::Facebook, Self::Github];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.strategy().as_str()
    }

    #[must_use]
    pub const fn strategy(self) -> StrategyName {
        match self {
            Self::Google => StrategyName::Google,
            Self::Facebook => StrategyName::Facebook,
            Self::Github => StrategyName::Github,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let name = value.parse::<StrategyName>()?;
        name.provider()
            .ok_or_else(|| AuthError::UnknownStrategy(value.trim().to_string()))
    }
}

/// Inbound credential payload: a strategy selector plus strategy-specific fields.
#[derive(Clone, Default, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    strategy: Option<String>,
    #[serde(flatten)]
    data: Map<String, Value>,
    #[serde(skip)]
    bearer: Option<String>,
}

impl AuthRequest {
    #[must_use]
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: Some(strategy.into()),
            ..Self::default()
        }
    }

    /// A request carrying only a bearer token (used for session removal).
    #[must_use]
    pub fn bearer_only(token: Option<String>) -> Self {
        Self {
            bearer: token,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.data.insert(name.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token;
        self
    }

    /// Resolve the declared strategy against the closed set.
    ///
    /// # Errors
    /// `MissingStrategy` when absent, `UnknownStrategy` for names outside the set.
    pub fn strategy_name(&self) -> Result<StrategyName, AuthError> {
        match self.strategy.as_deref() {
            None => Err(AuthError::MissingStrategy),
            Some(name) if name.trim().is_empty() => Err(AuthError::MissingStrategy),
            Some(name) => name.parse(),
        }
    }

    /// Non-empty string field from the payload.
    #[must_use]
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.data
            .get(name)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    #[must_use]
    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref().filter(|token| !token.is_empty())
    }
}

impl fmt::Debug for AuthRequest {
    // Field values may be passwords or codes; only names are printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("strategy", &self.strategy)
            .field("fields", &self.data.keys().collect::<Vec<_>>())
            .field("bearer", &self.bearer.as_ref().map(|_| "***"))
            .finish()
    }
}

/// What a strategy resolved. `user` may be `None` even on success.
#[derive(Clone, Debug, Default)]
pub struct Verification {
    pub user: Option<User>,
    pub payload: Option<Claims>,
}

impl Verification {
    #[must_use]
    pub fn principal(user: User) -> Self {
        Self {
            user: Some(user),
            payload: None,
        }
    }
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> StrategyName;

    /// Check the credentials carried by `request`.
    async fn verify(&self, request: &AuthRequest) -> Result<Verification, AuthError>;
}

/// Strategy registration table, built once at startup.
#[derive(Clone, Default)]
pub struct Strategies {
    registered: HashMap<StrategyName, Arc<dyn Strategy>>,
}

impl Strategies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.registered.insert(strategy.name(), strategy);
        self
    }

    #[must_use]
    pub fn get(&self, name: StrategyName) -> Option<&Arc<dyn Strategy>> {
        self.registered.get(&name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<StrategyName> {
        StrategyName::ALL
            .into_iter()
            .filter(|name| self.registered.contains_key(name))
            .collect()
    }

    /// Every allowed strategy must have an implementation behind it.
    ///
    /// # Errors
    /// Returns an error naming the first allowed strategy that is not registered.
    pub fn ensure_registered(&self, allowed: &[StrategyName]) -> Result<()> {
        match allowed.iter().find(|name| !self.registered.contains_key(name)) {
            Some(name) => Err(anyhow!(
                "strategy '{name}' is allowed but not configured"
            )),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Strategies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Noop(StrategyName);

    #[async_trait]
    impl Strategy for Noop {
        fn name(&self) -> StrategyName {
            self.0
        }

        async fn verify(&self, _request: &AuthRequest) -> Result<Verification, AuthError> {
            Ok(Verification::default())
        }
    }

    #[test]
    fn strategy_names_round_trip_through_str() {
        for name in StrategyName::ALL {
            assert_eq!(name.as_str().parse::<StrategyName>().ok(), Some(name));
        }
    }

    #[test]
    fn unknown_strategy_is_explicit_error() {
        assert!(matches!(
            "twitter".parse::<StrategyName>(),
            Err(AuthError::UnknownStrategy(name)) if name == "twitter"
        ));
        assert!(matches!(
            "Local".parse::<StrategyName>(),
            Err(AuthError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn parse_strategy_list_dedupes_and_rejects_empty() {
        assert!(matches!(
            parse_strategy_list("local, jwt ,local"),
            Ok(names) if names == vec![StrategyName::Local, StrategyName::Jwt]
        ));
        assert!(matches!(
            parse_strategy_list(" , "),
            Err(AuthError::MissingStrategy)
        ));
        assert!(parse_strategy_list("local,twitter").is_err());
    }

    #[test]
    fn provider_parses_only_oauth_strategies() {
        assert!(matches!("github".parse::<Provider>(), Ok(Provider::Github)));
        assert!("local".parse::<Provider>().is_err());
        assert_eq!(Provider::Facebook.strategy(), StrategyName::Facebook);
    }

    #[test]
    fn auth_request_deserializes_strategy_and_fields() -> anyhow::Result<()> {
        let request: AuthRequest = serde_json::from_value(json!({
            "strategy": "local",
            "email": "a@b.com",
            "password": "correct",
            "attempts": 3
        }))?;

        assert!(matches!(request.strategy_name(), Ok(StrategyName::Local)));
        assert_eq!(request.field_str("email"), Some("a@b.com"));
        assert_eq!(request.field_str("attempts"), None);
        assert_eq!(request.bearer(), None);
        Ok(())
    }

    #[test]
    fn auth_request_without_strategy_is_missing() {
        let request = AuthRequest::default().with_field("email", "a@b.com");
        assert!(matches!(
            request.strategy_name(),
            Err(AuthError::MissingStrategy)
        ));
    }

    #[test]
    fn auth_request_debug_hides_values() {
        let request = AuthRequest::new("local")
            .with_field("password", "hunter2")
            .with_bearer(Some("secret-token".to_string()));
        let rendered = format!("{request:?}");
        assert!(rendered.contains("password"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("secret-token"));
    }

    #[test]
    fn ensure_registered_names_missing_strategy() {
        let strategies = Strategies::new()
            .register(Arc::new(Noop(StrategyName::Local)))
            .register(Arc::new(Noop(StrategyName::Jwt)));

        assert!(strategies
            .ensure_registered(&[StrategyName::Local, StrategyName::Jwt])
            .is_ok());

        let err = strategies
            .ensure_registered(&[StrategyName::Local, StrategyName::Google])
            .err()
            .map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("strategy 'google' is allowed but not configured")
        );
        assert_eq!(
            strategies.names(),
            vec![StrategyName::Local, StrategyName::Jwt]
        );
    }
}
