//! OAuth2 authorization-code strategies for Google, Facebook and GitHub.
//!
//! The flow is plain HTTP through `reqwest`: exchange the code at the token
//! endpoint, fetch the profile with the provider access token, then find or
//! create the local user carrying that provider id.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use reqwest::{header::ACCEPT, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use url::Url;

use super::{
    AuthError, AuthRequest, OAuthProviderConfig, Provider, Strategy, StrategyName, Verification,
};
use crate::{
    users::{normalize_email, CreateOutcome, LoginField, NewUser, ProviderIdentity, User, UserStore},
    APP_USER_AGENT,
};

const CODE_FIELD: &str = "code";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const STATE_BYTES: usize = 32;

/// Public endpoints of an OAuth2 provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub profile_url: String,
    /// Fallback for providers that omit the email from the profile.
    pub emails_url: Option<String>,
    pub scope: String,
}

impl ProviderEndpoints {
    #[must_use]
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::Google => Self {
                authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
                profile_url: "https://www.googleapis.com/oauth2/v3/userinfo".to_string(),
                emails_url: None,
                scope: "openid email profile".to_string(),
            },
            Provider::Facebook => Self {
                authorize_url: "https://www.facebook.com/v19.0/dialog/oauth".to_string(),
                token_url: "https://graph.facebook.com/v19.0/oauth/access_token".to_string(),
                profile_url: "https://graph.facebook.com/me?fields=id,name,email".to_string(),
                emails_url: None,
                scope: "email public_profile".to_string(),
            },
            Provider::Github => Self {
                authorize_url: "https://github.com/login/oauth/authorize".to_string(),
                token_url: "https://github.com/login/oauth/access_token".to_string(),
                profile_url: "https://api.github.com/user".to_string(),
                emails_url: Some("https://api.github.com/user/emails".to_string()),
                scope: "read:user user:email".to_string(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderEmail {
    email: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    verified: bool,
}

/// Profile fields the strategy needs, plus the raw document.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderProfile {
    pub id: String,
    /// Only set when the provider vouches for the address.
    pub email: Option<String>,
    pub raw: Value,
}

impl ProviderProfile {
    fn from_value(provider: Provider, raw: Value) -> Result<Self> {
        let id_key = match provider {
            Provider::Google => "sub",
            Provider::Facebook | Provider::Github => "id",
        };
        // GitHub ids are numbers, the others strings.
        let id = match raw.get(id_key) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(anyhow!("{provider} profile has no '{id_key}'")),
        };
        // GitHub's public email carries no verification flag, so it only
        // counts when `/user/emails` reports it verified. Facebook returns
        // confirmed addresses only.
        let email_verified = match provider {
            Provider::Google => match raw.get("email_verified") {
                Some(Value::Bool(verified)) => *verified,
                Some(Value::String(verified)) => verified == "true",
                _ => false,
            },
            Provider::Facebook => true,
            Provider::Github => false,
        };
        let email = raw
            .get("email")
            .and_then(Value::as_str)
            .filter(|email| email_verified && !email.is_empty())
            .map(normalize_email);

        Ok(Self { id, email, raw })
    }
}

/// One configured OAuth2 provider.
pub struct OAuthStrategy {
    provider: Provider,
    client_id: String,
    client_secret: SecretString,
    callback_url: String,
    endpoints: ProviderEndpoints,
    users: Arc<dyn UserStore>,
    client: Client,
}

impl OAuthStrategy {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        provider: Provider,
        config: &OAuthProviderConfig,
        users: Arc<dyn UserStore>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to build OAuth HTTP client")?;

        Ok(Self {
            provider,
            client_id: config.client_id().to_string(),
            client_secret: config.client_secret().clone(),
            callback_url: config.callback_url().to_string(),
            endpoints: config.endpoints(provider),
            users,
            client,
        })
    }

    /// Provider consent URL carrying `state`.
    ///
    /// # Errors
    /// Returns an error if the configured authorize URL is invalid.
    pub fn authorization_url(&self, state: &str) -> Result<Url> {
        Url::parse_with_params(
            &self.endpoints.authorize_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.callback_url.as_str()),
                ("response_type", "code"),
                ("scope", self.endpoints.scope.as_str()),
                ("state", state),
            ],
        )
        .with_context(|| format!("Invalid {} authorize URL", self.provider))
    }

    async fn exchange_code(&self, code: &str) -> Result<String> {
        let response: TokenResponse = self
            .client
            .post(&self.endpoints.token_url)
            .header(ACCEPT, "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("code", code),
                ("redirect_uri", self.callback_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .context("Failed to exchange code")?
            .error_for_status()
            .context("Token endpoint rejected the code")?
            .json()
            .await
            .context("Failed to parse token response")?;

        // GitHub answers 200 with an `error` field.
        if let Some(error) = response.error {
            return Err(anyhow!(
                "{error}: {}",
                response.error_description.unwrap_or_default()
            ));
        }

        response
            .access_token
            .ok_or_else(|| anyhow!("Token response has no access_token"))
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile> {
        let raw: Value = self
            .client
            .get(&self.endpoints.profile_url)
            .header(ACCEPT, "application/json")
            .bearer_auth(access_token)
            .send()
            .await
            .context("Failed to fetch profile")?
            .error_for_status()
            .context("Profile endpoint refused the token")?
            .json()
            .await
            .context("Failed to parse profile")?;

        let mut profile = ProviderProfile::from_value(self.provider, raw)?;

        if profile.email.is_none() {
            if let Some(emails_url) = &self.endpoints.emails_url {
                profile.email = self.primary_email(emails_url, access_token).await?;
            }
        }

        Ok(profile)
    }

    async fn primary_email(&self, emails_url: &str, access_token: &str) -> Result<Option<String>> {
        let emails: Vec<ProviderEmail> = self
            .client
            .get(emails_url)
            .header(ACCEPT, "application/json")
            .bearer_auth(access_token)
            .send()
            .await
            .context("Failed to fetch emails")?
            .error_for_status()
            .context("Emails endpoint refused the token")?
            .json()
            .await
            .context("Failed to parse emails")?;

        Ok(emails
            .into_iter()
            .find(|email| email.primary && email.verified)
            .map(|email| normalize_email(&email.email)))
    }

    /// Find the user linked to `profile`, linking by verified email or
    /// creating one.
    async fn resolve_user(&self, profile: ProviderProfile) -> Result<User> {
        let identity = ProviderIdentity {
            provider: self.provider,
            id: profile.id,
            profile: profile.raw,
        };

        if let Some(user) = self
            .users
            .find_by_provider(self.provider, &identity.id)
            .await?
        {
            return self.link(user.id, &identity).await;
        }

        let new_user = NewUser {
            email: profile.email.clone(),
            identity: Some(identity.clone()),
            ..NewUser::default()
        };

        match self.users.create(new_user).await? {
            CreateOutcome::Created(user) => {
                info!("created user {} from {}", user.id, self.provider);
                Ok(user)
            }
            CreateOutcome::Conflict => {
                // The verified email already belongs to a local account.
                let email = profile
                    .email
                    .ok_or_else(|| anyhow!("{} identity conflicts", self.provider))?;
                let user = self
                    .users
                    .find_by_login(LoginField::Email, &email)
                    .await?
                    .ok_or_else(|| anyhow!("{} identity conflicts", self.provider))?;
                self.link(user.id, &identity).await
            }
        }
    }

    async fn link(&self, id: i64, identity: &ProviderIdentity) -> Result<User> {
        self.users
            .link_provider(id, identity)
            .await?
            .ok_or_else(|| anyhow!("user {id} disappeared while linking"))
    }
}

impl fmt::Debug for OAuthStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthStrategy")
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Strategy for OAuthStrategy {
    fn name(&self) -> StrategyName {
        self.provider.strategy()
    }

    #[instrument(skip(self, request), fields(provider = %self.provider))]
    async fn verify(&self, request: &AuthRequest) -> Result<Verification, AuthError> {
        let code = request
            .field_str(CODE_FIELD)
            .ok_or_else(|| AuthError::Verification("No authorization code".to_string()))?;

        let profile = match self.exchange_code(code).await {
            Ok(token) => self.fetch_profile(&token).await,
            Err(err) => Err(err),
        }
        .map_err(|err| {
            debug!("{} exchange failed: {err:#}", self.provider);
            AuthError::Verification(format!("{} authentication failed", self.provider))
        })?;

        let user = self
            .resolve_user(profile)
            .await
            .context("Failed to resolve OAuth user")?;

        Ok(Verification::principal(user))
    }
}

/// Pending authorization states. Each state is accepted once, within the TTL.
#[derive(Debug)]
pub struct OAuthStates {
    ttl: Duration,
    pending: Mutex<HashMap<String, (Provider, Instant)>>,
}

impl OAuthStates {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub async fn issue(&self, provider: Provider) -> String {
        let mut bytes = [0u8; STATE_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let state = Base64UrlUnpadded::encode_string(&bytes);

        let now = Instant::now();
        let mut pending = self.pending.lock().await;
        pending.retain(|_, (_, issued)| now.duration_since(*issued) < self.ttl);
        pending.insert(state.clone(), (provider, now));

        state
    }

    /// Remove `state` and report whether it was issued for `provider` and is
    /// still fresh.
    pub async fn consume(&self, provider: Provider, state: &str) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.remove(state) {
            Some((issued_for, issued)) => {
                issued_for == provider && issued.elapsed() < self.ttl
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::MemoryUserStore;
    use anyhow::bail;
    use axum::{
        http::{header::AUTHORIZATION, HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;
    use tokio::net::TcpListener;

    fn authorized(headers: &HeaderMap, body: Value) -> Result<Json<Value>, StatusCode> {
        match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            Some("Bearer provider-token") => Ok(Json(body)),
            _ => Err(StatusCode::UNAUTHORIZED),
        }
    }

    async fn token(body: String) -> Json<Value> {
        if body.contains("code=good") {
            Json(json!({"access_token": "provider-token", "token_type": "bearer"}))
        } else {
            Json(json!({"error": "bad_verification_code", "error_description": "expired"}))
        }
    }

    /// Serve a fake GitHub on an ephemeral port.
    async fn mock_github(profile: Value, emails: Value) -> Result<ProviderEndpoints> {
        let app = Router::new()
            .route("/token", post(token))
            .route(
                "/user",
                get(move |headers: HeaderMap| async move { authorized(&headers, profile) }),
            )
            .route(
                "/user/emails",
                get(move |headers: HeaderMap| async move { authorized(&headers, emails) }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(ProviderEndpoints {
            authorize_url: format!("http://{addr}/authorize"),
            token_url: format!("http://{addr}/token"),
            profile_url: format!("http://{addr}/user"),
            emails_url: Some(format!("http://{addr}/user/emails")),
            scope: "read:user".to_string(),
        })
    }

    async fn mock_provider() -> Result<ProviderEndpoints> {
        mock_github(
            json!({"id": 42, "login": "octo", "email": "Octo@Example.com"}),
            json!([
                {"email": "octo@users.noreply.github.com", "primary": false, "verified": true},
                {"email": "Octo@Example.com", "primary": true, "verified": true}
            ]),
        )
        .await
    }

    fn github(endpoints: ProviderEndpoints, users: Arc<dyn UserStore>) -> Result<OAuthStrategy> {
        let config = OAuthProviderConfig::new(
            "client-id".to_string(),
            SecretString::from("client-secret"),
            "http://localhost:3030/auth/github/callback".to_string(),
        )
        .with_endpoints(endpoints);
        OAuthStrategy::new(Provider::Github, &config, users)
    }

    #[tokio::test]
    async fn code_exchange_creates_then_reuses_user() -> Result<()> {
        let users = Arc::new(MemoryUserStore::new());
        let strategy = github(mock_provider().await?, users.clone())?;
        let request = AuthRequest::new("github").with_field("code", "good");

        let first = strategy.verify(&request).await?;
        let Some(first) = first.user else {
            bail!("first login resolved no user");
        };
        assert_eq!(first.github_id.as_deref(), Some("42"));
        assert_eq!(first.email.as_deref(), Some("octo@example.com"));

        let second = strategy.verify(&request).await?;
        assert_eq!(second.user.map(|user| user.id), Some(first.id));
        Ok(())
    }

    #[tokio::test]
    async fn existing_email_is_linked() -> Result<()> {
        let users = Arc::new(MemoryUserStore::new());
        users
            .create(NewUser {
                email: Some("octo@example.com".to_string()),
                password_hash: Some("hash".to_string()),
                ..NewUser::default()
            })
            .await?;
        let strategy = github(mock_provider().await?, users.clone())?;

        let verification = strategy
            .verify(&AuthRequest::new("github").with_field("code", "good"))
            .await?;
        let Some(user) = verification.user else {
            bail!("no user linked");
        };
        assert_eq!(user.id, 1);
        assert_eq!(user.github_id.as_deref(), Some("42"));
        Ok(())
    }

    #[tokio::test]
    async fn unverified_primary_email_is_not_linked() -> Result<()> {
        let users = Arc::new(MemoryUserStore::new());
        users
            .create(NewUser {
                email: Some("octo@example.com".to_string()),
                password_hash: Some("hash".to_string()),
                ..NewUser::default()
            })
            .await?;
        let endpoints = mock_github(
            json!({"id": 999, "login": "mallory", "email": "octo@example.com"}),
            json!([{"email": "octo@example.com", "primary": true, "verified": false}]),
        )
        .await?;
        let strategy = github(endpoints, users.clone())?;

        let verification = strategy
            .verify(&AuthRequest::new("github").with_field("code", "good"))
            .await?;
        let Some(user) = verification.user else {
            bail!("no user resolved");
        };
        assert_ne!(user.id, 1);
        assert_eq!(user.github_id.as_deref(), Some("999"));
        assert!(user.email.is_none());

        let Some(owner) = users.find_by_id(1).await? else {
            bail!("local user vanished");
        };
        assert!(owner.github_id.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn rejected_code_is_a_verification_error() -> Result<()> {
        let strategy = github(mock_provider().await?, Arc::new(MemoryUserStore::new()))?;

        let result = strategy
            .verify(&AuthRequest::new("github").with_field("code", "stale"))
            .await;
        assert!(matches!(
            result,
            Err(AuthError::Verification(message)) if message == "github authentication failed"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn missing_code_is_rejected() -> Result<()> {
        let strategy = github(
            ProviderEndpoints::for_provider(Provider::Github),
            Arc::new(MemoryUserStore::new()),
        )?;
        assert!(matches!(
            strategy.verify(&AuthRequest::new("github")).await,
            Err(AuthError::Verification(message)) if message == "No authorization code"
        ));
        Ok(())
    }

    #[test]
    fn authorization_url_carries_client_and_state() -> Result<()> {
        let strategy = github(
            ProviderEndpoints::for_provider(Provider::Github),
            Arc::new(MemoryUserStore::new()),
        )?;
        let url = strategy.authorization_url("abc")?;
        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("github.com"));
        assert_eq!(query.get("client_id").map(String::as_str), Some("client-id"));
        assert_eq!(query.get("state").map(String::as_str), Some("abc"));
        assert_eq!(
            query.get("redirect_uri").map(String::as_str),
            Some("http://localhost:3030/auth/github/callback")
        );
        Ok(())
    }

    #[test]
    fn profile_ids_accept_strings_and_numbers() -> Result<()> {
        let google = ProviderProfile::from_value(
            Provider::Google,
            json!({"sub": "g-1", "email": "a@b.com", "email_verified": true}),
        )?;
        assert_eq!(google.id, "g-1");
        assert_eq!(google.email.as_deref(), Some("a@b.com"));

        let github = ProviderProfile::from_value(Provider::Github, json!({"id": 7}))?;
        assert_eq!(github.id, "7");
        assert!(github.email.is_none());

        assert!(ProviderProfile::from_value(Provider::Facebook, json!({"name": "x"})).is_err());
        Ok(())
    }

    #[test]
    fn only_vouched_emails_are_kept() -> Result<()> {
        for (raw, expected) in [
            (json!({"sub": "g", "email": "a@b.com", "email_verified": false}), None),
            (json!({"sub": "g", "email": "a@b.com"}), None),
            (json!({"sub": "g", "email": "a@b.com", "email_verified": "true"}), Some("a@b.com")),
        ] {
            let profile = ProviderProfile::from_value(Provider::Google, raw)?;
            assert_eq!(profile.email.as_deref(), expected);
        }

        let github =
            ProviderProfile::from_value(Provider::Github, json!({"id": 7, "email": "a@b.com"}))?;
        assert!(github.email.is_none());

        let facebook =
            ProviderProfile::from_value(Provider::Facebook, json!({"id": "f", "email": "A@b.com"}))?;
        assert_eq!(facebook.email.as_deref(), Some("a@b.com"));
        Ok(())
    }

    #[tokio::test]
    async fn state_is_single_use_and_bound_to_provider() {
        let states = OAuthStates::new(Duration::from_secs(300));

        let state = states.issue(Provider::Github).await;
        assert!(!states.consume(Provider::Google, &state).await);

        let state = states.issue(Provider::Github).await;
        assert!(states.consume(Provider::Github, &state).await);
        assert!(!states.consume(Provider::Github, &state).await);
        assert!(!states.consume(Provider::Github, "forged").await);
    }

    #[tokio::test]
    async fn expired_state_is_rejected() {
        let states = OAuthStates::new(Duration::ZERO);
        let state = states.issue(Provider::Facebook).await;
        assert!(!states.consume(Provider::Facebook, &state).await);
    }
}
