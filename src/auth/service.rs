use anyhow::Result;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, instrument};
use url::Url;

use super::{
    jwt::{JwtStrategy, TokenService},
    local::LocalStrategy,
    oauth::{OAuthStates, OAuthStrategy},
    pipeline::{
        AttachPrincipal, AuthResult, Authenticate, HookContext, IsVerified, Method, Pipeline,
        RequirePrincipal, StripSecrets,
    },
    AuthConfig, AuthError, AuthRequest, Provider, StrategyName, Strategies,
};
use crate::users::UserStore;

/// Session create/remove behind the hook pipeline.
#[derive(Debug)]
pub struct AuthenticationService {
    allowed: Vec<StrategyName>,
    pipeline: Pipeline,
    tokens: Arc<TokenService>,
    providers: HashMap<Provider, Arc<OAuthStrategy>>,
    states: OAuthStates,
}

impl AuthenticationService {
    /// Register every strategy the configuration supports and check the
    /// allow-list against them.
    ///
    /// # Errors
    /// Returns an error if an allowed strategy is not configured.
    pub fn from_config(config: AuthConfig, users: Arc<dyn UserStore>) -> Result<Self> {
        let tokens = Arc::new(TokenService::new(&config));

        let mut strategies = Strategies::new()
            .register(Arc::new(LocalStrategy::new(
                config.local().clone(),
                users.clone(),
            )))
            .register(Arc::new(JwtStrategy::new(tokens.clone(), users.clone())));

        let mut providers = HashMap::new();
        for provider in Provider::ALL {
            if let Some(provider_config) = config.provider(provider) {
                let strategy = Arc::new(OAuthStrategy::new(
                    provider,
                    provider_config,
                    users.clone(),
                )?);
                strategies = strategies.register(strategy.clone());
                providers.insert(provider, strategy);
            }
        }

        let mut service = Self::with_strategies(config, strategies, tokens)?;
        service.providers = providers;
        Ok(service)
    }

    /// Build the pipeline over an explicit registration table.
    ///
    /// # Errors
    /// Returns an error if an allowed strategy is not registered, or if `jwt`
    /// (needed to remove sessions) is missing.
    pub fn with_strategies(
        config: AuthConfig,
        strategies: Strategies,
        tokens: Arc<TokenService>,
    ) -> Result<Self> {
        strategies.ensure_registered(config.strategies())?;
        strategies.ensure_registered(&[StrategyName::Jwt])?;
        info!("Authentication strategies: {:?}", config.strategies());

        let strategies = Arc::new(strategies);

        let mut pipeline = Pipeline::new().before(
            Method::Create,
            Arc::new(Authenticate::session(
                config.strategies().to_vec(),
                strategies.clone(),
            )),
        );
        if config.require_verified() {
            pipeline = pipeline.before(Method::Create, Arc::new(IsVerified));
        }
        let pipeline = pipeline
            .before(Method::Remove, Arc::new(Authenticate::bearer(strategies)))
            .after(Method::Create, Arc::new(RequirePrincipal))
            .after(Method::Create, Arc::new(AttachPrincipal))
            .after(Method::Create, Arc::new(StripSecrets));

        debug!("{pipeline:?}");

        Ok(Self {
            allowed: config.strategies().to_vec(),
            pipeline,
            tokens,
            providers: HashMap::new(),
            states: OAuthStates::new(config.oauth_state_ttl()),
        })
    }

    /// Create a session from the credentials in `request`.
    ///
    /// # Errors
    /// Returns the first pipeline failure.
    #[instrument(skip(self))]
    pub async fn create(&self, request: AuthRequest) -> Result<AuthResult, AuthError> {
        let mut context = HookContext::new(Method::Create, request);

        self.pipeline.run_before(&mut context).await?;

        let user_id = context.params.user.as_ref().map(|user| user.id);
        context.result = Some(AuthResult {
            access_token: self.tokens.sign(user_id)?,
            user: None,
        });

        self.pipeline.run_after(&mut context).await?;

        context
            .result
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("session result was dropped")))
    }

    /// Revoke the bearer token.
    ///
    /// # Errors
    /// `Authorization` when the token is missing or does not verify.
    #[instrument(skip(self, bearer))]
    pub async fn remove(&self, bearer: Option<String>) -> Result<AuthResult, AuthError> {
        let mut context = HookContext::new(Method::Remove, AuthRequest::bearer_only(bearer));

        self.pipeline.run_before(&mut context).await?;

        let (Some(claims), Some(token)) = (&context.params.payload, context.request.bearer())
        else {
            return Err(AuthError::Authorization("Invalid token".to_string()));
        };
        self.tokens.revoke(claims).await;

        context.result = Some(AuthResult {
            access_token: token.to_string(),
            user: None,
        });

        self.pipeline.run_after(&mut context).await?;

        context
            .result
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("session result was dropped")))
    }

    /// Provider consent URL with a fresh state.
    ///
    /// # Errors
    /// `UnknownStrategy` when the provider is not configured, `StrategyNotAllowed`
    /// when it is configured but not allowed.
    pub async fn authorization_url(&self, provider: Provider) -> Result<Url, AuthError> {
        let strategy = self.oauth(provider)?;
        let state = self.states.issue(provider).await;
        Ok(strategy.authorization_url(&state)?)
    }

    /// Finish the OAuth redirect: check the state, then create a session with
    /// the provider code.
    ///
    /// # Errors
    /// `Verification` for unknown or reused states, otherwise as [`Self::create`].
    #[instrument(skip(self, code, state))]
    pub async fn callback(
        &self,
        provider: Provider,
        code: &str,
        state: &str,
    ) -> Result<AuthResult, AuthError> {
        self.oauth(provider)?;
        if !self.states.consume(provider, state).await {
            return Err(AuthError::Verification("Invalid OAuth state".to_string()));
        }

        self.create(AuthRequest::new(provider.as_str()).with_field("code", code))
            .await
    }

    fn oauth(&self, provider: Provider) -> Result<&Arc<OAuthStrategy>, AuthError> {
        let strategy = self
            .providers
            .get(&provider)
            .ok_or_else(|| AuthError::UnknownStrategy(provider.to_string()))?;
        if !self.allowed.contains(&provider.strategy()) {
            return Err(AuthError::StrategyNotAllowed(provider.strategy()));
        }
        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{password::hash_password, OAuthProviderConfig},
        users::{MemoryUserStore, NewUser},
    };
    use anyhow::bail;
    use secrecy::SecretString;

    async fn service() -> Result<AuthenticationService> {
        let users = Arc::new(MemoryUserStore::new());
        users
            .create(NewUser {
                email: Some("a@b.com".to_string()),
                password_hash: Some(hash_password("correct")?),
                ..NewUser::default()
            })
            .await?;
        AuthenticationService::from_config(AuthConfig::new(SecretString::from("secret")), users)
    }

    fn login(password: &str) -> AuthRequest {
        AuthRequest::new("local")
            .with_field("email", "a@b.com")
            .with_field("password", password)
    }

    #[tokio::test]
    async fn local_login_returns_token_and_user_without_password() -> Result<()> {
        let service = service().await?;

        let result = service.create(login("correct")).await?;
        let value = serde_json::to_value(&result)?;

        assert!(!result.access_token.is_empty());
        assert_eq!(value["user"]["id"], 1);
        assert_eq!(value["user"]["email"], "a@b.com");
        assert!(value["user"].get("password").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_issues_no_token() -> Result<()> {
        let service = service().await?;
        assert!(matches!(
            service.create(login("wrong")).await,
            Err(AuthError::Verification(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unlisted_strategy_is_rejected() -> Result<()> {
        let service = service().await?;
        assert!(matches!(
            service.create(AuthRequest::new("twitter")).await,
            Err(AuthError::UnknownStrategy(_))
        ));
        assert!(matches!(
            service
                .create(AuthRequest::new("github").with_field("code", "x"))
                .await,
            Err(AuthError::StrategyNotAllowed(StrategyName::Github))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn jwt_login_reuses_issued_token() -> Result<()> {
        let service = service().await?;
        let first = service.create(login("correct")).await?;

        let again = service
            .create(AuthRequest::new("jwt").with_field("accessToken", first.access_token))
            .await?;
        assert_eq!(again.user.map(|user| user.id), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn token_without_user_is_forbidden() -> Result<()> {
        let service = service().await?;
        let anonymous = service.tokens.sign(None)?;

        for _ in 0..2 {
            let result = service
                .create(AuthRequest::new("jwt").with_bearer(Some(anonymous.clone())))
                .await;
            assert!(matches!(result, Err(AuthError::Permission)));
        }
        Ok(())
    }

    #[tokio::test]
    async fn remove_requires_valid_bearer() -> Result<()> {
        let service = service().await?;
        let session = service.create(login("correct")).await?;

        assert!(matches!(
            service.remove(None).await,
            Err(AuthError::Authorization(_))
        ));
        assert!(matches!(
            service.remove(Some("not-a-token".to_string())).await,
            Err(AuthError::Authorization(_))
        ));

        // Nothing was revoked by the failed attempts.
        service
            .create(AuthRequest::new("jwt").with_bearer(Some(session.access_token)))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn after_remove_hooks_shape_the_result() -> Result<()> {
        let mut service = service().await?;
        service.pipeline = service
            .pipeline
            .clone()
            .after(Method::Remove, Arc::new(AttachPrincipal))
            .after(Method::Remove, Arc::new(StripSecrets));
        let session = service.create(login("correct")).await?;

        let removed = service.remove(Some(session.access_token.clone())).await?;
        assert_eq!(removed.access_token, session.access_token);
        let Some(user) = removed.user else {
            bail!("after-remove hooks did not see the result");
        };
        assert_eq!(user.id, 1);
        assert!(user.password.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn removed_token_no_longer_authenticates() -> Result<()> {
        let service = service().await?;
        let session = service.create(login("correct")).await?;

        let removed = service.remove(Some(session.access_token.clone())).await?;
        assert_eq!(removed.access_token, session.access_token);

        let result = service
            .create(AuthRequest::new("jwt").with_bearer(Some(session.access_token.clone())))
            .await;
        assert!(matches!(result, Err(AuthError::Verification(_))));

        assert!(matches!(
            service.remove(Some(session.access_token)).await,
            Err(AuthError::Authorization(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn require_verified_rejects_unverified_users() -> Result<()> {
        let users = Arc::new(MemoryUserStore::new());
        users
            .create(NewUser {
                email: Some("a@b.com".to_string()),
                password_hash: Some(hash_password("correct")?),
                ..NewUser::default()
            })
            .await?;
        let config = AuthConfig::new(SecretString::from("secret")).with_require_verified(true);
        let service = AuthenticationService::from_config(config, users)?;

        assert!(matches!(
            service.create(login("correct")).await,
            Err(AuthError::NotVerified)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn allowed_provider_without_credentials_fails_startup() {
        let config = AuthConfig::new(SecretString::from("secret"))
            .with_strategies(vec![StrategyName::Local, StrategyName::Google]);
        let result = AuthenticationService::from_config(config, Arc::new(MemoryUserStore::new()));

        match result {
            Err(err) => assert!(err.to_string().contains("google")),
            Ok(_) => panic!("startup should fail without google credentials"),
        }
    }

    #[tokio::test]
    async fn callback_rejects_unknown_state() -> Result<()> {
        let github = OAuthProviderConfig::new(
            "client".to_string(),
            SecretString::from("client-secret"),
            "http://localhost:3030/auth/github/callback".to_string(),
        );
        let config = AuthConfig::new(SecretString::from("secret"))
            .with_strategies(vec![StrategyName::Local, StrategyName::Github])
            .with_provider(Provider::Github, github);
        let service =
            AuthenticationService::from_config(config, Arc::new(MemoryUserStore::new()))?;

        let url = service.authorization_url(Provider::Github).await?;
        let Some(state) = url
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
        else {
            bail!("authorization URL has no state");
        };
        assert!(!state.is_empty());

        assert!(matches!(
            service.callback(Provider::Github, "code", "forged").await,
            Err(AuthError::Verification(message)) if message == "Invalid OAuth state"
        ));
        assert!(matches!(
            service.authorization_url(Provider::Google).await,
            Err(AuthError::UnknownStrategy(_))
        ));
        Ok(())
    }
}
