use crate::{
    api,
    auth::{AuthConfig, AuthenticationService, LocalConfig, OAuthProviderConfig, Provider},
    cli::commands::auth::Options,
    users::{MemoryUserStore, PgUserStore, UserStore},
};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub frontend_base_url: Option<String>,
    pub auth: Options,
    pub providers: Vec<(Provider, OAuthProviderConfig)>,
}

impl Args {
    /// Build the immutable authentication configuration.
    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        let auth = &self.auth;

        self.providers.iter().fold(
            AuthConfig::new(auth.secret.clone())
                .with_strategies(auth.strategies.clone())
                .with_issuer(auth.issuer.clone())
                .with_audience(auth.audience.clone())
                .with_subject(auth.subject.clone())
                .with_expires_in_seconds(auth.expires_in_seconds)
                .with_local(LocalConfig::new(
                    auth.username_field,
                    auth.password_field.clone(),
                ))
                .with_require_verified(auth.require_verified)
                .with_oauth_state_ttl_seconds(auth.oauth_state_ttl_seconds),
            |config, (provider, provider_config)| {
                config.with_provider(*provider, provider_config.clone())
            },
        )
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the user store, the authentication service or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let users: Arc<dyn UserStore> = if let Some(dsn) = &args.dsn {
        Arc::new(PgUserStore::connect(dsn).await?)
    } else {
        warn!("No DSN configured, users are kept in memory");
        Arc::new(MemoryUserStore::new())
    };

    let config = args.auth_config();

    debug!("auth config: {:?}", config);

    let service = Arc::new(AuthenticationService::from_config(config, users.clone())?);

    api::new(args.port, args.frontend_base_url, users, service).await
}
