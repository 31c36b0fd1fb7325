use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

use crate::{
    auth::{parse_strategy_list, StrategyName},
    users::LoginField,
};

pub const ARG_AUTH_SECRET: &str = "auth-secret";
pub const ARG_AUTH_STRATEGIES: &str = "auth-strategies";
pub const ARG_JWT_ISSUER: &str = "jwt-issuer";
pub const ARG_JWT_AUDIENCE: &str = "jwt-audience";
pub const ARG_JWT_SUBJECT: &str = "jwt-subject";
pub const ARG_JWT_EXPIRES_IN_SECONDS: &str = "jwt-expires-in-seconds";
pub const ARG_LOCAL_USERNAME_FIELD: &str = "local-username-field";
pub const ARG_LOCAL_PASSWORD_FIELD: &str = "local-password-field";
pub const ARG_REQUIRE_VERIFIED: &str = "require-verified";
pub const ARG_OAUTH_STATE_TTL_SECONDS: &str = "oauth-state-ttl-seconds";

pub struct Options {
    pub secret: SecretString,
    pub strategies: Vec<StrategyName>,
    pub issuer: String,
    pub audience: String,
    pub subject: String,
    pub expires_in_seconds: u64,
    pub username_field: LoginField,
    pub password_field: String,
    pub require_verified: bool,
    pub oauth_state_ttl_seconds: u64,
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("strategies", &self.strategies)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("subject", &self.subject)
            .field("expires_in_seconds", &self.expires_in_seconds)
            .field("username_field", &self.username_field)
            .field("password_field", &self.password_field)
            .field("require_verified", &self.require_verified)
            .field("oauth_state_ttl_seconds", &self.oauth_state_ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl Options {
    /// Parse auth arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the secret is missing or the strategy list or
    /// username field is invalid.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let secret = matches
            .get_one::<String>(ARG_AUTH_SECRET)
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .ok_or_else(|| anyhow!("missing required argument: --{ARG_AUTH_SECRET}"))?;

        let strategies = matches
            .get_one::<String>(ARG_AUTH_STRATEGIES)
            .map_or("local,jwt", String::as_str);
        let strategies = parse_strategy_list(strategies)
            .with_context(|| format!("invalid --{ARG_AUTH_STRATEGIES}"))?;

        let username_field = matches
            .get_one::<String>(ARG_LOCAL_USERNAME_FIELD)
            .map_or(Ok(LoginField::Email), |v| v.parse::<LoginField>())
            .map_err(|e| anyhow!(e))?;

        let string = |id: &str, default: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            secret: SecretString::from(secret),
            strategies,
            issuer: string(ARG_JWT_ISSUER, "turnstile"),
            audience: string(ARG_JWT_AUDIENCE, "https://yourdomain.com"),
            subject: string(ARG_JWT_SUBJECT, "anonymous"),
            expires_in_seconds: matches
                .get_one::<u64>(ARG_JWT_EXPIRES_IN_SECONDS)
                .copied()
                .unwrap_or(86_400),
            username_field,
            password_field: string(ARG_LOCAL_PASSWORD_FIELD, "password"),
            require_verified: matches.get_flag(ARG_REQUIRE_VERIFIED),
            oauth_state_ttl_seconds: matches
                .get_one::<u64>(ARG_OAUTH_STATE_TTL_SECONDS)
                .copied()
                .unwrap_or(300),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    let command = with_jwt_args(command);
    with_local_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_AUTH_SECRET)
                .long(ARG_AUTH_SECRET)
                .help("Secret used to sign access tokens")
                .env("TURNSTILE_AUTH_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_AUTH_STRATEGIES)
                .long(ARG_AUTH_STRATEGIES)
                .help("Comma separated strategies allowed to create a session")
                .long_help(
                    "Comma separated strategies allowed to create a session.\n\nKnown strategies: local, jwt, google, facebook, github. OAuth providers also need their client credentials.",
                )
                .env("TURNSTILE_AUTH_STRATEGIES")
                .default_value("local,jwt"),
        )
        .arg(
            Arg::new(ARG_REQUIRE_VERIFIED)
                .long(ARG_REQUIRE_VERIFIED)
                .help("Reject session creation for users whose email is not verified")
                .env("TURNSTILE_REQUIRE_VERIFIED")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_OAUTH_STATE_TTL_SECONDS)
                .long(ARG_OAUTH_STATE_TTL_SECONDS)
                .help("Lifetime of the OAuth state parameter in seconds")
                .env("TURNSTILE_OAUTH_STATE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_jwt_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_ISSUER)
                .long(ARG_JWT_ISSUER)
                .help("Access token issuer (iss)")
                .env("TURNSTILE_JWT_ISSUER")
                .default_value("turnstile"),
        )
        .arg(
            Arg::new(ARG_JWT_AUDIENCE)
                .long(ARG_JWT_AUDIENCE)
                .help("Access token audience (aud)")
                .env("TURNSTILE_JWT_AUDIENCE")
                .default_value("https://yourdomain.com"),
        )
        .arg(
            Arg::new(ARG_JWT_SUBJECT)
                .long(ARG_JWT_SUBJECT)
                .help("Access token subject (sub)")
                .env("TURNSTILE_JWT_SUBJECT")
                .default_value("anonymous"),
        )
        .arg(
            Arg::new(ARG_JWT_EXPIRES_IN_SECONDS)
                .long(ARG_JWT_EXPIRES_IN_SECONDS)
                .help("Access token TTL in seconds")
                .env("TURNSTILE_JWT_EXPIRES_IN_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_local_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOCAL_USERNAME_FIELD)
                .long(ARG_LOCAL_USERNAME_FIELD)
                .help("User field matched by the local strategy: email or username")
                .env("TURNSTILE_LOCAL_USERNAME_FIELD")
                .default_value("email")
                .value_parser(["email", "username"]),
        )
        .arg(
            Arg::new(ARG_LOCAL_PASSWORD_FIELD)
                .long(ARG_LOCAL_PASSWORD_FIELD)
                .help("Request field holding the password for the local strategy")
                .env("TURNSTILE_LOCAL_PASSWORD_FIELD")
                .default_value("password"),
        )
}
