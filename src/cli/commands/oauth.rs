use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::auth::{OAuthProviderConfig, Provider};

struct ProviderArgs {
    provider: Provider,
    client_id: &'static str,
    client_id_env: &'static str,
    client_secret: &'static str,
    client_secret_env: &'static str,
    callback_url: &'static str,
    callback_url_env: &'static str,
}

const PROVIDER_ARGS: [ProviderArgs; 3] = [
    ProviderArgs {
        provider: Provider::Google,
        client_id: "google-client-id",
        client_id_env: "TURNSTILE_GOOGLE_CLIENT_ID",
        client_secret: "google-client-secret",
        client_secret_env: "TURNSTILE_GOOGLE_CLIENT_SECRET",
        callback_url: "google-callback-url",
        callback_url_env: "TURNSTILE_GOOGLE_CALLBACK_URL",
    },
    ProviderArgs {
        provider: Provider::Facebook,
        client_id: "facebook-client-id",
        client_id_env: "TURNSTILE_FACEBOOK_CLIENT_ID",
        client_secret: "facebook-client-secret",
        client_secret_env: "TURNSTILE_FACEBOOK_CLIENT_SECRET",
        callback_url: "facebook-callback-url",
        callback_url_env: "TURNSTILE_FACEBOOK_CALLBACK_URL",
    },
    ProviderArgs {
        provider: Provider::Github,
        client_id: "github-client-id",
        client_id_env: "TURNSTILE_GITHUB_CLIENT_ID",
        client_secret: "github-client-secret",
        client_secret_env: "TURNSTILE_GITHUB_CLIENT_SECRET",
        callback_url: "github-callback-url",
        callback_url_env: "TURNSTILE_GITHUB_CALLBACK_URL",
    },
];

/// Collect the providers that have a client id configured.
///
/// # Errors
/// Returns an error if a provider has a client id without a secret or callback URL.
pub fn parse(matches: &ArgMatches) -> Result<Vec<(Provider, OAuthProviderConfig)>> {
    // env vars set to "" still reach clap as values
    let get_non_empty = |id: &str| {
        matches
            .get_one::<String>(id)
            .cloned()
            .filter(|v| !v.trim().is_empty())
    };

    let mut providers = Vec::new();

    for args in &PROVIDER_ARGS {
        let Some(client_id) = get_non_empty(args.client_id) else {
            continue;
        };

        let secret = get_non_empty(args.client_secret)
            .ok_or_else(|| anyhow!("missing required argument: --{}", args.client_secret))?;
        let callback_url = get_non_empty(args.callback_url)
            .ok_or_else(|| anyhow!("missing required argument: --{}", args.callback_url))?;

        providers.push((
            args.provider,
            OAuthProviderConfig::new(client_id, SecretString::from(secret), callback_url),
        ));
    }

    Ok(providers)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    PROVIDER_ARGS.iter().fold(command, |command, args| {
        command
            .arg(
                Arg::new(args.client_id)
                    .long(args.client_id)
                    .help(format!("{} OAuth2 client id", args.provider))
                    .env(args.client_id_env)
                    .requires_all([args.client_secret, args.callback_url]),
            )
            .arg(
                Arg::new(args.client_secret)
                    .long(args.client_secret)
                    .help(format!("{} OAuth2 client secret", args.provider))
                    .env(args.client_secret_env)
                    .hide_env_values(true),
            )
            .arg(
                Arg::new(args.callback_url)
                    .long(args.callback_url)
                    .help(format!(
                        "{} OAuth2 redirect URL, example: https://turnstile.tld/auth/{}/callback",
                        args.provider, args.provider
                    ))
                    .env(args.callback_url_env),
            )
    })
}
