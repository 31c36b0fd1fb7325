//! Access token signing/verification and the `jwt` strategy.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{AuthConfig, AuthError, AuthRequest, Strategy, StrategyName, Verification};
use crate::users::UserStore;

const TOKEN_TYPE: &str = "access";
const ACCESS_TOKEN_FIELD: &str = "accessToken";

/// Access token claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Signs access tokens and tracks revoked ones until they expire.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    subject: String,
    expires_in: Duration,
    revoked: Mutex<HashMap<String, i64>>,
}

impl TokenService {
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.secret().expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: config.issuer().to_string(),
            audience: config.audience().to_string(),
            subject: config.subject().to_string(),
            expires_in: config.expires_in(),
            revoked: Mutex::new(HashMap::new()),
        }
    }

    fn header() -> Header {
        Header {
            typ: Some(TOKEN_TYPE.to_string()),
            ..Header::new(Algorithm::HS256)
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation
    }

    fn claims(&self, user_id: Option<i64>) -> Result<Claims, AuthError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.expires_in)
            .context("token lifetime out of range")?;
        Ok(Claims {
            user_id,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: self.subject.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        })
    }

    /// Sign a new access token.
    ///
    /// # Errors
    /// Returns `Internal` if encoding fails.
    pub fn sign(&self, user_id: Option<i64>) -> Result<String, AuthError> {
        let claims = self.claims(user_id)?;
        encode(&Self::header(), &claims, &self.encoding_key)
            .context("Failed to encode access token")
            .map_err(AuthError::from)
    }

    /// Decode and validate an access token, rejecting revoked ones.
    ///
    /// # Errors
    /// Returns `Verification` for invalid, expired or revoked tokens.
    pub async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation()).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Verification("jwt expired".to_string()),
                _ => {
                    debug!("rejected access token: {err}");
                    AuthError::Verification("invalid token".to_string())
                }
            },
        )?;

        if self.is_revoked(&data.claims.jti).await {
            return Err(AuthError::Verification("token revoked".to_string()));
        }

        Ok(data.claims)
    }

    /// Keep `claims.jti` on the revocation list until the token expires.
    pub async fn revoke(&self, claims: &Claims) {
        let now = Utc::now().timestamp();
        let mut revoked = self.revoked.lock().await;
        revoked.retain(|_, exp| *exp >= now);
        revoked.insert(claims.jti.clone(), claims.exp);
    }

    pub async fn is_revoked(&self, jti: &str) -> bool {
        self.revoked.lock().await.contains_key(jti)
    }
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Verifies bearer tokens and resolves their `userId` claim.
pub struct JwtStrategy {
    tokens: Arc<TokenService>,
    users: Arc<dyn UserStore>,
}

impl JwtStrategy {
    #[must_use]
    pub fn new(tokens: Arc<TokenService>, users: Arc<dyn UserStore>) -> Self {
        Self { tokens, users }
    }
}

#[async_trait]
impl Strategy for JwtStrategy {
    fn name(&self) -> StrategyName {
        StrategyName::Jwt
    }

    #[instrument(skip(self, request))]
    async fn verify(&self, request: &AuthRequest) -> Result<Verification, AuthError> {
        let token = request
            .field_str(ACCESS_TOKEN_FIELD)
            .or_else(|| request.bearer())
            .ok_or_else(|| AuthError::Verification("No auth token".to_string()))?;

        let claims = self.tokens.verify(token).await?;

        // A token whose user is gone verifies without a principal.
        let user = match claims.user_id {
            Some(id) => self
                .users
                .find_by_id(id)
                .await
                .context("Failed to load token user")?,
            None => None,
        };

        Ok(Verification {
            user,
            payload: Some(claims),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{CreateOutcome, MemoryUserStore, NewUser};
    use anyhow::{bail, Result};
    use secrecy::SecretString;

    fn service() -> TokenService {
        TokenService::new(&AuthConfig::new(SecretString::from("test-secret")))
    }

    #[tokio::test]
    async fn signed_token_verifies_with_claims() -> Result<()> {
        let tokens = service();
        let token = tokens.sign(Some(1))?;
        let claims = tokens.verify(&token).await?;

        assert_eq!(claims.user_id, Some(1));
        assert_eq!(claims.iss, "turnstile");
        assert_eq!(claims.aud, "https://yourdomain.com");
        assert_eq!(claims.sub, "anonymous");
        assert_eq!(claims.exp - claims.iat, 86_400);
        Ok(())
    }

    #[tokio::test]
    async fn header_type_is_access() -> Result<()> {
        let token = service().sign(None)?;
        let header = jsonwebtoken::decode_header(&token)?;
        assert_eq!(header.typ.as_deref(), Some("access"));
        assert_eq!(header.alg, Algorithm::HS256);
        Ok(())
    }

    #[tokio::test]
    async fn token_from_other_secret_is_rejected() -> Result<()> {
        let other = TokenService::new(&AuthConfig::new(SecretString::from("other")));
        let token = other.sign(Some(1))?;
        assert!(matches!(
            service().verify(&token).await,
            Err(AuthError::Verification(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_audience_is_rejected() -> Result<()> {
        let other = TokenService::new(
            &AuthConfig::new(SecretString::from("test-secret"))
                .with_audience("https://elsewhere".to_string()),
        );
        let token = other.sign(Some(1))?;
        assert!(service().verify(&token).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_is_rejected() -> Result<()> {
        let tokens = service();
        let mut claims = tokens.claims(Some(1))?;
        claims.iat -= 7_200;
        claims.exp = claims.iat + 60;
        let token = encode(&TokenService::header(), &claims, &tokens.encoding_key)?;

        match tokens.verify(&token).await {
            Err(AuthError::Verification(message)) => assert_eq!(message, "jwt expired"),
            other => bail!("expected expiry rejection, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn revoked_token_is_rejected() -> Result<()> {
        let tokens = service();
        let token = tokens.sign(Some(1))?;
        let claims = tokens.verify(&token).await?;

        tokens.revoke(&claims).await;

        assert!(tokens.is_revoked(&claims.jti).await);
        assert!(matches!(
            tokens.verify(&token).await,
            Err(AuthError::Verification(message)) if message == "token revoked"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn strategy_resolves_user_from_bearer() -> Result<()> {
        let store = Arc::new(MemoryUserStore::new());
        let CreateOutcome::Created(user) = store
            .create(NewUser {
                email: Some("a@b.com".to_string()),
                ..NewUser::default()
            })
            .await?
        else {
            bail!("user was not created");
        };

        let tokens = Arc::new(service());
        let token = tokens.sign(Some(user.id))?;
        let strategy = JwtStrategy::new(tokens, store);

        let verification = strategy
            .verify(&AuthRequest::new("jwt").with_bearer(Some(token)))
            .await?;
        assert_eq!(verification.user.map(|u| u.id), Some(user.id));
        assert_eq!(
            verification.payload.and_then(|claims| claims.user_id),
            Some(user.id)
        );
        Ok(())
    }

    #[tokio::test]
    async fn strategy_without_token_rejects() {
        let strategy = JwtStrategy::new(Arc::new(service()), Arc::new(MemoryUserStore::new()));
        assert!(matches!(
            strategy.verify(&AuthRequest::new("jwt")).await,
            Err(AuthError::Verification(message)) if message == "No auth token"
        ));
    }

    #[tokio::test]
    async fn strategy_with_unknown_user_has_no_principal() -> Result<()> {
        let tokens = Arc::new(service());
        let token = tokens.sign(Some(404))?;
        let strategy = JwtStrategy::new(tokens, Arc::new(MemoryUserStore::new()));

        let verification = strategy
            .verify(&AuthRequest::new("jwt").with_field("accessToken", token))
            .await?;
        assert!(verification.user.is_none());
        assert!(verification.payload.is_some());
        Ok(())
    }
}
