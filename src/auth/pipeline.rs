//! Ordered hook chains around session create and remove.
//!
//! Before-hooks run ahead of the service method, after-hooks on its result.
//! The first failing hook stops its chain and its error is returned as is.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::debug;
use utoipa::ToSchema;

use super::{jwt::Claims, AuthError, AuthRequest, StrategyName, Strategies};
use crate::users::User;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Create,
    Remove,
}

/// Values hooks attach for the steps after them.
#[derive(Clone, Debug, Default)]
pub struct Params {
    pub strategy: Option<StrategyName>,
    pub user: Option<User>,
    pub payload: Option<Claims>,
}

/// Session payload returned to the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

#[derive(Debug)]
pub struct HookContext {
    pub method: Method,
    pub request: AuthRequest,
    pub params: Params,
    pub result: Option<AuthResult>,
}

impl HookContext {
    #[must_use]
    pub fn new(method: Method, request: AuthRequest) -> Self {
        Self {
            method,
            request,
            params: Params::default(),
            result: None,
        }
    }
}

#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, context: &mut HookContext) -> Result<(), AuthError>;
}

enum Gate {
    /// Strategy named by the request, restricted to an allow-list.
    Session(Vec<StrategyName>),
    /// `jwt` over the bearer token only.
    Bearer,
}

/// Verifies the request and records the principal in `params`.
pub struct Authenticate {
    gate: Gate,
    strategies: Arc<Strategies>,
}

impl Authenticate {
    #[must_use]
    pub fn session(allowed: Vec<StrategyName>, strategies: Arc<Strategies>) -> Self {
        Self {
            gate: Gate::Session(allowed),
            strategies,
        }
    }

    #[must_use]
    pub fn bearer(strategies: Arc<Strategies>) -> Self {
        Self {
            gate: Gate::Bearer,
            strategies,
        }
    }

    fn select(&self, request: &AuthRequest) -> Result<StrategyName, AuthError> {
        match &self.gate {
            Gate::Session(allowed) => {
                let name = request.strategy_name()?;
                if allowed.contains(&name) {
                    Ok(name)
                } else {
                    Err(AuthError::StrategyNotAllowed(name))
                }
            }
            Gate::Bearer => {
                if request.bearer().is_none() {
                    return Err(AuthError::Authorization("No auth token".to_string()));
                }
                Ok(StrategyName::Jwt)
            }
        }
    }
}

#[async_trait]
impl Hook for Authenticate {
    fn name(&self) -> &'static str {
        match self.gate {
            Gate::Session(_) => "authenticate",
            Gate::Bearer => "authenticate-bearer",
        }
    }

    async fn run(&self, context: &mut HookContext) -> Result<(), AuthError> {
        let name = self.select(&context.request)?;

        let strategy = self.strategies.get(name).ok_or_else(|| {
            AuthError::Internal(anyhow::anyhow!("strategy '{name}' is not registered"))
        })?;

        let verification = match strategy.verify(&context.request).await {
            Ok(verification) => verification,
            Err(AuthError::Verification(message)) if matches!(self.gate, Gate::Bearer) => {
                return Err(AuthError::Authorization(message));
            }
            Err(err) => return Err(err),
        };

        context.params.strategy = Some(name);
        context.params.user = verification.user;
        context.params.payload = verification.payload;
        Ok(())
    }
}

/// Rejects principals whose email has not been verified.
pub struct IsVerified;

#[async_trait]
impl Hook for IsVerified {
    fn name(&self) -> &'static str {
        "is-verified"
    }

    async fn run(&self, context: &mut HookContext) -> Result<(), AuthError> {
        match &context.params.user {
            Some(user) if !user.is_verified => Err(AuthError::NotVerified),
            _ => Ok(()),
        }
    }
}

/// Fails the request when verification resolved no principal.
pub struct RequirePrincipal;

#[async_trait]
impl Hook for RequirePrincipal {
    fn name(&self) -> &'static str {
        "require-principal"
    }

    async fn run(&self, context: &mut HookContext) -> Result<(), AuthError> {
        if context.params.user.is_none() {
            return Err(AuthError::Permission);
        }
        Ok(())
    }
}

/// Copies the principal onto the result.
pub struct AttachPrincipal;

#[async_trait]
impl Hook for AttachPrincipal {
    fn name(&self) -> &'static str {
        "attach-principal"
    }

    async fn run(&self, context: &mut HookContext) -> Result<(), AuthError> {
        if let Some(result) = context.result.as_mut() {
            result.user.clone_from(&context.params.user);
        }
        Ok(())
    }
}

/// Removes the password hash from the attached user.
pub struct StripSecrets;

#[async_trait]
impl Hook for StripSecrets {
    fn name(&self) -> &'static str {
        "strip-secrets"
    }

    async fn run(&self, context: &mut HookContext) -> Result<(), AuthError> {
        if let Some(user) = context.result.as_mut().and_then(|r| r.user.as_mut()) {
            user.strip_secrets();
        }
        Ok(())
    }
}

type Chain = Vec<Arc<dyn Hook>>;

#[derive(Clone, Default)]
pub struct Pipeline {
    before_create: Chain,
    after_create: Chain,
    before_remove: Chain,
    after_remove: Chain,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn before(mut self, method: Method, hook: Arc<dyn Hook>) -> Self {
        match method {
            Method::Create => self.before_create.push(hook),
            Method::Remove => self.before_remove.push(hook),
        }
        self
    }

    #[must_use]
    pub fn after(mut self, method: Method, hook: Arc<dyn Hook>) -> Self {
        match method {
            Method::Create => self.after_create.push(hook),
            Method::Remove => self.after_remove.push(hook),
        }
        self
    }

    /// # Errors
    /// Returns the first hook failure.
    pub async fn run_before(&self, context: &mut HookContext) -> Result<(), AuthError> {
        let chain = match context.method {
            Method::Create => &self.before_create,
            Method::Remove => &self.before_remove,
        };
        Self::run_chain(chain, context).await
    }

    /// # Errors
    /// Returns the first hook failure.
    pub async fn run_after(&self, context: &mut HookContext) -> Result<(), AuthError> {
        let chain = match context.method {
            Method::Create => &self.after_create,
            Method::Remove => &self.after_remove,
        };
        Self::run_chain(chain, context).await
    }

    async fn run_chain(chain: &Chain, context: &mut HookContext) -> Result<(), AuthError> {
        for hook in chain {
            debug!("{:?} hook {}", context.method, hook.name());
            hook.run(context).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |chain: &Chain| chain.iter().map(|hook| hook.name()).collect::<Vec<_>>();
        f.debug_struct("Pipeline")
            .field("before_create", &names(&self.before_create))
            .field("after_create", &names(&self.after_create))
            .field("before_remove", &names(&self.before_remove))
            .field("after_remove", &names(&self.after_remove))
            .finish()
    }
}
