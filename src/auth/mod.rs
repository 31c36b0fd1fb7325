//! Credential strategies and the hook pipeline that turns verified
//! credentials into signed sessions.

mod config;
mod error;
mod jwt;
mod local;
mod oauth;
pub mod password;
mod pipeline;
mod service;
mod strategy;

pub use config::{AuthConfig, LocalConfig, OAuthProviderConfig};
pub use error::{AuthError, ErrorBody};
pub use jwt::{Claims, JwtStrategy, TokenService};
pub use local::LocalStrategy;
pub use oauth::{OAuthStates, OAuthStrategy, ProviderEndpoints, ProviderProfile};
pub use pipeline::{
    AttachPrincipal, AuthResult, Authenticate, Hook, HookContext, IsVerified, Method, Params,
    Pipeline, RequirePrincipal, StripSecrets,
};
pub use service::AuthenticationService;
pub use strategy::{
    parse_strategy_list, AuthRequest, Provider, Strategies, Strategy, StrategyName, Verification,
};
