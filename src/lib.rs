//! # Turnstile (session authentication service)
//!
//! `turnstile` issues and revokes signed session tokens. A caller creates a
//! session by naming a credential strategy and presenting credentials for it;
//! the service runs an ordered hook pipeline that picks the strategy, verifies
//! the credentials, and shapes the response.
//!
//! ## Strategies
//!
//! - **`local`**: username/password checked against an argon2 hash.
//! - **`jwt`**: a previously issued bearer token.
//! - **`google`**, **`facebook`**, **`github`**: OAuth2 authorization codes
//!   exchanged with the provider, linked to a local user record.
//!
//! Only strategies listed in the configured allow-list may create a session.
//! Unknown strategy names are rejected before any strategy code runs.
//!
//! ## Session shape
//!
//! A successful create returns `{ "accessToken": "...", "user": { ... } }`.
//! The user's password hash is always stripped from the response. A strategy
//! that reports success without resolving a user is rejected with
//! `403 Credentials incorrect`.
//!
//! ## Revocation
//!
//! Removing a session requires the token itself as a bearer credential. Removed
//! tokens are kept in a revocation list until they expire.

pub mod api;
pub mod auth;
pub mod cli;
pub mod users;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
