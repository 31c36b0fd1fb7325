//! Process-local user store.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    normalize_email, CreateOutcome, LoginField, NewUser, ProviderIdentity, User, UserStore,
};
use crate::auth::Provider;

#[derive(Debug, Default)]
struct Inner {
    users: Vec<User>,
    next_id: i64,
}

/// Keeps users in memory; ids start at 1. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn lookup_value(field: LoginField, value: &str) -> String {
    match field {
        LoginField::Email => normalize_email(value),
        LoginField::Username => value.trim().to_string(),
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner.users.iter().find(|user| user.id == id).cloned())
    }

    async fn find_by_login(&self, field: LoginField, value: &str) -> Result<Option<User>> {
        let wanted = lookup_value(field, value);
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .iter()
            .find(|user| user.login_value(field) == Some(wanted.as_str()))
            .cloned())
    }

    async fn find_by_provider(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .iter()
            .find(|user| user.provider_id(provider) == Some(provider_id))
            .cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<CreateOutcome> {
        let email = new_user.email.as_deref().map(normalize_email);
        let username = new_user.username.as_deref().map(|u| u.trim().to_string());

        let mut inner = self.inner.write().await;

        let taken = inner.users.iter().any(|user| {
            (email.is_some() && user.email == email)
                || (username.is_some() && user.username == username)
                || new_user.identity.as_ref().is_some_and(|identity| {
                    user.provider_id(identity.provider) == Some(identity.id.as_str())
                })
        });
        if taken {
            return Ok(CreateOutcome::Conflict);
        }

        inner.next_id += 1;
        let mut user = User {
            id: inner.next_id,
            email,
            username,
            password: new_user.password_hash,
            is_verified: new_user.is_verified,
            google_id: None,
            facebook_id: None,
            github_id: None,
            profile: None,
        };
        if let Some(identity) = new_user.identity {
            user.set_provider_id(identity.provider, identity.id);
            user.profile = Some(identity.profile);
        }

        inner.users.push(user.clone());
        Ok(CreateOutcome::Created(user))
    }

    async fn link_provider(&self, id: i64, identity: &ProviderIdentity) -> Result<Option<User>> {
        let mut inner = self.inner.write().await;
        let Some(user) = inner.users.iter_mut().find(|user| user.id == id) else {
            return Ok(None);
        };
        user.set_provider_id(identity.provider, identity.id.clone());
        user.profile = Some(identity.profile.clone());
        Ok(Some(user.clone()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
