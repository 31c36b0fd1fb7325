//! Postgres-backed user store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    Connection, PgPool, Row,
};
use std::time::Duration;
use tracing::{debug, instrument};

use super::{
    normalize_email, CreateOutcome, LoginField, NewUser, ProviderIdentity, User, UserStore,
};
use crate::auth::Provider;

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const USER_COLUMNS: &str =
    "id, email, username, password, is_verified, google_id, facebook_id, github_id, profile";

#[derive(Clone, Debug)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the `users` table exists.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable or the schema cannot be applied.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;

        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("Failed to apply users schema")?;

        debug!("users schema applied");

        Ok(Self::new(pool))
    }
}

const fn login_column(field: LoginField) -> &'static str {
    match field {
        LoginField::Email => "email",
        LoginField::Username => "username",
    }
}

const fn provider_column(provider: Provider) -> &'static str {
    match provider {
        Provider::Google => "google_id",
        Provider::Facebook => "facebook_id",
        Provider::Github => "github_id",
    }
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        password: row.try_get("password")?,
        is_verified: row.try_get("is_verified")?,
        google_id: row.try_get("google_id")?,
        facebook_id: row.try_get("facebook_id")?,
        github_id: row.try_get("github_id")?,
        profile: row.try_get("profile")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by id")?;

        row.as_ref()
            .map(user_from_row)
            .transpose()
            .context("Failed to decode user row")
    }

    #[instrument(skip(self, value))]
    async fn find_by_login(&self, field: LoginField, value: &str) -> Result<Option<User>> {
        let value = match field {
            LoginField::Email => normalize_email(value),
            LoginField::Username => value.trim().to_string(),
        };
        let column = login_column(field);
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {column} = $1"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by login")?;

        row.as_ref()
            .map(user_from_row)
            .transpose()
            .context("Failed to decode user row")
    }

    #[instrument(skip(self))]
    async fn find_by_provider(
        &self,
        provider: Provider,
        provider_id: &str,
    ) -> Result<Option<User>> {
        let column = provider_column(provider);
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {column} = $1"
        ))
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by provider id")?;

        row.as_ref()
            .map(user_from_row)
            .transpose()
            .context("Failed to decode user row")
    }

    #[instrument(skip(self))]
    async fn create(&self, user: NewUser) -> Result<CreateOutcome> {
        let email = user.email.as_deref().map(normalize_email);
        let username = user.username.as_deref().map(|u| u.trim().to_string());
        let (google_id, facebook_id, github_id, profile) = match user.identity {
            Some(identity) => {
                let mut ids = (None, None, None);
                match identity.provider {
                    Provider::Google => ids.0 = Some(identity.id),
                    Provider::Facebook => ids.1 = Some(identity.id),
                    Provider::Github => ids.2 = Some(identity.id),
                }
                (ids.0, ids.1, ids.2, Some(identity.profile))
            }
            None => (None, None, None, None),
        };

        let result = sqlx::query(&format!(
            r"
            INSERT INTO users
            (email, username, password, is_verified, google_id, facebook_id, github_id, profile)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "
        ))
        .bind(email)
        .bind(username)
        .bind(user.password_hash)
        .bind(user.is_verified)
        .bind(google_id)
        .bind(facebook_id)
        .bind(github_id)
        .bind(profile)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(CreateOutcome::Created(
                user_from_row(&row).context("Failed to decode user row")?,
            )),
            Err(err) if is_unique_violation(&err) => Ok(CreateOutcome::Conflict),
            Err(err) => Err(err).context("Failed to insert user"),
        }
    }

    #[instrument(skip(self, identity), fields(provider = %identity.provider))]
    async fn link_provider(&self, id: i64, identity: &ProviderIdentity) -> Result<Option<User>> {
        let column = provider_column(identity.provider);
        let row = sqlx::query(&format!(
            r"
            UPDATE users
            SET {column} = $2, profile = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "
        ))
        .bind(id)
        .bind(&identity.id)
        .bind(&identity.profile)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to link provider identity")?;

        row.as_ref()
            .map(user_from_row)
            .transpose()
            .context("Failed to decode user row")
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire database connection")?;
        conn.ping().await.context("Failed to ping database")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_columns_are_distinct() {
        assert_eq!(provider_column(Provider::Google), "google_id");
        assert_eq!(provider_column(Provider::Facebook), "facebook_id");
        assert_eq!(provider_column(Provider::Github), "github_id");
    }

    #[test]
    fn login_columns_follow_field() {
        assert_eq!(login_column(LoginField::Email), "email");
        assert_eq!(login_column(LoginField::Username), "username");
    }

    #[test]
    fn schema_defines_users_table() {
        assert!(SCHEMA_SQL.contains("CREATE TABLE IF NOT EXISTS users"));
        for column in USER_COLUMNS.split(", ") {
            assert!(SCHEMA_SQL.contains(column), "schema is missing {column}");
        }
    }
}
