use crate::{
    api::handlers::valid_email,
    auth::password::hash_password,
    users::{CreateOutcome, NewUser, User, UserStore},
};
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use std::{fmt, sync::Arc};
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize)]
pub struct UserRegister {
    email: String,
    username: Option<String>,
    password: String,
}

impl fmt::Debug for UserRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRegister")
            .field("email", &self.email)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[utoipa::path(
    post,
    path= "/users",
    request_body = UserRegister,
    responses (
        (status = 201, description = "Registration successful", body = User, content_type = "application/json"),
        (status = 400, description = "Invalid email or empty password"),
        (status = 409, description = "User with the specified email or username already exists"),
    ),
    tag= "users"
)]
#[instrument(skip(users, payload))]
pub async fn register(
    users: Extension<Arc<dyn UserStore>>,
    payload: Option<Json<UserRegister>>,
) -> Response {
    let user: UserRegister = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    debug!("user: {:?}", user);

    let email = user.email.trim().to_lowercase();
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }

    if user.password.is_empty() {
        return (StatusCode::BAD_REQUEST, "Invalid password".to_string()).into_response();
    }

    let password_hash = match hash_password(&user.password) {
        Ok(hash) => hash,
        Err(e) => {
            error!("Error hashing password: {e:#}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error creating user".to_string(),
            )
                .into_response();
        }
    };

    let new_user = NewUser {
        email: Some(email),
        username: user.username.filter(|u| !u.trim().is_empty()),
        password_hash: Some(password_hash),
        ..NewUser::default()
    };

    match users.create(new_user).await {
        Ok(CreateOutcome::Created(mut user)) => {
            info!("registered user {}", user.id);
            user.strip_secrets();
            (StatusCode::CREATED, Json(user)).into_response()
        }
        Ok(CreateOutcome::Conflict) => {
            error!("User already exists");
            (StatusCode::CONFLICT, "User already exists".to_string()).into_response()
        }
        Err(e) => {
            error!("Error creating user: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error creating user".to_string(),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::password::verify_password, users::LoginField};
    use axum::body::to_bytes;
    use serde_json::{json, Value};

    fn store() -> (Arc<dyn UserStore>, Extension<Arc<dyn UserStore>>) {
        let users: Arc<dyn UserStore> = Arc::new(crate::users::MemoryUserStore::new());
        (users.clone(), Extension(users))
    }

    fn payload(value: Value) -> anyhow::Result<Option<Json<UserRegister>>> {
        Ok(Some(Json(serde_json::from_value(value)?)))
    }

    #[tokio::test]
    async fn test_register_hashes_and_strips_password() -> anyhow::Result<()> {
        let (users, extension) = store();

        let response = register(
            extension,
            payload(json!({"email": "A@B.com", "password": "correct"}))?,
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let value: Value = serde_json::from_slice(&bytes)?;
        assert_eq!(value["email"], "a@b.com");
        assert!(value.get("password").is_none());

        let stored = users.find_by_login(LoginField::Email, "a@b.com").await?;
        let hash = stored.and_then(|user| user.password).unwrap_or_default();
        assert!(verify_password("correct", &hash)?);
        Ok(())
    }

    #[tokio::test]
    async fn test_register_duplicate_email() -> anyhow::Result<()> {
        let (_, extension) = store();
        let body = json!({"email": "a@b.com", "password": "correct"});

        let first = register(extension.clone(), payload(body.clone())?).await;
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = register(extension, payload(body)?).await;
        assert_eq!(second.status(), StatusCode::CONFLICT);
        Ok(())
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() -> anyhow::Result<()> {
        let (_, extension) = store();

        let bad_email = register(
            extension.clone(),
            payload(json!({"email": "nope", "password": "x"}))?,
        )
        .await;
        assert_eq!(bad_email.status(), StatusCode::BAD_REQUEST);

        let empty_password = register(
            extension.clone(),
            payload(json!({"email": "a@b.com", "password": ""}))?,
        )
        .await;
        assert_eq!(empty_password.status(), StatusCode::BAD_REQUEST);

        let missing = register(extension, None).await;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[test]
    fn test_debug_hides_password() -> anyhow::Result<()> {
        let user: UserRegister =
            serde_json::from_value(json!({"email": "a@b.com", "password": "hunter2"}))?;
        assert!(!format!("{user:?}").contains("hunter2"));
        Ok(())
    }
}
