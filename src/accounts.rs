//! Account commands: registration, sessions and profile maintenance.
//!
//! Only a BLAKE3 digest of the current refresh token is stored. Rotating a
//! session swaps that digest with a compare-and-set, so a refresh token can
//! be redeemed at most once.

use std::sync::Arc;

use anyhow::Context;
use libsql::{Connection, Value, params::Params};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::blob::{BlobStorage, StoredObject, UploadedFile, delete_best_effort};
use crate::error::{ServiceError, ServiceResult, require_text};
use crate::identity::Viewer;
use crate::ids::ObjectId;
use crate::models::{User, find_user, row_to_user};
use crate::security::{
    SessionKeys, SessionTokens, TokenKind, digest_matches, hash_password, token_digest,
    verify_password,
};
use crate::store::{Store, id_value, millis_value, now};

const RETURNING_USER: &str =
    "id, username, email, full_name, avatar, cover_image, created_at, updated_at";

#[derive(Debug, Default)]
pub struct Registration {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub avatar: Option<UploadedFile>,
    pub cover_image: Option<UploadedFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSession {
    pub user: User,
    #[serde(flatten)]
    pub tokens: SessionTokens,
}

#[derive(Clone)]
pub struct Accounts {
    store: Store,
    blobs: Arc<dyn BlobStorage>,
    keys: SessionKeys,
}

impl Accounts {
    pub fn new(store: Store, blobs: Arc<dyn BlobStorage>, keys: SessionKeys) -> Self {
        Self { store, blobs, keys }
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    pub async fn register(&self, input: Registration) -> ServiceResult<User> {
        let full_name = require_text(input.full_name.as_deref(), "all fields are required")?;
        let email = require_text(input.email.as_deref(), "all fields are required")?.to_lowercase();
        let username = require_text(input.username.as_deref(), "all fields are required")?.to_lowercase();
        let password = require_text(input.password.as_deref(), "all fields are required")?;
        let avatar = input
            .avatar
            .as_ref()
            .filter(|file| file.is_image())
            .ok_or_else(|| ServiceError::validation("avatar image is required"))?;
        if input.cover_image.as_ref().is_some_and(|file| !file.is_image()) {
            return Err(ServiceError::validation("cover image must be an image"));
        }

        let conn = self.store.connect().await?;
        if handle_or_email_taken(&conn, &username, &email, None).await? {
            return Err(ServiceError::conflict("user with email or username already exists"));
        }
        let password_hash = hash_off_thread(password).await?;

        let stored_avatar = self.blobs.upload(avatar).await.context("uploading avatar")?;
        let stored_cover = match &input.cover_image {
            Some(file) => match self.blobs.upload(file).await {
                Ok(stored) => Some(stored),
                Err(err) => {
                    self.discard(&[&stored_avatar]).await;
                    return Err(ServiceError::Persistence(err.context("uploading cover image")));
                }
            },
            None => None,
        };

        let fields = NewUser {
            username,
            email,
            full_name,
            avatar: stored_avatar.url.clone(),
            cover_image: stored_cover.as_ref().map(|c| c.url.clone()).unwrap_or_default(),
            password_hash,
        };
        let user = match insert_account(&conn, fields).await {
            Ok(user) => user,
            Err(err) => {
                let uploaded: Vec<&StoredObject> =
                    std::iter::once(&stored_avatar).chain(stored_cover.as_ref()).collect();
                self.discard(&uploaded).await;
                return Err(err);
            }
        };
        info!(user_id = %user.id, username = %user.username, "registered user");
        Ok(user)
    }

    /// Signs in by handle or email and starts a fresh session.
    pub async fn login(&self, credentials: Credentials) -> ServiceResult<LoginSession> {
        let username = credentials
            .username
            .as_deref()
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty());
        let email = credentials
            .email
            .as_deref()
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty());
        if username.is_none() && email.is_none() {
            return Err(ServiceError::validation("username or email is required"));
        }
        let password = credentials.password.unwrap_or_default();

        let conn = self.store.connect().await?;
        let mut rows = conn
            .query(
                r#"
                SELECT id, password_hash FROM users
                WHERE username = ?1 OR email = ?2
                ORDER BY username = ?1 DESC
                LIMIT 1
                "#,
                Params::Positional(vec![
                    username.map(Value::Text).unwrap_or(Value::Null),
                    email.map(Value::Text).unwrap_or(Value::Null),
                ]),
            )
            .await?;
        let (user_id, password_hash): (String, String) = match rows.next().await? {
            Some(row) => (row.get(0)?, row.get(1)?),
            None => return Err(ServiceError::not_found("user does not exist")),
        };
        drop(rows);
        let user_id = ObjectId::parse(&user_id, "user")?;

        if !verify_off_thread(password, password_hash).await? {
            return Err(ServiceError::unauthenticated("invalid user credentials"));
        }

        let tokens = self.keys.issue_pair(user_id, now())?;
        conn.execute(
            "UPDATE users SET refresh_token_digest = ?2 WHERE id = ?1",
            Params::Positional(vec![
                id_value(user_id),
                Value::Text(token_digest(&tokens.refresh_token)),
            ]),
        )
        .await?;
        let user = find_user(&conn, user_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("user does not exist"))?;
        info!(%user_id, "user logged in");
        Ok(LoginSession { user, tokens })
    }

    pub async fn logout(&self, viewer: &Viewer) -> ServiceResult<()> {
        let caller = viewer.require()?;
        let conn = self.store.connect().await?;
        conn.execute(
            "UPDATE users SET refresh_token_digest = NULL WHERE id = ?1",
            [caller.to_string()],
        )
        .await?;
        Ok(())
    }

    /// Trades a refresh token for a new token pair. The presented token is
    /// spent even if the caller never receives the response.
    pub async fn refresh_session(&self, refresh_token: Option<&str>) -> ServiceResult<SessionTokens> {
        let token = refresh_token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ServiceError::unauthenticated("unauthorized request"))?;
        let claims = self.keys.verify(token, TokenKind::Refresh, now())?;

        let conn = self.store.connect().await?;
        let mut rows = conn
            .query(
                "SELECT refresh_token_digest FROM users WHERE id = ?1",
                [claims.sub.to_string()],
            )
            .await?;
        let stored: Option<String> = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => return Err(ServiceError::unauthenticated("invalid refresh token")),
        };
        drop(rows);
        let stored = stored
            .filter(|digest| digest_matches(token, digest))
            .ok_or_else(|| ServiceError::unauthenticated("refresh token is expired or used"))?;

        let tokens = self.keys.issue_pair(claims.sub, now())?;
        let swapped = conn
            .execute(
                "UPDATE users SET refresh_token_digest = ?3 WHERE id = ?1 AND refresh_token_digest = ?2",
                Params::Positional(vec![
                    id_value(claims.sub),
                    Value::Text(stored),
                    Value::Text(token_digest(&tokens.refresh_token)),
                ]),
            )
            .await?;
        if swapped == 0 {
            return Err(ServiceError::unauthenticated("refresh token is expired or used"));
        }
        Ok(tokens)
    }

    /// Maps an access token onto the user it was issued to. Tokens of
    /// deleted users are rejected.
    pub async fn authenticate(&self, access_token: &str) -> ServiceResult<ObjectId> {
        let claims = self.keys.verify(access_token, TokenKind::Access, now())?;
        let conn = self.store.connect().await?;
        match find_user(&conn, claims.sub).await? {
            Some(user) => Ok(user.id),
            None => Err(ServiceError::unauthenticated("invalid access token")),
        }
    }

    pub async fn change_password(
        &self,
        viewer: &Viewer,
        old_password: Option<&str>,
        new_password: Option<&str>,
    ) -> ServiceResult<()> {
        let caller = viewer.require()?;
        let new_password = require_text(new_password, "new password is required")?;
        let conn = self.store.connect().await?;
        let mut rows = conn
            .query("SELECT password_hash FROM users WHERE id = ?1", [caller.to_string()])
            .await?;
        let current: String = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => return Err(ServiceError::unauthenticated("invalid access token")),
        };
        drop(rows);

        if !verify_off_thread(old_password.unwrap_or_default().to_string(), current).await? {
            return Err(ServiceError::validation("invalid old password"));
        }
        let hash = hash_off_thread(new_password).await?;
        conn.execute(
            "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
            Params::Positional(vec![id_value(caller), Value::Text(hash), millis_value(now())]),
        )
        .await?;
        Ok(())
    }

    pub async fn current_user(&self, viewer: &Viewer) -> ServiceResult<User> {
        let caller = viewer.require()?;
        let conn = self.store.connect().await?;
        find_user(&conn, caller)
            .await?
            .ok_or_else(|| ServiceError::unauthenticated("invalid access token"))
    }

    pub async fn update_account(
        &self,
        viewer: &Viewer,
        full_name: Option<&str>,
        email: Option<&str>,
    ) -> ServiceResult<User> {
        let caller = viewer.require()?;
        let full_name = require_text(full_name, "all fields are required")?;
        let email = require_text(email, "all fields are required")?.to_lowercase();
        let conn = self.store.connect().await?;
        if handle_or_email_taken(&conn, "", &email, Some(caller)).await? {
            return Err(ServiceError::conflict("email is already in use"));
        }
        let mut rows = conn
            .query(
                &format!(
                    "UPDATE users SET full_name = ?2, email = ?3, updated_at = ?4 WHERE id = ?1 RETURNING {RETURNING_USER}"
                ),
                Params::Positional(vec![
                    id_value(caller),
                    Value::Text(full_name),
                    Value::Text(email),
                    millis_value(now()),
                ]),
            )
            .await
            .map_err(unique_to_conflict)?;
        let row = rows
            .next()
            .await
            .map_err(unique_to_conflict)?
            .ok_or_else(|| ServiceError::unauthenticated("invalid access token"))?;
        Ok(row_to_user(&row)?)
    }

    pub async fn update_avatar(&self, viewer: &Viewer, file: Option<UploadedFile>) -> ServiceResult<User> {
        self.replace_profile_image(viewer, file, ProfileImage::Avatar).await
    }

    pub async fn update_cover_image(&self, viewer: &Viewer, file: Option<UploadedFile>) -> ServiceResult<User> {
        self.replace_profile_image(viewer, file, ProfileImage::Cover).await
    }

    async fn replace_profile_image(
        &self,
        viewer: &Viewer,
        file: Option<UploadedFile>,
        slot: ProfileImage,
    ) -> ServiceResult<User> {
        let caller = viewer.require()?;
        let file = file.ok_or_else(|| ServiceError::validation(format!("{} file is missing", slot.label())))?;
        if !file.is_image() {
            return Err(ServiceError::validation(format!("{} must be an image", slot.label())));
        }
        let conn = self.store.connect().await?;
        let previous = find_user(&conn, caller)
            .await?
            .ok_or_else(|| ServiceError::unauthenticated("invalid access token"))?;

        let stored = self
            .blobs
            .upload(&file)
            .await
            .with_context(|| format!("uploading {}", slot.label()))?;
        let user = match write_profile_image(&conn, caller, slot, &stored.url).await {
            Ok(user) => user,
            Err(err) => {
                self.discard(&[&stored]).await;
                return Err(err);
            }
        };

        let old_url = match slot {
            ProfileImage::Avatar => previous.avatar,
            ProfileImage::Cover => previous.cover_image,
        };
        delete_best_effort(self.blobs.as_ref(), &old_url).await;
        Ok(user)
    }

    async fn discard(&self, stored: &[&StoredObject]) {
        for object in stored {
            delete_best_effort(self.blobs.as_ref(), &object.url).await;
        }
    }
}

struct NewUser {
    username: String,
    email: String,
    full_name: String,
    avatar: String,
    cover_image: String,
    password_hash: String,
}

async fn insert_account(conn: &Connection, user: NewUser) -> ServiceResult<User> {
    let mut rows = conn
        .query(
            &format!(
                r#"
                INSERT INTO users (id, username, email, full_name, avatar, cover_image,
                                   password_hash, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                RETURNING {RETURNING_USER}
                "#
            ),
            Params::Positional(vec![
                id_value(ObjectId::new()),
                Value::Text(user.username),
                Value::Text(user.email),
                Value::Text(user.full_name),
                Value::Text(user.avatar),
                Value::Text(user.cover_image),
                Value::Text(user.password_hash),
                millis_value(now()),
            ]),
        )
        .await
        .map_err(unique_to_conflict)?;
    let row = rows
        .next()
        .await
        .map_err(unique_to_conflict)?
        .ok_or_else(|| ServiceError::Persistence(anyhow::anyhow!("insert returned no row")))?;
    Ok(row_to_user(&row)?)
}

async fn write_profile_image(
    conn: &Connection,
    user_id: ObjectId,
    slot: ProfileImage,
    url: &str,
) -> ServiceResult<User> {
    let mut rows = conn
        .query(
            &format!(
                "UPDATE users SET {column} = ?2, updated_at = ?3 WHERE id = ?1 RETURNING {RETURNING_USER}",
                column = slot.column(),
            ),
            Params::Positional(vec![
                id_value(user_id),
                Value::Text(url.to_string()),
                millis_value(now()),
            ]),
        )
        .await?;
    let row = rows
        .next()
        .await?
        .ok_or_else(|| ServiceError::unauthenticated("invalid access token"))?;
    Ok(row_to_user(&row)?)
}

#[derive(Debug, Clone, Copy)]
enum ProfileImage {
    Avatar,
    Cover,
}

impl ProfileImage {
    fn column(self) -> &'static str {
        match self {
            Self::Avatar => "avatar",
            Self::Cover => "cover_image",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Avatar => "avatar",
            Self::Cover => "cover image",
        }
    }
}

async fn handle_or_email_taken(
    conn: &Connection,
    username: &str,
    email: &str,
    except: Option<ObjectId>,
) -> ServiceResult<bool> {
    let mut rows = conn
        .query(
            "SELECT 1 FROM users WHERE (username = ?1 OR email = ?2) AND id IS NOT ?3 LIMIT 1",
            Params::Positional(vec![
                Value::Text(username.to_string()),
                Value::Text(email.to_string()),
                except.map(id_value).unwrap_or(Value::Null),
            ]),
        )
        .await?;
    Ok(rows.next().await?.is_some())
}

fn unique_to_conflict(err: libsql::Error) -> ServiceError {
    if err.to_string().contains("UNIQUE constraint failed") {
        ServiceError::conflict("user with email or username already exists")
    } else {
        err.into()
    }
}

async fn hash_off_thread(password: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("joining password hashing task")?
}

async fn verify_off_thread(password: String, phc: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &phc))
        .await
        .context("joining password verification task")
}
