use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{is_unique_violation, ApiError};

/// Verification tokens are valid for a fixed 24 hours.
pub const VERIFICATION_TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "account_kind", rename_all = "lowercase")]
pub enum AccountKind {
    #[default]
    Freelancer,
    Client,
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub email_verified: bool,
    pub account_kind: AccountKind,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Single-use token proving mailbox ownership.
#[derive(Debug, Clone, FromRow)]
pub struct EmailVerificationToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

/// One row per issued refresh token; multiple rows per user model multiple
/// sessions. Rows are deleted on logout and checked for expiry at use-time.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

pub struct NewAccount<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub account_kind: AccountKind,
    pub full_name: Option<&'a str>,
}

impl User {
    pub async fn find_by_email(db: &PgPool, email: &str) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, email_verified, account_kind, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, email_verified, account_kind, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }
}

/// Signup writes: user, verification token, and optional name-only seed
/// profile, all in one transaction. Any failure rolls back the lot.
pub async fn create_account(
    db: &PgPool,
    new: NewAccount<'_>,
) -> Result<(User, EmailVerificationToken), ApiError> {
    let mut tx = db.begin().await?;

    // Fast-path check for a friendlier error; the unique constraint on
    // users.email is the actual guarantee.
    let taken: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(new.email)
        .fetch_optional(&mut *tx)
        .await?;
    if taken.is_some() {
        return Err(ApiError::DuplicateEmail);
    }

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, password_hash, account_kind)
        VALUES ($1, $2, $3)
        RETURNING id, email, password_hash, email_verified, account_kind, created_at, updated_at
        "#,
    )
    .bind(new.email)
    .bind(new.password_hash)
    .bind(new.account_kind)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        // A concurrent signup won the race between the check and this insert.
        if is_unique_violation(&e) {
            ApiError::DuplicateEmail
        } else {
            e.into()
        }
    })?;

    let token = Uuid::new_v4().simple().to_string();
    let expires_at = OffsetDateTime::now_utc() + Duration::hours(VERIFICATION_TOKEN_TTL_HOURS);
    let verification = sqlx::query_as::<_, EmailVerificationToken>(
        r#"
        INSERT INTO email_verification_tokens (user_id, token, expires_at)
        VALUES ($1, $2, $3)
        RETURNING id, user_id, token, expires_at, created_at
        "#,
    )
    .bind(user.id)
    .bind(&token)
    .bind(expires_at)
    .fetch_one(&mut *tx)
    .await?;

    // Seed row carries the name only; completed_at stays unset until the
    // profile is created or updated with content.
    if let Some(full_name) = new.full_name {
        sqlx::query("INSERT INTO profiles (user_id, full_name) VALUES ($1, $2)")
            .bind(user.id)
            .bind(full_name)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok((user, verification))
}

impl EmailVerificationToken {
    pub async fn find_by_token(db: &PgPool, token: &str) -> Result<Option<Self>, ApiError> {
        let row = sqlx::query_as::<_, Self>(
            r#"
            SELECT id, user_id, token, expires_at, created_at
            FROM email_verification_tokens
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    /// Marks the owning user verified and deletes the token row in one
    /// transaction, so a token can be consumed exactly once.
    pub async fn consume(db: &PgPool, token_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
        let mut tx = db.begin().await?;

        sqlx::query("UPDATE users SET email_verified = TRUE, updated_at = now() WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM email_verification_tokens WHERE id = $1")
            .bind(token_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        // The delete count, not the handler's lookup, is what makes the
        // token single-use: a concurrent consumer already removed the row,
        // so roll back the flag update and report the token gone.
        if deleted == 0 {
            return Err(ApiError::VerificationTokenNotFound);
        }

        tx.commit().await?;
        Ok(())
    }
}

impl RefreshToken {
    pub async fn insert(
        db: &PgPool,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), ApiError> {
        sqlx::query("INSERT INTO refresh_tokens (user_id, token, expires_at) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(token)
            .bind(expires_at)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn find_by_token(db: &PgPool, token: &str) -> Result<Option<Self>, ApiError> {
        let row = sqlx::query_as::<_, Self>(
            r#"
            SELECT id, user_id, token, expires_at, created_at
            FROM refresh_tokens
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    /// Idempotent: deleting an absent token is not an error.
    pub async fn delete_by_token(db: &PgPool, token: &str) -> Result<u64, ApiError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token = $1")
            .bind(token)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }
}
