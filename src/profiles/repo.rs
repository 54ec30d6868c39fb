use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{is_unique_violation, ApiError};
use crate::profiles::dto::{ProfileInput, ProfileOwner};

/// Profile record; at most one per user, guaranteed by the unique
/// constraint on profiles.user_id.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub full_name: Option<String>,
    pub display_name: Option<String>,
    pub title: Option<String>,
    pub category: Option<String>,
    pub experience_level: Option<String>,
    pub skills: Vec<String>,
    pub bio: Option<String>,
    pub timezone: Option<String>,
    pub country: Option<String>,
    pub avatar_url: Option<String>,
    pub portfolio_links: Option<serde_json::Value>,
    pub completed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

pub async fn find_by_user_id(db: &PgPool, user_id: Uuid) -> Result<Option<Profile>, ApiError> {
    let profile = sqlx::query_as::<_, Profile>(
        r#"
        SELECT id, user_id, full_name, display_name, title, category, experience_level,
               skills, bio, timezone, country, avatar_url, portfolio_links,
               completed_at, created_at, updated_at
        FROM profiles
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    Ok(profile)
}

/// Public lookup: the key may be the profile's own id or the owning user's id.
pub async fn find_by_key(db: &PgPool, key: Uuid) -> Result<Option<Profile>, ApiError> {
    let profile = sqlx::query_as::<_, Profile>(
        r#"
        SELECT id, user_id, full_name, display_name, title, category, experience_level,
               skills, bio, timezone, country, avatar_url, portfolio_links,
               completed_at, created_at, updated_at
        FROM profiles
        WHERE id = $1 OR user_id = $1
        "#,
    )
    .bind(key)
    .fetch_optional(db)
    .await?;
    Ok(profile)
}

pub async fn find_owner(db: &PgPool, user_id: Uuid) -> Result<ProfileOwner, ApiError> {
    let owner = sqlx::query_as::<_, ProfileOwner>(
        "SELECT email, account_kind, created_at FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_one(db)
    .await?;
    Ok(owner)
}

/// Insert-or-conflict profile creation. The pre-check inside the transaction
/// only buys a friendlier early 409; the unique constraint on user_id is the
/// source of truth, so the violation path re-reads the winning row instead of
/// surfacing a storage error. Exactly one of two racing calls commits.
pub async fn create(
    db: &PgPool,
    user_id: Uuid,
    input: &ProfileInput,
) -> Result<Profile, ApiError> {
    let mut tx = db.begin().await?;

    let existing: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM profiles WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
    if existing.is_some() {
        drop(tx);
        let profile = find_by_user_id(db, user_id)
            .await?
            .ok_or(ApiError::Internal)?;
        return Err(ApiError::ProfileAlreadyExists(Box::new(profile)));
    }

    let links = input.portfolio_links.as_ref().map(|m| serde_json::json!(m));
    let inserted = sqlx::query_as::<_, Profile>(
        r#"
        INSERT INTO profiles (user_id, full_name, display_name, title, category,
                              experience_level, skills, bio, timezone, country,
                              avatar_url, portfolio_links, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now())
        RETURNING id, user_id, full_name, display_name, title, category, experience_level,
                  skills, bio, timezone, country, avatar_url, portfolio_links,
                  completed_at, created_at, updated_at
        "#,
    )
    .bind(user_id)
    .bind(&input.full_name)
    .bind(&input.display_name)
    .bind(&input.title)
    .bind(&input.category)
    .bind(&input.experience_level)
    .bind(input.skills.clone().unwrap_or_default())
    .bind(&input.bio)
    .bind(&input.timezone)
    .bind(&input.country)
    .bind(&input.avatar_url)
    .bind(links)
    .fetch_one(&mut *tx)
    .await;

    match inserted {
        Ok(profile) => {
            tx.commit().await?;
            Ok(profile)
        }
        Err(e) if is_unique_violation(&e) => {
            // A concurrent create won between our check and insert; hand the
            // caller the winner's row.
            drop(tx);
            let profile = find_by_user_id(db, user_id)
                .await?
                .ok_or(ApiError::Internal)?;
            Err(ApiError::ProfileAlreadyExists(Box::new(profile)))
        }
        Err(e) => Err(e.into()),
    }
}

/// Partial update: absent fields are left untouched (COALESCE with NULL
/// binds), completed_at is set on first update with content, and the owning
/// user's updated_at is bumped in the same transaction.
pub async fn update(
    db: &PgPool,
    user_id: Uuid,
    input: &ProfileInput,
) -> Result<Option<Profile>, ApiError> {
    let mut tx = db.begin().await?;

    let links = input.portfolio_links.as_ref().map(|m| serde_json::json!(m));
    let updated = sqlx::query_as::<_, Profile>(
        r#"
        UPDATE profiles SET
            full_name = COALESCE($2, full_name),
            display_name = COALESCE($3, display_name),
            title = COALESCE($4, title),
            category = COALESCE($5, category),
            experience_level = COALESCE($6, experience_level),
            skills = COALESCE($7, skills),
            bio = COALESCE($8, bio),
            timezone = COALESCE($9, timezone),
            country = COALESCE($10, country),
            avatar_url = COALESCE($11, avatar_url),
            portfolio_links = COALESCE($12, portfolio_links),
            completed_at = COALESCE(completed_at, now()),
            updated_at = now()
        WHERE user_id = $1
        RETURNING id, user_id, full_name, display_name, title, category, experience_level,
                  skills, bio, timezone, country, avatar_url, portfolio_links,
                  completed_at, created_at, updated_at
        "#,
    )
    .bind(user_id)
    .bind(&input.full_name)
    .bind(&input.display_name)
    .bind(&input.title)
    .bind(&input.category)
    .bind(&input.experience_level)
    .bind(input.skills.clone())
    .bind(&input.bio)
    .bind(&input.timezone)
    .bind(&input.country)
    .bind(&input.avatar_url)
    .bind(links)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(profile) = updated else {
        return Ok(None);
    };

    sqlx::query("UPDATE users SET updated_at = now() WHERE id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Some(profile))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo::{create_account, AccountKind, NewAccount, User};

    async fn signed_up_user(pool: &PgPool, email: &str, full_name: Option<&str>) -> User {
        let (user, _) = create_account(
            pool,
            NewAccount {
                email,
                password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$aGFzaGhhc2hoYXNoaGFzaGhhc2hoYXNoaGFzaGhhc2g",
                account_kind: AccountKind::Freelancer,
                full_name,
            },
        )
        .await
        .expect("signup");
        user
    }

    #[sqlx::test]
    async fn concurrent_creates_exactly_one_wins(pool: PgPool) {
        let user = signed_up_user(&pool, "ada@example.com", None).await;

        let first = ProfileInput {
            title: Some("Engineer".into()),
            ..Default::default()
        };
        let second = ProfileInput {
            title: Some("Designer".into()),
            ..Default::default()
        };
        let (a, b) = tokio::join!(
            create(&pool, user.id, &first),
            create(&pool, user.id, &second),
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let mut results = results.into_iter();
        let (winner, loser) = match (results.next().unwrap(), results.next().unwrap()) {
            (Ok(w), Err(l)) | (Err(l), Ok(w)) => (w, l),
            _ => panic!("expected one success and one failure"),
        };

        // The loser observes the committed winner, not a storage error.
        match loser {
            ApiError::ProfileAlreadyExists(existing) => {
                assert_eq!(existing.id, winner.id);
                assert_eq!(existing.title, winner.title);
            }
            other => panic!("expected ProfileAlreadyExists, got {other:?}"),
        }

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM profiles WHERE user_id = $1")
            .bind(user.id)
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(count, 1);
    }

    #[sqlx::test]
    async fn create_after_signup_seed_reports_existing_row(pool: PgPool) {
        let user = signed_up_user(&pool, "ada@example.com", Some("Ada L")).await;

        let err = create(
            &pool,
            user.id,
            &ProfileInput {
                bio: Some("rust freelancer".into()),
                ..Default::default()
            },
        )
        .await
        .expect_err("seeded row counts as existing");
        match err {
            ApiError::ProfileAlreadyExists(existing) => {
                assert_eq!(existing.user_id, user.id);
                assert_eq!(existing.full_name.as_deref(), Some("Ada L"));
                assert!(existing.completed_at.is_none());
            }
            other => panic!("expected ProfileAlreadyExists, got {other:?}"),
        }
    }

    #[sqlx::test]
    async fn update_changes_only_submitted_fields(pool: PgPool) {
        let user = signed_up_user(&pool, "ada@example.com", None).await;
        let created = create(
            &pool,
            user.id,
            &ProfileInput {
                full_name: Some("Ada L".into()),
                title: Some("Engineer".into()),
                skills: Some(vec!["rust".into(), "sql".into()]),
                country: Some("NL".into()),
                ..Default::default()
            },
        )
        .await
        .expect("create");
        assert!(created.completed_at.is_some());

        let updated = update(
            &pool,
            user.id,
            &ProfileInput {
                bio: Some("rust freelancer".into()),
                ..Default::default()
            },
        )
        .await
        .expect("update")
        .expect("profile exists");

        assert_eq!(updated.bio.as_deref(), Some("rust freelancer"));
        assert_eq!(updated.full_name, created.full_name);
        assert_eq!(updated.title, created.title);
        assert_eq!(updated.skills, created.skills);
        assert_eq!(updated.country, created.country);
        assert_eq!(updated.completed_at, created.completed_at);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[sqlx::test]
    async fn seeded_profile_completes_on_first_update(pool: PgPool) {
        let user = signed_up_user(&pool, "ada@example.com", Some("Ada L")).await;

        let seeded = find_by_user_id(&pool, user.id)
            .await
            .expect("lookup")
            .expect("seed row");
        assert!(seeded.completed_at.is_none());

        let updated = update(
            &pool,
            user.id,
            &ProfileInput {
                bio: Some("now with content".into()),
                ..Default::default()
            },
        )
        .await
        .expect("update")
        .expect("profile exists");
        assert!(updated.completed_at.is_some());
        assert_eq!(updated.full_name.as_deref(), Some("Ada L"));
    }

    #[sqlx::test]
    async fn update_without_profile_returns_none(pool: PgPool) {
        let user = signed_up_user(&pool, "ada@example.com", None).await;
        let updated = update(
            &pool,
            user.id,
            &ProfileInput {
                bio: Some("x".into()),
                ..Default::default()
            },
        )
        .await
        .expect("update");
        assert!(updated.is_none());
    }
}
