use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::auth::{
    dto::{
        AuthResponse, LoginRequest, LogoutRequest, MeResponse, PublicUser, RefreshRequest,
        RefreshResponse, SignupRequest, VerifyEmailRequest,
    },
    extractors::AuthUser,
    jwt::JwtKeys,
    password::{hash_password, verify_password, DUMMY_HASH},
    repo::{self, EmailVerificationToken, NewAccount, RefreshToken, User},
};
use crate::error::ApiError;
use crate::profiles;
use crate::response::{ApiResponse, FieldError};
use crate::state::AppState;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/verify-email", post(verify_email))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn validate_credentials(email: &str, password: &str) -> Result<(), ApiError> {
    let mut errors = Vec::new();
    if !is_valid_email(email) {
        errors.push(FieldError::new("email", "Invalid email address"));
    }
    if password.len() < 8 {
        errors.push(FieldError::new(
            "password",
            "Password must be at least 8 characters",
        ));
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::ValidationFailed(errors))
    }
}

/// Mints an access/refresh pair and persists the refresh row. Runs outside
/// the signup transaction; token issuance has no bearing on account writes.
async fn issue_session(state: &AppState, user: &User) -> Result<AuthResponse, ApiError> {
    let keys = JwtKeys::from_ref(state);
    let access_token = keys.sign_access(user.id, &user.email, user.account_kind)?;
    let refresh_token = keys.sign_refresh(user.id)?;
    let expires_at = OffsetDateTime::now_utc() + keys.refresh_ttl;
    RefreshToken::insert(&state.db, user.id, &refresh_token, expires_at).await?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser::from(user),
    })
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(mut payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AuthResponse>>), ApiError> {
    payload.email = payload.email.trim().to_lowercase();
    validate_credentials(&payload.email, &payload.password)?;

    let full_name = payload
        .full_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let password_hash = hash_password(&payload.password)?;
    let (user, verification) = repo::create_account(
        &state.db,
        NewAccount {
            email: &payload.email,
            password_hash: &password_hash,
            account_kind: payload.user_type,
            full_name,
        },
    )
    .await?;

    info!(
        user_id = %user.id,
        email = %user.email,
        verification_expires_at = %verification.expires_at,
        "user signed up"
    );

    let session = issue_session(&state, &user).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(
            session,
            "Account created. Check your inbox to verify your email.",
        )),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<ApiResponse<AuthResponse>>, ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    let Some(user) = User::find_by_email(&state.db, &payload.email).await? else {
        // Burn a verification anyway so unknown emails cost the same time.
        let _ = verify_password(&payload.password, DUMMY_HASH);
        warn!("login failed");
        return Err(ApiError::InvalidCredentials);
    };

    if !verify_password(&payload.password, &user.password_hash)? {
        warn!("login failed");
        return Err(ApiError::InvalidCredentials);
    }

    info!(user_id = %user.id, "user logged in");
    let session = issue_session(&state, &user).await?;
    Ok(Json(ApiResponse::with_message(session, "Logged in")))
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let Some(row) = EmailVerificationToken::find_by_token(&state.db, &payload.token).await? else {
        return Err(ApiError::VerificationTokenNotFound);
    };

    // Expired rows stay in place; purging them is housekeeping, not
    // correctness.
    if row.expires_at <= OffsetDateTime::now_utc() {
        return Err(ApiError::VerificationTokenExpired);
    }

    EmailVerificationToken::consume(&state.db, row.id, row.user_id).await?;
    info!(user_id = %row.user_id, "email verified");
    Ok(Json(ApiResponse::message("Email verified")))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<ApiResponse<RefreshResponse>>, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(&payload.refresh_token)?;

    // The decoded token must also exist as a live row bound to the same
    // subject; that row is what logout revokes.
    let Some(row) = RefreshToken::find_by_token(&state.db, &payload.refresh_token).await? else {
        warn!(user_id = %claims.sub, "refresh token not on record");
        return Err(ApiError::RefreshTokenInvalid);
    };
    if row.user_id != claims.sub {
        warn!(user_id = %claims.sub, "refresh token subject mismatch");
        return Err(ApiError::RefreshTokenInvalid);
    }
    if row.expires_at <= OffsetDateTime::now_utc() {
        return Err(ApiError::RefreshTokenExpired);
    }

    let Some(user) = User::find_by_id(&state.db, claims.sub).await? else {
        return Err(ApiError::RefreshTokenInvalid);
    };

    let access_token = keys.sign_access(user.id, &user.email, user.account_kind)?;
    Ok(Json(ApiResponse::data(RefreshResponse { access_token })))
}

#[instrument(skip(state, payload))]
pub async fn logout(
    State(state): State<AppState>,
    payload: Option<Json<LogoutRequest>>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let token = payload.and_then(|Json(p)| p.refresh_token);
    if let Some(token) = token.as_deref() {
        let deleted = RefreshToken::delete_by_token(&state.db, token).await?;
        info!(deleted, "logout");
    }
    // Idempotent: a missing or unknown token still reports success.
    Ok(Json(ApiResponse::message("Logged out")))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ApiResponse<MeResponse>>, ApiError> {
    let Some(user) = User::find_by_id(&state.db, user_id).await? else {
        return Err(ApiError::UserNotFound);
    };
    let profile = profiles::repo::find_by_user_id(&state.db, user_id).await?;
    Ok(Json(ApiResponse::data(MeResponse {
        user: PublicUser::from(&user),
        profile,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_regex_accepts_plausible_addresses() {
        assert!(is_valid_email("ada@example.com"));
        assert!(is_valid_email("a.b+tag@sub.domain.io"));
    }

    #[test]
    fn email_regex_rejects_malformed_addresses() {
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("missing@tld"));
        assert!(!is_valid_email("spaces in@example.com"));
        assert!(!is_valid_email("@example.com"));
    }

    #[test]
    fn credential_validation_collects_all_field_errors() {
        let err = validate_credentials("bad", "short").unwrap_err();
        match err {
            ApiError::ValidationFailed(errors) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].field, "email");
                assert_eq!(errors[1].field, "password");
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn credential_validation_passes_well_formed_input() {
        assert!(validate_credentials("ada@example.com", "longenough").is_ok());
    }
}
