use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::extractors::AuthUser;
use crate::error::ApiError;
use crate::profiles::dto::{ProfileDetails, ProfileInput};
use crate::profiles::repo::{self, Profile};
use crate::response::{ApiResponse, FieldError};
use crate::state::AppState;

const MAX_BIO_LEN: usize = 1000;

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/profile", post(create_profile).patch(update_profile))
        .route("/profile/:id", get(get_profile))
}

fn validate_input(input: &ProfileInput) -> Result<(), ApiError> {
    if let Some(bio) = &input.bio {
        if bio.chars().count() > MAX_BIO_LEN {
            return Err(ApiError::ValidationFailed(vec![FieldError::new(
                "bio",
                format!("Bio must be at most {MAX_BIO_LEN} characters"),
            )]));
        }
    }
    Ok(())
}

#[instrument(skip(state, payload))]
pub async fn create_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ProfileInput>,
) -> Result<(StatusCode, Json<ApiResponse<Profile>>), ApiError> {
    validate_input(&payload)?;

    let profile = repo::create(&state.db, user_id, &payload).await?;
    info!(user_id = %user_id, profile_id = %profile.id, "profile created");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message(profile, "Profile created")),
    ))
}

#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ProfileInput>,
) -> Result<Json<ApiResponse<Profile>>, ApiError> {
    if !payload.has_updates() {
        return Err(ApiError::NoFieldsToUpdate);
    }
    validate_input(&payload)?;

    let Some(profile) = repo::update(&state.db, user_id, &payload).await? else {
        return Err(ApiError::ProfileNotFound);
    };
    info!(user_id = %user_id, profile_id = %profile.id, "profile updated");
    Ok(Json(ApiResponse::with_message(profile, "Profile updated")))
}

/// Public read; the path key may be a profile id or a user id.
#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ProfileDetails>>, ApiError> {
    let Some(profile) = repo::find_by_key(&state.db, id).await? else {
        return Err(ApiError::ProfileNotFound);
    };
    let user = repo::find_owner(&state.db, profile.user_id).await?;
    Ok(Json(ApiResponse::data(ProfileDetails { profile, user })))
}
