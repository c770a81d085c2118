use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, instrument};
use uuid::Uuid;

use super::internal;
use crate::profiles::repo::{self, UserProfile};
use crate::profiles::targets::{calculate_targets, NutritionTargets};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/:id/profile", get(get_profile))
        .route("/users/:id/targets/recompute", post(recompute_targets))
}

#[instrument(skip(state))]
async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserProfile>, (StatusCode, String)> {
    match repo::get_profile(&state.db, user_id).await {
        Ok(Some(profile)) => Ok(Json(profile)),
        Ok(None) => Err((StatusCode::NOT_FOUND, "User not found".into())),
        Err(e) => {
            error!(error = %e, %user_id, "profile fetch failed");
            Err(internal(e))
        }
    }
}

/// Periodic recompute of daily targets from the stored anthropometrics.
#[instrument(skip(state))]
async fn recompute_targets(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<NutritionTargets>, (StatusCode, String)> {
    let profile = repo::get_profile(&state.db, user_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "User not found".to_string()))?;

    let (Some(age), Some(weight), Some(height)) =
        (profile.age, profile.weight_kg, profile.height_cm)
    else {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "Profile is missing age, weight or height".into(),
        ));
    };

    let targets = calculate_targets(
        age,
        profile.gender.as_deref().unwrap_or("Female"),
        weight,
        height,
        profile.activity_level.as_deref().unwrap_or("Sedentary"),
        profile.health_goal.as_deref().unwrap_or("Maintenance"),
    );

    repo::update_targets(&state.db, user_id, &targets)
        .await
        .map_err(internal)?;

    Ok(Json(targets))
}
