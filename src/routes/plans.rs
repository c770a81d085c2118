use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{error, instrument};
use uuid::Uuid;

use super::internal;
use crate::plans::generator::{
    consolidate_shopping_list, generate_plan, refresh_future_suggestions,
};
use crate::plans::persist::{advance_schedule, ensure_schedule, save_plan};
use crate::plans::prompt::parse_iso_date;
use crate::plans::scheduler::{run_for_date, RunReport};
use crate::profiles::repo;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/plans/run", post(run_scheduled))
        .route("/users/:id/plans/generate", post(generate_for_user))
        .route("/users/:id/plans/current", get(current_plan))
}

#[derive(Debug, Deserialize, Default)]
pub struct RunRequest {
    /// ISO date; defaults to today.
    pub date: Option<String>,
}

/// Scheduled entry point: the external daily batch job posts here.
#[instrument(skip(state))]
async fn run_scheduled(
    State(state): State<AppState>,
    body: Option<Json<RunRequest>>,
) -> Result<Json<RunReport>, (StatusCode, String)> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let target_date = match body.date.as_deref() {
        Some(text) => parse_iso_date(text)
            .ok_or((StatusCode::BAD_REQUEST, "date must be YYYY-MM-DD".into()))?,
        None => OffsetDateTime::now_utc().date(),
    };

    let report = run_for_date(&state, target_date).await;
    Ok(Json(report))
}

/// Interactive generation for one user (the dashboard's "generate now").
/// Runs the same pipeline as the batch loop, plus the future-purchase
/// suggestions pass, and returns the stored plan.
#[instrument(skip(state))]
async fn generate_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let data = repo::load_user_data(&state.db, user_id).await.map_err(|e| {
        error!(error = %e, %user_id, "aggregate failed");
        (StatusCode::NOT_FOUND, "User not found".to_string())
    })?;

    let start_date = OffsetDateTime::now_utc().date();
    let schedule_id = ensure_schedule(&state.db, user_id, start_date)
        .await
        .map_err(internal)?;

    let mut generated = generate_plan(state.agent_ref(), &data, start_date).await;
    consolidate_shopping_list(state.agent_ref(), &mut generated.plan).await;
    refresh_future_suggestions(state.agent_ref(), &data.profile, &mut generated.plan).await;

    let plan_id = save_plan(
        &state.db,
        user_id,
        schedule_id,
        &generated.plan,
        generated.generated_by,
        start_date,
    )
    .await
    .map_err(internal)?;

    advance_schedule(&state.db, user_id, schedule_id)
        .await
        .map_err(internal)?;

    Ok(Json(json!({
        "plan_id": plan_id,
        "generated_by": generated.generated_by,
        "plan": generated.plan,
    })))
}

#[instrument(skip(state))]
async fn current_plan(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let plan = sqlx::query_as::<_, (Uuid, time::Date, time::Date, Option<Value>, String, String)>(
        r#"
        SELECT plan_id, start_date, end_date, week_summary, status, generated_by
          FROM meal_plans
         WHERE user_id = $1 AND status = 'ACTIVE'
         ORDER BY created_at DESC
         LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(internal)?;

    let Some((plan_id, start_date, end_date, week_summary, status, generated_by)) = plan else {
        return Err((StatusCode::NOT_FOUND, "No active meal plan".into()));
    };

    let days = sqlx::query_as::<_, (Uuid, i32, Option<String>, Option<time::Date>, Option<Value>)>(
        r#"
        SELECT meal_id, day_number, day_name, meal_date, total_nutrition
          FROM daily_meals
         WHERE plan_id = $1
         ORDER BY day_number
        "#,
    )
    .bind(plan_id)
    .fetch_all(&state.db)
    .await
    .map_err(internal)?;

    let mut day_values = Vec::with_capacity(days.len());
    for (meal_id, day_number, day_name, meal_date, total_nutrition) in days {
        let meals = sqlx::query_as::<_, (String, String, Option<Value>)>(
            r#"
            SELECT meal_type, meal_name, nutrition
              FROM meal_details
             WHERE meal_id = $1
             ORDER BY meal_type
            "#,
        )
        .bind(meal_id)
        .fetch_all(&state.db)
        .await
        .map_err(internal)?;

        let meal_values: Vec<Value> = meals
            .into_iter()
            .map(|(meal_type, meal_name, nutrition)| {
                json!({"meal_type": meal_type, "meal_name": meal_name, "nutrition": nutrition})
            })
            .collect();

        day_values.push(json!({
            "day": day_number,
            "day_name": day_name,
            "meal_date": meal_date.map(crate::plans::prompt::format_iso_date),
            "total_nutrition": total_nutrition,
            "meals": meal_values,
        }));
    }

    Ok(Json(json!({
        "plan_id": plan_id,
        "start_date": crate::plans::prompt::format_iso_date(start_date),
        "end_date": crate::plans::prompt::format_iso_date(end_date),
        "status": status,
        "generated_by": generated_by,
        "week_summary": week_summary,
        "days": day_values,
    })))
}
