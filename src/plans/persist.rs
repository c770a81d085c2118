//! Writes a generated plan to the database: one transaction for the plan
//! envelope, its days, meal details and shopping list; schedule
//! advancement happens after the commit as separate statements, so a
//! crash between the two leaves the schedule to the retry loop.

use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use time::{Date, Duration, OffsetDateTime};
use tracing::info;
use uuid::Uuid;

use crate::plans::error::PlanError;
use crate::plans::mock::MEAL_TYPES;
use crate::plans::prompt::{date_for_day, format_iso_date};

pub async fn save_plan(
    db: &PgPool,
    user_id: Uuid,
    schedule_id: Uuid,
    plan: &Value,
    generated_by: &str,
    start_date: Date,
) -> Result<Uuid, PlanError> {
    let mut tx = db.begin().await?;

    let plan_id = Uuid::new_v4();
    let end_date = start_date + Duration::days(6);
    let week_summary = plan.pointer("/meal_plan/week_summary").cloned();

    sqlx::query(
        r#"
        INSERT INTO meal_plans
            (plan_id, user_id, schedule_id, plan_name, start_date, end_date,
             week_summary, status, generated_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'ACTIVE', $8)
        "#,
    )
    .bind(plan_id)
    .bind(user_id)
    .bind(schedule_id)
    .bind(format!("Week of {}", format_iso_date(start_date)))
    .bind(start_date)
    .bind(end_date)
    .bind(week_summary)
    .bind(generated_by)
    .execute(&mut *tx)
    .await?;

    let days = plan
        .pointer("/meal_plan/days")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for (i, day) in days.iter().enumerate() {
        let meal_date = date_for_day(start_date, i as u32 + 1);
        let meal_id = insert_daily_meal(&mut tx, plan_id, user_id, i as i32 + 1, day, meal_date).await?;

        if let Some(meals) = day.get("meals").and_then(Value::as_object) {
            for meal_type in MEAL_TYPES {
                if let Some(meal) = meals.get(meal_type) {
                    insert_meal_detail(&mut tx, meal_id, meal_type, meal).await?;
                }
            }
        }
    }

    insert_shopping_list(&mut tx, plan_id, user_id, plan).await?;

    tx.commit().await?;

    info!(%user_id, %plan_id, generated_by, "saved meal plan");
    Ok(plan_id)
}

async fn insert_daily_meal(
    tx: &mut Transaction<'_, Postgres>,
    plan_id: Uuid,
    user_id: Uuid,
    day_number: i32,
    day: &Value,
    meal_date: Date,
) -> Result<Uuid, PlanError> {
    let meal_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO daily_meals
            (meal_id, plan_id, user_id, day_number, day_name, meal_date,
             total_nutrition, inventory_impact)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(meal_id)
    .bind(plan_id)
    .bind(user_id)
    .bind(day_number)
    .bind(day.get("day_name").and_then(Value::as_str))
    .bind(meal_date)
    .bind(day.get("total_nutrition").cloned())
    .bind(day.get("inventory_impact").cloned())
    .execute(&mut **tx)
    .await?;
    Ok(meal_id)
}

async fn insert_meal_detail(
    tx: &mut Transaction<'_, Postgres>,
    meal_id: Uuid,
    meal_type: &str,
    meal: &Value,
) -> Result<(), PlanError> {
    let meal_name = meal
        .get("meal_name")
        .and_then(Value::as_str)
        .unwrap_or("Unknown");

    sqlx::query(
        r#"
        INSERT INTO meal_details
            (detail_id, meal_id, meal_type, meal_name, ingredients_with_quantities,
             recipe, nutrition, preparation_time, cooking_time, servings,
             serving_size, difficulty_level)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(meal_id)
    .bind(meal_type)
    .bind(meal_name)
    .bind(meal.get("ingredients_with_quantities").cloned())
    .bind(meal.get("recipe").cloned())
    .bind(meal.get("nutrition").cloned())
    .bind(as_i32(meal.get("preparation_time")))
    .bind(as_i32(meal.get("cooking_time")))
    .bind(as_i32(meal.get("servings")))
    .bind(meal.get("serving_size").and_then(Value::as_str))
    .bind(
        meal.pointer("/recipe/difficulty_level")
            .and_then(Value::as_str),
    )
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_shopping_list(
    tx: &mut Transaction<'_, Postgres>,
    plan_id: Uuid,
    user_id: Uuid,
    plan: &Value,
) -> Result<(), PlanError> {
    let shopping = match plan.pointer("/recommendations/shopping_list_summary") {
        Some(value @ Value::Object(_)) => value.clone(),
        _ => return Ok(()),
    };

    sqlx::query(
        r#"
        INSERT INTO shopping_lists
            (list_id, plan_id, user_id, shopping_data, total_estimated_cost,
             total_items_from_inventory, total_items_to_purchase)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(plan_id)
    .bind(user_id)
    .bind(shopping.clone())
    .bind(as_f64(shopping.get("total_estimated_cost")))
    .bind(as_i32(shopping.get("total_items_from_inventory")))
    .bind(as_i32(shopping.get("total_items_to_purchase")))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// After a successful persist: deactivate every other ACTIVE schedule
/// row for the user (defends against duplicate-schedule drift) and push
/// this one a week out from today.
pub async fn advance_schedule(
    db: &PgPool,
    user_id: Uuid,
    schedule_id: Uuid,
) -> Result<(), PlanError> {
    sqlx::query(
        r#"
        UPDATE planning_schedule
           SET status = 'INACTIVE'
         WHERE user_id = $1 AND schedule_id != $2
        "#,
    )
    .bind(user_id)
    .bind(schedule_id)
    .execute(db)
    .await?;

    let next_date = OffsetDateTime::now_utc().date() + Duration::days(7);
    sqlx::query(
        r#"
        UPDATE planning_schedule
           SET next_plan_date = $2
         WHERE schedule_id = $1
        "#,
    )
    .bind(schedule_id)
    .bind(next_date)
    .execute(db)
    .await?;

    Ok(())
}

/// Find the user's ACTIVE schedule, creating one starting at
/// `start_date` when none exists (first interactive generation).
pub async fn ensure_schedule(
    db: &PgPool,
    user_id: Uuid,
    start_date: Date,
) -> Result<Uuid, PlanError> {
    let existing = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT schedule_id
          FROM planning_schedule
         WHERE user_id = $1 AND status = 'ACTIVE'
         ORDER BY created_at DESC
         LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?;

    if let Some(schedule_id) = existing {
        return Ok(schedule_id);
    }

    let schedule_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO planning_schedule
            (schedule_id, user_id, plan_start_date, plan_end_date, next_plan_date, status)
        VALUES ($1, $2, $3, $4, $5, 'ACTIVE')
        "#,
    )
    .bind(schedule_id)
    .bind(user_id)
    .bind(start_date)
    .bind(start_date + Duration::days(6))
    .bind(start_date)
    .execute(db)
    .await?;

    Ok(schedule_id)
}

fn as_i32(value: Option<&Value>) -> Option<i32> {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|v| i32::try_from(v).ok()),
        Some(Value::String(s)) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
