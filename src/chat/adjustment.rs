//! Meal adjustment flow: the user reports or requests a change to one
//! stored meal; the agent decides the intent (report / request / append
//! / remove / replace) given the current meal JSON and returns the full
//! updated meal, which overwrites the stored row. The owning day's
//! totals are then recomputed from all of its meals.

use serde_json::{json, Map, Value};
use sqlx::{FromRow, PgPool};
use time::Date;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::agent::response::{extract_json, flatten};
use crate::plans::prompt::format_iso_date;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct AdjustmentResult {
    pub success: bool,
    pub message: String,
    pub new_daily_total: Option<Value>,
}

impl AdjustmentResult {
    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            new_daily_total: None,
        }
    }
}

#[derive(Debug, FromRow)]
struct MealDetailRow {
    detail_id: Uuid,
    meal_name: String,
    ingredients_with_quantities: Option<Value>,
    nutrition: Option<Value>,
    recipe: Option<Value>,
}

pub async fn adjust_meal(
    state: &AppState,
    user_id: Uuid,
    date: Date,
    meal_type: &str,
    instruction: &str,
) -> AdjustmentResult {
    let Some(agent) = state.agent_ref() else {
        return AdjustmentResult::error("Agent offline");
    };

    // The stored meal is the context the agent reasons over.
    let daily_meal_id = match get_daily_meal_id(&state.db, user_id, date).await {
        Ok(Some(id)) => id,
        Ok(None) => return AdjustmentResult::error("No meal plan found for this date."),
        Err(e) => return AdjustmentResult::error(format!("Error processing request: {}", e)),
    };

    let current = match get_meal_detail(&state.db, daily_meal_id, meal_type).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            return AdjustmentResult::error(format!("No {} found for this date.", meal_type))
        }
        Err(e) => return AdjustmentResult::error(format!("Error processing request: {}", e)),
    };

    let prompt = build_adjustment_prompt(&current, meal_type, date, instruction);

    let meal_data = match agent.invoke(&prompt).await {
        Ok(response) => extract_json(&flatten(&response)),
        Err(e) => {
            warn!(error = %e, "adjustment agent call failed");
            return AdjustmentResult::error(format!("Error processing request: {}", e));
        }
    };
    let Some(meal_data @ Value::Object(_)) = meal_data else {
        return AdjustmentResult::error("Error processing request: could not parse updated meal");
    };
    let Some(meal_name) = meal_data.get("meal_name").and_then(Value::as_str) else {
        return AdjustmentResult::error("Error processing request: updated meal has no name");
    };
    let meal_name = meal_name.to_string();

    if let Err(e) = update_meal_detail(&state.db, current.detail_id, &meal_data).await {
        warn!(error = %e, detail_id = %current.detail_id, "meal detail update failed");
        return AdjustmentResult::error("Failed to update meal in database.");
    }

    // Day totals are derived data; recompute from every meal of the day.
    let totals = match recompute_daily_totals(&state.db, daily_meal_id).await {
        Ok(totals) => totals,
        Err(e) => return AdjustmentResult::error(format!("Error processing request: {}", e)),
    };

    let action = if meal_data.get("intent").and_then(Value::as_str) == Some("append") {
        "added to"
    } else {
        "updated"
    };

    debug!(%user_id, %date, meal_type, "meal adjusted");
    AdjustmentResult {
        success: true,
        message: format!(
            "Successfully {} {}. New item: {}.",
            action, meal_type, meal_name
        ),
        new_daily_total: Some(totals),
    }
}

fn build_adjustment_prompt(
    current: &MealDetailRow,
    meal_type: &str,
    date: Date,
    instruction: &str,
) -> String {
    let current_context = json!({
        "meal_name": current.meal_name,
        "ingredients_with_quantities": current.ingredients_with_quantities,
        "nutrition": current.nutrition,
        "recipe": current.recipe,
    });

    format!(
        "You are a nutrition assistant. The user wants to update their {meal_type} for {}.\n\n\
         CURRENT MEAL DATA:\n{}\n\n\
         Determine the user's intent:\n\
         1. REPORT: User ate something completely different (overwrite current meal).\n\
         2. REQUEST: User wants a new recipe/alternative (overwrite current meal with new suggestion).\n\
         3. APPEND: User added an item to the current meal (keep existing, add new).\n\
         4. REMOVE: User removed an item from the current meal (keep rest, remove item).\n\
         5. REPLACE: User swapped an item (remove old, add new).\n\n\
         TASK:\n\
         Generate the FULL UPDATED JSON for the meal.\n\
         - If APPEND/REMOVE/REPLACE: Modify the CURRENT MEAL DATA accordingly. Update nutrition, ingredients, and name.\n\
         - If REPORT/REQUEST: Ignore current data and generate new data.\n\
         - Calculate the new total nutrition accurately.\n\n\
         User Request: \"{instruction}\"\n\n\
         Return ONLY a JSON object in this format:\n\
         {{\n\
             \"intent\": \"report/request/append/remove/replace\",\n\
             \"meal_name\": \"Updated Name\",\n\
             \"ingredients_with_quantities\": [{{\"ingredient\": \"name\", \"quantity\": \"amount\", \"unit\": \"unit\"}}],\n\
             \"nutrition\": {{\"calories\": 0, \"protein_g\": 0, \"carbohydrates_g\": 0, \"fat_g\": 0, \"fiber_g\": 0}},\n\
             \"recipe\": {{\"instructions\": [\"step 1\"], \"preparation_time\": 0, \"cooking_time\": 0, \"difficulty_level\": \"easy/medium/hard\"}}\n\
         }}",
        format_iso_date(date),
        serde_json::to_string_pretty(&current_context).unwrap_or_default()
    )
}

async fn get_daily_meal_id(
    db: &PgPool,
    user_id: Uuid,
    date: Date,
) -> anyhow::Result<Option<Uuid>> {
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT dm.meal_id
          FROM daily_meals dm
          JOIN meal_plans mp ON dm.plan_id = mp.plan_id
         WHERE dm.user_id = $1
           AND dm.meal_date = $2
           AND mp.status = 'ACTIVE'
         ORDER BY dm.created_at DESC
         LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(date)
    .fetch_optional(db)
    .await?;
    Ok(id)
}

async fn get_meal_detail(
    db: &PgPool,
    daily_meal_id: Uuid,
    meal_type: &str,
) -> anyhow::Result<Option<MealDetailRow>> {
    let row = sqlx::query_as::<_, MealDetailRow>(
        r#"
        SELECT detail_id, meal_name, ingredients_with_quantities, nutrition, recipe
          FROM meal_details
         WHERE meal_id = $1 AND meal_type = $2
         ORDER BY created_at DESC
         LIMIT 1
        "#,
    )
    .bind(daily_meal_id)
    .bind(meal_type)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

/// Overwrite the stored meal in place with the agent's updated version.
async fn update_meal_detail(
    db: &PgPool,
    detail_id: Uuid,
    meal_data: &Value,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE meal_details
           SET meal_name = $2,
               ingredients_with_quantities = $3,
               nutrition = $4,
               recipe = $5,
               preparation_time = COALESCE($6, preparation_time),
               cooking_time = COALESCE($7, cooking_time)
         WHERE detail_id = $1
        "#,
    )
    .bind(detail_id)
    .bind(meal_data.get("meal_name").and_then(Value::as_str))
    .bind(meal_data.get("ingredients_with_quantities").cloned())
    .bind(meal_data.get("nutrition").cloned())
    .bind(meal_data.get("recipe").cloned())
    .bind(
        meal_data
            .pointer("/recipe/preparation_time")
            .and_then(Value::as_i64)
            .map(|v| v as i32),
    )
    .bind(
        meal_data
            .pointer("/recipe/cooking_time")
            .and_then(Value::as_i64)
            .map(|v| v as i32),
    )
    .execute(db)
    .await?;
    Ok(())
}

async fn recompute_daily_totals(db: &PgPool, daily_meal_id: Uuid) -> anyhow::Result<Value> {
    let nutritions = sqlx::query_scalar::<_, Option<Value>>(
        r#"SELECT nutrition FROM meal_details WHERE meal_id = $1"#,
    )
    .bind(daily_meal_id)
    .fetch_all(db)
    .await?;

    let meals: Vec<Value> = nutritions.into_iter().flatten().collect();
    let totals = sum_day_nutrition(&meals);

    sqlx::query(r#"UPDATE daily_meals SET total_nutrition = $2 WHERE meal_id = $1"#)
        .bind(daily_meal_id)
        .bind(totals.clone())
        .execute(db)
        .await?;

    Ok(totals)
}

/// Sum per-meal nutrition objects into a day total, one-decimal rounded.
pub fn sum_day_nutrition(meals: &[Value]) -> Value {
    const FIELDS: [&str; 5] = ["calories", "protein_g", "carbohydrates_g", "fat_g", "fiber_g"];

    let mut totals = Map::new();
    for field in FIELDS {
        let sum: f64 = meals
            .iter()
            .filter_map(|m| m.get(field))
            .filter_map(Value::as_f64)
            .sum();
        totals.insert(field.to_string(), json!((sum * 10.0).round() / 10.0));
    }
    Value::Object(totals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_totals_sum_across_remaining_meals() {
        // A lunch that just lost its olives plus the rest of the day.
        let meals = vec![
            json!({"calories": 450.0, "protein_g": 35.0, "carbohydrates_g": 40.0, "fat_g": 15.0, "fiber_g": 6.0}),
            json!({"calories": 520.0, "protein_g": 30.2, "carbohydrates_g": 55.0, "fat_g": 18.0, "fiber_g": 7.5}),
            json!({"calories": 610.0, "protein_g": 42.0, "carbohydrates_g": 60.0, "fat_g": 20.0, "fiber_g": 9.0}),
        ];
        let totals = sum_day_nutrition(&meals);
        assert_eq!(totals["calories"], json!(1580.0));
        assert_eq!(totals["protein_g"], json!(107.2));
        assert_eq!(totals["fiber_g"], json!(22.5));
    }

    #[test]
    fn missing_or_malformed_nutrition_counts_as_zero() {
        let meals = vec![
            json!({"calories": 300.0, "protein_g": "lots"}),
            json!({}),
        ];
        let totals = sum_day_nutrition(&meals);
        assert_eq!(totals["calories"], json!(300.0));
        assert_eq!(totals["protein_g"], json!(0.0));
    }

    #[test]
    fn empty_day_sums_to_zeroes() {
        let totals = sum_day_nutrition(&[]);
        assert_eq!(totals["calories"], json!(0.0));
    }
}
