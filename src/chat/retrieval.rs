//! Meal retrieval: look up stored meals by date / meal type and present
//! them, conversationally when the agent is reachable, as plain
//! formatted data otherwise. This path never errors out to the caller.

use std::fmt::Write as _;

use serde_json::Value;
use sqlx::{FromRow, PgPool};
use time::{Date, OffsetDateTime};
use tracing::warn;
use uuid::Uuid;

use crate::agent::response::flatten;
use crate::chat::ChatStep;
use crate::plans::prompt::{format_iso_date, format_long_date};
use crate::profiles::repo::{get_profile, UserProfile};
use crate::state::AppState;

const NO_MEALS_FOUND: &str =
    "No meals found matching your criteria. You may not have an active meal plan for this date.";

#[derive(Debug, FromRow)]
pub struct RetrievedMeal {
    pub meal_name: String,
    pub meal_type: String,
    pub meal_date: Option<Date>,
    pub day_name: Option<String>,
    pub nutrition: Option<Value>,
    pub ingredients_with_quantities: Option<Value>,
}

pub async fn find_meals(
    db: &PgPool,
    user_id: Uuid,
    date: Option<Date>,
    meal_type: Option<&str>,
) -> anyhow::Result<Vec<RetrievedMeal>> {
    let rows = sqlx::query_as::<_, RetrievedMeal>(
        r#"
        SELECT md.meal_name, md.meal_type, dm.meal_date, dm.day_name,
               md.nutrition, md.ingredients_with_quantities
          FROM meal_details md
          JOIN daily_meals dm ON md.meal_id = dm.meal_id
          JOIN meal_plans mp ON dm.plan_id = mp.plan_id
         WHERE mp.user_id = $1
           AND mp.status = 'ACTIVE'
           AND ($2::date IS NULL OR dm.meal_date = $2)
           AND ($3::text IS NULL OR md.meal_type = $3)
         ORDER BY dm.meal_date, md.meal_type
         LIMIT 8
        "#,
    )
    .bind(user_id)
    .bind(date)
    .bind(meal_type)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub fn format_meals(meals: &[RetrievedMeal]) -> String {
    let mut out = String::from("## Retrieved Meals\n\n");

    for meal in meals {
        let _ = writeln!(
            out,
            "**{}** ({})",
            meal.meal_name,
            title_case(&meal.meal_type)
        );
        match meal.meal_date {
            Some(date) => {
                let _ = writeln!(out, "- Date: {}", format_iso_date(date));
            }
            None => {
                let _ = writeln!(out, "- Day: {}", meal.day_name.as_deref().unwrap_or("Unknown"));
            }
        }

        if let Some(nutrition) = &meal.nutrition {
            let _ = writeln!(
                out,
                "- Calories: {} kcal",
                nutrition.get("calories").map(display_number).unwrap_or_else(|| "N/A".into())
            );
            let _ = writeln!(
                out,
                "- Protein: {}g",
                nutrition.get("protein_g").map(display_number).unwrap_or_else(|| "N/A".into())
            );
        }

        if let Some(Value::Array(ingredients)) = &meal.ingredients_with_quantities {
            let names: Vec<&str> = ingredients
                .iter()
                .take(5)
                .filter_map(|i| i.get("ingredient").and_then(Value::as_str))
                .collect();
            if !names.is_empty() {
                let _ = writeln!(out, "- Ingredients: {}", names.join(", "));
            }
        }

        out.push('\n');
    }

    out
}

/// Full retrieval step: query, format, and (agent permitting) wrap the
/// data in a conversational reply.
pub async fn retrieve_and_respond(state: &AppState, user_id: Uuid, step: &ChatStep) -> String {
    let meals = match find_meals(&state.db, user_id, step.date, step.meal_type.as_deref()).await {
        Ok(meals) => meals,
        Err(e) => return format!("Error retrieving meals: {}", e),
    };

    if meals.is_empty() {
        return NO_MEALS_FOUND.to_string();
    }

    let formatted = format_meals(&meals);

    let Some(agent) = state.agent_ref() else {
        return formatted;
    };

    let profile = get_profile(&state.db, user_id).await.ok().flatten();
    let prompt = response_prompt(&formatted, profile.as_ref(), &step.instruction);

    match agent.invoke(&prompt).await {
        Ok(response) => {
            let text = flatten(&response);
            if text.is_empty() || text == "No clear response found" {
                formatted
            } else {
                text
            }
        }
        Err(e) => {
            warn!(error = %e, "retrieval response call failed, returning raw data");
            formatted
        }
    }
}

fn response_prompt(retrieved: &str, profile: Option<&UserProfile>, question: &str) -> String {
    let today = format_long_date(OffsetDateTime::now_utc().date());
    let (goal, restrictions, allergies) = match profile {
        Some(p) => (
            p.health_goal.clone().unwrap_or_else(|| "General Health".into()),
            p.dietary_restrictions.clone().unwrap_or_else(|| "None".into()),
            p.food_allergies.clone().unwrap_or_else(|| "None".into()),
        ),
        None => ("General Health".into(), "None".into(), "None".into()),
    };

    format!(
        "You are a nutrition assistant. The user asked about their meals and we retrieved this data:\n\n\
         TODAY'S DATE: {today}\n\n\
         {retrieved}\n\
         USER PROFILE:\n\
         - Goal: {goal}\n\
         - Dietary Restrictions: {restrictions}\n\
         - Allergies: {allergies}\n\n\
         Generate a helpful, conversational response that:\n\
         1. Presents the meal information clearly\n\
         2. Relates it to their health goals\n\
         3. Offers any relevant tips or suggestions\n\
         4. Keeps it concise and friendly\n\
         5. CRITICAL: STRICTLY respect the user's dietary restrictions and allergies. NEVER suggest foods they cannot eat.\n\n\
         User question: \"{question}\""
    )
}

fn display_number(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => "N/A".into(),
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
