//! Per-user plan generation: two batched agent calls (days 1-4 and 5-7)
//! merged into one week, with the deterministic mock as the fallback for
//! every failure mode.

use serde_json::Value;
use time::Date;
use tracing::{debug, info, warn};

use crate::agent::response::{extract_json, flatten};
use crate::agent::AgentClient;
use crate::plans::error::PlanError;
use crate::plans::merge::merge_batches;
use crate::plans::mock::generate_mock_plan;
use crate::plans::prompt::{
    build_consolidation_prompt, build_plan_prompt, build_suggestions_prompt,
};
use crate::profiles::repo::{UserData, UserProfile};

pub const GENERATED_BY_AGENT: &str = "AGENT";
pub const GENERATED_BY_MOCK: &str = "MOCK";

#[derive(Debug, Clone)]
pub struct GeneratedPlan {
    pub plan: Value,
    pub generated_by: &'static str,
}

/// Generate one user's 7-day plan. Never fails: any agent, extraction or
/// merge problem degrades to the template plan.
pub async fn generate_plan(
    agent: Option<&dyn AgentClient>,
    data: &UserData,
    start_date: Date,
) -> GeneratedPlan {
    if let Some(agent) = agent {
        match generate_via_agent(agent, data, start_date).await {
            Ok(plan) => {
                info!(user_id = %data.profile.user_id, "generated plan via agent");
                return GeneratedPlan {
                    plan,
                    generated_by: GENERATED_BY_AGENT,
                };
            }
            Err(e) => {
                warn!(user_id = %data.profile.user_id, error = %e, "agent generation failed, using mock plan");
            }
        }
    }

    GeneratedPlan {
        plan: generate_mock_plan(&data.profile, start_date),
        generated_by: GENERATED_BY_MOCK,
    }
}

async fn generate_via_agent(
    agent: &dyn AgentClient,
    data: &UserData,
    start_date: Date,
) -> Result<Value, PlanError> {
    let prompt_1 = build_plan_prompt(
        &data.profile,
        &data.inventory,
        &data.preferences,
        &data.previous_meals,
        1,
        4,
        None,
        start_date,
    );
    let batch_1 = invoke_and_extract(agent, &prompt_1).await?;

    let context = batch_context(&batch_1);

    let prompt_2 = build_plan_prompt(
        &data.profile,
        &data.inventory,
        &data.preferences,
        &data.previous_meals,
        5,
        3,
        context.as_deref(),
        start_date,
    );
    let batch_2 = invoke_and_extract(agent, &prompt_2).await?;

    merge_batches(batch_1, batch_2, data.inventory.len(), start_date)
        .ok_or(PlanError::Validation)
}

async fn invoke_and_extract(agent: &dyn AgentClient, prompt: &str) -> Result<Value, PlanError> {
    let response = agent
        .invoke(prompt)
        .await
        .map_err(|e| PlanError::Agent(e.to_string()))?;
    let text = flatten(&response);
    match extract_json(&text) {
        Some(parsed) => Ok(parsed),
        None => {
            debug!(raw = %text.chars().take(500).collect::<String>(), "could not extract JSON");
            Err(PlanError::Extraction)
        }
    }
}

/// Summarize batch 1's meals so batch 2 can avoid duplicating them or
/// re-consuming the same inventory.
fn batch_context(batch: &Value) -> Option<String> {
    let days = batch.pointer("/meal_plan/days")?.as_array()?;

    let mut planned: Vec<String> = Vec::new();
    for day in days {
        let Some(meals) = day.get("meals").and_then(Value::as_object) else {
            continue;
        };
        for (meal_type, meal) in meals {
            if let Some(name) = meal.get("meal_name").and_then(Value::as_str) {
                planned.push(format!("{} ({})", name, meal_type));
            }
        }
    }

    if planned.is_empty() {
        return None;
    }
    Some(format!("Meals planned so far:\n- {}", planned.join("\n- ")))
}

/// Best-effort shopping-list cleanup by the agent: merge near-duplicate
/// names, normalize units. Anything short of a parsed JSON object keeps
/// the pre-consolidation list.
pub async fn consolidate_shopping_list(agent: Option<&dyn AgentClient>, plan: &mut Value) {
    let Some(agent) = agent else { return };

    let shopping = match plan.pointer("/recommendations/shopping_list_summary") {
        Some(Value::Object(map)) if !map.is_empty() => Value::Object(map.clone()),
        _ => return,
    };

    let prompt = build_consolidation_prompt(&shopping);
    let consolidated = invoke_and_extract(agent, &prompt).await.ok();

    match consolidated {
        Some(value @ Value::Object(_)) => {
            if let Some(slot) = plan.pointer_mut("/recommendations/shopping_list_summary") {
                *slot = value;
                debug!("shopping list consolidated");
            }
        }
        _ => debug!("failed to parse consolidated list, keeping original"),
    }
}

/// One more agent call producing next-week purchase suggestions, patched
/// into `week_summary.future_suggestions`. The only mutation a stored
/// plan's summary receives after creation; empty result on any failure.
pub async fn refresh_future_suggestions(
    agent: Option<&dyn AgentClient>,
    profile: &UserProfile,
    plan: &mut Value,
) {
    let Some(agent) = agent else { return };

    let utilization = plan
        .pointer("/meal_plan/week_summary/inventory_utilization_rate")
        .cloned()
        .unwrap_or(Value::from(0));
    let plan_summary = format!(
        "Current Plan Inventory Utilization: {}%. The plan covers 7 days.",
        utilization
    );

    let prompt = build_suggestions_prompt(profile, &plan_summary);
    let suggestions = match invoke_and_extract(agent, &prompt).await.ok() {
        Some(Value::Array(items)) => items,
        Some(Value::Object(map)) => match map.get("future_suggestions") {
            Some(Value::Array(items)) => items.clone(),
            _ => return,
        },
        _ => return,
    };

    if let Some(Value::Object(summary)) = plan.pointer_mut("/meal_plan/week_summary") {
        summary.insert("future_suggestions".into(), Value::Array(suggestions));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentResponse;
    use crate::profiles::repo::PreferenceSet;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use time::macros::date;
    use uuid::Uuid;

    /// Replays a fixed queue of responses, one per invoke.
    struct ScriptedAgent {
        responses: Mutex<Vec<anyhow::Result<AgentResponse>>>,
    }

    impl ScriptedAgent {
        fn new(responses: Vec<anyhow::Result<AgentResponse>>) -> Self {
            let mut responses = responses;
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl AgentClient for ScriptedAgent {
        async fn invoke(&self, _prompt: &str) -> anyhow::Result<AgentResponse> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
        }
    }

    fn user_data() -> UserData {
        UserData {
            profile: UserProfile {
                user_id: Uuid::new_v4(),
                username: "kim".into(),
                age: Some(35),
                gender: Some("Female".into()),
                height_cm: Some(170.0),
                weight_kg: Some(65.0),
                bmi: Some(22.5),
                activity_level: Some("Very active".into()),
                health_goal: Some("Muscle Gain".into()),
                dietary_restrictions: None,
                food_allergies: None,
                preferred_cuisines: None,
                daily_calories: Some(2600),
                daily_protein: Some(104.0),
                daily_carbohydrate: Some(300.0),
                daily_fat: Some(72.0),
                daily_fiber: Some(30.0),
            },
            inventory: vec![],
            previous_meals: vec![],
            preferences: PreferenceSet::default(),
        }
    }

    fn batch(days: usize) -> Value {
        let day = json!({
            "day": 1,
            "day_name": "Someday",
            "total_nutrition": {"calories": 2600, "protein_g": 104.0, "carbohydrates_g": 300.0, "fat_g": 72.0, "fiber_g": 30.0},
            "meals": {"breakfast": {"meal_name": "Oats"}}
        });
        json!({
            "user_summary": {},
            "meal_plan": {"days": vec![day; days], "week_summary": {}},
            "recommendations": {"shopping_list_summary": {
                "proteins": [], "total_estimated_cost": 0.0,
                "total_items_from_inventory": 0, "total_items_to_purchase": 0
            }},
            "metadata": {}
        })
    }

    #[tokio::test]
    async fn offline_generation_uses_the_mock_plan() {
        let generated = generate_plan(None, &user_data(), date!(2025 - 01 - 10)).await;
        assert_eq!(generated.generated_by, GENERATED_BY_MOCK);
        assert_eq!(
            generated.plan.pointer("/meal_plan/days").unwrap().as_array().unwrap().len(),
            7
        );
    }

    #[tokio::test]
    async fn two_good_batches_merge_into_an_agent_plan() {
        let agent = ScriptedAgent::new(vec![
            Ok(AgentResponse(Value::String(batch(4).to_string()))),
            Ok(AgentResponse(Value::String(batch(3).to_string()))),
        ]);
        let generated = generate_plan(Some(&agent), &user_data(), date!(2025 - 01 - 10)).await;
        assert_eq!(generated.generated_by, GENERATED_BY_AGENT);
        assert_eq!(
            generated.plan.pointer("/meal_plan/days").unwrap().as_array().unwrap().len(),
            7
        );
    }

    #[tokio::test]
    async fn failed_batch_falls_back_to_mock() {
        let agent = ScriptedAgent::new(vec![
            Ok(AgentResponse(Value::String(batch(4).to_string()))),
            Ok(AgentResponse(Value::String("no json in sight".into()))),
        ]);
        let generated = generate_plan(Some(&agent), &user_data(), date!(2025 - 01 - 10)).await;
        assert_eq!(generated.generated_by, GENERATED_BY_MOCK);
    }

    #[tokio::test]
    async fn agent_error_falls_back_to_mock() {
        let agent = ScriptedAgent::new(vec![Err(anyhow::anyhow!("connection refused"))]);
        let generated = generate_plan(Some(&agent), &user_data(), date!(2025 - 01 - 10)).await;
        assert_eq!(generated.generated_by, GENERATED_BY_MOCK);
    }

    #[tokio::test]
    async fn consolidation_keeps_original_list_on_bad_output() {
        let mut plan = batch(7);
        let before = plan.pointer("/recommendations/shopping_list_summary").cloned();

        let agent = ScriptedAgent::new(vec![Ok(AgentResponse(Value::String(
            "[1, 2, 3]".into(),
        )))]);
        consolidate_shopping_list(Some(&agent), &mut plan).await;
        assert_eq!(plan.pointer("/recommendations/shopping_list_summary").cloned(), before);
    }

    #[tokio::test]
    async fn consolidation_replaces_list_with_returned_object() {
        let mut plan = batch(7);
        let replacement = json!({"proteins": [{"item": "Tofu"}]});
        let agent = ScriptedAgent::new(vec![Ok(AgentResponse(Value::String(
            replacement.to_string(),
        )))]);
        consolidate_shopping_list(Some(&agent), &mut plan).await;
        assert_eq!(
            plan.pointer("/recommendations/shopping_list_summary/proteins/0/item"),
            Some(&json!("Tofu"))
        );
    }

    #[tokio::test]
    async fn suggestions_accept_list_or_wrapped_object() {
        let data = user_data();
        let mut plan = batch(7);
        let agent = ScriptedAgent::new(vec![Ok(AgentResponse(Value::String(format!(
            "Here you go:\n{}",
            json!([{"item": "Avocado", "reason": "fats", "category": "Produce"}])
        ))))]);
        refresh_future_suggestions(Some(&agent), &data.profile, &mut plan).await;
        assert_eq!(
            plan.pointer("/meal_plan/week_summary/future_suggestions/0/item"),
            Some(&json!("Avocado"))
        );

        let mut plan = batch(7);
        let agent = ScriptedAgent::new(vec![Ok(AgentResponse(Value::String(
            json!({"future_suggestions": [{"item": "Lentils"}]}).to_string(),
        )))]);
        refresh_future_suggestions(Some(&agent), &data.profile, &mut plan).await;
        assert_eq!(
            plan.pointer("/meal_plan/week_summary/future_suggestions/0/item"),
            Some(&json!("Lentils"))
        );
    }
}
