//! Per-turn orchestration: one planner call decomposes the message into
//! typed steps, which run sequentially with per-step error isolation.
//! The consolidated reply is the step outputs joined by blank lines, and
//! the turn always produces some text, whatever failed along the way.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::agent::response::{extract_json, flatten};
use crate::agent::AgentClient;
use crate::chat::{
    adjustment, estimation, feedback, monitor, retrieval, ChatAction, ChatEvent, ChatStep,
    ChatTurn,
};
use crate::plans::prompt::{format_iso_date, format_long_date, parse_iso_date};
use crate::profiles::repo::{self, PreferenceSet};
use crate::state::AppState;

const FALLBACK_REPLY: &str = "I couldn't generate a response. Please try again.";
const PROCESSED_REPLY: &str = "I processed your request.";
const OFFLINE_REPLY: &str = "I'm currently in offline mode.";

/// Blocking variant of the turn: drains the stream internally and
/// returns the final text.
pub async fn run_chat(state: AppState, turn: ChatTurn) -> String {
    let (tx, mut rx) = mpsc::channel(64);
    let handle = tokio::spawn(run_chat_stream(state, turn, tx));

    let mut reply = String::new();
    while let Some(event) = rx.recv().await {
        if let ChatEvent::Content(text) = event {
            reply.push_str(&text);
        }
    }
    let _ = handle.await;

    if reply.trim().is_empty() {
        PROCESSED_REPLY.to_string()
    } else {
        reply
    }
}

/// Streamed turn: status events while the steps execute, then one
/// content event with the consolidated reply, then feedback extraction.
pub async fn run_chat_stream(state: AppState, turn: ChatTurn, tx: mpsc::Sender<ChatEvent>) {
    let status = |text: &str| {
        let tx = tx.clone();
        let text = text.to_string();
        async move {
            let _ = tx.send(ChatEvent::Status(text)).await;
        }
    };

    status("Loading your preferences...").await;
    let preferences = repo::load_preferences(&state.db, turn.user_id)
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to load preferences");
            PreferenceSet::default()
        });

    status("Planning your request...").await;
    let steps = plan_steps(state.agent_ref(), &turn.message).await;
    debug!(count = steps.len(), "planned chat steps");

    let mut outputs: Vec<String> = Vec::new();
    let mut index = 0;
    while index < steps.len() {
        let step = &steps[index];
        match step.action {
            ChatAction::MealAdjustment => {
                status("Processing meal adjustment...").await;
                outputs.push(run_adjustment_step(&state, turn.user_id, step).await);
            }
            ChatAction::MealRetrieval => {
                status("Searching your meal plan...").await;
                outputs.push(retrieval::retrieve_and_respond(&state, turn.user_id, step).await);
            }
            ChatAction::CalorieEstimation => {
                status("Analyzing food items...").await;
                outputs.push(
                    estimation::estimate_calories(state.agent_ref(), &step.instruction).await,
                );
            }
            ChatAction::GeneralChat => {
                status("Thinking...").await;
                outputs.push(general_chat_reply(&state, &turn, &preferences).await);
            }
        }
        index += 1;
    }

    let reply: String = {
        let joined = outputs
            .iter()
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        if joined.is_empty() {
            FALLBACK_REPLY.to_string()
        } else {
            joined
        }
    };
    let _ = tx.send(ChatEvent::Content(reply)).await;

    // Memory update happens after the user already has their reply.
    feedback::extract_and_store(&state, turn.user_id, &turn.message).await;
}

/// Adjustment plus the monitoring pass over the recomputed totals.
async fn run_adjustment_step(state: &AppState, user_id: Uuid, step: &ChatStep) -> String {
    let date = step
        .date
        .unwrap_or_else(|| time::OffsetDateTime::now_utc().date());
    let meal_type = step.meal_type.as_deref().unwrap_or("lunch");

    let result = adjustment::adjust_meal(state, user_id, date, meal_type, &step.instruction).await;

    let warnings = if result.success {
        match repo::get_profile(&state.db, user_id).await {
            Ok(Some(profile)) => result
                .new_daily_total
                .as_ref()
                .map(|totals| monitor::check_daily_totals(&profile, totals))
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    } else {
        Vec::new()
    };

    format_adjustment_reply(&result, &warnings)
}

pub fn format_adjustment_reply(
    result: &adjustment::AdjustmentResult,
    warnings: &[String],
) -> String {
    if !result.success {
        return result.message.clone();
    }

    let mut reply = format!("{}\n\n**New Daily Total:**\n", result.message);
    if let Some(totals) = &result.new_daily_total {
        let line = |key: &str| {
            totals
                .get(key)
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
                .to_string()
        };
        reply.push_str(&format!("- Calories: {} kcal\n", line("calories")));
        reply.push_str(&format!("- Protein: {}g\n", line("protein_g")));
        reply.push_str(&format!("- Carbs: {}g\n", line("carbohydrates_g")));
        reply.push_str(&format!("- Fat: {}g\n", line("fat_g")));
        reply.push_str(&format!("- Fiber: {}g\n", line("fiber_g")));
    }

    if !warnings.is_empty() {
        reply.push_str("\n**Health Alerts:**\n");
        for warning in warnings {
            reply.push_str(warning);
            reply.push('\n');
        }
    }

    reply
}

/// One planner call turning the message into an ordered step list. Any
/// failure (offline agent, transport error, unparseable output, no
/// valid steps) falls back to a single general_chat step.
pub async fn plan_steps(agent: Option<&dyn AgentClient>, message: &str) -> Vec<ChatStep> {
    let fallback = vec![ChatStep::general(message)];

    let Some(agent) = agent else {
        return fallback;
    };

    let today = time::OffsetDateTime::now_utc().date();
    let prompt = planner_prompt(message, &format_long_date(today), today.year());

    let planned = match agent.invoke(&prompt).await {
        Ok(response) => extract_json(&flatten(&response)),
        Err(e) => {
            warn!(error = %e, "chat planner call failed");
            return fallback;
        }
    };

    let steps = planned
        .map(|value| parse_steps(&value, message))
        .unwrap_or_default();
    if steps.is_empty() {
        return fallback;
    }
    steps
}

fn planner_prompt(message: &str, today_long: &str, year: i32) -> String {
    format!(
        "You are the routing planner for a nutrition assistant.\n\
         TODAY'S DATE: {today_long}\n\n\
         Decompose the user's message into an ordered list of actions. Available actions:\n\
         - \"meal_adjustment\": the user ate something different or wants a stored meal changed (add/remove/replace items, report a restaurant meal).\n\
         - \"meal_retrieval\": the user asks what is on their plan (a day, a meal, ingredients).\n\
         - \"calorie_estimation\": the user describes food not on the plan and wants calories/macros estimated.\n\
         - \"general_chat\": anything else (nutrition advice, greetings, questions).\n\n\
         User message: \"{message}\"\n\n\
         Return ONLY a JSON list of steps in execution order:\n\
         [{{\"action\": \"meal_adjustment|meal_retrieval|calorie_estimation|general_chat\",\n\
            \"date\": \"YYYY-MM-DD or null (assume year {year} when unstated)\",\n\
            \"meal_type\": \"breakfast|lunch|dinner|snacks or null\",\n\
            \"instruction\": \"what this step should do, in the user's words\"}}]"
    )
}

/// Tolerant parse of the planner output: accepts a bare list or a
/// `{\"steps\": [...]}` wrapper, skips entries with unknown actions.
pub fn parse_steps(value: &Value, original_message: &str) -> Vec<ChatStep> {
    let items = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("steps") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    let mut steps = Vec::new();
    for item in items {
        let Some(action) = item
            .get("action")
            .and_then(Value::as_str)
            .and_then(ChatAction::parse)
        else {
            continue;
        };

        let date = item
            .get("date")
            .and_then(Value::as_str)
            .and_then(parse_iso_date);
        let meal_type = item
            .get("meal_type")
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .filter(|m| matches!(m.as_str(), "breakfast" | "lunch" | "dinner" | "snacks"));
        let instruction = item
            .get("instruction")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(original_message)
            .to_string();

        steps.push(ChatStep {
            action,
            date,
            meal_type,
            instruction,
        });
    }
    steps
}

/// Free-form reply grounded in profile, learned preferences and the
/// current context snapshot, with up to five history turns replayed.
async fn general_chat_reply(
    state: &AppState,
    turn: &ChatTurn,
    preferences: &PreferenceSet,
) -> String {
    let Some(agent) = state.agent_ref() else {
        return OFFLINE_REPLY.to_string();
    };

    let profile = repo::get_profile(&state.db, turn.user_id).await.ok().flatten();

    let inventory_summary = match &turn.inventory_summary {
        Some(summary) => summary.clone(),
        None => build_inventory_summary(state, turn.user_id).await,
    };
    let meal_plan_summary = match &turn.meal_plan_summary {
        Some(summary) => summary.clone(),
        None => build_plan_summary(state, turn.user_id).await,
    };

    let (username, goal, restrictions, allergies) = match &profile {
        Some(p) => (
            p.username.clone(),
            p.health_goal.clone().unwrap_or_else(|| "General Health".into()),
            p.dietary_restrictions.clone().unwrap_or_else(|| "None".into()),
            p.food_allergies.clone().unwrap_or_else(|| "None".into()),
        ),
        None => ("User".into(), "General Health".into(), "None".into(), "None".into()),
    };

    let mut prompt = format!(
        "You are a helpful nutrition and meal planning assistant.\n\n\
         TODAY'S DATE: {}\n\n\
         USER PROFILE:\n\
         - Name: {}\n\
         - Goal: {}\n\
         - Dietary Restrictions: {}\n\
         - Allergies: {}\n\n\
         USER PREFERENCES (LEARNED):\n{}\n\n\
         CURRENT INVENTORY:\n{}\n\n\
         MEAL PLAN SUMMARY:\n{}\n\n\
         YOUR ROLE:\n\
         - Provide nutrition advice and cooking tips considering user preferences\n\
         - Answer health and wellness questions\n\
         - Be encouraging and supportive\n\
         - Keep responses concise and helpful\n\
         - IMPORTANT: Respect user dislikes and preferences in your suggestions\n\
         - CRITICAL: STRICTLY respect the user's dietary restrictions and allergies. NEVER suggest foods they cannot eat.\n",
        format_long_date(time::OffsetDateTime::now_utc().date()),
        username,
        goal,
        restrictions,
        allergies,
        feedback::format_preferences_for_prompt(preferences),
        truncate(&inventory_summary, 500),
        truncate(&meal_plan_summary, 300),
    );

    // Replay recent history, dropping leading assistant turns so the
    // transcript starts with the user.
    let recent: Vec<_> = turn.history.iter().rev().take(5).rev().collect();
    let start = recent
        .iter()
        .position(|m| m.role == "user")
        .unwrap_or(recent.len());
    if start < recent.len() {
        prompt.push_str("\nCONVERSATION SO FAR:\n");
        for message in &recent[start..] {
            let speaker = if message.role == "user" { "User" } else { "Assistant" };
            prompt.push_str(&format!("{}: {}\n", speaker, message.content));
        }
    }

    prompt.push_str(&format!("\nUser: {}\nAssistant:", turn.message));

    match agent.invoke(&prompt).await {
        Ok(response) => {
            let text = flatten(&response);
            if text.is_empty() || text == "No clear response found" {
                FALLBACK_REPLY.to_string()
            } else {
                text
            }
        }
        Err(e) => {
            warn!(error = %e, "general chat call failed");
            format!("Error generating response: {}", e)
        }
    }
}

async fn build_inventory_summary(state: &AppState, user_id: Uuid) -> String {
    match repo::list_inventory(&state.db, user_id).await {
        Ok(items) if !items.is_empty() => items
            .iter()
            .map(|i| format!("{} ({} {})", i.item_name, i.quantity, i.unit))
            .collect::<Vec<_>>()
            .join(", "),
        _ => "No inventory recorded.".to_string(),
    }
}

async fn build_plan_summary(state: &AppState, user_id: Uuid) -> String {
    let row = sqlx::query_as::<_, (time::Date, time::Date, Option<Value>)>(
        r#"
        SELECT start_date, end_date, week_summary
          FROM meal_plans
         WHERE user_id = $1 AND status = 'ACTIVE'
         ORDER BY created_at DESC
         LIMIT 1
        "#,
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .ok()
    .flatten();

    match row {
        Some((start, end, summary)) => {
            let calories = summary
                .as_ref()
                .and_then(|s| s.get("average_daily_calories"))
                .and_then(Value::as_i64)
                .map(|c| format!(", averaging {} kcal/day", c))
                .unwrap_or_default();
            format!(
                "Active plan from {} to {}{}.",
                format_iso_date(start),
                format_iso_date(end),
                calories
            )
        }
        None => "No active meal plan.".to_string(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::date;

    #[test]
    fn parse_steps_accepts_list_with_parameters() {
        let value = json!([
            {"action": "meal_adjustment", "date": "2025-01-13", "meal_type": "Lunch",
             "instruction": "remove olives from lunch"},
            {"action": "meal_retrieval", "date": null, "meal_type": null,
             "instruction": "what's for dinner"}
        ]);
        let steps = parse_steps(&value, "original");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].action, ChatAction::MealAdjustment);
        assert_eq!(steps[0].date, Some(date!(2025 - 01 - 13)));
        assert_eq!(steps[0].meal_type.as_deref(), Some("lunch"));
        assert_eq!(steps[0].instruction, "remove olives from lunch");
        assert_eq!(steps[1].action, ChatAction::MealRetrieval);
        assert_eq!(steps[1].date, None);
    }

    #[test]
    fn parse_steps_accepts_wrapped_object_and_skips_unknown_actions() {
        let value = json!({"steps": [
            {"action": "order_pizza", "instruction": "nope"},
            {"action": "general_chat"}
        ]});
        let steps = parse_steps(&value, "hello there");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action, ChatAction::GeneralChat);
        // Missing instruction falls back to the original message.
        assert_eq!(steps[0].instruction, "hello there");
    }

    #[test]
    fn parse_steps_rejects_non_step_values() {
        assert!(parse_steps(&json!("just text"), "m").is_empty());
        assert!(parse_steps(&json!({"reply": "hi"}), "m").is_empty());
        assert!(parse_steps(&json!([1, 2, 3]), "m").is_empty());
    }

    #[tokio::test]
    async fn offline_planner_falls_back_to_general_chat() {
        let steps = plan_steps(None, "can you adjust my lunch?").await;
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action, ChatAction::GeneralChat);
        assert_eq!(steps[0].instruction, "can you adjust my lunch?");
    }

    #[test]
    fn adjustment_reply_includes_totals_and_warnings() {
        let result = adjustment::AdjustmentResult {
            success: true,
            message: "Successfully updated lunch. New item: Rice Bowl.".into(),
            new_daily_total: Some(json!({
                "calories": 2500.0, "protein_g": 110.0, "carbohydrates_g": 260.0,
                "fat_g": 80.0, "fiber_g": 28.0
            })),
        };
        let warnings = vec!["Daily calories (2500 kcal) now exceed your 2000 kcal target by more than 20%.".to_string()];

        let reply = format_adjustment_reply(&result, &warnings);
        assert!(reply.contains("Successfully updated lunch"));
        assert!(reply.contains("**New Daily Total:**"));
        assert!(reply.contains("- Calories: 2500 kcal"));
        assert!(reply.contains("- Protein: 110g"));
        assert!(reply.contains("**Health Alerts:**"));
        assert!(reply.contains("exceed your 2000 kcal target"));
    }

    #[test]
    fn failed_adjustment_reply_is_just_the_message() {
        let result = adjustment::AdjustmentResult {
            success: false,
            message: "No meal plan found for this date.".into(),
            new_daily_total: None,
        };
        let reply = format_adjustment_reply(&result, &[]);
        assert_eq!(reply, "No meal plan found for this date.");
    }

    #[test]
    fn truncate_caps_long_context() {
        let long = "x".repeat(600);
        assert_eq!(truncate(&long, 500).chars().count(), 503);
        assert_eq!(truncate("short", 500), "short");
    }
}
