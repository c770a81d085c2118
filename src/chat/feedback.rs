//! Long-term preference memory: formatting learned preferences for
//! prompts and extracting new ones from each user message. Extraction
//! runs after the reply and is strictly best-effort.

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::agent::response::{extract_json, flatten};
use crate::profiles::repo::{record_preference, PreferenceSet};
use crate::state::AppState;

pub fn format_preferences_for_prompt(prefs: &PreferenceSet) -> String {
    if prefs.likes.is_empty() && prefs.dislikes.is_empty() && prefs.cuisines.is_empty() {
        return "No learned preferences yet.".to_string();
    }

    let mut lines = Vec::new();
    if !prefs.likes.is_empty() {
        lines.push(format!("- Likes: {}", prefs.likes.join(", ")));
    }
    if !prefs.dislikes.is_empty() {
        lines.push(format!("- Dislikes: {}", prefs.dislikes.join(", ")));
    }
    if !prefs.cuisines.is_empty() {
        lines.push(format!("- Preferred cuisines: {}", prefs.cuisines.join(", ")));
    }
    lines.join("\n")
}

/// Pull `{name, kind}` preference facts out of a message and upsert
/// them. Every failure mode is silent: feedback never affects the reply.
pub async fn extract_and_store(state: &AppState, user_id: Uuid, message: &str) {
    let Some(agent) = state.agent_ref() else { return };

    let prompt = format!(
        "Extract food preferences from this user message, if any.\n\
         Message: \"{message}\"\n\n\
         Look for foods the user likes, dislikes, or cuisines they favour.\n\
         Return ONLY a JSON list (possibly empty) of objects:\n\
         [{{\"name\": \"food or cuisine\", \"kind\": \"like|dislike|cuisine\"}}]"
    );

    let extracted = match agent.invoke(&prompt).await {
        Ok(response) => extract_json(&flatten(&response)),
        Err(e) => {
            debug!(error = %e, "feedback extraction call failed");
            return;
        }
    };
    let Some(Value::Array(items)) = extracted else {
        return;
    };

    for item in items {
        let (Some(name), Some(kind)) = (
            item.get("name").and_then(Value::as_str),
            item.get("kind").and_then(Value::as_str),
        ) else {
            continue;
        };
        if !matches!(kind, "like" | "dislike" | "cuisine") || name.trim().is_empty() {
            continue;
        }
        if let Err(e) = record_preference(&state.db, user_id, kind, name).await {
            debug!(error = %e, "failed to record preference");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_present_sections_only() {
        let prefs = PreferenceSet {
            likes: vec!["salmon".into(), "oats".into()],
            dislikes: vec![],
            cuisines: vec!["thai".into()],
        };
        let text = format_preferences_for_prompt(&prefs);
        assert!(text.contains("- Likes: salmon, oats"));
        assert!(!text.contains("Dislikes"));
        assert!(text.contains("- Preferred cuisines: thai"));
    }

    #[test]
    fn empty_preferences_get_a_placeholder() {
        assert_eq!(
            format_preferences_for_prompt(&PreferenceSet::default()),
            "No learned preferences yet."
        );
    }
}
