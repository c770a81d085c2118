//! Free-form calorie estimation for meals eaten outside the plan
//! (restaurants, buffets). Entirely delegated to the agent.

use tracing::warn;

use crate::agent::response::flatten;
use crate::agent::AgentClient;

const OFFLINE_REPLY: &str = "I'm currently in offline mode.";

pub async fn estimate_calories(agent: Option<&dyn AgentClient>, description: &str) -> String {
    let Some(agent) = agent else {
        return OFFLINE_REPLY.to_string();
    };

    let prompt = format!(
        "You are an expert nutritionist and calorie estimator.\n\
         The user will describe a meal (e.g., from a buffet, restaurant, or home cooking).\n\n\
         Your task is to:\n\
         1. Analyze the food items described.\n\
         2. Estimate portion sizes if not specified (make reasonable assumptions based on standard servings).\n\
         3. Calculate the approximate Calories and Macronutrients (Protein, Carbs, Fat) for each item and the total.\n\
         4. Provide a clear breakdown.\n\
         5. Offer a brief, non-judgmental health tip regarding this meal.\n\n\
         Format the output using Markdown:\n\
         - Use bold for totals.\n\
         - Use a list for the breakdown.\n\n\
         Meal description: \"{description}\""
    );

    match agent.invoke(&prompt).await {
        Ok(response) => flatten(&response),
        Err(e) => {
            warn!(error = %e, "calorie estimation call failed");
            format!("Error generating response: {}", e)
        }
    }
}
