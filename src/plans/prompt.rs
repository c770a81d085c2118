//! Prompt rendering for the hosted agent. Pure string formatting: no
//! side effects, no validation of what comes back.

use std::fmt::Write as _;

use serde_json::Value;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::Date;

use crate::profiles::repo::{group_inventory, InventoryItem, PreferenceSet, UserProfile};

const LONG_DATE: &[FormatItem<'static>] =
    format_description!("[weekday repr:long], [month repr:long] [day padding:none], [year]");

const ISO_DATE: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// "Monday, January 13, 2025"
pub fn format_long_date(date: Date) -> String {
    date.format(LONG_DATE).unwrap_or_else(|_| date.to_string())
}

pub fn format_iso_date(date: Date) -> String {
    date.format(ISO_DATE).unwrap_or_else(|_| date.to_string())
}

pub fn parse_iso_date(text: &str) -> Option<Date> {
    Date::parse(text.trim(), ISO_DATE).ok()
}

/// Calendar date of a 1-indexed plan day relative to the week start.
pub fn date_for_day(start_date: Date, day: u32) -> Date {
    start_date + time::Duration::days(i64::from(day) - 1)
}

/// Render the generation request for one batch of days
/// `[start_day, start_day + num_days)`. Every day is listed with its
/// literal calendar date so the agent cannot drift off the real week;
/// for a follow-up batch the already-covered range and the meals planned
/// so far are spelled out to avoid duplication.
pub fn build_plan_prompt(
    profile: &UserProfile,
    inventory: &[InventoryItem],
    preferences: &PreferenceSet,
    previous_meals: &[String],
    start_day: u32,
    num_days: u32,
    previous_plan_context: Option<&str>,
    start_date: Date,
) -> String {
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "You are a meal planning assistant. Create a personalized meal plan covering day {} through day {} of the user's week.",
        start_day,
        start_day + num_days - 1
    );

    prompt.push_str("\nPLAN DATES:\n");
    for day in start_day..start_day + num_days {
        let _ = writeln!(
            prompt,
            "- Day {}: {}",
            day,
            format_long_date(date_for_day(start_date, day))
        );
    }

    if start_day > 1 {
        let _ = writeln!(
            prompt,
            "\nDays 1-{} of this week ({} through {}) are already planned.",
            start_day - 1,
            format_long_date(start_date),
            format_long_date(date_for_day(start_date, start_day - 1))
        );
    }

    prompt.push_str("\nUSER PROFILE:\n");
    let _ = writeln!(prompt, "- Name: {}", profile.username);
    if let Some(age) = profile.age {
        let _ = writeln!(prompt, "- Age: {}", age);
    }
    if let Some(gender) = &profile.gender {
        let _ = writeln!(prompt, "- Gender: {}", gender);
    }
    let _ = writeln!(
        prompt,
        "- Health goal: {}",
        profile.health_goal.as_deref().unwrap_or("General Health")
    );
    let _ = writeln!(
        prompt,
        "- Activity level: {}",
        profile.activity_level.as_deref().unwrap_or("Moderately active")
    );

    prompt.push_str("\nDAILY NUTRITION TARGETS:\n");
    let _ = writeln!(prompt, "- Calories: {} kcal", profile.daily_calories.unwrap_or(2000));
    let _ = writeln!(prompt, "- Protein: {} g", profile.daily_protein.unwrap_or(100.0));
    let _ = writeln!(
        prompt,
        "- Carbohydrates: {} g",
        profile.daily_carbohydrate.unwrap_or(250.0)
    );
    let _ = writeln!(prompt, "- Fat: {} g", profile.daily_fat.unwrap_or(60.0));
    let _ = writeln!(prompt, "- Fiber: {} g", profile.daily_fiber.unwrap_or(30.0));

    let restrictions = profile.dietary_restrictions.as_deref().unwrap_or("None");
    let allergies = profile.food_allergies.as_deref().unwrap_or("None");
    let _ = writeln!(
        prompt,
        "\nDIETARY RESTRICTIONS (must be respected in every meal): {}",
        restrictions
    );
    let _ = writeln!(
        prompt,
        "FOOD ALLERGIES (NEVER include these or derived ingredients): {}",
        allergies
    );
    if let Some(cuisines) = &profile.preferred_cuisines {
        let _ = writeln!(prompt, "PREFERRED CUISINES: {}", cuisines);
    }

    if !preferences.likes.is_empty() || !preferences.dislikes.is_empty() {
        prompt.push_str("\nLEARNED PREFERENCES:\n");
        if !preferences.likes.is_empty() {
            let _ = writeln!(prompt, "- Likes: {}", preferences.likes.join(", "));
        }
        if !preferences.dislikes.is_empty() {
            let _ = writeln!(prompt, "- Dislikes: {}", preferences.dislikes.join(", "));
        }
        if !preferences.cuisines.is_empty() {
            let _ = writeln!(
                prompt,
                "- Favourite cuisines: {}",
                preferences.cuisines.join(", ")
            );
        }
    }

    prompt.push_str("\nAVAILABLE INVENTORY (prefer these before new purchases):\n");
    if inventory.is_empty() {
        prompt.push_str("- (empty)\n");
    } else {
        for (category, items) in group_inventory(inventory) {
            let listed: Vec<String> = items
                .iter()
                .map(|i| format!("{} ({} {})", i.item_name, i.quantity, i.unit))
                .collect();
            let _ = writeln!(prompt, "- {}: {}", category, listed.join(", "));
        }
    }

    if !previous_meals.is_empty() {
        prompt.push_str("\nMEALS FROM THE PREVIOUS PLAN (avoid repeating):\n");
        for meal in previous_meals {
            let _ = writeln!(prompt, "- {}", meal);
        }
    }

    if let Some(context) = previous_plan_context.filter(|c| !c.is_empty()) {
        let _ = writeln!(prompt, "\n{}", context);
        prompt.push_str(
            "Do not propose meals that rely on inventory items already consumed by the meals above, and do not repeat those meals.\n",
        );
    }

    prompt.push_str(
        "\nOUTPUT REQUIREMENTS:\n\
         Return ONLY a JSON object with top-level keys \"user_summary\", \"meal_plan\", \"recommendations\" and \"metadata\".\n\
         \"meal_plan.days\" must contain exactly one entry per day listed above, each with: \"day\" (number), \"day_name\", \
         \"total_nutrition\" {calories, protein_g, carbohydrates_g, fat_g, fiber_g}, \"inventory_impact\" {items_used, new_purchases_needed}, \
         and \"meals\" {breakfast, lunch, dinner, snacks}, each meal with \"meal_name\", \"ingredients_with_quantities\", \"nutrition\", \
         \"recipe\", \"preparation_time\" and \"cooking_time\".\n\
         \"recommendations\" must include \"shopping_list_summary\" with the categories proteins, produce, pantry, grains, vegetables, \
         fruits and dairy_alternatives (each an array of {item, total_quantity_needed, quantity_in_inventory, quantity_to_purchase, unit}) \
         plus total_estimated_cost, total_items_from_inventory and total_items_to_purchase.\n",
    );

    prompt
}

/// Ask the agent to merge near-duplicate shopping-list entries and
/// normalize units. Strictly best-effort: the caller keeps the original
/// list when anything about this goes wrong.
pub fn build_consolidation_prompt(shopping_list: &Value) -> String {
    format!(
        "Analyze and consolidate this shopping list to merge duplicate items and normalize units.\n\n\
         CURRENT LIST:\n{}\n\n\
         INSTRUCTIONS:\n\
         1. Merge items that are the same but named slightly differently (e.g., \"Onions\" vs \"Onion\").\n\
         2. If units are compatible (e.g., grams and kg, or count), sum the quantities.\n\
         3. If units are different and hard to convert (e.g., \"bunch\" vs \"g\"), keep the most descriptive one or estimate.\n\
         4. Ensure the output has the EXACT same JSON structure as the input (keys: proteins, produce, pantry, grains, vegetables, fruits, dairy_alternatives).\n\
         5. Return ONLY the JSON object.",
        serde_json::to_string_pretty(shopping_list).unwrap_or_else(|_| shopping_list.to_string())
    )
}

/// Ask for 5-10 next-week purchase suggestions tied to the user's goal.
pub fn build_suggestions_prompt(profile: &UserProfile, plan_summary: &str) -> String {
    format!(
        "Based on the user's profile and their current meal plan, suggest 5-10 inventory items for NEXT week.\n\n\
         USER PROFILE:\n\
         - Goal: {}\n\
         - Activity: {}\n\
         - Restrictions: {}\n\
         - Allergies: {}\n\n\
         CURRENT PLAN SUMMARY:\n{}\n\n\
         TASK:\n\
         Generate a list of 5-10 items to buy for NEXT week to improve variety and hit their goals.\n\
         - Ensure these items are NOT currently in inventory (assume the current plan uses most of it).\n\
         - Strictly respect allergies/restrictions.\n\
         - EXPLICITLY link each suggestion to the user's health goal.\n\n\
         Return ONLY a JSON list of objects with this format:\n\
         [{{\"item\": \"Name\", \"reason\": \"Why (linking to goal)\", \"category\": \"Category\", \"suggested_quantity\": 0, \"unit\": \"unit\"}}]",
        profile.health_goal.as_deref().unwrap_or("General Health"),
        profile.activity_level.as_deref().unwrap_or("Moderately active"),
        profile.dietary_restrictions.as_deref().unwrap_or("None"),
        profile.food_allergies.as_deref().unwrap_or("None"),
        plan_summary
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;
    use uuid::Uuid;

    fn profile() -> UserProfile {
        UserProfile {
            user_id: Uuid::new_v4(),
            username: "alex".into(),
            age: Some(30),
            gender: Some("Male".into()),
            height_cm: Some(180.0),
            weight_kg: Some(80.0),
            bmi: Some(24.7),
            activity_level: Some("Moderately active".into()),
            health_goal: Some("Weight Loss".into()),
            dietary_restrictions: Some("Vegetarian".into()),
            food_allergies: Some("Peanuts".into()),
            preferred_cuisines: Some("Italian".into()),
            daily_calories: Some(2200),
            daily_protein: Some(120.0),
            daily_carbohydrate: Some(250.0),
            daily_fat: Some(70.0),
            daily_fiber: Some(30.0),
        }
    }

    #[test]
    fn second_batch_prompt_embeds_literal_calendar_dates() {
        let prompt = build_plan_prompt(
            &profile(),
            &[],
            &PreferenceSet::default(),
            &[],
            5,
            3,
            Some("Meals planned so far:\n- Oats (breakfast)"),
            date!(2025 - 01 - 10),
        );

        // Friday Jan 10 start: batch days 5-7 are Jan 14-16, and the
        // already-planned range ends on Monday Jan 13.
        assert!(prompt.contains("Monday, January 13, 2025"));
        assert!(prompt.contains("Day 5: Tuesday, January 14, 2025"));
        assert!(prompt.contains("Day 7: Thursday, January 16, 2025"));
        assert!(prompt.contains("Days 1-4 of this week"));
        assert!(prompt.contains("Meals planned so far"));
        assert!(prompt.contains("Peanuts"));
        assert!(prompt.contains("Vegetarian"));
    }

    #[test]
    fn first_batch_prompt_has_no_prior_range() {
        let prompt = build_plan_prompt(
            &profile(),
            &[],
            &PreferenceSet::default(),
            &[],
            1,
            4,
            None,
            date!(2025 - 01 - 10),
        );
        assert!(prompt.contains("Day 1: Friday, January 10, 2025"));
        assert!(prompt.contains("Day 4: Monday, January 13, 2025"));
        assert!(!prompt.contains("already planned"));
    }

    #[test]
    fn iso_date_roundtrip() {
        let d = date!(2025 - 01 - 13);
        assert_eq!(format_iso_date(d), "2025-01-13");
        assert_eq!(parse_iso_date("2025-01-13"), Some(d));
        assert_eq!(parse_iso_date("not a date"), None);
    }
}
