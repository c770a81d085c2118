use std::collections::{BTreeMap, HashSet};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::Date;
use uuid::Uuid;

use crate::profiles::targets::NutritionTargets;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub bmi: Option<f64>,
    pub activity_level: Option<String>,
    pub health_goal: Option<String>,
    pub dietary_restrictions: Option<String>,
    pub food_allergies: Option<String>,
    pub preferred_cuisines: Option<String>,
    pub daily_calories: Option<i32>,
    pub daily_protein: Option<f64>,
    pub daily_carbohydrate: Option<f64>,
    pub daily_fat: Option<f64>,
    pub daily_fiber: Option<f64>,
}

const PROFILE_COLUMNS: &str = r#"user_id, username, age, gender, height_cm, weight_kg, bmi,
       activity_level, health_goal, dietary_restrictions, food_allergies,
       preferred_cuisines, daily_calories, daily_protein, daily_carbohydrate,
       daily_fat, daily_fiber"#;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryItem {
    pub inventory_id: Uuid,
    pub item_name: String,
    pub quantity: f64,
    pub unit: String,
    pub category: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DueSchedule {
    pub schedule_id: Uuid,
    pub user_id: Uuid,
    pub next_plan_date: Date,
}

/// Learned long-term preferences, formatted for prompts as the top 5
/// likes, 5 dislikes and 3 cuisines.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreferenceSet {
    pub likes: Vec<String>,
    pub dislikes: Vec<String>,
    pub cuisines: Vec<String>,
}

/// Everything the generator needs for one user, gathered up front.
#[derive(Debug, Clone)]
pub struct UserData {
    pub profile: UserProfile,
    pub inventory: Vec<InventoryItem>,
    pub previous_meals: Vec<String>,
    pub preferences: PreferenceSet,
}

pub async fn get_profile(db: &PgPool, user_id: Uuid) -> anyhow::Result<Option<UserProfile>> {
    let profile = sqlx::query_as::<_, UserProfile>(&format!(
        "SELECT {PROFILE_COLUMNS} FROM users WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("fetch user profile")?;
    Ok(profile)
}

/// Schedules due on or before `target_date`, one per user (a user can
/// have drifted into several ACTIVE rows; the first by user order wins,
/// the rest get deactivated on the next successful persist).
pub async fn fetch_due_schedules(db: &PgPool, target_date: Date) -> anyhow::Result<Vec<DueSchedule>> {
    let rows = sqlx::query_as::<_, DueSchedule>(
        r#"
        SELECT DISTINCT schedule_id, user_id, next_plan_date
          FROM planning_schedule
         WHERE next_plan_date <= $1
           AND status = 'ACTIVE'
         ORDER BY user_id
        "#,
    )
    .bind(target_date)
    .fetch_all(db)
    .await
    .context("fetch due schedules")?;

    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut unique = Vec::with_capacity(rows.len());
    for row in rows {
        if seen.insert(row.user_id) {
            unique.push(row);
        }
    }
    Ok(unique)
}

pub async fn list_inventory(db: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<InventoryItem>> {
    let rows = sqlx::query_as::<_, InventoryItem>(
        r#"
        SELECT inventory_id, item_name, quantity, unit, category
          FROM inventory
         WHERE user_id = $1 AND quantity > 0
         ORDER BY category, item_name
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await
    .context("fetch inventory")?;
    Ok(rows)
}

pub async fn add_inventory_item(
    db: &PgPool,
    user_id: Uuid,
    item_name: &str,
    quantity: f64,
    unit: &str,
    category: Option<&str>,
    notes: Option<&str>,
) -> anyhow::Result<Uuid> {
    let inventory_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO inventory (inventory_id, user_id, item_name, quantity, unit, category, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(inventory_id)
    .bind(user_id)
    .bind(item_name)
    .bind(quantity)
    .bind(unit)
    .bind(category)
    .bind(notes)
    .execute(db)
    .await
    .context("insert inventory item")?;
    Ok(inventory_id)
}

pub async fn delete_inventory_item(
    db: &PgPool,
    user_id: Uuid,
    inventory_id: Uuid,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"DELETE FROM inventory WHERE inventory_id = $1 AND user_id = $2"#,
    )
    .bind(inventory_id)
    .bind(user_id)
    .execute(db)
    .await
    .context("delete inventory item")?;
    Ok(result.rows_affected() > 0)
}

/// Meal names from the user's most recent ACTIVE plan, newest first,
/// capped at one week's worth. Fed back to the agent for variety.
pub async fn previous_plan_meals(db: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<String>> {
    let rows = sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT md.meal_type, md.meal_name
          FROM meal_details md
          JOIN daily_meals dm ON md.meal_id = dm.meal_id
          JOIN meal_plans mp ON dm.plan_id = mp.plan_id
         WHERE mp.user_id = $1
           AND mp.status = 'ACTIVE'
         ORDER BY mp.created_at DESC
         LIMIT 28
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await
    .context("fetch previous meals")?;

    Ok(rows
        .into_iter()
        .map(|(meal_type, meal_name)| format!("{}: {}", title_case(&meal_type), meal_name))
        .collect())
}

pub async fn load_preferences(db: &PgPool, user_id: Uuid) -> anyhow::Result<PreferenceSet> {
    let rows = sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT kind, name
          FROM user_preferences
         WHERE user_id = $1
         ORDER BY strength DESC, updated_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await
    .context("fetch preferences")?;

    let mut prefs = PreferenceSet::default();
    for (kind, name) in rows {
        match kind.as_str() {
            "like" if prefs.likes.len() < 5 => prefs.likes.push(name),
            "dislike" if prefs.dislikes.len() < 5 => prefs.dislikes.push(name),
            "cuisine" if prefs.cuisines.len() < 3 => prefs.cuisines.push(name),
            _ => {}
        }
    }
    Ok(prefs)
}

/// Upsert a learned preference, bumping its strength on repeats. Names
/// are stored lower-cased so "Olives" and "olives" are the same fact.
pub async fn record_preference(
    db: &PgPool,
    user_id: Uuid,
    kind: &str,
    name: &str,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO user_preferences (user_id, kind, name)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id, kind, name)
        DO UPDATE SET strength = user_preferences.strength + 1, updated_at = now()
        "#,
    )
    .bind(user_id)
    .bind(kind)
    .bind(name.trim().to_lowercase())
    .execute(db)
    .await
    .context("record preference")?;
    Ok(())
}

pub async fn update_targets(
    db: &PgPool,
    user_id: Uuid,
    targets: &NutritionTargets,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE users
           SET bmi = $2, daily_calories = $3, daily_protein = $4,
               daily_carbohydrate = $5, daily_fat = $6, daily_fiber = $7,
               updated_at = now()
         WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .bind(targets.bmi)
    .bind(targets.daily_calories)
    .bind(targets.daily_protein)
    .bind(targets.daily_carbohydrate)
    .bind(targets.daily_fat)
    .bind(targets.daily_fiber)
    .execute(db)
    .await
    .context("update nutrition targets")?;
    Ok(())
}

/// Gather profile, inventory snapshot, last week's meals and learned
/// preferences for one user in a single pass.
pub async fn load_user_data(db: &PgPool, user_id: Uuid) -> anyhow::Result<UserData> {
    let profile = get_profile(db, user_id)
        .await?
        .with_context(|| format!("user {} not found", user_id))?;
    let inventory = list_inventory(db, user_id).await?;
    let previous_meals = previous_plan_meals(db, user_id).await?;
    let preferences = load_preferences(db, user_id).await?;

    Ok(UserData {
        profile,
        inventory,
        previous_meals,
        preferences,
    })
}

/// Inventory grouped by category for prompt rendering; uncategorized
/// items land under "Other".
pub fn group_inventory(items: &[InventoryItem]) -> BTreeMap<String, Vec<&InventoryItem>> {
    let mut grouped: BTreeMap<String, Vec<&InventoryItem>> = BTreeMap::new();
    for item in items {
        let category = item
            .category
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| "Other".to_string());
        grouped.entry(category).or_default().push(item);
    }
    grouped
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, category: Option<&str>) -> InventoryItem {
        InventoryItem {
            inventory_id: Uuid::new_v4(),
            item_name: name.into(),
            quantity: 1.0,
            unit: "pcs".into(),
            category: category.map(Into::into),
        }
    }

    #[test]
    fn group_inventory_buckets_by_category_with_other_fallback() {
        let items = vec![
            item("chicken", Some("Proteins")),
            item("rice", Some("Grains")),
            item("mystery", None),
            item("salt", Some("")),
        ];
        let grouped = group_inventory(&items);
        assert_eq!(grouped["Proteins"].len(), 1);
        assert_eq!(grouped["Grains"].len(), 1);
        assert_eq!(grouped["Other"].len(), 2);
    }

    #[test]
    fn title_case_capitalizes_meal_types() {
        assert_eq!(title_case("breakfast"), "Breakfast");
        assert_eq!(title_case(""), "");
    }
}
