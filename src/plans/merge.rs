//! Reconciliation of two independently generated day-ranges into one
//! 7-day plan. A single call covering the whole week proved unreliable
//! upstream, so generation runs as days 1-4 and 5-7 and the results are
//! merged here.

use serde_json::{json, Map, Value};
use time::Date;

use crate::agent::response::validate_plan_structure;
use crate::plans::prompt::date_for_day;

/// Shopping-list categories the reconciliation walks. Items outside
/// these keys pass through untouched inside plan_a's list.
pub const SHOPPING_CATEGORIES: [&str; 7] = [
    "proteins",
    "produce",
    "pantry",
    "grains",
    "vegetables",
    "fruits",
    "dairy_alternatives",
];

/// Merge `plan_b` (days 5-7) into `plan_a` (days 1-4). Returns `None`
/// when either batch fails structural validation or the merged result
/// does; the caller never sees a partially merged plan.
pub fn merge_batches(
    mut plan_a: Value,
    plan_b: Value,
    inventory_count: usize,
    start_date: Date,
) -> Option<Value> {
    if !validate_plan_structure(&plan_a) || !validate_plan_structure(&plan_b) {
        return None;
    }

    // 1. Days from batch 2 follow batch 1, order preserved.
    let days_b = plan_b
        .pointer("/meal_plan/days")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if let Some(Value::Array(days)) = plan_a.pointer_mut("/meal_plan/days") {
        days.extend(days_b);
    }

    // 2. Shopping lists reconcile per category with quantity summation.
    merge_shopping_lists(&mut plan_a, &plan_b);

    // 3. Week summary is recomputed from the merged daily totals.
    recompute_week_summary(&mut plan_a, inventory_count);

    if !validate_plan_structure(&plan_a) {
        return None;
    }

    // 4. Day labels always match real calendar dates, whatever the
    //    agent returned.
    relabel_days(&mut plan_a, start_date);

    Some(plan_a)
}

fn merge_shopping_lists(plan_a: &mut Value, plan_b: &Value) {
    let sl_b = match plan_b.pointer("/recommendations/shopping_list_summary") {
        Some(Value::Object(map)) if !map.is_empty() => map.clone(),
        _ => return,
    };
    let Some(Value::Object(sl_a)) = plan_a.pointer_mut("/recommendations/shopping_list_summary")
    else {
        return;
    };
    if sl_a.is_empty() {
        return;
    }

    for category in SHOPPING_CATEGORIES {
        let Some(Value::Array(items_b)) = sl_b.get(category) else {
            continue;
        };

        let entry = sl_a
            .entry(category.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        let Value::Array(items_a) = entry else {
            continue;
        };

        merge_category_items(items_a, items_b);
    }

    // Aggregate totals are summed across both batches.
    for key in ["total_estimated_cost", "total_items_from_inventory", "total_items_to_purchase"] {
        let a = lenient_f64(sl_a.get(key)).unwrap_or(0.0);
        let b = lenient_f64(sl_b.get(key)).unwrap_or(0.0);
        let summed = a + b;
        let value = if key == "total_estimated_cost" {
            json!(summed)
        } else {
            json!(summed as i64)
        };
        sl_a.insert(key.to_string(), value);
    }
}

/// Case-insensitive merge of one category: matching names sum their
/// purchase quantities, unmatched items from batch 2 are appended.
fn merge_category_items(items_a: &mut Vec<Value>, items_b: &[Value]) {
    // Index plan_a's entries by lower-cased item name.
    let mut index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for (pos, item) in items_a.iter().enumerate() {
        if let Some(name) = item.get("item").and_then(Value::as_str) {
            index.insert(name.trim().to_lowercase(), pos);
        }
    }

    for new_item in items_b {
        let Some(name) = new_item.get("item").and_then(Value::as_str) else {
            continue;
        };
        let key = name.trim().to_lowercase();

        match index.get(&key) {
            Some(&pos) => {
                if let Some(existing) = items_a.get_mut(pos) {
                    sum_quantity_field(existing, new_item, "quantity_to_purchase");
                    sum_quantity_field(existing, new_item, "total_quantity_needed");
                }
            }
            None => {
                index.insert(key, items_a.len());
                items_a.push(new_item.clone());
            }
        }
    }
}

/// Numeric best-effort: missing counts as 0, but when either side holds
/// a non-numeric value the existing entry keeps its original value
/// rather than failing the merge.
fn sum_quantity_field(existing: &mut Value, incoming: &Value, field: &str) {
    let a = lenient_f64(existing.get(field));
    let b = lenient_f64(incoming.get(field));
    if let (Some(a), Some(b)) = (a, b) {
        if let Some(map) = existing.as_object_mut() {
            map.insert(field.to_string(), json!(a + b));
        }
    }
}

fn recompute_week_summary(plan: &mut Value, inventory_count: usize) {
    let days = match plan.pointer("/meal_plan/days").and_then(Value::as_array) {
        Some(days) if !days.is_empty() => days.clone(),
        _ => return,
    };
    let num_days = days.len() as f64;

    let mut totals = [0.0f64; 5];
    const FIELDS: [&str; 5] = ["calories", "protein_g", "carbohydrates_g", "fat_g", "fiber_g"];
    for day in &days {
        for (i, field) in FIELDS.iter().enumerate() {
            totals[i] += day
                .pointer(&format!("/total_nutrition/{field}"))
                .and_then(lenient_value_f64)
                .unwrap_or(0.0);
        }
    }

    // Utilization compares items drawn from inventory against the pantry
    // size. The numerator can count one item across several days, so the
    // raw ratio is approximate; the clamp keeps the displayed rate sane.
    let items_used = plan
        .pointer("/recommendations/shopping_list_summary/total_items_from_inventory")
        .and_then(lenient_value_f64)
        .unwrap_or(0.0);
    let utilization = if inventory_count > 0 {
        round1((items_used / inventory_count as f64 * 100.0).clamp(0.0, 100.0))
    } else {
        0.0
    };

    let meal_plan = match plan.get_mut("meal_plan").and_then(Value::as_object_mut) {
        Some(map) => map,
        None => return,
    };
    let summary = meal_plan
        .entry("week_summary".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(summary) = summary.as_object_mut() else {
        return;
    };

    summary.insert(
        "average_daily_calories".into(),
        json!((totals[0] / num_days) as i64),
    );
    summary.insert("average_daily_protein".into(), json!(round1(totals[1] / num_days)));
    summary.insert("average_daily_carbs".into(), json!(round1(totals[2] / num_days)));
    summary.insert("average_daily_fat".into(), json!(round1(totals[3] / num_days)));
    summary.insert("average_daily_fiber".into(), json!(round1(totals[4] / num_days)));
    summary.insert("inventory_utilization_rate".into(), json!(utilization));
}

/// Rewrite `day` and `day_name` for every entry so labels match the
/// actual calendar starting at `start_date`.
fn relabel_days(plan: &mut Value, start_date: Date) {
    let Some(Value::Array(days)) = plan.pointer_mut("/meal_plan/days") else {
        return;
    };
    for (i, day) in days.iter_mut().enumerate() {
        let date = date_for_day(start_date, i as u32 + 1);
        if let Some(map) = day.as_object_mut() {
            map.insert("day".into(), json!(i as u32 + 1));
            map.insert("day_name".into(), json!(date.weekday().to_string()));
        }
    }
}

/// Number, numeric string, or missing-as-zero. `None` marks a value
/// that must not be summed over.
fn lenient_f64(value: Option<&Value>) -> Option<f64> {
    match value {
        None | Some(Value::Null) => Some(0.0),
        Some(v) => lenient_value_f64(v),
    }
}

fn lenient_value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn day(calories: f64, protein: f64) -> Value {
        json!({
            "day": 1,
            "day_name": "Someday",
            "total_nutrition": {
                "calories": calories,
                "protein_g": protein,
                "carbohydrates_g": 200.0,
                "fat_g": 60.0,
                "fiber_g": 25.0
            },
            "meals": {}
        })
    }

    fn plan(days: Vec<Value>, shopping: Value) -> Value {
        json!({
            "user_summary": {},
            "meal_plan": { "days": days, "week_summary": {} },
            "recommendations": { "shopping_list_summary": shopping },
            "metadata": {}
        })
    }

    fn basic_shopping() -> Value {
        json!({
            "proteins": [
                {"item": "Chicken Breast", "quantity_to_purchase": 500.0, "total_quantity_needed": 700.0, "unit": "g"}
            ],
            "grains": [],
            "total_estimated_cost": 20.0,
            "total_items_from_inventory": 3,
            "total_items_to_purchase": 5
        })
    }

    #[test]
    fn merged_plan_has_all_days_renumbered_with_real_weekdays() {
        let plan_a = plan(vec![day(2000.0, 100.0); 4], basic_shopping());
        let plan_b = plan(vec![day(2200.0, 120.0); 3], basic_shopping());

        // 2025-01-10 is a Friday.
        let merged = merge_batches(plan_a, plan_b, 10, date!(2025 - 01 - 10)).unwrap();

        let days = merged.pointer("/meal_plan/days").unwrap().as_array().unwrap();
        assert_eq!(days.len(), 7);
        for (i, d) in days.iter().enumerate() {
            assert_eq!(d["day"], json!(i + 1));
        }
        assert_eq!(days[0]["day_name"], "Friday");
        assert_eq!(days[3]["day_name"], "Monday");
        assert_eq!(days[6]["day_name"], "Thursday");
    }

    #[test]
    fn week_summary_averages_divide_by_actual_day_count() {
        let plan_a = plan(vec![day(1800.0, 90.0), day(2000.0, 100.0)], basic_shopping());
        let plan_b = plan(vec![day(2200.0, 113.0)], basic_shopping());

        let merged = merge_batches(plan_a, plan_b, 10, date!(2025 - 01 - 10)).unwrap();
        let summary = merged.pointer("/meal_plan/week_summary").unwrap();

        // (1800 + 2000 + 2200) / 3 = 2000, (90 + 100 + 113) / 3 = 101.0
        assert_eq!(summary["average_daily_calories"], json!(2000));
        assert_eq!(summary["average_daily_protein"], json!(101.0));
        assert_eq!(summary["average_daily_carbs"], json!(200.0));
    }

    #[test]
    fn utilization_is_clamped_to_100_and_zero_on_empty_inventory() {
        let mut shopping = basic_shopping();
        shopping["total_items_from_inventory"] = json!(30);
        let plan_a = plan(vec![day(2000.0, 100.0); 4], shopping.clone());
        let plan_b = plan(vec![day(2000.0, 100.0); 3], shopping.clone());

        // 60 items used against 10 in the pantry: raw ratio 600%.
        let merged = merge_batches(plan_a, plan_b, 10, date!(2025 - 01 - 10)).unwrap();
        assert_eq!(
            merged.pointer("/meal_plan/week_summary/inventory_utilization_rate"),
            Some(&json!(100.0))
        );

        let plan_a = plan(vec![day(2000.0, 100.0); 4], shopping.clone());
        let plan_b = plan(vec![day(2000.0, 100.0); 3], shopping);
        let merged = merge_batches(plan_a, plan_b, 0, date!(2025 - 01 - 10)).unwrap();
        assert_eq!(
            merged.pointer("/meal_plan/week_summary/inventory_utilization_rate"),
            Some(&json!(0.0))
        );
    }

    #[test]
    fn invalid_batch_aborts_the_merge() {
        let valid = plan(vec![day(2000.0, 100.0); 4], basic_shopping());
        let missing_days = json!({
            "user_summary": {},
            "meal_plan": {},
            "recommendations": {},
            "metadata": {}
        });

        assert!(merge_batches(valid.clone(), missing_days.clone(), 5, date!(2025 - 01 - 10)).is_none());
        assert!(merge_batches(missing_days, valid, 5, date!(2025 - 01 - 10)).is_none());
    }

    #[test]
    fn shopping_items_matching_case_insensitively_sum_quantities() {
        let sl_a = json!({
            "proteins": [
                {"item": "chicken breast", "quantity_to_purchase": 500.0, "total_quantity_needed": 700.0, "unit": "g"}
            ],
            "total_estimated_cost": 20.0,
            "total_items_from_inventory": 3,
            "total_items_to_purchase": 5
        });
        let sl_b = json!({
            "proteins": [
                {"item": "Chicken Breast ", "quantity_to_purchase": 300.0, "total_quantity_needed": 300.0, "unit": "g"},
                {"item": "Tofu", "quantity_to_purchase": 200.0, "total_quantity_needed": 200.0, "unit": "g"}
            ],
            "total_estimated_cost": 15.5,
            "total_items_from_inventory": 2,
            "total_items_to_purchase": 4
        });
        let plan_a = plan(vec![day(2000.0, 100.0); 4], sl_a);
        let plan_b = plan(vec![day(2000.0, 100.0); 3], sl_b);

        let merged = merge_batches(plan_a, plan_b, 10, date!(2025 - 01 - 10)).unwrap();
        let sl = merged.pointer("/recommendations/shopping_list_summary").unwrap();

        let proteins = sl["proteins"].as_array().unwrap();
        assert_eq!(proteins.len(), 2);
        assert_eq!(proteins[0]["quantity_to_purchase"], json!(800.0));
        assert_eq!(proteins[0]["total_quantity_needed"], json!(1000.0));
        assert_eq!(proteins[1]["item"], "Tofu");
        assert_eq!(proteins[1]["quantity_to_purchase"], json!(200.0));

        assert_eq!(sl["total_estimated_cost"], json!(35.5));
        assert_eq!(sl["total_items_from_inventory"], json!(5));
        assert_eq!(sl["total_items_to_purchase"], json!(9));
    }

    #[test]
    fn non_numeric_quantities_keep_the_original_value() {
        let sl_a = json!({
            "produce": [
                {"item": "Basil", "quantity_to_purchase": "one bunch", "total_quantity_needed": 1.0, "unit": "bunch"}
            ],
            "total_estimated_cost": 0.0,
            "total_items_from_inventory": 0,
            "total_items_to_purchase": 1
        });
        let sl_b = json!({
            "produce": [
                {"item": "basil", "quantity_to_purchase": 2.0, "total_quantity_needed": 2.0, "unit": "bunch"}
            ],
            "total_estimated_cost": 0.0,
            "total_items_from_inventory": 0,
            "total_items_to_purchase": 1
        });
        let plan_a = plan(vec![day(2000.0, 100.0); 4], sl_a);
        let plan_b = plan(vec![day(2000.0, 100.0); 3], sl_b);

        let merged = merge_batches(plan_a, plan_b, 5, date!(2025 - 01 - 10)).unwrap();
        let basil = &merged.pointer("/recommendations/shopping_list_summary/produce").unwrap()[0];

        // "one bunch" does not parse, so the field stays untouched while
        // the numeric companion field still sums.
        assert_eq!(basil["quantity_to_purchase"], json!("one bunch"));
        assert_eq!(basil["total_quantity_needed"], json!(3.0));
    }

    #[test]
    fn numeric_strings_sum_as_numbers() {
        assert_eq!(lenient_f64(Some(&json!("2.5"))), Some(2.5));
        assert_eq!(lenient_f64(Some(&json!(4))), Some(4.0));
        assert_eq!(lenient_f64(None), Some(0.0));
        assert_eq!(lenient_f64(Some(&json!("a few"))), None);
        assert_eq!(lenient_f64(Some(&json!({"n": 1}))), None);
    }
}
