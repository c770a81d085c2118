//! Daily nutrition target computation (Harris-Benedict BMR, activity
//! multiplier, goal adjustment, fixed macro split). Used by the periodic
//! profile recompute; the interactive profile wizard lives in the UI
//! layer and just calls the same endpoint.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct NutritionTargets {
    pub bmi: f64,
    pub daily_calories: i32,
    pub daily_protein: f64,
    pub daily_carbohydrate: f64,
    pub daily_fat: f64,
    pub daily_fiber: f64,
}

fn activity_multiplier(activity: &str) -> f64 {
    match activity {
        "Sedentary" => 1.2,
        "Lightly active" => 1.375,
        "Moderately active" => 1.55,
        "Very active" => 1.725,
        "Extremely active" => 1.9,
        _ => 1.2,
    }
}

pub fn calculate_targets(
    age: i32,
    gender: &str,
    weight_kg: f64,
    height_cm: f64,
    activity: &str,
    goal: &str,
) -> NutritionTargets {
    let height_m = height_cm / 100.0;
    let bmi = round1(weight_kg / (height_m * height_m));

    let age = age as f64;
    let bmr = if gender.eq_ignore_ascii_case("male") {
        88.362 + (13.397 * weight_kg) + (4.799 * height_cm) - (5.677 * age)
    } else {
        447.593 + (9.247 * weight_kg) + (3.098 * height_cm) - (4.330 * age)
    };

    let mut calories = (bmr * activity_multiplier(activity)) as i32;
    match goal {
        "Weight Loss" => calories -= 500,
        "Weight Gain" | "Muscle Gain" => calories += 500,
        _ => {}
    }

    let daily_protein = round1(weight_kg * 1.6);
    let daily_fat = round1(f64::from(calories) * 0.25 / 9.0);
    let daily_carbohydrate =
        round1((f64::from(calories) - daily_protein * 4.0 - daily_fat * 9.0) / 4.0);

    NutritionTargets {
        bmi,
        daily_calories: calories,
        daily_protein,
        daily_carbohydrate,
        daily_fat,
        daily_fiber: 30.0,
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn male_weight_loss_targets() {
        let t = calculate_targets(30, "Male", 80.0, 180.0, "Moderately active", "Weight Loss");
        assert!((t.bmi - 24.7).abs() < 1e-9);
        assert_eq!(t.daily_calories, 2373);
        assert!((t.daily_protein - 128.0).abs() < 1e-9);
        assert!((t.daily_fat - 65.9).abs() < 1e-9);
        assert!((t.daily_carbohydrate - 317.0).abs() < 1e-9);
        assert!((t.daily_fiber - 30.0).abs() < 1e-9);
    }

    #[test]
    fn female_gain_adds_surplus() {
        let maintain = calculate_targets(25, "Female", 60.0, 165.0, "Sedentary", "Maintenance");
        let gain = calculate_targets(25, "Female", 60.0, 165.0, "Sedentary", "Muscle Gain");
        assert_eq!(gain.daily_calories, maintain.daily_calories + 500);
    }

    #[test]
    fn unknown_activity_falls_back_to_sedentary() {
        let a = calculate_targets(40, "Male", 75.0, 175.0, "whatever", "Maintenance");
        let b = calculate_targets(40, "Male", 75.0, 175.0, "Sedentary", "Maintenance");
        assert_eq!(a.daily_calories, b.daily_calories);
    }
}
