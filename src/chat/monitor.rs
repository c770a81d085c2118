//! Post-adjustment health monitoring: compare the recomputed daily
//! totals against the profile's targets and flag material overshoots.

use serde_json::Value;

use crate::profiles::repo::UserProfile;

const OVERSHOOT_FACTOR: f64 = 1.2;

/// Warnings for totals exceeding their target by more than 20%.
pub fn check_daily_totals(profile: &UserProfile, totals: &Value) -> Vec<String> {
    let targets: [(&str, Option<f64>, &str); 4] = [
        ("calories", profile.daily_calories.map(f64::from), "kcal"),
        ("protein_g", profile.daily_protein, "g"),
        ("carbohydrates_g", profile.daily_carbohydrate, "g"),
        ("fat_g", profile.daily_fat, "g"),
    ];

    let mut warnings = Vec::new();
    for (field, target, unit) in targets {
        let Some(target) = target.filter(|t| *t > 0.0) else {
            continue;
        };
        let Some(actual) = totals.get(field).and_then(Value::as_f64) else {
            continue;
        };
        if actual > target * OVERSHOOT_FACTOR {
            warnings.push(format!(
                "Daily {} ({:.0} {unit}) now exceed your {:.0} {unit} target by more than 20%.",
                field.trim_end_matches("_g").replace('_', " "),
                actual,
                target
            ));
        }
    }
    warnings
}
