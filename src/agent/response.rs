//! Best-effort extraction of usable text and JSON from agent replies.
//!
//! The upstream output format is not contractually guaranteed, so every
//! function here is total: callers always get a string or an `Option`,
//! never an error.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use super::AgentResponse;

lazy_static! {
    static ref FENCE_RE: Regex = Regex::new(r"```(?:json)?\s*").unwrap();
    static ref LIST_RE: Regex = Regex::new(r"(?s)\[.*\]").unwrap();
    static ref OBJ_RE: Regex = Regex::new(r"(?s)\{.*\}").unwrap();
}

/// Collapse an opaque agent reply into plain text: unwrap `output`
/// envelopes, drop thinking/tool records from step lists, join the
/// remaining content blocks and strip markdown fences.
pub fn flatten(response: &AgentResponse) -> String {
    let mut data = &response.0;

    if let Value::Object(map) = data {
        if let Some(output) = map.get("output") {
            data = output;
        }
    }

    match data {
        Value::Array(items) => flatten_steps(items),
        Value::String(text) => {
            // The step list sometimes arrives serialized as a string.
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(text) {
                return flatten_steps(&items);
            }
            clean_text(text)
        }
        other => clean_text(&other.to_string()),
    }
}

fn flatten_steps(items: &[Value]) -> String {
    let mut parts: Vec<String> = Vec::new();

    for item in items {
        let Value::Object(map) = item else {
            if let Value::String(s) = item {
                parts.push(s.clone());
            }
            continue;
        };

        // Intermediate reasoning and tool traffic are not part of the answer.
        if map.contains_key("thinking")
            || map.contains_key("tool_use")
            || map.contains_key("tool_result")
        {
            continue;
        }

        if let Some(content) = map.get("content") {
            match content {
                Value::String(s) => parts.push(s.clone()),
                Value::Array(blocks) => {
                    for block in blocks {
                        match block {
                            Value::String(s) => parts.push(s.clone()),
                            Value::Object(inner) => {
                                if let Some(Value::String(s)) = inner.get("text") {
                                    parts.push(s.clone());
                                }
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        } else if let Some(Value::String(s)) = map.get("text") {
            parts.push(s.clone());
        }
    }

    if parts.is_empty() {
        return "No clear response found".to_string();
    }
    clean_text(&parts.join("\n\n"))
}

fn clean_text(content: &str) -> String {
    FENCE_RE.replace_all(content, "").trim().to_string()
}

/// Parse JSON out of free text: the whole string first, then the first
/// `[...]` span, then the first `{...}` span. `None` when nothing parses.
pub fn extract_json(text: &str) -> Option<Value> {
    let cleaned = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Some(value);
    }

    if let Some(m) = LIST_RE.find(cleaned) {
        if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
            return Some(value);
        }
    }

    if let Some(m) = OBJ_RE.find(cleaned) {
        if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
            return Some(value);
        }
    }

    None
}

/// Structural check on a generated plan: the four top-level sections must
/// be present and `meal_plan.days` must be a non-empty array.
pub fn validate_plan_structure(plan: &Value) -> bool {
    let Value::Object(map) = plan else {
        return false;
    };

    for key in ["user_summary", "meal_plan", "recommendations", "metadata"] {
        if !map.contains_key(key) {
            return false;
        }
    }

    matches!(
        plan.pointer("/meal_plan/days"),
        Some(Value::Array(days)) if !days.is_empty()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_skips_thinking_and_tool_records() {
        let response = AgentResponse(json!([
            {"thinking": "let me think"},
            {"tool_use": {"name": "search"}},
            {"tool_result": {"rows": 3}},
            {"content": "first part"},
            {"content": [{"text": "second part"}]},
            {"text": "third part"}
        ]));
        let text = flatten(&response);
        assert_eq!(text, "first part\n\nsecond part\n\nthird part");
    }

    #[test]
    fn flatten_unwraps_output_envelope_and_strips_fences() {
        let response = AgentResponse(json!({
            "output": "```json\n{\"a\": 1}\n```"
        }));
        assert_eq!(flatten(&response), "{\"a\": 1}");
    }

    #[test]
    fn flatten_parses_stringified_step_list() {
        let steps = json!([{"thinking": "hmm"}, {"content": "answer"}]).to_string();
        let response = AgentResponse(Value::String(steps));
        assert_eq!(flatten(&response), "answer");
    }

    #[test]
    fn flatten_of_empty_step_list_reports_no_response() {
        let response = AgentResponse(json!([{"thinking": "only thoughts"}]));
        assert_eq!(flatten(&response), "No clear response found");
    }

    #[test]
    fn extract_json_parses_whole_string() {
        let value = extract_json("{\"days\": [1, 2]}").unwrap();
        assert_eq!(value["days"][0], 1);
    }

    #[test]
    fn extract_json_finds_embedded_object() {
        let value = extract_json("Here is your plan:\n{\"meal\": \"oats\"}\nEnjoy!").unwrap();
        assert_eq!(value["meal"], "oats");
    }

    #[test]
    fn extract_json_prefers_list_span() {
        let value = extract_json("result: [{\"item\": \"rice\"}] done").unwrap();
        assert!(value.is_array());
    }

    #[test]
    fn extract_json_returns_none_on_garbage() {
        assert!(extract_json("no json here at all").is_none());
        assert!(extract_json("{broken [mismatched").is_none());
        assert!(extract_json("").is_none());
    }

    #[test]
    fn validate_requires_all_sections_and_days() {
        let valid = json!({
            "user_summary": {},
            "meal_plan": {"days": [{"day": 1}]},
            "recommendations": {},
            "metadata": {}
        });
        assert!(validate_plan_structure(&valid));

        let missing_section = json!({
            "user_summary": {},
            "meal_plan": {"days": [{"day": 1}]},
            "metadata": {}
        });
        assert!(!validate_plan_structure(&missing_section));

        let empty_days = json!({
            "user_summary": {},
            "meal_plan": {"days": []},
            "recommendations": {},
            "metadata": {}
        });
        assert!(!validate_plan_structure(&empty_days));

        assert!(!validate_plan_structure(&json!("not an object")));
    }
}
