//! Prompt template rendering.
//!
//! Templates are plain text with `{field}` placeholders filled from the
//! merged agent config and call context. Prompts routinely embed JSON
//! examples inside fenced code blocks (```…```); braces inside a fence are
//! part of the example and must survive rendering byte-for-byte, so the
//! renderer tracks fence state line by line and only substitutes outside.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Render `template`, replacing `{key}` with the matching value from `vars`.
///
/// Rules:
/// - Substitution is skipped inside fenced code blocks.
/// - A placeholder whose key is not in `vars` is left verbatim.
/// - String values are inserted raw; other values use their JSON rendering.
pub fn render_template(template: &str, vars: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut in_fence = false;

    for (i, line) in template.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            out.push_str(line);
            continue;
        }
        if in_fence {
            out.push_str(line);
        } else {
            out.push_str(&substitute_line(line, vars));
        }
    }
    out
}

fn substitute_line(line: &str, vars: &Map<String, Value>) -> String {
    PLACEHOLDER
        .replace_all(line, |caps: &Captures| {
            let key = &caps[1];
            match vars.get(key) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Merge two maps, with `overlay` winning on key collisions.
pub fn merge_vars(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (k, v) in overlay {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_substitutes_known_placeholders() {
        let vars = vars(&[("name", json!("ScoringAgent")), ("count", json!(42))]);
        let out = render_template("Agent {name} scored {count} leads.", &vars);
        assert_eq!(out, "Agent ScoringAgent scored 42 leads.");
    }

    #[test]
    fn test_unknown_placeholders_left_verbatim() {
        let vars = vars(&[("name", json!("X"))]);
        let out = render_template("{name} / {missing}", &vars);
        assert_eq!(out, "X / {missing}");
    }

    #[test]
    fn test_fenced_blocks_untouched() {
        let template = "Answer for {name}:\n```json\n{\"name\": \"literal\"}\n```\nEnd {name}";
        let vars = vars(&[("name", json!("Meta"))]);
        let out = render_template(template, &vars);
        assert_eq!(
            out,
            "Answer for Meta:\n```json\n{\"name\": \"literal\"}\n```\nEnd Meta"
        );
    }

    #[test]
    fn test_round_trip_preserves_context_values_and_fences() {
        let template =
            "Role: {role}\n```\n{role} stays {unsubstituted}\n```\nGoal: {goal}";
        let vars = vars(&[("role", json!("planner")), ("goal", json!("ship"))]);
        let out = render_template(template, &vars);
        assert!(out.contains("Role: planner"));
        assert!(out.contains("Goal: ship"));
        // Fenced region is byte-identical.
        assert!(out.contains("{role} stays {unsubstituted}"));
    }

    #[test]
    fn test_merge_vars_overlay_wins() {
        let base = vars(&[("a", json!(1)), ("b", json!(2))]);
        let overlay = vars(&[("b", json!(3))]);
        let merged = merge_vars(&base, &overlay);
        assert_eq!(merged["a"], json!(1));
        assert_eq!(merged["b"], json!(3));
    }
}
