//! AutoContextResolver (spec.md §4.2): derives named field values from
//! request headers and clock/location data via rule lists.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::config::{AutoContextConfig, AutoContextRule};

/// One resolved field's result: the accumulated value set plus its
/// configured type (if any), per spec.md §4.2.
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct ResolvedField {
    pub values: Vec<String>,
    #[serde(rename = "type")]
    pub field_type: Option<String>,
}

pub type ResolvedContext = HashMap<String, ResolvedField>;

/// Case-insensitive header lookup bag, as handed to the resolver by the
/// router.
#[derive(Debug, Clone, Default)]
pub struct HeaderBag(HashMap<String, String>);

impl HeaderBag {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into().to_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_lowercase()).map(|s| s.as_str())
    }
}

/// Resolve every field in `auto_context` against `headers`, evaluated at
/// `now`.
pub fn resolve(auto_context: &AutoContextConfig, headers: &HeaderBag, now: DateTime<Utc>) -> ResolvedContext {
    let mut result = ResolvedContext::new();
    for (field_name, field) in auto_context {
        let mut values: Vec<String> = Vec::new();
        for rule in &field.rules {
            if let Some(value) = evaluate_rule(rule, headers, now) {
                if !values.contains(&value) {
                    values.push(value);
                }
                if !field.evaluate_all {
                    break;
                }
            }
        }
        if values.is_empty() {
            if let Some(default) = &field.default {
                values.push(default.clone());
            }
        }
        result.insert(
            field_name.clone(),
            ResolvedField {
                values,
                field_type: field.r#type.clone(),
            },
        );
    }
    result
}

/// Merges resolved auto-context fields into the request `context` object
/// passed on to the resolver, matching the precedence rule used for event
/// properties (spec.md §4.6): a field already set by the caller is left
/// alone. Multi-value string-typed fields join with `|`; otherwise the
/// first value is used.
pub fn merge_into(context: Option<serde_json::Value>, resolved: &ResolvedContext) -> Option<serde_json::Value> {
    use serde_json::Value as J;

    if resolved.is_empty() {
        return context;
    }
    let mut context = match context {
        Some(J::Object(map)) => map,
        Some(other) => return Some(other),
        None => serde_json::Map::new(),
    };
    for (field, field_value) in resolved {
        if context.contains_key(field) {
            continue;
        }
        let value = if field_value.field_type.as_deref() == Some("string") && field_value.values.len() > 1 {
            field_value.values.join("|")
        } else {
            field_value.values.first().cloned().unwrap_or_default()
        };
        context.insert(field.clone(), J::String(value));
    }
    Some(J::Object(context))
}

fn evaluate_rule(rule: &AutoContextRule, headers: &HeaderBag, now: DateTime<Utc>) -> Option<String> {
    let input = rule_input(rule, headers, now)?;
    match &rule.value_mappings {
        Some(mappings) => mappings
            .iter()
            .find(|m| apply_operator(&m.operator, &input, &m.value))
            .map(|m| m.map_to.clone()),
        None => Some(input),
    }
}

fn rule_input(rule: &AutoContextRule, headers: &HeaderBag, now: DateTime<Utc>) -> Option<String> {
    match rule.rule_type.as_str() {
        "header-value" => rule.header.as_deref().and_then(|h| headers.get(h)).map(|s| s.to_string()),
        "hour-of-day" => Some(localize(headers, now).hour().to_string()),
        "day-of-week" => Some(
            localize(headers, now)
                .weekday()
                .num_days_from_monday()
                .to_string(),
        ),
        "season-of-year" => {
            let latitude = headers
                .get("cloudfront-viewer-latitude")
                .and_then(|v| v.parse::<f64>().ok());
            Some(get_season(localize(headers, now), latitude).to_string())
        }
        other => {
            tracing::warn!(rule_type = other, "unknown auto-context rule type");
            None
        }
    }
}

fn apply_operator(operator: &str, input: &str, target: &str) -> bool {
    match operator {
        "equals" => input == target,
        "less-than" => input.parse::<f64>().ok().zip(target.parse::<f64>().ok())
            .map(|(a, b)| a < b)
            .unwrap_or(false),
        "greater-than" => input.parse::<f64>().ok().zip(target.parse::<f64>().ok())
            .map(|(a, b)| a > b)
            .unwrap_or(false),
        "contains" => input.contains(target),
        "start-with" => input.starts_with(target),
        "ends-with" => input.ends_with(target),
        other => {
            tracing::warn!(operator = other, "unknown auto-context operator");
            false
        }
    }
}

fn localize(headers: &HeaderBag, now: DateTime<Utc>) -> DateTime<Tz> {
    match headers.get("cloudfront-viewer-time-zone").and_then(|tz| tz.parse::<Tz>().ok()) {
        Some(tz) => now.with_timezone(&tz),
        // A server process has no meaningful "local" wall-clock locale; UTC
        // stands in for "system local" absent a viewer time zone header.
        None => now.with_timezone(&chrono_tz::UTC),
    }
}

/// Season index (0=Spring, 1=Summer, 2=Fall, 3=Winter), Northern-hemisphere
/// boundaries; rotated by two when `latitude` is known and negative
/// (spec.md §4.2, §8).
pub fn get_season<Tzv: chrono::TimeZone>(date: DateTime<Tzv>, latitude: Option<f64>) -> u8 {
    let month = date.month();
    let day = date.day();
    let base = if (month == 3 && day >= 21) || (4..6).contains(&month) || (month == 6 && day < 21) {
        0 // Spring
    } else if (month == 6 && day >= 21) || (6..9).contains(&month) || (month == 9 && day < 23) {
        1 // Summer
    } else if (month == 9 && day >= 23) || (9..12).contains(&month) || (month == 12 && day < 23) {
        2 // Fall
    } else {
        3 // Winter
    };
    match latitude {
        Some(lat) if lat < 0.0 => (base + 2) % 4,
        _ => base,
    }
}
