//! Query-parameter parsing shared by all four HTTP entry points
//! (spec.md §6).

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

fn default_num_results() -> u32 {
    25
}

#[derive(Debug, Deserialize)]
pub struct RawQuery {
    #[serde(default = "default_num_results", rename = "numResults")]
    pub num_results: u32,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default, rename = "filterValues")]
    pub filter_values: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default, rename = "decorateItems")]
    pub decorate_items: Option<String>,
    #[serde(default, rename = "syntheticUser")]
    pub synthetic_user: Option<String>,
    #[serde(default)]
    pub feature: Option<String>,
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
}

/// Parsed query parameters, with the JSON-valued fields decoded.
pub struct ParsedQuery {
    pub num_results: u32,
    pub filter: Option<String>,
    pub filter_values: Option<Value>,
    pub context: Option<Value>,
    pub decorate_items: bool,
    pub synthetic_user: bool,
    pub feature: Option<String>,
    pub user_id: Option<String>,
}

impl RawQuery {
    pub fn parse(self) -> Result<ParsedQuery> {
        let filter_values = match self.filter_values {
            Some(raw) => Some(parse_string_or_json(&raw)?),
            None => None,
        };
        let context = match self.context {
            Some(raw) => Some(
                serde_json::from_str(&raw).map_err(|_| Error::validation("invalid `context` query parameter"))?,
            ),
            None => None,
        };
        Ok(ParsedQuery {
            num_results: self.num_results,
            filter: self.filter,
            filter_values,
            context,
            decorate_items: parse_bool(self.decorate_items.as_deref(), true)?,
            synthetic_user: parse_bool(self.synthetic_user.as_deref(), false)?,
            feature: self.feature,
            user_id: self.user_id,
        })
    }
}

/// `filterValues` accepts either a bare string or a JSON object; objects are
/// stringified by the resolver later, so both are normalized into a `Value`
/// here.
fn parse_string_or_json(raw: &str) -> Result<Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.is_object() => Ok(value),
        _ => Ok(Value::String(raw.to_string())),
    }
}

fn parse_bool(raw: Option<&str>, default: bool) -> Result<bool> {
    match raw {
        None => Ok(default),
        Some(s) => match s.to_ascii_lowercase().as_str() {
            "1" | "yes" | "true" => Ok(true),
            "0" | "no" | "false" => Ok(false),
            other => Err(Error::validation(format!("invalid boolean query value '{other}'"))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let raw = RawQuery {
            num_results: 25,
            filter: None,
            filter_values: None,
            context: None,
            decorate_items: None,
            synthetic_user: None,
            feature: None,
            user_id: None,
        };
        let parsed = raw.parse().unwrap();
        assert_eq!(parsed.num_results, 25);
        assert!(parsed.decorate_items);
        assert!(!parsed.synthetic_user);
    }

    #[test]
    fn filter_values_object_passes_through_as_json() {
        let value = parse_string_or_json(r#"{"genre":"comedy"}"#).unwrap();
        assert!(value.is_object());
    }

    #[test]
    fn filter_values_bare_string_is_wrapped() {
        let value = parse_string_or_json("comedy").unwrap();
        assert_eq!(value, Value::String("comedy".into()));
    }

    #[test]
    fn bool_parsing_accepts_spec_vocabulary() {
        assert!(parse_bool(Some("yes"), false).unwrap());
        assert!(!parse_bool(Some("0"), true).unwrap());
        assert!(parse_bool(Some("TRUE"), false).unwrap());
        assert!(parse_bool(None, true).unwrap());
    }
}
