//! Heuristics deciding whether a differing field is worth templating as a
//! swap variable.
//!
//! [`should_swap`] runs the fixed precedence chain: a value outside the
//! eligible length range is always rejected; an ignored name always wins
//! next (never swap); otherwise the decision starts from a swappable name
//! or value pattern, falling back to an identity-keyword match. Once a
//! decision of "swap" is reached, a timestamp- or float-shaped value can
//! still *veto* it back to "don't swap" — those two checks never turn a
//! rejection into a swap, only the reverse.

use std::collections::HashSet;

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Rules;
use crate::patterns::Mode;

const MIN_YEAR: i32 = 1990;
const MAX_YEAR: i32 = 2050;
const MAX_FLOAT_VALUE: f64 = 1e5;
const MIN_VALUE_LEN: usize = 3;
const MAX_VALUE_LEN: usize = 200;

/// The identity fields carried alongside a captured session, used to
/// recognize a variable whose *value* echoes the session's own identity
/// even when its name gives no hint (e.g. a body field `assigned_to` that
/// happens to hold the requester's own username).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityFields {
    pub username: Option<String>,
    pub email: Option<String>,
    pub identity_username: Option<String>,
    pub identity_email: Option<String>,
    pub identity_first_name: Option<String>,
    pub identity_last_name: Option<String>,
}

/// Build the lowercased, non-empty set of identity values to match variable
/// values against. A missing or blank field contributes nothing — an empty
/// keyword would otherwise match every string via substring containment.
pub fn identity_keywords(fields: &IdentityFields) -> HashSet<String> {
    [
        &fields.username,
        &fields.email,
        &fields.identity_username,
        &fields.identity_email,
        &fields.identity_first_name,
        &fields.identity_last_name,
    ]
    .into_iter()
    .filter_map(|v| v.as_ref())
    .map(|s| s.trim().to_lowercase())
    .filter(|s| !s.is_empty())
    .collect()
}

/// Whether a differing field should become a template variable.
///
/// Precedence, in order: the value must stringify to something in
/// `[MIN_VALUE_LEN, MAX_VALUE_LEN]` characters, else it is rejected outright;
/// then an ignored name always wins (never swap); then the decision starts
/// out as swap iff the name or value matches a swappable pattern, falling
/// back to an identity-keyword match when neither pattern fires. Only once
/// that decision is `true` do the timestamp and float checks get a say, and
/// only to veto it back to `false` — they never flip a rejection into a swap.
pub fn should_swap(
    name: &str,
    value: &Value,
    identity_keywords: &HashSet<String>,
    rules: &Rules,
) -> bool {
    let Some(s) = scalar_as_string(value) else {
        return false;
    };
    if s.len() < MIN_VALUE_LEN || s.len() > MAX_VALUE_LEN {
        return false;
    }

    if rules.variable_name_ignore.matches(name, Mode::Search) {
        return false;
    }

    let mut swap = rules.variable_name_swappable.matches(name, Mode::Search)
        || rules.variable_value_swappable.matches(&s, Mode::Search);

    if !swap {
        swap = matches_identity(value, identity_keywords);
    }

    if swap && is_timestamp(value) {
        swap = false;
    }

    if swap && is_float(value) {
        swap = false;
    }

    swap
}

fn matches_identity(value: &Value, identity_keywords: &HashSet<String>) -> bool {
    let Some(s) = scalar_as_string(value) else {
        return false;
    };
    let lowered = s.to_lowercase();
    identity_keywords.iter().any(|k| lowered.contains(k.as_str()))
}

/// True if `value` parses as a Unix timestamp (seconds, then milliseconds)
/// landing strictly between [`MIN_YEAR`] and [`MAX_YEAR`].
fn is_timestamp(value: &Value) -> bool {
    let Some(n) = scalar_as_f64(value) else {
        return false;
    };

    year_of_epoch_seconds(n)
        .or_else(|| year_of_epoch_seconds(n / 1e3))
        .map(|year| year > MIN_YEAR && year < MAX_YEAR)
        .unwrap_or(false)
}

fn year_of_epoch_seconds(secs: f64) -> Option<i32> {
    if !secs.is_finite() {
        return None;
    }
    chrono::DateTime::from_timestamp(secs as i64, 0).map(|dt| dt.year())
}

/// True if `value` parses as a float but not as an integer, and its
/// magnitude stays under [`MAX_FLOAT_VALUE`]. Integers are excluded because
/// they are overwhelmingly identifiers, not measurements.
fn is_float(value: &Value) -> bool {
    let Some(s) = scalar_as_string(value) else {
        return false;
    };
    if s.parse::<i64>().is_ok() {
        return false;
    }
    match s.parse::<f64>() {
        Ok(f) => f.abs() < MAX_FLOAT_VALUE,
        Err(_) => false,
    }
}

fn scalar_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules() -> Rules {
        Rules::from_lines(
            &[],
            &[],
            &[],
            &["^csrf_token$", "^_.*"],
            &["(?i)id$", "(?i)user"],
            &["^[0-9a-f]{8}-[0-9a-f]{4}"],
        )
        .unwrap()
    }

    #[test]
    fn ignored_name_never_swaps() {
        // a long-enough value that would otherwise match the "id"/"user"
        // swappable-name patterns below, to isolate the ignore-list veto.
        let kw = HashSet::new();
        assert!(!should_swap("csrf_token", &json!("abcuser123"), &kw, &rules()));
    }

    #[test]
    fn identity_value_forces_swap_regardless_of_name() {
        let mut kw = HashSet::new();
        kw.insert("alice".to_string());
        assert!(should_swap("assigned_to", &json!("alice"), &kw, &rules()));
    }

    #[test]
    fn empty_identity_field_never_vacuously_matches() {
        let fields = IdentityFields::default();
        let kw = identity_keywords(&fields);
        assert!(kw.is_empty());
        assert!(!should_swap("anything", &json!(""), &kw, &rules()));
    }

    #[test]
    fn swappable_name_pattern_matches() {
        let kw = HashSet::new();
        assert!(should_swap("user_id", &json!("xyz"), &kw, &rules()));
    }

    #[test]
    fn timestamp_seconds_vetoes_an_otherwise_swappable_name() {
        let rules = Rules::from_lines(&[], &[], &[], &[], &["(?i)^created_at$"], &[]).unwrap();
        let kw = HashSet::new();
        assert!(!should_swap("created_at", &json!(1_710_000_000), &kw, &rules));
    }

    #[test]
    fn timestamp_milliseconds_vetoes_an_otherwise_swappable_name() {
        let rules = Rules::from_lines(&[], &[], &[], &[], &["(?i)^created_at_ms$"], &[]).unwrap();
        let kw = HashSet::new();
        assert!(!should_swap(
            "created_at_ms",
            &json!(1_700_000_000_000i64),
            &kw,
            &rules
        ));
    }

    #[test]
    fn out_of_range_epoch_is_not_vetoed_as_a_timestamp() {
        let kw = HashSet::new();
        // "page" matches no swappable pattern at all, so this is rejected
        // regardless of the timestamp check — the point is the veto never
        // manufactures a `true` either way.
        assert!(!should_swap("page", &json!(99_999_999_999_999i64), &kw, &rules()));
    }

    #[test]
    fn timestamp_value_alone_does_not_trigger_a_swap() {
        let kw = HashSet::new();
        // a timestamp-shaped value under a name/value that matches nothing
        // swappable must stay rejected — timestamp is a veto, not a trigger.
        assert!(!should_swap("page", &json!(1_710_000_000), &kw, &rules()));
    }

    #[test]
    fn float_value_vetoes_an_otherwise_swappable_name() {
        let rules = Rules::from_lines(&[], &[], &[], &[], &["(?i)^score$"], &[]).unwrap();
        let kw = HashSet::new();
        assert!(!should_swap("score", &json!(3.14), &kw, &rules));
    }

    #[test]
    fn float_value_alone_does_not_trigger_a_swap() {
        let kw = HashSet::new();
        assert!(!should_swap("page", &json!(3.14), &kw, &rules()));
    }

    #[test]
    fn bare_integer_is_not_a_float() {
        let kw = HashSet::new();
        assert!(!should_swap("page", &json!(2), &kw, &rules()));
    }

    #[test]
    fn value_pattern_matches_uuid() {
        let kw = HashSet::new();
        assert!(should_swap(
            "reference",
            &json!("550e8400-e29b-41d4-a716-446655440000"),
            &kw,
            &rules()
        ));
    }

    #[test]
    fn value_length_of_two_is_never_swapped() {
        let kw = HashSet::new();
        assert!(!should_swap("user_id", &json!("ab"), &kw, &rules()));
    }

    #[test]
    fn value_length_of_three_is_eligible() {
        let kw = HashSet::new();
        assert!(should_swap("user_id", &json!("abc"), &kw, &rules()));
    }

    #[test]
    fn empty_value_is_never_swapped() {
        let kw = HashSet::new();
        assert!(!should_swap("user_id", &json!(""), &kw, &rules()));
    }

    #[test]
    fn value_longer_than_two_hundred_is_never_swapped() {
        let kw = HashSet::new();
        let value = "a".repeat(MAX_VALUE_LEN + 1);
        assert!(!should_swap("user_id", &json!(value), &kw, &rules()));
    }
}
