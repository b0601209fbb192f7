//! The template tree: the parameterized shape a swap request is built from.
//!
//! A template is built once from two concrete instances of the same field
//! and can then do two things: [`TemplateNode::extract_variable_values`]
//! reads the variable values back out of either instance, and
//! [`TemplateNode::evaluate`] renders a new concrete value given a
//! substitution map. Every node is tagged with `type` in its serialized
//! form so a template can be written out and read back without losing which
//! variant it is.
//!
//! `StringTemplate` differs from the original Python implementation's
//! string-replace approach: instead of patching the literal string in place
//! (which breaks on overlapping or repeated values), it decomposes the
//! value into an ordered list of literal and hole segments up front and
//! compiles the whole thing into a single regex. Extraction is then one
//! match, not a sequence of fragile substring operations.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AnalyzerError, Result};

/// One piece of a decomposed string value: either text that must match
/// exactly, or a named hole whose content becomes a variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    Literal(String),
    Hole(String),
}

/// The character classes the original treats as safe word boundaries
/// around a swappable value, so a value that is itself a substring of
/// something unrelated is not mistaken for a match. `;` is included
/// alongside `,` and `&` so a `Cookie` header's `name=value; name=value`
/// pairs border correctly, the same way a query string's pairs do.
const BOUNDARY_CLASS: &str = r#"[/:\s."'&,;=]"#;

fn boundary_pattern(value: &str) -> String {
    format!(
        r#"(?:^|{b}){v}(?:{b2}|$)"#,
        b = BOUNDARY_CLASS,
        v = regex::escape(value),
        b2 = r#"[/:\s."'&,;]"#
    )
}

/// Every non-overlapping, border-respecting byte span of `value` within
/// `literal`, as `(start, end)` offsets excluding the border characters
/// themselves.
fn find_bordered_occurrences(literal: &str, value: &str) -> Result<Vec<(usize, usize)>> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    let re = Regex::new(&boundary_pattern(value))?;
    let mut out = Vec::new();
    for m in re.find_iter(literal) {
        if let Some(offset) = m.as_str().find(value) {
            let start = m.start() + offset;
            out.push((start, start + value.len()));
        }
    }
    Ok(out)
}

fn ranges_overlap(a: (usize, usize), b: (usize, usize)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

/// Sanitize a variable name into a valid regex capture-group identifier,
/// disambiguating repeat occurrences with a numeric suffix.
fn group_name(base: &str, occurrence: usize) -> String {
    let mut safe: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if safe.is_empty() || safe.chars().next().unwrap().is_ascii_digit() {
        safe.insert(0, '_');
    }
    if occurrence == 0 {
        safe
    } else {
        format!("{safe}__{occurrence}")
    }
}

/// Strip a `__N` disambiguation suffix back to the original variable name.
fn base_name(group: &str) -> String {
    match group.rsplit_once("__") {
        Some((base, suffix)) if suffix.chars().all(|c| c.is_ascii_digit()) => base.to_string(),
        _ => group.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringTemplate {
    pub segments: Vec<Segment>,
}

impl StringTemplate {
    /// Build a template from `literal` by punching a hole at every
    /// border-respecting occurrence of each `(name, value)` pair's value.
    /// Values are searched for longest-first, so a value that is itself a
    /// substring of another candidate's value never shadows the longer
    /// match — e.g. `user_id=u239489` alongside `user_id_full=u239489X`
    /// within the same literal resolves to the longer hole first.
    ///
    /// When a single variable is given and its value has no border-
    /// respecting occurrence in `literal` at all, the whole literal is
    /// treated as that one hole (the common case: `literal` *is* the
    /// field's own value, not a larger string it's embedded in).
    pub fn build(literal: &str, variables: &[(String, String)]) -> Result<Self> {
        if variables.is_empty() {
            return Ok(Self::literal(literal));
        }

        let mut ordered: Vec<&(String, String)> = variables.iter().collect();
        ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

        struct Occurrence {
            start: usize,
            end: usize,
            name: String,
        }
        let mut occurrences: Vec<Occurrence> = Vec::new();

        for (name, value) in ordered {
            for (start, end) in find_bordered_occurrences(literal, value)? {
                if occurrences.iter().any(|o| ranges_overlap((o.start, o.end), (start, end))) {
                    continue;
                }
                occurrences.push(Occurrence { start, end, name: name.clone() });
            }
        }

        if occurrences.is_empty() {
            if let [(name, _)] = variables {
                return Ok(Self {
                    segments: vec![Segment::Hole(name.clone())],
                });
            }
            return Ok(Self::literal(literal));
        }

        occurrences.sort_by_key(|o| o.start);

        let mut segments = Vec::new();
        let mut cursor = 0;
        for occ in occurrences {
            if occ.start > cursor {
                segments.push(Segment::Literal(literal[cursor..occ.start].to_string()));
            }
            segments.push(Segment::Hole(occ.name));
            cursor = occ.end;
        }
        if cursor < literal.len() {
            segments.push(Segment::Literal(literal[cursor..].to_string()));
        }

        Ok(Self { segments })
    }

    /// A template with no holes at all, for a field that never varies.
    pub fn literal(value: &str) -> Self {
        Self {
            segments: vec![Segment::Literal(value.to_string())],
        }
    }

    fn compiled(&self) -> Result<(Regex, BTreeMap<String, String>)> {
        let mut pattern = String::from("^");
        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        let mut group_to_name = BTreeMap::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => pattern.push_str(&regex::escape(s)),
                Segment::Hole(name) => {
                    let occurrence = *seen.get(name).unwrap_or(&0);
                    seen.insert(name.clone(), occurrence + 1);
                    let group = group_name(name, occurrence);
                    group_to_name.insert(group.clone(), name.clone());
                    pattern.push_str(&format!("(?P<{group}>.+?)"));
                }
            }
        }
        pattern.push('$');

        Ok((Regex::new(&pattern)?, group_to_name))
    }

    pub fn extract_variable_values(&self, text: &str) -> Result<BTreeMap<String, String>> {
        let (re, group_to_name) = self.compiled()?;
        let caps = re.captures(text).ok_or_else(|| {
            AnalyzerError::InvalidTemplateData(format!("'{text}' does not match string template"))
        })?;

        let mut out: BTreeMap<String, String> = BTreeMap::new();
        for (group, name) in &group_to_name {
            let value = caps.name(group).map(|m| m.as_str().to_string()).unwrap_or_default();
            match out.get(name) {
                Some(existing) if existing != &value => {
                    return Err(AnalyzerError::MultipleValuesForVariable(name.clone()));
                }
                _ => {
                    out.insert(name.clone(), value);
                }
            }
        }
        Ok(out)
    }

    pub fn evaluate(&self, substitutions: &BTreeMap<String, String>) -> Result<String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Hole(name) => {
                    let value = substitutions.get(name).ok_or_else(|| {
                        AnalyzerError::InvalidTemplateData(format!("missing substitution for '{name}'"))
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Hole(n) => Some(n.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }
}

/// A numeric hole. Values are carried as decimal strings so the rendered
/// JSON number round-trips exactly (no float drift through `f64`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegerTemplate {
    pub variable_name: Option<String>,
    pub literal: Option<i64>,
}

impl IntegerTemplate {
    pub fn build(value1: &Value, variable_name: &str) -> Result<Self> {
        Ok(Self {
            variable_name: Some(variable_name.to_string()),
            literal: Some(Self::coerce(value1)?),
        })
    }

    pub fn literal(value: &Value) -> Result<Self> {
        Ok(Self {
            variable_name: None,
            literal: Some(Self::coerce(value)?),
        })
    }

    /// Booleans are rejected, not coerced to 0/1 — a deliberate divergence
    /// from treating `True`/`False` as integers.
    fn coerce(value: &Value) -> Result<i64> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| AnalyzerError::InvalidTemplateData(format!("{n} is not an integer"))),
            Value::String(s) => s
                .parse::<i64>()
                .map_err(|_| AnalyzerError::InvalidTemplateData(format!("'{s}' is not an integer"))),
            other => Err(AnalyzerError::InvalidTemplateData(format!(
                "{other} is not an integer"
            ))),
        }
    }

    pub fn extract_variable_values(&self, value: &Value) -> Result<BTreeMap<String, String>> {
        let n = Self::coerce(value)?;
        let mut out = BTreeMap::new();
        if let Some(name) = &self.variable_name {
            out.insert(name.clone(), n.to_string());
        }
        Ok(out)
    }

    pub fn evaluate(&self, substitutions: &BTreeMap<String, String>) -> Result<Value> {
        let n = match &self.variable_name {
            Some(name) => substitutions
                .get(name)
                .ok_or_else(|| AnalyzerError::InvalidTemplateData(format!("missing substitution for '{name}'")))?
                .parse::<i64>()
                .map_err(|_| AnalyzerError::InvalidTemplateData(format!("substitution for '{name}' is not an integer")))?,
            None => self
                .literal
                .ok_or_else(|| AnalyzerError::CorruptedTemplate("integer template has no literal".into()))?,
        };
        Ok(Value::Number(n.into()))
    }

    pub fn variable_names(&self) -> Vec<&str> {
        self.variable_name.as_deref().into_iter().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiteralTemplate {
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictTemplate {
    pub entries: BTreeMap<String, TemplateNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTemplate {
    pub items: Vec<TemplateNode>,
}

/// Every node in a template tree, tagged by `type` so it serializes and
/// deserializes without ambiguity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TemplateNode {
    String(StringTemplate),
    Integer(IntegerTemplate),
    Dict(DictTemplate),
    List(ListTemplate),
    Literal(LiteralTemplate),
}

impl TemplateNode {
    /// Build a node from a path in `value1`'s tree, punching a hole only at
    /// paths named in `variables` (dotted-path -> variable name, as produced
    /// by the structural differ for body fields). Everything else is frozen
    /// to `value1`'s value.
    pub fn build(path: &str, value1: &Value, variables: &BTreeMap<String, String>) -> Result<Self> {
        if let Some(name) = variables.get(path) {
            return match value1 {
                Value::Number(n) if n.as_i64().is_some() => {
                    Ok(TemplateNode::Integer(IntegerTemplate::build(value1, name)?))
                }
                Value::String(s) => Ok(TemplateNode::String(StringTemplate::build(
                    s,
                    &[(name.clone(), s.clone())],
                )?)),
                other => {
                    let s = other.to_string();
                    Ok(TemplateNode::String(StringTemplate::build(
                        &s,
                        &[(name.clone(), s.clone())],
                    )?))
                }
            };
        }

        match value1 {
            Value::Object(map) => {
                let mut entries = BTreeMap::new();
                for (key, v) in map {
                    let sub_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    entries.insert(key.clone(), TemplateNode::build(&sub_path, v, variables)?);
                }
                Ok(TemplateNode::Dict(DictTemplate { entries }))
            }
            Value::Array(items) => {
                let mut out = Vec::new();
                for (i, v) in items.iter().enumerate() {
                    let sub_path = format!("{path}[{i}]");
                    out.push(TemplateNode::build(&sub_path, v, variables)?);
                }
                Ok(TemplateNode::List(ListTemplate { items: out }))
            }
            other => Ok(TemplateNode::Literal(LiteralTemplate { value: other.clone() })),
        }
    }

    pub fn extract_variable_values(&self, value: &Value) -> Result<BTreeMap<String, String>> {
        match self {
            TemplateNode::String(t) => {
                let s = scalar_as_str(value)?;
                t.extract_variable_values(&s)
            }
            TemplateNode::Integer(t) => t.extract_variable_values(value),
            TemplateNode::Literal(_) => Ok(BTreeMap::new()),
            TemplateNode::Dict(t) => {
                let map = value.as_object().ok_or_else(|| {
                    AnalyzerError::InvalidTemplateData("expected an object".to_string())
                })?;
                let mut out = BTreeMap::new();
                for (key, node) in &t.entries {
                    let Some(v) = map.get(key) else { continue };
                    merge_variables(&mut out, node.extract_variable_values(v)?)?;
                }
                Ok(out)
            }
            TemplateNode::List(t) => {
                let items = value.as_array().ok_or_else(|| {
                    AnalyzerError::InvalidTemplateData("expected an array".to_string())
                })?;
                if items.len() != t.items.len() {
                    return Err(AnalyzerError::InvalidTemplateData(
                        "array length does not match template".to_string(),
                    ));
                }
                let mut out = BTreeMap::new();
                for (node, v) in t.items.iter().zip(items) {
                    merge_variables(&mut out, node.extract_variable_values(v)?)?;
                }
                Ok(out)
            }
        }
    }

    pub fn evaluate(&self, substitutions: &BTreeMap<String, String>) -> Result<Value> {
        match self {
            TemplateNode::String(t) => Ok(Value::String(t.evaluate(substitutions)?)),
            TemplateNode::Integer(t) => t.evaluate(substitutions),
            TemplateNode::Literal(t) => Ok(t.value.clone()),
            TemplateNode::Dict(t) => {
                let mut map = serde_json::Map::new();
                for (key, node) in &t.entries {
                    map.insert(key.clone(), node.evaluate(substitutions)?);
                }
                Ok(Value::Object(map))
            }
            TemplateNode::List(t) => {
                let mut items = Vec::new();
                for node in &t.items {
                    items.push(node.evaluate(substitutions)?);
                }
                Ok(Value::Array(items))
            }
        }
    }

    pub fn variable_names(&self) -> Vec<String> {
        match self {
            TemplateNode::String(t) => t.variable_names().into_iter().map(String::from).collect(),
            TemplateNode::Integer(t) => t.variable_names().into_iter().map(String::from).collect(),
            TemplateNode::Literal(_) => Vec::new(),
            TemplateNode::Dict(t) => t.entries.values().flat_map(|n| n.variable_names()).collect(),
            TemplateNode::List(t) => t.items.iter().flat_map(|n| n.variable_names()).collect(),
        }
    }
}

fn scalar_as_str(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(AnalyzerError::InvalidTemplateData(format!(
            "{other} is not a scalar"
        ))),
    }
}

fn merge_variables(
    out: &mut BTreeMap<String, String>,
    incoming: BTreeMap<String, String>,
) -> Result<()> {
    for (name, value) in incoming {
        match out.get(&name) {
            Some(existing) if existing != &value => {
                return Err(AnalyzerError::MultipleValuesForVariable(name));
            }
            _ => {
                out.insert(name, value);
            }
        }
    }
    Ok(())
}

/// A request body, tagged by its wire encoding so `evaluate` can compile the
/// rendered tree back into the right format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyTemplate {
    pub encoding: crate::body::BodyEncoding,
    pub tree: TemplateNode,
}

impl BodyTemplate {
    pub fn build(instance: &crate::body::BodyInstance, variables: &BTreeMap<String, String>) -> Result<Self> {
        let root = instance.value.as_tree().cloned().unwrap_or(Value::Null);
        Ok(Self {
            encoding: instance.encoding,
            tree: TemplateNode::build("", &root, variables)?,
        })
    }

    pub fn extract_variable_values(
        &self,
        instance: &crate::body::BodyInstance,
    ) -> Result<BTreeMap<String, String>> {
        if instance.encoding != self.encoding {
            return Err(AnalyzerError::InvalidEncoding {
                expected: self.encoding.as_str().to_string(),
                actual: instance.encoding.as_str().to_string(),
            });
        }
        let root = instance.value.as_tree().cloned().unwrap_or(Value::Null);
        self.tree.extract_variable_values(&root)
    }

    pub fn evaluate(&self, substitutions: &BTreeMap<String, String>) -> Result<crate::body::BodyInstance> {
        let value = self.tree.evaluate(substitutions)?;
        Ok(crate::body::BodyInstance {
            value: crate::body::BodyValue::Tree(value),
            encoding: self.encoding,
        })
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.tree.variable_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_template_single_hole_roundtrip() {
        let t = StringTemplate::build(
            "u293840",
            &[("user_id".to_string(), "u293840".to_string())],
        )
        .unwrap();
        let extracted = t.extract_variable_values("u293840").unwrap();
        assert_eq!(extracted.get("user_id"), Some(&"u293840".to_string()));

        let mut subs = BTreeMap::new();
        subs.insert("user_id".to_string(), "u100".to_string());
        assert_eq!(t.evaluate(&subs).unwrap(), "u100");
    }

    #[test]
    fn string_template_with_boundary_literal() {
        let whole = "/users/u293840/edit";
        let t = StringTemplate::build(whole, &[("path".to_string(), whole.to_string())]).unwrap();
        let extracted = t.extract_variable_values("/users/u293840/edit").unwrap();
        assert_eq!(extracted.get("path"), Some(&"/users/u293840/edit".to_string()));
    }

    #[test]
    fn string_template_places_longest_value_first() {
        // spec scenario: two variables whose values share a prefix in one
        // literal — the longer value must claim its occurrence before the
        // shorter value's pattern can grab a prefix of it.
        let literal = "userA=u239489&userAB=u239489X";
        let variables = vec![
            ("short".to_string(), "u239489".to_string()),
            ("long".to_string(), "u239489X".to_string()),
        ];
        let t = StringTemplate::build(literal, &variables).unwrap();

        let extracted = t
            .extract_variable_values("userA=u293840&userAB=u293840Z")
            .unwrap();
        assert_eq!(extracted.get("short"), Some(&"u293840".to_string()));
        assert_eq!(extracted.get("long"), Some(&"u293840Z".to_string()));
    }

    #[test]
    fn integer_template_rejects_bool() {
        let err = IntegerTemplate::build(&json!(true), "flag").unwrap_err();
        assert!(matches!(err, AnalyzerError::InvalidTemplateData(_)));
    }

    #[test]
    fn integer_template_roundtrip() {
        let t = IntegerTemplate::build(&json!(42), "page").unwrap();
        let extracted = t.extract_variable_values(&json!(42)).unwrap();
        assert_eq!(extracted.get("page"), Some(&"42".to_string()));

        let mut subs = BTreeMap::new();
        subs.insert("page".to_string(), "7".to_string());
        assert_eq!(t.evaluate(&subs).unwrap(), json!(7));
    }

    #[test]
    fn dict_template_only_punches_named_paths() {
        let value1 = json!({"user_id": "u1", "page": 1});
        let mut vars = BTreeMap::new();
        vars.insert("user_id".to_string(), "user_id".to_string());

        let node = TemplateNode::build("", &value1, &vars).unwrap();
        let extracted = node.extract_variable_values(&value1).unwrap();
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted.get("user_id"), Some(&"u1".to_string()));

        let mut subs = BTreeMap::new();
        subs.insert("user_id".to_string(), "u2".to_string());
        let rendered = node.evaluate(&subs).unwrap();
        assert_eq!(rendered, json!({"user_id": "u2", "page": 1}));
    }

    #[test]
    fn repeated_variable_must_agree() {
        let mut vars = BTreeMap::new();
        vars.insert("a".to_string(), "shared".to_string());
        vars.insert("b".to_string(), "shared".to_string());
        let value1 = json!({"a": "x", "b": "x"});
        let node = TemplateNode::build("", &value1, &vars).unwrap();

        let consistent = node.extract_variable_values(&json!({"a": "x", "b": "x"})).unwrap();
        assert_eq!(consistent.get("shared"), Some(&"x".to_string()));

        let err = node
            .extract_variable_values(&json!({"a": "x", "b": "y"}))
            .unwrap_err();
        assert!(matches!(err, AnalyzerError::MultipleValuesForVariable(_)));
    }

    #[test]
    fn body_template_rejects_wrong_encoding() {
        let instance = crate::body::BodyInstance::parse(r#"{"user_id":"u1"}"#, None);
        let vars = BTreeMap::new();
        let template = BodyTemplate::build(&instance, &vars).unwrap();

        let mismatched = crate::body::BodyInstance::parse("user_id=u1", None);
        let err = template.extract_variable_values(&mismatched).unwrap_err();
        assert!(matches!(err, AnalyzerError::InvalidEncoding { .. }));
    }
}
