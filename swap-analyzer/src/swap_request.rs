//! Composing per-field templates into a whole parameterized request.
//!
//! A [`SwapRequestTemplate`] is built once from a base [`RequestInstance`]
//! and the set of fields classified as swap variables; a [`SwapRequest`]
//! pairs that template with the concrete instances it was learned from, so
//! a caller can re-derive variable values from either one.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::body::BodyInstance;
use crate::error::{AnalyzerError, Result};
use crate::request::{parse_cookie_header, Location, RequestInstance};
use crate::template::{BodyTemplate, StringTemplate};

/// A field singled out by the classifier as worth exposing as a
/// substitution point, with the concrete value seen on each side.
///
/// `field_key` is the field's original, location-specific identifier (a
/// positional `url_path_N`, a raw header/query key, or a dotted/bracketed
/// body path) and is how [`SwapRequestTemplate::build`] finds *where* to
/// punch a hole. `name` is the externally-visible, sanitized variable name
/// — after [`crate::candidate`]'s unification step it may differ from
/// `field_key` when the same value was seen under different identifiers in
/// different locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapVariableSpec {
    pub name: String,
    pub field_key: String,
    pub location: Location,
    pub value1: Value,
    pub value2: Value,
}

/// A fully rendered request, ready to hand to an external replay worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedRequest {
    pub method: String,
    pub url_path: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// The parameterized shape of a request: every URL segment, header, and
/// query parameter is either frozen literal text or a named hole, and the
/// body is its own sub-template carrying its wire encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRequestTemplate {
    pub method: String,
    pub url_path: Vec<StringTemplate>,
    pub headers: BTreeMap<String, StringTemplate>,
    pub query: BTreeMap<String, StringTemplate>,
    pub body: BodyTemplate,
}

impl SwapRequestTemplate {
    pub fn build(base: &RequestInstance, variables: &[SwapVariableSpec]) -> Result<Self> {
        let url_path = base
            .url_path
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                let field_key = format!("url_path_{i}");
                match find_by_field_key(variables, Location::UrlPath, &field_key) {
                    Some(v) => StringTemplate::build(segment, &[(v.name.clone(), segment.clone())]),
                    None => Ok(StringTemplate::literal(segment)),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let mut headers = BTreeMap::new();
        for (name, value) in &base.headers {
            let template = if name == "cookie" {
                build_cookie_header_template(value, variables)?
            } else {
                match find_by_field_key(variables, Location::Header, name) {
                    Some(v) => StringTemplate::build(value, &[(v.name.clone(), value.clone())])?,
                    None => StringTemplate::literal(value),
                }
            };
            headers.insert(name.clone(), template);
        }

        let mut query = BTreeMap::new();
        if let Value::Object(map) = &base.query {
            for (name, value) in map {
                let text = scalar_or_join(value);
                let template = match find_by_field_key(variables, Location::Query, name) {
                    Some(v) => StringTemplate::build(&text, &[(v.name.clone(), text.clone())])?,
                    None => StringTemplate::literal(&text),
                };
                query.insert(name.clone(), template);
            }
        }

        let body_vars: BTreeMap<String, String> = variables
            .iter()
            .filter(|v| v.location == Location::Body)
            .map(|v| (v.field_key.clone(), v.name.clone()))
            .collect();
        let body = BodyTemplate::build(&base.body, &body_vars)?;

        Ok(Self {
            method: base.method.clone(),
            url_path,
            headers,
            query,
            body,
        })
    }

    pub fn extract_variable_values(&self, instance: &RequestInstance) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();

        if instance.url_path.len() != self.url_path.len() {
            return Err(AnalyzerError::InvalidTemplateData(
                "instance has a different number of url path segments".to_string(),
            ));
        }
        for (template, segment) in self.url_path.iter().zip(&instance.url_path) {
            merge(&mut out, template.extract_variable_values(segment)?)?;
        }

        for (name, template) in &self.headers {
            let Some(value) = instance.headers.get(name) else {
                continue;
            };
            merge(&mut out, template.extract_variable_values(value)?)?;
        }

        if let Value::Object(map) = &instance.query {
            for (name, template) in &self.query {
                let Some(value) = map.get(name) else { continue };
                merge(&mut out, template.extract_variable_values(&scalar_or_join(value))?)?;
            }
        }

        merge(&mut out, self.body.extract_variable_values(&instance.body)?)?;

        Ok(out)
    }

    pub fn evaluate(&self, substitutions: &BTreeMap<String, String>) -> Result<RenderedRequest> {
        let segments = self
            .url_path
            .iter()
            .map(|t| t.evaluate(substitutions))
            .collect::<Result<Vec<_>>>()?;
        let url_path = format!("/{}", segments.join("/"));

        let mut headers = BTreeMap::new();
        for (name, template) in &self.headers {
            headers.insert(name.clone(), template.evaluate(substitutions)?);
        }

        let mut query = BTreeMap::new();
        for (name, template) in &self.query {
            query.insert(name.clone(), template.evaluate(substitutions)?);
        }

        let body_instance: BodyInstance = self.body.evaluate(substitutions)?;
        let body = body_instance.compile()?;

        Ok(RenderedRequest {
            method: self.method.clone(),
            url_path,
            query,
            headers,
            body,
        })
    }

    pub fn variable_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for t in &self.url_path {
            names.extend(t.variable_names().into_iter().map(String::from));
        }
        for t in self.headers.values().chain(self.query.values()) {
            names.extend(t.variable_names().into_iter().map(String::from));
        }
        names.extend(self.body.variable_names());
        names
    }

    /// A SHA-1 digest over the canonical (key-sorted) JSON form, stable
    /// across processes as long as the template itself is unchanged.
    pub fn hash(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        let mut hasher = Sha1::new();
        hasher.update(json.as_bytes());
        Ok(to_hex(&hasher.finalize()))
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A template paired with the instances it was learned from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRequest {
    pub template: SwapRequestTemplate,
    pub instances: Vec<RequestInstance>,
}

impl SwapRequest {
    /// Build the template from `base`, then register `other` against it.
    /// Registration re-derives `other`'s variable values through the fresh
    /// template and fails with [`AnalyzerError::MultipleValuesForVariable`]
    /// if the same variable name was seen with conflicting values at two
    /// different locations (e.g. a unified `user_id` reading `def` from the
    /// URL but `xyz` from the body).
    pub fn build(base: &RequestInstance, variables: &[SwapVariableSpec], other: &RequestInstance) -> Result<Self> {
        let template = SwapRequestTemplate::build(base, variables)?;
        let mut swap_request = Self {
            template,
            instances: vec![base.clone()],
        };
        swap_request.register_instance(other.clone())?;
        Ok(swap_request)
    }

    pub fn register_instance(&mut self, instance: RequestInstance) -> Result<()> {
        self.template.extract_variable_values(&instance)?;
        self.instances.push(instance);
        Ok(())
    }

    pub fn extract_values(&self) -> Result<Vec<BTreeMap<String, String>>> {
        self.instances
            .iter()
            .map(|i| self.template.extract_variable_values(i))
            .collect()
    }

    pub fn evaluate(&self, substitutions: &BTreeMap<String, String>) -> Result<RenderedRequest> {
        self.template.evaluate(substitutions)
    }

    pub fn hash(&self) -> Result<String> {
        self.template.hash()
    }

    pub fn preview(&self) -> Result<RenderedRequest> {
        let base = self.instances.first().ok_or_else(|| {
            AnalyzerError::Other("swap request has no registered instances".to_string())
        })?;
        let substitutions = self.template.extract_variable_values(base)?;
        self.template.evaluate(&substitutions)
    }
}

fn find_by_field_key<'a>(
    variables: &'a [SwapVariableSpec],
    location: Location,
    field_key: &str,
) -> Option<&'a SwapVariableSpec> {
    variables
        .iter()
        .find(|v| v.location == location && v.field_key == field_key)
}

/// A raw `cookie` header can carry several distinct swap variables (one per
/// cookie name) in a single literal string, unlike any other header — this
/// is the one call site that actually exercises
/// [`StringTemplate::build`]'s multi-variable placement.
fn build_cookie_header_template(raw: &str, variables: &[SwapVariableSpec]) -> Result<StringTemplate> {
    let cookies = parse_cookie_header(raw);
    let cookie_vars: Vec<(String, String)> = variables
        .iter()
        .filter(|v| v.location == Location::Header && cookies.contains_key(&v.field_key))
        .map(|v| (v.name.clone(), scalar_or_join(&v.value1)))
        .collect();

    if cookie_vars.is_empty() {
        return Ok(StringTemplate::literal(raw));
    }
    StringTemplate::build(raw, &cookie_vars)
}

fn scalar_or_join(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(scalar_or_join)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

fn merge(out: &mut BTreeMap<String, String>, incoming: BTreeMap<String, String>) -> Result<()> {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str, url: &str, headers: &[(&str, &str)], body: &str) -> RequestInstance {
        let headers: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RequestInstance::from_request(id, "GET", url, &headers, body).unwrap()
    }

    #[test]
    fn builds_and_evaluates_url_path_variable() {
        let a = instance("1", "/api/users/u293840/profile", &[], "");
        let b = instance("2", "/api/users/u999999/profile", &[], "");

        let variables = vec![SwapVariableSpec {
            name: "url_path_2".to_string(),
            field_key: "url_path_2".to_string(),
            location: Location::UrlPath,
            value1: Value::String("u293840".to_string()),
            value2: Value::String("u999999".to_string()),
        }];

        let swap = SwapRequest::build(&a, &variables, &b).unwrap();
        let extracted = swap.template.extract_variable_values(&a).unwrap();
        assert_eq!(extracted.get("url_path_2"), Some(&"u293840".to_string()));

        let mut subs = BTreeMap::new();
        subs.insert("url_path_2".to_string(), "u555555".to_string());
        let rendered = swap.evaluate(&subs).unwrap();
        assert_eq!(rendered.url_path, "/api/users/u555555/profile");
    }

    #[test]
    fn hash_is_stable_for_equal_templates() {
        let a = instance("1", "/api/users/u1", &[], "");
        let b = instance("2", "/api/users/u2", &[], "");
        let variables = vec![SwapVariableSpec {
            name: "url_path_2".to_string(),
            field_key: "url_path_2".to_string(),
            location: Location::UrlPath,
            value1: Value::String("u1".to_string()),
            value2: Value::String("u2".to_string()),
        }];

        let t1 = SwapRequestTemplate::build(&a, &variables).unwrap();
        let t2 = SwapRequestTemplate::build(&a, &variables).unwrap();
        assert_eq!(t1.hash().unwrap(), t2.hash().unwrap());
    }

    #[test]
    fn body_variable_roundtrips_through_swap_request() {
        let a = instance("1", "/x", &[], r#"{"owner":"alice","page":1}"#);
        let b = instance("2", "/x", &[], r#"{"owner":"bob","page":1}"#);
        let variables = vec![SwapVariableSpec {
            name: "owner".to_string(),
            field_key: "owner".to_string(),
            location: Location::Body,
            value1: Value::String("alice".to_string()),
            value2: Value::String("bob".to_string()),
        }];

        let swap = SwapRequest::build(&a, &variables, &b).unwrap();
        let mut subs = BTreeMap::new();
        subs.insert("owner".to_string(), "carol".to_string());
        let rendered = swap.evaluate(&subs).unwrap();
        let body: Value = serde_json::from_str(&rendered.body).unwrap();
        assert_eq!(body["owner"], "carol");
        assert_eq!(body["page"], 1);
    }

    #[test]
    fn cookie_header_carries_multiple_swap_variables() {
        let a = instance(
            "1",
            "/x",
            &[("cookie", "session=s1; user_id=u293840")],
            "",
        );
        let b = instance(
            "2",
            "/x",
            &[("cookie", "session=s2; user_id=u999999")],
            "",
        );
        let variables = vec![
            SwapVariableSpec {
                name: "session".to_string(),
                field_key: "session".to_string(),
                location: Location::Header,
                value1: Value::String("s1".to_string()),
                value2: Value::String("s2".to_string()),
            },
            SwapVariableSpec {
                name: "user_id".to_string(),
                field_key: "user_id".to_string(),
                location: Location::Header,
                value1: Value::String("u293840".to_string()),
                value2: Value::String("u999999".to_string()),
            },
        ];

        let swap = SwapRequest::build(&a, &variables, &b).unwrap();
        let extracted = swap.template.extract_variable_values(&a).unwrap();
        assert_eq!(extracted.get("session"), Some(&"s1".to_string()));
        assert_eq!(extracted.get("user_id"), Some(&"u293840".to_string()));

        let mut subs = BTreeMap::new();
        subs.insert("session".to_string(), "s1".to_string());
        subs.insert("user_id".to_string(), "u1".to_string());
        let rendered = swap.evaluate(&subs).unwrap();
        assert_eq!(rendered.headers.get("cookie").unwrap(), "session=s1; user_id=u1");
    }

    #[test]
    fn conflicting_values_across_locations_fail_registration() {
        let a = instance("1", "/items/abc", &[], r#"{"user_id":"abc"}"#);
        let b = instance("2", "/items/def", &[], r#"{"user_id":"xyz"}"#);
        let variables = vec![
            SwapVariableSpec {
                name: "shared".to_string(),
                field_key: "url_path_1".to_string(),
                location: Location::UrlPath,
                value1: Value::String("abc".to_string()),
                value2: Value::String("def".to_string()),
            },
            SwapVariableSpec {
                name: "shared".to_string(),
                field_key: "user_id".to_string(),
                location: Location::Body,
                value1: Value::String("abc".to_string()),
                value2: Value::String("xyz".to_string()),
            },
        ];

        let err = SwapRequest::build(&a, &variables, &b).unwrap_err();
        assert!(matches!(err, AnalyzerError::MultipleValuesForVariable(_)));
    }
}
