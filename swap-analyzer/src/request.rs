//! Request instances and the structural differ between two of them.
//!
//! A [`RequestInstance`] is the normalized shape we compare: a path segment
//! list, a query parameter map, a lowercased header map, and a parsed body.
//! [`diff_instances`] walks two instances location by location and returns
//! the set of fields that differ, each tagged with where it came from.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::body::BodyEncoding;
use crate::body::BodyInstance;
use crate::config::Rules;
use crate::error::{AnalyzerError, Result};
use crate::normalize::normalize_mapping;
use crate::patterns::Mode;

/// Where in the request a differing field was found. Mirrors the location
/// tags used when a [`crate::template::Template`] is later evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    UrlPath,
    Query,
    Header,
    Body,
}

impl Location {
    pub fn as_str(&self) -> &'static str {
        match self {
            Location::UrlPath => "url_path",
            Location::Query => "query",
            Location::Header => "header",
            Location::Body => "body",
        }
    }
}

/// A single request/response pair as captured from one authenticated
/// session, normalized into comparable parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInstance {
    pub instance_id: String,
    pub method: String,
    pub url_path: Vec<String>,
    pub query: Value,
    pub headers: BTreeMap<String, String>,
    pub body: BodyInstance,
}

impl RequestInstance {
    pub fn from_request(
        instance_id: impl Into<String>,
        method: impl Into<String>,
        url: &str,
        headers: &[(String, String)],
        body: &str,
    ) -> Result<Self> {
        let (path, query_string) = split_url_into_path_and_query(url);

        let url_path: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        let mut query = parse_query(&query_string);
        normalize_mapping(&mut query);

        let mut header_map = BTreeMap::new();
        for (name, value) in headers {
            header_map.insert(name.to_lowercase(), value.clone());
        }

        let content_type = header_map.get("content-type").map(String::as_str);
        let body = BodyInstance::parse(body, content_type);

        Ok(Self {
            instance_id: instance_id.into(),
            method: method.into(),
            url_path,
            query,
            headers: header_map,
            body,
        })
    }
}

fn split_url_into_path_and_query(url: &str) -> (String, String) {
    match url.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (url.to_string(), String::new()),
    }
}

fn parse_query(query_string: &str) -> Value {
    if query_string.is_empty() {
        return Value::Object(serde_json::Map::new());
    }

    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_str(query_string).unwrap_or_default();

    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (k, v) in pairs {
        grouped.entry(k).or_default().push(v);
    }

    let mut map = serde_json::Map::new();
    for (k, values) in grouped {
        map.insert(k, Value::Array(values.into_iter().map(Value::String).collect()));
    }

    Value::Object(map)
}

/// A field that differs between two [`RequestInstance`]s, named, located,
/// and carrying the value seen on each side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDiff {
    pub name: String,
    pub location: Location,
    pub value1: Value,
    pub value2: Value,
}

/// Compare two request instances field by field. Returns
/// [`AnalyzerError::DiffingOutOfScope`] when the pair cannot be compared at
/// all: mismatched path segment counts, or more than one differing header
/// (including cookies, which are diffed individually by cookie name).
pub fn diff_instances(
    a: &RequestInstance,
    b: &RequestInstance,
    rules: &Rules,
) -> Result<Vec<FieldDiff>> {
    let mut diffs = Vec::new();

    diffs.extend(diff_url_path(a, b)?);
    diffs.extend(diff_query(a, b, rules));
    diffs.extend(diff_headers(a, b, rules)?);
    diffs.extend(diff_body(a, b)?);

    Ok(diffs)
}

fn diff_url_path(a: &RequestInstance, b: &RequestInstance) -> Result<Vec<FieldDiff>> {
    if a.url_path.len() != b.url_path.len() {
        return Err(AnalyzerError::DiffingOutOfScope(
            "url paths have differing segment counts".to_string(),
        ));
    }

    let mut out = Vec::new();
    for (i, (sa, sb)) in a.url_path.iter().zip(b.url_path.iter()).enumerate() {
        if sa != sb {
            out.push(FieldDiff {
                name: format!("url_path_{i}"),
                location: Location::UrlPath,
                value1: Value::String(sa.clone()),
                value2: Value::String(sb.clone()),
            });
        }
    }
    Ok(out)
}

fn diff_query(a: &RequestInstance, b: &RequestInstance, rules: &Rules) -> Vec<FieldDiff> {
    let (Value::Object(qa), Value::Object(qb)) = (&a.query, &b.query) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let keys: BTreeSet<&String> = qa.keys().chain(qb.keys()).collect();

    for key in keys {
        if rules.query_parameter_name_ignore.matches(key, Mode::Search) {
            continue;
        }

        let (Some(va), Some(vb)) = (qa.get(key), qb.get(key)) else {
            continue;
        };

        if let Some(ignore) = &rules.query_parameter_value_ignore {
            if value_matches_ignore(va, ignore) && value_matches_ignore(vb, ignore) {
                continue;
            }
        }

        if va != vb {
            out.push(FieldDiff {
                name: key.clone(),
                location: Location::Query,
                value1: va.clone(),
                value2: vb.clone(),
            });
        }
    }
    out
}

fn value_matches_ignore(value: &Value, ignore: &crate::patterns::PatternList) -> bool {
    match value {
        Value::String(s) => ignore.matches(s, Mode::Search),
        Value::Array(items) => items.iter().all(|v| value_matches_ignore(v, ignore)),
        _ => false,
    }
}

fn diff_headers(a: &RequestInstance, b: &RequestInstance, rules: &Rules) -> Result<Vec<FieldDiff>> {
    let mut out = Vec::new();
    let names: BTreeSet<&String> = a.headers.keys().chain(b.headers.keys()).collect();

    for name in names {
        let (Some(va), Some(vb)) = (a.headers.get(name), b.headers.get(name)) else {
            continue;
        };

        if name == "cookie" {
            out.extend(diff_cookie_header(va, vb, rules));
            continue;
        }

        if rules.header_ignore.matches(name, Mode::Search) {
            continue;
        }

        if va != vb {
            out.push(FieldDiff {
                name: name.clone(),
                location: Location::Header,
                value1: Value::String(va.clone()),
                value2: Value::String(vb.clone()),
            });
        }
    }

    if out.len() > 1 {
        return Err(AnalyzerError::DiffingOutOfScope(
            "more than one differing header".to_string(),
        ));
    }

    Ok(out)
}

fn diff_cookie_header(a: &str, b: &str, rules: &Rules) -> Vec<FieldDiff> {
    let ca = parse_cookie_header(a);
    let cb = parse_cookie_header(b);

    let mut out = Vec::new();
    let names: BTreeSet<&String> = ca.keys().chain(cb.keys()).collect();

    for name in names {
        if rules.cookie_ignore.matches(name, Mode::Search) {
            continue;
        }
        let (Some(va), Some(vb)) = (ca.get(name), cb.get(name)) else {
            continue;
        };
        if va != vb {
            out.push(FieldDiff {
                name: name.clone(),
                location: Location::Header,
                value1: Value::String(va.clone()),
                value2: Value::String(vb.clone()),
            });
        }
    }
    out
}

pub(crate) fn parse_cookie_header(value: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for part in value.split(';') {
        let part = part.trim();
        if let Some((k, v)) = part.split_once('=') {
            out.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    out
}

fn diff_body(a: &RequestInstance, b: &RequestInstance) -> Result<Vec<FieldDiff>> {
    match (a.body.encoding, b.body.encoding) {
        (BodyEncoding::None, BodyEncoding::None) => Ok(Vec::new()),
        (enc_a, enc_b) if enc_a != enc_b => {
            if matches!(enc_a, BodyEncoding::None | BodyEncoding::Unknown)
                && matches!(enc_b, BodyEncoding::None | BodyEncoding::Unknown)
            {
                Ok(Vec::new())
            } else {
                Err(AnalyzerError::DiffingOutOfScope(
                    "bodies use different encodings".to_string(),
                ))
            }
        }
        (BodyEncoding::Unknown, BodyEncoding::Unknown) => Ok(Vec::new()),
        _ => {
            let mut out = Vec::new();
            if let (Some(va), Some(vb)) = (a.body.value.as_tree(), b.body.value.as_tree()) {
                diff_value_tree("", va, vb, &mut out);
            }
            Ok(out)
        }
    }
}

fn diff_value_tree(path: &str, a: &Value, b: &Value, out: &mut Vec<FieldDiff>) {
    match (a, b) {
        (Value::Object(ma), Value::Object(mb)) => {
            let keys: BTreeSet<&String> = ma.keys().chain(mb.keys()).collect();
            for key in keys {
                let sub_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                if let (Some(va), Some(vb)) = (ma.get(key), mb.get(key)) {
                    diff_value_tree(&sub_path, va, vb, out);
                }
            }
        }
        (Value::Array(la), Value::Array(lb)) if la.len() == lb.len() => {
            for (i, (va, vb)) in la.iter().zip(lb.iter()).enumerate() {
                let sub_path = format!("{path}[{i}]");
                diff_value_tree(&sub_path, va, vb, out);
            }
        }
        _ => {
            if a != b {
                out.push(FieldDiff {
                    name: path.to_string(),
                    location: Location::Body,
                    value1: a.clone(),
                    value2: b.clone(),
                });
            }
        }
    }
}
