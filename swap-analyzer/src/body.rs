//! Body codec: detects and round-trips one of six wire encodings.
//!
//! Detection is ordered and first-match-wins — see [`BodyInstance::parse`].
//! `compile` inverts the declared encoding; failing to compile a declared
//! encoding is a programmer error (a corrupted template), never a normal
//! runtime outcome.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AnalyzerError, Result};
use crate::normalize::normalize_mapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    None,
    Json,
    Form,
    UrlEncodedForm,
    UrlEncodedJson,
    Base64Json,
    Unknown,
}

impl BodyEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyEncoding::None => "none",
            BodyEncoding::Json => "json",
            BodyEncoding::Form => "form",
            BodyEncoding::UrlEncodedForm => "url_encoded_form",
            BodyEncoding::UrlEncodedJson => "url_encoded_json",
            BodyEncoding::Base64Json => "base64_json",
            BodyEncoding::Unknown => "unknown",
        }
    }

    fn is_tree(&self) -> bool {
        !matches!(self, BodyEncoding::None | BodyEncoding::Unknown)
    }
}

/// The decoded value of a body: a scalar for `None`/`Unknown`, a JSON parse
/// tree otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BodyValue {
    Scalar(String),
    Tree(Value),
}

impl BodyValue {
    pub fn as_tree(&self) -> Option<&Value> {
        match self {
            BodyValue::Tree(v) => Some(v),
            BodyValue::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            BodyValue::Scalar(s) => Some(s),
            BodyValue::Tree(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyInstance {
    pub value: BodyValue,
    pub encoding: BodyEncoding,
}

impl BodyInstance {
    pub fn is_dict(&self) -> bool {
        self.encoding.is_tree()
    }

    /// Attempt, in order, JSON; (unless `content_type` names JSON) form,
    /// URL-decoded form; URL-decoded JSON; base64 JSON. Falls back to
    /// `Unknown` for any non-empty body matching none of those, and to
    /// `None` only for a genuinely empty body.
    pub fn parse(body: &str, content_type: Option<&str>) -> Self {
        if body.is_empty() {
            return Self {
                value: BodyValue::Scalar(String::new()),
                encoding: BodyEncoding::None,
            };
        }

        if let Ok(mut v) = serde_json::from_str::<Value>(body) {
            normalize_mapping(&mut v);
            return Self {
                value: BodyValue::Tree(v),
                encoding: BodyEncoding::Json,
            };
        }

        let looks_like_json = content_type
            .map(|ct| ct.to_lowercase().contains("json"))
            .unwrap_or(false);

        if !looks_like_json {
            if let Some(v) = Self::try_form(body) {
                return Self {
                    value: BodyValue::Tree(v),
                    encoding: BodyEncoding::Form,
                };
            }

            if let Ok(decoded) = percent_decode_str(body).decode_utf8() {
                if let Some(v) = Self::try_form(&decoded) {
                    return Self {
                        value: BodyValue::Tree(v),
                        encoding: BodyEncoding::UrlEncodedForm,
                    };
                }
            }
        }

        if let Ok(decoded) = percent_decode_str(body).decode_utf8() {
            if let Ok(mut v) = serde_json::from_str::<Value>(&decoded) {
                normalize_mapping(&mut v);
                return Self {
                    value: BodyValue::Tree(v),
                    encoding: BodyEncoding::UrlEncodedJson,
                };
            }
        }

        if let Ok(bytes) = BASE64_STANDARD.decode(body.trim()) {
            if let Ok(text) = std::str::from_utf8(&bytes) {
                if let Ok(mut v) = serde_json::from_str::<Value>(text) {
                    normalize_mapping(&mut v);
                    return Self {
                        value: BodyValue::Tree(v),
                        encoding: BodyEncoding::Base64Json,
                    };
                }
            }
        }

        Self {
            value: BodyValue::Scalar(body.to_string()),
            encoding: BodyEncoding::Unknown,
        }
    }

    fn try_form(body: &str) -> Option<Value> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(body).ok()?;
        if pairs.is_empty() {
            return None;
        }

        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (k, v) in pairs {
            grouped.entry(k).or_default().push(v);
        }

        let mut map = serde_json::Map::new();
        for (k, mut values) in grouped {
            let value = if values.len() == 1 {
                Value::String(values.remove(0))
            } else {
                Value::Array(values.into_iter().map(Value::String).collect())
            };
            map.insert(k, value);
        }

        Some(Value::Object(map))
    }

    /// Invert the declared encoding back into wire bytes. Failure here
    /// signals a corrupted template, not a normal control-flow outcome.
    pub fn compile(&self) -> Result<String> {
        match self.encoding {
            BodyEncoding::None => Ok(String::new()),
            BodyEncoding::Unknown => Ok(self
                .value
                .as_scalar()
                .ok_or_else(|| {
                    AnalyzerError::CorruptedTemplate("unknown body is not scalar".into())
                })?
                .to_string()),
            BodyEncoding::Json => {
                let tree = self.require_tree()?;
                Ok(serde_json::to_string(tree)?)
            }
            BodyEncoding::Form => Ok(Self::compile_form(self.require_tree()?)?),
            BodyEncoding::UrlEncodedForm => {
                let form = Self::compile_form(self.require_tree()?)?;
                Ok(utf8_percent_encode(&form, NON_ALPHANUMERIC).to_string())
            }
            BodyEncoding::UrlEncodedJson => {
                let json = serde_json::to_string(self.require_tree()?)?;
                Ok(utf8_percent_encode(&json, NON_ALPHANUMERIC).to_string())
            }
            BodyEncoding::Base64Json => {
                let json = serde_json::to_string(self.require_tree()?)?;
                Ok(BASE64_STANDARD.encode(json))
            }
        }
    }

    fn require_tree(&self) -> Result<&Value> {
        self.value
            .as_tree()
            .ok_or_else(|| AnalyzerError::CorruptedTemplate("expected a parsed body tree".into()))
    }

    fn compile_form(tree: &Value) -> Result<String> {
        let map = tree.as_object().ok_or_else(|| {
            AnalyzerError::CorruptedTemplate("form body must be an object".into())
        })?;

        let mut pairs: Vec<(String, String)> = Vec::new();
        for (k, v) in map {
            match v {
                Value::String(s) => pairs.push((k.clone(), s.clone())),
                Value::Array(items) => {
                    for item in items {
                        let s = item
                            .as_str()
                            .ok_or_else(|| {
                                AnalyzerError::CorruptedTemplate(
                                    "form values must be strings".into(),
                                )
                            })?
                            .to_string();
                        pairs.push((k.clone(), s));
                    }
                }
                other => pairs.push((k.clone(), other.to_string())),
            }
        }

        serde_urlencoded::to_string(&pairs)
            .map_err(|e| AnalyzerError::CorruptedTemplate(e.to_string()))
    }
}
