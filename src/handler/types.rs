use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::error::HandlerError;
use crate::warc::HeaderMap;

/// Position of a handler in its registry. Stable for the registry's
/// lifetime because handlers are only ever appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(pub(crate) usize);

impl HandlerId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// What a handler says about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerDescriptor {
    /// Unique within a run and stable across runs.
    pub name: String,
    pub version: u32,
    pub description: String,
    /// How to capture an archive this handler can use.
    pub instructions: Option<String>,
    /// Artifacts written to the handler's output directory.
    pub output_data: Vec<String>,
}

/// A query-string or form value.
///
/// A key seen once is a scalar; a key seen more than once keeps every
/// value, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    Multiple(Vec<String>),
}

impl QueryValue {
    pub fn as_single(&self) -> Option<&str> {
        match self {
            QueryValue::Single(value) => Some(value),
            QueryValue::Multiple(_) => None,
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            QueryValue::Single(value) => vec![value.as_str()],
            QueryValue::Multiple(values) => values.iter().map(String::as_str).collect(),
        }
    }

    fn push(&mut self, value: String) {
        match self {
            QueryValue::Single(first) => {
                *self = QueryValue::Multiple(vec![std::mem::take(first), value]);
            }
            QueryValue::Multiple(values) => values.push(value),
        }
    }
}

/// Decoded `application/x-www-form-urlencoded` pairs grouped by key, keys in
/// first-seen order. Pairs with an empty value are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, QueryValue)>);

impl QueryParams {
    pub fn parse(encoded: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(encoded.as_bytes()) {
            if value.is_empty() {
                continue;
            }
            match params.0.iter_mut().find(|(k, _)| *k == key) {
                Some((_, existing)) => existing.push(value.into_owned()),
                None => params
                    .0
                    .push((key.into_owned(), QueryValue::Single(value.into_owned()))),
            }
        }
        params
    }

    /// Parameters of the query component of `url`.
    pub fn from_url(url: &str) -> Self {
        match url::Url::parse(url) {
            Ok(parsed) => parsed.query().map(Self::parse).unwrap_or_default(),
            Err(_) => {
                let without_fragment = url.split('#').next().unwrap_or(url);
                without_fragment
                    .split_once('?')
                    .map(|(_, query)| Self::parse(query))
                    .unwrap_or_default()
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&QueryValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .0
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    QueryValue::Single(s) => Value::String(s.clone()),
                    QueryValue::Multiple(values) => {
                        Value::Array(values.iter().cloned().map(Value::String).collect())
                    }
                };
                (k.clone(), value)
            })
            .collect();
        Value::Object(map)
    }
}

impl Serialize for QueryParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// The request side of a pair, with the response metadata handlers
/// usually filter on.
#[derive(Debug, Clone, Serialize)]
pub struct RequestData {
    pub url: String,
    pub method: String,
    pub headers: HeaderMap,
    pub query_data: QueryParams,
    /// Parsed body of a form or JSON POST.
    pub post_data: Option<Value>,
    pub response_type: String,
    pub content_length: Option<u64>,
    pub timestamp: String,
    pub status_code: Option<u16>,
}

/// The response side of a pair. The body is buffered once, before dispatch.
#[derive(Debug, Clone)]
pub struct ResponseData {
    pub content: Vec<u8>,
    pub content_type: String,
    pub content_length: Option<u64>,
    pub status_code: Option<u16>,
}

impl ResponseData {
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    pub fn is_json(&self) -> bool {
        self.content_type.to_ascii_lowercase().contains("json")
    }

    /// Body parsed as JSON, whatever the declared content type.
    pub fn json(&self) -> Result<Value, HandlerError> {
        Ok(serde_json::from_slice(&self.content)?)
    }
}
