//! Cache key derivation.
//!
//! Two requests are "the same" when they target the same endpoint path with
//! the same query parameters. The order of distinct parameter names in the URL
//! does not matter; the order of repeated values for one name does, because
//! the upstream sees `hourly=a&hourly=b` and `hourly=b&hourly=a` differently.
//!
//! ```text
//! /v1/forecast?longitude=5.1&latitude=52.1
//!   → /v1/forecast:{"latitude":"52.1","longitude":"5.1"}
//!   → sha256 → 64 lowercase hex chars
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// One `name=value` pair of a query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    name: String,
    value: String,
    /// The pair as sent by the client, still percent-encoded.
    encoded: String,
    /// False when the name or value is not UTF-8 once percent-decoded. Both
    /// then hold the raw text.
    decoded: bool,
}

impl QueryParam {
    fn from_encoded(segment: &str) -> Self {
        let (raw_name, raw_value) = segment.split_once('=').unwrap_or((segment, ""));
        match (decode_component(raw_name), decode_component(raw_value)) {
            (Some(name), Some(value)) => Self {
                name,
                value,
                encoded: segment.to_string(),
                decoded: true,
            },
            _ => Self {
                name: raw_name.to_string(),
                value: raw_value.to_string(),
                encoded: segment.to_string(),
                decoded: false,
            },
        }
    }

    fn from_decoded(name: String, value: String) -> Self {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(&name, &value)
            .finish();
        Self {
            name,
            value,
            encoded,
            decoded: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn is_decoded(&self) -> bool {
        self.decoded
    }
}

/// `application/x-www-form-urlencoded` decoding that refuses to invent text:
/// `None` when the bytes are not UTF-8.
fn decode_component(raw: &str) -> Option<String> {
    let spaced: Cow<'_, str> = if raw.contains('+') {
        Cow::Owned(raw.replace('+', " "))
    } else {
        Cow::Borrowed(raw)
    };
    percent_decode_str(&spaced)
        .decode_utf8()
        .ok()
        .map(Cow::into_owned)
}

/// Query parameters in the order they appeared in the request.
///
/// Repeated names are kept as separate pairs; nothing is collapsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    params: Vec<QueryParam>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw (still percent-encoded) query string, without the leading `?`.
    pub fn parse(raw: &str) -> Self {
        let params = raw
            .split('&')
            .filter(|segment| !segment.is_empty())
            .map(QueryParam::from_encoded)
            .collect();
        Self { params }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            params: pairs
                .into_iter()
                .map(|(k, v)| QueryParam::from_decoded(k.into(), v.into()))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryParam> {
        self.params.iter()
    }

    /// `(name, value)` pairs in request order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|p| (p.name(), p.value()))
    }

    /// The query string to forward, byte for byte as received.
    pub fn to_query_string(&self) -> String {
        self.params
            .iter()
            .map(QueryParam::encoded)
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// All values for `name`, in request order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.params
            .iter()
            .filter(move |p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

/// Hex digest identifying one cacheable request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonical text hashed into the cache key: `<endpoint>:<json>`.
///
/// The JSON object has its names in ascending byte order. A name that appears
/// once maps to a string, a repeated name maps to an array of its values in
/// request order. No parameters serialize as `{}`.
///
/// Pairs that do not decode to UTF-8 are left out of the object and appended
/// as `:<json array>` of their encoded text, in request order, so they never
/// collide with a decoded value that reads the same.
pub fn canonical_form(endpoint: &str, params: &QueryParams) -> String {
    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut undecoded = Vec::new();
    for param in params.iter() {
        if param.is_decoded() {
            grouped.entry(param.name()).or_default().push(param.value());
        } else {
            undecoded.push(Value::String(param.encoded().to_string()));
        }
    }

    // Inserted in sorted order, so the output is stable even when serde_json
    // is built with `preserve_order`.
    let mut object = Map::with_capacity(grouped.len());
    for (name, mut values) in grouped {
        let value = if values.len() == 1 {
            Value::String(values.remove(0).to_string())
        } else {
            Value::Array(
                values
                    .into_iter()
                    .map(|v| Value::String(v.to_string()))
                    .collect(),
            )
        };
        object.insert(name.to_string(), value);
    }

    if undecoded.is_empty() {
        format!("{endpoint}:{}", Value::Object(object))
    } else {
        format!(
            "{endpoint}:{}:{}",
            Value::Object(object),
            Value::Array(undecoded)
        )
    }
}

/// Derive the cache key for a request to `endpoint` with `params`.
pub fn derive_cache_key(endpoint: &str, params: &QueryParams) -> CacheKey {
    let canonical = canonical_form(endpoint, params);
    let digest = Sha256::digest(canonical.as_bytes());
    CacheKey(hex::encode(digest))
}
