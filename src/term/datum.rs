//! Leaf values of the query AST and decoded results.

use std::collections::BTreeMap;

use base64::Engine;
use serde_json::{Map, Number, Value};

use crate::error::{Error, Result};

/// A literal value, either composed by the caller (to be embedded in a
/// `Term`) or decoded from a server response.
///
/// `Time`, `Binary`, and `GroupedData` correspond to the `$reql_type$`
/// tagged objects described in spec §4.1; everything else is a plain JSON
/// scalar/array/object.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Datum>),
    Object(BTreeMap<String, Datum>),
    Time { epoch_time: f64, timezone: String },
    Binary(Vec<u8>),
    GroupedData(Vec<(Datum, Datum)>),
}

/// `"native"` (default) or `"raw"` — the decoding mode for one of the
/// `time_format`/`binary_format`/`group_format` global options (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Decode `$reql_type$`-tagged objects into their native `Datum`
    /// variant (`Time`, `Binary`, `GroupedData`).
    Native,
    /// Leave the tagged object as a plain `Datum::Object`, untouched.
    Raw,
}

impl Default for Format {
    fn default() -> Self {
        Format::Native
    }
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Native => "native",
            Format::Raw => "raw",
        }
    }
}

/// Per-`run` decoding preferences threaded from `RunOpts` down into the
/// response decoder, one `Format` per tagged-datum kind (spec §4.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOpts {
    pub time_format: Format,
    pub binary_format: Format,
    pub group_format: Format,
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::String(s) => Some(s),
            _ => None,
        }
    }

    /// Lossless i64 accessor: returns `None` rather than truncating if the
    /// number does not fit, per the large-integer policy (SPEC_FULL §B.4).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Datum]> {
        match self {
            Datum::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Datum>> {
        match self {
            Datum::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Encode to the JSON value the wire codec sends for a literal datum
    /// embedded directly (not as part of a `MAKE_ARRAY`/`MAKE_OBJ` operator
    /// — callers needing the operator form go through `Term::from`).
    pub fn to_json(&self) -> Value {
        match self {
            Datum::Null => Value::Null,
            Datum::Bool(b) => Value::Bool(*b),
            Datum::Number(n) => Value::Number(n.clone()),
            Datum::String(s) => Value::String(s.clone()),
            Datum::Array(items) => Value::Array(items.iter().map(Datum::to_json).collect()),
            Datum::Object(map) => {
                let mut obj = Map::new();
                for (k, v) in map {
                    obj.insert(k.clone(), v.to_json());
                }
                Value::Object(obj)
            }
            Datum::Time {
                epoch_time,
                timezone,
            } => {
                let mut obj = Map::new();
                obj.insert("$reql_type$".into(), Value::String("TIME".into()));
                obj.insert(
                    "epoch_time".into(),
                    Value::Number(
                        Number::from_f64(*epoch_time).unwrap_or_else(|| Number::from(0)),
                    ),
                );
                obj.insert("timezone".into(), Value::String(timezone.clone()));
                Value::Object(obj)
            }
            Datum::Binary(bytes) => {
                let mut obj = Map::new();
                obj.insert("$reql_type$".into(), Value::String("BINARY".into()));
                obj.insert(
                    "data".into(),
                    Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)),
                );
                Value::Object(obj)
            }
            Datum::GroupedData(pairs) => {
                let mut obj = Map::new();
                obj.insert(
                    "$reql_type$".into(),
                    Value::String("GROUPED_DATA".into()),
                );
                let data = pairs
                    .iter()
                    .map(|(k, v)| Value::Array(vec![k.to_json(), v.to_json()]))
                    .collect();
                obj.insert("data".into(), Value::Array(data));
                Value::Object(obj)
            }
        }
    }

    /// Decode a server-sent JSON value into a `Datum`, recognizing
    /// `$reql_type$` tags per spec §4.1, always in `native` mode. Most
    /// callers that need `time_format`/`binary_format`/`group_format`
    /// respected should use [`Datum::from_json_with`] instead; this is kept
    /// for pure-datum contexts (builder literals, tests) that have no
    /// surrounding `RunOpts`.
    pub fn from_json(value: &Value) -> Result<Datum> {
        Datum::from_json_with(value, &DecodeOpts::default())
    }

    /// Like `from_json`, but honors `opts`: a tag whose `Format` is `Raw`
    /// decodes to a plain `Datum::Object` instead of the specialized
    /// variant (spec §4.1's `time_format`/`binary_format`/`group_format`).
    pub fn from_json_with(value: &Value, opts: &DecodeOpts) -> Result<Datum> {
        match value {
            Value::Null => Ok(Datum::Null),
            Value::Bool(b) => Ok(Datum::Bool(*b)),
            Value::Number(n) => Ok(Datum::Number(n.clone())),
            Value::String(s) => Ok(Datum::String(s.clone())),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(Datum::from_json_with(item, opts)?);
                }
                Ok(Datum::Array(out))
            }
            Value::Object(map) => match map.get("$reql_type$").and_then(Value::as_str) {
                Some("TIME") if opts.time_format == Format::Native => {
                    let epoch_time = map
                        .get("epoch_time")
                        .and_then(Value::as_f64)
                        .ok_or_else(|| Error::driver("TIME datum missing epoch_time"))?;
                    let timezone = map
                        .get("timezone")
                        .and_then(Value::as_str)
                        .ok_or_else(|| Error::driver("TIME datum missing timezone"))?
                        .to_string();
                    Ok(Datum::Time {
                        epoch_time,
                        timezone,
                    })
                }
                Some("BINARY") if opts.binary_format == Format::Native => {
                    let data = map
                        .get("data")
                        .and_then(Value::as_str)
                        .ok_or_else(|| Error::driver("BINARY datum missing data"))?;
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(data)
                        .map_err(|e| Error::driver(format!("invalid BINARY datum: {e}")))?;
                    Ok(Datum::Binary(bytes))
                }
                Some("GROUPED_DATA") if opts.group_format == Format::Native => {
                    let data = map
                        .get("data")
                        .and_then(Value::as_array)
                        .ok_or_else(|| Error::driver("GROUPED_DATA datum missing data"))?;
                    let mut pairs = Vec::with_capacity(data.len());
                    for entry in data {
                        let pair = entry
                            .as_array()
                            .filter(|p| p.len() == 2)
                            .ok_or_else(|| Error::driver("GROUPED_DATA entry malformed"))?;
                        pairs.push((
                            Datum::from_json_with(&pair[0], opts)?,
                            Datum::from_json_with(&pair[1], opts)?,
                        ));
                    }
                    Ok(Datum::GroupedData(pairs))
                }
                _ => {
                    let mut out = BTreeMap::new();
                    for (k, v) in map {
                        out.insert(k.clone(), Datum::from_json_with(v, opts)?);
                    }
                    Ok(Datum::Object(out))
                }
            },
        }
    }
}

impl From<bool> for Datum {
    fn from(b: bool) -> Self {
        Datum::Bool(b)
    }
}

impl From<i64> for Datum {
    fn from(n: i64) -> Self {
        Datum::Number(Number::from(n))
    }
}

impl From<f64> for Datum {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map(Datum::Number).unwrap_or(Datum::Null)
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Datum::String(s.to_string())
    }
}

impl From<String> for Datum {
    fn from(s: String) -> Self {
        Datum::String(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_round_trips_through_json() {
        let datum = Datum::Time {
            epoch_time: 1_600_000_000.5,
            timezone: "+00:00".to_string(),
        };
        let json = datum.to_json();
        let decoded = Datum::from_json(&json).unwrap();
        assert_eq!(datum, decoded);
    }

    #[test]
    fn binary_round_trips_through_json() {
        let datum = Datum::Binary(vec![0, 1, 2, 255]);
        let json = datum.to_json();
        let decoded = Datum::from_json(&json).unwrap();
        assert_eq!(datum, decoded);
    }

    #[test]
    fn grouped_data_round_trips_through_json() {
        let datum = Datum::GroupedData(vec![(Datum::from(1i64), Datum::from("a"))]);
        let json = datum.to_json();
        let decoded = Datum::from_json(&json).unwrap();
        assert_eq!(datum, decoded);
    }

    #[test]
    fn raw_time_format_keeps_tagged_object_untouched() {
        let datum = Datum::Time {
            epoch_time: 1_600_000_000.5,
            timezone: "+00:00".to_string(),
        };
        let json = datum.to_json();
        let opts = DecodeOpts {
            time_format: Format::Raw,
            ..DecodeOpts::default()
        };
        let decoded = Datum::from_json_with(&json, &opts).unwrap();
        match decoded {
            Datum::Object(map) => {
                assert_eq!(map.get("$reql_type$").and_then(Datum::as_str), Some("TIME"));
            }
            other => panic!("expected a raw tagged object, got {other:?}"),
        }
    }

    #[test]
    fn large_integer_does_not_silently_truncate() {
        let huge = Number::from(u64::MAX);
        let datum = Datum::Number(huge);
        assert_eq!(datum.as_i64(), None);
    }

    #[test]
    fn plain_object_without_tag_round_trips() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Datum::from(1i64));
        let datum = Datum::Object(map);
        let json = datum.to_json();
        let decoded = Datum::from_json(&json).unwrap();
        assert_eq!(datum, decoded);
    }
}
