// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! The object-graph ("pickle") codec.
//!
//! Unlike the binary codec, this one is unchecked: `serde_pickle` will happily hand back *some*
//! `Value` for any well-formed pickle stream, whether or not it's the list-of-dicts (find) or
//! dict (render) shape we actually expect. Structural validation therefore lives here, not in
//! the mergers -- a top-level shape mismatch is reported as `DecodeError::UnexpectedShape`,
//! which `crate::merge` treats as a hard error for the whole request rather than a droppable
//! per-response decode failure (see `DESIGN.md` for why these two codecs disagree on severity
//! and how this rewrite unifies them).
//!
//! This codec is also what the client always receives, regardless of which codec is used
//! upstream -- see `encode_find`/`encode_render`.

use super::{GlobMatch, GraphiteCodec, RenderSeries};
use crate::errors::DecodeError;
use serde_pickle::value::{HashableValue, Value};
use std::collections::BTreeMap;

pub struct PickleCodec;

impl PickleCodec {
    pub fn new() -> Self { PickleCodec }
}

fn as_str(key: &str, value: &Value) -> Result<String, DecodeError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bytes(b) => String::from_utf8(b.clone())
            .map_err(|e| DecodeError::UnexpectedShape(format!("{} is not valid utf-8: {}", key, e))),
        other => Err(DecodeError::UnexpectedShape(format!("{} is not a string: {:?}", key, other))),
    }
}

fn as_bool(key: &str, value: &Value) -> Result<bool, DecodeError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(DecodeError::UnexpectedShape(format!("{} is not a bool: {:?}", key, other))),
    }
}

fn as_i64(key: &str, value: &Value) -> Result<i64, DecodeError> {
    match value {
        Value::I64(i) => Ok(*i),
        Value::F64(f) => Ok(*f as i64),
        other => Err(DecodeError::UnexpectedShape(format!("{} is not an integer: {:?}", key, other))),
    }
}

fn as_f64(value: &Value) -> Result<f64, DecodeError> {
    match value {
        Value::F64(f) => Ok(*f),
        Value::I64(i) => Ok(*i as f64),
        Value::None => Ok(f64::NAN),
        other => Err(DecodeError::UnexpectedShape(format!("expected a number: {:?}", other))),
    }
}

fn dict_get<'a>(dict: &'a BTreeMap<HashableValue, Value>, key: &str) -> Option<&'a Value> {
    dict.get(&HashableValue::String(key.to_owned()))
}

fn decode(body: &[u8]) -> Result<Value, DecodeError> {
    serde_pickle::value_from_slice(body, Default::default())
        .map_err(|e| DecodeError::Malformed(format!("invalid pickle stream: {}", e)))
}

impl GraphiteCodec for PickleCodec {
    fn decode_find(&self, body: &[u8]) -> Result<Vec<GlobMatch>, DecodeError> {
        let value = decode(body)?;
        let items = match value {
            Value::List(items) => items,
            other => return Err(DecodeError::UnexpectedShape(format!("top level is not a list: {:?}", other))),
        };

        let mut matches = Vec::with_capacity(items.len());
        for item in items {
            let dict = match item {
                Value::Dict(d) => d,
                other => return Err(DecodeError::UnexpectedShape(format!("list element is not a dict: {:?}", other))),
            };

            let metric_path = match dict_get(&dict, "metric_path") {
                Some(v) => as_str("metric_path", v)?,
                None => return Err(DecodeError::UnexpectedShape("dict missing metric_path".to_owned())),
            };
            // Preserve whatever leaf/branch flag the backend supplied; default to a leaf if
            // the field is simply absent (some backends omit it for leaf nodes).
            let is_leaf = match dict_get(&dict, "isLeaf") {
                Some(v) => as_bool("isLeaf", v)?,
                None => true,
            };

            matches.push(GlobMatch { metric_path, is_leaf });
        }

        Ok(matches)
    }

    fn decode_render(&self, body: &[u8]) -> Result<RenderSeries, DecodeError> {
        let value = decode(body)?;
        let dict = match value {
            Value::Dict(d) => d,
            other => return Err(DecodeError::UnexpectedShape(format!("top level is not a dict: {:?}", other))),
        };

        let name = dict_get(&dict, "name")
            .ok_or_else(|| DecodeError::UnexpectedShape("dict missing name".to_owned()))
            .and_then(|v| as_str("name", v))?;
        let start_time = dict_get(&dict, "start")
            .ok_or_else(|| DecodeError::UnexpectedShape("dict missing start".to_owned()))
            .and_then(|v| as_i64("start", v))?;
        let step_time = dict_get(&dict, "step")
            .ok_or_else(|| DecodeError::UnexpectedShape("dict missing step".to_owned()))
            .and_then(|v| as_i64("step", v))?;
        let raw_values = match dict_get(&dict, "values") {
            Some(Value::List(items)) => items.clone(),
            Some(other) => return Err(DecodeError::UnexpectedShape(format!("values is not a list: {:?}", other))),
            None => return Err(DecodeError::UnexpectedShape("dict missing values".to_owned())),
        };

        let mut values = Vec::with_capacity(raw_values.len());
        let mut is_absent = Vec::with_capacity(raw_values.len());
        for raw in raw_values {
            match raw {
                Value::None => {
                    values.push(0.0);
                    is_absent.push(true);
                },
                other => {
                    values.push(as_f64(&other)?);
                    is_absent.push(false);
                },
            }
        }

        Ok(RenderSeries { name, start_time, step_time, values, is_absent })
    }

    fn rewrites_query_format(&self) -> bool { false }
}

/// Encodes a unioned list of glob matches into the object-graph wire format served to clients.
pub fn encode_find(matches: &[GlobMatch]) -> Vec<u8> {
    let items = matches
        .iter()
        .map(|m| {
            let mut dict = BTreeMap::new();
            dict.insert(HashableValue::String("metric_path".to_owned()), Value::String(m.metric_path.clone()));
            dict.insert(HashableValue::String("isLeaf".to_owned()), Value::Bool(m.is_leaf));
            Value::Dict(dict)
        })
        .collect();

    serde_pickle::value_to_vec(&Value::List(items), Default::default()).unwrap_or_default()
}

/// Encodes a merged render series into the object-graph wire format served to clients.
///
/// Unlike the binary codec, `end` is computed correctly here (`start + step * len(values)`) --
/// the preserved quirk in `DESIGN.md` is specific to the binary codec's render path.
pub fn encode_render(series: &RenderSeries) -> Vec<u8> {
    let mut dict = BTreeMap::new();
    dict.insert(HashableValue::String("name".to_owned()), Value::String(series.name.clone()));
    dict.insert(HashableValue::String("start".to_owned()), Value::I64(series.start_time));
    dict.insert(HashableValue::String("step".to_owned()), Value::I64(series.step_time));
    let end = series.start_time + series.step_time * series.values.len() as i64;
    dict.insert(HashableValue::String("end".to_owned()), Value::I64(end));

    let values = series
        .values
        .iter()
        .zip(series.is_absent.iter())
        .map(|(v, absent)| if *absent { Value::None } else { Value::F64(*v) })
        .collect();
    dict.insert(HashableValue::String("values".to_owned()), Value::List(values));

    serde_pickle::value_to_vec(&Value::Dict(dict), Default::default()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_round_trip() {
        let matches = vec![
            GlobMatch { metric_path: "a.b".to_owned(), is_leaf: true },
            GlobMatch { metric_path: "a".to_owned(), is_leaf: false },
        ];
        let body = encode_find(&matches);
        let codec = PickleCodec::new();
        let decoded = codec.decode_find(&body).unwrap();
        assert_eq!(decoded, matches);
    }

    #[test]
    fn find_rejects_non_list_top_level() {
        let body = serde_pickle::value_to_vec(&Value::I64(1), Default::default()).unwrap();
        let codec = PickleCodec::new();
        let err = codec.decode_find(&body).unwrap_err();
        assert!(matches::matches!(err, DecodeError::UnexpectedShape(_)));
    }

    #[test]
    fn render_round_trip_with_gaps() {
        let series = RenderSeries {
            name: "a.b".to_owned(),
            start_time: 0,
            step_time: 10,
            values: vec![1.0, 0.0, 3.0],
            is_absent: vec![false, true, false],
        };
        let body = encode_render(&series);
        let codec = PickleCodec::new();
        let decoded = codec.decode_render(&body).unwrap();
        assert_eq!(decoded, series);
    }
}
