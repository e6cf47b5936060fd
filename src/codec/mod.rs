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

//! The two wire encodings a backend may speak, modeled behind one trait so the mergers in
//! `crate::merge` never have to know which one produced the value in front of them.
//!
//! The binary codec is schema-checked by construction (`decode_find`/`decode_render` can only
//! fail with `DecodeError::Malformed`). The object-graph codec is not -- a payload can parse as
//! *some* pickled value without being the dict/list-of-dicts shape we expect, which is why it's
//! the only one that can produce `DecodeError::UnexpectedShape`.

pub mod binary;
pub mod pickle;

use crate::errors::DecodeError;
use serde_derive::{Deserialize, Serialize};

/// One entry in a glob/find response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobMatch {
    pub metric_path: String,
    #[serde(rename = "isLeaf")]
    pub is_leaf: bool,
}

/// A decoded point-series response for one target, as produced by one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSeries {
    pub name: String,
    pub start_time: i64,
    pub step_time: i64,
    pub values: Vec<f64>,
    pub is_absent: Vec<bool>,
}

impl RenderSeries {
    pub fn is_present(&self, index: usize) -> bool {
        self.is_absent.get(index).map(|absent| !absent).unwrap_or(false)
    }
}

/// Encode/decode logic for one of the two upstream wire formats.
///
/// Structural validation of the decoded object graph belongs in the implementation, not in the
/// merge logic above it -- that's the whole point of hiding this behind a trait.
pub trait GraphiteCodec: Send + Sync {
    /// Decode a glob/find response body into its list of matches.
    ///
    /// `Ok` may still be an empty list; that is a valid (if useless) response, distinct from a
    /// hard decode failure.
    fn decode_find(&self, body: &[u8]) -> Result<Vec<GlobMatch>, DecodeError>;

    /// Decode a point-series response body for a single target.
    fn decode_render(&self, body: &[u8]) -> Result<RenderSeries, DecodeError>;

    /// Whether the query string sent to backends should be rewritten with `format=protobuf`.
    fn rewrites_query_format(&self) -> bool;
}

/// The wire format this process's clients always receive, regardless of which codec is used
/// talking to backends: an object-graph-encoded (pickled) value, `Content-Type:
/// application/pickle`.
pub const CLIENT_CONTENT_TYPE: &str = "application/pickle";

pub fn rewrite_query_for_binary_codec(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .filter_map(|p| {
            let mut parts = p.splitn(2, '=');
            let key = parts.next()?.to_owned();
            let value = parts.next().unwrap_or("").to_owned();
            Some((key, value))
        })
        .filter(|(k, _)| k != "format")
        .collect();
    pairs.push(("format".to_owned(), "protobuf".to_owned()));
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_adds_format_when_absent() {
        let out = rewrite_query_for_binary_codec("query=a.b.*");
        assert_eq!(out, "query=a.b.*&format=protobuf");
    }

    #[test]
    fn rewrite_replaces_existing_format() {
        let out = rewrite_query_for_binary_codec("query=a.b.*&format=json");
        assert_eq!(out, "query=a.b.*&format=protobuf");
    }
}
