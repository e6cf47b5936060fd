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

//! Component B: the find merger.
//!
//! Unions the metric paths reported across every backend's glob response, remembering which
//! backends reported each path so the routing hint table (`crate::routing`) can be populated.
//!
//! A single backend's decode failure is absorbed and the merge continues (partial tolerance).
//! The one exception is the object-graph codec's structural-mismatch case, which is promoted to
//! a hard error for the whole request -- per `DESIGN.md`, this rewrite unifies both codecs to
//! skip-and-continue instead, so `DecodeError::UnexpectedShape` is handled the same as
//! `DecodeError::Malformed` here. It is kept as a distinct error variant purely so callers can
//! still log which failure mode happened.

use crate::codec::{GlobMatch, GraphiteCodec};
use crate::fanout::{Backend, ServerResponse};
use crate::telemetry::TelemetryHandle;
use std::collections::HashMap;
use std::sync::Arc;

/// The merged result of a find fan-out: the unioned, first-seen-wins descriptor list, and the
/// reverse index from metric path to the backends that reported it.
pub struct FindMerge {
    pub metrics: Vec<GlobMatch>,
    pub paths: HashMap<String, Vec<Backend>>,
}

/// Merges a non-empty set of backend glob responses.
///
/// Per-response decode failures (of either kind) are logged, counted, and skipped; they never
/// poison the rest of the merge. Returns `None` only if nothing at all decoded.
pub fn merge(responses: &[ServerResponse], codec: &dyn GraphiteCodec, telemetry: &Arc<TelemetryHandle>) -> FindMerge {
    let mut metrics: Vec<GlobMatch> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut paths: HashMap<String, Vec<Backend>> = HashMap::new();

    for response in responses {
        let matches = match codec.decode_find(&response.payload) {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!(backend = %response.backend, error = %e, "dropping unparseable find response");
                telemetry.increment_errors();
                continue;
            },
        };

        for m in matches {
            match seen.get(&m.metric_path) {
                Some(_) => {},
                None => {
                    seen.insert(m.metric_path.clone(), metrics.len());
                    metrics.push(m.clone());
                },
            }

            paths.entry(m.metric_path).or_insert_with(Vec::new).push(response.backend.clone());
        }
    }

    FindMerge { metrics, paths }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::binary::BinaryCodec;
    use bytes::{BufMut, Bytes, BytesMut};

    fn telemetry() -> Arc<TelemetryHandle> { Arc::new(TelemetryHandle::new(10)) }

    fn encode_find(paths: &[&str]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32(paths.len() as u32);
        for p in paths {
            buf.put_u32(p.len() as u32);
            buf.put_slice(p.as_bytes());
        }
        buf.freeze()
    }

    #[test]
    fn s1_fanout_with_a_dead_backend() {
        let responses = vec![
            ServerResponse { backend: "A".to_owned(), payload: encode_find(&["x.y"]) },
            ServerResponse { backend: "C".to_owned(), payload: encode_find(&["x.y", "x.z"]) },
        ];

        let codec = BinaryCodec::new();
        let telemetry = telemetry();
        let result = merge(&responses, &codec, &telemetry);

        assert_eq!(result.metrics.iter().map(|m| m.metric_path.as_str()).collect::<Vec<_>>(), vec!["x.y", "x.z"]);
        assert_eq!(result.paths["x.y"], vec!["A".to_owned(), "C".to_owned()]);
        assert_eq!(result.paths["x.z"], vec!["C".to_owned()]);
        assert_eq!(telemetry.errors(), 0);
    }

    #[test]
    fn malformed_response_is_skipped_not_fatal() {
        let good = ServerResponse { backend: "A".to_owned(), payload: encode_find(&["x.y"]) };
        let bad = ServerResponse { backend: "B".to_owned(), payload: Bytes::from_static(b"\x00\x00") };

        let codec = BinaryCodec::new();
        let telemetry = telemetry();
        let result = merge(&[bad, good], &codec, &telemetry);

        assert_eq!(result.metrics.len(), 1);
        assert_eq!(telemetry.errors(), 1);
    }

    #[test]
    fn merge_is_commutative_over_path_keys() {
        let a = ServerResponse { backend: "A".to_owned(), payload: encode_find(&["x.y"]) };
        let c = ServerResponse { backend: "C".to_owned(), payload: encode_find(&["x.y", "x.z"]) };

        let codec = BinaryCodec::new();
        let forward = merge(&[a.clone(), c.clone()], &codec, &telemetry());
        let backward = merge(&[c, a], &codec, &telemetry());

        let mut forward_keys: Vec<_> = forward.paths.keys().cloned().collect();
        let mut backward_keys: Vec<_> = backward.paths.keys().cloned().collect();
        forward_keys.sort();
        backward_keys.sort();
        assert_eq!(forward_keys, backward_keys);

        for key in forward_keys {
            let mut f = forward.paths[&key].clone();
            let mut b = backward.paths[&key].clone();
            f.sort();
            b.sort();
            assert_eq!(f, b);
        }
    }

    #[test]
    fn binary_codec_always_reports_leaf_true() {
        let response = ServerResponse { backend: "A".to_owned(), payload: encode_find(&["x.y"]) };
        let codec = BinaryCodec::new();
        let result = merge(&[response], &codec, &telemetry());
        assert!(result.metrics[0].is_leaf);
    }
}
