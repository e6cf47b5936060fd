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

//! Component C: the render merger.
//!
//! Produces one point-series from however many backends answered for a single target, by
//! gap-filling: a present sample in the first decoded response wins outright, and an absent one
//! is filled from the first peer (in arrival order) that has something there.

use crate::codec::{GraphiteCodec, RenderSeries};
use crate::fanout::ServerResponse;
use crate::telemetry::TelemetryHandle;
use std::sync::Arc;

/// What the render merger produced, including the cases the caller needs to know about to
/// decide status codes and wire-format quirks (see `DESIGN.md`).
pub enum RenderMergeResult {
    /// Nothing decoded under the active codec. Carries the first raw response seen, if any, so
    /// a caller that wants to preserve the legacy "echo the first payload anyway" behavior can.
    NoneDecoded { first_raw: Option<ServerResponse> },
    /// Exactly one response decoded -- returned verbatim, per the identity-on-single-input rule.
    Single(RenderSeries),
    /// Two or more decoded; this is the gap-filled merge.
    Merged(RenderSeries),
}

pub fn merge(responses: &[ServerResponse], codec: &dyn GraphiteCodec, telemetry: &Arc<TelemetryHandle>) -> RenderMergeResult {
    let mut decoded = Vec::with_capacity(responses.len());
    for response in responses {
        match codec.decode_render(&response.payload) {
            Ok(series) => decoded.push(series),
            Err(e) => {
                tracing::warn!(backend = %response.backend, error = %e, "dropping unparseable render response");
                telemetry.increment_errors();
            },
        }
    }

    if decoded.is_empty() {
        return RenderMergeResult::NoneDecoded { first_raw: responses.first().cloned() };
    }

    if decoded.len() == 1 {
        return RenderMergeResult::Single(decoded.into_iter().next().unwrap());
    }

    let base = decoded[0].clone();
    let peers = &decoded[1..];
    let mut values = base.values.clone();
    let mut is_absent = base.is_absent.clone();

    for i in 0..base.values.len() {
        if base.is_present(i) {
            continue;
        }

        for peer in peers {
            if peer.values.len() != base.values.len() {
                // Length mismatch: the step/range disagreement can't be safely reconciled, so
                // this index (and any other still-absent index) stays absent. We don't fall
                // through to a later peer for this index either -- abort the fill outright.
                tracing::warn!(
                    base_len = base.values.len(),
                    peer_len = peer.values.len(),
                    "render merge peer length mismatch, aborting gap-fill for remaining absents"
                );
                telemetry.increment_errors();
                return RenderMergeResult::Merged(RenderSeries {
                    name: base.name,
                    start_time: base.start_time,
                    step_time: base.step_time,
                    values,
                    is_absent,
                });
            }

            if peer.is_present(i) {
                values[i] = peer.values[i];
                is_absent[i] = false;
                break;
            }
        }
    }

    RenderMergeResult::Merged(RenderSeries { name: base.name, start_time: base.start_time, step_time: base.step_time, values, is_absent })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn telemetry() -> Arc<TelemetryHandle> { Arc::new(TelemetryHandle::new(10)) }

    struct FixedCodec(Vec<RenderSeries>);

    impl GraphiteCodec for FixedCodec {
        fn decode_find(&self, _body: &[u8]) -> Result<Vec<crate::codec::GlobMatch>, crate::errors::DecodeError> {
            unimplemented!()
        }

        fn decode_render(&self, body: &[u8]) -> Result<RenderSeries, crate::errors::DecodeError> {
            let idx: usize = std::str::from_utf8(body).unwrap().parse().unwrap();
            Ok(self.0[idx].clone())
        }

        fn rewrites_query_format(&self) -> bool { false }
    }

    fn response(backend: &str, idx: usize) -> ServerResponse {
        ServerResponse { backend: backend.to_owned(), payload: Bytes::from(idx.to_string()) }
    }

    #[test]
    fn single_response_is_identity() {
        let series = RenderSeries {
            name: "m".to_owned(),
            start_time: 0,
            step_time: 10,
            values: vec![1.0, 2.0],
            is_absent: vec![false, false],
        };
        let codec = FixedCodec(vec![series.clone()]);
        let telemetry = telemetry();
        match merge(&[response("A", 0)], &codec, &telemetry) {
            RenderMergeResult::Single(s) => assert_eq!(s, series),
            _ => panic!("expected Single"),
        }
    }

    #[test]
    fn s3_gap_fill_merge() {
        let a = RenderSeries {
            name: "m".to_owned(),
            start_time: 0,
            step_time: 10,
            values: vec![1.0, 0.0, 3.0, 0.0],
            is_absent: vec![false, true, false, true],
        };
        let b = RenderSeries {
            name: "m".to_owned(),
            start_time: 0,
            step_time: 10,
            values: vec![0.0, 2.0, 0.0, 4.0],
            is_absent: vec![true, false, true, false],
        };
        let codec = FixedCodec(vec![a, b]);
        let telemetry = telemetry();
        match merge(&[response("A", 0), response("B", 1)], &codec, &telemetry) {
            RenderMergeResult::Merged(series) => {
                assert_eq!(series.values, vec![1.0, 2.0, 3.0, 4.0]);
                assert!(series.is_absent.iter().all(|a| !a));
            },
            _ => panic!("expected Merged"),
        }
    }

    #[test]
    fn s4_length_mismatch_leaves_gap_absent_without_error_status() {
        let base = RenderSeries {
            name: "m".to_owned(),
            start_time: 0,
            step_time: 10,
            values: vec![1.0, 0.0, 3.0, 4.0],
            is_absent: vec![false, true, false, false],
        };
        let short_peer = RenderSeries {
            name: "m".to_owned(),
            start_time: 0,
            step_time: 10,
            values: vec![9.0, 9.0, 9.0],
            is_absent: vec![false, false, false],
        };
        let codec = FixedCodec(vec![base, short_peer]);
        let telemetry = telemetry();
        match merge(&[response("A", 0), response("B", 1)], &codec, &telemetry) {
            RenderMergeResult::Merged(series) => {
                assert_eq!(series.is_absent[1], true);
                assert_eq!(series.values.len(), 4);
            },
            _ => panic!("expected Merged"),
        }
        assert_eq!(telemetry.errors(), 1);
    }

    #[test]
    fn zero_decoded_carries_first_raw_for_legacy_passthrough() {
        struct AlwaysFails;
        impl GraphiteCodec for AlwaysFails {
            fn decode_find(&self, _body: &[u8]) -> Result<Vec<crate::codec::GlobMatch>, crate::errors::DecodeError> {
                unimplemented!()
            }
            fn decode_render(&self, _body: &[u8]) -> Result<RenderSeries, crate::errors::DecodeError> {
                Err(crate::errors::DecodeError::Malformed("nope".to_owned()))
            }
            fn rewrites_query_format(&self) -> bool { false }
        }

        let codec = AlwaysFails;
        let telemetry = telemetry();
        let responses = vec![ServerResponse { backend: "A".to_owned(), payload: Bytes::from_static(b"raw") }];
        match merge(&responses, &codec, &telemetry) {
            RenderMergeResult::NoneDecoded { first_raw } => {
                assert_eq!(first_raw.unwrap().payload, Bytes::from_static(b"raw"));
            },
            _ => panic!("expected NoneDecoded"),
        }
    }
}
