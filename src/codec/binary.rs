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

//! A schema-checked, length-delimited binary struct codec.
//!
//! This is the "protobuf" format referenced by the config's `UsePB` flag and by
//! `rewrite_query_for_binary_codec` -- the actual on-wire shape is a small fixed struct layout
//! rather than a real protobuf message, but it plays the same role: every field has a known
//! width or a length prefix, so a truncated or corrupt body always fails to decode rather than
//! silently producing a wrong-shaped value. That's why this codec can only ever report
//! `DecodeError::Malformed`, never `UnexpectedShape`.
//!
//! Because the schema has no leaf/branch flag for glob matches, `decode_find` always reports
//! `is_leaf: true` -- see `GraphiteCodec` callers in `crate::merge::find` and the design note in
//! `DESIGN.md` about propagating a leaf flag if the backend schema ever grows one.

use super::{GlobMatch, GraphiteCodec, RenderSeries};
use crate::errors::DecodeError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub struct BinaryCodec;

impl BinaryCodec {
    pub fn new() -> Self { BinaryCodec }
}

fn need(buf: &impl Buf, n: usize) -> Result<(), DecodeError> {
    if buf.remaining() < n {
        return Err(DecodeError::Malformed(format!(
            "expected at least {} more bytes, had {}",
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

impl GraphiteCodec for BinaryCodec {
    fn decode_find(&self, body: &[u8]) -> Result<Vec<GlobMatch>, DecodeError> {
        let mut buf = Bytes::copy_from_slice(body);
        need(&buf, 4)?;
        let count = buf.get_u32() as usize;

        let mut matches = Vec::with_capacity(count);
        for _ in 0..count {
            need(&buf, 4)?;
            let path_len = buf.get_u32() as usize;
            need(&buf, path_len)?;
            let path_bytes = buf.copy_to_bytes(path_len);
            let metric_path = String::from_utf8(path_bytes.to_vec())
                .map_err(|e| DecodeError::Malformed(format!("non-utf8 metric path: {}", e)))?;

            // The binary schema carries no per-path leaf/branch flag.
            matches.push(GlobMatch { metric_path, is_leaf: true });
        }

        Ok(matches)
    }

    fn decode_render(&self, body: &[u8]) -> Result<RenderSeries, DecodeError> {
        let mut buf = Bytes::copy_from_slice(body);

        need(&buf, 4)?;
        let name_len = buf.get_u32() as usize;
        need(&buf, name_len)?;
        let name_bytes = buf.copy_to_bytes(name_len);
        let name = String::from_utf8(name_bytes.to_vec())
            .map_err(|e| DecodeError::Malformed(format!("non-utf8 series name: {}", e)))?;

        need(&buf, 16)?;
        let start_time = buf.get_i64();
        let step_time = buf.get_i64();

        need(&buf, 4)?;
        let n = buf.get_u32() as usize;

        need(&buf, n * 8)?;
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(buf.get_f64());
        }

        need(&buf, n)?;
        let mut is_absent = Vec::with_capacity(n);
        for _ in 0..n {
            is_absent.push(buf.get_u8() != 0);
        }

        Ok(RenderSeries { name, start_time, step_time, values, is_absent })
    }

    fn rewrites_query_format(&self) -> bool { true }
}

/// Re-encodes a merged series into the binary wire format, for the (legacy, single-response)
/// passthrough path. Per the preserved source quirk, `end` is emitted as `start_time` rather
/// than `start_time + step_time * len(values)` -- see `DESIGN.md`.
pub fn encode_render(series: &RenderSeries) -> Bytes {
    let name_bytes = series.name.as_bytes();
    let n = series.values.len();

    let mut buf = BytesMut::with_capacity(4 + name_bytes.len() + 16 + 4 + n * 9 + 8);
    buf.put_u32(name_bytes.len() as u32);
    buf.put_slice(name_bytes);
    buf.put_i64(series.start_time);
    buf.put_i64(series.step_time);
    buf.put_u32(n as u32);
    for v in &series.values {
        buf.put_f64(*v);
    }
    for absent in &series.is_absent {
        buf.put_u8(if *absent { 1 } else { 0 });
    }
    // end == start_time: preserved source quirk, see DESIGN.md.
    buf.put_i64(series.start_time);

    buf.freeze()
}
