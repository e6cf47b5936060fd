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

//! `GET|POST /render/` -- fan a point-series query out to the routing-hinted backends (or every
//! backend, if none are hinted yet) and gap-fill whatever comes back into one series.

use super::AppState;
use crate::codec::{rewrite_query_for_binary_codec, CLIENT_CONTENT_TYPE};
use crate::errors::HandlerError;
use crate::merge::render::RenderMergeResult;
use crate::{codec, fanout, merge};
use std::collections::HashMap;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::Reply;

fn build_query(params: &HashMap<String, String>) -> String {
    params.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join("&")
}

pub async fn handle(params: HashMap<String, String>, state: Arc<AppState>) -> Result<impl Reply, warp::Rejection> {
    state.telemetry.increment_requests();
    let started = std::time::Instant::now();

    let result = handle_render(params, &state).await;
    // Recorded on every exit, not just the success path below -- a missing-target or
    // no-backends-responded rejection is still service time worth having in the histogram.
    state.telemetry.observe_latency(started.elapsed());
    result
}

async fn handle_render(params: HashMap<String, String>, state: &Arc<AppState>) -> Result<impl Reply, warp::Rejection> {
    let target = match params.get("target") {
        Some(t) if !t.is_empty() => t.clone(),
        _ => return Err(warp::reject::custom(HandlerError::MissingTarget)),
    };

    let backends = state.backends_for(&target);
    let query = build_query(&params);
    let upstream_query = if state.codec.rewrites_query_format() { rewrite_query_for_binary_codec(&query) } else { query };
    let request_path = format!("/render/?{}", upstream_query);

    let responses = fanout::fanout(&state.client, &backends, &request_path, &state.telemetry).await;
    if responses.is_empty() {
        state.telemetry.increment_errors();
        return Err(warp::reject::custom(HandlerError::NoBackendsResponded));
    }

    let merged = merge::render::merge(&responses, state.codec.as_ref(), &state.telemetry);
    let body = match merged {
        RenderMergeResult::NoneDecoded { first_raw } => {
            if state.codec.rewrites_query_format() {
                // Binary (schema-checked) codec: nothing decoded means nothing usable came back.
                return Err(warp::reject::custom(HandlerError::StructuralMismatch(
                    "no backend render response decoded".to_owned(),
                )));
            }

            // Object-graph codec: preserved legacy quirk -- stream the first raw payload
            // through unchanged even though it failed to decode. See DESIGN.md.
            match first_raw {
                Some(response) => response.payload.to_vec(),
                None => return Err(warp::reject::custom(HandlerError::NoBackendsResponded)),
            }
        },
        RenderMergeResult::Single(series) => codec::pickle::encode_render(&series),
        RenderMergeResult::Merged(series) => codec::pickle::encode_render(&series),
    };

    Ok(warp::reply::with_status(
        warp::reply::with_header(body, "Content-Type", CLIENT_CONTENT_TYPE),
        StatusCode::OK,
    ))
}
