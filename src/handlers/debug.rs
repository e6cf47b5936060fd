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

//! `GET /debug/vars` -- the expvar-style introspection surface: a JSON snapshot of
//! [`crate::telemetry::TelemetryHandle`]'s counters and latency histogram, plus the static
//! backend/codec configuration, dumped straight off the live `AppState` with no sampling or
//! aggregation window.

use super::AppState;
use serde::Serialize;
use std::sync::Arc;
use warp::Reply;

#[derive(Serialize)]
struct DebugVars {
    pid: u32,
    backends: usize,
    codec: &'static str,
    requests: u64,
    errors: u64,
    timeouts: u64,
    latency_buckets: Vec<u64>,
}

pub async fn handle(state: Arc<AppState>) -> Result<impl Reply, warp::Rejection> {
    let vars = DebugVars {
        pid: std::process::id(),
        backends: state.backends.len(),
        codec: if state.codec.rewrites_query_format() { "protobuf" } else { "pickle" },
        requests: state.telemetry.requests(),
        errors: state.telemetry.errors(),
        timeouts: state.telemetry.timeouts(),
        latency_buckets: state.telemetry.bucket_counts(),
    };

    Ok(warp::reply::json(&vars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::pickle::PickleCodec;
    use crate::routing::RoutingHintTable;
    use crate::telemetry::TelemetryHandle;

    #[tokio::test]
    async fn reports_current_counters() {
        let telemetry = Arc::new(TelemetryHandle::new(10));
        telemetry.increment_requests();
        telemetry.increment_errors();

        let state = Arc::new(AppState {
            client: reqwest::Client::new(),
            backends: vec!["http://127.0.0.1:9".to_owned()],
            codec: Box::new(PickleCodec::new()),
            routing: RoutingHintTable::new(),
            telemetry,
        });

        let reply = handle(state).await;
        assert!(reply.is_ok());
    }
}
