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

//! `GET /metrics/find/` -- fan out a glob query to every configured backend, union the results,
//! and use the outcome to warm the routing hint table for future renders of the same paths.

use super::AppState;
use crate::codec::{rewrite_query_for_binary_codec, CLIENT_CONTENT_TYPE};
use crate::errors::HandlerError;
use crate::{codec, fanout, merge};
use std::sync::Arc;
use warp::http::StatusCode;
use warp::Reply;

pub async fn handle(query: String, state: Arc<AppState>) -> Result<impl Reply, warp::Rejection> {
    state.telemetry.increment_requests();
    let started = std::time::Instant::now();

    let result = handle_find(query, &state).await;
    // Latency covers the whole request regardless of outcome, not just the success path --
    // a backend timing out and a backend answering fast are both things we want in the histogram.
    state.telemetry.observe_latency(started.elapsed());
    result
}

async fn handle_find(query: String, state: &Arc<AppState>) -> Result<impl Reply, warp::Rejection> {
    let upstream_query = if state.codec.rewrites_query_format() { rewrite_query_for_binary_codec(&query) } else { query };
    let request_path = format!("/metrics/find/?{}", upstream_query);

    let responses = fanout::fanout(&state.client, &state.backends, &request_path, &state.telemetry).await;
    if responses.is_empty() {
        state.telemetry.increment_errors();
        return Err(warp::reject::custom(HandlerError::NoBackendsResponded));
    }

    let result = merge::find::merge(&responses, state.codec.as_ref(), &state.telemetry);
    state.routing.update(result.paths);

    let body = codec::pickle::encode_find(&result.metrics);

    Ok(warp::reply::with_status(
        warp::reply::with_header(body, "Content-Type", CLIENT_CONTENT_TYPE),
        StatusCode::OK,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::pickle::PickleCodec;
    use crate::routing::RoutingHintTable;
    use crate::telemetry::TelemetryHandle;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pickled_find(paths: &[&str]) -> Vec<u8> {
        let matches: Vec<codec::GlobMatch> =
            paths.iter().map(|p| codec::GlobMatch { metric_path: (*p).to_owned(), is_leaf: true }).collect();
        codec::pickle::encode_find(&matches)
    }

    #[tokio::test]
    async fn successful_find_populates_routing_table() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics/find/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(pickled_find(&["a.b"])))
            .mount(&server)
            .await;

        let state = Arc::new(AppState {
            client: reqwest::Client::new(),
            backends: vec![server.uri()],
            codec: Box::new(PickleCodec::new()),
            routing: RoutingHintTable::new(),
            telemetry: Arc::new(TelemetryHandle::new(10)),
        });

        let reply = handle("query=a.*".to_owned(), state.clone()).await;
        assert!(reply.is_ok());
        assert_eq!(state.routing.lookup("a.b"), Some(vec![server.uri()]));
    }

    #[tokio::test]
    async fn empty_fanout_is_rejected_as_no_backends_responded() {
        let state = Arc::new(AppState {
            client: reqwest::Client::new(),
            backends: vec!["http://127.0.0.1:1".to_owned()],
            codec: Box::new(PickleCodec::new()),
            routing: RoutingHintTable::new(),
            telemetry: Arc::new(TelemetryHandle::new(10)),
        });

        let result = handle("query=a.*".to_owned(), state.clone()).await;
        assert!(result.is_err());
        assert_eq!(state.telemetry.errors(), 1);
    }
}
