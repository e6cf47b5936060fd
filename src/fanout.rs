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

//! Component A: the backend fan-out executor.
//!
//! Broadcasts one request path to every backend in parallel and gathers whatever comes back
//! under a grace-deadline policy that trades completeness for tail latency: once the first
//! useful response lands, stragglers get five more seconds and then get cut loose.

use crate::telemetry::TelemetryHandle;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant};

/// An opaque backend base URL, e.g. `http://10.0.0.4:8080`.
pub type Backend = String;

/// The per-backend response-header timeout described in the fan-out contract.
const BACKEND_TIMEOUT: Duration = Duration::from_secs(60);

/// The grace window armed after the first useful response arrives.
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// A single backend's answer to a fanned-out request: `None` means the attempt produced nothing
/// usable (error, 404, timeout) and is never surfaced past this module.
#[derive(Debug, Clone)]
pub struct ServerResponse {
    pub backend: Backend,
    pub payload: Bytes,
}

enum Completion {
    Done(ServerResponse),
    Empty,
}

/// Issues `request_path` against every backend in `backends` in parallel and returns every
/// usable response, in the order backends answered.
///
/// Returns an empty vector if every backend failed, 404'd, or timed out -- the caller decides
/// whether that's a client-visible error. Never blocks if `backends` is empty.
pub async fn fanout(
    client: &reqwest::Client, backends: &[Backend], request_path: &str, telemetry: &Arc<TelemetryHandle>,
) -> Vec<ServerResponse> {
    if backends.is_empty() {
        return Vec::new();
    }

    let (tx, mut rx) = mpsc::channel(backends.len());

    for backend in backends {
        let client = client.clone();
        let backend = backend.clone();
        let path = request_path.to_owned();
        let tx = tx.clone();

        tokio::spawn(async move {
            let completion = attempt_one(&client, &backend, &path).await;
            // The channel has capacity `len(backends)`, so this can never block even if the
            // collector has already walked away after a grace-deadline trip.
            let _ = tx.send(completion).await;
        });
    }
    drop(tx);

    let mut collected = Vec::with_capacity(backends.len());
    let mut remaining = backends.len();
    // A single absolute deadline, armed once when the first useful response lands -- not
    // recomputed per iteration, so stragglers trickling in can't keep sliding the window out.
    let mut deadline: Option<Instant> = None;

    loop {
        if remaining == 0 {
            break;
        }

        let next = if let Some(deadline) = deadline {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(completion)) => completion,
                Ok(None) => break,
                Err(_) => {
                    // Grace timer fired before everyone answered: stop waiting, leave the rest
                    // to complete into a channel nobody is reading from anymore.
                    tracing::warn!(path = %request_path, "grace deadline expired while gathering backend responses");
                    telemetry.increment_timeouts();
                    break;
                },
            }
        } else {
            match rx.recv().await {
                Some(completion) => completion,
                None => break,
            }
        };

        remaining -= 1;
        if let Completion::Done(response) = next {
            if deadline.is_none() {
                deadline = Some(Instant::now() + GRACE_PERIOD);
            }
            collected.push(response);
        }
    }

    collected
}

async fn attempt_one(client: &reqwest::Client, backend: &Backend, request_path: &str) -> Completion {
    let url = format!("{}{}", backend, request_path);

    // Only the response-header wait is bounded to 60s; body-read time is deliberately
    // unbounded (spec: "arbitrary body-read time"), so the timeout races just the `send()`,
    // not the subsequent `response.bytes()` read below.
    let response = match timeout(BACKEND_TIMEOUT, client.get(&url).send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            tracing::warn!(backend = %backend, error = %e, "backend request failed");
            return Completion::Empty;
        },
        Err(_) => {
            tracing::warn!(backend = %backend, "backend response headers timed out");
            return Completion::Empty;
        },
    };

    match response.status() {
        reqwest::StatusCode::OK => match response.bytes().await {
            Ok(payload) => Completion::Done(ServerResponse { backend: backend.clone(), payload }),
            Err(e) => {
                tracing::warn!(backend = %backend, error = %e, "failed reading backend response body");
                Completion::Empty
            },
        },
        reqwest::StatusCode::NOT_FOUND => {
            // A 404 is a valid "I don't have this", not an error -- no log, no counter.
            Completion::Empty
        },
        status => {
            tracing::warn!(backend = %backend, status = %status, "backend returned unexpected status");
            Completion::Empty
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TelemetryHandle;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn telemetry() -> Arc<TelemetryHandle> { Arc::new(TelemetryHandle::new(10)) }

    #[tokio::test]
    async fn empty_backends_returns_empty_without_blocking() {
        let client = reqwest::Client::new();
        let result = fanout(&client, &[], "/metrics/find/?query=x", &telemetry()).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn collects_all_responses_when_no_stragglers() {
        let server_a = MockServer::start().await;
        let server_b = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/metrics/find/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a".to_vec()))
            .mount(&server_a)
            .await;
        Mock::given(method("GET"))
            .and(path("/metrics/find/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"b".to_vec()))
            .mount(&server_b)
            .await;

        let client = reqwest::Client::new();
        let backends = vec![server_a.uri(), server_b.uri()];
        let responses = fanout(&client, &backends, "/metrics/find/", &telemetry()).await;

        assert_eq!(responses.len(), 2);
    }

    #[tokio::test]
    async fn a_404_is_silently_absent_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics/find/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let backends = vec![server.uri()];
        let telemetry = telemetry();
        let responses = fanout(&client, &backends, "/metrics/find/", &telemetry).await;

        assert!(responses.is_empty());
        assert_eq!(telemetry.timeouts(), 0);
    }

    #[tokio::test]
    async fn dead_backend_does_not_block_live_one() {
        let live = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metrics/find/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&live)
            .await;

        let client = reqwest::Client::new();
        // A backend address with nothing listening simulates a connection failure.
        let backends = vec!["http://127.0.0.1:1".to_owned(), live.uri()];
        let responses = fanout(&client, &backends, "/metrics/find/", &telemetry()).await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].backend, live.uri());
    }
}
