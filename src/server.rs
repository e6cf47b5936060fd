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

//! Assembles the `warp` filter tree that exposes Component E's two handlers, plus the rejection
//! handler that maps `crate::errors::HandlerError` onto the client-visible status codes.

use crate::errors::HandlerError;
use crate::handlers::{debug, find, render, AppState};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

fn with_state(state: Arc<AppState>) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

pub fn routes(state: Arc<AppState>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let find_route = warp::path!("metrics" / "find")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::filters::query::raw())
        .and(with_state(state.clone()))
        .and_then(find::handle);

    let render_params = warp::filters::query::query::<HashMap<String, String>>()
        .or(warp::body::form::<HashMap<String, String>>())
        .unify();

    let render_route = warp::path!("render")
        .and(warp::path::end())
        .and(warp::get().or(warp::post()).unify())
        .and(render_params)
        .and(with_state(state.clone()))
        .and_then(render::handle);

    let debug_route = warp::path!("debug" / "vars")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state))
        .and_then(debug::handle);

    find_route.or(render_route).unify().or(debug_route).unify().recover(recover)
}

async fn recover(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(e) = err.find::<HandlerError>() {
        match e {
            HandlerError::MissingTarget => (StatusCode::BAD_REQUEST, e.to_string()),
            HandlerError::NoBackendsResponded => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            HandlerError::StructuralMismatch(_) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_owned())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_owned())
    };

    Ok(warp::reply::with_status(message, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::pickle::PickleCodec;
    use crate::routing::RoutingHintTable;
    use crate::telemetry::TelemetryHandle;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            client: reqwest::Client::new(),
            backends: vec![],
            codec: Box::new(PickleCodec::new()),
            routing: RoutingHintTable::new(),
            telemetry: Arc::new(TelemetryHandle::new(10)),
        })
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let filter = routes(test_state());
        let resp = warp::test::request().path("/nope").reply(&filter).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn render_without_target_is_400() {
        let filter = routes(test_state());
        let resp = warp::test::request().path("/render/").reply(&filter).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn find_with_no_backends_is_500() {
        let filter = routes(test_state());
        let resp = warp::test::request().path("/metrics/find/?query=a.*").reply(&filter).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn debug_vars_is_200() {
        let filter = routes(test_state());
        let resp = warp::test::request().path("/debug/vars").reply(&filter).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
