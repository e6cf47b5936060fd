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

//! Component E: the two query handlers that wire fan-out, merge, routing, and codec together
//! into what `crate::server` actually exposes over HTTP.

pub mod debug;
pub mod find;
pub mod render;

use crate::routing::RoutingHintTable;
use crate::telemetry::TelemetryHandle;
use std::sync::Arc;

/// Everything a handler needs to do its job, shared (by `Arc`) across every request.
pub struct AppState {
    pub client: reqwest::Client,
    pub backends: Vec<String>,
    pub codec: Box<dyn crate::codec::GraphiteCodec>,
    pub routing: RoutingHintTable,
    pub telemetry: Arc<TelemetryHandle>,
}

impl AppState {
    /// The backends to fan a request for `metric_path` out to: the routing hint table's answer
    /// if it has one, otherwise every configured backend.
    fn backends_for(&self, metric_path: &str) -> Vec<String> {
        self.routing.lookup(metric_path).unwrap_or_else(|| self.backends.clone())
    }
}
