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

//! Periodic export of the telemetry snapshot to an external carbon host, under
//! `carbon.zipper.<hostname>.*` as described in the config's `GraphiteHost`.

use super::TelemetryHandle;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

const EXPORT_INTERVAL: Duration = Duration::from_secs(60);

fn sanitized_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_owned())
        .replace('.', "_")
}

fn render_lines(telemetry: &TelemetryHandle, hostname: &str, now: u64) -> String {
    let mut lines = String::new();
    lines.push_str(&format!("carbon.zipper.{}.requests {} {}\n", hostname, telemetry.requests(), now));
    lines.push_str(&format!("carbon.zipper.{}.errors {} {}\n", hostname, telemetry.errors(), now));
    lines.push_str(&format!("carbon.zipper.{}.timeouts {} {}\n", hostname, telemetry.timeouts(), now));

    for (i, count) in telemetry.bucket_counts().iter().enumerate() {
        lines.push_str(&format!(
            "carbon.zipper.{}.requests_in_1e{}ms_to_1e{}ms {} {}\n",
            hostname,
            i,
            i + 1,
            count,
            now
        ));
    }

    lines
}

/// Spawns a background task that publishes a telemetry snapshot to `sink_addr` every 60s.
///
/// Connection failures are logged and retried on the next tick; they are never fatal to the
/// proxy itself.
pub fn spawn_carbon_exporter(telemetry: Arc<TelemetryHandle>, sink_addr: String) {
    tokio::spawn(async move {
        let hostname = sanitized_hostname();
        let mut ticker = tokio::time::interval(EXPORT_INTERVAL);

        loop {
            ticker.tick().await;

            let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
            let payload = render_lines(&telemetry, &hostname, now);

            match TcpStream::connect(&sink_addr).await {
                Ok(mut stream) => {
                    if let Err(e) = stream.write_all(payload.as_bytes()).await {
                        tracing::warn!(sink = %sink_addr, error = %e, "failed writing telemetry snapshot");
                    }
                },
                Err(e) => {
                    tracing::warn!(sink = %sink_addr, error = %e, "failed connecting to telemetry sink");
                },
            }
        }
    });
}
