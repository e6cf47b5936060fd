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

use carbonzipper::codec::binary::BinaryCodec;
use carbonzipper::codec::pickle::PickleCodec;
use carbonzipper::config::{self, Cli};
use carbonzipper::handlers::AppState;
use carbonzipper::routing::RoutingHintTable;
use carbonzipper::telemetry::{spawn_carbon_exporter, TelemetryHandle};
use carbonzipper::{logging, server};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.debug, cli.stdout) {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let settings = match config::load(&cli.config, &cli) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        },
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.max_procs)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        },
    };

    runtime.block_on(run(settings))
}

async fn run(settings: config::ConfigSnapshot) -> ExitCode {
    let telemetry = Arc::new(TelemetryHandle::new(settings.buckets));

    if let Some(sink_addr) = settings.telemetry_sink.clone() {
        spawn_carbon_exporter(telemetry.clone(), sink_addr);
    }

    let codec: Box<dyn carbonzipper::codec::GraphiteCodec> =
        if settings.use_binary_codec { Box::new(BinaryCodec::new()) } else { Box::new(PickleCodec::new()) };

    let state = Arc::new(AppState {
        client: reqwest::Client::new(),
        backends: settings.backends.clone(),
        codec,
        routing: RoutingHintTable::new(),
        telemetry,
    });

    tracing::info!(port = settings.listen_port, backends = settings.backends.len(), "starting carbonzipper");

    let routes = server::routes(state);
    let addr = ([0, 0, 0, 0], settings.listen_port);
    let (_, serving) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    });

    serving.await;
    ExitCode::SUCCESS
}
