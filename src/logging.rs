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

//! Bootstraps process-wide logging: `tracing` is the subscriber front-end, always mirrored to
//! syslog under the `carbonzipper` tag via a small custom `Layer`, with an optional stdout
//! mirror layered on top for local/foreground runs. A `log`-facade bridge onto the same syslog
//! writer is installed alongside it, for any dependency that still emits through `log::*` rather
//! than `tracing::*`.

use parking_lot::Mutex;
use syslog::{BasicLogger, Facility, Formatter3164, Logger, LoggerBackend};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const SYSLOG_TAG: &str = "carbonzipper";

fn level_for(debug: u8) -> tracing::Level {
    match debug {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

/// Collects a `tracing` event's fields into one syslog line: the `message` field (if any)
/// first, followed by `key=value` for everything else, in the order `tracing` visits them.
#[derive(Default)]
struct LineVisitor {
    message: Option<String>,
    fields: Vec<String>,
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

impl LineVisitor {
    fn into_line(self) -> String {
        let mut line = self.message.unwrap_or_default();
        if !self.fields.is_empty() {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&self.fields.join(" "));
        }
        line
    }
}

/// A `tracing_subscriber::Layer` that formats every event and writes it to a syslog connection,
/// at the syslog severity matching the event's `tracing::Level`.
///
/// This is the actual destination "always to system log" in the spec refers to -- unlike the
/// `log`-facade bridge below, every `tracing::info!`/`warn!`/`error!` call in this codebase flows
/// through here regardless of whether `-stdout` was passed.
struct SyslogLayer {
    logger: Mutex<Logger<LoggerBackend, Formatter3164>>,
}

impl<S> Layer<S> for SyslogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, _attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {}
    fn on_record(&self, _id: &Id, _values: &Record<'_>, _ctx: Context<'_, S>) {}

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let line = format!("{}: {}", event.metadata().target(), visitor.into_line());

        let mut logger = self.logger.lock();
        let result = match *event.metadata().level() {
            Level::ERROR => logger.err(line),
            Level::WARN => logger.warning(line),
            Level::INFO => logger.info(line),
            Level::DEBUG | Level::TRACE => logger.debug(line),
        };
        if let Err(e) = result {
            eprintln!("warning: failed writing to syslog: {}", e);
        }
    }
}

fn connect_syslog() -> std::io::Result<Logger<LoggerBackend, Formatter3164>> {
    let formatter =
        Formatter3164 { facility: Facility::LOG_DAEMON, hostname: None, process: SYSLOG_TAG.into(), pid: std::process::id() as i32 };
    syslog::unix(formatter)
}

/// Installs the global `tracing` subscriber.
///
/// Syslog is always wired in as a layer; `mirror_stdout` additionally layers in
/// `tracing_subscriber::fmt`'s own stdout formatter. If syslog can't be reached (no daemon --
/// common in containers/dev), that's logged to stderr and we fall back to stdout-only so output
/// isn't silently dropped outright.
pub fn init(debug: u8, mirror_stdout: bool) -> Result<(), crate::errors::CreationError> {
    let level = level_for(debug);
    let filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let registry = tracing_subscriber::registry().with(filter);

    match connect_syslog() {
        Ok(writer) => {
            let syslog_layer = SyslogLayer { logger: Mutex::new(writer) };
            if mirror_stdout {
                registry.with(syslog_layer).with(tracing_subscriber::fmt::layer()).init();
            } else {
                registry.with(syslog_layer).init();
            }

            // Bridge the `log` facade onto a second syslog connection, for any dependency that
            // still emits through `log::*` instead of `tracing::*`.
            if let Ok(bridge_writer) = connect_syslog() {
                let _ = log::set_boxed_logger(Box::new(BasicLogger::new(bridge_writer)));
                log::set_max_level(match level {
                    tracing::Level::TRACE => log::LevelFilter::Trace,
                    tracing::Level::DEBUG => log::LevelFilter::Debug,
                    _ => log::LevelFilter::Info,
                });
            }
        },
        Err(e) => {
            eprintln!("warning: could not connect to syslog: {}", e);
            if mirror_stdout {
                registry.with(tracing_subscriber::fmt::layer()).init();
            } else {
                registry.init();
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_levels_map_in_increasing_verbosity() {
        assert_eq!(level_for(0), tracing::Level::INFO);
        assert_eq!(level_for(1), tracing::Level::DEBUG);
        assert_eq!(level_for(5), tracing::Level::TRACE);
    }

    #[test]
    fn line_visitor_puts_message_first_then_fields() {
        // Exercised indirectly through `tracing` in practice; here we just check the
        // string-assembly rule directly since building a real `Event` requires a subscriber.
        let mut visitor = LineVisitor::default();
        visitor.message = Some("backend request failed".to_owned());
        visitor.fields.push("backend=http://a".to_owned());
        assert_eq!(visitor.into_line(), "backend request failed backend=http://a");
    }
}
