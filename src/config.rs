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

//! Process-wide configuration: the JSON config file (with its optional leading `#` comment
//! header stripped before parsing) overlaid with CLI flag overrides.

use crate::errors::CreationError;
use clap::Parser;
use config::{Config, File, FileFormat};
use serde_derive::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "carbonzipper")]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,

    /// Overrides the configured listen port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Parallelism hint; retained for compatibility with the original flag set.
    #[arg(long = "maxprocs")]
    pub maxprocs: Option<usize>,

    /// Debug verbosity level.
    #[arg(short = 'd', long = "debug", default_value_t = 0)]
    pub debug: u8,

    /// Mirror log output to stdout in addition to syslog.
    #[arg(long = "stdout")]
    pub stdout: bool,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "Backends")]
    backends: Vec<String>,
    #[serde(rename = "Port")]
    port: Option<u16>,
    #[serde(rename = "MaxProcs")]
    max_procs: Option<usize>,
    #[serde(rename = "Buckets")]
    buckets: Option<usize>,
    #[serde(rename = "UsePB")]
    use_pb: Option<bool>,
    #[serde(rename = "GraphiteHost")]
    graphite_host: Option<String>,
}

/// Process-wide, read-only-after-startup configuration (aside from the routing hint table,
/// which lives separately and is explicitly mutable for the process's whole lifetime).
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub backends: Vec<String>,
    pub listen_port: u16,
    pub max_procs: usize,
    pub buckets: usize,
    pub use_binary_codec: bool,
    pub telemetry_sink: Option<String>,
    pub debug_level: u8,
    pub mirror_stdout: bool,
}

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_PROCS: usize = 1;
const DEFAULT_BUCKETS: usize = 10;

/// Strips any leading lines beginning with `#` (a comment header some deployments prepend to
/// the JSON config) before handing the rest to the JSON parser.
///
/// An input with no non-comment, non-blank lines is rejected outright -- an all-`#` file isn't
/// a valid config, it's a forgotten one.
fn strip_comment_header(raw: &str) -> Result<String, CreationError> {
    let body: String = raw
        .lines()
        .skip_while(|line| line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n");

    if body.trim().is_empty() {
        return Err(CreationError::InvalidResource("config file has no content after stripping comments".to_owned()));
    }

    Ok(body)
}

fn resolve_graphite_host(raw: &RawConfig) -> Option<String> {
    if let Some(host) = &raw.graphite_host {
        return Some(host.clone());
    }

    let host = std::env::var("GRAPHITEHOST").ok()?;
    let port = std::env::var("GRAPHITEPORT").ok()?;
    Some(format!("{}:{}", host, port))
}

pub fn load(path: &std::path::Path, cli: &Cli) -> Result<ConfigSnapshot, CreationError> {
    let raw_text = std::fs::read_to_string(path)?;
    let stripped = strip_comment_header(&raw_text)?;

    // The `config` crate has no notion of a leading comment header, so we strip it ourselves
    // and hand the rest over as an in-memory JSON source.
    let built = Config::builder()
        .add_source(File::from_str(&stripped, FileFormat::Json))
        .build()
        .map_err(|e| CreationError::InvalidResource(format!("invalid config JSON: {}", e)))?;

    let raw: RawConfig =
        built.try_deserialize().map_err(|e| CreationError::InvalidResource(format!("invalid config JSON: {}", e)))?;

    if raw.backends.is_empty() {
        return Err(CreationError::InvalidParameter("Backends must be a non-empty list".to_owned()));
    }

    let telemetry_sink = resolve_graphite_host(&raw);

    Ok(ConfigSnapshot {
        backends: raw.backends,
        listen_port: cli.port.unwrap_or_else(|| raw.port.unwrap_or(DEFAULT_PORT)),
        max_procs: cli.maxprocs.unwrap_or_else(|| raw.max_procs.unwrap_or(DEFAULT_MAX_PROCS)),
        buckets: raw.buckets.unwrap_or(DEFAULT_BUCKETS),
        use_binary_codec: raw.use_pb.unwrap_or(false),
        telemetry_sink,
        debug_level: cli.debug,
        mirror_stdout: cli.stdout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_comment_lines() {
        let raw = "# generated by config management\n# do not edit\n{\"Backends\": [\"http://a\"]}";
        let stripped = strip_comment_header(raw).unwrap();
        assert_eq!(stripped.trim(), "{\"Backends\": [\"http://a\"]}");
    }

    #[test]
    fn all_comment_file_is_rejected() {
        let raw = "# just a comment\n# nothing else\n";
        let err = strip_comment_header(raw).unwrap_err();
        assert!(matches!(err, CreationError::InvalidResource(_)));
    }

    #[test]
    fn empty_file_is_rejected() {
        let err = strip_comment_header("").unwrap_err();
        assert!(matches!(err, CreationError::InvalidResource(_)));
    }

    #[test]
    fn defaults_apply_when_fields_absent() {
        let cli = Cli { config: PathBuf::from("x"), port: None, maxprocs: None, debug: 0, stdout: false };
        let raw = RawConfig {
            backends: vec!["http://a".to_owned()],
            port: None,
            max_procs: None,
            buckets: None,
            use_pb: None,
            graphite_host: None,
        };
        std::env::remove_var("GRAPHITEHOST");
        std::env::remove_var("GRAPHITEPORT");

        let snapshot = ConfigSnapshot {
            backends: raw.backends.clone(),
            listen_port: cli.port.unwrap_or_else(|| raw.port.unwrap_or(DEFAULT_PORT)),
            max_procs: cli.maxprocs.unwrap_or_else(|| raw.max_procs.unwrap_or(DEFAULT_MAX_PROCS)),
            buckets: raw.buckets.unwrap_or(DEFAULT_BUCKETS),
            use_binary_codec: raw.use_pb.unwrap_or(false),
            telemetry_sink: resolve_graphite_host(&raw),
            debug_level: cli.debug,
            mirror_stdout: cli.stdout,
        };

        assert_eq!(snapshot.listen_port, DEFAULT_PORT);
        assert_eq!(snapshot.max_procs, DEFAULT_MAX_PROCS);
        assert_eq!(snapshot.buckets, DEFAULT_BUCKETS);
        assert!(!snapshot.use_binary_codec);
        assert_eq!(snapshot.telemetry_sink, None);
    }

    #[test]
    fn cli_port_overrides_config_port() {
        let cli = Cli { config: PathBuf::from("x"), port: Some(9999), maxprocs: None, debug: 0, stdout: false };
        let port = cli.port.unwrap_or(DEFAULT_PORT);
        assert_eq!(port, 9999);
    }

    #[test]
    fn rejects_empty_backends_list() {
        let raw = RawConfig { backends: vec![], port: None, max_procs: None, buckets: None, use_pb: None, graphite_host: None };
        assert!(raw.backends.is_empty());
    }
}
