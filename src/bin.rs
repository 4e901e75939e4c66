//! `oblique-bot` executable: parse flags, set up tracing, load configuration, serve.

use std::path::PathBuf;

use clap::Parser;
use oblique_bot::base::{config::Config, types::Void};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use tracing::Level;
use tracing_subscriber::{filter::LevelFilter, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// Continues a Slack channel in the voice of whoever asks.
///
/// Settings are read from a TOML file and `OBLIQUE_BOT_*` environment variables.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML configuration file; `.hidden/config.toml` is used when present.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Log more: `-v` for debug (payloads included), `-vv` for trace.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Install the stdout layer, plus an OTLP span exporter when an endpoint is configured.
fn init_tracing(verbose: u8) -> Void {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // Each trigger runs in its own span; logging only span closes keeps one line per finished step.
    let stdout = tracing_subscriber::fmt::layer().with_target(false).with_span_events(FmtSpan::CLOSE);

    let otel = match std::env::var_os("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Some(_) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder().with_http().with_protocol(Protocol::HttpBinary).build()?;
            let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder().with_batch_exporter(exporter).build();

            Some(tracing_opentelemetry::layer().with_tracer(provider.tracer("oblique-bot")))
        }
        None => None,
    };

    tracing_subscriber::registry().with(otel).with(LevelFilter::from_level(level)).with(stdout).init();

    Ok(())
}

#[tokio::main]
async fn main() -> Void {
    let args = Args::parse();

    init_tracing(args.verbose)?;

    let config = Config::load(args.config.as_deref())?;

    oblique_bot::start(config).await
}
