use std::time::Instant;

use anyhow::Context;
use tracing::{error, info, warn};
use usermerge::config::{AggregatorConfig, ConfigOverrides};
use usermerge::{pipeline, CancelToken};

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn parse_count(flag: &str) -> anyhow::Result<Option<usize>> {
    parse_arg(flag)
        .map(|raw| {
            raw.parse::<usize>()
                .with_context(|| format!("invalid value for {flag}: {raw:?}"))
        })
        .transpose()
}

fn print_help() {
    eprintln!(
        r#"usermerge - aggregate per-user attributes and event counts

USAGE:
    usermerge [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to config file (TOML)
    -i, --infile <FILE>     Input records, one JSON object per line [default: data/messages.1.data]
    -o, --outfile <FILE>    Summary output [default: summary_output.csv]
        --shards <N>        Number of shards [default: 32]
        --workers <N>       Number of worker threads [default: available cores]
        --queue <N>         Work queue capacity [default: 100]
    -h, --help              Print help

ENVIRONMENT:
    USERMERGE_CONFIG          Path to config file
    USERMERGE_INPUT_PATH      Input records
    USERMERGE_OUTPUT_PATH     Summary output
    USERMERGE_SHARD_COUNT     Number of shards
    USERMERGE_WORKER_COUNT    Number of worker threads
    USERMERGE_QUEUE_CAPACITY  Work queue capacity
    RUST_LOG                  Log filter

Exits non-zero if the input cannot be opened, the output cannot be written,
or the run was interrupted (the partial summary is still written).
"#
    );
}

#[cfg(unix)]
async fn wait_for_shutdown() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt::init();
    let started = Instant::now();

    // Build CLI overrides
    let overrides = ConfigOverrides {
        input_path: parse_arg("--infile")
            .or_else(|| parse_arg("-i"))
            .map(Into::into),
        output_path: parse_arg("--outfile")
            .or_else(|| parse_arg("-o"))
            .map(Into::into),
        shard_count: parse_count("--shards")?,
        worker_count: parse_count("--workers")?,
        queue_capacity: parse_count("--queue")?,
    };

    // Load config: CLI > Env > File > Defaults
    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("USERMERGE_CONFIG").ok());
    let config = AggregatorConfig::load(config_path.as_deref(), overrides)?;

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => {
                warn!(signal, "shutdown requested, stopping record source");
                on_signal.cancel();
            }
            Err(e) => warn!(error = %e, "failed to install signal handlers"),
        }
    });

    let report = tokio::task::spawn_blocking(move || pipeline::run(&config, &cancel)).await??;

    let elapsed = started.elapsed();
    info!(
        ?elapsed,
        users = report.users,
        received = report.stats.received,
        rejected = report.stats.rejected,
        decode_errors = report.decode_errors,
        "run complete"
    );
    println!("Execution time: {:?}", elapsed);

    if !report.is_clean() {
        error!(
            cancelled = report.cancelled,
            source_error = ?report.source_error,
            "run did not complete; summary is partial"
        );
        std::process::exit(1);
    }

    Ok(())
}
