use anyhow::{anyhow, Context};
use casescope::config::{BackendKind, EngineConfig};
use casescope::mapreduce::{self, MapContext};
use casescope::record::parse_ts_value;
use casescope::store::MemoryStore;
use casescope::QueryEngine;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::sync::{Arc, Once};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_parallelism() {
    static START: Once = Once::new();
    START.call_once(|| {
        let n = num_cpus::get();
        let _ = rayon::ThreadPoolBuilder::new().num_threads(n).build_global();
    });
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("casescope=info"));
    if verbose {
        filter = filter.add_directive("casescope=debug".parse()?);
    }
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "casescope", version, about = "Answer plain-language questions about grievance cases")]
struct Cli {
    /// Engine config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Batch backend: in_process | external
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    /// Evaluation instant instead of the current time (RFC 3339 or YYYY-MM-DD)
    #[arg(long, global = true)]
    now: Option<String>,

    #[arg(long, short = 'v', global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer a question against a JSON or NDJSON record file
    Query {
        text: String,
        #[arg(long)]
        data: PathBuf,
    },
    /// Show the parsed intent, route and compiled filter without running anything
    Explain { text: String },
    /// Streaming mapper: records on stdin, `key<TAB>value` lines on stdout
    Map {
        #[arg(long = "urgent-after-days")]
        urgent_after_days: Option<u32>,
    },
    /// Streaming reducer: key-sorted `key<TAB>value` lines on stdin
    Reduce,
}

fn parse_now(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    parse_ts_value(&serde_json::Value::String(raw.to_string())).ok_or_else(|| anyhow!("--now is not a timestamp: {raw}"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let text = if atty::is(atty::Stream::Stdout) { serde_json::to_string_pretty(value)? } else { serde_json::to_string(value)? };
    println!("{text}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    init_parallelism();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    let now = match cli.now.as_deref() {
        Some(raw) => parse_now(raw)?,
        None => Utc::now(),
    };

    match cli.command {
        Command::Query { text, data } => {
            let store = MemoryStore::load(&data).with_context(|| format!("reading records from {}", data.display()))?;
            let engine = QueryEngine::from_config(Arc::new(store), &config)?;
            let resp = engine.answer_at(&text, now).await;
            print_json(&resp)?;
            if !resp.success {
                std::process::exit(2);
            }
        }
        Command::Explain { text } => {
            let engine = QueryEngine::from_config(Arc::new(MemoryStore::new()), &config)?;
            print_json(&engine.explain(&text, now))?;
        }
        Command::Map { urgent_after_days } => {
            let ctx = MapContext { now, urgent_after_days: urgent_after_days.unwrap_or(config.urgent_after_days) };
            let stats = mapreduce::map_stream(io::stdin().lock(), BufWriter::new(io::stdout().lock()), &ctx).context("map stage")?;
            tracing::debug!(lines_in = stats.lines_in, emitted = stats.lines_out, skipped = stats.skipped, "map stage done");
        }
        Command::Reduce => {
            let stats = mapreduce::reduce_stream(io::stdin().lock(), BufWriter::new(io::stdout().lock())).context("reduce stage")?;
            tracing::debug!(lines_in = stats.lines_in, keys = stats.lines_out, skipped = stats.skipped, "reduce stage done");
        }
    }
    Ok(())
}
