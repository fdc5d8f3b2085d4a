//! agstream-replay - Drive recorded fragments through the bridge.
//!
//! Reads newline-delimited fragment JSON and prints the resulting protocol
//! events as newline-delimited JSON on stdout. Logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! # Replay a recorded run
//! agstream-replay --input run.ndjson
//!
//! # From stdin, with arguments delivered in one piece
//! cat run.ndjson | agstream-replay --coalesce-args
//!
//! # Debug logs as JSON
//! agstream-replay -i run.ndjson -v --json-logs
//! ```
//!
//! Fragment lines look like:
//!
//! ```json
//! {"kind":"text","text":"Hello"}
//! {"kind":"tool_call_begin","id":"t1","name":"search"}
//! {"kind":"tool_call_args","id":"t1","delta":"{\"q\":\"rust\"}"}
//! {"kind":"tool_call_end","id":"t1"}
//! {"kind":"tool_result","id":"t1","result":{"hits":3}}
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use agstream::fragment::read_fragments;
use agstream::{
    AgstreamConfig, ArgsMode, RunState, ToolCallTracker, logging::init_logging, spawn_run,
};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncRead, AsyncWriteExt};

/// Process exit status when the run ended with `run-error`.
const EXIT_RUN_ERRORED: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "agstream-replay", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/agstream/config.toml if present)
    #[arg(short, long, env = "AGSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Fragment file, one JSON object per line ("-" for stdin)
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Emit tool call arguments as one delta at tool call end
    #[arg(long)]
    coalesce_args: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(state) => ExitCode::from(exit_status(state)),
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

/// 0 when the run finished normally, 2 when it ended with `run-error`.
fn exit_status(state: RunState) -> u8 {
    match state {
        RunState::Finished => 0,
        RunState::NotStarted | RunState::Running | RunState::Errored => EXIT_RUN_ERRORED,
    }
}

async fn run(cli: Cli) -> Result<RunState> {
    let mut config =
        AgstreamConfig::load(cli.config.as_deref()).context("loading configuration")?;

    if cli.coalesce_args {
        config.converter.args_mode = ArgsMode::Coalesce;
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    match cli.verbose {
        0 => {}
        1 => config.logging.level = "debug".to_string(),
        _ => config.logging.level = "trace".to_string(),
    }
    init_logging(&config.logging);

    let reader = open_input(&cli.input).await?;
    let tracker = Arc::new(ToolCallTracker::new());
    let (handle, mut events) = spawn_run(tracker, &config, read_fragments(reader));
    tracing::debug!(run_id = %handle.run_id, input = %cli.input, "replay started");

    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.recv().await {
        let mut line = serde_json::to_string(&event).context("encoding event")?;
        line.push('\n');
        stdout
            .write_all(line.as_bytes())
            .await
            .context("writing to stdout")?;
    }
    stdout.flush().await.context("flushing stdout")?;

    let outcome = handle.join().await.context("run failed")?;
    tracing::info!(
        run_id = %outcome.run_id,
        state = %outcome.state,
        events = outcome.events_published,
        dropped = events.dropped(),
        "replay finished"
    );
    Ok(outcome.state)
}

async fn open_input(input: &str) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    if input == "-" {
        return Ok(Box::new(tokio::io::stdin()));
    }
    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("opening {input}"))?;
    Ok(Box::new(file))
}
