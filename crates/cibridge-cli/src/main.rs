//! cibridge - Jenkins builds for tool-calling agents
//!
//! The `cibridge` command triggers builds, tracks what it triggered and
//! reads logs and artifacts. Every command prints one JSON document on
//! stdout; logs go to stderr.
//!
//! ## Commands
//!
//! - `trigger`: Start a build and wait briefly for its build number
//! - `status`: Refresh one trigger, or all unfinished ones
//! - `triggers`: List recorded triggers without contacting the server
//! - `build-status`: Show a build, or the latest build of a job
//! - `params`: Show the parameters a job accepts
//! - `log`: Read a window of console output
//! - `cancel`: Stop a build or cancel a trigger
//! - `artifacts` / `fetch`: List and download archived files

use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

use cibridge_core::metrics::METRICS;
use cibridge_core::{
    parameters_from_json, parse_parameter_pair, ArtifactContent, BridgeConfig, CiBridge,
    TriggerId,
};
use cibridge_gateway::{BuildParameters, JenkinsClient, JenkinsConfig};

#[derive(Parser)]
#[command(name = "cibridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Trigger and track Jenkins builds", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger a build and resolve its queue item
    Trigger {
        /// Job path, folders separated by '/'
        job: String,

        /// Build parameter (repeatable)
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Build parameters as a JSON object
        #[arg(long, value_name = "JSON")]
        params_json: Option<String>,

        /// Seconds to wait for a build number
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Initial delay between queue polls in milliseconds
        #[arg(long)]
        poll_ms: Option<u64>,
    },

    /// Refresh a trigger from the server (all unfinished triggers when omitted)
    Status {
        /// Trigger id returned by `trigger`
        trigger_id: Option<String>,
    },

    /// List recorded triggers, oldest first
    Triggers,

    /// Show a build, or the latest build of the job
    BuildStatus {
        job: String,

        #[arg(long)]
        build: Option<u64>,
    },

    /// Show the parameters a job accepts
    Params { job: String },

    /// Read console output
    Log {
        job: String,

        build: u64,

        /// Lines to skip, counted from the head (or the tail with --from-end)
        #[arg(long, default_value_t = 0)]
        start: usize,

        #[arg(long, default_value_t = 100)]
        max_lines: usize,

        /// Page backwards from the end of the log
        #[arg(long)]
        from_end: bool,
    },

    /// Stop a build, or cancel a trigger wherever it currently is
    Cancel {
        /// Trigger id to cancel
        #[arg(long, conflicts_with_all = ["job", "build"])]
        trigger: Option<String>,

        job: Option<String>,

        build: Option<u64>,
    },

    /// List archived artifacts of a build
    Artifacts { job: String, build: u64 },

    /// Download one artifact
    Fetch {
        job: String,

        build: u64,

        /// Artifact path as listed by `artifacts`
        path: String,

        /// Write the bytes to a file instead of printing them
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    cibridge_core::init_tracing(cli.json, level);

    let bridge = connect().context("Failed to set up cibridge")?;

    let result = match cli.command {
        Commands::Trigger {
            job,
            params,
            params_json,
            timeout_secs,
            poll_ms,
        } => {
            cmd_trigger(
                &bridge,
                &job,
                &params,
                params_json.as_deref(),
                timeout_secs,
                poll_ms,
            )
            .await
        }
        Commands::Status { trigger_id } => cmd_status(&bridge, trigger_id.as_deref()).await,
        Commands::Triggers => print_json(&bridge.list_triggers()),
        Commands::BuildStatus { job, build } => cmd_build_status(&bridge, &job, build).await,
        Commands::Params { job } => print_json(
            &bridge
                .job_parameters(&job)
                .await
                .with_context(|| format!("Failed to read parameters of '{job}'"))?,
        ),
        Commands::Log {
            job,
            build,
            start,
            max_lines,
            from_end,
        } => print_json(
            &bridge
                .read_log(&job, build, start, max_lines, from_end)
                .await
                .with_context(|| format!("Failed to read log of {job} #{build}"))?,
        ),
        Commands::Cancel {
            trigger,
            job,
            build,
        } => cmd_cancel(&bridge, trigger.as_deref(), job.as_deref(), build).await,
        Commands::Artifacts { job, build } => print_json(
            &bridge
                .list_artifacts(&job, build)
                .await
                .with_context(|| format!("Failed to list artifacts of {job} #{build}"))?,
        ),
        Commands::Fetch {
            job,
            build,
            path,
            output,
        } => cmd_fetch(&bridge, &job, build, &path, output.as_deref()).await,
    };

    METRICS.flush();
    result
}

/// Build the bridge from environment configuration.
fn connect() -> Result<CiBridge> {
    let jenkins = JenkinsConfig::from_env().context("Invalid Jenkins configuration")?;
    let config = BridgeConfig::from_env().context("Invalid cibridge configuration")?;
    info!(
        url = %jenkins.url,
        store = %config.store_path.display(),
        "connecting"
    );

    let client = JenkinsClient::new(jenkins).context("Failed to build Jenkins client")?;
    let bridge = CiBridge::open(Arc::new(client), &config)
        .with_context(|| format!("Failed to open ledger {:?}", config.store_path))?;
    Ok(bridge)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Merge `--params-json` and `-p KEY=VALUE` pairs; pairs win.
fn collect_parameters(pairs: &[String], json: Option<&str>) -> Result<BuildParameters> {
    let mut parameters = match json {
        Some(text) => {
            let value: serde_json::Value =
                serde_json::from_str(text).context("--params-json is not valid JSON")?;
            parameters_from_json(&value)?
        }
        None => BuildParameters::new(),
    };
    for pair in pairs {
        let (key, value) = parse_parameter_pair(pair)?;
        parameters.insert(key, value);
    }
    Ok(parameters)
}

async fn cmd_trigger(
    bridge: &CiBridge,
    job: &str,
    pairs: &[String],
    params_json: Option<&str>,
    timeout_secs: Option<u64>,
    poll_ms: Option<u64>,
) -> Result<()> {
    let parameters = collect_parameters(pairs, params_json)?;

    let mut options = bridge.resolve_options();
    if let Some(secs) = timeout_secs {
        options.timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = poll_ms {
        options.poll_interval = Duration::from_millis(ms);
    }

    let record = bridge
        .trigger_with(job, parameters, &options)
        .await
        .with_context(|| format!("Failed to trigger '{job}'"))?;
    print_json(&record)
}

async fn cmd_status(bridge: &CiBridge, trigger_id: Option<&str>) -> Result<()> {
    match trigger_id {
        Some(id) => {
            let record = bridge
                .status(&TriggerId::from(id))
                .await
                .with_context(|| format!("Failed to refresh trigger {id}"))?;
            print_json(&record)
        }
        None => print_json(&bridge.status_all().await),
    }
}

async fn cmd_build_status(bridge: &CiBridge, job: &str, build: Option<u64>) -> Result<()> {
    let info = bridge
        .build_status(job, build)
        .await
        .with_context(|| format!("Failed to read build status of '{job}'"))?;
    match info {
        Some(info) => print_json(&info),
        None => print_json(&serde_json::json!({
            "job": job,
            "message": "job has no builds yet",
        })),
    }
}

async fn cmd_cancel(
    bridge: &CiBridge,
    trigger: Option<&str>,
    job: Option<&str>,
    build: Option<u64>,
) -> Result<()> {
    match (trigger, job, build) {
        (Some(id), _, _) => {
            let record = bridge
                .cancel_trigger(&TriggerId::from(id))
                .await
                .with_context(|| format!("Failed to cancel trigger {id}"))?;
            print_json(&record)
        }
        (None, Some(job), Some(build)) => {
            bridge
                .cancel_build(job, build)
                .await
                .with_context(|| format!("Failed to stop {job} #{build}"))?;
            print_json(&serde_json::json!({
                "job": job,
                "build_number": build,
                "stop_requested": true,
            }))
        }
        _ => bail!("cancel needs --trigger <ID> or <JOB> <BUILD>"),
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct ArtifactOutput {
    path: String,
    size: usize,
    content_type: Option<String>,
    encoding: &'static str,
    content: String,
}

/// Inline UTF-8 text as is, everything else as base64.
fn encode_artifact(artifact: &ArtifactContent) -> ArtifactOutput {
    let (encoding, content) = match artifact.as_text() {
        Some(text) => ("utf-8", text.to_string()),
        None => (
            "base64",
            base64::engine::general_purpose::STANDARD.encode(&artifact.bytes),
        ),
    };
    ArtifactOutput {
        path: artifact.path.clone(),
        size: artifact.len(),
        content_type: artifact.content_type.clone(),
        encoding,
        content,
    }
}

async fn cmd_fetch(
    bridge: &CiBridge,
    job: &str,
    build: u64,
    path: &str,
    output: Option<&Path>,
) -> Result<()> {
    let artifact = bridge
        .fetch_artifact(job, build, path)
        .await
        .with_context(|| format!("Failed to fetch '{path}' of {job} #{build}"))?;

    match output {
        Some(file) => {
            std::fs::write(file, &artifact.bytes)
                .with_context(|| format!("Failed to write {:?}", file))?;
            print_json(&serde_json::json!({
                "path": artifact.path,
                "size": artifact.len(),
                "content_type": artifact.content_type,
                "written_to": file.display().to_string(),
            }))
        }
        None => print_json(&encode_artifact(&artifact)),
    }
}
