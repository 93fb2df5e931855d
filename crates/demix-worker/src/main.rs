//! demix worker - runs one vocal-removal job per invocation
//!
//! The job JSON is read from `--job <file>` or stdin and the response JSON is
//! written to stdout, so any job-intake runtime that can spawn a process can
//! drive it. Logs go to stderr (`RUST_LOG=debug` for verbose output).
//!
//! ## Commands
//!
//! - `run` (default): process one job, without model warm-up
//! - `serve`: warm up once, then process newline-delimited jobs from stdin,
//!   writing one response line per job
//! - `probe`: print the detected accelerator as JSON
//! - `init-config`: write the default YAML config

use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use demix_core::config::{default_config_path, save_config, WorkerConfig};
use demix_core::device::{DeviceSelection, NvidiaSmiProbe};
use demix_core::{JobError, JobResponse, Processor};

#[derive(Debug, Parser)]
#[command(name = "demix-worker", version, about = "Serverless vocal-removal worker")]
struct Cli {
    /// Config file (defaults to ~/.config/demix/config.yaml)
    #[arg(long, global = true, env = "DEMIX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process one job and print the response
    Run {
        /// Job JSON file; stdin when omitted
        #[arg(long)]
        job: Option<PathBuf>,

        /// Pretty-print the response
        #[arg(long)]
        pretty: bool,
    },
    /// Warm up once, then process one JSON job per stdin line
    Serve,
    /// Print the accelerator this worker would use
    Probe,
    /// Write the default configuration
    InitConfig {
        /// Destination (defaults to the --config path)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: Cli) -> Result<ExitCode> {
    match cli.command.unwrap_or(Command::Run {
        job: None,
        pretty: false,
    }) {
        Command::Run { job, pretty } => run(cli.config.as_deref(), job.as_deref(), pretty),
        Command::Serve => serve(cli.config.as_deref()),
        Command::Probe => probe(cli.config.as_deref()),
        Command::InitConfig { path, force } => {
            let path = path
                .or(cli.config)
                .unwrap_or_else(default_config_path);
            init_config(&path, force)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run(config_path: Option<&Path>, job_path: Option<&Path>, pretty: bool) -> Result<ExitCode> {
    let config = WorkerConfig::load(config_path);
    log::info!("demix worker starting up");

    let processor = init_processor(config, false)?;

    let response = match read_job(job_path) {
        Ok(job) => processor.handle(&job),
        Err(e) => {
            let err = JobError::InvalidInput(format!("{:#}", e));
            JobResponse::failure(&err, 0.0)
        }
    };

    let value = response.to_value();
    let text = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .context("Failed to serialize response")?;
    println!("{}", text);

    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn serve(config_path: Option<&Path>) -> Result<ExitCode> {
    let config = WorkerConfig::load(config_path);
    log::info!("demix worker starting up (serve)");

    let processor = init_processor(config, true)?;
    let stdin = std::io::stdin();
    let count = serve_jobs(&processor, stdin.lock(), std::io::stdout().lock())?;
    log::info!("Input closed after {} jobs", count);
    Ok(ExitCode::SUCCESS)
}

/// Build the processor, warming models only when `warm` is set
fn init_processor(mut config: WorkerConfig, warm: bool) -> Result<Processor> {
    if !warm && config.warmup.enabled {
        log::info!("Single job run, skipping model warm-up");
        config.warmup.enabled = false;
    }
    Processor::init(&config, &NvidiaSmiProbe::new()).context("Failed to initialise worker")
}

/// Handle one job per non-blank input line, writing one response line each
fn serve_jobs<R: BufRead, W: Write>(processor: &Processor, input: R, mut output: W) -> Result<usize> {
    let mut count = 0;
    for line in input.lines() {
        let line = line.context("Failed to read job line")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Value>(&line) {
            Ok(job) => processor.handle(&job),
            Err(e) => {
                let err = JobError::InvalidInput(format!("Job is not valid JSON: {}", e));
                JobResponse::failure(&err, 0.0)
            }
        };
        let text = serde_json::to_string(&response.to_value()).context("Failed to serialize response")?;
        writeln!(output, "{}", text).context("Failed to write response")?;
        output.flush().context("Failed to write response")?;
        count += 1;
    }
    Ok(count)
}

fn probe(config_path: Option<&Path>) -> Result<ExitCode> {
    let config = WorkerConfig::load(config_path);
    let selection = DeviceSelection::detect(&config.device, &NvidiaSmiProbe::new());
    println!(
        "{}",
        serde_json::to_string_pretty(&selection).context("Failed to serialize device")?
    );
    Ok(ExitCode::SUCCESS)
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{:?} already exists (use --force to overwrite)", path);
    }
    save_config(&WorkerConfig::default(), path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

/// Read a job from a file, or stdin when no path is given
fn read_job(path: Option<&Path>) -> Result<Value> {
    let text = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file {:?}", path))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read job from stdin")?;
            text
        }
    };
    serde_json::from_str(&text).context("Job is not valid JSON")
}
