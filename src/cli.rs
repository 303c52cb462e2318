use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::config::ServiceConfig;
use crate::config::types::{ProofOptions, ProofRequest, ProofResult};
use crate::core::engine::ProofEngine;
use crate::exec::context::ExecutionContext;

const MIB: u64 = 1024 * 1024;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check proofs and print one JSON result per line
    Check {
        /// Proof files; stdin is read when no file and no --proof is given
        files: Vec<PathBuf>,
        /// Proof source given inline
        #[arg(long)]
        proof: Option<String>,
        #[command(flatten)]
        limits: LimitArgs,
        /// Config file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Maximum number of provers running at once
        #[arg(long)]
        concurrency: Option<usize>,
        /// Print Prometheus metrics to stderr when done
        #[arg(long)]
        metrics: bool,
    },
    /// Print the effective configuration
    Config {
        /// Config file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
struct LimitArgs {
    /// Wall-clock timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,
    /// CPU limit in seconds
    #[arg(long)]
    cpu: Option<u64>,
    /// Memory (address space) limit in MB
    #[arg(long)]
    mem: Option<u64>,
    /// Stack limit in MB
    #[arg(long)]
    stack: Option<u64>,
    /// Output file size limit in MB
    #[arg(long)]
    fsize: Option<u64>,
    /// Maximum number of open files
    #[arg(long)]
    nofile: Option<u64>,
    /// Ask the prover for all tactics
    #[arg(long)]
    all_tactics: bool,
    /// Ask the prover for the syntax tree
    #[arg(long)]
    ast: bool,
    /// Ask the prover for tactic information
    #[arg(long)]
    tactics: bool,
    /// Ask the prover for premises
    #[arg(long)]
    premises: bool,
}

impl LimitArgs {
    fn to_options(&self) -> Result<ProofOptions> {
        let timeout = match self.timeout {
            Some(secs) => Some(Duration::try_from_secs_f64(secs).map_err(|_| {
                anyhow::anyhow!("--timeout must be a non-negative, representable number of seconds")
            })?),
            None => None,
        };

        Ok(ProofOptions {
            timeout,
            cpu_time_limit: self.cpu.map(Duration::from_secs),
            memory_limit: megabytes("--mem", self.mem)?,
            stack_limit: megabytes("--stack", self.stack)?,
            file_size_limit: megabytes("--fsize", self.fsize)?,
            open_files_limit: self.nofile,
            all_tactics: self.all_tactics,
            ast: self.ast,
            tactics: self.tactics,
            premises: self.premises,
        })
    }
}

fn megabytes(flag: &str, value: Option<u64>) -> Result<Option<u64>> {
    match value {
        Some(mb) => match mb.checked_mul(MIB) {
            Some(bytes) => Ok(Some(bytes)),
            None => anyhow::bail!("{} {} MB does not fit in a byte count", flag, mb),
        },
        None => Ok(None),
    }
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Check {
            files,
            proof,
            limits,
            config,
            concurrency,
            metrics,
        } => {
            let mut service = ServiceConfig::load(config.as_deref())?;
            if let Some(concurrency) = concurrency {
                service.prover.max_concurrency = concurrency;
            }
            let options = service.resolve_options(&limits.to_options()?);
            let requests = collect_requests(&files, proof, &options)?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            let all_passed = runtime.block_on(check_all(service, requests, metrics))?;

            if !all_passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Config { config } => {
            let service = ServiceConfig::load(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&service)?);
            Ok(())
        }
    }
}

fn collect_requests(
    files: &[PathBuf],
    inline: Option<String>,
    options: &ProofOptions,
) -> Result<Vec<ProofRequest>> {
    let mut sources = Vec::new();
    for path in files {
        sources.push(read_source(path)?);
    }
    if let Some(proof) = inline {
        sources.push(proof);
    }
    if sources.is_empty() {
        let mut stdin = String::new();
        std::io::stdin()
            .read_to_string(&mut stdin)
            .context("Failed to read proof from stdin")?;
        sources.push(stdin);
    }

    sources
        .into_iter()
        .map(|source| ProofRequest::new(source, options.clone()).map_err(Into::into))
        .collect()
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Run every request through one engine; true when all proofs succeed
async fn check_all(service: ServiceConfig, requests: Vec<ProofRequest>, metrics: bool) -> Result<bool> {
    let engine = Arc::new(ProofEngine::new(service.prover));
    let root = ExecutionContext::background();

    let interrupt = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling in-flight proofs");
            interrupt.cancel();
        }
    });

    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let engine = Arc::clone(&engine);
            let ctx = root.clone();
            tokio::spawn(async move { engine.check(&ctx, &request).await })
        })
        .collect();

    let mut all_passed = true;
    for handle in handles {
        match handle.await.context("Proof task panicked")? {
            Ok(result) => {
                all_passed &= result.success;
                print_result(&result)?;
            }
            Err(e) => {
                all_passed = false;
                eprintln!("Error: {}", e);
            }
        }
    }

    if metrics {
        eprint!("{}", engine.metrics().export_prometheus());
    }
    Ok(all_passed)
}

fn print_result(result: &ProofResult) -> Result<()> {
    println!("{}", serde_json::to_string(result)?);
    Ok(())
}
