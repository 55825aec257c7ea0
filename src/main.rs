use anyhow::{bail, Context, Result};
use bgproc::{Config, ProcessManager, ProcessRequest};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bgproc")]
#[command(about = "Run and supervise child processes", long_about = None)]
struct Args {
    /// Config file (overrides the default search paths)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run a command and print its captured output
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Working directory
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Extra environment variable, KEY=VALUE
    #[arg(short, long = "env", value_parser = parse_env_var)]
    env: Vec<(String, String)>,

    /// Per-stream output cap in bytes
    #[arg(short, long)]
    limit: Option<usize>,

    /// Kill the process after this many seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Print the output snapshot as JSON
    #[arg(long)]
    json: bool,

    /// Command; without ARGS it runs through the shell
    command: String,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn parse_env_var(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("expected KEY=VALUE, got {s:?}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => Config::load(),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let manager = ProcessManager::with_config(config.manager);

    let code = match args.command {
        Cmd::Run(run) => run_command(&manager, run).await,
    };
    manager.cleanup().await;

    std::process::exit(shell_exit_code(code?));
}

/// Signal deaths are stored as `-signo`; report them the way shells do.
fn shell_exit_code(code: i32) -> i32 {
    if code < 0 {
        128 + code.saturating_neg()
    } else {
        code
    }
}

async fn run_command(manager: &ProcessManager, run: RunArgs) -> Result<i32> {
    let mut request = ProcessRequest::new(run.command)
        .args(run.args)
        .envs(run.env.into_iter().collect::<HashMap<_, _>>());
    if let Some(cwd) = run.cwd {
        request = request.cwd(cwd);
    }
    if let Some(limit) = run.limit {
        request = request.output_limit(limit);
    }

    let id = manager.start_process(request).await?;

    let exit_code = match run.timeout {
        Some(secs) => {
            match tokio::time::timeout(Duration::from_secs(secs), manager.wait_for_exit(&id)).await
            {
                Ok(code) => code?,
                Err(_) => {
                    tracing::warn!("Timed out after {secs}s, killing {id}");
                    manager.kill_process(&id).await?;
                    manager.wait_for_exit(&id).await?
                }
            }
        }
        None => manager.wait_for_exit(&id).await?,
    };

    let output = manager.get_output(&id)?;
    if run.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(output.stdout.as_bytes())
            .context("Failed to write stdout")?;
        stdout.flush()?;
        eprint!("{}", output.stderr);
        if output.truncated {
            tracing::warn!("Output was truncated");
        }
    }

    manager.release_process(&id)?;
    Ok(exit_code)
}
