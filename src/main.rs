//! code-sandbox daemon
//!
//! MCP server and one-shot runner for untrusted code. Each execution is
//! launched through nsjail (or directly), confines itself with rlimits and a
//! seccomp allowlist, and is supervised against a wall-clock deadline.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use code_sandbox_daemon::config::Config;
use code_sandbox_daemon::guest::{self, GuestLaunch};
use code_sandbox_daemon::identity::Identity;
use code_sandbox_daemon::mcp;
use code_sandbox_daemon::orchestrator::Orchestrator;
use code_sandbox_daemon::request::{ExecuteResponse, ExecutionRecord, ExecutionRequest, RequestPolicy};
use code_sandbox_daemon::restrict::{DenyAction, ResourceLimits};

#[derive(Parser, Debug)]
#[command(name = "code-sandbox-daemon")]
#[command(about = "MCP server for sandboxed execution of untrusted code")]
struct Args {
    /// JSON configuration file (falls back to CODE_SANDBOX_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the MCP protocol
    Serve {
        /// Run in stdio mode (for MCP clients)
        #[arg(long)]
        stdio: bool,
    },

    /// Execute one program and print the JSON result
    Run {
        /// Source text to execute
        #[arg(long, conflicts_with = "file")]
        code: Option<String>,

        /// File holding the source to execute (stdin when neither is given)
        #[arg(long)]
        file: Option<PathBuf>,

        /// CPU-time budget in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Print the history record instead of the response
        #[arg(long)]
        record: bool,
    },

    /// Confine this process and exec the interpreter
    #[command(hide = true)]
    Guest {
        #[arg(long)]
        cpu_seconds: u64,

        #[arg(long)]
        memory_bytes: u64,

        #[arg(long)]
        output_bytes: u64,

        #[arg(long, default_value = "errno")]
        deny: DenyAction,

        /// Inherited descriptor for reporting setup failures
        #[arg(long)]
        status_fd: Option<i32>,

        /// Interpreter, its arguments and the source file
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // The guest runner must stay single-threaded and keep stderr for the guest,
    // so it is dispatched before logging or the runtime exist.
    if let Command::Guest {
        cpu_seconds,
        memory_bytes,
        output_bytes,
        deny,
        status_fd,
        command,
    } = &args.command
    {
        let mut command = command.iter();
        let program = command.next().map(PathBuf::from).unwrap_or_default();
        guest::run(&GuestLaunch {
            limits: ResourceLimits {
                cpu_seconds: *cpu_seconds,
                memory_bytes: *memory_bytes,
                output_bytes: *output_bytes,
            },
            deny_action: *deny,
            program,
            args: command.cloned().collect(),
            status_fd: *status_fd,
        });
    }

    // Initialize logging (stderr so stdout is free for MCP protocol)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let identity = Identity::resolve(&config.identity).context("Failed to resolve guest identity")?;
    let orchestrator = Orchestrator::from_config(&config, identity)?;
    let policy = RequestPolicy::from(&config.limits);

    info!(
        isolation = ?config.isolation.mode,
        interpreter = %config.interpreter.path.display(),
        "Loaded configuration"
    );

    match args.command {
        Command::Serve { stdio } => {
            if stdio {
                mcp::serve_stdio(orchestrator, policy).await?;
            } else {
                anyhow::bail!("Only --stdio mode is currently supported");
            }
        }
        Command::Run {
            code,
            file,
            timeout,
            record,
        } => {
            let code = read_source(code, file)?;
            let request = ExecutionRequest::new(code, timeout, &policy)?;
            let result = orchestrator.run(&request).await?;

            let json = if record {
                serde_json::to_string_pretty(&ExecutionRecord::new(&request, &result))?
            } else {
                serde_json::to_string_pretty(&ExecuteResponse::from(&result))?
            };
            println!("{json}");
        }
        Command::Guest { .. } => anyhow::bail!("guest is dispatched before the runtime starts"),
    }

    Ok(())
}

fn read_source(code: Option<String>, file: Option<PathBuf>) -> Result<String> {
    if let Some(code) = code {
        return Ok(code);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }
    let mut code = String::new();
    std::io::stdin()
        .read_to_string(&mut code)
        .context("Failed to read source from stdin")?;
    Ok(code)
}
