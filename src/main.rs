use clap::{error::ErrorKind, ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

use pairloop::classify::MarkerSet;
use pairloop::config::LoopConfig;
use pairloop::cycle::{CycleController, Task};
use pairloop::error::Result;
use pairloop::interrupt::InterruptHandler;
use pairloop::invoker::{agent_available, in_git_work_tree, AgentInvoker};
use pairloop::logging::{init_logging, LoggingConfig};
use pairloop::retry::RetryExecutor;
use pairloop::runner::{ExitStatus, LoopDriver, EXIT_FAILURE};
use pairloop::scratch::ScratchDir;
use pairloop::seed::{seed_exit_status, seed_history, SeedRequest, DEFAULT_HISTORY_FILE};
use pairloop::verify::CommandVerifier;

#[derive(Parser, Debug)]
#[command(name = "pairloop")]
#[command(version)]
#[command(about = "Drive an AI pair-programming CLI through build-fix-validate cycles")]
#[command(
    after_help = "Exit codes: 0 = ready/confident, 42 = human input required, 1 = failure"
)]
struct Cli {
    /// Configuration file [default: ./pairloop.toml if present]
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Working directory for the agent and build commands
    #[arg(long, short = 'd', global = true)]
    dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Append log output to this file
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Model used for progress and fix prompts
    #[arg(long, global = true)]
    coder_model: Option<String>,

    /// Model asked whether the work is complete
    #[arg(long, global = true)]
    validator_model: Option<String>,

    /// Model used when the validator fails
    #[arg(long, global = true)]
    fallback_model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Seed a fresh plan history and check the validator is confident in the plan
    Seed {
        /// Plan document to send
        plan_file: PathBuf,

        /// File listing the files involved (comma or newline separated)
        files_list: PathBuf,

        /// History file to write
        #[arg(default_value = DEFAULT_HISTORY_FILE)]
        output_history: PathBuf,
    },
    /// Run build-fix-validate cycles until the work is ready
    Run {
        /// Maximum number of cycles
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        max_cycles: u32,

        /// Task description handed to the coder model
        task_prompt: String,
    },
}

/// Report a failure that happens before logging is available.
fn early_failure(message: &str, code: u8) -> ExitCode {
    eprintln!(
        "[{}] pairloop: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        message
    );
    ExitCode::from(code)
}

/// Load config and apply CLI flags on top.
///
/// Without `--config`, the default file is looked up in `--dir`.
fn load_config(cli: &Cli) -> Result<LoopConfig> {
    let search_dir = cli.dir.as_deref().unwrap_or(Path::new("."));
    let mut config = LoopConfig::load(cli.config.as_deref(), search_dir)?;
    if let Some(dir) = &cli.dir {
        config.working_dir = dir.clone();
    }
    if let Some(path) = &cli.log_file {
        config.log_file = Some(path.clone());
    }
    if let Some(model) = &cli.coder_model {
        config.coder_model = model.clone();
    }
    if let Some(model) = &cli.validator_model {
        config.validator_model = model.clone();
    }
    if let Some(model) = &cli.fallback_model {
        config.validator_fallback_model = model.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn seed_command(
    config: &LoopConfig,
    request: SeedRequest,
    interrupt: &InterruptHandler,
) -> ExitStatus {
    let input = match request.load() {
        Ok(input) => input,
        Err(e) => {
            error!(error = %e, "cannot seed plan history");
            return ExitStatus::Failure;
        }
    };

    if !agent_available(&config.agent_program) {
        error!(program = %config.agent_program, "agent program not found");
        return ExitStatus::Failure;
    }

    let files = input.files.iter().map(PathBuf::from).collect();
    let invoker = AgentInvoker::from_config(config).with_context_files(files);
    let retry = RetryExecutor::new(config.max_retries, config.retry_base_delay());
    let markers = MarkerSet::seeding().with_priority(config.marker_priority);
    let models = config.models();

    let seeding = seed_history(
        &input,
        &request.output_history,
        &markers,
        &retry,
        &invoker,
        &models,
    );
    let outcome = tokio::select! {
        outcome = seeding => outcome,
        _ = interrupt.interrupted() => {
            warn!("interrupted, agent stopped");
            return ExitStatus::Failure;
        }
    };

    match outcome {
        Ok(state) => {
            let status = seed_exit_status(state);
            if status == ExitStatus::Failure {
                error!(
                    path = %request.output_history.display(),
                    "validator reply contained neither CONFIDENT nor QUESTIONS"
                );
            }
            status
        }
        Err(e) => {
            error!(error = %e, "seeding failed");
            ExitStatus::Failure
        }
    }
}

async fn run_command(
    config: &LoopConfig,
    max_cycles: u32,
    prompt: String,
    interrupt: &InterruptHandler,
) -> ExitStatus {
    let task = match Task::new(prompt, max_cycles) {
        Ok(task) => task,
        Err(e) => {
            error!(error = %e, "invalid task");
            return ExitStatus::Failure;
        }
    };

    if !agent_available(&config.agent_program) {
        error!(program = %config.agent_program, "agent program not found");
        return ExitStatus::Failure;
    }
    if !in_git_work_tree(&config.working_dir) {
        warn!(dir = %config.working_dir.display(), "not a git work tree; changes will not be tracked");
    }

    let scratch = match ScratchDir::create(config.scratch_root.as_deref()) {
        Ok(scratch) => scratch,
        Err(e) => {
            error!(error = %e, "cannot create scratch directory");
            return ExitStatus::Failure;
        }
    };
    interrupt.track_scratch(scratch.path());

    let retry = RetryExecutor::new(config.max_retries, config.retry_base_delay());
    let invoker = AgentInvoker::from_config(config);
    let verifier =
        CommandVerifier::from_config(config, retry.clone()).with_capture_dir(scratch.path());
    let controller = CycleController::from_config(config, &invoker, &verifier, retry);

    info!(
        max_cycles = task.max_cycles(),
        coder = %config.coder_model,
        validator = %config.validator_model,
        "starting run"
    );
    let driver = LoopDriver::new();
    let status = tokio::select! {
        report = driver.run(&task, &controller) => {
            match &report.error {
                Some(message) => error!(cycles = report.cycles_run, "run failed: {}", message),
                None => info!(cycles = report.cycles_run, status = ?report.status, "run finished"),
            }
            report.status
        }
        _ = interrupt.interrupted() => {
            warn!("interrupted, agent stopped");
            ExitStatus::Failure
        }
    };

    interrupt.untrack_scratch();
    if let Err(e) = scratch.close() {
        warn!(error = %e, "failed to remove scratch directory");
    }
    status
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(EXIT_FAILURE),
            };
        }
    };

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => return early_failure(&e.to_string(), e.exit_code()),
    };

    let logging = LoggingConfig::from_verbosity(cli.verbose).with_log_file(config.log_file.clone());
    if let Err(e) = init_logging(logging) {
        return early_failure(&format!("cannot initialize logging: {}", e), EXIT_FAILURE);
    }

    // installed before any scratch directory or agent child exists
    let interrupt = InterruptHandler::new();
    if let Err(e) = interrupt.install_handler() {
        warn!(error = %e, "failed to install interrupt handler");
    }

    let status = match cli.command {
        Commands::Seed {
            plan_file,
            files_list,
            output_history,
        } => {
            let request = SeedRequest::new(plan_file, files_list, Some(output_history));
            seed_command(&config, request, &interrupt).await
        }
        Commands::Run {
            max_cycles,
            task_prompt,
        } => run_command(&config, max_cycles, task_prompt, &interrupt).await,
    };

    status.into()
}
