//! `saheeli` command line.
//!
//! Host commands queue prompts and drive Servo units through `docker`; the
//! `servo` command is the unit entrypoint and runs the agent loop.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;

use saheeli::agent::{AgentConfig, AgentLoop};
use saheeli::capabilities::CapabilityRegistry;
use saheeli::controller::OrchestrationController;
use saheeli::core::types::TaskStatus;
use saheeli::exit_codes;
use saheeli::healthcheck::{check_config, check_workspace};
use saheeli::io::config::{DEFAULT_CONFIG_PATH, init_config, load_config};
use saheeli::io::docker::DockerCli;
use saheeli::io::llm::{HttpLlmClient, LlmClient, ScriptedLlm};
use saheeli::io::workspace::UNIT_WORKSPACE;
use saheeli::logging;

#[derive(Parser)]
#[command(
    name = "saheeli",
    version,
    about = "Run LLM agent tasks in isolated Servo containers"
)]
struct Cli {
    /// Path to the TOML config.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file if it is missing.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Build the Servo image from the configured build context.
    BuildServo,
    /// Submit prompt files and run every task to a terminal status.
    Submit {
        /// Prompt file; repeat for several tasks.
        #[arg(long = "prompt", required = true, num_args = 1..)]
        prompts: Vec<PathBuf>,
    },
    /// Run the agent loop (Servo unit entrypoint).
    Servo {
        #[arg(long, default_value = UNIT_WORKSPACE)]
        workspace: PathBuf,
        /// Task id; defaults to `$TASK_ID`, then `task`.
        #[arg(long)]
        task_id: Option<String>,
    },
    /// Probe the host config or the unit workspace.
    Healthcheck {
        #[arg(value_enum)]
        target: HealthTarget,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum HealthTarget {
    Host,
    Servo,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::BuildServo => cmd_build_servo(&cli.config),
        Command::Submit { prompts } => cmd_submit(&cli.config, prompts),
        Command::Servo { workspace, task_id } => cmd_servo(&cli.config, workspace, task_id),
        Command::Healthcheck { target } => Ok(cmd_healthcheck(&cli.config, target)),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if init_config(config_path, force)? {
        println!("wrote {}", config_path.display());
    } else {
        println!("{} exists; use --force to overwrite", config_path.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_build_servo(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let controller = OrchestrationController::new(DockerCli::default(), config);
    controller.build_servo_image()?;
    println!("built {}", controller.orchestrator().config().servo_image);
    Ok(exit_codes::OK)
}

fn cmd_submit(config_path: &Path, prompts: Vec<PathBuf>) -> Result<i32> {
    let config = load_config(config_path)?;
    let controller = OrchestrationController::new(DockerCli::default(), config);
    for prompt in prompts {
        controller.submit(prompt);
    }

    let outcomes = controller.drain();
    for outcome in &outcomes {
        println!("{}: {}", outcome.task_id, outcome.status);
    }
    if outcomes
        .iter()
        .any(|outcome| outcome.status == TaskStatus::Incomplete)
    {
        return Ok(exit_codes::INCOMPLETE);
    }
    Ok(exit_codes::OK)
}

fn cmd_servo(config_path: &Path, workspace: PathBuf, task_id: Option<String>) -> Result<i32> {
    let config = load_config(config_path)?;
    let task_id = task_id
        .or_else(|| env::var("TASK_ID").ok().filter(|id| !id.is_empty()))
        .unwrap_or_else(|| "task".to_string());

    let api_key = config.api_key();
    let llm: Box<dyn LlmClient> = if api_key.is_empty() {
        warn!(env_var = %config.api_key_env_var, "no API key; using offline model");
        Box::new(ScriptedLlm::offline())
    } else {
        Box::new(HttpLlmClient::new(
            &config.api_base,
            &api_key,
            &config.model_name,
            config.llm_timeout(),
        )?)
    };
    let capabilities = CapabilityRegistry::with_builtins();
    let agent_config = AgentConfig {
        task_id,
        workspace,
        max_messages: config.max_messages,
    };

    let outcome = AgentLoop::new(&agent_config, llm.as_ref(), &capabilities)?.run()?;
    println!(
        "{}: complete after {} llm calls",
        agent_config.task_id, outcome.llm_calls
    );
    Ok(exit_codes::OK)
}

fn cmd_healthcheck(config_path: &Path, target: HealthTarget) -> i32 {
    let result = match target {
        HealthTarget::Host => check_config(config_path),
        HealthTarget::Servo => check_workspace(Path::new(UNIT_WORKSPACE)),
    };
    match result {
        Ok(()) => {
            println!("OK");
            exit_codes::OK
        }
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    }
}
