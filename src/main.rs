use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use netlogo_lucim::cli;
use netlogo_lucim::cli::run::RunOverrides;
use netlogo_lucim::config::{ReasoningEffort, Verbosity};
use netlogo_lucim::error::PipelineError;

#[derive(Parser)]
#[command(name = "netlogo-lucim", version)]
#[command(about = "Convert NetLogo models into LUCIM compliant PlantUML diagrams", long_about = None)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, audit and correct a diagram for one NetLogo case
    Run {
        /// NetLogo case name (defaults to the first available case)
        #[arg(long)]
        case: Option<String>,

        /// Persona set directory name
        #[arg(long)]
        persona_set: Option<String>,

        /// Model id (e.g. "gpt-5-mini-2025-08-07", "gemini-2.5-pro")
        #[arg(long)]
        model: Option<String>,

        /// Provider override: openai, gemini, openrouter, openai-compatible
        #[arg(long)]
        provider: Option<String>,

        /// Base URL for openai-compatible gateways
        #[arg(long)]
        base_url: Option<String>,

        /// Reasoning effort
        #[arg(long, value_enum)]
        reasoning: Option<ReasoningEffort>,

        /// Text verbosity
        #[arg(long, value_enum)]
        verbosity: Option<Verbosity>,

        /// Maximum correction rounds after the initial audit
        #[arg(long)]
        max_corrections: Option<usize>,

        /// Output root directory
        #[arg(long)]
        output_dir: Option<String>,

        /// Task instructions file
        #[arg(long)]
        task_file: Option<String>,

        /// Path to config file (defaults to ./lucim.toml or ~/.config/netlogo-lucim/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Use mock LLM client for testing
        #[arg(long)]
        dry_run: bool,
    },

    /// List NetLogo cases, persona sets and models
    List {
        #[arg(long)]
        config: Option<String>,
    },

    /// Validate configuration, API keys and input directories
    ConfigCheck {
        #[arg(long)]
        config: Option<String>,

        /// Also send one small request to the configured provider
        #[arg(long)]
        live: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            case,
            persona_set,
            model,
            provider,
            base_url,
            reasoning,
            verbosity,
            max_corrections,
            output_dir,
            task_file,
            config,
            dry_run,
        } => {
            let overrides = RunOverrides {
                persona_set,
                model,
                provider,
                base_url,
                reasoning,
                verbosity,
                max_corrections,
                output_dir,
                task_file,
            };
            cli::run::run(case, config, overrides, dry_run).await
        }
        Commands::List { config } => cli::list::run(config),
        Commands::ConfigCheck { config, live } => cli::config_check::run(config, live).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match dispatch(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_code(&e)
        }
    }
}

fn exit_code(e: &anyhow::Error) -> ExitCode {
    match e.downcast_ref::<PipelineError>() {
        Some(PipelineError::MissingTaskFile(_)) => ExitCode::from(2),
        _ => ExitCode::FAILURE,
    }
}
