use anyhow::Result;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

use crate::config::{Config, Provider, ReasoningEffort, Verbosity};
use crate::llm::factory;
use crate::pipeline::inputs;
use crate::pipeline::record::RunStatus;
use crate::pipeline::runner;

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub persona_set: Option<String>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub base_url: Option<String>,
    pub reasoning: Option<ReasoningEffort>,
    pub verbosity: Option<Verbosity>,
    pub max_corrections: Option<usize>,
    pub output_dir: Option<String>,
    pub task_file: Option<String>,
}

impl RunOverrides {
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(ref persona_set) = self.persona_set {
            info!("CLI override: persona_set = {}", persona_set);
            config.run.persona_set = persona_set.clone();
        }
        if let Some(ref model) = self.model {
            info!("CLI override: model = {}", model);
            config.llm.model = model.clone();
        }
        if let Some(ref provider) = self.provider {
            info!("CLI override: provider = {}", provider);
            config.llm.provider = Some(Provider::from_str(provider)?);
        }
        if let Some(ref base_url) = self.base_url {
            info!("CLI override: base_url = {}", base_url);
            config.llm.base_url = Some(base_url.clone());
        }
        if let Some(reasoning) = self.reasoning {
            info!("CLI override: reasoning_effort = {}", reasoning);
            config.llm.reasoning_effort = reasoning;
        }
        if let Some(verbosity) = self.verbosity {
            info!("CLI override: verbosity = {}", verbosity);
            config.llm.verbosity = verbosity;
        }
        if let Some(max) = self.max_corrections {
            info!("CLI override: max_corrections = {}", max);
            config.run.max_corrections = max;
        }
        if let Some(ref dir) = self.output_dir {
            info!("CLI override: output_dir = {}", dir);
            config.paths.output_dir = PathBuf::from(dir);
        }
        if let Some(ref task) = self.task_file {
            info!("CLI override: task_file = {}", task);
            config.paths.task_file = PathBuf::from(task);
        }
        Ok(())
    }
}

pub async fn run(
    case: Option<String>,
    config_path: Option<String>,
    overrides: RunOverrides,
    dry_run: bool,
) -> Result<()> {
    if let Some(ref cfg) = config_path {
        info!("Config: {}", cfg);
    }
    info!("Dry run: {}", dry_run);

    let mut config = Config::load_with_path(config_path)?;
    overrides.apply(&mut config)?;

    // A missing task file is fatal and outranks client setup errors
    inputs::load_task_instructions(&config.paths.task_file)?;
    let client = factory::create_client(&config, dry_run)?;
    let report = runner::run_pipeline(&config, client.as_ref(), case.as_deref()).await?;

    println!("{}", report.summary);
    match report.status {
        RunStatus::Compliant => info!("✓ Diagram is LUCIM compliant"),
        RunStatus::NonCompliantFinal => info!(
            "Diagram still non-compliant after {} correction round(s)",
            config.run.max_corrections
        ),
        RunStatus::Failed(ref reason) => info!("Run failed: {}", reason),
    }
    info!("Outputs written to {}", report.persisted.dir.display());

    Ok(())
}
