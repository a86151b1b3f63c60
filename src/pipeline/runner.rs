use anyhow::{bail, Result};
use chrono::Local;
use tracing::{error, info};

use super::audit_loop::{AuditLoop, LlmAuditor, LlmCorrector, LoopOutcome, LoopSeed};
use super::inputs::{self, CaseInputs, PersonaSet};
use super::parser;
use super::persist::{self, PersistedRun, RunPersister};
use super::record::{ModelSettings, RunRecord, RunStatus, Stage};
use super::summary::build_overall_summary;
use crate::config::Config;
use crate::error::PipelineError;
use crate::llm::client::{LlmClient, Prompt};
use crate::llm::prompts;

/// Result of a run that reached persistence.
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub summary: String,
    pub persisted: PersistedRun,
}

/// Pick the requested case, or the first available one.
pub fn resolve_case(config: &Config, requested: Option<&str>) -> Result<String> {
    let cases = inputs::list_cases(&config.paths.netlogo_dir)?;
    if cases.is_empty() {
        return Err(PipelineError::NoCases(config.paths.netlogo_dir.clone()).into());
    }
    match requested {
        Some(case) if cases.iter().any(|c| c == case) => Ok(case.to_string()),
        Some(case) => bail!(
            "Unknown NetLogo case '{}'. Available: {}",
            case,
            cases.join(", ")
        ),
        None => {
            info!("No case selected, using default: {}", cases[0]);
            Ok(cases[0].clone())
        }
    }
}

/// Run the pipeline once: compose, call, parse, audit/correct, persist.
///
/// The task file and inputs are checked before anything is sent to the
/// model. Once the output directory exists, failures are recorded as a
/// `FAILED` run and persisted before the error is returned.
pub async fn run_pipeline(
    config: &Config,
    client: &dyn LlmClient,
    case: Option<&str>,
) -> Result<RunReport> {
    let task_instructions = inputs::load_task_instructions(&config.paths.task_file)?;
    let case = resolve_case(config, case)?;
    let persona = inputs::load_persona_set(&config.paths.persona_dir, &config.run.persona_set)?;
    let case_inputs = inputs::load_case(&config.paths.netlogo_dir, &case)?;

    let run_id = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let settings = ModelSettings {
        model: client.model().to_string(),
        provider: config.llm.resolved_provider().to_string(),
        reasoning_effort: config.llm.reasoning_effort,
        verbosity: config.llm.verbosity,
    };
    let mut record = RunRecord::new(run_id, &case, &persona.name, settings);

    info!("--- Starting run: {} ---", record.run_id);
    info!("Case: {}", record.case);
    info!("Persona set: {}", record.persona_set);
    info!("Model: {}", record.settings.model);
    info!("Reasoning: {}", record.settings.reasoning_effort);
    info!("Verbosity: {}", record.settings.verbosity);

    let dir = persist::run_dir(
        &config.paths.output_dir,
        record.started_at,
        &record.persona_set,
        &record.case,
        &record.settings.model,
    );
    let persister = RunPersister::create(dir)?;

    let result = execute(
        config,
        client,
        &persister,
        &task_instructions,
        &case_inputs,
        &persona,
        &mut record,
    )
    .await;

    let (status, failure) = match result {
        Ok(outcome) => (outcome.status, None),
        Err(e) => {
            error!("Run failed: {:#}", e);
            (RunStatus::Failed(format!("{:#}", e)), Some(e))
        }
    };
    record.finish(status.clone());

    let summary = build_overall_summary(&record);
    info!("\n{}", summary);
    persister.write_summary(&summary)?;
    let persisted = persister.persist(record)?;

    match failure {
        Some(e) => Err(e),
        None => Ok(RunReport {
            status,
            summary,
            persisted,
        }),
    }
}

async fn execute(
    config: &Config,
    client: &dyn LlmClient,
    persister: &RunPersister,
    task_instructions: &str,
    case_inputs: &CaseInputs,
    persona: &PersonaSet,
    record: &mut RunRecord,
) -> Result<LoopOutcome> {
    let text = prompts::generation_prompt(
        task_instructions,
        &case_inputs.netlogo_code,
        persona,
        &case_inputs.images,
    );
    persister.write_instructions(&text)?;
    record.prompt = text.clone();

    info!(
        "Sending request to model {} ({} image(s))",
        client.model(),
        case_inputs.images.len()
    );
    let completion = client
        .complete(&Prompt::text(text).with_images(case_inputs.images.clone()))
        .await?;
    info!(
        "Model call successful. Tokens: input={}, output={}, total={}",
        completion.usage.input_tokens, completion.usage.output_tokens, completion.usage.total_tokens
    );
    record.add_usage(completion.usage);
    record.raw_response = completion.text.clone();
    persister.write_response(&completion)?;

    let sections = parser::parse_generation_response(&completion.text)?;
    let initial = parser::parse_diagram(&sections.initial_diagram, Stage::Initial)?;

    let rules = persona.rules_document();
    let auditor = LlmAuditor::new(client, &rules);
    let corrector = LlmCorrector::new(client, &rules);
    let seed = LoopSeed {
        initial_audit: sections.initial_audit,
        corrected_diagram: sections.corrected_diagram,
        final_audit: sections.final_audit,
    };

    AuditLoop::new(&auditor, &corrector, config.run.max_corrections)
        .with_seed(seed)
        .with_sink(persister)
        .run(&initial, record)
        .await
}
