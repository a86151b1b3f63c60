use anyhow::Result;
use std::env;
use std::fs;

use crate::config::{Config, Provider, AVAILABLE_MODELS};
use crate::llm::client::Prompt;
use crate::llm::factory;
use crate::pipeline::inputs;

const LIVE_CHECK_PROMPT: &str = "Reply with the single word OK.";

struct CheckResult {
    passed: Vec<String>,
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl CheckResult {
    fn new() -> Self {
        Self {
            passed: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn pass(&mut self, msg: impl Into<String>) {
        self.passed.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }
}

pub async fn run(config_path: Option<String>, live: bool) -> Result<()> {
    let mut results = CheckResult::new();

    let config = match Config::load_with_path(config_path.clone()) {
        Ok(config) => {
            let source = config_path.as_deref().unwrap_or("default search path");
            results.pass(format!("Config loaded from {}", source));
            config
        }
        Err(e) => {
            // Reported, not propagated: this command is a diagnostic
            results.error(format!("Failed to load config: {:#}", e));
            print_results(&results);
            return Ok(());
        }
    };

    check_config(&config, &mut results);
    if live {
        check_live(&config, &mut results).await;
    }
    print_results(&results);
    Ok(())
}

/// Send one tiny request through the configured client.
async fn check_live(config: &Config, results: &mut CheckResult) {
    let client = match factory::create_client(config, false) {
        Ok(client) => client,
        Err(e) => {
            results.error(format!("Live check: could not create client: {:#}", e));
            return;
        }
    };

    match client.complete(&Prompt::text(LIVE_CHECK_PROMPT)).await {
        Ok(completion) => results.pass(format!(
            "Live check: {} answered ({} tokens)",
            client.model(),
            completion.usage.total_tokens
        )),
        Err(e) => results.error(format!("Live check: {} failed: {:#}", client.model(), e)),
    }
}

fn check_config(config: &Config, results: &mut CheckResult) {
    let provider = config.llm.resolved_provider();
    results.pass(format!(
        "LLM provider: {} (model: {})",
        provider, config.llm.model
    ));

    if !AVAILABLE_MODELS.contains(&config.llm.model.as_str()) {
        results.warn(format!(
            "Model {} is not in the known model list",
            config.llm.model
        ));
    }

    if provider == Provider::OpenAICompatible && config.llm.base_url.is_none() {
        results.warn("openai-compatible provider without base_url (using http://localhost:11434/v1)");
    }

    check_api_key(config, provider, results);
    check_inputs(config, results);

    if config.run.max_corrections == 0 {
        results.warn("run.max_corrections is 0: non-compliant diagrams will not be corrected");
    } else {
        results.pass(format!("Max correction rounds: {}", config.run.max_corrections));
    }
}

fn check_api_key(config: &Config, provider: Provider, results: &mut CheckResult) {
    if let Some(var) = &config.llm.api_key_env {
        if var.eq_ignore_ascii_case("none") {
            results.pass("API key: no API key needed");
            return;
        }
    }

    let candidates = config.llm.api_key_candidates();
    let found = candidates
        .iter()
        .find(|var| env::var(var).map(|v| !v.trim().is_empty()).unwrap_or(false));

    match found {
        Some(var) => results.pass(format!("API key: {} is set", var)),
        None if provider == Provider::OpenAICompatible => results.warn(format!(
            "API key: none of {} is set (OK for local models, needed for gateways)",
            candidates.join(", ")
        )),
        None => results.error(format!(
            "API key: none of {} is set",
            candidates.join(", ")
        )),
    }
}

fn check_inputs(config: &Config, results: &mut CheckResult) {
    let paths = &config.paths;

    match inputs::list_cases(&paths.netlogo_dir) {
        Ok(cases) if !cases.is_empty() => results.pass(format!(
            "NetLogo cases: {} found in {}",
            cases.len(),
            paths.netlogo_dir.display()
        )),
        _ => results.error(format!(
            "No NetLogo cases (*-netlogo-code.md) in {}",
            paths.netlogo_dir.display()
        )),
    }

    match inputs::list_persona_sets(&paths.persona_dir) {
        Ok(sets) if sets.contains(&config.run.persona_set) => {
            results.pass(format!("Persona set: {}", config.run.persona_set))
        }
        Ok(sets) => results.error(format!(
            "Persona set {} not found in {} (available: {})",
            config.run.persona_set,
            paths.persona_dir.display(),
            sets.join(", ")
        )),
        Err(_) => results.error(format!(
            "Persona directory not readable: {}",
            paths.persona_dir.display()
        )),
    }

    match fs::read_to_string(&paths.task_file) {
        Ok(content) if !content.trim().is_empty() => {
            results.pass(format!("Task file: {}", paths.task_file.display()))
        }
        Ok(_) => results.error(format!("Task file is empty: {}", paths.task_file.display())),
        Err(_) => results.error(format!(
            "Task file not found: {}",
            paths.task_file.display()
        )),
    }
}

fn print_results(results: &CheckResult) {
    println!();
    for msg in &results.passed {
        println!("  \u{2713} {}", msg);
    }
    for msg in &results.warnings {
        println!("  ! {}", msg);
    }
    for msg in &results.errors {
        println!("  \u{2717} {}", msg);
    }
    println!();
    println!(
        "{} passed, {} warnings, {} errors",
        results.passed.len(),
        results.warnings.len(),
        results.errors.len()
    );
}
