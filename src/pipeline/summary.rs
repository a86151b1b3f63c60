use super::record::RunRecord;
use crate::util::{format_duration, format_thousands};

const BANNER: &str = "==================== OVERALL SUMMARY ====================";

/// The OVERALL SUMMARY block for a finished (or failed) run.
pub fn build_overall_summary(record: &RunRecord) -> String {
    let mut lines = vec![BANNER.to_string()];
    lines.push(format!("Run: {}", record.run_id));
    lines.push(format!("Case: {}", record.case));
    lines.push(format!("Model: {}", record.settings.model));
    lines.push(format!("Persona: {}", record.persona_set));
    lines.push(format!("Reasoning: {}", record.settings.reasoning_effort));
    lines.push(format!("Verbosity: {}", record.settings.verbosity));
    lines.push(format!(
        "Start: {}",
        record.started_at.format("%Y-%m-%d %H:%M:%S")
    ));
    if let Some(ended) = record.ended_at {
        lines.push(format!("End:   {}", ended.format("%Y-%m-%d %H:%M:%S")));
    }
    lines.push(format!("Duration: {}", format_duration(record.duration())));

    let usage = &record.usage;
    lines.push("Tokens:".to_string());
    lines.push(format!("  • Input Tokens: {}", format_thousands(usage.input_tokens)));
    lines.push(format!(
        "  • Output Tokens: {} (reasoning={}, visible={})",
        format_thousands(usage.output_tokens),
        format_thousands(usage.reasoning_tokens),
        format_thousands(usage.visible_output_tokens())
    ));
    lines.push(format!("  • Total Tokens: {}", format_thousands(usage.total_tokens)));

    lines.push("Artifacts:".to_string());
    if record.artifacts().is_empty() {
        lines.push("  • (none)".to_string());
    }
    for artifact in record.artifacts() {
        lines.push(format!(
            "  • {} (round {})",
            artifact.file_stem(),
            artifact.round
        ));
    }

    lines.push(format!("Corrections: {}", record.iterations));
    if let Some(status) = &record.status {
        lines.push(format!("Status: {}", status));
    }

    lines.push("Final audit:".to_string());
    match &record.final_verdict {
        Some(verdict) => {
            lines.push(format!(
                "  • Verdict: {}",
                verdict.verdict().as_str().to_uppercase()
            ));
            lines.push(format!("  • Non-compliant rules: {}", verdict.rules().len()));
            for rule in verdict.rules() {
                lines.push(format!("    - {}: {}", rule.rule_id, rule.message));
            }
        }
        None => lines.push("  • Verdict: UNKNOWN".to_string()),
    }

    lines.push("=".repeat(BANNER.chars().count()));
    lines.join("\n") + "\n"
}
