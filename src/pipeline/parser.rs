//! Extracts diagrams and audit verdicts from delimited model output.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::record::{AuditVerdict, Stage};
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    InitialDiagram,
    InitialAudit,
    CorrectedDiagram,
    FinalAudit,
}

impl Marker {
    pub fn name(&self) -> &'static str {
        match self {
            Marker::InitialDiagram => "INITIAL_DIAGRAM",
            Marker::InitialAudit => "INITIAL_AUDIT",
            Marker::CorrectedDiagram => "CORRECTED_DIAGRAM",
            Marker::FinalAudit => "FINAL_AUDIT",
        }
    }

    pub fn start_tag(&self) -> String {
        format!("[START_{}]", self.name())
    }

    pub fn end_tag(&self) -> String {
        format!("[END_{}]", self.name())
    }

    fn pattern(&self) -> &'static Regex {
        match self {
            Marker::InitialDiagram => &INITIAL_DIAGRAM_RE,
            Marker::InitialAudit => &INITIAL_AUDIT_RE,
            Marker::CorrectedDiagram => &CORRECTED_DIAGRAM_RE,
            Marker::FinalAudit => &FINAL_AUDIT_RE,
        }
    }
}

fn section_regex(name: &str) -> Regex {
    Regex::new(&format!(r"(?s)\[START_{name}\](.*?)\[END_{name}\]"))
        .unwrap_or_else(|e| panic!("invalid section pattern for {}: {}", name, e))
}

static INITIAL_DIAGRAM_RE: Lazy<Regex> = Lazy::new(|| section_regex("INITIAL_DIAGRAM"));
static INITIAL_AUDIT_RE: Lazy<Regex> = Lazy::new(|| section_regex("INITIAL_AUDIT"));
static CORRECTED_DIAGRAM_RE: Lazy<Regex> = Lazy::new(|| section_regex("CORRECTED_DIAGRAM"));
static FINAL_AUDIT_RE: Lazy<Regex> = Lazy::new(|| section_regex("FINAL_AUDIT"));

/// Trimmed text between the first `[START_X]` and the next `[END_X]`.
pub fn extract_section(text: &str, marker: Marker) -> Option<String> {
    marker
        .pattern()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Sections of the single-shot generation response. Only the initial
/// diagram is required.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationSections {
    pub initial_diagram: String,
    pub initial_audit: Option<String>,
    pub corrected_diagram: Option<String>,
    pub final_audit: Option<String>,
}

pub fn parse_generation_response(text: &str) -> Result<GenerationSections, PipelineError> {
    let initial_diagram = extract_section(text, Marker::InitialDiagram)
        .ok_or_else(|| PipelineError::MissingMarker(Marker::InitialDiagram.name().to_string()))?;

    let sections = GenerationSections {
        initial_diagram,
        initial_audit: extract_section(text, Marker::InitialAudit),
        corrected_diagram: extract_section(text, Marker::CorrectedDiagram),
        final_audit: extract_section(text, Marker::FinalAudit),
    };

    for (marker, present) in [
        (Marker::InitialAudit, sections.initial_audit.is_some()),
        (Marker::CorrectedDiagram, sections.corrected_diagram.is_some()),
        (Marker::FinalAudit, sections.final_audit.is_some()),
    ] {
        if !present {
            debug!("Section not found in model output: {}", marker.name());
        }
    }

    Ok(sections)
}

/// Strip markdown code fences (```plantuml, ```puml or plain ```)
fn strip_markdown_fences(content: &str) -> String {
    let trimmed = content.trim();

    if trimmed.starts_with("```") && trimmed.ends_with("```") && trimmed.len() >= 6 {
        let inner = &trimmed[3..trimmed.len() - 3];
        // Drop the language tag on the opening fence line
        let inner = match inner.find('\n') {
            Some(nl) if !inner[..nl].trim().contains(' ') => &inner[nl + 1..],
            _ => inner,
        };
        return inner.trim().to_string();
    }

    trimmed.to_string()
}

/// Validate a diagram section: `@startuml` must precede `@enduml`. Returns the
/// document from `@startuml` through `@enduml`.
pub fn parse_diagram(raw: &str, stage: Stage) -> Result<String, PipelineError> {
    let content = strip_markdown_fences(raw);
    if content.is_empty() {
        return Err(PipelineError::malformed(stage.as_str(), "diagram is empty"));
    }

    let start = content
        .find("@startuml")
        .ok_or_else(|| PipelineError::malformed(stage.as_str(), "missing @startuml"))?;
    let end = content[start..]
        .find("@enduml")
        .map(|idx| start + idx + "@enduml".len())
        .ok_or_else(|| {
            PipelineError::malformed(stage.as_str(), "missing @enduml after @startuml")
        })?;

    Ok(content[start..end].to_string())
}

/// Extract a JSON object from a string that may have markdown fences or preamble text.
fn extract_json_block(text: &str) -> String {
    let trimmed = text.trim();

    // Try: markdown json fence
    if let Some(start) = trimmed.find("```json") {
        if let Some(end) = trimmed[start + 7..].find("```") {
            return trimmed[start + 7..start + 7 + end].trim().to_string();
        }
    }

    // Try: markdown plain fence
    if let Some(start) = trimmed.find("```") {
        if let Some(end) = trimmed[start + 3..].find("```") {
            let inner = trimmed[start + 3..start + 3 + end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    // Try: find first { and last }
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return trimmed[start..=end].to_string();
            }
        }
    }

    trimmed.to_string()
}

/// Parse an audit verdict. The verdict object may sit at the top level or
/// under a `data` key.
pub fn parse_verdict(raw: &str) -> Result<AuditVerdict, PipelineError> {
    let json_str = extract_json_block(raw);
    let value: serde_json::Value = serde_json::from_str(&json_str)
        .map_err(|e| PipelineError::InvalidVerdict(format!("not valid JSON: {}", e)))?;

    let value = match value.get("data") {
        Some(data) if value.get("verdict").is_none() && data.is_object() => data.clone(),
        _ => value,
    };

    serde_json::from_value(value).map_err(|e| PipelineError::InvalidVerdict(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::record::Verdict;

    #[test]
    fn test_extract_section_first_occurrence_trimmed() {
        let text = "noise [START_FINAL_AUDIT]\n  one \n[END_FINAL_AUDIT] [START_FINAL_AUDIT]two[END_FINAL_AUDIT]";
        assert_eq!(extract_section(text, Marker::FinalAudit).unwrap(), "one");
    }

    #[test]
    fn test_extract_section_missing_end_marker() {
        let text = "[START_INITIAL_DIAGRAM]@startuml";
        assert!(extract_section(text, Marker::InitialDiagram).is_none());
    }

    #[test]
    fn test_parse_generation_requires_initial_diagram() {
        let err = parse_generation_response("[START_FINAL_AUDIT]{}[END_FINAL_AUDIT]").unwrap_err();
        assert!(matches!(err, PipelineError::MissingMarker(ref m) if m == "INITIAL_DIAGRAM"));
    }

    #[test]
    fn test_parse_generation_optional_sections() {
        let text = "[START_INITIAL_DIAGRAM]\n@startuml\n@enduml\n[END_INITIAL_DIAGRAM]\n\
                    [START_INITIAL_AUDIT]{\"verdict\":\"compliant\"}[END_INITIAL_AUDIT]";
        let sections = parse_generation_response(text).unwrap();
        assert_eq!(sections.initial_diagram, "@startuml\n@enduml");
        assert!(sections.initial_audit.is_some());
        assert!(sections.corrected_diagram.is_none());
        assert!(sections.final_audit.is_none());
    }

    #[test]
    fn test_parse_diagram_strips_fences() {
        let raw = "```plantuml\n@startuml\nA -> B\n@enduml\n```";
        assert_eq!(
            parse_diagram(raw, Stage::Initial).unwrap(),
            "@startuml\nA -> B\n@enduml"
        );
    }

    #[test]
    fn test_parse_diagram_drops_surrounding_prose() {
        let raw = "Here it is:\n@startuml\nA -> B\n@enduml\nDone.";
        assert_eq!(
            parse_diagram(raw, Stage::Corrected).unwrap(),
            "@startuml\nA -> B\n@enduml"
        );
    }

    #[test]
    fn test_parse_diagram_rejects_malformed() {
        for raw in ["", "A -> B", "@enduml\n@startuml", "@startuml\nA -> B"] {
            let err = parse_diagram(raw, Stage::Corrected).unwrap_err();
            assert!(
                matches!(err, PipelineError::MalformedArtifact { ref stage, .. } if stage == "corrected"),
                "accepted {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_parse_verdict_plain() {
        let verdict = parse_verdict(r#"{"verdict": "compliant", "non-compliant-rules": []}"#).unwrap();
        assert!(verdict.is_compliant());
    }

    #[test]
    fn test_parse_verdict_in_json_fence_with_preamble() {
        let raw = "Audit result:\n```json\n{\"verdict\": \"non-compliant\", \"non-compliant-rules\": [{\"rule\": \"GCS2_SYS_COLOR\", \"line\": 2, \"msg\": \"color\"}]}\n```";
        let verdict = parse_verdict(raw).unwrap();
        assert_eq!(verdict.verdict(), Verdict::NonCompliant);
        assert_eq!(verdict.rules()[0].line_ref, "2");
    }

    #[test]
    fn test_parse_verdict_under_data_key() {
        let raw = r#"{"data": {"verdict": "non-compliant", "non-compliant-rules": [{"rule": "R1", "line": "4", "msg": "m"}]}, "errors": []}"#;
        let verdict = parse_verdict(raw).unwrap();
        assert!(verdict.lists_rule("R1"));
    }

    #[test]
    fn test_parse_verdict_rejects_invariant_violation() {
        let raw = r#"{"verdict": "non-compliant", "non-compliant-rules": []}"#;
        assert!(matches!(
            parse_verdict(raw).unwrap_err(),
            PipelineError::InvalidVerdict(_)
        ));
    }

    #[test]
    fn test_parse_verdict_rejects_garbage() {
        assert!(parse_verdict("the diagram looks fine").is_err());
    }
}
