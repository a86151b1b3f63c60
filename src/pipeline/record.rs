//! Run data model: artifacts, audit verdicts and the run record.

use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::config::{ReasoningEffort, Verbosity};
use crate::error::PipelineError;
use crate::llm::client::TokenUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Diagram,
    Audit,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Diagram => "diagram",
            ArtifactKind::Audit => "audit",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Diagram => "puml",
            ArtifactKind::Audit => "json",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Initial,
    Corrected,
    Final,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initial => "initial",
            Stage::Corrected => "corrected",
            Stage::Final => "final",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub stage: Stage,
    /// Correction round that produced it; 0 is the initial generation
    pub round: usize,
    pub content: String,
}

impl Artifact {
    pub fn diagram(stage: Stage, round: usize, content: impl Into<String>) -> Self {
        Self {
            kind: ArtifactKind::Diagram,
            stage,
            round,
            content: content.into(),
        }
    }

    pub fn audit(stage: Stage, round: usize, verdict: &AuditVerdict) -> Self {
        Self {
            kind: ArtifactKind::Audit,
            stage,
            round,
            content: verdict.to_json_pretty(),
        }
    }

    /// `diagram-initial.puml`, `audit-final.json`, ...
    pub fn file_stem(&self) -> String {
        format!("{}-{}", self.kind.as_str(), self.stage.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Compliant,
    #[serde(alias = "non_compliant", alias = "noncompliant")]
    NonCompliant,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Compliant => "compliant",
            Verdict::NonCompliant => "non-compliant",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleViolation {
    #[serde(rename = "rule")]
    pub rule_id: String,
    #[serde(rename = "line", default, deserialize_with = "string_or_number")]
    pub line_ref: String,
    #[serde(rename = "msg", default)]
    pub message: String,
}

impl RuleViolation {
    pub fn new(
        rule_id: impl Into<String>,
        line_ref: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            line_ref: line_ref.into(),
            message: message.into(),
        }
    }
}

/// Models write line references as `"12"`, `12` or `null`.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Verdict of one audit. `rules` is empty exactly when the verdict is
/// compliant; every constructor, deserialization included, checks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawVerdict")]
pub struct AuditVerdict {
    verdict: Verdict,
    #[serde(rename = "non-compliant-rules")]
    rules: Vec<RuleViolation>,
}

#[derive(Deserialize)]
struct RawVerdict {
    verdict: Verdict,
    #[serde(rename = "non-compliant-rules", default)]
    rules: Vec<RuleViolation>,
}

impl TryFrom<RawVerdict> for AuditVerdict {
    type Error = PipelineError;

    fn try_from(raw: RawVerdict) -> Result<Self, Self::Error> {
        AuditVerdict::new(raw.verdict, raw.rules)
    }
}

impl AuditVerdict {
    pub fn new(verdict: Verdict, rules: Vec<RuleViolation>) -> Result<Self, PipelineError> {
        match (verdict, rules.is_empty()) {
            (Verdict::Compliant, false) => Err(PipelineError::InvalidVerdict(format!(
                "verdict is compliant but {} rule(s) are listed",
                rules.len()
            ))),
            (Verdict::NonCompliant, true) => Err(PipelineError::InvalidVerdict(
                "verdict is non-compliant but no rules are listed".to_string(),
            )),
            _ => Ok(Self { verdict, rules }),
        }
    }

    pub fn compliant() -> Self {
        Self {
            verdict: Verdict::Compliant,
            rules: Vec::new(),
        }
    }

    pub fn non_compliant(rules: Vec<RuleViolation>) -> Result<Self, PipelineError> {
        Self::new(Verdict::NonCompliant, rules)
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn rules(&self) -> &[RuleViolation] {
        &self.rules
    }

    pub fn is_compliant(&self) -> bool {
        self.verdict == Verdict::Compliant
    }

    pub fn lists_rule(&self, rule_id: &str) -> bool {
        self.rules.iter().any(|r| r.rule_id == rule_id)
    }

    pub fn to_json_pretty(&self) -> String {
        // Plain strings and enums only; serialization cannot fail
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// States visited by the audit-correction loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    Generated,
    Audited,
    Correcting,
    Compliant,
    NonCompliantFinal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Compliant,
    NonCompliantFinal,
    Failed(String),
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Compliant => f.write_str("COMPLIANT"),
            RunStatus::NonCompliantFinal => f.write_str("NON_COMPLIANT_FINAL"),
            RunStatus::Failed(reason) => write!(f, "FAILED ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub model: String,
    pub provider: String,
    pub reasoning_effort: ReasoningEffort,
    pub verbosity: Verbosity,
}

/// One execution of the pipeline, from invocation to persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub case: String,
    pub persona_set: String,
    pub settings: ModelSettings,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub raw_response: String,
    #[serde(default)]
    artifacts: Vec<Artifact>,
    #[serde(default)]
    pub final_verdict: Option<AuditVerdict>,
    /// Correction rounds performed
    #[serde(default)]
    pub iterations: usize,
    #[serde(default)]
    pub states: Vec<LoopState>,
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub usage: TokenUsage,
    pub started_at: DateTime<Local>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Local>>,
}

impl RunRecord {
    pub fn new(
        run_id: impl Into<String>,
        case: impl Into<String>,
        persona_set: impl Into<String>,
        settings: ModelSettings,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            case: case.into(),
            persona_set: persona_set.into(),
            settings,
            prompt: String::new(),
            raw_response: String::new(),
            artifacts: Vec::new(),
            final_verdict: None,
            iterations: 0,
            states: Vec::new(),
            status: None,
            usage: TokenUsage::default(),
            started_at: Local::now(),
            ended_at: None,
        }
    }

    pub fn push_artifact(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn add_usage(&mut self, usage: TokenUsage) {
        self.usage += usage;
    }

    /// Most recent diagram of the given stage
    pub fn latest_diagram(&self, stage: Stage) -> Option<&Artifact> {
        self.artifacts
            .iter()
            .rev()
            .find(|a| a.kind == ArtifactKind::Diagram && a.stage == stage)
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = Some(status);
        self.ended_at = Some(Local::now());
    }

    pub fn duration(&self) -> std::time::Duration {
        self.ended_at
            .unwrap_or_else(Local::now)
            .signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ModelSettings {
        ModelSettings {
            model: "mock-model".to_string(),
            provider: "openai".to_string(),
            reasoning_effort: ReasoningEffort::Medium,
            verbosity: Verbosity::Medium,
        }
    }

    #[test]
    fn test_verdict_invariant_rejects_compliant_with_rules() {
        let err = AuditVerdict::new(
            Verdict::Compliant,
            vec![RuleViolation::new("GCS2_SYS_COLOR", "2", "missing color")],
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidVerdict(_)));
    }

    #[test]
    fn test_verdict_invariant_rejects_non_compliant_without_rules() {
        assert!(AuditVerdict::non_compliant(Vec::new()).is_err());
    }

    #[test]
    fn test_verdict_deserialization_enforces_invariant() {
        let json = r#"{"verdict": "compliant", "non-compliant-rules": [{"rule": "X", "line": "1", "msg": "m"}]}"#;
        assert!(serde_json::from_str::<AuditVerdict>(json).is_err());

        let json = r#"{"verdict": "non-compliant"}"#;
        assert!(serde_json::from_str::<AuditVerdict>(json).is_err());
    }

    #[test]
    fn test_verdict_wire_format() {
        let verdict = AuditVerdict::non_compliant(vec![RuleViolation::new(
            "GCS2_SYS_COLOR",
            "2",
            "System participant must use #E8C28A",
        )])
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&verdict.to_json_pretty()).unwrap();
        assert_eq!(json["verdict"], "non-compliant");
        assert_eq!(json["non-compliant-rules"][0]["rule"], "GCS2_SYS_COLOR");
        assert_eq!(json["non-compliant-rules"][0]["line"], "2");
        assert_eq!(json["non-compliant-rules"][0]["msg"], "System participant must use #E8C28A");
    }

    #[test]
    fn test_line_ref_accepts_number_and_null() {
        let json = r#"{"verdict": "non-compliant", "non-compliant-rules": [
            {"rule": "A", "line": 7, "msg": "a"},
            {"rule": "B", "line": null, "msg": "b"}
        ]}"#;
        let verdict: AuditVerdict = serde_json::from_str(json).unwrap();
        assert_eq!(verdict.rules()[0].line_ref, "7");
        assert_eq!(verdict.rules()[1].line_ref, "");
        assert!(verdict.lists_rule("B"));
    }

    #[test]
    fn test_compliant_without_rules_key() {
        let verdict: AuditVerdict = serde_json::from_str(r#"{"verdict": "compliant"}"#).unwrap();
        assert!(verdict.is_compliant());
        assert!(verdict.rules().is_empty());
    }

    #[test]
    fn test_artifact_file_stem() {
        let artifact = Artifact::diagram(Stage::Corrected, 1, "@startuml\n@enduml");
        assert_eq!(artifact.file_stem(), "diagram-corrected");
        assert_eq!(artifact.kind.extension(), "puml");
    }

    #[test]
    fn test_run_status_serialization() {
        let json = serde_json::to_value(RunStatus::NonCompliantFinal).unwrap();
        assert_eq!(json["status"], "NON_COMPLIANT_FINAL");
        let json = serde_json::to_value(RunStatus::Failed("boom".into())).unwrap();
        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["reason"], "boom");
    }

    #[test]
    fn test_run_record_latest_diagram_and_finish() {
        let mut record = RunRecord::new("20250101_120000", "3d-solids", "persona-v1", settings());
        record.push_artifact(Artifact::diagram(Stage::Initial, 0, "a"));
        record.push_artifact(Artifact::diagram(Stage::Corrected, 1, "b"));
        record.push_artifact(Artifact::diagram(Stage::Corrected, 2, "c"));
        assert_eq!(record.latest_diagram(Stage::Corrected).unwrap().content, "c");
        assert!(record.latest_diagram(Stage::Final).is_none());

        assert!(record.ended_at.is_none());
        record.finish(RunStatus::Compliant);
        assert_eq!(record.status, Some(RunStatus::Compliant));
        assert!(record.ended_at.is_some());
    }
}
