//! Bounded audit/correction loop around a generated diagram.
//!
//! The loop audits the latest diagram, and while the verdict is
//! non-compliant and rounds remain it asks for a corrected diagram and audits
//! that. Audits and corrections go through the [`Auditor`] and [`Corrector`]
//! seams so tests can drive the loop without a model.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::parser::{self, Marker};
use super::record::{Artifact, AuditVerdict, LoopState, RunRecord, RunStatus, Stage};
use crate::error::PipelineError;
use crate::llm::client::{LlmClient, Prompt, TokenUsage};
use crate::llm::prompts;

/// A value together with the tokens spent producing it.
#[derive(Debug, Clone)]
pub struct Metered<T> {
    pub value: T,
    pub usage: TokenUsage,
}

impl<T> Metered<T> {
    pub fn new(value: T, usage: TokenUsage) -> Self {
        Self { value, usage }
    }

    /// No model call was involved
    pub fn free(value: T) -> Self {
        Self {
            value,
            usage: TokenUsage::default(),
        }
    }
}

#[async_trait]
pub trait Auditor: Send + Sync {
    async fn audit(&self, diagram: &str) -> Result<Metered<AuditVerdict>>;
}

#[async_trait]
pub trait Corrector: Send + Sync {
    /// Returns the raw corrected diagram text; the loop validates it.
    async fn correct(&self, diagram: &str, verdict: &AuditVerdict) -> Result<Metered<String>>;
}

/// Receives every artifact as it is produced, with the state the loop
/// entered by producing it.
pub trait SnapshotSink: Send + Sync {
    fn snapshot(&self, state: LoopState, artifact: &Artifact) -> Result<()>;
}

pub struct NullSink;

impl SnapshotSink for NullSink {
    fn snapshot(&self, _state: LoopState, _artifact: &Artifact) -> Result<()> {
        Ok(())
    }
}

static NULL_SINK: NullSink = NullSink;

/// Sections the single-shot generation response already contained. They are
/// used in place of model calls, in order, before the loop asks for anything.
#[derive(Debug, Clone, Default)]
pub struct LoopSeed {
    pub initial_audit: Option<String>,
    pub corrected_diagram: Option<String>,
    pub final_audit: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub status: RunStatus,
    pub final_verdict: AuditVerdict,
    pub final_diagram: String,
    pub corrections: usize,
}

pub struct AuditLoop<'a> {
    auditor: &'a dyn Auditor,
    corrector: &'a dyn Corrector,
    sink: &'a dyn SnapshotSink,
    max_corrections: usize,
    seed: LoopSeed,
}

impl<'a> AuditLoop<'a> {
    pub fn new(
        auditor: &'a dyn Auditor,
        corrector: &'a dyn Corrector,
        max_corrections: usize,
    ) -> Self {
        Self {
            auditor,
            corrector,
            sink: &NULL_SINK,
            max_corrections,
            seed: LoopSeed::default(),
        }
    }

    pub fn with_seed(mut self, seed: LoopSeed) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_sink(mut self, sink: &'a dyn SnapshotSink) -> Self {
        self.sink = sink;
        self
    }

    /// Drive the loop from an already validated initial diagram. Every
    /// artifact and visited state is appended to `record`.
    pub async fn run(mut self, initial_diagram: &str, record: &mut RunRecord) -> Result<LoopOutcome> {
        let mut diagram = initial_diagram.to_string();
        self.emit(
            record,
            LoopState::Generated,
            Artifact::diagram(Stage::Initial, 0, diagram.as_str()),
        )?;

        let seeded_audit = self.seed.initial_audit.take();
        let mut verdict = self.audit(&diagram, seeded_audit, record).await?;
        self.emit(record, LoopState::Audited, Artifact::audit(Stage::Initial, 0, &verdict))?;
        log_verdict(0, &verdict);

        let mut round = 0;
        while !verdict.is_compliant() && round < self.max_corrections {
            round += 1;
            info!(
                "Correction round {}/{} ({} failing rule(s))",
                round,
                self.max_corrections,
                verdict.rules().len()
            );

            let seeded = if round == 1 {
                self.seed.corrected_diagram.take()
            } else {
                None
            };
            let from_seed = seeded.is_some();
            let raw = match seeded {
                Some(raw) => {
                    debug!("Using corrected diagram from the generation response");
                    raw
                }
                None => {
                    let corrected = self.corrector.correct(&diagram, &verdict).await?;
                    record.add_usage(corrected.usage);
                    corrected.value
                }
            };

            diagram = parser::parse_diagram(&raw, Stage::Corrected)?;
            record.iterations = round;
            self.emit(
                record,
                LoopState::Correcting,
                Artifact::diagram(Stage::Corrected, round, diagram.as_str()),
            )?;

            let seeded_audit = if from_seed {
                self.seed.final_audit.take()
            } else {
                None
            };
            verdict = self.audit(&diagram, seeded_audit, record).await?;

            let terminal = verdict.is_compliant() || round == self.max_corrections;
            let stage = if terminal { Stage::Final } else { Stage::Corrected };
            self.emit(record, LoopState::Audited, Artifact::audit(stage, round, &verdict))?;
            log_verdict(round, &verdict);
        }

        let (state, status) = if verdict.is_compliant() {
            (LoopState::Compliant, RunStatus::Compliant)
        } else {
            (LoopState::NonCompliantFinal, RunStatus::NonCompliantFinal)
        };
        record.states.push(state);
        record.final_verdict = Some(verdict.clone());
        info!("Audit loop finished: {} after {} correction(s)", status, round);

        Ok(LoopOutcome {
            status,
            final_verdict: verdict,
            final_diagram: diagram,
            corrections: round,
        })
    }

    /// Use the seeded audit when it parses; otherwise ask the auditor.
    async fn audit(
        &self,
        diagram: &str,
        seeded: Option<String>,
        record: &mut RunRecord,
    ) -> Result<AuditVerdict> {
        if let Some(raw) = seeded {
            match parser::parse_verdict(&raw) {
                Ok(verdict) => {
                    debug!("Using audit from the generation response");
                    return Ok(verdict);
                }
                Err(e) => warn!("Ignoring audit from the generation response: {}", e),
            }
        }
        let audited = self.auditor.audit(diagram).await?;
        record.add_usage(audited.usage);
        Ok(audited.value)
    }

    fn emit(&self, record: &mut RunRecord, state: LoopState, artifact: Artifact) -> Result<()> {
        self.sink.snapshot(state, &artifact)?;
        record.states.push(state);
        record.push_artifact(artifact);
        Ok(())
    }
}

fn log_verdict(round: usize, verdict: &AuditVerdict) {
    if verdict.is_compliant() {
        info!("Round {} audit: compliant", round);
    } else {
        let ids: Vec<&str> = verdict.rules().iter().map(|r| r.rule_id.as_str()).collect();
        info!("Round {} audit: non-compliant [{}]", round, ids.join(", "));
    }
}

/// Audits by asking the model for a verdict against the rule document.
pub struct LlmAuditor<'a> {
    client: &'a dyn LlmClient,
    rules: &'a str,
}

impl<'a> LlmAuditor<'a> {
    pub fn new(client: &'a dyn LlmClient, rules: &'a str) -> Self {
        Self { client, rules }
    }
}

#[async_trait]
impl<'a> Auditor for LlmAuditor<'a> {
    async fn audit(&self, diagram: &str) -> Result<Metered<AuditVerdict>> {
        let prompt = Prompt::text(prompts::audit_prompt(self.rules, diagram));
        let completion = self.client.complete(&prompt).await?;
        // Tolerate a missing marker pair if the reply is the bare JSON
        let section = parser::extract_section(&completion.text, Marker::FinalAudit)
            .unwrap_or_else(|| completion.text.clone());
        let verdict = parser::parse_verdict(&section)?;
        Ok(Metered::new(verdict, completion.usage))
    }
}

/// Corrects by sending the failing rules back to the model.
pub struct LlmCorrector<'a> {
    client: &'a dyn LlmClient,
    rules: &'a str,
}

impl<'a> LlmCorrector<'a> {
    pub fn new(client: &'a dyn LlmClient, rules: &'a str) -> Self {
        Self { client, rules }
    }
}

#[async_trait]
impl<'a> Corrector for LlmCorrector<'a> {
    async fn correct(&self, diagram: &str, verdict: &AuditVerdict) -> Result<Metered<String>> {
        let prompt = Prompt::text(prompts::correction_prompt(self.rules, diagram, verdict));
        let completion = self.client.complete(&prompt).await?;
        let section = parser::extract_section(&completion.text, Marker::CorrectedDiagram)
            .ok_or_else(|| {
                PipelineError::malformed(
                    Stage::Corrected.as_str(),
                    format!(
                        "missing {} markers",
                        Marker::CorrectedDiagram.start_tag()
                    ),
                )
            })?;
        Ok(Metered::new(section, completion.usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReasoningEffort, Verbosity};
    use crate::llm::client::{MockLlmClient, MOCK_CORRECTED_DIAGRAM, MOCK_INITIAL_DIAGRAM};
    use crate::pipeline::record::{ArtifactKind, ModelSettings, RuleViolation};
    use std::sync::Mutex;

    fn record() -> RunRecord {
        RunRecord::new(
            "20250101_120000",
            "3d-solids",
            "persona-v1",
            ModelSettings {
                model: "mock-model".into(),
                provider: "openai".into(),
                reasoning_effort: ReasoningEffort::Medium,
                verbosity: Verbosity::Medium,
            },
        )
    }

    struct NeverCompliant;

    #[async_trait]
    impl Auditor for NeverCompliant {
        async fn audit(&self, _diagram: &str) -> Result<Metered<AuditVerdict>> {
            Ok(Metered::free(AuditVerdict::non_compliant(vec![RuleViolation::new(
                "GCS9_ALWAYS",
                "1",
                "never satisfied",
            )])?))
        }
    }

    struct Echo;

    #[async_trait]
    impl Corrector for Echo {
        async fn correct(&self, diagram: &str, _verdict: &AuditVerdict) -> Result<Metered<String>> {
            Ok(Metered::free(diagram.to_string()))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl SnapshotSink for Recorder {
        fn snapshot(&self, _state: LoopState, artifact: &Artifact) -> Result<()> {
            self.0.lock().unwrap().push(artifact.file_stem());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_mock_client_drives_loop_to_compliance() {
        let client = MockLlmClient::new();
        let auditor = LlmAuditor::new(&client, "GCS2_SYS_COLOR rules");
        let corrector = LlmCorrector::new(&client, "GCS2_SYS_COLOR rules");
        let mut rec = record();

        let outcome = AuditLoop::new(&auditor, &corrector, 1)
            .run(MOCK_INITIAL_DIAGRAM, &mut rec)
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Compliant);
        assert_eq!(outcome.corrections, 1);
        assert_eq!(outcome.final_diagram, MOCK_CORRECTED_DIAGRAM);
        assert!(rec.usage.total_tokens > 0);
        assert_eq!(
            rec.states,
            vec![
                LoopState::Generated,
                LoopState::Audited,
                LoopState::Correcting,
                LoopState::Audited,
                LoopState::Compliant,
            ]
        );
    }

    #[tokio::test]
    async fn test_rounds_bounded_and_intermediate_audits_are_corrected_stage() {
        let sink = Recorder::default();
        let mut rec = record();

        let outcome = AuditLoop::new(&NeverCompliant, &Echo, 3)
            .with_sink(&sink)
            .run(MOCK_INITIAL_DIAGRAM, &mut rec)
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::NonCompliantFinal);
        assert_eq!(outcome.corrections, 3);
        assert_eq!(rec.iterations, 3);
        assert_eq!(
            *sink.0.lock().unwrap(),
            vec![
                "diagram-initial",
                "audit-initial",
                "diagram-corrected",
                "audit-corrected",
                "diagram-corrected",
                "audit-corrected",
                "diagram-corrected",
                "audit-final",
            ]
        );
        assert_eq!(rec.states.last(), Some(&LoopState::NonCompliantFinal));
    }

    #[tokio::test]
    async fn test_zero_corrections_stops_after_initial_audit() {
        let mut rec = record();
        let outcome = AuditLoop::new(&NeverCompliant, &Echo, 0)
            .run(MOCK_INITIAL_DIAGRAM, &mut rec)
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::NonCompliantFinal);
        assert_eq!(outcome.corrections, 0);
        assert_eq!(rec.artifacts().len(), 2);
        assert!(rec
            .artifacts()
            .iter()
            .all(|a| a.stage == Stage::Initial));
    }

    #[tokio::test]
    async fn test_seed_replaces_model_calls() {
        let mut rec = record();
        let seed = LoopSeed {
            initial_audit: Some(
                r#"{"verdict": "non-compliant", "non-compliant-rules": [{"rule": "GCS2_SYS_COLOR", "line": "2", "msg": "color"}]}"#
                    .to_string(),
            ),
            corrected_diagram: Some(MOCK_CORRECTED_DIAGRAM.to_string()),
            final_audit: Some(r#"{"verdict": "compliant", "non-compliant-rules": []}"#.to_string()),
        };

        // Both seams would keep the run non-compliant if they were consulted
        let outcome = AuditLoop::new(&NeverCompliant, &Echo, 1)
            .with_seed(seed)
            .run(MOCK_INITIAL_DIAGRAM, &mut rec)
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Compliant);
        assert_eq!(rec.usage, TokenUsage::default());
        let last = rec.artifacts().last().unwrap();
        assert_eq!((last.kind, last.stage), (ArtifactKind::Audit, Stage::Final));
    }

    #[tokio::test]
    async fn test_unparsable_seed_audit_falls_back_to_auditor() {
        let mut rec = record();
        let seed = LoopSeed {
            initial_audit: Some("looks good to me".to_string()),
            ..Default::default()
        };
        let outcome = AuditLoop::new(&NeverCompliant, &Echo, 0)
            .with_seed(seed)
            .run(MOCK_INITIAL_DIAGRAM, &mut rec)
            .await
            .unwrap();
        assert!(outcome.final_verdict.lists_rule("GCS9_ALWAYS"));
    }

    #[tokio::test]
    async fn test_malformed_seeded_correction_fails() {
        let mut rec = record();
        let seed = LoopSeed {
            corrected_diagram: Some("participant System".to_string()),
            ..Default::default()
        };
        let err = AuditLoop::new(&NeverCompliant, &Echo, 2)
            .with_seed(seed)
            .run(MOCK_INITIAL_DIAGRAM, &mut rec)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MalformedArtifact { .. })
        ));
    }
}
