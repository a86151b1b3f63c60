// Prompt templates for generation, audit and correction

use crate::pipeline::inputs::PersonaSet;
use crate::pipeline::record::AuditVerdict;

const IMAGE_PREVIEW_CHARS: usize = 100;

pub const GENERATION_INSTRUCTION: &str = "Generate a LUCIM compliant puml diagram taking as input the netlogo code and netlogo simulation screenshots. \
Structure your response with clear markers. First, provide the initial diagram within [START_INITIAL_DIAGRAM] and [END_INITIAL_DIAGRAM] markers. \
Then, provide the initial audit results within [START_INITIAL_AUDIT] and [END_INITIAL_AUDIT] markers. \
If the audit is non-compliant, correct the puml diagram and provide the corrected diagram within [START_CORRECTED_DIAGRAM] and [END_CORRECTED_DIAGRAM] markers. \
Finally, run a final audit on the corrected diagram and provide the results within [START_FINAL_AUDIT] and [END_FINAL_AUDIT] markers. \
Audit results are JSON objects of the form {\"verdict\": \"compliant\" | \"non-compliant\", \"non-compliant-rules\": [{\"rule\": \"<rule id>\", \"line\": \"<line>\", \"msg\": \"<message>\"}]}.";

const VERDICT_FORMAT: &str = r#"{
  "verdict": "compliant" | "non-compliant",
  "non-compliant-rules": [
    {"rule": "<rule id>", "line": "<diagram line>", "msg": "<what is wrong>"}
  ]
}"#;

/// The single-shot generation document: task instructions, the generation
/// instruction, the NetLogo code, one section per persona file and a summary
/// of the attached screenshots.
pub fn generation_prompt(
    task_instructions: &str,
    netlogo_code: &str,
    persona: &PersonaSet,
    images: &[String],
) -> String {
    let mut parts = vec![
        task_instructions.trim_end().to_string(),
        String::new(),
        GENERATION_INSTRUCTION.to_string(),
        format!("\n--- NETLOGO_CODE ---\n{}", netlogo_code),
    ];

    for file in &persona.files {
        parts.push(format!(
            "\n--- {} ---\n{}",
            file.name.to_uppercase(),
            file.content
        ));
    }

    if !images.is_empty() {
        let mut summary = format!(
            "\n\n--- IMAGES ---\nNumber of NetLogo interface images: {}\n",
            images.len()
        );
        for (i, img) in images.iter().enumerate() {
            let preview: String = img.chars().take(IMAGE_PREVIEW_CHARS).collect();
            summary.push_str(&format!(
                "Image {}: Base64 encoded PNG (length: {} characters)\nBase64 preview: {}...\n",
                i + 1,
                img.len(),
                preview
            ));
        }
        parts.push(summary);
    }

    parts.join("\n")
}

pub fn audit_prompt(rules_document: &str, diagram: &str) -> String {
    format!(
        r#"Audit the following PlantUML diagram for LUCIM compliance.

Check the diagram against every rule of the compliance rules below. Report only
rules that are actually violated, citing the diagram line for each.

Respond with the verdict JSON inside [START_FINAL_AUDIT] and [END_FINAL_AUDIT]
markers, using exactly this shape:
{}

"non-compliant-rules" must be empty when the verdict is "compliant" and must
list at least one rule when it is "non-compliant".

--- COMPLIANCE RULES ---
{}

--- DIAGRAM ---
{}
"#,
        VERDICT_FORMAT, rules_document, diagram
    )
}

pub fn correction_prompt(rules_document: &str, diagram: &str, verdict: &AuditVerdict) -> String {
    let failing = verdict
        .rules()
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let line = if r.line_ref.is_empty() {
                String::new()
            } else {
                format!(" (line {})", r.line_ref)
            };
            format!("{}. {}{}: {}", i + 1, r.rule_id, line, r.message)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Correct the following PlantUML diagram so that it complies with the LUCIM rules.

The last audit reported these violations:
{}

Fix every listed violation without introducing new ones and keep everything
else unchanged. Return the complete corrected diagram, from @startuml to
@enduml, inside [START_CORRECTED_DIAGRAM] and [END_CORRECTED_DIAGRAM] markers.

--- COMPLIANCE RULES ---
{}

--- PREVIOUS DIAGRAM ---
{}
"#,
        failing, rules_document, diagram
    )
}
