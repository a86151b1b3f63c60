use anyhow::{Context, Result};
use base64::Engine;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::PipelineError;

const CASE_SUFFIX: &str = "-netlogo-code.md";
const INTERFACE_IMAGE_COUNT: usize = 2;
const RULES_PREFIX: &str = "RULES_";

/// One NetLogo case: code plus up to two base64-encoded interface screenshots.
#[derive(Debug, Clone)]
pub struct CaseInputs {
    pub case: String,
    pub netlogo_code: String,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaFile {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct PersonaSet {
    pub name: String,
    /// Sorted by file name
    pub files: Vec<PersonaFile>,
}

impl PersonaSet {
    /// The compliance rule document used by audits and corrections: every
    /// `RULES_*` file, or all persona files when the set has none.
    pub fn rules_document(&self) -> String {
        let rule_files: Vec<&PersonaFile> = self
            .files
            .iter()
            .filter(|f| f.name.starts_with(RULES_PREFIX))
            .collect();
        let chosen: Vec<&PersonaFile> = if rule_files.is_empty() {
            self.files.iter().collect()
        } else {
            rule_files
        };
        chosen
            .iter()
            .map(|f| format!("--- {} ---\n{}", f.name.to_uppercase(), f.content.trim_end()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Case names, sorted, from `<case>-netlogo-code.md` files.
pub fn list_cases(netlogo_dir: &Path) -> Result<Vec<String>> {
    let pattern = netlogo_dir.join(format!("*{}", CASE_SUFFIX));
    let pattern = pattern.to_string_lossy();

    let mut cases: Vec<String> = glob::glob(&pattern)
        .with_context(|| format!("Invalid case pattern: {}", pattern))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .filter_map(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(CASE_SUFFIX))
                .map(|n| n.to_string())
        })
        .collect();
    cases.sort();
    Ok(cases)
}

pub fn load_case(netlogo_dir: &Path, case: &str) -> Result<CaseInputs> {
    let code_path = netlogo_dir.join(format!("{}{}", case, CASE_SUFFIX));
    let netlogo_code = fs::read_to_string(&code_path)
        .with_context(|| format!("Failed to read NetLogo case {}", code_path.display()))?;
    info!("Loaded NetLogo case: {}", case);

    Ok(CaseInputs {
        case: case.to_string(),
        netlogo_code,
        images: load_interface_images(netlogo_dir, case),
    })
}

/// `<case>-netlogo-interface-1.png` and `-2.png`, base64-encoded. Missing
/// images are skipped; unreadable ones are skipped with a warning.
pub fn load_interface_images(netlogo_dir: &Path, case: &str) -> Vec<String> {
    let mut images = Vec::new();
    for i in 1..=INTERFACE_IMAGE_COUNT {
        let file_name = format!("{}-netlogo-interface-{}.png", case, i);
        let path = netlogo_dir.join(&file_name);
        if !path.exists() {
            debug!("Interface image not found, skipping: {}", file_name);
            continue;
        }
        match fs::read(&path) {
            Ok(bytes) => {
                images.push(base64::engine::general_purpose::STANDARD.encode(bytes));
                info!("Loaded and encoded image: {}", file_name);
            }
            Err(e) => warn!("Could not read image {}: {}", file_name, e),
        }
    }
    images
}

/// Sub-directories of the persona dir, sorted, hidden ones skipped.
pub fn list_persona_sets(persona_dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(persona_dir)
        .with_context(|| format!("Failed to read persona dir {}", persona_dir.display()))?;

    let mut sets: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
        .filter(|name| !name.starts_with('.'))
        .collect();
    sets.sort();
    Ok(sets)
}

pub fn load_persona_set(persona_dir: &Path, name: &str) -> Result<PersonaSet> {
    let set_dir = persona_dir.join(name);
    let entries = fs::read_dir(&set_dir)
        .with_context(|| format!("Persona set not found: {}", set_dir.display()))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
        .collect();
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read persona file {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        debug!("Loaded persona file: {}", file_name);
        files.push(PersonaFile {
            name: file_name,
            content,
        });
    }

    if files.is_empty() {
        warn!("Persona set {} contains no .md files", name);
    }

    Ok(PersonaSet {
        name: name.to_string(),
        files,
    })
}

/// Read the mandatory task instructions. Missing or blank is fatal.
pub fn load_task_instructions(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => {
            info!("Loaded task instructions from {}", path.display());
            Ok(content)
        }
        _ => Err(PipelineError::MissingTaskFile(path.to_path_buf()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_list_cases_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("predator-prey-netlogo-code.md"), "to go end").unwrap();
        fs::write(dir.path().join("3d-solids-netlogo-code.md"), "to setup end").unwrap();
        fs::write(dir.path().join("3d-solids-netlogo-interface-1.png"), [0u8; 4]).unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let cases = list_cases(dir.path()).unwrap();
        assert_eq!(cases, vec!["3d-solids", "predator-prey"]);
    }

    #[test]
    fn test_list_cases_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(list_cases(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_load_case_with_images() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("3d-solids-netlogo-code.md"), "to setup end").unwrap();
        fs::write(dir.path().join("3d-solids-netlogo-interface-1.png"), b"png").unwrap();

        let inputs = load_case(dir.path(), "3d-solids").unwrap();
        assert_eq!(inputs.netlogo_code, "to setup end");
        assert_eq!(inputs.images, vec!["cG5n".to_string()]);
    }

    #[test]
    fn test_load_case_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = load_case(dir.path(), "nope").unwrap_err();
        assert!(err.to_string().contains("Failed to read NetLogo case"));
    }

    #[test]
    fn test_persona_sets_skip_hidden_and_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("persona-v1")).unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::create_dir(dir.path().join("persona-v3-limited-agents")).unwrap();
        fs::write(dir.path().join("README.md"), "x").unwrap();

        let sets = list_persona_sets(dir.path()).unwrap();
        assert_eq!(sets, vec!["persona-v1", "persona-v3-limited-agents"]);
    }

    #[test]
    fn test_load_persona_set_sorted_md_only() {
        let dir = TempDir::new().unwrap();
        let set = dir.path().join("persona-v1");
        fs::create_dir(&set).unwrap();
        fs::write(set.join("PSN_2_Auditor.md"), "audit").unwrap();
        fs::write(set.join("DSL_Target_LUCIM.md"), "dsl").unwrap();
        fs::write(set.join("notes.txt"), "skip").unwrap();

        let persona = load_persona_set(dir.path(), "persona-v1").unwrap();
        let names: Vec<&str> = persona.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["DSL_Target_LUCIM.md", "PSN_2_Auditor.md"]);
    }

    #[test]
    fn test_rules_document_prefers_rules_files() {
        let persona = PersonaSet {
            name: "p".into(),
            files: vec![
                PersonaFile {
                    name: "PSN_Generator.md".into(),
                    content: "generate".into(),
                },
                PersonaFile {
                    name: "RULES_LUCIM.md".into(),
                    content: "GCS2_SYS_COLOR: System is #E8C28A".into(),
                },
            ],
        };
        let doc = persona.rules_document();
        assert!(doc.contains("--- RULES_LUCIM.MD ---"));
        assert!(!doc.contains("generate"));
    }

    #[test]
    fn test_rules_document_falls_back_to_all_files() {
        let persona = PersonaSet {
            name: "p".into(),
            files: vec![PersonaFile {
                name: "DSL.md".into(),
                content: "rules here".into(),
            }],
        };
        assert!(persona.rules_document().contains("rules here"));
    }

    #[test]
    fn test_task_file_missing_or_blank_is_fatal() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("single-agent-task");
        let err = load_task_instructions(&missing).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingTaskFile(_))
        ));

        fs::write(&missing, "   \n").unwrap();
        assert!(load_task_instructions(&missing).is_err());

        fs::write(&missing, "Convert the model.").unwrap();
        assert_eq!(load_task_instructions(&missing).unwrap(), "Convert the model.");
    }
}
