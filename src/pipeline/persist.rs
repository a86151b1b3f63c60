use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

use super::audit_loop::SnapshotSink;
use super::record::{Artifact, LoopState, RunRecord, RunStatus, Stage};
use crate::llm::client::Completion;
use crate::util::path_component;

pub const RECORD_FILE: &str = "output-data.json";
pub const RESPONSE_FILE: &str = "output-response.json";
pub const REASONING_FILE: &str = "output-reasoning.md";
pub const INSTRUCTIONS_FILE: &str = "input-instructions.md";
pub const SUMMARY_FILE: &str = "overall_summary.md";
pub const DIAGRAM_FILE: &str = "diagram.puml";
pub const CORRECTED_DIAGRAM_FILE: &str = "corrected_diagram.puml";
pub const AUDIT_REPORT_FILE: &str = "audit_report.json";
pub const SNAPSHOT_DIR: &str = "snapshots";

const MAX_DIR_SUFFIX: usize = 100;

/// `<root>/<YYYY-MM-DD>/<HHMM>-<persona-set>/<case>-<model>`
pub fn run_dir(
    output_root: &Path,
    started_at: DateTime<Local>,
    persona_set: &str,
    case: &str,
    model: &str,
) -> PathBuf {
    output_root
        .join(started_at.format("%Y-%m-%d").to_string())
        .join(format!(
            "{}-{}",
            started_at.format("%H%M"),
            path_component(persona_set)
        ))
        .join(format!("{}-{}", path_component(case), path_component(model)))
}

/// Where a persisted run ended up.
#[derive(Debug, Clone)]
pub struct PersistedRun {
    pub dir: PathBuf,
    pub status: Option<RunStatus>,
    pub files: Vec<PathBuf>,
}

/// Create `dir`, or `dir-2`, `dir-3`, ... when another run already owns it.
fn claim_dir(dir: &Path) -> Result<PathBuf> {
    if let Some(parent) = dir.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
    }
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    for n in 1..=MAX_DIR_SUFFIX {
        let candidate = if n == 1 {
            dir.to_path_buf()
        } else {
            dir.with_file_name(format!("{}-{}", name, n))
        };
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Output directory taken: {}", candidate.display());
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to create output directory {}", candidate.display())
                })
            }
        }
    }
    bail!(
        "No free output directory for {} after {} attempts",
        dir.display(),
        MAX_DIR_SUFFIX
    )
}

/// Owns one run's output directory. Created at run start so snapshots can be
/// written while the loop runs. The directory is always fresh: an existing
/// one belongs to an earlier run and gets a numeric suffix instead.
pub struct RunPersister {
    dir: PathBuf,
    snapshots: AtomicUsize,
}

impl RunPersister {
    pub fn create(dir: PathBuf) -> Result<Self> {
        let dir = claim_dir(&dir)?;
        fs::create_dir(dir.join(SNAPSHOT_DIR))
            .with_context(|| format!("Failed to create snapshot directory in {}", dir.display()))?;
        info!("Created output directory: {}", dir.display());
        Ok(Self {
            dir,
            snapshots: AtomicUsize::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.dir.join(name);
        fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Wrote {}", path.display());
        Ok(path)
    }

    /// Written before the model call so a failed call still leaves the prompt.
    pub fn write_instructions(&self, prompt: &str) -> Result<PathBuf> {
        self.write(INSTRUCTIONS_FILE, prompt)
    }

    pub fn write_response(&self, completion: &Completion) -> Result<()> {
        let body = serde_json::to_string_pretty(&completion.raw)
            .context("Failed to serialize model response")?;
        self.write(RESPONSE_FILE, &body)?;

        let reasoning = match &completion.reasoning {
            Some(text) if !text.trim().is_empty() => format!("# Reasoning summary\n\n{}\n", text.trim()),
            _ => "# Reasoning summary\n\nNo reasoning summary was returned.\n".to_string(),
        };
        self.write(REASONING_FILE, &reasoning)?;
        Ok(())
    }

    pub fn write_summary(&self, summary: &str) -> Result<PathBuf> {
        self.write(SUMMARY_FILE, summary)
    }

    /// Write the final artifacts and the run record. Takes the record by
    /// value: a persisted run is not modified further.
    pub fn persist(&self, record: RunRecord) -> Result<PersistedRun> {
        let mut files = Vec::new();

        if let Some(initial) = record.latest_diagram(Stage::Initial) {
            files.push(self.write(DIAGRAM_FILE, &initial.content)?);
        }
        if let Some(corrected) = record.latest_diagram(Stage::Corrected) {
            files.push(self.write(CORRECTED_DIAGRAM_FILE, &corrected.content)?);
        }
        if let Some(verdict) = &record.final_verdict {
            files.push(self.write(AUDIT_REPORT_FILE, &verdict.to_json_pretty())?);
        }

        let json = serde_json::to_string_pretty(&record).context("Failed to serialize run record")?;
        files.push(self.write(RECORD_FILE, &json)?);

        info!(
            "Persisted run {} ({} artifacts) to {}",
            record.run_id,
            record.artifacts().len(),
            self.dir.display()
        );

        Ok(PersistedRun {
            dir: self.dir.clone(),
            status: record.status,
            files,
        })
    }
}

impl SnapshotSink for RunPersister {
    fn snapshot(&self, state: LoopState, artifact: &Artifact) -> Result<()> {
        let n = self.snapshots.fetch_add(1, Ordering::SeqCst) + 1;
        let name = format!(
            "{:02}-{}.{}",
            n,
            artifact.file_stem(),
            artifact.kind.extension()
        );
        let path = self.dir.join(SNAPSHOT_DIR).join(&name);
        fs::write(&path, &artifact.content)
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        debug!("Snapshot {} ({:?})", name, state);
        Ok(())
    }
}

pub fn load_run_record(dir: &Path) -> Result<RunRecord> {
    let path = dir.join(RECORD_FILE);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read run record {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse run record {}", path.display()))
}
