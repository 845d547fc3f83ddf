//! The task registry (`TASKS.json`): the serialized aggregation of every phase
//! and task extracted from a specification, plus progress metadata and a
//! resumption checkpoint.
//!
//! Struct field order is the on-disk field order. Downstream tools diff this
//! file, so serialization of an unmodified registry is byte-for-byte stable.

use crate::error::{Result, SamError};
use crate::extract::{Extraction, Phase, Task};
use crate::io;
use crate::paths;
use crate::project::ProjectType;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

pub const SPEC_VERSION: &str = "2.0";

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn from_completed(completed: bool) -> Self {
        if completed {
            TaskStatus::Completed
        } else {
            TaskStatus::Pending
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(format!("invalid task status '{other}': expected pending or completed")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Completed => "completed",
        })
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default = "default_spec_file")]
    pub spec_file: String,
    /// First source line of the task (1-based).
    #[serde(default)]
    pub section_start: usize,
    /// Last source line of the task (1-based, inclusive).
    #[serde(default)]
    pub section_end: usize,
    #[serde(default)]
    pub phase_id: String,
    #[serde(default)]
    pub parent_task_id: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub story_mapping: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub completion_note: Option<String>,
}

fn default_spec_file() -> String {
    paths::TECHNICAL_SPEC.to_string()
}

impl TaskRecord {
    fn from_extracted(task: &Task, phase_id: &str, spec_file: &str) -> Self {
        Self {
            task_id: task.task_id.clone(),
            title: task.title.clone(),
            status: TaskStatus::from_completed(task.completed),
            spec_file: spec_file.to_string(),
            section_start: task.line_start + 1,
            section_end: task.line_end + 1,
            phase_id: phase_id.to_string(),
            parent_task_id: task.parent_task_id.clone(),
            dependencies: task.dependencies.clone(),
            story_mapping: task.story_mapping.clone(),
            acceptance_criteria: task.acceptance_criteria.clone(),
            completion_note: task.completion_note.clone(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase_id: String,
    pub phase_name: String,
    #[serde(default)]
    pub status: PhaseStatus,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
}

impl PhaseRecord {
    fn from_extracted(phase: &Phase, spec_file: &str) -> Self {
        Self {
            phase_id: phase.phase_id.clone(),
            phase_name: phase.phase_name.clone(),
            status: PhaseStatus::Pending,
            tasks: phase
                .tasks
                .iter()
                .map(|t| TaskRecord::from_extracted(t, &phase.phase_id, spec_file))
                .collect(),
        }
    }

    pub fn completed_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_completed()).count()
    }

    pub fn pending_tasks(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.iter().filter(|t| !t.is_completed())
    }

    fn derive_status(&self) -> PhaseStatus {
        let done = self.completed_count();
        if self.tasks.is_empty() || done == 0 {
            PhaseStatus::Pending
        } else if done == self.tasks.len() {
            PhaseStatus::Completed
        } else {
            PhaseStatus::InProgress
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryMetadata {
    pub feature_id: String,
    pub feature_name: String,
    #[serde(default = "default_spec_version")]
    pub spec_version: String,
    #[serde(default, deserialize_with = "count_from_number_or_string")]
    pub total_tasks: usize,
    #[serde(default, deserialize_with = "count_from_number_or_string")]
    pub completed_tasks: usize,
    #[serde(default = "default_current_phase")]
    pub current_phase: String,
    #[serde(default)]
    pub project_type: ProjectType,
    #[serde(default)]
    pub phase_structure: Vec<String>,
}

fn default_spec_version() -> String {
    SPEC_VERSION.to_string()
}

fn default_current_phase() -> String {
    "1".to_string()
}

/// Older registries wrote counts as strings (`"total_tasks": "12"`).
fn count_from_number_or_string<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(usize),
        Text(String),
    }

    match Count::deserialize(deserializer)? {
        Count::Number(n) => Ok(n),
        Count::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default)]
    pub last_completed_task: Option<String>,
    #[serde(default)]
    pub last_checkpoint_time: Option<String>,
    #[serde(default)]
    pub iteration_count: u32,
    #[serde(default = "default_current_phase")]
    pub current_phase: String,
    #[serde(default)]
    pub active_tasks: Vec<String>,
    #[serde(default)]
    pub quality_gate_last_passed: Option<String>,
    #[serde(default)]
    pub last_quality_gate_result: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Build inputs / summaries
// ---------------------------------------------------------------------------

/// Feature-level facts the extractor cannot see.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryInfo {
    pub feature_id: String,
    pub feature_name: String,
    pub project_type: ProjectType,
    pub spec_file: String,
}

impl RegistryInfo {
    pub fn new(feature_id: impl Into<String>, feature_name: impl Into<String>) -> Self {
        Self {
            feature_id: feature_id.into(),
            feature_name: feature_name.into(),
            project_type: ProjectType::default(),
            spec_file: paths::TECHNICAL_SPEC.to_string(),
        }
    }

    /// Gather feature facts from a feature directory and its spec text.
    pub fn from_feature_dir(feature_dir: &Path, spec_text: &str) -> Result<Self> {
        let feature_id = paths::feature_id(feature_dir);
        let feature_name = feature_name(spec_text, &feature_id);
        Ok(Self {
            project_type: ProjectType::declared(feature_dir)?,
            ..Self::new(feature_id, feature_name)
        })
    }
}

static TITLE_RE: OnceLock<Regex> = OnceLock::new();

fn title_re() -> &'static Regex {
    TITLE_RE.get_or_init(|| Regex::new(r"(?m)^#\s+Technical Specification:\s*(.+?)\s*$").unwrap())
}

/// Feature name from `# Technical Specification: <name>`, else the title-cased id.
pub fn feature_name(spec_text: &str, feature_id: &str) -> String {
    if let Some(caps) = title_re().captures(spec_text) {
        return caps[1].to_string();
    }
    feature_id
        .split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub percent_complete: f64,
    pub current_phase: String,
    pub last_completed_task: Option<String>,
    pub iteration_count: u32,
    pub project_type: ProjectType,
}

// ---------------------------------------------------------------------------
// TaskRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRegistry {
    pub metadata: RegistryMetadata,
    #[serde(default)]
    pub phases: Vec<PhaseRecord>,
    #[serde(default)]
    pub checkpoint: Checkpoint,
}

impl TaskRegistry {
    /// Assemble a registry from extracted phases.
    ///
    /// Fails with `DuplicateTaskId` when two tasks anywhere in the document
    /// share an id.
    pub fn build(extraction: &Extraction, info: RegistryInfo) -> Result<Self> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for task in extraction.tasks() {
            if let Some(first) = seen.insert(&task.task_id, task.line_start) {
                return Err(SamError::DuplicateTaskId {
                    task_id: task.task_id.clone(),
                    first_line: first + 1,
                    line: task.line_start + 1,
                });
            }
        }

        let phases: Vec<PhaseRecord> = extraction
            .phases()
            .iter()
            .map(|p| PhaseRecord::from_extracted(p, &info.spec_file))
            .collect();

        let mut registry = Self {
            metadata: RegistryMetadata {
                feature_id: info.feature_id,
                feature_name: info.feature_name,
                spec_version: SPEC_VERSION.to_string(),
                total_tasks: 0,
                completed_tasks: 0,
                current_phase: default_current_phase(),
                project_type: info.project_type,
                phase_structure: info.project_type.phase_structure(),
            },
            phases,
            checkpoint: Checkpoint {
                current_phase: default_current_phase(),
                ..Checkpoint::default()
            },
        };
        registry.refresh();
        registry.checkpoint.last_completed_task = registry.last_completed_task();

        tracing::debug!(
            feature = %registry.metadata.feature_id,
            phases = registry.phases.len(),
            tasks = registry.metadata.total_tasks,
            "registry built"
        );
        Ok(registry)
    }

    /// Recompute totals, phase statuses and the current phase.
    fn refresh(&mut self) {
        for phase in &mut self.phases {
            phase.status = phase.derive_status();
        }
        self.metadata.total_tasks = self.phases.iter().map(|p| p.tasks.len()).sum();
        self.metadata.completed_tasks = self.phases.iter().map(|p| p.completed_count()).sum();

        let current = self.derive_current_phase();
        self.metadata.current_phase = current.clone();
        self.checkpoint.current_phase = current;
    }

    /// First phase with an incomplete task, else the last phase, else `"1"`.
    fn derive_current_phase(&self) -> String {
        self.phases
            .iter()
            .find(|p| p.tasks.iter().any(|t| !t.is_completed()))
            .or_else(|| self.phases.last())
            .map(|p| p.phase_id.clone())
            .unwrap_or_else(default_current_phase)
    }

    fn last_completed_task(&self) -> Option<String> {
        self.phases
            .iter()
            .rev()
            .flat_map(|p| p.tasks.iter().rev())
            .find(|t| t.is_completed())
            .map(|t| t.task_id.clone())
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    /// Parse a registry. Stored counts, phase statuses and the current phase
    /// are re-derived from the tasks, so a hand-edited file cannot disagree
    /// with its own contents.
    pub fn from_json(data: &str) -> Result<Self> {
        let mut registry: Self = serde_json::from_str(data)?;
        registry.refresh();
        Ok(registry)
    }

    pub fn load(feature_dir: &Path) -> Result<Self> {
        let data = io::read_text(&paths::tasks_path(feature_dir))?;
        Self::from_json(&data)
    }

    pub fn save(&self, feature_dir: &Path) -> Result<()> {
        let data = self.to_json()?;
        io::atomic_write(&paths::tasks_path(feature_dir), data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn tasks(&self) -> impl Iterator<Item = &TaskRecord> {
        self.phases.iter().flat_map(|p| p.tasks.iter())
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks().find(|t| t.task_id == task_id)
    }

    pub fn phase(&self, phase_id: &str) -> Option<&PhaseRecord> {
        self.phases.iter().find(|p| p.phase_id == phase_id)
    }

    /// Pending tasks, optionally restricted to one phase.
    pub fn pending_tasks(&self, phase_id: Option<&str>) -> Vec<&TaskRecord> {
        match phase_id {
            Some(id) => self
                .phase(id)
                .map(|p| p.pending_tasks().collect())
                .unwrap_or_default(),
            None => self.phases.iter().flat_map(|p| p.pending_tasks()).collect(),
        }
    }

    /// The checkpoint's phase, falling back to the first phase not completed.
    pub fn current_phase(&self) -> Option<&PhaseRecord> {
        self.phase(&self.checkpoint.current_phase)
            .or_else(|| self.phases.iter().find(|p| p.status != PhaseStatus::Completed))
    }

    pub fn progress(&self) -> Progress {
        let total = self.metadata.total_tasks;
        let completed = self.metadata.completed_tasks;
        Progress {
            total_tasks: total,
            completed_tasks: completed,
            percent_complete: if total == 0 {
                0.0
            } else {
                completed as f64 / total as f64 * 100.0
            },
            current_phase: self.metadata.current_phase.clone(),
            last_completed_task: self.checkpoint.last_completed_task.clone(),
            iteration_count: self.checkpoint.iteration_count,
            project_type: self.metadata.project_type,
        }
    }

    /// Pending tasks of a phase whose dependencies are all completed, up to
    /// `limit`. Dependencies naming unknown tasks do not block.
    pub fn ready_tasks(&self, phase_id: &str, limit: usize) -> Vec<&TaskRecord> {
        let blocked = |t: &TaskRecord| {
            t.dependencies
                .iter()
                .any(|dep| self.task(dep).is_some_and(|d| !d.is_completed()))
        };
        self.pending_tasks(Some(phase_id))
            .into_iter()
            .filter(|t| !blocked(t))
            .take(limit)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    pub fn set_task_status(&mut self, task_id: &str, status: TaskStatus) -> Result<()> {
        let task = self
            .phases
            .iter_mut()
            .flat_map(|p| p.tasks.iter_mut())
            .find(|t| t.task_id == task_id)
            .ok_or_else(|| SamError::TaskNotFound(task_id.to_string()))?;
        task.status = status;
        self.refresh();
        Ok(())
    }

    /// Bump the iteration count and, when a task is named, record it as the
    /// last completed task at `now`.
    pub fn record_checkpoint(&mut self, task_id: Option<&str>, now: DateTime<Utc>) -> Result<()> {
        if let Some(id) = task_id {
            if self.task(id).is_none() {
                return Err(SamError::TaskNotFound(id.to_string()));
            }
            self.checkpoint.last_completed_task = Some(id.to_string());
            self.checkpoint.last_checkpoint_time = Some(now.to_rfc3339());
        }
        self.checkpoint.iteration_count += 1;
        Ok(())
    }

    pub fn record_quality_gate(&mut self, results: BTreeMap<String, String>, now: DateTime<Utc>) {
        if results.is_empty() {
            return;
        }
        self.checkpoint.quality_gate_last_passed = Some(now.to_rfc3339());
        self.checkpoint.last_quality_gate_result = results;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
