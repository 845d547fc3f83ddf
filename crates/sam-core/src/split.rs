//! Splitting a monolithic specification into a main document, one file per
//! phase, a phase summary, and the task registry.
//!
//! `plan` is pure. `migrate` guards, then either returns the plan as a preview
//! or writes it, so a dry run and a real run always agree on what happens.

use crate::error::{Result, SamError};
use crate::extract::{extract, Phase, TASK_REGION_TITLE};
use crate::io;
use crate::paths;
use crate::registry::{RegistryInfo, TaskRegistry};
use serde::Serialize;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseFile {
    pub phase_id: String,
    pub phase_name: String,
    pub file_name: String,
    pub task_count: usize,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitPlan {
    /// The main document with the task region replaced by a pointer section.
    pub main: String,
    pub phase_files: Vec<PhaseFile>,
    /// Body of `IMPLEMENTATION_TASKS/IMPLEMENTATION_TASKS.md`.
    pub summary: String,
    pub registry: TaskRegistry,
}

/// `PHASE_<id>_<NAME>.md` with the name upper-cased, spaces as underscores,
/// and anything that is not alphanumeric, `_`, `-` or `.` dropped.
pub fn phase_file_name(phase_id: &str, phase_name: &str) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
            .collect()
    };
    format!(
        "PHASE_{}_{}.md",
        clean(phase_id),
        clean(&phase_name.to_uppercase())
    )
}

/// A phase file is a regenerated level-1 title followed by the phase's
/// source text unchanged, its own `## Phase` heading included.
fn phase_file(phase: &Phase) -> PhaseFile {
    PhaseFile {
        phase_id: phase.phase_id.clone(),
        phase_name: phase.phase_name.clone(),
        file_name: phase_file_name(&phase.phase_id, &phase.phase_name),
        task_count: phase.tasks.len(),
        content: format!(
            "# Phase {}: {}\n\n{}",
            phase.phase_id, phase.phase_name, phase.content
        ),
    }
}

fn summary(feature_id: &str, files: &[PhaseFile]) -> String {
    let mut out = format!(
        "# {TASK_REGION_TITLE}\n\n**Feature**: {feature_id}\n**Total Phases**: {}\n\n## Phase Overview\n\n",
        files.len()
    );
    for f in files {
        out.push_str(&format!(
            "- [Phase {}: {}]({})\n",
            f.phase_id, f.phase_name, f.file_name
        ));
    }
    out
}

fn pointer_section(files: &[PhaseFile]) -> String {
    let dir = paths::IMPLEMENTATION_TASKS_DIR;
    let mut out = format!(
        "\n---\n\n# {TASK_REGION_TITLE}\n\n\
         Detailed implementation tasks have been moved to modular files:\n\n\
         See: [{dir}/]({dir}/)\n\n"
    );
    for f in files {
        out.push_str(&format!(
            "- [Phase {}: {}]({dir}/{})\n",
            f.phase_id, f.phase_name, f.file_name
        ));
    }
    out
}

/// Compute every artifact a split would produce, without touching disk.
///
/// Extraction and registry errors propagate; no partial plan is returned.
pub fn plan(text: &str, info: RegistryInfo) -> Result<SplitPlan> {
    let extraction = extract(text)?;
    let feature_id = info.feature_id.clone();
    let registry = TaskRegistry::build(&extraction, info)?;

    let phase_files: Vec<PhaseFile> = extraction.phases().iter().map(phase_file).collect();

    let mut main = extraction.main.clone();
    main.push_str(&pointer_section(&phase_files));

    tracing::debug!(
        feature = %feature_id,
        phases = phase_files.len(),
        "split planned"
    );

    Ok(SplitPlan {
        main,
        summary: summary(&feature_id, &phase_files),
        phase_files,
        registry,
    })
}

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SplitOptions {
    pub dry_run: bool,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSummary {
    pub phase_id: String,
    pub phase_name: String,
    pub file_name: String,
    pub task_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub feature_id: String,
    pub dry_run: bool,
    pub phase_count: usize,
    pub phases: Vec<PhaseSummary>,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    /// Files written (or that would be written) in write order.
    pub files: Vec<PathBuf>,
    pub backup: Option<PathBuf>,
}

/// Refuse when a previous split left a registry or phase directory behind.
fn guard(feature_dir: &Path, force: bool) -> Result<()> {
    if force {
        return Ok(());
    }
    for existing in [
        paths::tasks_path(feature_dir),
        paths::implementation_tasks_dir(feature_dir),
    ] {
        if existing.exists() {
            return Err(SamError::AlreadyExists(existing));
        }
    }
    Ok(())
}

/// Split `<feature_dir>/TECHNICAL_SPEC.md`.
///
/// The existing-output guard runs in dry-run mode too, so a preview reports
/// exactly what a real run would do. Writes happen in the order registry,
/// phase files, summary, backup, main document.
pub fn migrate(feature_dir: &Path, opts: SplitOptions) -> Result<MigrationReport> {
    let spec = paths::spec_path(feature_dir);
    let text = io::read_text(&spec)?;
    guard(feature_dir, opts.force)?;

    let info = RegistryInfo::from_feature_dir(feature_dir, &text)?;
    let plan = plan(&text, info)?;

    let impl_dir = paths::implementation_tasks_dir(feature_dir);

    let mut files = vec![paths::tasks_path(feature_dir)];
    files.extend(plan.phase_files.iter().map(|f| impl_dir.join(&f.file_name)));
    files.push(impl_dir.join(paths::IMPLEMENTATION_TASKS_SUMMARY));
    files.push(spec.clone());

    let backup = if opts.dry_run {
        tracing::debug!(feature_dir = %feature_dir.display(), "dry run, nothing written");
        None
    } else {
        if plan.phase_files.is_empty() {
            tracing::warn!(
                spec = %spec.display(),
                "no phases found; the main document will only gain a pointer section"
            );
        }
        plan.registry.save(feature_dir)?;
        io::ensure_dir(&impl_dir)?;
        for f in &plan.phase_files {
            io::atomic_write(&impl_dir.join(&f.file_name), f.content.as_bytes())?;
        }
        io::atomic_write(
            &impl_dir.join(paths::IMPLEMENTATION_TASKS_SUMMARY),
            plan.summary.as_bytes(),
        )?;
        let backup = io::backup_file(&spec, paths::BACKUP_SUFFIX)?;
        io::atomic_write(&spec, plan.main.as_bytes())?;
        Some(backup)
    };

    Ok(MigrationReport {
        feature_id: plan.registry.metadata.feature_id.clone(),
        dry_run: opts.dry_run,
        phase_count: plan.phase_files.len(),
        phases: plan
            .phase_files
            .iter()
            .map(|f| PhaseSummary {
                phase_id: f.phase_id.clone(),
                phase_name: f.phase_name.clone(),
                file_name: f.file_name.clone(),
                task_count: f.task_count,
            })
            .collect(),
        total_tasks: plan.registry.metadata.total_tasks,
        completed_tasks: plan.registry.metadata.completed_tasks,
        files,
        backup,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
