use crate::output::{print_json, print_table, ratio};
use anyhow::{bail, Context};
use clap::Subcommand;
use sam_core::registry::{TaskRecord, TaskRegistry, TaskStatus};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Subcommand)]
pub enum TaskSubcommand {
    /// Show registry progress and phases
    Show { feature: String },
    /// Show full details for a single task
    Get { feature: String, task_id: String },
    /// Set a task's status (pending or completed)
    Update {
        feature: String,
        task_id: String,
        #[arg(long)]
        status: TaskStatus,
    },
    /// Record a checkpoint and bump the iteration count
    Checkpoint {
        feature: String,
        /// Task completed in this iteration
        #[arg(long)]
        task: Option<String>,
        /// Quality gate result as name=result (repeatable)
        #[arg(long = "gate", value_name = "NAME=RESULT")]
        gates: Vec<String>,
    },
    /// Show where to pick up work
    Resume {
        feature: String,
        /// List tasks that can run side by side in the current phase
        #[arg(long)]
        parallel: bool,
        /// Maximum tasks listed with --parallel
        #[arg(long, env = "SAM_MAX_PARALLEL_SUBAGENTS", default_value_t = 3)]
        max_parallel: usize,
    },
}

pub fn run(root: &Path, subcmd: TaskSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        TaskSubcommand::Show { feature } => show(root, &feature, json),
        TaskSubcommand::Get { feature, task_id } => get(root, &feature, &task_id, json),
        TaskSubcommand::Update {
            feature,
            task_id,
            status,
        } => update(root, &feature, &task_id, status, json),
        TaskSubcommand::Checkpoint {
            feature,
            task,
            gates,
        } => checkpoint(root, &feature, task.as_deref(), &gates, json),
        TaskSubcommand::Resume {
            feature,
            parallel,
            max_parallel,
        } => resume(root, &feature, parallel, max_parallel, json),
    }
}

fn load(root: &Path, feature: &str) -> anyhow::Result<(std::path::PathBuf, TaskRegistry)> {
    let dir = super::feature_dir(root, feature)?;
    let registry = TaskRegistry::load(&dir)
        .with_context(|| format!("no task registry for '{feature}' (run `sam parse {feature}`)"))?;
    Ok((dir, registry))
}

fn show(root: &Path, feature: &str, json: bool) -> anyhow::Result<()> {
    let (_, registry) = load(root, feature)?;

    if json {
        return print_json(&serde_json::json!({
            "metadata": registry.metadata,
            "progress": registry.progress(),
            "checkpoint": registry.checkpoint,
        }));
    }

    let meta = &registry.metadata;
    let progress = registry.progress();
    println!("Feature:       {} ({})", meta.feature_name, meta.feature_id);
    println!("Project type:  {}", meta.project_type);
    println!(
        "Progress:      {}",
        ratio(progress.completed_tasks, progress.total_tasks)
    );
    println!("Current phase: {}", progress.current_phase);
    println!("Iterations:    {}", progress.iteration_count);
    if let Some(last) = &registry.checkpoint.last_completed_task {
        println!("Last completed: {last}");
    }
    if let Some(at) = &registry.checkpoint.last_checkpoint_time {
        println!("Last checkpoint: {at}");
    }

    if registry.phases.is_empty() {
        println!("\nNo phases.");
        return Ok(());
    }
    println!();
    let rows = registry
        .phases
        .iter()
        .map(|p| {
            vec![
                p.phase_id.clone(),
                p.phase_name.clone(),
                p.status.to_string(),
                ratio(p.completed_count(), p.tasks.len()),
            ]
        })
        .collect();
    print_table(&["PHASE", "NAME", "STATUS", "TASKS"], rows);
    Ok(())
}

fn get(root: &Path, feature: &str, task_id: &str, json: bool) -> anyhow::Result<()> {
    let (_, registry) = load(root, feature)?;
    let task = registry
        .task(task_id)
        .with_context(|| format!("task '{task_id}' not found in '{feature}'"))?;

    if json {
        return print_json(task);
    }

    println!("[{}] {}", task.task_id, task.title);
    println!("Status:   {}", task.status);
    println!("Phase:    {}", task.phase_id);
    println!(
        "Source:   {}:{}-{}",
        task.spec_file, task.section_start, task.section_end
    );
    if let Some(parent) = &task.parent_task_id {
        println!("Parent:   {parent}");
    }
    if let Some(story) = &task.story_mapping {
        println!("Story:    {story}");
    }
    if !task.dependencies.is_empty() {
        println!("Depends:  {}", task.dependencies.join(", "));
    }
    if let Some(note) = &task.completion_note {
        println!("Completed: {note}");
    }
    if !task.acceptance_criteria.is_empty() {
        println!("\nAcceptance criteria:");
        for c in &task.acceptance_criteria {
            println!("  - {c}");
        }
    }
    Ok(())
}

fn update(
    root: &Path,
    feature: &str,
    task_id: &str,
    status: TaskStatus,
    json: bool,
) -> anyhow::Result<()> {
    let (dir, mut registry) = load(root, feature)?;
    registry.set_task_status(task_id, status)?;
    registry.save(&dir).context("failed to save TASKS.json")?;

    if json {
        print_json(&serde_json::json!({
            "task_id": task_id,
            "status": status,
            "progress": registry.progress(),
        }))?;
    } else {
        println!("Updated task [{task_id}] to {status}");
    }
    Ok(())
}

fn parse_gates(gates: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for gate in gates {
        let Some((name, result)) = gate.split_once('=') else {
            bail!("invalid --gate '{gate}': expected NAME=RESULT");
        };
        out.insert(name.trim().to_string(), result.trim().to_string());
    }
    Ok(out)
}

fn checkpoint(
    root: &Path,
    feature: &str,
    task: Option<&str>,
    gates: &[String],
    json: bool,
) -> anyhow::Result<()> {
    let gates = parse_gates(gates)?;
    let (dir, mut registry) = load(root, feature)?;
    let now = chrono::Utc::now();
    registry.record_checkpoint(task, now)?;
    registry.record_quality_gate(gates, now);
    registry.save(&dir).context("failed to save TASKS.json")?;

    if json {
        print_json(&registry.checkpoint)?;
    } else {
        println!(
            "Checkpoint saved (iteration {})",
            registry.checkpoint.iteration_count
        );
    }
    Ok(())
}

fn task_row(t: &TaskRecord) -> Vec<String> {
    vec![t.task_id.clone(), t.title.clone(), t.dependencies.join(",")]
}

fn resume(
    root: &Path,
    feature: &str,
    parallel: bool,
    max_parallel: usize,
    json: bool,
) -> anyhow::Result<()> {
    let (_, registry) = load(root, feature)?;
    let progress = registry.progress();
    let phase = registry.current_phase();

    let next: Vec<&TaskRecord> = match phase {
        Some(p) if parallel => registry.ready_tasks(&p.phase_id, max_parallel.max(1)),
        Some(p) => registry.pending_tasks(Some(&p.phase_id)),
        None => Vec::new(),
    };

    if json {
        return print_json(&serde_json::json!({
            "last_completed_task": registry.checkpoint.last_completed_task,
            "current_phase": progress.current_phase,
            "progress": progress,
            "active_tasks": registry.checkpoint.active_tasks,
            "parallel": parallel,
            "max_parallel": max_parallel,
            "next_tasks": next,
        }));
    }

    println!(
        "Last completed: {}",
        registry
            .checkpoint
            .last_completed_task
            .as_deref()
            .unwrap_or("none")
    );
    println!("Current phase:  {}", progress.current_phase);
    println!(
        "Progress:       {}",
        ratio(progress.completed_tasks, progress.total_tasks)
    );
    if !registry.checkpoint.active_tasks.is_empty() {
        println!(
            "Active tasks:   {}",
            registry.checkpoint.active_tasks.join(", ")
        );
    }

    if next.is_empty() {
        println!("\nNothing pending.");
        return Ok(());
    }
    if parallel {
        println!("\nReady to run in parallel (max {max_parallel}):");
    } else {
        println!("\nPending in current phase:");
    }
    print_table(
        &["TASK", "TITLE", "DEPENDS"],
        next.into_iter().map(task_row).collect(),
    );
    Ok(())
}
