use crate::output::{print_json, ratio};
use anyhow::Context;
use sam_core::{
    extract::extract,
    io, paths,
    registry::{RegistryInfo, TaskRegistry},
};
use std::path::Path;

pub fn run(root: &Path, feature: &str, json: bool) -> anyhow::Result<()> {
    let dir = super::feature_dir(root, feature)?;
    let spec = paths::spec_path(&dir);
    let text = io::read_text(&spec)?;

    let extraction =
        extract(&text).with_context(|| format!("failed to parse {}", spec.display()))?;
    let info = RegistryInfo::from_feature_dir(&dir, &text)?;
    let registry = TaskRegistry::build(&extraction, info)
        .with_context(|| format!("failed to build registry from {}", spec.display()))?;
    registry.save(&dir).context("failed to write TASKS.json")?;

    if json {
        return print_json(&serde_json::json!({
            "feature_id": registry.metadata.feature_id,
            "registry": paths::tasks_path(&dir),
            "progress": registry.progress(),
            "phases": registry.phases.iter().map(|p| serde_json::json!({
                "phase_id": p.phase_id,
                "phase_name": p.phase_name,
                "status": p.status,
                "tasks": p.tasks.len(),
            })).collect::<Vec<_>>(),
            "out_of_order_phases": extraction.out_of_order_phases(),
        }));
    }

    let meta = &registry.metadata;
    println!("Generated {}", paths::tasks_path(&dir).display());
    println!("  Feature:      {} ({})", meta.feature_name, meta.feature_id);
    println!("  Project type: {}", meta.project_type);
    println!(
        "  Tasks:        {}",
        ratio(meta.completed_tasks, meta.total_tasks)
    );
    println!("  Phases:       {}", registry.phases.len());
    for phase in &registry.phases {
        println!(
            "    Phase {} ({}): {} tasks [{}]",
            phase.phase_id,
            phase.phase_name,
            phase.tasks.len(),
            phase.status
        );
    }
    Ok(())
}
