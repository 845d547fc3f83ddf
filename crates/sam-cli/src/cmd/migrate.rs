use crate::output::print_json;
use anyhow::Context;
use sam_core::split::{self, SplitOptions};
use std::path::Path;

pub fn run(root: &Path, feature: &str, dry_run: bool, force: bool, json: bool) -> anyhow::Result<()> {
    let dir = super::feature_dir(root, feature)?;
    let report = split::migrate(&dir, SplitOptions { dry_run, force })
        .with_context(|| format!("failed to migrate '{feature}'"))?;

    if json {
        return print_json(&report);
    }

    println!("Migrating {}", report.feature_id);
    println!("  Found {} phases", report.phase_count);
    for phase in &report.phases {
        println!(
            "    Phase {}: {} ({} tasks)",
            phase.phase_id, phase.phase_name, phase.task_count
        );
    }

    let rel = |p: &Path| p.strip_prefix(&dir).unwrap_or(p).display().to_string();
    if report.dry_run {
        println!("\nDry run, would write:");
    } else {
        println!("\nWrote:");
    }
    for file in &report.files {
        println!("  {}", rel(file));
    }
    if let Some(backup) = &report.backup {
        println!("  backup: {}", rel(backup));
    }
    println!(
        "\nTasks: {} total, {} completed",
        report.total_tasks, report.completed_tasks
    );
    Ok(())
}
