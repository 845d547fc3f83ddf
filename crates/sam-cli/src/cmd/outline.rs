use crate::output::{print_json, print_table};
use anyhow::Context;
use sam_core::{extract::extract, io, paths, section::segment};
use std::path::Path;

pub fn run(root: &Path, feature: &str, json: bool) -> anyhow::Result<()> {
    let dir = super::feature_dir(root, feature)?;
    let spec = paths::spec_path(&dir);
    let text = io::read_text(&spec)?;

    let seg = segment(&text);
    let extraction =
        extract(&text).with_context(|| format!("failed to parse {}", spec.display()))?;

    if json {
        return print_json(&serde_json::json!({
            "sections": seg.sections.iter().map(|s| serde_json::json!({
                "level": s.level,
                "title": s.title,
                "line_start": s.line_start + 1,
                "line_end": s.line_end + 1,
                "line_count": s.line_count(),
            })).collect::<Vec<_>>(),
            "phases": extraction.phases().iter().map(|p| serde_json::json!({
                "phase_id": p.phase_id,
                "phase_name": p.phase_name,
                "line": p.line_start + 1,
                "tasks": p.tasks.len(),
            })).collect::<Vec<_>>(),
            "out_of_order_phases": extraction.out_of_order_phases(),
        }));
    }

    if seg.sections.is_empty() {
        println!("No headings in {}.", spec.display());
        return Ok(());
    }

    let rows = seg
        .sections
        .iter()
        .map(|s| {
            vec![
                format!("{}-{}", s.line_start + 1, s.line_end + 1),
                s.line_count().to_string(),
                format!("{}{}", "  ".repeat(s.level - 1), s.title),
            ]
        })
        .collect();
    print_table(&["LINES", "SIZE", "HEADING"], rows);

    if extraction.region.is_none() {
        println!("\nNo Implementation Tasks section.");
    } else {
        let total: usize = extraction.phases().iter().map(|p| p.tasks.len()).sum();
        println!(
            "\n{} phases, {} tasks",
            extraction.phases().len(),
            total
        );
    }
    let flagged = extraction.out_of_order_phases();
    if !flagged.is_empty() {
        println!("Phases out of numeric order: {}", flagged.join(", "));
    }
    Ok(())
}
