use crate::output::print_json;
use anyhow::{bail, Context};
use clap::{Args, Subcommand};
use sam_core::context::{ContextStore, ContextValue, ExportFormat, LayerKind};
use sam_core::{io, paths};
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct LayerArgs {
    /// Feature directory or id under .sam/
    feature: String,

    /// Global CONTEXT.yaml (default: nearest templates/CONTEXT.yaml or
    /// CONTEXT.yaml above the feature)
    #[arg(long)]
    global: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum ContextSubcommand {
    /// Print the merged context
    Show {
        #[command(flatten)]
        layers: LayerArgs,
        /// List every dot path instead of the tree
        #[arg(long)]
        flat: bool,
    },
    /// Print the value at a dot path
    Get {
        #[command(flatten)]
        layers: LayerArgs,
        path: String,
        /// Printed when the path is absent
        #[arg(long)]
        default: Option<String>,
    },
    /// Set a value on the feature layer (parsed as YAML, else a string)
    Set {
        #[command(flatten)]
        layers: LayerArgs,
        path: String,
        value: String,
    },
    /// Write the merged context as YAML or JSON
    Export {
        #[command(flatten)]
        layers: LayerArgs,
        #[arg(long, default_value = "yaml")]
        format: ExportFormat,
        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Interpolate {{placeholders}} in text, a file, or every .md file in a directory
    Resolve {
        #[command(flatten)]
        layers: LayerArgs,
        /// Literal template text
        text: Option<String>,
        /// Template file or directory
        #[arg(long, short = 'i', conflicts_with = "text")]
        input: Option<PathBuf>,
        /// Output file or directory (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Fail when a required placeholder is missing
        #[arg(long)]
        strict: bool,
        /// Fill missing optional placeholders with suggested defaults
        #[arg(long)]
        defaults: bool,
    },
    /// Validate the context and, optionally, a template's placeholders
    Check {
        #[command(flatten)]
        layers: LayerArgs,
        /// Template whose placeholders are checked
        #[arg(long)]
        template: Option<PathBuf>,
        /// Exit non-zero when problems or missing required placeholders are found
        #[arg(long)]
        strict: bool,
    },
}

pub fn run(root: &Path, subcmd: ContextSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ContextSubcommand::Show { layers, flat } => show(root, &layers, flat, json),
        ContextSubcommand::Get {
            layers,
            path,
            default,
        } => get(root, &layers, &path, default.as_deref(), json),
        ContextSubcommand::Set {
            layers,
            path,
            value,
        } => set(root, &layers, &path, &value, json),
        ContextSubcommand::Export {
            layers,
            format,
            output,
        } => export(root, &layers, format, output.as_deref()),
        ContextSubcommand::Resolve {
            layers,
            text,
            input,
            output,
            strict,
            defaults,
        } => resolve(
            root,
            &layers,
            text.as_deref(),
            input.as_deref(),
            output.as_deref(),
            strict,
            defaults,
            json,
        ),
        ContextSubcommand::Check {
            layers,
            template,
            strict,
        } => check(root, &layers, template.as_deref(), strict, json),
    }
}

fn open(root: &Path, layers: &LayerArgs) -> anyhow::Result<(PathBuf, ContextStore)> {
    let dir = super::feature_dir(root, &layers.feature)?;
    let store = ContextStore::for_feature(&dir, layers.global.as_deref())
        .with_context(|| format!("failed to load context for '{}'", layers.feature))?;
    Ok((dir, store))
}

fn show(root: &Path, layers: &LayerArgs, flat: bool, json: bool) -> anyhow::Result<()> {
    let (_, store) = open(root, layers)?;
    match (flat, json) {
        (true, true) => print_json(&store.flatten()),
        (true, false) => {
            for (path, value) in store.flatten() {
                println!("{path} = {value}");
            }
            Ok(())
        }
        (false, true) => print_json(store.merged()),
        (false, false) => {
            print!("{}", store.export(ExportFormat::Yaml)?);
            Ok(())
        }
    }
}

fn get(
    root: &Path,
    layers: &LayerArgs,
    path: &str,
    default: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let (_, store) = open(root, layers)?;
    let fallback = default.map(ContextValue::string);
    let Some(value) = store.get(path).or(fallback.as_ref()) else {
        bail!("no context value at '{path}'");
    };
    if json {
        print_json(value)
    } else {
        println!("{value}");
        Ok(())
    }
}

fn set(root: &Path, layers: &LayerArgs, path: &str, raw: &str, json: bool) -> anyhow::Result<()> {
    let (dir, mut store) = open(root, layers)?;
    let value = ContextValue::parse(raw);
    store.set(path, value.clone())?;
    let target = store
        .layer_path(LayerKind::Feature)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| paths::feature_context_path(&dir));
    store
        .save_feature_layer(&target)
        .with_context(|| format!("failed to write {}", target.display()))?;

    if json {
        print_json(&serde_json::json!({ "path": path, "value": value, "file": target }))
    } else {
        println!("Set {path} = {value} in {}", target.display());
        Ok(())
    }
}

fn export(
    root: &Path,
    layers: &LayerArgs,
    format: ExportFormat,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let (_, store) = open(root, layers)?;
    let data = store.export(format)?;
    match output {
        Some(path) => {
            io::atomic_write(path, data.as_bytes())
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Exported context to {}", path.display());
        }
        None => print!("{data}"),
    }
    Ok(())
}

/// Resolve one template. Strict mode refuses on missing required placeholders.
fn render_one(store: &ContextStore, text: &str, strict: bool, defaults: bool) -> anyhow::Result<String> {
    if strict {
        let report = store.check_template(text);
        if !report.is_valid() {
            bail!(
                "missing required placeholders: {}",
                report.missing_required.join(", ")
            );
        }
    }
    Ok(if defaults {
        store.render(text, false).content
    } else {
        store.resolve_string(text)
    })
}

#[allow(clippy::too_many_arguments)]
fn resolve(
    root: &Path,
    layers: &LayerArgs,
    text: Option<&str>,
    input: Option<&Path>,
    output: Option<&Path>,
    strict: bool,
    defaults: bool,
    json: bool,
) -> anyhow::Result<()> {
    let (_, store) = open(root, layers)?;

    if let Some(dir) = input.filter(|p| p.is_dir()) {
        let Some(out_dir) = output else {
            bail!("resolving a directory requires --output <dir>");
        };
        return resolve_dir(&store, dir, out_dir, strict, defaults, json);
    }

    let template = match (text, input) {
        (Some(t), _) => t.to_string(),
        (None, Some(path)) => io::read_text(path)?,
        (None, None) => bail!("provide template text or --input <file>"),
    };
    let resolved = render_one(&store, &template, strict, defaults)?;

    match output {
        Some(path) => {
            io::atomic_write(path, resolved.as_bytes())
                .with_context(|| format!("failed to write {}", path.display()))?;
            if json {
                print_json(&serde_json::json!({ "output": path }))?;
            } else {
                println!("Resolved -> {}", path.display());
            }
        }
        None if json => print_json(&serde_json::json!({ "content": resolved }))?,
        None => print!("{resolved}"),
    }
    Ok(())
}

fn resolve_dir(
    store: &ContextStore,
    input: &Path,
    output: &Path,
    strict: bool,
    defaults: bool,
    json: bool,
) -> anyhow::Result<()> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(input)
        .with_context(|| format!("failed to read {}", input.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
        .collect();
    entries.sort();

    io::ensure_dir(output)?;
    let mut written = Vec::new();
    for path in entries {
        let Some(name) = path.file_name() else {
            continue;
        };
        let text = io::read_text(&path)?;
        let resolved = render_one(store, &text, strict, defaults)
            .with_context(|| format!("failed to resolve {}", path.display()))?;
        let target = output.join(name);
        io::atomic_write(&target, resolved.as_bytes())?;
        if !json {
            println!("Resolved {} -> {}", path.display(), target.display());
        }
        written.push(target);
    }
    if json {
        print_json(&serde_json::json!({ "written": written }))?;
    }
    Ok(())
}

fn check(
    root: &Path,
    layers: &LayerArgs,
    template: Option<&Path>,
    strict: bool,
    json: bool,
) -> anyhow::Result<()> {
    let (_, store) = open(root, layers)?;
    let problems = store.validate();
    let report = match template {
        Some(path) => Some(store.check_template(&io::read_text(path)?)),
        None => None,
    };

    if json {
        print_json(&serde_json::json!({
            "problems": problems,
            "messages": problems.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "template": report,
        }))?;
    } else {
        if problems.is_empty() {
            println!("Context OK");
        } else {
            println!("{} problem(s):", problems.len());
            for p in &problems {
                println!("  - {p}");
            }
        }
        if let Some(r) = &report {
            println!(
                "\nPlaceholders: {} total, {} resolved",
                r.placeholders.len(),
                r.resolved_count()
            );
            for name in &r.missing_required {
                println!("  missing required: {name}");
            }
            for name in &r.missing_optional {
                match r.suggestions.get(name) {
                    Some(default) => println!("  missing optional: {name} (suggested: {default})"),
                    None => println!("  missing optional: {name}"),
                }
            }
        }
    }

    let template_invalid = report.as_ref().is_some_and(|r| !r.is_valid());
    if strict && (!problems.is_empty() || template_invalid) {
        bail!("context check failed");
    }
    Ok(())
}
