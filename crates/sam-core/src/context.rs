//! Layered `CONTEXT.yaml` resolution.
//!
//! A global layer and a feature layer are deep-merged into one view, feature
//! values winning. Lookups never fail; missing paths are `None`. Templates
//! interpolate `{{dot.path}}` placeholders and leave unknown ones untouched.

use crate::error::{Result, SamError};
use crate::io;
use crate::paths;
use indexmap::IndexMap;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub type ContextMap = IndexMap<String, ContextValue>;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContextValue {
    Scalar(Scalar),
    List(Vec<ContextValue>),
    Map(ContextMap),
}

impl ContextValue {
    pub fn string(s: impl Into<String>) -> Self {
        ContextValue::Scalar(Scalar::String(s.into()))
    }

    pub fn integer(n: i64) -> Self {
        ContextValue::Scalar(Scalar::Integer(n))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ContextMap> {
        match self {
            ContextValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Whether `flatten` stops here. Non-empty mappings are expanded.
    fn is_terminal(&self) -> bool {
        !matches!(self, ContextValue::Map(m) if !m.is_empty())
    }

    /// Parse a command-line value as YAML (`3306`, `true`, `[a, b]`), falling
    /// back to a plain string.
    pub fn parse(text: &str) -> Self {
        match serde_yaml::from_str::<serde_yaml::Value>(text) {
            Ok(value) => {
                let mut ignored = Vec::new();
                from_yaml(value, "", &mut ignored)
            }
            Err(_) => ContextValue::string(text),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Integer(n) => write!(f, "{n}"),
            Scalar::Float(x) if x.is_nan() => f.write_str(".nan"),
            Scalar::Float(x) if x.is_infinite() => {
                f.write_str(if *x > 0.0 { ".inf" } else { "-.inf" })
            }
            Scalar::Float(x) if x.fract() == 0.0 => write!(f, "{x:.1}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::String(s) => f.write_str(s),
        }
    }
}

/// Text form used for interpolation.
impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Scalar(s) => write!(f, "{s}"),
            ContextValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            ContextValue::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Convert a parsed YAML value. Structural problems (non-string keys) are
/// collected into `problems` and the offending entries are repaired or skipped.
fn from_yaml(value: serde_yaml::Value, at: &str, problems: &mut Vec<String>) -> ContextValue {
    use serde_yaml::Value;
    match value {
        Value::Null => ContextValue::Scalar(Scalar::Null),
        Value::Bool(b) => ContextValue::Scalar(Scalar::Bool(b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => ContextValue::Scalar(Scalar::Integer(i)),
            None => ContextValue::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
        },
        Value::String(s) => ContextValue::string(s),
        Value::Sequence(items) => ContextValue::List(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| from_yaml(v, &format!("{at}[{i}]"), problems))
                .collect(),
        ),
        Value::Mapping(mapping) => {
            let mut map = ContextMap::new();
            for (k, v) in mapping {
                let key = match k {
                    Value::String(s) => s,
                    Value::Number(n) => {
                        problems.push(format!("non-string key `{n}` at `{}`", display_at(at)));
                        n.to_string()
                    }
                    Value::Bool(b) => {
                        problems.push(format!("non-string key `{b}` at `{}`", display_at(at)));
                        b.to_string()
                    }
                    _ => {
                        problems.push(format!("unsupported key type at `{}`", display_at(at)));
                        continue;
                    }
                };
                if !addressable(&key) {
                    problems.push(format!(
                        "key `{key}` at `{}` cannot be reached by a dot path",
                        display_at(at)
                    ));
                }
                let child = join_path(at, &key);
                let value = from_yaml(v, &child, problems);
                map.insert(key, value);
            }
            ContextValue::Map(map)
        }
        Value::Tagged(tagged) => from_yaml(tagged.value, at, problems),
    }
}

/// Keys that are empty or contain `.` are kept in the layer but have no
/// dot path, so `get`, `flatten` and interpolation skip them.
fn addressable(key: &str) -> bool {
    !key.is_empty() && !key.contains('.')
}

fn display_at(at: &str) -> &str {
    if at.is_empty() {
        "<root>"
    } else {
        at
    }
}

/// Recurse only when both sides are mappings; otherwise the incoming value wins.
pub fn deep_merge(dest: &mut ContextMap, incoming: &ContextMap) {
    for (key, value) in incoming {
        if let (Some(ContextValue::Map(existing)), ContextValue::Map(update)) =
            (dest.get_mut(key), value)
        {
            deep_merge(existing, update);
            continue;
        }
        dest.insert(key.clone(), value.clone());
    }
}

fn set_in(map: &mut ContextMap, segments: &[&str], value: ContextValue) {
    match segments {
        [] => {}
        [last] => {
            map.insert(last.to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| ContextValue::Map(ContextMap::new()));
            match entry {
                ContextValue::Map(inner) => set_in(inner, rest, value),
                other => {
                    let mut inner = ContextMap::new();
                    set_in(&mut inner, rest, value);
                    *other = ContextValue::Map(inner);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Global,
    Feature,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LayerKind::Global => "global",
            LayerKind::Feature => "feature",
        })
    }
}

#[derive(Debug, Clone)]
struct Layer {
    kind: LayerKind,
    path: Option<PathBuf>,
    root: ContextMap,
    problems: Vec<String>,
}

impl Layer {
    fn empty(kind: LayerKind, path: Option<PathBuf>) -> Self {
        Self {
            kind,
            path,
            root: ContextMap::new(),
            problems: Vec::new(),
        }
    }

    /// Parse layer text. YAML syntax errors fail; a top level that is not a
    /// mapping yields an empty layer with a recorded problem.
    fn parse(kind: LayerKind, path: Option<PathBuf>, source: &str) -> Result<Self> {
        let mut layer = Self::empty(kind, path);
        if source.trim().is_empty() {
            return Ok(layer);
        }
        let value: serde_yaml::Value = serde_yaml::from_str(source)?;
        match value {
            serde_yaml::Value::Null => {}
            serde_yaml::Value::Mapping(_) => {
                if let ContextValue::Map(map) = from_yaml(value, "", &mut layer.problems) {
                    layer.root = map;
                }
            }
            other => layer.problems.push(format!(
                "top level must be a mapping, found {}",
                yaml_kind(&other)
            )),
        }
        for problem in &layer.problems {
            tracing::warn!(layer = %kind, %problem, "invalid context layer");
        }
        Ok(layer)
    }

    fn read(kind: LayerKind, path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::empty(kind, None));
        };
        match io::read_optional(path)? {
            Some(source) => {
                tracing::debug!(layer = %kind, path = %path.display(), "context layer loaded");
                Self::parse(kind, Some(path.to_path_buf()), &source)
            }
            None => {
                tracing::debug!(layer = %kind, path = %path.display(), "context layer missing, using empty");
                Ok(Self::empty(kind, Some(path.to_path_buf())))
            }
        }
    }
}

fn yaml_kind(value: &serde_yaml::Value) -> &'static str {
    use serde_yaml::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

// ---------------------------------------------------------------------------
// Problems and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextProblem {
    MissingSection { section: String },
    ResolutionMiss { path: String, placeholder: String },
    InvalidLayer { layer: LayerKind, detail: String },
}

impl fmt::Display for ContextProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextProblem::MissingSection { section } => {
                write!(f, "missing required context section: {section}")
            }
            ContextProblem::ResolutionMiss { path, placeholder } => {
                write!(f, "{path}: placeholder {{{{{placeholder}}}}} does not resolve")
            }
            ContextProblem::InvalidLayer { layer, detail } => {
                write!(f, "invalid {layer} layer: {detail}")
            }
        }
    }
}

/// Placeholder prefixes a template cannot be generated without.
pub const REQUIRED_PLACEHOLDERS: &[&str] = &["application.name", "application.description"];

const COMMON_DEFAULTS: &[(&str, &str)] = &[
    ("application.version", "1.0.0"),
    ("application.environment", "development"),
    ("database.port", "5432"),
    ("database.ssl_mode", "require"),
    ("api.timeout", "30000"),
    ("api.rate_limit", "1000"),
    ("cache.ttl", "3600"),
    ("logging.level", "info"),
];

/// A default for a missing optional placeholder, by exact name then by shape.
fn suggest_default(placeholder: &str) -> Option<&'static str> {
    if let Some((_, v)) = COMMON_DEFAULTS.iter().find(|(k, _)| *k == placeholder) {
        return Some(v);
    }
    if placeholder.contains("port") {
        Some("3000")
    } else if placeholder.contains("host") || placeholder.contains("url") {
        if placeholder.contains("database") {
            Some("localhost")
        } else if placeholder.contains("api") {
            Some("http://localhost:3000")
        } else {
            None
        }
    } else if placeholder.contains("email") {
        Some("noreply@example.com")
    } else {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateReport {
    pub placeholders: Vec<String>,
    pub missing_required: Vec<String>,
    pub missing_optional: Vec<String>,
    pub suggestions: BTreeMap<String, String>,
}

impl TemplateReport {
    pub fn is_valid(&self) -> bool {
        self.missing_required.is_empty()
    }

    pub fn resolved_count(&self) -> usize {
        self.placeholders.len() - self.missing_required.len() - self.missing_optional.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rendered {
    pub content: String,
    pub report: TemplateReport,
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Yaml,
    Json,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unknown export format '{other}': expected yaml or json")),
        }
    }
}

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"\{\{([^{}]+)\}\}").unwrap())
}

/// Unique placeholder names in order of first appearance, trimmed.
pub fn template_variables(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in placeholder_re().captures_iter(text) {
        let name = caps[1].trim();
        if !name.is_empty() && !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// ContextStore
// ---------------------------------------------------------------------------

/// Owns both raw layers and the merged view. Each instance is independent.
#[derive(Debug, Clone)]
pub struct ContextStore {
    global: Layer,
    feature: Layer,
    merged: ContextMap,
    required_sections: Vec<String>,
}

impl ContextStore {
    fn from_layers(global: Layer, feature: Layer) -> Self {
        let mut store = Self {
            global,
            feature,
            merged: ContextMap::new(),
            required_sections: vec!["application".to_string()],
        };
        store.remerge();
        store
    }

    /// Load both layers from disk. Missing files behave as empty layers.
    pub fn load(global: Option<&Path>, feature: Option<&Path>) -> Result<Self> {
        Ok(Self::from_layers(
            Layer::read(LayerKind::Global, global)?,
            Layer::read(LayerKind::Feature, feature)?,
        ))
    }

    /// Layers for a feature directory: `<feature>/CONTEXT.yaml` plus either
    /// `global_override` or the nearest global context above the feature.
    pub fn for_feature(feature_dir: &Path, global_override: Option<&Path>) -> Result<Self> {
        let global = match global_override {
            Some(p) => Some(p.to_path_buf()),
            None => paths::find_global_context(feature_dir),
        };
        let feature = paths::feature_context_path(feature_dir);
        Self::load(global.as_deref(), Some(&feature))
    }

    /// Build from in-memory layer text.
    pub fn from_yaml(global: &str, feature: &str) -> Result<Self> {
        Ok(Self::from_layers(
            Layer::parse(LayerKind::Global, None, global)?,
            Layer::parse(LayerKind::Feature, None, feature)?,
        ))
    }

    /// Re-read file-backed layers. In-memory layers are kept as they are.
    pub fn reload(&mut self) -> Result<()> {
        if let Some(path) = self.global.path.clone() {
            self.global = Layer::read(LayerKind::Global, Some(&path))?;
        }
        if let Some(path) = self.feature.path.clone() {
            self.feature = Layer::read(LayerKind::Feature, Some(&path))?;
        }
        self.remerge();
        Ok(())
    }

    pub fn with_required_sections<I, S>(mut self, sections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_sections = sections.into_iter().map(Into::into).collect();
        self
    }

    fn remerge(&mut self) {
        let mut merged = self.global.root.clone();
        deep_merge(&mut merged, &self.feature.root);
        self.merged = merged;
    }

    pub fn merged(&self) -> &ContextMap {
        &self.merged
    }

    pub fn layer(&self, kind: LayerKind) -> &ContextMap {
        match kind {
            LayerKind::Global => &self.global.root,
            LayerKind::Feature => &self.feature.root,
        }
    }

    pub fn layer_path(&self, kind: LayerKind) -> Option<&Path> {
        match kind {
            LayerKind::Global => self.global.path.as_deref(),
            LayerKind::Feature => self.feature.path.as_deref(),
        }
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Descend the merged view along a dot path.
    pub fn get(&self, path: &str) -> Option<&ContextValue> {
        let mut segments = path.split('.');
        let first = segments.next().filter(|s| !s.is_empty())?;
        let mut current = self.merged.get(first)?;
        for segment in segments {
            current = current.as_map()?.get(segment)?;
        }
        Some(current)
    }

    pub fn get_or<'a>(&'a self, path: &str, default: &'a ContextValue) -> &'a ContextValue {
        self.get(path).unwrap_or(default)
    }

    /// Set a value on the feature layer, creating intermediate mappings and
    /// replacing non-mapping ones, then re-merge.
    pub fn set(&mut self, path: &str, value: ContextValue) -> Result<()> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(SamError::InvalidPath(path.to_string()));
        }
        set_in(&mut self.feature.root, &segments, value);
        self.remerge();
        Ok(())
    }

    /// Every terminal dot path in the merged view, depth-first in insertion
    /// order. Lists and empty mappings are terminal; list items are never
    /// addressed by index.
    pub fn flatten(&self) -> IndexMap<String, ContextValue> {
        fn walk(map: &ContextMap, prefix: &str, out: &mut IndexMap<String, ContextValue>) {
            for (key, value) in map.iter().filter(|(k, _)| addressable(k)) {
                let path = join_path(prefix, key);
                match value {
                    ContextValue::Map(inner) if !inner.is_empty() => walk(inner, &path, out),
                    _ => {
                        out.insert(path, value.clone());
                    }
                }
            }
        }
        let mut out = IndexMap::new();
        walk(&self.merged, "", &mut out);
        out
    }

    /// The value a placeholder would interpolate, if any.
    fn lookup_terminal(&self, path: &str) -> Option<&ContextValue> {
        self.get(path).filter(|v| v.is_terminal())
    }

    // -----------------------------------------------------------------------
    // Templates
    // -----------------------------------------------------------------------

    /// Replace each resolvable `{{path}}` with its text form. Unknown
    /// placeholders stay in the output verbatim.
    pub fn resolve_string(&self, template: &str) -> String {
        placeholder_re()
            .replace_all(template, |caps: &Captures| {
                match self.lookup_terminal(caps[1].trim()) {
                    Some(value) => value.to_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    pub fn check_template(&self, text: &str) -> TemplateReport {
        let mut report = TemplateReport {
            placeholders: template_variables(text),
            ..TemplateReport::default()
        };
        for name in &report.placeholders {
            if self.lookup_terminal(name).is_some() {
                continue;
            }
            if REQUIRED_PLACEHOLDERS.iter().any(|p| name.starts_with(p)) {
                report.missing_required.push(name.clone());
            } else {
                report.missing_optional.push(name.clone());
                if let Some(default) = suggest_default(name) {
                    report.suggestions.insert(name.clone(), default.to_string());
                }
            }
        }
        report
    }

    /// Resolve with validation. Strict mode refuses to render when a required
    /// placeholder is missing; otherwise suggested defaults fill the gaps
    /// before interpolation.
    pub fn render(&self, text: &str, strict: bool) -> Rendered {
        let report = self.check_template(text);
        if strict && !report.is_valid() {
            return Rendered {
                content: text.to_string(),
                report,
                success: false,
            };
        }
        let mut content = self.resolve_string(text);
        if !strict {
            content = placeholder_re()
                .replace_all(&content, |caps: &Captures| {
                    match report.suggestions.get(caps[1].trim()) {
                        Some(default) => default.clone(),
                        None => caps[0].to_string(),
                    }
                })
                .into_owned();
        }
        Rendered {
            content,
            report,
            success: true,
        }
    }

    /// Problems with the merged context. Empty means none were found.
    pub fn validate(&self) -> Vec<ContextProblem> {
        let mut problems = Vec::new();
        for layer in [&self.global, &self.feature] {
            for detail in &layer.problems {
                problems.push(ContextProblem::InvalidLayer {
                    layer: layer.kind,
                    detail: detail.clone(),
                });
            }
        }
        for section in &self.required_sections {
            if !self.merged.contains_key(section) {
                problems.push(ContextProblem::MissingSection {
                    section: section.clone(),
                });
            }
        }
        for (path, value) in self.flatten() {
            let Some(text) = value.as_str() else {
                continue;
            };
            for placeholder in template_variables(text) {
                if self.lookup_terminal(&placeholder).is_none() {
                    problems.push(ContextProblem::ResolutionMiss {
                        path: path.clone(),
                        placeholder,
                    });
                }
            }
        }
        problems
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    pub fn export(&self, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Yaml => Ok(serde_yaml::to_string(&self.merged)?),
            ExportFormat::Json => {
                let mut out = serde_json::to_string_pretty(&self.merged)?;
                out.push('\n');
                Ok(out)
            }
        }
    }

    /// Write the feature layer (not the merged view) as YAML.
    pub fn save_feature_layer(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(&self.feature.root)?;
        io::atomic_write(path, yaml.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GLOBAL: &str = "\
application:
  name: Platform
  version: 0.9.0
database:
  host: db.internal
  port: 5432
features: [auth, billing]
";

    const FEATURE: &str = "\
application:
  name: MyApp
database:
  port: 3306
";

    fn store() -> ContextStore {
        ContextStore::from_yaml(GLOBAL, FEATURE).unwrap()
    }

    #[test]
    fn feature_layer_overrides_global() {
        let s = store();
        assert_eq!(s.get("database.port"), Some(&ContextValue::integer(3306)));
        assert_eq!(s.get("database.host"), Some(&ContextValue::string("db.internal")));
        assert_eq!(s.get("application.name"), Some(&ContextValue::string("MyApp")));
        assert_eq!(s.get("application.version"), Some(&ContextValue::string("0.9.0")));
    }

    #[test]
    fn missing_paths_are_none() {
        let s = store();
        assert!(s.get("database.user").is_none());
        assert!(s.get("database.port.inner").is_none());
        assert!(s.get("").is_none());
        let fallback = ContextValue::string("postgres");
        assert_eq!(s.get_or("database.user", &fallback), &fallback);
    }

    #[test]
    fn merge_replaces_when_either_side_is_not_a_mapping() {
        let s = ContextStore::from_yaml("a:\n  b: 1\nc: 2\n", "a: flat\nc:\n  d: 3\n").unwrap();
        assert_eq!(s.get("a"), Some(&ContextValue::string("flat")));
        assert_eq!(s.get("c.d"), Some(&ContextValue::integer(3)));
    }

    #[test]
    fn merge_is_recursive_and_keeps_order() {
        let s = store();
        let keys: Vec<_> = s.merged().keys().map(String::as_str).collect();
        assert_eq!(keys, ["application", "database", "features"]);
    }

    #[test]
    fn resolves_placeholders() {
        let s = ContextStore::from_yaml(
            "",
            "application:\n  name: MyApp\n  version: \"1.0.0\"\n",
        )
        .unwrap();
        assert_eq!(
            s.resolve_string("{{application.name}} v{{application.version}}"),
            "MyApp v1.0.0"
        );
        assert_eq!(s.resolve_string("{{ application.name }}"), "MyApp");
    }

    #[test]
    fn unknown_placeholders_fail_open() {
        let s = store();
        assert_eq!(s.resolve_string("{{missing.path}}"), "{{missing.path}}");
        assert_eq!(s.resolve_string("{{database}}"), "{{database}}");
    }

    #[test]
    fn text_forms() {
        let s = ContextStore::from_yaml(
            "",
            "f: 2.0\ng: 0.25\nn: ~\nb: true\nl: [a, 1]\ne: {}\n",
        )
        .unwrap();
        assert_eq!(s.resolve_string("{{f}} {{g}} {{n}} {{b}} {{l}} {{e}}"), "2.0 0.25 null true [a, 1] {}");
    }

    #[test]
    fn flatten_treats_lists_as_terminal() {
        let flat = store().flatten();
        let keys: Vec<_> = flat.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            [
                "application.name",
                "application.version",
                "database.host",
                "database.port",
                "features"
            ]
        );
        assert!(matches!(flat["features"], ContextValue::List(ref l) if l.len() == 2));
    }

    #[test]
    fn flatten_agrees_with_get() {
        let s = store();
        for (path, value) in s.flatten() {
            assert_eq!(s.get(&path), Some(&value), "path {path}");
        }
    }

    #[test]
    fn set_touches_feature_layer_only() {
        let mut s = store();
        s.set("database.pool.size", ContextValue::integer(10)).unwrap();
        assert_eq!(s.get("database.pool.size"), Some(&ContextValue::integer(10)));
        assert!(s.layer(LayerKind::Global).get("database").unwrap().as_map().unwrap().get("pool").is_none());
        assert_eq!(s.get("database.host"), Some(&ContextValue::string("db.internal")));
    }

    #[test]
    fn set_replaces_scalar_intermediates() {
        let mut s = ContextStore::from_yaml("", "a: 1\n").unwrap();
        s.set("a.b", ContextValue::string("x")).unwrap();
        assert_eq!(s.get("a.b"), Some(&ContextValue::string("x")));
        assert!(matches!(
            s.set("a..b", ContextValue::integer(1)),
            Err(SamError::InvalidPath(_))
        ));
    }

    #[test]
    fn missing_files_are_empty_layers() {
        let dir = TempDir::new().unwrap();
        let s = ContextStore::load(
            Some(&dir.path().join("nope.yaml")),
            Some(&dir.path().join("CONTEXT.yaml")),
        )
        .unwrap();
        assert!(s.merged().is_empty());
        assert_eq!(
            s.validate(),
            [ContextProblem::MissingSection {
                section: "application".into()
            }]
        );
    }

    #[test]
    fn syntax_errors_fail() {
        assert!(matches!(
            ContextStore::from_yaml("a: [unclosed\n", ""),
            Err(SamError::Yaml(_))
        ));
    }

    #[test]
    fn invalid_layers_are_reported() {
        let s = ContextStore::from_yaml("- just\n- a list\n", "application:\n  name: x\n1: one\n").unwrap();
        let problems = s.validate();
        assert!(problems.iter().any(|p| matches!(
            p,
            ContextProblem::InvalidLayer { layer: LayerKind::Global, .. }
        )));
        assert!(problems.iter().any(|p| matches!(
            p,
            ContextProblem::InvalidLayer { layer: LayerKind::Feature, detail } if detail.contains("non-string key")
        )));
        assert_eq!(s.get("1"), Some(&ContextValue::string("one")));
    }

    #[test]
    fn validate_reports_unresolved_placeholders() {
        let s = ContextStore::from_yaml(
            "",
            "application:\n  name: App\n  title: \"{{application.name}} ({{application.tier}})\"\n",
        )
        .unwrap();
        let problems = s.validate();
        assert_eq!(
            problems,
            [ContextProblem::ResolutionMiss {
                path: "application.title".into(),
                placeholder: "application.tier".into()
            }]
        );
        assert_eq!(
            problems[0].to_string(),
            "application.title: placeholder {{application.tier}} does not resolve"
        );
    }

    #[test]
    fn required_sections_are_configurable() {
        let s = store().with_required_sections(["application", "api"]);
        assert_eq!(
            s.validate(),
            [ContextProblem::MissingSection { section: "api".into() }]
        );
    }

    #[test]
    fn template_variables_are_unique_and_ordered() {
        let vars = template_variables("{{b}} {{a}} {{ b }} {{}}");
        assert_eq!(vars, ["b", "a"]);
    }

    #[test]
    fn check_template_classifies_missing() {
        let s = ContextStore::from_yaml("", "application:\n  version: 1\n").unwrap();
        let report = s.check_template(
            "{{application.name}} {{application.version}} {{database.port}} {{misc.thing}}",
        );
        assert_eq!(report.missing_required, ["application.name"]);
        assert_eq!(report.missing_optional, ["database.port", "misc.thing"]);
        assert_eq!(report.suggestions.get("database.port").map(String::as_str), Some("5432"));
        assert!(!report.suggestions.contains_key("misc.thing"));
        assert_eq!(report.resolved_count(), 1);
        assert!(!report.is_valid());
    }

    #[test]
    fn render_strict_and_lenient() {
        let s = ContextStore::from_yaml("", "application:\n  description: d\n").unwrap();
        let strict = s.render("{{application.name}} on {{api.port}}", true);
        assert!(!strict.success);
        assert_eq!(strict.content, "{{application.name}} on {{api.port}}");

        let lenient = s.render("{{application.description}} on {{api.port}}", false);
        assert!(lenient.success);
        assert_eq!(lenient.content, "d on 3000");
    }

    #[test]
    fn export_formats() {
        let s = ContextStore::from_yaml("", "application:\n  name: MyApp\n  debug: false\n").unwrap();
        let yaml = s.export(ExportFormat::Yaml).unwrap();
        assert!(yaml.contains("name: MyApp"));
        let json: serde_json::Value = serde_json::from_str(&s.export(ExportFormat::Json).unwrap()).unwrap();
        assert_eq!(json["application"]["debug"], serde_json::json!(false));
        assert_eq!("yml".parse::<ExportFormat>().unwrap(), ExportFormat::Yaml);
        assert!("toml".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn save_and_reload_feature_layer() {
        let dir = TempDir::new().unwrap();
        let feature = dir.path().join(".sam/001_auth");
        std::fs::create_dir_all(&feature).unwrap();
        std::fs::write(dir.path().join("CONTEXT.yaml"), GLOBAL).unwrap();

        let mut s = ContextStore::for_feature(&feature, None).unwrap();
        assert_eq!(s.get("database.port"), Some(&ContextValue::integer(5432)));
        s.set("database.port", ContextValue::parse("3306")).unwrap();
        let path = s.layer_path(LayerKind::Feature).unwrap().to_path_buf();
        s.save_feature_layer(&path).unwrap();

        let written = std::fs::read_to_string(feature.join("CONTEXT.yaml")).unwrap();
        assert!(written.contains("3306"));
        assert!(!written.contains("db.internal"));

        std::fs::write(dir.path().join("CONTEXT.yaml"), "database:\n  host: other\n").unwrap();
        s.reload().unwrap();
        assert_eq!(s.get("database.host"), Some(&ContextValue::string("other")));
        assert_eq!(s.get("database.port"), Some(&ContextValue::integer(3306)));
    }

    #[test]
    fn dotted_keys_are_reported_and_not_addressable() {
        let s = ContextStore::from_yaml("", "\"a.b\": 1\na:\n  c: 2\n\"\": 3\n").unwrap();
        let flat = s.flatten();
        assert_eq!(flat.keys().collect::<Vec<_>>(), ["a.c"]);
        assert!(s.get("a.b").is_none());
        assert_eq!(s.resolve_string("{{a.b}} {{a.c}}"), "{{a.b}} 2");

        let details: Vec<String> = s
            .validate()
            .into_iter()
            .filter_map(|p| match p {
                ContextProblem::InvalidLayer { detail, .. } => Some(detail),
                _ => None,
            })
            .collect();
        assert!(details.iter().any(|d| d.contains("`a.b`")));
        assert!(details.iter().any(|d| d.contains("``")));
    }

    #[test]
    fn layers_stay_separate_from_merged_view() {
        let mut s = ContextStore::from_yaml(GLOBAL, "").unwrap();
        s.set("cache.ttl", ContextValue::integer(60)).unwrap();
        assert!(s.layer(LayerKind::Global).get("cache").is_none());
        assert!(s.layer(LayerKind::Feature).contains_key("cache"));
        assert!(s.merged().contains_key("database"));
        assert!(s.layer_path(LayerKind::Feature).is_none());
    }

    #[test]
    fn parse_values() {
        assert_eq!(ContextValue::parse("true"), ContextValue::Scalar(Scalar::Bool(true)));
        assert_eq!(ContextValue::parse("hello world"), ContextValue::string("hello world"));
        assert!(matches!(ContextValue::parse("[1, 2]"), ContextValue::List(_)));
    }
}
