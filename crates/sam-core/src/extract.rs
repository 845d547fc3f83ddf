//! Phase and task extraction from the `# Implementation Tasks` region.
//!
//! Lines are classified once and fed through a small state machine; phases are
//! emitted in discovery order and their `content` slices partition the region
//! (together with the lead-in before the first phase heading).

use crate::error::{Result, SamError};
use crate::section::{parse_heading, source_lines, FenceTracker, SourceLine};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Title of the level-1 heading that opens the task region.
pub const TASK_REGION_TITLE: &str = "Implementation Tasks";

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

static PHASE_RE: OnceLock<Regex> = OnceLock::new();
static TASK_RE: OnceLock<Regex> = OnceLock::new();
static STORY_RE: OnceLock<Regex> = OnceLock::new();
static DEPENDS_RE: OnceLock<Regex> = OnceLock::new();
static COMPLETED_RE: OnceLock<Regex> = OnceLock::new();
static CRITERIA_LABEL_RE: OnceLock<Regex> = OnceLock::new();
static TASK_ID_RE: OnceLock<Regex> = OnceLock::new();

fn phase_re() -> &'static Regex {
    PHASE_RE.get_or_init(|| Regex::new(r"^Phase\s+([0-9A-Za-z][\w.\-]*)\s*:\s*(.*)$").unwrap())
}

fn task_re() -> &'static Regex {
    TASK_RE.get_or_init(|| {
        Regex::new(r"^(\s*)[-*+]\s+\[([ xX])\]\s+(\*\*)?(\d+(?:\.\d+)*)\.?(?:\s+(.*))?$").unwrap()
    })
}

fn story_re() -> &'static Regex {
    STORY_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:maps\s+to|story)\s*:\s*(?:story\s+)?([^\s,;)]+)").unwrap()
    })
}

fn depends_re() -> &'static Regex {
    DEPENDS_RE.get_or_init(|| Regex::new(r"(?i)\bdepends\s+on\s*:\s*(.+)$").unwrap())
}

fn completed_re() -> &'static Regex {
    COMPLETED_RE.get_or_init(|| Regex::new(r"(?i)\bcompleted\s*:\s*([^\s,;)]+)").unwrap())
}

fn criteria_label_re() -> &'static Regex {
    CRITERIA_LABEL_RE
        .get_or_init(|| Regex::new(r"(?i)^acceptance\s+criteria\s*:?\s*(.*)$").unwrap())
}

fn task_id_re() -> &'static Regex {
    TASK_ID_RE.get_or_init(|| Regex::new(r"\d+(?:\.\d+)*").unwrap())
}

// ---------------------------------------------------------------------------
// Extracted model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub task_id: String,
    pub title: String,
    pub completed: bool,
    pub story_mapping: Option<String>,
    pub acceptance_criteria: Vec<String>,
    pub dependencies: Vec<String>,
    pub completion_note: Option<String>,
    pub parent_task_id: Option<String>,
    /// Checklist line (0-based).
    pub line_start: usize,
    /// Last line of the task's scope (0-based, inclusive).
    pub line_end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phase {
    pub phase_id: String,
    pub phase_name: String,
    /// Phase heading line (0-based).
    pub line_start: usize,
    /// Heading through the line before the next phase heading or end of region.
    pub content: String,
    pub tasks: Vec<Task>,
}

impl Phase {
    pub fn completed_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.completed).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRegion {
    /// The `# Implementation Tasks` heading line (0-based).
    pub line_start: usize,
    /// Region text before the first phase heading, heading included.
    pub lead_in: String,
    pub phases: Vec<Phase>,
}

impl TaskRegion {
    /// The exact region text: lead-in followed by every phase's content.
    pub fn text(&self) -> String {
        let mut out = self.lead_in.clone();
        for p in &self.phases {
            out.push_str(&p.content);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extraction {
    /// Everything strictly before the task region (the whole text without one).
    pub main: String,
    pub region: Option<TaskRegion>,
}

impl Extraction {
    pub fn phases(&self) -> &[Phase] {
        self.region.as_ref().map(|r| r.phases.as_slice()).unwrap_or(&[])
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.phases().iter().flat_map(|p| p.tasks.iter())
    }

    /// Phase ids whose numeric value is lower than a phase discovered before them.
    ///
    /// Discovery order stays authoritative; this only reports the mismatch.
    /// Ids that are not dotted numbers are skipped.
    pub fn out_of_order_phases(&self) -> Vec<String> {
        let mut flagged = Vec::new();
        let mut highest: Option<Vec<u64>> = None;
        for phase in self.phases() {
            let Some(key) = numeric_key(&phase.phase_id) else {
                continue;
            };
            match &highest {
                Some(h) if key < *h => flagged.push(phase.phase_id.clone()),
                _ => highest = Some(key),
            }
        }
        flagged
    }
}

fn numeric_key(id: &str) -> Option<Vec<u64>> {
    id.split('.').map(|p| p.parse::<u64>().ok()).collect()
}

// ---------------------------------------------------------------------------
// Line classification
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TaskLine {
    task_id: String,
    title: String,
    completed: bool,
    inline: String,
}

#[derive(Debug)]
enum LineKind {
    RegionHeading,
    PhaseHeading { id: String, name: String },
    Heading,
    TaskItem(TaskLine),
    Fenced,
    Body,
}

fn classify(line: &str, fences: &mut FenceTracker) -> LineKind {
    if fences.observe(line) {
        return LineKind::Fenced;
    }
    if let Some((level, title)) = parse_heading(line) {
        if level == 1 && title == TASK_REGION_TITLE {
            return LineKind::RegionHeading;
        }
        if level == 2 {
            if let Some(caps) = phase_re().captures(title) {
                return LineKind::PhaseHeading {
                    id: caps[1].to_string(),
                    name: caps[2].trim().to_string(),
                };
            }
        }
        return LineKind::Heading;
    }
    match parse_task_line(line) {
        Some(task) => LineKind::TaskItem(task),
        None => LineKind::Body,
    }
}

fn parse_task_line(line: &str) -> Option<TaskLine> {
    let caps = task_re().captures(line)?;
    let indented = !caps[1].is_empty();
    let completed = !caps[2].trim().is_empty();
    let bold = caps.get(3).is_some();
    let task_id = caps[4].to_string();
    let rest = caps.get(5).map(|m| m.as_str()).unwrap_or("");

    // Without the bold id, only a top-level item with a dotted id is a task.
    // Nested checkboxes such as `- [ ] 401 returned` stay acceptance criteria.
    if !bold && (indented || !task_id.contains('.')) {
        return None;
    }

    let (title, inline) = if bold {
        match rest.find("**") {
            Some(i) => (rest[..i].trim(), rest[i + 2..].trim()),
            None => (rest.trim(), ""),
        }
    } else {
        let cut = [story_re(), depends_re(), completed_re()]
            .iter()
            .filter_map(|re| re.find(rest).map(|m| m.start()))
            .min();
        match cut {
            Some(i) => (
                rest[..i].trim_end_matches(|c: char| {
                    c.is_whitespace() || matches!(c, '(' | '-' | '|' | '—' | ',')
                }),
                rest[i..].trim(),
            ),
            None => (rest.trim(), ""),
        }
    };

    Some(TaskLine {
        task_id,
        title: title.to_string(),
        completed,
        inline: inline.to_string(),
    })
}

/// Strip bullet, checkbox and bold markers from a metadata line.
/// Returns the text and whether the line was a list item.
fn strip_list_markers(line: &str) -> (String, bool) {
    let mut text = line.trim();
    let mut is_item = false;
    for bullet in ["- ", "* ", "+ "] {
        if let Some(rest) = text.strip_prefix(bullet) {
            text = rest.trim_start();
            is_item = true;
            break;
        }
    }
    if !is_item {
        let digits = text.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 {
            if let Some(rest) = text[digits..].strip_prefix(". ") {
                text = rest.trim_start();
                is_item = true;
            }
        }
    }
    for checkbox in ["[ ] ", "[x] ", "[X] "] {
        if let Some(rest) = text.strip_prefix(checkbox) {
            text = rest.trim_start();
            break;
        }
    }
    (text.replace("**", "").trim().to_string(), is_item)
}

fn apply_inline_metadata(task: &mut Task, text: &str) -> bool {
    let mut matched = false;
    if let Some(caps) = story_re().captures(text) {
        if task.story_mapping.is_none() {
            task.story_mapping = Some(caps[1].to_string());
        }
        matched = true;
    }
    if let Some(caps) = completed_re().captures(text) {
        if task.completion_note.is_none() {
            task.completion_note = Some(caps[1].to_string());
        }
        matched = true;
    }
    if let Some(caps) = depends_re().captures(text) {
        for id in task_id_re().find_iter(&caps[1]) {
            let id = id.as_str().to_string();
            if !task.dependencies.contains(&id) {
                task.dependencies.push(id);
            }
        }
        matched = true;
    }
    matched
}

fn apply_body_line(task: &mut Task, line: &str) {
    let (text, is_item) = strip_list_markers(line);
    if text.is_empty() {
        return;
    }
    if let Some(caps) = criteria_label_re().captures(&text) {
        let inline = caps[1].trim();
        if !inline.is_empty() {
            task.acceptance_criteria.push(inline.to_string());
        }
        return;
    }
    if apply_inline_metadata(task, &text) {
        return;
    }
    if is_item {
        task.acceptance_criteria.push(text);
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Before the region heading, or in the region before its first phase.
    OutsideRegion { in_region: bool },
    InPhase,
    InTask,
}

struct Scanner<'a> {
    text: &'a str,
    lines: Vec<SourceLine<'a>>,
    state: ScanState,
    region_start: Option<usize>,
    phases: Vec<(Phase, usize)>,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            lines: source_lines(text),
            state: ScanState::OutsideRegion { in_region: false },
            region_start: None,
            phases: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Extraction> {
        let mut fences = FenceTracker::default();
        for i in 0..self.lines.len() {
            let line = self.lines[i];
            let kind = classify(line.text(), &mut fences);
            self.state = self.step(self.state, kind, line)?;
        }
        if self.state == ScanState::InTask {
            self.close_task(self.lines.len().saturating_sub(1));
        }
        Ok(self.finish())
    }

    fn step(&mut self, state: ScanState, kind: LineKind, line: SourceLine<'a>) -> Result<ScanState> {
        use ScanState::*;
        let next = match (state, kind) {
            (OutsideRegion { in_region: false }, LineKind::RegionHeading) => {
                self.region_start = Some(line.index);
                OutsideRegion { in_region: true }
            }
            (OutsideRegion { in_region: false }, _) => state,

            (_, LineKind::PhaseHeading { id, name }) => {
                if name.is_empty() {
                    return Err(SamError::MalformedSpec {
                        line: line.index + 1,
                        text: line.text().to_string(),
                        reason: "phase heading has no name".to_string(),
                    });
                }
                if state == InTask {
                    self.close_task(line.index - 1);
                }
                self.open_phase(id, name, line);
                InPhase
            }
            (OutsideRegion { .. }, _) => state,

            (InPhase | InTask, LineKind::TaskItem(task)) => {
                if state == InTask {
                    self.close_task(line.index - 1);
                }
                self.open_task(task, line.index);
                InTask
            }
            (InTask, LineKind::Heading | LineKind::RegionHeading) => {
                self.close_task(line.index - 1);
                InPhase
            }
            (InTask, LineKind::Body) => {
                if let Some(task) = self.current_task() {
                    apply_body_line(task, line.text());
                }
                InTask
            }
            (InPhase | InTask, _) => state,
        };
        Ok(next)
    }

    fn open_phase(&mut self, phase_id: String, phase_name: String, line: SourceLine<'a>) {
        tracing::debug!(phase = %phase_id, line = line.index + 1, "phase discovered");
        self.phases.push((
            Phase {
                phase_id,
                phase_name,
                line_start: line.index,
                content: String::new(),
                tasks: Vec::new(),
            },
            line.start,
        ));
    }

    fn open_task(&mut self, line: TaskLine, index: usize) {
        let Some((phase, _)) = self.phases.last_mut() else {
            return;
        };
        let parent_task_id = phase
            .tasks
            .iter()
            .rev()
            .find(|t| line.task_id.starts_with(&format!("{}.", t.task_id)))
            .map(|t| t.task_id.clone());
        let mut task = Task {
            task_id: line.task_id,
            title: line.title,
            completed: line.completed,
            story_mapping: None,
            acceptance_criteria: Vec::new(),
            dependencies: Vec::new(),
            completion_note: None,
            parent_task_id,
            line_start: index,
            line_end: index,
        };
        apply_inline_metadata(&mut task, &line.inline);
        phase.tasks.push(task);
    }

    fn current_task(&mut self) -> Option<&mut Task> {
        self.phases.last_mut().and_then(|(p, _)| p.tasks.last_mut())
    }

    fn close_task(&mut self, line_end: usize) {
        if let Some(task) = self.current_task() {
            task.line_end = line_end.max(task.line_start);
        }
    }

    fn finish(self) -> Extraction {
        let text = self.text;
        let Some(region_line) = self.region_start else {
            return Extraction {
                main: text.to_string(),
                region: None,
            };
        };
        let region_byte = self.lines[region_line].start;

        let starts: Vec<usize> = self.phases.iter().map(|(_, start)| *start).collect();
        let lead_in_end = starts.first().copied().unwrap_or(text.len());
        let phases = self
            .phases
            .into_iter()
            .enumerate()
            .map(|(i, (mut phase, start))| {
                let end = starts.get(i + 1).copied().unwrap_or(text.len());
                phase.content = text[start..end].to_string();
                phase
            })
            .collect();

        Extraction {
            main: text[..region_byte].to_string(),
            region: Some(TaskRegion {
                line_start: region_line,
                lead_in: text[region_byte..lead_in_end].to_string(),
                phases,
            }),
        }
    }
}

/// Extract the main content, phases and tasks from a specification document.
///
/// A document without an `# Implementation Tasks` heading is all main content
/// with no phases. Fails with `MalformedSpec` on a phase heading with an empty
/// name; no partial result is returned.
pub fn extract(text: &str) -> Result<Extraction> {
    let extraction = Scanner::new(text).run()?;
    let flagged = extraction.out_of_order_phases();
    if !flagged.is_empty() {
        tracing::warn!(
            phases = ?flagged,
            "phase ids are not in numeric order; keeping discovery order"
        );
    }
    Ok(extraction)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
