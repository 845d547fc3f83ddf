use crate::error::Result;
use crate::io;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// ---------------------------------------------------------------------------
// ProjectType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectType {
    BaasFullstack,
    FrontendOnly,
    #[default]
    FullStack,
    StaticSite,
    #[serde(other)]
    Unknown,
}

impl ProjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectType::BaasFullstack => "baas-fullstack",
            ProjectType::FrontendOnly => "frontend-only",
            ProjectType::FullStack => "full-stack",
            ProjectType::StaticSite => "static-site",
            ProjectType::Unknown => "unknown",
        }
    }

    /// Expected phase ids for this kind of project.
    pub fn phase_structure(self) -> Vec<String> {
        let count = match self {
            ProjectType::FrontendOnly | ProjectType::StaticSite => 4,
            ProjectType::BaasFullstack | ProjectType::FullStack | ProjectType::Unknown => 5,
        };
        (1..=count).map(|n| n.to_string()).collect()
    }

    /// Read the declared project type for a feature.
    ///
    /// Priority: `metadata.project_type` in an existing `TASKS.json`, then a
    /// `project_type:` line in `FEATURE_DOCUMENTATION.md`, else `full-stack`.
    /// Unparseable files are skipped rather than reported.
    pub fn declared(feature_dir: &Path) -> Result<Self> {
        if let Some(data) = io::read_optional(&paths::tasks_path(feature_dir))? {
            match serde_json::from_str::<serde_json::Value>(&data) {
                Ok(value) => {
                    let declared = value
                        .pointer("/metadata/project_type")
                        .and_then(|v| v.as_str())
                        .and_then(|s| s.parse::<ProjectType>().ok());
                    if let Some(pt) = declared {
                        return Ok(pt);
                    }
                }
                Err(e) => tracing::debug!(error = %e, "ignoring unreadable TASKS.json"),
            }
        }

        if let Some(doc) = io::read_optional(&paths::feature_doc_path(feature_dir))? {
            for line in doc.lines() {
                let lower = line.to_lowercase();
                let Some(idx) = lower.find("project_type:") else {
                    continue;
                };
                let value = lower[idx + "project_type:".len()..]
                    .trim()
                    .trim_matches(|c| c == '`' || c == '"' || c == '*')
                    .trim();
                if let Ok(pt) = value.parse::<ProjectType>() {
                    if pt != ProjectType::Unknown {
                        return Ok(pt);
                    }
                }
            }
        }

        Ok(ProjectType::FullStack)
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProjectType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "baas-fullstack" => Ok(ProjectType::BaasFullstack),
            "frontend-only" => Ok(ProjectType::FrontendOnly),
            "full-stack" => Ok(ProjectType::FullStack),
            "static-site" => Ok(ProjectType::StaticSite),
            "unknown" => Ok(ProjectType::Unknown),
            other => Err(format!("unknown project type: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
