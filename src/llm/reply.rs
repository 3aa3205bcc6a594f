use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::store::types::ProjectFile;

/// Structured answer the project builder asks the model for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectReply {
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub files: Vec<ReplyFile>,
}

/// File as the model returns it; older prompts used `name` instead of `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFile {
    #[serde(alias = "name")]
    pub path: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub language: Option<String>,
}

impl From<ReplyFile> for ProjectFile {
    fn from(f: ReplyFile) -> Self {
        ProjectFile {
            path: f.path,
            content: f.content,
            language: f.language,
        }
    }
}

impl ProjectReply {
    pub fn into_files(self) -> Vec<ProjectFile> {
        self.files.into_iter().map(ProjectFile::from).collect()
    }
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[a-zA-Z]*\s*\n?(.*?)```").expect("valid fence regex"))
}

/// Removes a surrounding markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    match fence_re().captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => text.trim(),
    }
}

/// Slice from the first `{` to the last `}`.
pub fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parses a project-builder reply, repairing the usual model formatting slips.
/// A reply that cannot be parsed becomes an explanation-only answer.
pub fn parse_project_reply(raw: &str) -> ProjectReply {
    let unfenced = strip_code_fences(raw);
    let candidate = outer_braces(unfenced).or_else(|| outer_braces(raw));

    if let Some(json) = candidate {
        match serde_json::from_str::<ProjectReply>(json) {
            Ok(reply) => return reply,
            Err(e) => tracing::debug!(error = %e, "project reply is not valid JSON, using raw text"),
        }
    }

    ProjectReply {
        explanation: raw.trim().to_string(),
        files: Vec::new(),
    }
}
