use std::sync::Arc;

use crate::errors::{StudioError, StudioResult};
use crate::store::kv::{scoped_key, KeyValueExt, KeyValueStore};
use crate::store::types::{next_id, now_millis, ProjectFile, ProjectSnapshot, SavedProject};

pub const PROJECTS_KEY: &str = "saved_projects";
/// Handoff: project the builder screen should open next.
pub const ACTIVE_PROJECT_KEY: &str = "active_project_id";
/// Handoff: prompt typed elsewhere, to be submitted by the builder.
pub const PENDING_PROMPT_KEY: &str = "pending_prompt";

/// Saved projects, optionally scoped to one user.
#[derive(Clone)]
pub struct ProjectStore {
    kv: Arc<dyn KeyValueStore>,
    key: String,
}

impl ProjectStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, user_email: Option<&str>) -> Self {
        Self {
            kv,
            key: scoped_key(PROJECTS_KEY, user_email),
        }
    }

    fn load(&self) -> StudioResult<Vec<SavedProject>> {
        Ok(self.kv.get_json(&self.key)?.unwrap_or_default())
    }

    fn store(&self, projects: &[SavedProject]) -> StudioResult<()> {
        self.kv.set_json(&self.key, projects)
    }

    fn update<R>(&self, id: &str, f: impl FnOnce(&mut SavedProject) -> StudioResult<R>) -> StudioResult<R> {
        let mut projects = self.load()?;
        let project = projects
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| StudioError::NotFound(format!("project '{id}'")))?;
        let out = f(project)?;
        self.store(&projects)?;
        Ok(out)
    }

    /// Most recently modified first.
    pub fn list(&self) -> StudioResult<Vec<SavedProject>> {
        let mut projects = self.load()?;
        projects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(projects)
    }

    pub fn get(&self, id: &str) -> StudioResult<Option<SavedProject>> {
        Ok(self.load()?.into_iter().find(|p| p.id == id))
    }

    /// Inserts or replaces by id.
    pub fn save(&self, project: &SavedProject) -> StudioResult<()> {
        let mut projects = self.load()?;
        match projects.iter_mut().find(|p| p.id == project.id) {
            Some(existing) => *existing = project.clone(),
            None => projects.push(project.clone()),
        }
        self.store(&projects)?;
        tracing::debug!(project_id = %project.id, files = project.files.len(), "project saved");
        Ok(())
    }

    pub fn delete(&self, id: &str) -> StudioResult<bool> {
        let mut projects = self.load()?;
        let before = projects.len();
        projects.retain(|p| p.id != id);
        let removed = projects.len() != before;
        if removed {
            self.store(&projects)?;
        }
        Ok(removed)
    }

    /// Adds generated files, replacing any existing file at the same path.
    pub fn upsert_files(&self, id: &str, files: Vec<ProjectFile>) -> StudioResult<SavedProject> {
        self.update(id, |project| {
            for file in files {
                match project.files.iter_mut().find(|f| f.path == file.path) {
                    Some(existing) => *existing = file,
                    None => project.files.push(file),
                }
            }
            project.last_modified = now_millis();
            Ok(project.clone())
        })
    }

    pub fn take_snapshot(&self, id: &str, label: &str) -> StudioResult<ProjectSnapshot> {
        self.update(id, |project| {
            let snapshot = ProjectSnapshot {
                id: next_id(),
                label: label.to_string(),
                created_at: now_millis(),
                files: project.files.clone(),
            };
            project.snapshots.push(snapshot.clone());
            tracing::debug!(project_id = %project.id, snapshot_id = %snapshot.id, "snapshot taken");
            Ok(snapshot)
        })
    }

    /// Replaces the project's files with a snapshot's. Snapshots are kept.
    pub fn restore_snapshot(&self, id: &str, snapshot_id: &str) -> StudioResult<SavedProject> {
        self.update(id, |project| {
            let files = project
                .snapshots
                .iter()
                .find(|s| s.id == snapshot_id)
                .map(|s| s.files.clone())
                .ok_or_else(|| StudioError::NotFound(format!("snapshot '{snapshot_id}'")))?;
            project.files = files;
            project.last_modified = now_millis();
            Ok(project.clone())
        })
    }

    pub fn set_active_project(&self, id: &str) -> StudioResult<()> {
        self.kv.set(ACTIVE_PROJECT_KEY, id)
    }

    /// Reads and clears the active-project handoff.
    pub fn take_active_project(&self) -> StudioResult<Option<String>> {
        let id = self.kv.get(ACTIVE_PROJECT_KEY)?;
        if id.is_some() {
            self.kv.remove(ACTIVE_PROJECT_KEY)?;
        }
        Ok(id)
    }

    pub fn set_pending_prompt(&self, prompt: &str) -> StudioResult<()> {
        self.kv.set(PENDING_PROMPT_KEY, prompt)
    }

    /// Reads and clears the pending-prompt handoff.
    pub fn take_pending_prompt(&self) -> StudioResult<Option<String>> {
        let prompt = self.kv.get(PENDING_PROMPT_KEY)?;
        if prompt.is_some() {
            self.kv.remove(PENDING_PROMPT_KEY)?;
        }
        Ok(prompt)
    }
}
