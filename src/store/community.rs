use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::errors::{StudioError, StudioResult};
use crate::store::kv::{KeyValueExt, KeyValueStore};
use crate::store::projects::ProjectStore;
use crate::store::types::{
    next_id, now_millis, CommunityProject, CommunityStats, ProjectFile, SavedProject,
};

/// Projects published from this profile.
pub const COMMUNITY_PROJECTS_KEY: &str = "community_projects";
/// Per-project interaction deltas, keyed by community project id.
pub const COMMUNITY_STATS_KEY: &str = "community_stats";

/// Loads the showcase projects shipped with the application.
pub fn load_base_catalogue() -> StudioResult<Vec<CommunityProject>> {
    let raw = include_str!("../../prompts/community/catalogue.json");
    Ok(serde_json::from_str(raw)?)
}

/// Community projects already viewed in the current session.
///
/// Owned by the caller's session, so a fresh session counts views again.
#[derive(Debug, Default, Clone)]
pub struct ViewedSet(HashSet<String>);

impl ViewedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time `id` is seen.
    pub fn mark(&mut self, id: &str) -> bool {
        self.0.insert(id.to_string())
    }
}

/// Showcase of community projects: a fixed base catalogue plus locally
/// published projects, with counters stored as deltas over the base counts.
#[derive(Clone)]
pub struct CommunityBoard {
    kv: Arc<dyn KeyValueStore>,
    base: Vec<CommunityProject>,
}

impl CommunityBoard {
    pub fn new(kv: Arc<dyn KeyValueStore>, base: Vec<CommunityProject>) -> Self {
        Self { kv, base }
    }

    fn published(&self) -> StudioResult<Vec<CommunityProject>> {
        Ok(self.kv.get_json(COMMUNITY_PROJECTS_KEY)?.unwrap_or_default())
    }

    fn all_stats(&self) -> StudioResult<HashMap<String, CommunityStats>> {
        Ok(self.kv.get_json(COMMUNITY_STATS_KEY)?.unwrap_or_default())
    }

    fn update_stats(&self, id: &str, f: impl FnOnce(&mut CommunityStats)) -> StudioResult<CommunityStats> {
        let mut stats = self.all_stats()?;
        let entry = stats.entry(id.to_string()).or_default();
        f(entry);
        let updated = entry.clone();
        self.kv.set_json(COMMUNITY_STATS_KEY, &stats)?;
        Ok(updated)
    }

    fn find_raw(&self, id: &str) -> StudioResult<CommunityProject> {
        self.published()?
            .into_iter()
            .chain(self.base.iter().cloned())
            .find(|p| p.id == id)
            .ok_or_else(|| StudioError::NotFound(format!("community project '{id}'")))
    }

    /// Stored deltas for one project.
    pub fn stats_for(&self, id: &str) -> StudioResult<CommunityStats> {
        Ok(self.all_stats()?.remove(id).unwrap_or_default())
    }

    pub fn get(&self, id: &str) -> StudioResult<CommunityProject> {
        let mut project = self.find_raw(id)?;
        apply(&mut project, &self.stats_for(id)?);
        Ok(project)
    }

    /// Featured first, then by likes.
    pub fn list(&self) -> StudioResult<Vec<CommunityProject>> {
        let stats = self.all_stats()?;
        let mut projects: Vec<CommunityProject> = self
            .published()?
            .into_iter()
            .chain(self.base.iter().cloned())
            .collect();
        for p in &mut projects {
            if let Some(s) = stats.get(&p.id) {
                apply(p, s);
            }
        }
        projects.sort_by(|a, b| b.featured.cmp(&a.featured).then(b.likes.cmp(&a.likes)));
        Ok(projects)
    }

    /// Likes or unlikes; returns the project with updated counters and the new liked state.
    pub fn toggle_like(&self, id: &str) -> StudioResult<(CommunityProject, bool)> {
        let mut project = self.find_raw(id)?;
        let stats = self.update_stats(id, |s| {
            if s.is_liked {
                s.likes -= 1;
                s.is_liked = false;
            } else {
                s.likes += 1;
                s.is_liked = true;
            }
        })?;
        apply(&mut project, &stats);
        tracing::debug!(project_id = id, liked = stats.is_liked, likes = project.likes, "like toggled");
        Ok((project, stats.is_liked))
    }

    /// Counts a view at most once per session. Returns whether it was counted.
    pub fn record_view(&self, id: &str, viewed: &mut ViewedSet) -> StudioResult<bool> {
        self.find_raw(id)?;
        if !viewed.mark(id) {
            return Ok(false);
        }
        self.update_stats(id, |s| s.views += 1)?;
        Ok(true)
    }

    /// Copies a community project into the user's projects and marks it as
    /// the project to open next.
    pub fn remix(&self, id: &str, projects: &ProjectStore) -> StudioResult<SavedProject> {
        let source = self.find_raw(id)?;
        let mut remix = SavedProject::new(format!("{} (Remix)", source.name), source.stack.clone());
        remix.files = source.files.clone();
        remix.remixed_from = Some(source.id.clone());

        projects.save(&remix)?;
        projects.set_active_project(&remix.id)?;
        self.update_stats(id, |s| s.remixes += 1)?;
        tracing::info!(source = id, project_id = %remix.id, "community project remixed");
        Ok(remix)
    }

    /// Publishes a saved project. A remix whose files are unchanged from
    /// its source is rejected.
    pub fn publish(
        &self,
        project: &SavedProject,
        description: &str,
        author: Option<&str>,
    ) -> StudioResult<CommunityProject> {
        if project.files.is_empty() {
            return Err(StudioError::Publish("project has no files".into()));
        }
        if let Some(source_id) = &project.remixed_from {
            if let Ok(source) = self.find_raw(source_id) {
                if !significantly_changed(&source, project) {
                    return Err(StudioError::Publish(
                        "remix has no changes from the original project".into(),
                    ));
                }
            }
        }

        let published = CommunityProject {
            id: next_id(),
            project_id: project.id.clone(),
            name: project.name.clone(),
            description: description.to_string(),
            stack: project.stack.clone(),
            files: project.files.clone(),
            likes: 0,
            views: 0,
            remixes: 0,
            published_at: now_millis(),
            featured: false,
            author: author.map(str::to_string),
        };
        let mut all = self.published()?;
        all.push(published.clone());
        self.kv.set_json(COMMUNITY_PROJECTS_KEY, &all)?;
        tracing::info!(project_id = %project.id, community_id = %published.id, "project published");
        Ok(published)
    }

    /// Removes a locally published project. Base catalogue entries cannot be removed.
    pub fn unpublish(&self, id: &str) -> StudioResult<bool> {
        let mut all = self.published()?;
        let before = all.len();
        all.retain(|p| p.id != id);
        if all.len() == before {
            return Ok(false);
        }
        self.kv.set_json(COMMUNITY_PROJECTS_KEY, &all)?;
        let mut stats = self.all_stats()?;
        if stats.remove(id).is_some() {
            self.kv.set_json(COMMUNITY_STATS_KEY, &stats)?;
        }
        Ok(true)
    }
}

fn apply(project: &mut CommunityProject, stats: &CommunityStats) {
    project.likes += stats.likes;
    project.views += stats.views;
    project.remixes += stats.remixes;
}

/// A remix counts as changed when a file was added or removed, or any file's
/// content differs from the file at the same path in the source. File order
/// is ignored.
fn significantly_changed(source: &CommunityProject, remix: &SavedProject) -> bool {
    if source.files.len() != remix.files.len() {
        return true;
    }
    let by_path = |files: &[ProjectFile]| -> HashMap<String, String> {
        files.iter().map(|f| (f.path.clone(), f.content.clone())).collect()
    };
    by_path(&source.files) != by_path(&remix.files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::MemoryStore;

    fn file(path: &str, content: &str) -> ProjectFile {
        ProjectFile {
            path: path.into(),
            content: content.into(),
            language: None,
        }
    }

    fn base_project(id: &str, likes: i64, featured: bool) -> CommunityProject {
        CommunityProject {
            id: id.into(),
            project_id: format!("src-{id}"),
            name: format!("Project {id}"),
            description: "demo".into(),
            stack: "react".into(),
            files: vec![file("index.html", "<h1>hi</h1>"), file("app.js", "run()")],
            likes,
            views: 100,
            remixes: 3,
            published_at: 0,
            featured,
            author: None,
        }
    }

    fn board() -> (CommunityBoard, ProjectStore) {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let board = CommunityBoard::new(
            kv.clone(),
            vec![base_project("a", 10, false), base_project("b", 50, false), base_project("f", 1, true)],
        );
        (board, ProjectStore::new(kv, None))
    }

    #[test]
    fn like_then_unlike_restores_counter() {
        let (board, _) = board();
        let (liked, is_liked) = board.toggle_like("a").unwrap();
        assert!(is_liked);
        assert_eq!(liked.likes, 11);

        let (unliked, is_liked) = board.toggle_like("a").unwrap();
        assert!(!is_liked);
        assert_eq!(unliked.likes, 10);
        assert!(!board.stats_for("a").unwrap().is_liked);
    }

    #[test]
    fn views_count_once_per_session() {
        let (board, _) = board();
        let mut session = ViewedSet::new();
        assert!(board.record_view("a", &mut session).unwrap());
        assert!(!board.record_view("a", &mut session).unwrap());
        assert_eq!(board.get("a").unwrap().views, 101);

        let mut next_session = ViewedSet::new();
        assert!(board.record_view("a", &mut next_session).unwrap());
        assert_eq!(board.get("a").unwrap().views, 102);
    }

    #[test]
    fn listing_puts_featured_first_then_likes() {
        let (board, _) = board();
        let ids: Vec<String> = board.list().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["f", "b", "a"]);
    }

    #[test]
    fn remix_copies_files_and_sets_handoff() {
        let (board, projects) = board();
        let remix = board.remix("b", &projects).unwrap();
        assert_eq!(remix.name, "Project b (Remix)");
        assert_eq!(remix.remixed_from.as_deref(), Some("b"));
        assert_eq!(projects.get(&remix.id).unwrap().unwrap().files.len(), 2);
        assert_eq!(projects.take_active_project().unwrap().as_deref(), Some(remix.id.as_str()));
        assert_eq!(board.get("b").unwrap().remixes, 4);
    }

    #[test]
    fn unmodified_remix_cannot_be_published() {
        let (board, projects) = board();
        let mut remix = board.remix("a", &projects).unwrap();

        // Same files in a different order are still unchanged.
        remix.files.reverse();
        let err = board.publish(&remix, "mine", None).unwrap_err();
        assert!(matches!(err, StudioError::Publish(_)));

        remix.files[0].content.push_str("// tweak");
        let published = board.publish(&remix, "mine", Some("dev@example.com")).unwrap();
        assert_eq!(published.project_id, remix.id);
        assert_eq!(published.likes, 0);
    }

    #[test]
    fn adding_a_file_counts_as_change() {
        let (board, projects) = board();
        let mut remix = board.remix("a", &projects).unwrap();
        remix.files.push(file("style.css", "body{}"));
        assert!(board.publish(&remix, "more", None).is_ok());
    }

    #[test]
    fn publish_and_unpublish() {
        let (board, _) = board();
        let mut project = SavedProject::new("Weather", "node");
        project.files.push(file("server.js", "listen()"));
        let published = board.publish(&project, "weather app", None).unwrap();
        assert!(board.list().unwrap().iter().any(|p| p.id == published.id));

        board.toggle_like(&published.id).unwrap();
        assert!(board.unpublish(&published.id).unwrap());
        assert!(!board.unpublish(&published.id).unwrap());
        assert!(board.get(&published.id).is_err());
        assert_eq!(board.stats_for(&published.id).unwrap(), CommunityStats::default());
    }

    #[test]
    fn empty_project_cannot_be_published() {
        let (board, _) = board();
        let project = SavedProject::new("Empty", "react");
        assert!(matches!(
            board.publish(&project, "", None).unwrap_err(),
            StudioError::Publish(_)
        ));
    }

    #[test]
    fn unknown_project_is_not_found() {
        let (board, _) = board();
        assert!(matches!(board.toggle_like("zzz").unwrap_err(), StudioError::NotFound(_)));
        let mut viewed = ViewedSet::new();
        assert!(board.record_view("zzz", &mut viewed).is_err());
    }

    #[test]
    fn duplicated_path_counts_as_change() {
        let (board, projects) = board();
        let mut remix = board.remix("a", &projects).unwrap();
        // Same count, same content for index.html, but app.js is gone.
        remix.files[1] = remix.files[0].clone();
        assert!(board.publish(&remix, "dup", None).is_ok());
    }

    #[test]
    fn shipped_catalogue_backs_the_board() {
        let catalogue = load_base_catalogue().unwrap();
        assert!(!catalogue.is_empty());
        assert!(catalogue.iter().all(|p| !p.files.is_empty()));

        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let board = CommunityBoard::new(kv, catalogue);
        let listed = board.list().unwrap();
        assert!(listed[0].featured);
        assert!(!board.unpublish(&listed[0].id).unwrap());
    }
}
