use std::sync::Arc;

use crate::errors::{StudioError, StudioResult};
use crate::store::kv::{KeyValueExt, KeyValueStore};
use crate::store::types::{now_millis, ChatMessage, ChatSession, Role};

pub const SESSIONS_KEY: &str = "chat_sessions";

const TITLE_MAX_CHARS: usize = 40;

/// Chat sessions stored as one JSON list.
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn load(&self) -> StudioResult<Vec<ChatSession>> {
        Ok(self.kv.get_json(SESSIONS_KEY)?.unwrap_or_default())
    }

    fn store(&self, sessions: &[ChatSession]) -> StudioResult<()> {
        self.kv.set_json(SESSIONS_KEY, sessions)
    }

    /// Most recently updated first.
    pub fn list(&self) -> StudioResult<Vec<ChatSession>> {
        let mut sessions = self.load()?;
        sessions.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(sessions)
    }

    pub fn get(&self, id: &str) -> StudioResult<Option<ChatSession>> {
        Ok(self.load()?.into_iter().find(|s| s.id == id))
    }

    pub fn create(&self, model: &str) -> StudioResult<ChatSession> {
        let session = ChatSession::new(model);
        self.save(&session)?;
        tracing::debug!(session_id = %session.id, model, "chat session created");
        Ok(session)
    }

    /// Inserts or replaces by id.
    pub fn save(&self, session: &ChatSession) -> StudioResult<()> {
        let mut sessions = self.load()?;
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session.clone(),
            None => sessions.push(session.clone()),
        }
        self.store(&sessions)
    }

    /// Appends a message and bumps `last_updated`. The first user message
    /// names an untitled session.
    pub fn append_message(&self, session_id: &str, message: ChatMessage) -> StudioResult<ChatSession> {
        let mut sessions = self.load()?;
        let session = sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| StudioError::NotFound(format!("chat session '{session_id}'")))?;

        if session.messages.is_empty() && message.role == Role::User && !message.text.trim().is_empty() {
            session.title = title_from(&message.text);
        }
        session.messages.push(message);
        session.last_updated = now_millis();
        let updated = session.clone();
        self.store(&sessions)?;
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> StudioResult<bool> {
        let mut sessions = self.load()?;
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        let removed = sessions.len() != before;
        if removed {
            self.store(&sessions)?;
            tracing::debug!(session_id = id, "chat session deleted");
        }
        Ok(removed)
    }
}

fn title_from(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default().trim();
    if line.chars().count() <= TITLE_MAX_CHARS {
        return line.to_string();
    }
    let cut: String = line.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}...", cut.trim_end())
}
