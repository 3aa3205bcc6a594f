use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::sync::{Mutex, RwLock};

use crate::errors::{StudioError, StudioResult};

/// Shared slot holding the API key attached to outgoing requests.
#[derive(Debug, Clone, Default)]
pub struct ApiKeySlot {
    inner: Arc<RwLock<Option<String>>>,
}

impl ApiKeySlot {
    pub fn new(initial: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial.filter(|k| !k.trim().is_empty()))),
        }
    }

    pub async fn get(&self) -> Option<String> {
        self.inner.read().await.clone()
    }

    pub async fn set(&self, key: String) {
        *self.inner.write().await = Some(key);
    }

    pub async fn is_set(&self) -> bool {
        self.inner.read().await.is_some()
    }
}

/// Host-provided interactive credential picker.
///
/// When none is injected, the orchestrator's auth-recovery path is disabled.
#[async_trait]
pub trait CredentialPicker: Send + Sync {
    async fn has_selected_key(&self) -> bool;

    /// Lets the user choose a key. Errors mean the user cancelled or the picker failed.
    async fn open_select_key(&self) -> StudioResult<()>;
}

/// Walks a fixed list of candidate keys, one per selection.
pub struct KeyRotation {
    slot: ApiKeySlot,
    candidates: Vec<String>,
    next: Mutex<usize>,
}

impl KeyRotation {
    pub fn new(slot: ApiKeySlot, candidates: Vec<String>) -> Self {
        Self {
            slot,
            candidates: candidates.into_iter().filter(|k| !k.trim().is_empty()).collect(),
            next: Mutex::new(0),
        }
    }
}

#[async_trait]
impl CredentialPicker for KeyRotation {
    async fn has_selected_key(&self) -> bool {
        self.slot.is_set().await
    }

    async fn open_select_key(&self) -> StudioResult<()> {
        let mut next = self.next.lock().await;
        let current = self.slot.get().await;
        // Skip the candidate already in use so a retry actually changes keys.
        while let Some(candidate) = self.candidates.get(*next) {
            *next += 1;
            if current.as_deref() != Some(candidate.as_str()) {
                tracing::info!(index = *next - 1, "rotating to next candidate API key");
                self.slot.set(candidate.clone()).await;
                return Ok(());
            }
        }
        Err(StudioError::KeySelection("no further API keys to try".into()))
    }
}

/// Line reader shared by every consumer of terminal input.
///
/// Lock it for one line at a time so the key picker can read in between.
pub type InputLines = Arc<Mutex<Lines<Box<dyn AsyncBufRead + Send + Unpin>>>>;

pub fn input_lines(reader: Box<dyn AsyncBufRead + Send + Unpin>) -> InputLines {
    Arc::new(Mutex::new(reader.lines()))
}

pub fn stdin_lines() -> InputLines {
    input_lines(Box::new(BufReader::new(tokio::io::stdin())))
}

/// Prompts for a key on the terminal.
pub struct TerminalKeyPicker {
    slot: ApiKeySlot,
    input: InputLines,
}

impl TerminalKeyPicker {
    pub fn new(slot: ApiKeySlot, input: InputLines) -> Self {
        Self { slot, input }
    }
}

#[async_trait]
impl CredentialPicker for TerminalKeyPicker {
    async fn has_selected_key(&self) -> bool {
        self.slot.is_set().await
    }

    async fn open_select_key(&self) -> StudioResult<()> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(b"API key (empty line to cancel): ")
            .await?;
        stdout.flush().await?;

        let line = self.input.lock().await.next_line().await?;
        let key = line.as_deref().map(str::trim).unwrap_or_default();
        if key.is_empty() {
            return Err(StudioError::KeySelection("key selection cancelled".into()));
        }
        self.slot.set(key.to_string()).await;
        tracing::info!("API key selected from terminal");
        Ok(())
    }
}
