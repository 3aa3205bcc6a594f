use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ModelsConfig;

/// What a model is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Conversational chat.
    Chat,
    /// Project and code generation.
    Reasoning,
    Image,
    ImageEdit,
    Video,
    Speech,
    Transcription,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::Chat,
        Capability::Reasoning,
        Capability::Image,
        Capability::ImageEdit,
        Capability::Video,
        Capability::Speech,
        Capability::Transcription,
    ];

    pub fn default_model(self) -> &'static str {
        match self {
            Capability::Chat => "gemini-2.5-flash",
            Capability::Reasoning => "gemini-2.5-pro",
            Capability::Image => "imagen-4.0-generate-001",
            Capability::ImageEdit => "gemini-2.5-flash-image",
            Capability::Video => "veo-3.0-fast-generate-001",
            Capability::Speech => "gemini-2.5-flash-preview-tts",
            Capability::Transcription => "gemini-2.5-flash",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Chat => "chat",
            Capability::Reasoning => "reasoning",
            Capability::Image => "image",
            Capability::ImageEdit => "image_edit",
            Capability::Video => "video",
            Capability::Speech => "speech",
            Capability::Transcription => "transcription",
        };
        f.write_str(s)
    }
}

pub const DEFAULT_VOICE: &str = "Kore";

/// Capability-to-model mapping. Config overrides win over built-in defaults.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: BTreeMap<Capability, String>,
    voice: String,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::from_config(&ModelsConfig::default())
    }
}

impl ModelRegistry {
    pub fn from_config(cfg: &ModelsConfig) -> Self {
        let overrides = [
            (Capability::Chat, &cfg.chat),
            (Capability::Reasoning, &cfg.reasoning),
            (Capability::Image, &cfg.image),
            (Capability::ImageEdit, &cfg.image_edit),
            (Capability::Video, &cfg.video),
            (Capability::Speech, &cfg.speech),
            (Capability::Transcription, &cfg.transcription),
        ];
        let models = overrides
            .into_iter()
            .map(|(cap, model)| {
                let name = model
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| cap.default_model().to_string());
                (cap, name)
            })
            .collect();
        let voice = cfg.voice.clone().unwrap_or_else(|| DEFAULT_VOICE.to_string());
        Self { models, voice }
    }

    pub fn model_for(&self, capability: Capability) -> &str {
        self.models
            .get(&capability)
            .map(String::as_str)
            .unwrap_or_else(|| capability.default_model())
    }

    pub fn set_model(&mut self, capability: Capability, model: impl Into<String>) {
        let model = model.into();
        tracing::debug!(capability = %capability, model = %model, "model override");
        self.models.insert(capability, model);
    }

    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// Every capability with its resolved model name.
    pub fn list(&self) -> Vec<(Capability, String)> {
        Capability::ALL
            .iter()
            .map(|cap| (*cap, self.model_for(*cap).to_string()))
            .collect()
    }
}
