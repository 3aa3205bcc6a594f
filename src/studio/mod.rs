pub mod client;
pub mod prompts;

pub use client::{ChatOptions, ChatReply, GeneratedMedia, StudioClient};
