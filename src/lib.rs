pub mod config;
pub mod errors;
pub mod llm;
pub mod retry;
pub mod store;
pub mod studio;

use std::io::Write as _;
use std::sync::Arc;

use crate::config::{AppConfig, API_KEY_ENV};
use crate::errors::StudioResult;
use crate::llm::providers::HostedProvider;
use crate::llm::registry::{Capability, ModelRegistry};
use crate::llm::types::{StreamChunk, StreamChunkKind};
use crate::retry::{
    stdin_lines, ApiKeySlot, CredentialPicker, InputLines, KeyRotation, RetryOrchestrator,
    RetryPolicy, TerminalKeyPicker,
};
use crate::store::types::{ChatMessage, ChatSession, SavedProject};
use crate::store::{
    load_base_catalogue, parse_task_command, CommunityBoard, FileStore, KeyValueStore,
    ProjectStore, SessionStore, TaskStore, ViewedSet,
};
use crate::studio::{ChatOptions, StudioClient};

/// Everything a front-end needs, wired from one config.
pub struct Studio {
    pub client: StudioClient,
    pub sessions: SessionStore,
    pub projects: ProjectStore,
    pub tasks: TaskStore,
    pub community: CommunityBoard,
}

impl Studio {
    /// `input` is the terminal line reader; the key picker reads from it when
    /// no candidate keys are configured.
    pub fn from_config(cfg: &AppConfig, input: InputLines) -> StudioResult<Self> {
        let initial_key = std::env::var(API_KEY_ENV)
            .ok()
            .or_else(|| cfg.api.api_keys.first().cloned());
        let keys = ApiKeySlot::new(initial_key);

        let picker: Arc<dyn CredentialPicker> = if cfg.api.api_keys.is_empty() {
            Arc::new(TerminalKeyPicker::new(keys.clone(), input))
        } else {
            Arc::new(KeyRotation::new(keys.clone(), cfg.api.api_keys.clone()))
        };

        let provider = HostedProvider::new("hosted".into(), &cfg.api, keys)?;
        let retry = RetryOrchestrator::new(RetryPolicy::from(&cfg.retry)).with_picker(picker);
        let client = StudioClient::new(
            Arc::new(provider),
            ModelRegistry::from_config(&cfg.models),
            retry,
            cfg.video.clone(),
        );

        let data_dir = cfg.storage.resolve_data_dir();
        let kv: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&data_dir)?);
        tracing::info!(path = %data_dir.display(), "local store ready");

        Ok(Self {
            client,
            sessions: SessionStore::new(kv.clone()),
            projects: ProjectStore::new(kv.clone(), cfg.storage.user_email.as_deref()),
            tasks: TaskStore::new(kv.clone()),
            community: CommunityBoard::new(kv, load_base_catalogue()?),
        })
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Headless chat loop over stdin.
pub async fn run() -> StudioResult<()> {
    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load config; using defaults");
            AppConfig::default()
        }
    };
    let input = stdin_lines();
    let studio = Studio::from_config(&cfg, input.clone())?;
    let mut session = studio
        .sessions
        .create(studio.client.models().model_for(Capability::Chat))?;
    let mut viewed = ViewedSet::new();

    println!(
        "AppStudio chat. Commands: @task <title>, /build <prompt>, /tasks, /models, \
         /community, /view <id>, /like <id>, /remix <id>, /new, /quit"
    );
    loop {
        // Guard released before handling, so the key picker can read too.
        let Some(line) = input.lock().await.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match handle_line(&studio, &mut session, &mut viewed, line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("Error: {e}"),
        }
    }
    Ok(())
}

/// Returns false when the user asked to quit.
async fn handle_line(
    studio: &Studio,
    session: &mut ChatSession,
    viewed: &mut ViewedSet,
    input: &str,
) -> StudioResult<bool> {
    if input == "/quit" {
        return Ok(false);
    }
    if input == "/new" {
        *session = studio.sessions.create(&session.model)?;
        println!("Started a new chat.");
        return Ok(true);
    }
    if input == "/tasks" {
        for task in studio.tasks.list()? {
            println!("- [{:?}] {} ({:?})", task.status, task.title, task.priority);
        }
        return Ok(true);
    }
    if input == "/models" {
        for (capability, model) in studio.client.models().list() {
            println!("{capability}: {model}");
        }
        return Ok(true);
    }
    if input == "/community" {
        for p in studio.community.list()? {
            let star = if p.featured { "*" } else { " " };
            println!("{star} {} {} ({} likes, {} views, {} remixes)", p.id, p.name, p.likes, p.views, p.remixes);
        }
        return Ok(true);
    }
    if let Some(id) = input.strip_prefix("/view ") {
        let id = id.trim();
        studio.community.record_view(id, viewed)?;
        let p = studio.community.get(id)?;
        println!("{} [{}] {}", p.name, p.stack, p.description);
        for f in &p.files {
            println!("  {}", f.path);
        }
        return Ok(true);
    }
    if let Some(id) = input.strip_prefix("/like ") {
        let (p, liked) = studio.community.toggle_like(id.trim())?;
        println!("{} {} ({} likes)", if liked { "Liked" } else { "Unliked" }, p.name, p.likes);
        return Ok(true);
    }
    if let Some(id) = input.strip_prefix("/remix ") {
        let remix = studio.community.remix(id.trim(), &studio.projects)?;
        println!("Remixed into {}; /build continues it.", remix.name);
        return Ok(true);
    }
    if let Some(prompt) = input.strip_prefix("/build ") {
        build_project(studio, prompt.trim()).await?;
        return Ok(true);
    }
    if input.starts_with("@task") {
        match parse_task_command(input) {
            Some(new) => {
                let task = studio.tasks.create(new)?;
                println!("Task added: {}", task.title);
            }
            None => println!("Usage: @task <title> [- description] [#low|#medium|#high]"),
        }
        return Ok(true);
    }

    let options = ChatOptions {
        web_search: false,
        tools: true,
    };
    let print_chunk = |chunk: &StreamChunk| {
        if chunk.kind == StreamChunkKind::Content {
            print!("{}", chunk.content);
            let _ = std::io::stdout().flush();
        }
    };
    let reply = studio
        .client
        .stream_chat(session, input, None, &options, &print_chunk)
        .await?;
    println!();

    studio.sessions.append_message(&session.id, ChatMessage::user(input))?;
    *session = studio.sessions.append_message(&session.id, reply.message.clone())?;
    for new in reply.requested_tasks() {
        let task = studio.tasks.create(new)?;
        println!("Task added: {}", task.title);
    }
    Ok(true)
}

async fn build_project(studio: &Studio, prompt: &str) -> StudioResult<()> {
    let mut project = match studio.projects.take_active_project()? {
        Some(id) => studio.projects.get(&id)?,
        None => None,
    }
    .unwrap_or_else(|| SavedProject::new("Untitled project", "react"));
    studio.projects.save(&project)?;

    let reply = studio
        .client
        .generate_project(prompt, &project.stack, &project.files)
        .await?;
    println!("{}", reply.explanation);
    let files = reply.into_files();
    for f in &files {
        println!("  wrote {}", f.path);
    }
    project = studio.projects.upsert_files(&project.id, files)?;
    studio.projects.set_active_project(&project.id)?;
    Ok(())
}
