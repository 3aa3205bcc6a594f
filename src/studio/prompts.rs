use crate::store::types::ProjectFile;

pub const CHAT_SYSTEM_PROMPT: &str = "\
You are the assistant of an AI app builder. Help the user plan, design and debug web apps.
Rules:
- Answer concisely and use fenced code blocks for code.
- When the user asks you to track or remember a piece of work, call `create_task`.
- Respond in the same language as the user.";

pub const TRANSCRIBE_PROMPT: &str =
    "Transcribe this audio verbatim. Return only the transcript text, with no commentary.";

/// System prompt for project generation; the reply must be a single JSON object.
pub fn project_system_prompt(stack: &str) -> String {
    format!(
        "\
You are an expert {stack} engineer generating a complete, runnable project.
Reply with a single JSON object and nothing else:
{{\"explanation\": \"<what you built or changed>\", \"files\": [{{\"path\": \"<relative path>\", \"content\": \"<full file content>\", \"language\": \"<language>\"}}]}}
Rules:
- Always return full file contents, never diffs or placeholders.
- Only include files you created or changed."
    )
}

/// User turn for project generation, carrying the current files as context.
pub fn project_user_prompt(prompt: &str, existing: &[ProjectFile]) -> String {
    if existing.is_empty() {
        return prompt.to_string();
    }
    let mut out = String::from("Current project files:\n\n");
    for file in existing {
        out.push_str(&format!("--- {} ---\n{}\n\n", file.path, file.content));
    }
    out.push_str("Request:\n");
    out.push_str(prompt);
    out
}
