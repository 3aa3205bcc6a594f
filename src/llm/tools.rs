use crate::errors::{StudioError, StudioResult};
use crate::llm::types::{FunctionDeclaration, Tool};

/// Loads built-in function declarations from the prompts/tools/builtin.json file.
/// The JSON is embedded at compile time via include_str!.
pub fn load_builtin_tools() -> StudioResult<Vec<FunctionDeclaration>> {
    let json = include_str!("../../prompts/tools/builtin.json");
    serde_json::from_str(json).map_err(|e| StudioError::Config(format!("Failed to parse builtin tools: {e}")))
}

/// Web-search grounding tool.
pub fn search_tool() -> Tool {
    Tool::GoogleSearch(serde_json::json!({}))
}
