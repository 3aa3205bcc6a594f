use crate::errors::{StudioError, StudioResult};
use crate::llm::types::{
    Candidate, Content, GenerateContentResponse, GroundingMetadata, Part, StreamChunk,
    StreamChunkKind,
};

/// Parses one raw SSE line of a streamed generation.
/// Returns None for keep-alives, comments and non-data lines.
pub fn parse_sse_line(line: &str) -> StudioResult<Option<GenerateContentResponse>> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }

    serde_json::from_str(data)
        .map(Some)
        .map_err(|e| StudioError::SseParsing(e.to_string()))
}

/// Splits a streamed fragment into the chunks forwarded to the caller.
pub fn chunks_from(fragment: &GenerateContentResponse) -> Vec<StreamChunk> {
    let Some(candidate) = fragment.candidates.first() else {
        return Vec::new();
    };

    let mut chunks: Vec<StreamChunk> = candidate
        .content
        .iter()
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| match p {
            Part::Text { text, thought } if !text.is_empty() => Some(StreamChunk {
                kind: if *thought {
                    StreamChunkKind::Thought
                } else {
                    StreamChunkKind::Content
                },
                content: text.clone(),
            }),
            _ => None,
        })
        .collect();

    if candidate.finish_reason.is_some() {
        chunks.push(StreamChunk {
            kind: StreamChunkKind::Done,
            content: String::new(),
        });
    }
    chunks
}

/// Folds streamed fragments back into a single response.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    parts: Vec<Part>,
    finish_reason: Option<String>,
    grounding: Option<GroundingMetadata>,
}

impl StreamAccumulator {
    pub fn push(&mut self, fragment: GenerateContentResponse) {
        let Some(candidate) = fragment.candidates.into_iter().next() else {
            return;
        };
        for part in candidate.content.into_iter().flat_map(|c| c.parts) {
            // Adjacent text of the same kind is merged into one part.
            if let (Some(Part::Text { text: acc, thought: acc_thought }), Part::Text { text, thought }) =
                (self.parts.last_mut(), &part)
            {
                if *acc_thought == *thought {
                    acc.push_str(text);
                    continue;
                }
            }
            self.parts.push(part);
        }
        if candidate.finish_reason.is_some() {
            self.finish_reason = candidate.finish_reason;
        }
        if candidate.grounding_metadata.is_some() {
            self.grounding = candidate.grounding_metadata;
        }
    }

    pub fn finish(self) -> GenerateContentResponse {
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    role: Some("model".into()),
                    parts: self.parts,
                }),
                finish_reason: self.finish_reason,
                grounding_metadata: self.grounding,
            }],
        }
    }
}
