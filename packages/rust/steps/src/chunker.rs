//! `fixed_size` chunker: overlapping windows of `chunk_size` characters.

use serde::Deserialize;

use kbforge_core::{Chunk, ObservabilityContext, ProcessingContext, ProcessingStep, StepCategory};
use kbforge_shared::{KbForgeError, Result};

pub(crate) const STEP_TYPE: &str = "fixed_size";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Window length in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive windows. Must be below `chunk_size`.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            overlap: 100,
        }
    }
}

#[derive(Debug, Default)]
pub struct FixedSizeChunker {
    config: ChunkerConfig,
}

/// Character windows over `text` as `(start_byte, end_byte)` pairs.
fn windows(text: &str, chunk_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    bounds.push(text.len());
    let chars = bounds.len() - 1;
    let step = chunk_size - overlap;

    let mut out = Vec::new();
    let mut start = 0;
    while start < chars {
        let end = (start + chunk_size).min(chars);
        out.push((bounds[start], bounds[end]));
        if end == chars {
            break;
        }
        start += step;
    }
    out
}

impl ProcessingStep for FixedSizeChunker {
    fn step_type(&self) -> &str {
        STEP_TYPE
    }

    fn category(&self) -> StepCategory {
        StepCategory::Chunker
    }

    fn configure(&mut self, config: &serde_json::Value) -> Result<()> {
        let parsed: ChunkerConfig = crate::parse_config(STEP_TYPE, config)?;
        if parsed.chunk_size == 0 {
            return Err(KbForgeError::step(STEP_TYPE, "chunk_size must be positive"));
        }
        if parsed.overlap >= parsed.chunk_size {
            return Err(KbForgeError::step(STEP_TYPE, "overlap must be smaller than chunk_size"));
        }
        self.config = parsed;
        Ok(())
    }

    fn process(&self, ctx: &mut ProcessingContext, _obs: &ObservabilityContext) -> Result<()> {
        let text = match &ctx.parsed_document {
            Some(doc) => doc.text.clone(),
            None => ctx.raw_content.clone(),
        };
        if text.trim().is_empty() {
            ctx.mark_skip("nothing to chunk");
            return Ok(());
        }

        ctx.chunks = windows(&text, self.config.chunk_size, self.config.overlap)
            .into_iter()
            .filter(|(start, end)| !text[*start..*end].trim().is_empty())
            .enumerate()
            .map(|(index, (start, end))| Chunk {
                index,
                text: text[start..end].to_string(),
                start_offset: start,
                end_offset: end,
                metadata: Default::default(),
            })
            .collect();
        Ok(())
    }
}
