//! `hashing` embedder: signed feature hashing of word tokens, L2-normalised.
//!
//! Deterministic and dependency-free at runtime, which makes it suitable for
//! local builds and tests. Real deployments plug a model-backed embedder in
//! under a different step type.

use serde::Deserialize;
use sha2::{Digest, Sha256};

use kbforge_core::{Embedding, ObservabilityContext, ProcessingContext, ProcessingStep, StepCategory};
use kbforge_shared::{KbForgeError, Result};

use crate::tokens;

pub(crate) const STEP_TYPE: &str = "hashing";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub dimension: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self { dimension: 256 }
    }
}

#[derive(Debug, Default)]
pub struct HashingEmbedder {
    config: EmbedderConfig,
}

impl HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let dimension = self.config.dimension;
        let mut vector = vec![0.0_f32; dimension];
        for word in tokens::words(text) {
            let digest = Sha256::digest(word.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl ProcessingStep for HashingEmbedder {
    fn step_type(&self) -> &str {
        STEP_TYPE
    }

    fn category(&self) -> StepCategory {
        StepCategory::Embedder
    }

    fn configure(&mut self, config: &serde_json::Value) -> Result<()> {
        let parsed: EmbedderConfig = crate::parse_config(STEP_TYPE, config)?;
        if parsed.dimension == 0 {
            return Err(KbForgeError::step(STEP_TYPE, "dimension must be positive"));
        }
        self.config = parsed;
        Ok(())
    }

    fn process(&self, ctx: &mut ProcessingContext, _obs: &ObservabilityContext) -> Result<()> {
        if ctx.chunks.is_empty() {
            ctx.mark_skip("no chunks to embed");
            return Ok(());
        }
        ctx.embeddings = ctx
            .chunks
            .iter()
            .map(|chunk| Embedding {
                chunk_index: chunk.index,
                vector: self.embed(&chunk.text),
            })
            .collect();
        Ok(())
    }
}
