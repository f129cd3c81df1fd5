//! `default` index builder: pairs embeddings with their chunks.

use serde::Deserialize;
use serde_json::{Map, Value};

use kbforge_core::{ObservabilityContext, ProcessingContext, ProcessingStep, StepCategory};
use kbforge_shared::{KbForgeError, Result};
use kbforge_storage::IndexRecord;

pub(crate) const STEP_TYPE: &str = "default";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexBuilderConfig {
    /// Copy file and chunk metadata into each record's payload.
    pub include_metadata: bool,
}

impl Default for IndexBuilderConfig {
    fn default() -> Self {
        Self {
            include_metadata: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct DefaultIndexBuilder {
    config: IndexBuilderConfig,
}

impl DefaultIndexBuilder {
    fn file_metadata(ctx: &ProcessingContext) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("file_name".into(), ctx.raw_file.name.clone().into());
        metadata.insert("source_uri".into(), ctx.raw_file.source_uri.clone().into());
        metadata.insert("file_version".into(), ctx.file_version.into());
        if let Some(title) = ctx.parsed_document.as_ref().and_then(|d| d.title.clone()) {
            metadata.insert("title".into(), title.into());
        }
        metadata
    }
}

impl ProcessingStep for DefaultIndexBuilder {
    fn step_type(&self) -> &str {
        STEP_TYPE
    }

    fn category(&self) -> StepCategory {
        StepCategory::IndexBuilder
    }

    fn configure(&mut self, config: &serde_json::Value) -> Result<()> {
        self.config = crate::parse_config(STEP_TYPE, config)?;
        Ok(())
    }

    fn process(&self, ctx: &mut ProcessingContext, _obs: &ObservabilityContext) -> Result<()> {
        if ctx.embeddings.is_empty() {
            ctx.mark_skip("no embeddings to index");
            return Ok(());
        }

        let base = if self.config.include_metadata {
            Self::file_metadata(ctx)
        } else {
            Map::new()
        };

        let mut records = Vec::with_capacity(ctx.embeddings.len());
        for embedding in &ctx.embeddings {
            let chunk = ctx
                .chunks
                .iter()
                .find(|c| c.index == embedding.chunk_index)
                .ok_or_else(|| {
                    KbForgeError::step(
                        STEP_TYPE,
                        format!("embedding refers to missing chunk {}", embedding.chunk_index),
                    )
                })?;

            let mut metadata = base.clone();
            if self.config.include_metadata {
                metadata.extend(chunk.metadata.clone());
            }
            records.push(IndexRecord {
                id: format!("{}:{}", ctx.raw_file.id, chunk.index),
                file_id: ctx.raw_file.id.clone(),
                chunk_index: chunk.index,
                text: chunk.text.clone(),
                vector: embedding.vector.clone(),
                metadata,
            });
        }
        ctx.index_records = records;
        Ok(())
    }
}
