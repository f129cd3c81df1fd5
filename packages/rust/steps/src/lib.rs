//! Built-in processing steps for the indexing pipeline.
//!
//! One step per category:
//! - [`MarkdownParser`] (`markdown`): front matter, title, plain text
//! - [`FixedSizeChunker`] (`fixed_size`): overlapping character windows
//! - [`KeywordEnricher`] (`keywords`): top terms per chunk and per document
//! - [`HashingEmbedder`] (`hashing`): feature-hashed bag-of-words vectors
//! - [`DefaultIndexBuilder`] (`default`): index records with payload metadata

mod chunker;
mod embedder;
mod enricher;
mod index_builder;
mod parser;
mod tokens;

use serde::de::DeserializeOwned;

use kbforge_core::StepRegistry;
use kbforge_shared::{KbForgeError, Result};

pub use chunker::{ChunkerConfig, FixedSizeChunker};
pub use embedder::{EmbedderConfig, HashingEmbedder};
pub use enricher::{KeywordConfig, KeywordEnricher};
pub use index_builder::{DefaultIndexBuilder, IndexBuilderConfig};
pub use parser::{MarkdownParser, ParserConfig};

/// Register every built-in step under its type key.
pub fn register_builtin_steps(registry: &mut StepRegistry) -> Result<()> {
    registry.register(parser::STEP_TYPE, || Box::new(MarkdownParser::default()))?;
    registry.register(chunker::STEP_TYPE, || Box::new(FixedSizeChunker::default()))?;
    registry.register(enricher::STEP_TYPE, || Box::new(KeywordEnricher::default()))?;
    registry.register(embedder::STEP_TYPE, || Box::new(HashingEmbedder::default()))?;
    registry.register(index_builder::STEP_TYPE, || Box::new(DefaultIndexBuilder::default()))?;
    Ok(())
}

/// Deserialize a step config, treating `null` as "all defaults".
fn parse_config<T: DeserializeOwned + Default>(step_type: &str, value: &serde_json::Value) -> Result<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone())
        .map_err(|e| KbForgeError::step(step_type, format!("invalid config: {e}")))
}


#[cfg(test)]
mod tests {
    use super::*;
    use kbforge_core::PipelineRunner;
    use kbforge_shared::StepConfig;
    use serde_json::json;

    fn default_pipeline() -> Vec<StepConfig> {
        vec![
            StepConfig::new("markdown"),
            StepConfig::new("fixed_size").with_config(json!({ "chunk_size": 40, "overlap": 10 })),
            StepConfig::new("keywords").with_config(json!({ "top_n": 3 })),
            StepConfig::new("hashing").with_config(json!({ "dimension": 32 })),
            StepConfig::new("default"),
        ]
    }

    #[test]
    fn builtins_register_once() {
        let mut registry = StepRegistry::new();
        register_builtin_steps(&mut registry).unwrap();
        assert_eq!(
            registry.step_types(),
            vec!["default", "fixed_size", "hashing", "keywords", "markdown"]
        );
        assert!(register_builtin_steps(&mut registry).is_err());
    }

    #[test]
    fn full_pipeline_produces_index_records() {
        let mut registry = StepRegistry::new();
        register_builtin_steps(&mut registry).unwrap();
        let mut runner = PipelineRunner::from_config(&registry, &default_pipeline()).unwrap();

        let doc = "---\nauthor: Ada\n---\n# Storage Engines\n\nLog structured merge trees batch writes \
                   into sorted runs. Compaction merges sorted runs in the background.\n";
        let mut ctx = test_support::context("storage.md", doc);
        runner.run(&mut ctx, &test_support::obs());

        assert!(ctx.errors.is_empty(), "errors: {:?}", ctx.errors);
        assert!(!ctx.should_skip);
        let parsed = ctx.parsed_document.as_ref().unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Storage Engines"));
        assert!(ctx.chunks.len() > 1);
        assert_eq!(ctx.embeddings.len(), ctx.chunks.len());
        assert_eq!(ctx.index_records.len(), ctx.chunks.len());
        assert!(ctx.index_records.iter().all(|r| r.vector.len() == 32));

        let stats = runner.stats();
        assert_eq!(stats.len(), 5);
        assert!(stats.iter().all(|s| s.errors_count == 0));
        assert_eq!(stats[4].output_count, ctx.index_records.len());
    }

    #[test]
    fn empty_document_skips_everything_after_parser() {
        let mut registry = StepRegistry::new();
        register_builtin_steps(&mut registry).unwrap();
        let mut runner = PipelineRunner::from_config(&registry, &default_pipeline()).unwrap();

        let mut ctx = test_support::context("blank.md", "   \n\n");
        runner.run(&mut ctx, &test_support::obs());
        assert!(ctx.should_skip);
        assert!(ctx.chunks.is_empty());
        assert_eq!(runner.stats()[1].input_count, 0);
    }

    #[test]
    fn invalid_step_config_fails_pipeline_build() {
        let mut registry = StepRegistry::new();
        register_builtin_steps(&mut registry).unwrap();
        let configs = vec![StepConfig::new("fixed_size").with_config(json!({ "chunk_size": 10, "overlap": 10 }))];
        assert!(PipelineRunner::from_config(&registry, &configs).is_err());
    }
}
