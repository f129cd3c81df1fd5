//! `keywords` enricher: most frequent non-stopword terms.
//!
//! Writes `keywords` into each chunk's metadata and a document-level list
//! into `ProcessingContext::enrichments`.

use std::collections::HashMap;

use serde::Deserialize;

use kbforge_core::{ObservabilityContext, ProcessingContext, ProcessingStep, StepCategory};
use kbforge_shared::{KbForgeError, Result};

use crate::tokens;

pub(crate) const STEP_TYPE: &str = "keywords";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    pub top_n: usize,
    /// Shorter words are ignored.
    pub min_length: usize,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            min_length: 3,
        }
    }
}

#[derive(Debug, Default)]
pub struct KeywordEnricher {
    config: KeywordConfig,
}

impl KeywordEnricher {
    /// Top terms by frequency, ties broken alphabetically.
    fn top_terms<'a>(&self, texts: impl Iterator<Item = &'a str>) -> Vec<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for text in texts {
            for word in tokens::words(text) {
                if word.chars().count() >= self.config.min_length && !tokens::is_stopword(&word) {
                    *counts.entry(word).or_default() += 1;
                }
            }
        }
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.into_iter().take(self.config.top_n).map(|(w, _)| w).collect()
    }
}

impl ProcessingStep for KeywordEnricher {
    fn step_type(&self) -> &str {
        STEP_TYPE
    }

    fn category(&self) -> StepCategory {
        StepCategory::Enricher
    }

    fn configure(&mut self, config: &serde_json::Value) -> Result<()> {
        let parsed: KeywordConfig = crate::parse_config(STEP_TYPE, config)?;
        if parsed.top_n == 0 {
            return Err(KbForgeError::step(STEP_TYPE, "top_n must be positive"));
        }
        self.config = parsed;
        Ok(())
    }

    fn process(&self, ctx: &mut ProcessingContext, _obs: &ObservabilityContext) -> Result<()> {
        if ctx.chunks.is_empty() {
            ctx.mark_skip("no chunks to enrich");
            return Ok(());
        }

        for chunk in &mut ctx.chunks {
            let terms = self.top_terms(std::iter::once(chunk.text.as_str()));
            if !terms.is_empty() {
                chunk.metadata.insert("keywords".into(), terms.into());
            }
        }

        let document_terms = self.top_terms(ctx.chunks.iter().map(|c| c.text.as_str()));
        ctx.enrichments.insert(STEP_TYPE.into(), document_terms.into());
        Ok(())
    }
}
