//! `markdown` parser: turns raw Markdown into a [`ParsedDocument`].

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use kbforge_core::{ObservabilityContext, ParsedDocument, ProcessingContext, ProcessingStep, StepCategory};
use kbforge_shared::Result;

pub(crate) const STEP_TYPE: &str = "markdown";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Parse a leading `---` block into document metadata.
    pub front_matter: bool,
    /// Documents with less text than this (after cleanup) are skipped.
    pub min_length: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            front_matter: true,
            min_length: 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct MarkdownParser {
    config: ParserConfig,
}

static FRONT_MATTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\A---\r?\n(.*?)\r?\n---[ \t]*(?:\r?\n|\z)").expect("valid regex"));

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}[ \t]+(.+?)[ \t#]*$").expect("valid regex"));

static IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("valid regex"));

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("valid regex"));

static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>\n]+>").expect("valid regex"));

static EMPHASIS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\*\*|__|\*|`)([^*`\n]+?)(\*\*|__|\*|`)").expect("valid regex"));

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:#{1,6}[ \t]+|>[ \t]?|[-*+][ \t]+|```.*$)").expect("valid regex"));

static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Split off a front matter block, returning its `key: value` pairs and the body.
fn split_front_matter(md: &str) -> (serde_json::Map<String, serde_json::Value>, &str) {
    let mut fields = serde_json::Map::new();
    let Some(caps) = FRONT_MATTER_RE.captures(md) else {
        return (fields, md);
    };
    for line in caps[1].lines() {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            if !key.is_empty() {
                fields.insert(key.to_string(), value.into());
            }
        }
    }
    let body_start = caps.get(0).map_or(0, |m| m.end());
    (fields, &md[body_start..])
}

/// Reduce Markdown to readable plain text.
fn to_plain_text(md: &str) -> String {
    let text = IMAGE_RE.replace_all(md, "$1");
    let text = LINK_RE.replace_all(&text, "$1");
    let text = HTML_TAG_RE.replace_all(&text, "");
    let text = EMPHASIS_RE.replace_all(&text, "$2");
    let text = MARKER_RE.replace_all(&text, "");
    let text = text.replace("\r\n", "\n");
    BLANK_RUN_RE.replace_all(text.trim(), "\n\n").into_owned()
}

fn file_stem(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}

impl ProcessingStep for MarkdownParser {
    fn step_type(&self) -> &str {
        STEP_TYPE
    }

    fn category(&self) -> StepCategory {
        StepCategory::Parser
    }

    fn configure(&mut self, config: &serde_json::Value) -> Result<()> {
        self.config = crate::parse_config(STEP_TYPE, config)?;
        Ok(())
    }

    fn process(&self, ctx: &mut ProcessingContext, _obs: &ObservabilityContext) -> Result<()> {
        if ctx.raw_content.trim().is_empty() {
            ctx.mark_skip("empty document");
            return Ok(());
        }

        let (mut metadata, body) = if self.config.front_matter {
            split_front_matter(&ctx.raw_content)
        } else {
            (serde_json::Map::new(), ctx.raw_content.as_str())
        };

        let title = metadata
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| HEADING_RE.captures(body).map(|c| c[1].trim().to_string()))
            .unwrap_or_else(|| file_stem(&ctx.raw_file.name).to_string());

        let text = to_plain_text(body);
        if text.chars().count() < self.config.min_length.max(1) {
            ctx.mark_skip("no text content");
            return Ok(());
        }

        metadata.insert("source_uri".into(), ctx.raw_file.source_uri.clone().into());
        tracing::trace!(file_id = %ctx.raw_file.id, chars = text.len(), "parsed markdown");
        ctx.parsed_document = Some(ParsedDocument {
            title: Some(title),
            text,
            metadata,
        });
        Ok(())
    }
}
