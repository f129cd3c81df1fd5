//! Local directory connector.
//!
//! Walks `root` (recursively by default), picks files by extension, and yields
//! one [`SourceRecord`] per file keyed by its `/`-separated relative path.
//! File contents are read lazily as the stream is consumed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use kbforge_core::{ConnectionResult, Connector, RecordStream, SourceRecord};
use kbforge_shared::{KbForgeError, Result};

pub(crate) const CONNECTOR_TYPE: &str = "filesystem";

/// `connector_config` accepted by [`FilesystemConnector`].
#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemConfig {
    pub root: PathBuf,

    /// Extensions to include, without the dot. Matched case-insensitively.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

fn default_extensions() -> Vec<String> {
    vec!["md".into(), "markdown".into(), "txt".into()]
}

fn default_recursive() -> bool {
    true
}

/// Reads documents from a directory tree.
#[derive(Debug, Default)]
pub struct FilesystemConnector {
    config: Option<FilesystemConfig>,
}

impl FilesystemConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn config(&self) -> Result<&FilesystemConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| KbForgeError::config("filesystem connector is not configured"))
    }

    /// Matching files under the root, sorted for a stable order.
    fn collect_files(&self, config: &FilesystemConfig) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![config.root.clone()];
        while let Some(dir) = pending.pop() {
            let entries = std::fs::read_dir(&dir).map_err(|e| KbForgeError::io(&dir, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| KbForgeError::io(&dir, e))?;
                let path = entry.path();
                let file_type = entry.file_type().map_err(|e| KbForgeError::io(&path, e))?;
                if file_type.is_dir() {
                    if config.recursive {
                        pending.push(path);
                    }
                } else if file_type.is_file() && has_extension(&path, &config.extensions) {
                    files.push(path);
                }
            }
        }
        files.sort();
        debug!(root = %config.root.display(), files = files.len(), "scanned directory");
        Ok(files)
    }

    fn stream(&self, since: Option<DateTime<Utc>>) -> Result<RecordStream<'_>> {
        let config = self.config()?;
        let files = self.collect_files(config)?;
        let root = config.root.clone();
        let records = files
            .into_iter()
            .filter_map(move |path| match read_record(&root, &path) {
                Ok(record) if is_newer(&record, since) => Some(Ok(record)),
                Ok(_) => None,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to read file");
                    Some(Err(e))
                }
            });
        Ok(Box::new(records))
    }
}

fn is_newer(record: &SourceRecord, since: Option<DateTime<Utc>>) -> bool {
    match (since, record.modified_at) {
        (Some(since), Some(modified)) => modified > since,
        _ => true,
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

fn mime_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "md" | "markdown" => Some("text/markdown"),
        "txt" => Some("text/plain"),
        "html" | "htm" => Some("text/html"),
        _ => None,
    }
}

fn read_record(root: &Path, path: &Path) -> Result<SourceRecord> {
    let content = std::fs::read(path).map_err(|e| KbForgeError::io(path, e))?;
    let metadata = std::fs::metadata(path).map_err(|e| KbForgeError::io(path, e))?;

    let relative = path.strip_prefix(root).unwrap_or(path);
    let source_uri = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_uri.clone());

    let mut record = SourceRecord::new(source_uri, name, content);
    record.mime_type = mime_type(path).map(str::to_string);
    record.modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);
    record
        .metadata
        .insert("path".into(), path.display().to_string().into());
    Ok(record)
}

impl Connector for FilesystemConnector {
    fn connector_type(&self) -> &str {
        CONNECTOR_TYPE
    }

    fn configure(&mut self, config: &serde_json::Value) -> Result<()> {
        let parsed: FilesystemConfig = serde_json::from_value(config.clone())
            .map_err(|e| KbForgeError::config(format!("invalid filesystem connector config: {e}")))?;
        if parsed.extensions.is_empty() {
            return Err(KbForgeError::config("filesystem connector needs at least one extension"));
        }
        self.config = Some(parsed);
        Ok(())
    }

    fn validate_connection(&self) -> ConnectionResult {
        let Ok(config) = self.config() else {
            return ConnectionResult::failed("connector is not configured");
        };
        match std::fs::read_dir(&config.root) {
            Ok(_) => ConnectionResult::ok(format!("{} is readable", config.root.display())),
            Err(e) => ConnectionResult::failed(format!("cannot read {}: {e}", config.root.display())),
        }
    }

    fn fetch(&self) -> Result<RecordStream<'_>> {
        self.stream(None)
    }

    fn fetch_incremental(&self, since: DateTime<Utc>) -> Result<RecordStream<'_>> {
        self.stream(Some(since))
    }

    fn supports_incremental(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kbforge-fs-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn connector(config: serde_json::Value) -> FilesystemConnector {
        let mut connector = FilesystemConnector::new();
        connector.configure(&config).unwrap();
        connector
    }

    #[test]
    fn fetch_walks_tree_and_filters_extensions() {
        let tmp = temp_dir();
        write(&tmp, "intro.md", "# Intro");
        write(&tmp, "guide/setup.markdown", "# Setup");
        write(&tmp, "guide/image.png", "binary");
        write(&tmp, "notes.TXT", "notes");

        let connector = connector(json!({ "root": tmp }));
        let records: Vec<SourceRecord> = connector.fetch().unwrap().map(|r| r.unwrap()).collect();
        let uris: Vec<&str> = records.iter().map(|r| r.source_uri.as_str()).collect();
        assert_eq!(uris, vec!["guide/setup.markdown", "intro.md", "notes.TXT"]);

        let intro = &records[1];
        assert_eq!(intro.name, "intro.md");
        assert_eq!(intro.content, b"# Intro");
        assert_eq!(intro.mime_type.as_deref(), Some("text/markdown"));
        assert!(intro.modified_at.is_some());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn non_recursive_stays_at_root() {
        let tmp = temp_dir();
        write(&tmp, "top.md", "top");
        write(&tmp, "nested/deep.md", "deep");

        let connector = connector(json!({ "root": tmp, "recursive": false, "extensions": ["md"] }));
        let uris: Vec<String> = connector
            .fetch()
            .unwrap()
            .map(|r| r.unwrap().source_uri)
            .collect();
        assert_eq!(uris, vec!["top.md"]);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn incremental_filters_by_modification_time() {
        let tmp = temp_dir();
        write(&tmp, "a.md", "alpha");

        let connector = connector(json!({ "root": tmp }));
        assert!(connector.supports_incremental());
        let past = Utc::now() - Duration::hours(1);
        let future = Utc::now() + Duration::hours(1);
        assert_eq!(connector.fetch_incremental(past).unwrap().count(), 1);
        assert_eq!(connector.fetch_incremental(future).unwrap().count(), 0);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn validate_connection_reports_missing_root() {
        let tmp = temp_dir();
        let ok = connector(json!({ "root": tmp }));
        assert!(ok.validate_connection().ok);

        let missing = connector(json!({ "root": tmp.join("does-not-exist") }));
        let probe = missing.validate_connection();
        assert!(!probe.ok);
        assert!(probe.message.contains("cannot read"));

        assert!(!FilesystemConnector::new().validate_connection().ok);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn configure_rejects_bad_config() {
        let mut connector = FilesystemConnector::new();
        assert!(connector.configure(&json!({ "recursive": true })).is_err());
        assert!(connector.configure(&json!({ "root": "/tmp", "extensions": [] })).is_err());
        assert!(connector.fetch().is_err(), "still unconfigured");
    }
}
