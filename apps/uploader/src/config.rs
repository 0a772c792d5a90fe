//! Upload settings: an optional JSON file overridden by command-line flags.
//!
//! Every field of the file is optional; missing ones keep their defaults.
//!
//! ```json
//! { "target": "http://localhost:8080/upload", "chunk_size": 1048576,
//!   "max_simultaneous": 2, "headers": { "X-Token": "secret" } }
//! ```

use std::path::Path;

use anyhow::Context;
use chunkferry_transfer::{DEFAULT_CHUNK_SIZE, UploadSettings};

/// Settings flags that take precedence over the file.
#[derive(Debug, Default, Clone, clap::Args)]
pub struct SettingsArgs {
    /// Endpoint URL chunks are posted to.
    #[arg(short, long)]
    pub target: Option<String>,

    /// Chunk size in bytes (0 sends whole files). Defaults to 1 MiB.
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Number of files uploaded at once.
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Retries per chunk before the upload fails.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Base delay between chunk retries, in milliseconds.
    #[arg(long)]
    pub retry_interval_ms: Option<u64>,

    /// Files at least this large ask the endpoint for a resume offset.
    #[arg(long)]
    pub resume_larger_than: Option<u64>,

    /// Extra form field sent with every request (repeatable).
    #[arg(long = "field", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub fields: Vec<(String, String)>,

    /// Extra request header (repeatable).
    #[arg(short = 'H', long = "header", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub headers: Vec<(String, String)>,

    /// Keep and resend cookies set by the endpoint.
    #[arg(long)]
    pub with_credentials: bool,
}

impl SettingsArgs {
    pub fn apply(&self, settings: &mut UploadSettings) {
        if let Some(target) = &self.target {
            settings.target = target.clone();
        }
        if let Some(size) = self.chunk_size {
            settings.chunk_size = Some(size);
        }
        if let Some(limit) = self.concurrency {
            settings.max_simultaneous = limit;
        }
        if let Some(retries) = self.retries {
            settings.max_chunk_retries = retries;
        }
        if let Some(ms) = self.retry_interval_ms {
            settings.chunk_retry_interval_ms = Some(ms);
        }
        if let Some(bytes) = self.resume_larger_than {
            settings.resume_larger_than = bytes;
        }
        settings.query.extend(self.fields.iter().cloned());
        settings.headers.extend(self.headers.iter().cloned());
        settings.with_credentials |= self.with_credentials;
    }
}

/// Loads settings from `path`, or the CLI defaults when there is none.
///
/// The CLI chunks by default, unlike the bare engine.
pub fn load(path: Option<&Path>) -> anyhow::Result<UploadSettings> {
    let Some(path) = path else {
        return Ok(UploadSettings {
            chunk_size: Some(DEFAULT_CHUNK_SIZE),
            ..Default::default()
        });
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config {}", path.display()))?;
    let settings: UploadSettings =
        serde_json::from_str(&content).with_context(|| format!("invalid config {}", path.display()))?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(settings)
}

/// Parses `KEY=VALUE`.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {s:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_chunk_without_file() {
        let settings = load(None).unwrap();
        assert_eq!(settings.chunk_size, Some(DEFAULT_CHUNK_SIZE));
        assert_eq!(settings.max_chunk_retries, 3);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.json");
        std::fs::write(
            &path,
            r#"{"target":"http://h/upload","max_simultaneous":3,"headers":{"X-Token":"t"}}"#,
        )
        .unwrap();

        let settings = load(Some(&path)).unwrap();
        assert_eq!(settings.target, "http://h/upload");
        assert_eq!(settings.max_simultaneous, 3);
        assert_eq!(settings.headers.get("X-Token").map(String::as_str), Some("t"));
        assert_eq!(settings.chunk_size, None);
        assert_eq!(settings.file_parameter_name, "file");
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(load(Some(&path)).is_err());
        assert!(load(Some(&dir.path().join("missing.json"))).is_err());
    }

    #[test]
    fn flags_override_file() {
        let mut settings = UploadSettings::default();
        settings.query.insert("album".into(), "old".into());
        let args = SettingsArgs {
            target: Some("http://h/u".into()),
            chunk_size: Some(0),
            concurrency: Some(4),
            retry_interval_ms: Some(500),
            fields: vec![("album".into(), "new".into())],
            headers: vec![("Authorization".into(), "Bearer x".into())],
            ..Default::default()
        };
        args.apply(&mut settings);

        assert_eq!(settings.target, "http://h/u");
        assert_eq!(settings.chunk_size(), None);
        assert_eq!(settings.concurrency(), 4);
        assert_eq!(settings.chunk_retry_interval_ms, Some(500));
        assert_eq!(settings.query.get("album").map(String::as_str), Some("new"));
        assert_eq!(settings.headers.len(), 1);
        assert!(!settings.with_credentials);
    }

    #[test]
    fn key_value_parsing() {
        assert_eq!(parse_key_value("a=b=c").unwrap(), ("a".to_string(), "b=c".to_string()));
        assert_eq!(parse_key_value("k=").unwrap(), ("k".to_string(), String::new()));
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=v").is_err());
    }
}
