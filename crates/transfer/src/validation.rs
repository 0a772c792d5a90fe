//! Response validators, fingerprints and relative-path helpers.

use chunkferry_protocol::{ChunkVerdict, EndpointReply};

use crate::source::FileSource;
use crate::types::FileInfo;

/// Verdict of an offset validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetDecision {
    /// Proceed, resuming from `offset` bytes (`None` means from the start).
    Accept { offset: Option<u64> },
    /// Stop the file with an error.
    Reject,
}

/// Classifies a chunk response against the reference endpoint's JSON reply.
///
/// Anything but a 200 is treated as transient, and so is a 200 whose body
/// is not a reply at all (a proxy page, say). Only a parsed reply that
/// reports failure is permanent.
pub fn json_chunk_validator(status: u16, body: &str) -> ChunkVerdict {
    if status != 200 {
        return ChunkVerdict::Retry;
    }
    match EndpointReply::parse(body) {
        Some(reply) if reply.success => ChunkVerdict::Success,
        Some(_) => ChunkVerdict::Error,
        None => ChunkVerdict::Retry,
    }
}

/// Accepts an offset reply from the reference endpoint.
pub fn json_offset_validator(_file: &FileInfo, status: u16, body: &str) -> OffsetDecision {
    if status != 200 {
        return OffsetDecision::Reject;
    }
    match EndpointReply::parse(body) {
        Some(reply) if reply.success => OffsetDecision::Accept {
            offset: reply.offset,
        },
        _ => OffsetDecision::Reject,
    }
}

/// Default fingerprint: `<size>-<path>` where the path is the relative
/// path (or the name) with everything outside `[0-9A-Za-z_-]` removed.
pub fn default_fingerprint(source: &dyn FileSource) -> String {
    let path = source.relative_path().unwrap_or_else(|| source.name());
    let sanitized: String = path
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    format!("{}-{}", source.size(), sanitized)
}

/// Directory portion of a relative path that ends with the file name.
///
/// `photos/2024/a.jpg` becomes `photos/2024/`. A bare name, or a path equal
/// to the name, has no directory portion.
pub fn relative_directory(relative_path: Option<&str>, name: &str) -> Option<String> {
    let path = relative_path?;
    let dir = path.strip_suffix(name).unwrap_or(path);
    if dir.is_empty() || path == name {
        None
    } else {
        Some(dir.to_string())
    }
}

/// Browsers hand out `.` entries sized in 4096-byte blocks for empty
/// directories in a dropped tree. They carry no data and are skipped.
pub fn is_directory_placeholder(name: &str, size: u64) -> bool {
    name == "." && size % 4096 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryFile;
    use crate::types::FileId;

    fn info() -> FileInfo {
        FileInfo {
            id: FileId(1),
            name: "a.bin".into(),
            relative_path: None,
            size: 10,
            fingerprint: "10-abin".into(),
        }
    }

    #[test]
    fn chunk_validator_classification() {
        assert_eq!(json_chunk_validator(200, r#"{"success":true}"#), ChunkVerdict::Success);
        assert_eq!(json_chunk_validator(200, r#"{"success":false,"msg":"disk full"}"#), ChunkVerdict::Error);
        assert_eq!(json_chunk_validator(200, "not json"), ChunkVerdict::Retry);
        assert_eq!(json_chunk_validator(200, "<html>gateway hiccup</html>"), ChunkVerdict::Retry);
        assert_eq!(json_chunk_validator(500, r#"{"success":true}"#), ChunkVerdict::Retry);
        assert_eq!(json_chunk_validator(0, ""), ChunkVerdict::Retry);
    }

    #[test]
    fn offset_validator_decisions() {
        assert_eq!(
            json_offset_validator(&info(), 200, r#"{"success":true,"offset":12500}"#),
            OffsetDecision::Accept { offset: Some(12_500) }
        );
        assert_eq!(
            json_offset_validator(&info(), 200, r#"{"success":true}"#),
            OffsetDecision::Accept { offset: None }
        );
        assert_eq!(
            json_offset_validator(&info(), 200, r#"{"success":false}"#),
            OffsetDecision::Reject
        );
        assert_eq!(json_offset_validator(&info(), 503, ""), OffsetDecision::Reject);
    }

    #[test]
    fn fingerprint_uses_relative_path() {
        let plain = MemoryFile::new("my file.txt", vec![0u8; 30_000]);
        assert_eq!(default_fingerprint(&plain), "30000-myfiletxt");

        let nested = MemoryFile::new("a.jpg", vec![0u8; 5]).with_relative_path("photos/2024/a.jpg");
        assert_eq!(default_fingerprint(&nested), "5-photos2024ajpg");
    }

    #[test]
    fn fingerprint_differs_by_size() {
        let a = MemoryFile::new("x", vec![0u8; 1]);
        let b = MemoryFile::new("x", vec![0u8; 2]);
        assert_ne!(default_fingerprint(&a), default_fingerprint(&b));
    }

    #[test]
    fn relative_directory_strips_name() {
        assert_eq!(relative_directory(Some("photos/a.jpg"), "a.jpg"), Some("photos/".into()));
        assert_eq!(relative_directory(Some("a/b/c.txt"), "c.txt"), Some("a/b/".into()));
        assert_eq!(relative_directory(Some("a.jpg"), "a.jpg"), None);
        assert_eq!(relative_directory(Some(""), "a.jpg"), None);
        assert_eq!(relative_directory(None, "a.jpg"), None);
    }

    #[test]
    fn directory_placeholders() {
        assert!(is_directory_placeholder(".", 0));
        assert!(is_directory_placeholder(".", 4096));
        assert!(!is_directory_placeholder(".", 4097));
        assert!(!is_directory_placeholder("notes.txt", 4096));
    }
}
