//! Multipart form field names.
//!
//! Both sides must agree on these; the payload field name itself is
//! configurable on the client (see `UploadSettings::file_parameter_name`).

/// Default name of the form field carrying the chunk bytes.
pub const DEFAULT_FILE_PARAMETER: &str = "file";

/// Full size of the file being uploaded, in bytes.
pub const TOTAL_SIZE: &str = "totalSize";

/// `1` when the chunk starts at byte 0, `0` otherwise.
pub const IS_FIRST_CHUNK: &str = "isFirstChunk";

/// `1` when the chunk ends at the last byte of the file, `0` otherwise.
pub const IS_LAST_CHUNK: &str = "isLastChunk";

/// Directory portion of the file's relative path (omitted when empty).
pub const RELATIVE_PATH: &str = "relativePath";

/// File name, sent explicitly so the endpoint never depends on the
/// multipart part's own filename.
pub const FILENAME: &str = "filename";

/// Present (as `1`) on offset queries.
pub const GET_OFFSET: &str = "getOffset";

/// Encodes a boolean flag the way the endpoint expects it.
pub fn flag(value: bool) -> String {
    if value { "1".into() } else { "0".into() }
}

/// Parses a flag field. Anything other than `1` is false.
pub fn parse_flag(value: &str) -> bool {
    value.trim() == "1"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_encoding() {
        assert_eq!(flag(true), "1");
        assert_eq!(flag(false), "0");
    }

    #[test]
    fn flag_parsing() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("true"));
        assert!(!parse_flag(""));
    }
}
