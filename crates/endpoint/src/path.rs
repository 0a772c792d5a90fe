use std::path::{Component, Path};

use crate::error::EndpointError;

/// Validates that a client-supplied relative path does not escape the
/// upload directory.
///
/// Rejects absolute paths, parent directory traversal (`..`) and Windows
/// prefix components (`C:`, `\\server`).
pub fn validate_upload_path(file_path: &str) -> Result<(), EndpointError> {
    let path = Path::new(file_path);

    if path.is_absolute() {
        return Err(EndpointError::InvalidPath(format!(
            "absolute path not allowed: {file_path}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(EndpointError::InvalidPath(format!(
                    "parent directory traversal not allowed: {file_path}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(EndpointError::InvalidPath(format!(
                    "absolute path not allowed: {file_path}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

/// Validates a bare file name: exactly one normal path component.
pub fn validate_file_name(name: &str) -> Result<(), EndpointError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(EndpointError::InvalidPath(format!("invalid file name: {name:?}"))),
    }
}
