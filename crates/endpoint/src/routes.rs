use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, State};
use bytes::Bytes;
use chunkferry_protocol::{EndpointReply, fields};
use tracing::{debug, warn};

use crate::error::EndpointError;
use crate::storage::{ChunkUpload, Stored, UploadKey, UploadStore};

/// Shared state of the upload routes.
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: Arc<UploadStore>,
    /// Form field carrying the chunk bytes.
    pub file_parameter: String,
}

impl AppState {
    pub fn new(store: UploadStore) -> Self {
        Self {
            store: Arc::new(store),
            file_parameter: fields::DEFAULT_FILE_PARAMETER.to_string(),
        }
    }

    pub fn with_file_parameter(mut self, name: impl Into<String>) -> Self {
        self.file_parameter = name.into();
        self
    }
}

/// A parsed upload form.
#[derive(Debug, Default)]
struct UploadForm {
    text: HashMap<String, String>,
    payload: Option<Bytes>,
    part_file_name: Option<String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart, file_parameter: &str) -> Result<Self, EndpointError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == file_parameter {
                form.part_file_name = field.file_name().map(str::to_string);
                form.payload = Some(field.bytes().await?);
            } else {
                let value = field.text().await?;
                form.text.insert(name, value);
            }
        }
        Ok(form)
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.text.get(name).map(String::as_str)
    }

    fn flag(&self, name: &str) -> bool {
        self.text(name).is_some_and(fields::parse_flag)
    }

    fn total_size(&self) -> Result<u64, EndpointError> {
        let value = self
            .text(fields::TOTAL_SIZE)
            .ok_or(EndpointError::MissingField(fields::TOTAL_SIZE))?;
        value.trim().parse().map_err(|_| EndpointError::InvalidField {
            name: fields::TOTAL_SIZE,
            value: value.to_string(),
        })
    }

    /// The explicit `filename` field, else the payload part's own name.
    fn filename(&self) -> Result<&str, EndpointError> {
        self.text(fields::FILENAME)
            .filter(|name| !name.is_empty())
            .or(self.part_file_name.as_deref())
            .ok_or(EndpointError::MissingField(fields::FILENAME))
    }

    fn key(&self) -> Result<UploadKey<'_>, EndpointError> {
        Ok(UploadKey {
            relative_path: self.text(fields::RELATIVE_PATH),
            filename: self.filename()?,
            total_size: self.total_size()?,
        })
    }
}

/// Handles both offset queries and chunk posts.
pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<EndpointReply>, EndpointError> {
    let form = UploadForm::read(multipart, &state.file_parameter).await?;
    let key = form.key()?;

    if form.flag(fields::GET_OFFSET) {
        let offset = state.store.offset(&key).await?;
        debug!(file = key.filename, ?offset, "offset query");
        return Ok(Json(EndpointReply::offset(offset)));
    }

    let Some(payload) = form.payload.as_ref() else {
        warn!(file = key.filename, "chunk post without payload");
        return Err(EndpointError::MissingField("file"));
    };
    let chunk = ChunkUpload {
        key,
        is_first: form.flag(fields::IS_FIRST_CHUNK),
        is_last: form.flag(fields::IS_LAST_CHUNK),
        data: payload,
    };
    let message = match state.store.store_chunk(chunk).await? {
        Stored::Whole(_) => "File uploaded in one chunk".to_string(),
        Stored::Partial { .. } => "File chunk uploaded".to_string(),
        Stored::Complete(_) => format!("File {} successfully uploaded", key.filename),
    };
    Ok(Json(EndpointReply::ok(message)))
}
