//! Upload configuration.
//!
//! [`UploadSettings`] is plain data and can be loaded from JSON.
//! [`UploadOptions`] wraps it together with the callable hooks.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chunkferry_protocol::ChunkVerdict;
use serde::{Deserialize, Serialize};

use crate::source::FileSource;
use crate::types::{ChunkInfo, FileInfo};
use crate::validation::{self, OffsetDecision};

/// Classifies a chunk response `(status, body)`.
pub type ChunkValidator = Arc<dyn Fn(u16, &str) -> ChunkVerdict + Send + Sync>;

/// Decides whether to proceed after an offset query.
pub type OffsetValidator = Arc<dyn Fn(&FileInfo, u16, &str) -> OffsetDecision + Send + Sync>;

/// Computes the duplicate-detection key of a source.
pub type FingerprintFn = Arc<dyn Fn(&dyn FileSource) -> String + Send + Sync>;

/// Extra form fields per request. The chunk is `None` for offset queries.
pub type QueryFn = Arc<dyn Fn(&FileInfo, Option<&ChunkInfo>) -> Vec<(String, String)> + Send + Sync>;

/// Serializable upload settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Endpoint URL.
    pub target: String,
    /// Chunk size in bytes. `None` or `0` sends each file as one chunk.
    pub chunk_size: Option<u64>,
    /// Accept at most one file per queue.
    pub single_file: bool,
    /// Form field name of the chunk payload.
    pub file_parameter_name: String,
    /// Minimum interval between progress events of one file.
    pub progress_callbacks_interval_ms: u64,
    /// Weight of the newest speed sample, in `[0, 1]`.
    pub speed_smoothing_factor: f64,
    /// Extra form fields added to every request.
    pub query: BTreeMap<String, String>,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Send cookies with cross-origin requests.
    pub with_credentials: bool,
    pub max_chunk_retries: u32,
    /// Files at least this large query the endpoint for an offset first,
    /// even when they fit in one chunk.
    pub resume_larger_than: u64,
    /// Base retry delay. `None` retries immediately.
    pub chunk_retry_interval_ms: Option<u64>,
    /// Maximum number of files uploading at once.
    pub max_simultaneous: usize,
    /// Start the queue as soon as files are added.
    pub start_on_submit: bool,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            target: "/".into(),
            chunk_size: None,
            single_file: false,
            file_parameter_name: chunkferry_protocol::fields::DEFAULT_FILE_PARAMETER.into(),
            progress_callbacks_interval_ms: 100,
            speed_smoothing_factor: 0.1,
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            with_credentials: false,
            max_chunk_retries: 3,
            resume_larger_than: 10_485_760,
            chunk_retry_interval_ms: None,
            max_simultaneous: 1,
            start_on_submit: false,
        }
    }
}

impl UploadSettings {
    /// Effective chunk size; zero disables chunking.
    pub fn chunk_size(&self) -> Option<u64> {
        self.chunk_size.filter(|&size| size > 0)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_callbacks_interval_ms)
    }

    pub fn retry_interval(&self) -> Option<Duration> {
        self.chunk_retry_interval_ms.map(Duration::from_millis)
    }

    /// Smoothing factor clamped to `[0, 1]`.
    pub fn smoothing_factor(&self) -> f64 {
        if self.speed_smoothing_factor.is_nan() {
            return 0.0;
        }
        self.speed_smoothing_factor.clamp(0.0, 1.0)
    }

    /// Concurrency limit. Zero is treated as one.
    pub fn concurrency(&self) -> usize {
        self.max_simultaneous.max(1)
    }

    /// Whether a file of `size` bytes negotiates an offset before sending.
    /// Only files smaller than both the chunk size and the resume threshold
    /// go straight to their first chunk.
    pub fn resumes(&self, size: u64) -> bool {
        match self.chunk_size() {
            Some(chunk_size) => size >= chunk_size || size >= self.resume_larger_than,
            None => false,
        }
    }
}

/// Settings plus hooks.
#[derive(Clone)]
pub struct UploadOptions {
    pub settings: UploadSettings,
    query_fn: Option<QueryFn>,
    fingerprint: FingerprintFn,
    chunk_validator: ChunkValidator,
    offset_validator: OffsetValidator,
}

impl UploadOptions {
    /// Options with the JSON validators and the default fingerprint.
    pub fn new(settings: UploadSettings) -> Self {
        Self {
            settings,
            query_fn: None,
            fingerprint: Arc::new(validation::default_fingerprint),
            chunk_validator: Arc::new(validation::json_chunk_validator),
            offset_validator: Arc::new(validation::json_offset_validator),
        }
    }

    pub fn with_query_fn(
        mut self,
        f: impl Fn(&FileInfo, Option<&ChunkInfo>) -> Vec<(String, String)> + Send + Sync + 'static,
    ) -> Self {
        self.query_fn = Some(Arc::new(f));
        self
    }

    pub fn with_fingerprint(mut self, f: impl Fn(&dyn FileSource) -> String + Send + Sync + 'static) -> Self {
        self.fingerprint = Arc::new(f);
        self
    }

    pub fn with_chunk_validator(mut self, f: impl Fn(u16, &str) -> ChunkVerdict + Send + Sync + 'static) -> Self {
        self.chunk_validator = Arc::new(f);
        self
    }

    pub fn with_offset_validator(
        mut self,
        f: impl Fn(&FileInfo, u16, &str) -> OffsetDecision + Send + Sync + 'static,
    ) -> Self {
        self.offset_validator = Arc::new(f);
        self
    }

    pub fn fingerprint_of(&self, source: &dyn FileSource) -> String {
        (self.fingerprint)(source)
    }

    pub fn validate_chunk(&self, status: u16, body: &str) -> ChunkVerdict {
        (self.chunk_validator)(status, body)
    }

    pub fn validate_offset(&self, file: &FileInfo, status: u16, body: &str) -> OffsetDecision {
        (self.offset_validator)(file, status, body)
    }

    /// Static query entries followed by the query hook's entries.
    pub fn query_fields(&self, file: &FileInfo, chunk: Option<&ChunkInfo>) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = self
            .settings
            .query
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(f) = &self.query_fn {
            merge_fields(&mut fields, f(file, chunk));
        }
        fields
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        self.settings
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self::new(UploadSettings::default())
    }
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("settings", &self.settings)
            .field("query_fn", &self.query_fn.is_some())
            .finish_non_exhaustive()
    }
}

/// Overlays `extra` onto `fields`: existing keys are replaced in place and
/// new keys appended.
pub(crate) fn merge_fields(fields: &mut Vec<(String, String)>, extra: Vec<(String, String)>) {
    for (key, value) in extra {
        match fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => fields.push((key, value)),
        }
    }
}
