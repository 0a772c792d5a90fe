//! HTTP transport for the chunkferry upload engine.
//!
//! Posts chunks and offset queries as `multipart/form-data` with `reqwest`
//! and reports payload bytes to the engine as the request body is consumed.

mod body;
pub mod client;

pub use client::{Error, HttpTransport, HttpTransportBuilder};
