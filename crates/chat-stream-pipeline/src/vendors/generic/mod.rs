//! Generic adapter for OpenAI-compatible chat-completions endpoints.
//!
//! Issues a pooled HTTP POST with bearer credentials and exposes the SSE
//! response body as a line source.
mod adapter;
mod config;
pub(crate) mod transport;

pub use adapter::GenericProvider;
pub use config::GenericProviderConfig;
