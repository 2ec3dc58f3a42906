//! Streaming chat response pipeline.
//!
//! A [`ChatStreamService`] opens an upstream call through a registered
//! [`ProviderAdapter`], decodes and normalizes the vendor frames, forwards
//! them to the caller's [`ClientEmitter`] as they arrive and, once the stream
//! stops for any reason, persists what was accumulated exactly once.
//!
//! Vendor-specific adapters live under `vendors::*`.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chat_stream_pipeline::prelude::*;
//! use chat_stream_pipeline::vendors::generic::GenericProvider;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = ChatStreamService::builder()
//!     .register_provider(Arc::new(GenericProvider::from_env()?))
//!     .record_store(Arc::new(MemoryRecordStore::new()))
//!     .build()?;
//!
//! let (emitter, mut events) = service.open_channel();
//! let request = ChatTurnRequest::new(ModelRef::new("generic", "gpt-4o-mini"))
//!     .uid("u-1")
//!     .chat_id("c-1")
//!     .req_id("r-1")
//!     .message(ChatMessage::user("Say hello"));
//! let handle = service.start_stream(request, emitter);
//!
//! while let Some(event) = events.recv().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! let outcome = handle.join().await?;
//! println!("{:?}", outcome.reason());
//! # Ok(())
//! # }
//! ```

/// Per-stream answer, reasoning and trace buffers.
pub mod accumulator;
/// Terminal event plus exactly-once persistence.
pub mod completion;
/// Transport timeouts and env helpers.
pub mod config;
/// Raw line source to `data:` frames, with cancellation checks.
pub mod decoder;
/// Client-facing live channel implementations.
pub mod emitter;
/// Error types for every failure class of the pipeline.
pub mod errors;
/// Provider and model identifiers plus upstream request types.
pub mod model;
/// Vendor payload normalization and the fallback-message table.
pub mod normalizer;
/// Process-wide `tracing` subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Adapter contract shared by every upstream integration.
pub mod provider;
/// Stream session registry used for cancellation.
pub mod registry;
/// Service entry point, stream worker and handles.
pub mod service;
/// Termination reasons and outbound client events.
pub mod stream;
/// Chat turn identity and inbound request.
pub mod turn;
/// Vendor-specific adapters.
pub mod vendors;

pub use accumulator::{AccumulatedResult, Accumulator, TraceEntry};
pub use completion::{
    CompletionHandler, MemoryRecordStore, Persistence, ReasoningRecord, RecordStore,
    ResponseRecord, TraceRecord,
};
pub use config::TransportTimeouts;
pub use decoder::{DecodeStep, FrameDecoder, RawFrame};
pub use emitter::{ChannelEmitter, ClientEmitter, SseEmitter};
pub use errors::{
    EmitError, ServiceError, SourceError, StoreError, TurnValidationError, UpstreamError,
};
pub use model::{ChatMessage, ModelRef, ProviderId, ProviderRequest, RequestOptions};
pub use normalizer::{FallbackMessage, NormalizedEvent, fallback_message, normalize};
pub use provider::{ProviderAdapter, RawSource, ScriptedSource};
pub use registry::StreamRegistry;
pub use service::{
    CancelHandle, ChatStreamService, ChatStreamServiceBuilder, StreamHandle, StreamOutcome,
};
pub use stream::{OutboundEvent, Termination, TerminationReason};
pub use turn::{ChatTurnContext, ChatTurnRequest, DebugFlags};
