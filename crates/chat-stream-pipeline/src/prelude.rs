//! Common imports for typical pipeline usage.
pub use crate::{
    CancelHandle, ChatMessage, ChatStreamService, ChatTurnRequest, ClientEmitter,
    MemoryRecordStore, ModelRef, OutboundEvent, Persistence, ProviderId, RecordStore,
    RequestOptions, ServiceError, StreamHandle, StreamOutcome, TerminationReason,
};
