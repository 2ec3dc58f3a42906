//! Terminal handling: final client event plus exactly-once persistence.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::accumulator::{AccumulatedResult, Accumulator};
use crate::emitter::{ClientEmitter, terminal_event};
use crate::errors::{EmitError, StoreError};
use crate::stream::Termination;
use crate::turn::ChatTurnContext;

/// Stored answer for one request.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseRecord {
    pub req_id: String,
    pub chat_id: Option<String>,
    pub uid: Option<String>,
    pub answer: String,
    /// Number of content rounds streamed for this answer.
    pub rounds: u32,
    /// Replaces an existing record for `req_id` instead of adding one.
    pub edit_replay: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReasoningRecord {
    pub req_id: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraceRecord {
    pub req_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Storage collaborator receiving the durable record of a stream.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn save_response(&self, record: ResponseRecord) -> Result<(), StoreError>;
    async fn save_reasoning(&self, record: ReasoningRecord) -> Result<(), StoreError>;
    async fn save_traces(&self, records: Vec<TraceRecord>) -> Result<(), StoreError>;
}

/// Process-local record store, keyed by request id.
#[derive(Default)]
pub struct MemoryRecordStore {
    responses: DashMap<String, ResponseRecord>,
    reasoning: DashMap<String, ReasoningRecord>,
    traces: DashMap<String, Vec<TraceRecord>>,
    writes: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn response(&self, req_id: &str) -> Option<ResponseRecord> {
        self.responses.get(req_id).map(|r| r.clone())
    }

    pub fn reasoning(&self, req_id: &str) -> Option<ReasoningRecord> {
        self.reasoning.get(req_id).map(|r| r.clone())
    }

    pub fn traces(&self, req_id: &str) -> Vec<TraceRecord> {
        self.traces
            .get(req_id)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Total number of save calls received.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
    async fn save_response(&self, record: ResponseRecord) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if !record.edit_replay && self.responses.contains_key(&record.req_id) {
            return Err(StoreError::new(format!(
                "response for request {} already exists",
                record.req_id
            )));
        }
        self.responses.insert(record.req_id.clone(), record);
        Ok(())
    }

    async fn save_reasoning(&self, record: ReasoningRecord) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.reasoning.insert(record.req_id.clone(), record);
        Ok(())
    }

    async fn save_traces(&self, records: Vec<TraceRecord>) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let Some(req_id) = records.first().map(|r| r.req_id.clone()) else {
            return Ok(());
        };
        self.traces.insert(req_id, records);
        Ok(())
    }
}

/// What happened to the accumulated output of a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Persistence {
    Persisted,
    Discarded,
    /// The store rejected the write; the error was logged.
    Failed(String),
}

/// Runs once per stream, at the single exit point of the worker.
pub struct CompletionHandler {
    store: Arc<dyn RecordStore>,
}

impl CompletionHandler {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Sends the terminal event, then persists what was accumulated.
    ///
    /// Neither a failed send nor a failed write escapes this call.
    pub async fn finish(
        &self,
        emitter: &mut dyn ClientEmitter,
        turn: &ChatTurnContext,
        termination: &Termination,
        accumulator: Accumulator,
    ) -> Persistence {
        if let Some(event) = terminal_event(termination) {
            match emitter.send(event).await {
                Ok(()) => {}
                Err(EmitError::Closed) => {
                    debug!(reason = %termination.reason, "client gone before terminal event")
                }
                Err(err) => warn!(error = %err, "failed to send terminal event"),
            }
        }
        self.persist(turn, termination, accumulator.finish()).await
    }

    /// Writes the response, reasoning and trace records for the turn.
    pub async fn persist(
        &self,
        turn: &ChatTurnContext,
        termination: &Termination,
        result: AccumulatedResult,
    ) -> Persistence {
        if turn.is_preview {
            debug!(reason = %termination.reason, "preview turn, skipping persistence");
            return Persistence::Discarded;
        }
        if termination.reason.is_upstream_fault() {
            debug!(reason = %termination.reason, "upstream never streamed, nothing to persist");
            return Persistence::Discarded;
        }
        let Some(req_id) = turn.req_id.clone() else {
            warn!("turn without req_id reached persistence, discarding");
            return Persistence::Discarded;
        };

        match self.write_records(turn, &req_id, result).await {
            Ok(()) => {
                info!(req_id = %req_id, reason = %termination.reason, "chat response persisted");
                Persistence::Persisted
            }
            Err(err) => {
                error!(req_id = %req_id, error = %err, "failed to persist chat response");
                Persistence::Failed(err.to_string())
            }
        }
    }

    async fn write_records(
        &self,
        turn: &ChatTurnContext,
        req_id: &str,
        result: AccumulatedResult,
    ) -> Result<(), StoreError> {
        self.store
            .save_response(ResponseRecord {
                req_id: req_id.to_string(),
                chat_id: turn.chat_id.clone(),
                uid: turn.uid.clone(),
                answer: result.answer,
                rounds: result.rounds,
                edit_replay: turn.is_edit_replay,
            })
            .await?;
        if !result.reasoning.is_empty() {
            self.store
                .save_reasoning(ReasoningRecord {
                    req_id: req_id.to_string(),
                    content: result.reasoning,
                })
                .await?;
        }
        if !result.traces.is_empty() {
            let records = result
                .traces
                .into_iter()
                .map(|trace| TraceRecord {
                    req_id: req_id.to_string(),
                    kind: trace.kind,
                    payload: trace.payload,
                })
                .collect();
            self.store.save_traces(records).await?;
        }
        Ok(())
    }
}
