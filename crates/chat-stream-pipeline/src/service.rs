use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument as _, debug, info, warn};

use crate::accumulator::Accumulator;
use crate::completion::{CompletionHandler, Persistence, RecordStore};
use crate::decoder::{DecodeStep, FrameDecoder};
use crate::emitter::{ChannelEmitter, ClientEmitter, outbound_event};
use crate::errors::{EmitError, ServiceError, TurnValidationError, UpstreamError};
use crate::model::{ProviderId, ProviderRequest};
use crate::normalizer::{NormalizedEvent, PARSE_FAILURE_CODE, normalize};
use crate::provider::{ProviderAdapter, RawSource};
use crate::registry::StreamRegistry;
use crate::stream::{OutboundEvent, Termination, TerminationReason};
use crate::turn::{ChatTurnContext, ChatTurnRequest};

const DEFAULT_STREAM_BUFFER_CAPACITY: usize = 128;

struct ServiceInner {
    providers: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
    registry: Arc<StreamRegistry>,
    completion: CompletionHandler,
    stream_buffer_capacity: usize,
}

impl ServiceInner {
    fn provider(&self, id: &ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.get(id).cloned()
    }
}

/// Entry point for streamed chat turns.
///
/// Cheap to clone; clones share providers, the session registry and the
/// record store.
#[derive(Clone)]
pub struct ChatStreamService {
    inner: Arc<ServiceInner>,
}

impl ChatStreamService {
    pub fn builder() -> ChatStreamServiceBuilder {
        ChatStreamServiceBuilder::default()
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.inner.registry
    }

    /// Flags a live stream as cancelled. Returns whether it was live.
    pub fn cancel(&self, stream_id: &str) -> bool {
        self.inner.registry.cancel(stream_id)
    }

    /// Creates a channel emitter sized with the configured buffer capacity.
    pub fn open_channel(&self) -> (ChannelEmitter, mpsc::Receiver<OutboundEvent>) {
        ChannelEmitter::channel(self.inner.stream_buffer_capacity)
    }

    /// Validates the turn and spawns its streaming worker.
    ///
    /// Returns immediately. A rejected turn still gets a worker, which sends
    /// a single `error` event and never reaches the upstream. Must be called
    /// from within a tokio runtime.
    pub fn start_stream<E>(&self, request: ChatTurnRequest, emitter: E) -> StreamHandle
    where
        E: ClientEmitter + 'static,
    {
        let stream_id = request.stream_id.clone();
        let span = tracing::info_span!(
            "chat_stream",
            stream_id = %stream_id,
            req_id = request.req_id.as_deref().unwrap_or_default(),
            provider = %request.model.provider,
            model = %request.model.model,
        );
        let mut cancel = CancelHandle {
            registry: None,
            stream_id: stream_id.clone(),
        };

        let (turn, provider_request) = request.into_parts();
        let task = match self.admit(&turn, &provider_request) {
            Ok(provider) => {
                cancel.registry = Some(self.inner.registry.clone());
                tokio::spawn(
                    run_stream(
                        self.inner.clone(),
                        provider,
                        turn,
                        provider_request,
                        emitter,
                    )
                    .instrument(span),
                )
            }
            Err(error) => tokio::spawn(reject(stream_id.clone(), error, emitter).instrument(span)),
        };

        StreamHandle {
            stream_id,
            cancel,
            task,
        }
    }

    /// Runs every pre-flight check and registers the session on success.
    fn admit(
        &self,
        turn: &ChatTurnContext,
        request: &ProviderRequest,
    ) -> Result<Arc<dyn ProviderAdapter>, TurnValidationError> {
        turn.validate()?;
        if request.stream_id.trim().is_empty() {
            return Err(TurnValidationError::EmptyStreamId);
        }
        if request.messages.is_empty() {
            return Err(TurnValidationError::NoMessages);
        }
        if request.model.model.trim().is_empty() {
            return Err(TurnValidationError::EmptyModel);
        }
        let provider = self
            .inner
            .provider(&request.model.provider)
            .ok_or_else(|| TurnValidationError::ProviderNotFound(request.model.provider.clone()))?;
        if !self.inner.registry.open(&request.stream_id) {
            return Err(TurnValidationError::DuplicateStream(
                request.stream_id.clone(),
            ));
        }
        Ok(provider)
    }
}

/// Builder used to register adapters and collaborators before creating a
/// [`ChatStreamService`].
pub struct ChatStreamServiceBuilder {
    providers: Vec<Arc<dyn ProviderAdapter>>,
    registry: Option<Arc<StreamRegistry>>,
    store: Option<Arc<dyn RecordStore>>,
    stream_buffer_capacity: usize,
}

impl Default for ChatStreamServiceBuilder {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            registry: None,
            store: None,
            stream_buffer_capacity: DEFAULT_STREAM_BUFFER_CAPACITY,
        }
    }
}

impl ChatStreamServiceBuilder {
    /// Registers an adapter under its own provider id.
    pub fn register_provider(mut self, provider: Arc<dyn ProviderAdapter>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Shares an existing registry instead of creating a private one.
    pub fn registry(mut self, registry: Arc<StreamRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Capacity of channels created by [`ChatStreamService::open_channel`].
    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<ChatStreamService, ServiceError> {
        if self.stream_buffer_capacity == 0 {
            return Err(ServiceError::Config(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        let store = self
            .store
            .ok_or_else(|| ServiceError::Config("a record store is required".into()))?;

        let mut providers: HashMap<ProviderId, Arc<dyn ProviderAdapter>> = HashMap::new();
        let mut seen: HashSet<ProviderId> = HashSet::new();
        for provider in self.providers {
            let id = provider.id();
            if !seen.insert(id.clone()) {
                return Err(ServiceError::Config(format!(
                    "duplicate provider registration: {id}"
                )));
            }
            providers.insert(id, provider);
        }

        Ok(ChatStreamService {
            inner: Arc::new(ServiceInner {
                providers,
                registry: self.registry.unwrap_or_default(),
                completion: CompletionHandler::new(store),
                stream_buffer_capacity: self.stream_buffer_capacity,
            }),
        })
    }
}

/// Handle used to request cancellation of a running stream.
///
/// Handles of rejected turns are inert, so they can never reach a live
/// stream that happens to share the id.
#[derive(Clone)]
pub struct CancelHandle {
    registry: Option<Arc<StreamRegistry>>,
    stream_id: String,
}

impl CancelHandle {
    /// Requests cancellation. Observed by the worker around its next read.
    pub fn cancel(&self) -> bool {
        self.registry
            .as_ref()
            .is_some_and(|registry| registry.cancel(&self.stream_id))
    }
}

/// Final state of one stream worker.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamOutcome {
    /// The turn failed validation; nothing was started.
    Rejected {
        stream_id: String,
        error: TurnValidationError,
    },
    Finished {
        stream_id: String,
        termination: Termination,
        persistence: Persistence,
    },
}

impl StreamOutcome {
    pub fn stream_id(&self) -> &str {
        match self {
            Self::Rejected { stream_id, .. } | Self::Finished { stream_id, .. } => stream_id,
        }
    }

    /// Termination reason, `None` for a rejected turn.
    pub fn reason(&self) -> Option<TerminationReason> {
        match self {
            Self::Rejected { .. } => None,
            Self::Finished { termination, .. } => Some(termination.reason),
        }
    }

    pub fn persistence(&self) -> Persistence {
        match self {
            Self::Rejected { .. } => Persistence::Discarded,
            Self::Finished { persistence, .. } => persistence.clone(),
        }
    }
}

/// Handle returned by [`ChatStreamService::start_stream`].
pub struct StreamHandle {
    stream_id: String,
    cancel: CancelHandle,
    task: JoinHandle<StreamOutcome>,
}

impl StreamHandle {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    /// Waits for the worker to finish.
    pub async fn join(self) -> Result<StreamOutcome, ServiceError> {
        self.task
            .await
            .map_err(|err| ServiceError::Worker(format!("stream {}: {err}", self.stream_id)))
    }
}

async fn reject<E>(stream_id: String, error: TurnValidationError, mut emitter: E) -> StreamOutcome
where
    E: ClientEmitter,
{
    warn!(error = %error, "chat turn rejected");
    let event = OutboundEvent::Error {
        message: error.to_string(),
    };
    if let Err(err) = emitter.send(event).await {
        debug!(error = %err, "could not deliver rejection");
    }
    StreamOutcome::Rejected { stream_id, error }
}

async fn run_stream<E>(
    inner: Arc<ServiceInner>,
    provider: Arc<dyn ProviderAdapter>,
    turn: ChatTurnContext,
    request: ProviderRequest,
    mut emitter: E,
) -> StreamOutcome
where
    E: ClientEmitter,
{
    let stream_id = request.stream_id.clone();
    let mut accumulator = Accumulator::new();
    debug!(preview = turn.is_preview, "starting upstream call");

    let termination = match provider.start(&turn, &request).await {
        Ok(mut source) => {
            pump(
                &inner.registry,
                &stream_id,
                source.as_mut(),
                &mut emitter,
                &mut accumulator,
            )
            .await
        }
        Err(err) => {
            warn!(error = %err, "upstream call failed before streaming");
            upstream_termination(&err)
        }
    };

    inner.registry.close(&stream_id);
    info!(reason = %termination.reason, "chat stream ended");
    let persistence = inner
        .completion
        .finish(&mut emitter, &turn, &termination, accumulator)
        .await;

    StreamOutcome::Finished {
        stream_id,
        termination,
        persistence,
    }
}

/// Decode/normalize/emit loop. Returns the first terminal condition.
async fn pump(
    registry: &StreamRegistry,
    stream_id: &str,
    source: &mut dyn RawSource,
    emitter: &mut dyn ClientEmitter,
    accumulator: &mut Accumulator,
) -> Termination {
    let decoder = FrameDecoder::new(registry, stream_id);
    loop {
        let payload = match decoder.next_frame(source).await {
            DecodeStep::Frame(payload) => payload,
            DecodeStep::Stop(termination) => return termination,
        };
        for event in normalize(&payload) {
            if let Some(termination) = dispatch(event, emitter, accumulator).await {
                return termination;
            }
        }
    }
}

/// Records one event and forwards it. The accumulator is always updated
/// before the client sees the event.
async fn dispatch(
    event: NormalizedEvent,
    emitter: &mut dyn ClientEmitter,
    accumulator: &mut Accumulator,
) -> Option<Termination> {
    match &event {
        NormalizedEvent::ContentDelta { text } => accumulator.push_content(text),
        NormalizedEvent::ReasoningDelta { text } => accumulator.push_reasoning(text),
        NormalizedEvent::ToolTrace { kind, payload } => {
            accumulator.push_trace(kind.clone(), payload.clone())
        }
        NormalizedEvent::VendorError {
            content_override: Some(text),
            ..
        } => accumulator.override_content(text.clone()),
        NormalizedEvent::VendorError { code, .. } if *code == PARSE_FAILURE_CODE => {}
        NormalizedEvent::VendorError { message, .. } => accumulator.push_content(message),
        NormalizedEvent::StreamEnd => {
            return Some(Termination::new(TerminationReason::NormalEnd));
        }
    }

    // Once overridden, the client keeps showing the replacement text only.
    if accumulator.is_overridden() && appends_content(&event) {
        return None;
    }
    let outbound = outbound_event(&event)?;
    match emitter.send(outbound).await {
        Ok(()) => None,
        Err(EmitError::Closed) => {
            info!("client disconnected mid-stream");
            Some(Termination::new(TerminationReason::ClientDisconnected))
        }
        Err(err) => {
            warn!(error = %err, "client write failed, continuing");
            None
        }
    }
}

fn appends_content(event: &NormalizedEvent) -> bool {
    matches!(
        event,
        NormalizedEvent::ContentDelta { .. }
            | NormalizedEvent::VendorError {
                content_override: None,
                ..
            }
    )
}

fn upstream_termination(err: &UpstreamError) -> Termination {
    let reason = match err {
        UpstreamError::Connect { .. } => TerminationReason::UpstreamConnectFailed,
        UpstreamError::Status { .. } => TerminationReason::UpstreamStatusError,
        UpstreamError::EmptyBody { .. } => TerminationReason::UpstreamEmptyBody,
    };
    Termination::with_detail(reason, err.to_string())
}
