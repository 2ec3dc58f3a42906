use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ProviderId;
use crate::config::TransportTimeouts;
use crate::decoder::DONE_SENTINEL;
use crate::errors::{SourceError, UpstreamError};
use crate::model::ProviderRequest;
use crate::provider::{ProviderAdapter, RawSource};
use crate::turn::ChatTurnContext;

use super::model::NativeModel;
use super::sdk::{NativeFailure, NativeListener, NativeRequest, NativeResponse, NativeSdkClient};

pub(crate) const NATIVE_PROVIDER: &str = "native";

#[derive(Debug)]
enum NativeSignal {
    Open,
    Response(NativeResponse),
    Failure(NativeFailure),
    Closed,
}

/// Listener that forwards SDK callbacks into the adapter's channel.
struct ChannelListener {
    tx: mpsc::UnboundedSender<NativeSignal>,
}

impl ChannelListener {
    fn forward(&self, signal: NativeSignal) {
        // The receiving source may already be gone after a cancel.
        let _ = self.tx.send(signal);
    }
}

impl NativeListener for ChannelListener {
    fn on_open(&mut self) {
        self.forward(NativeSignal::Open);
    }

    fn on_response(&mut self, response: NativeResponse) {
        self.forward(NativeSignal::Response(response));
    }

    fn on_failure(&mut self, failure: NativeFailure) {
        self.forward(NativeSignal::Failure(failure));
    }

    fn on_closed(&mut self) {
        self.forward(NativeSignal::Closed);
    }
}

/// Adapter driving the vendor's callback SDK behind the line-source contract.
///
/// Each SDK response is re-encoded as an OpenAI-compatible `data:` line so the
/// same decoder and normalizer handle both adapters.
pub struct NativeProvider {
    client: Arc<dyn NativeSdkClient>,
    timeouts: TransportTimeouts,
}

impl NativeProvider {
    pub fn new(client: Arc<dyn NativeSdkClient>) -> Self {
        Self {
            client,
            timeouts: TransportTimeouts::default(),
        }
    }

    /// Overrides how long to wait for the SDK to open and between responses.
    pub fn timeouts(mut self, timeouts: TransportTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for NativeProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new(NATIVE_PROVIDER)
    }

    async fn start(
        &self,
        turn: &ChatTurnContext,
        request: &ProviderRequest,
    ) -> Result<Box<dyn RawSource>, UpstreamError> {
        let model = NativeModel::from_name(&request.model.model);
        let native_request = NativeRequest {
            model,
            messages: request.messages.clone(),
            temperature: request.options.temperature,
            max_tokens: request.options.max_tokens,
            user: request.options.user.clone().or_else(|| turn.uid.clone()),
        };
        debug!(stream_id = %request.stream_id, requested = %request.model.model, model = %model, "starting native SDK stream");

        let (tx, rx) = mpsc::unbounded_channel();
        self.client
            .stream(native_request, Box::new(ChannelListener { tx }))
            .map_err(|failure| UpstreamError::connect(NATIVE_PROVIDER, failure.message))?;

        let mut source = NativeSource {
            rx,
            pending: VecDeque::new(),
            pending_error: None,
            read_timeout: self.timeouts.read,
            finished: false,
        };
        source.await_first_response(self.timeouts.connect).await?;
        Ok(Box::new(source))
    }
}

fn failure_before_open(failure: NativeFailure) -> UpstreamError {
    match failure.status {
        Some(status) if !(200..300).contains(&status) => {
            UpstreamError::status(NATIVE_PROVIDER, status, failure.message)
        }
        _ => UpstreamError::connect(NATIVE_PROVIDER, failure.message),
    }
}

/// Line source fed by SDK callbacks.
struct NativeSource {
    rx: mpsc::UnboundedReceiver<NativeSignal>,
    pending: VecDeque<String>,
    pending_error: Option<SourceError>,
    read_timeout: std::time::Duration,
    finished: bool,
}

impl NativeSource {
    /// Waits until the SDK has produced its first response.
    ///
    /// Faults before `on_open` are upstream faults; a close with no response
    /// at all is an empty body. Failures after open are deferred to the
    /// first `next_line` as read faults.
    async fn await_first_response(
        &mut self,
        connect_timeout: std::time::Duration,
    ) -> Result<(), UpstreamError> {
        let mut opened = false;
        loop {
            let wait = if opened { self.read_timeout } else { connect_timeout };
            let Ok(signal) = tokio::time::timeout(wait, self.rx.recv()).await else {
                if !opened {
                    return Err(UpstreamError::connect(
                        NATIVE_PROVIDER,
                        "timed out waiting for SDK connection",
                    ));
                }
                self.pending_error = Some(SourceError::new(
                    NATIVE_PROVIDER,
                    "timed out waiting for SDK response",
                ));
                return Ok(());
            };
            match signal {
                Some(NativeSignal::Open) => opened = true,
                // Some SDK builds skip `on_open` and go straight to data.
                Some(NativeSignal::Response(response)) => {
                    self.accept(&response);
                    return Ok(());
                }
                Some(NativeSignal::Failure(failure)) if !opened => {
                    return Err(failure_before_open(failure));
                }
                Some(NativeSignal::Failure(failure)) => {
                    self.pending_error = Some(SourceError::new(NATIVE_PROVIDER, failure.message));
                    return Ok(());
                }
                Some(NativeSignal::Closed) | None => {
                    warn!(opened, "native SDK closed without sending a response");
                    return Err(UpstreamError::empty_body(NATIVE_PROVIDER));
                }
            }
        }
    }

    fn accept(&mut self, response: &NativeResponse) {
        self.pending
            .push_back(format!("data: {}", encode_response(response)));
        if response.is_last {
            self.pending.push_back(format!("data: {DONE_SENTINEL}"));
            self.finished = true;
        }
    }
}

#[async_trait::async_trait]
impl RawSource for NativeSource {
    async fn next_line(&mut self) -> Result<Option<String>, SourceError> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }
            if let Some(err) = self.pending_error.take() {
                self.finished = true;
                return Err(err);
            }
            if self.finished {
                return Ok(None);
            }
            let Ok(signal) = tokio::time::timeout(self.read_timeout, self.rx.recv()).await else {
                self.finished = true;
                return Err(SourceError::new(
                    NATIVE_PROVIDER,
                    "timed out waiting for SDK response",
                ));
            };
            match signal {
                Some(NativeSignal::Open) => {}
                Some(NativeSignal::Response(response)) => self.accept(&response),
                Some(NativeSignal::Failure(failure)) => {
                    self.finished = true;
                    return Err(SourceError::new(NATIVE_PROVIDER, failure.message));
                }
                Some(NativeSignal::Closed) | None => self.finished = true,
            }
        }
    }
}

/// Re-encodes an SDK response in the OpenAI-compatible frame shape.
///
/// The answer and reasoning go into the first choice slot; tool traces go into
/// a second slot, the same layout the HTTP vendor uses.
fn encode_response(response: &NativeResponse) -> serde_json::Value {
    let mut delta = serde_json::Map::new();
    if let Some(content) = &response.content {
        delta.insert("content".into(), serde_json::json!(content));
    }
    if let Some(reasoning) = &response.reasoning_content {
        delta.insert("reasoning_content".into(), serde_json::json!(reasoning));
    }
    let mut choices = vec![serde_json::json!({ "delta": delta })];
    if !response.tool_calls.is_empty() {
        choices.push(serde_json::json!({ "delta": { "tool_calls": response.tool_calls } }));
    }
    let mut frame = serde_json::json!({
        "code": response.code,
        "sid": response.sid,
        "choices": choices,
    });
    if let Some(message) = &response.message {
        frame["message"] = serde_json::json!(message);
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{MemoryRecordStore, Persistence};
    use crate::model::{ChatMessage, ModelRef, RequestOptions};
    use crate::service::ChatStreamService;
    use crate::stream::{OutboundEvent, TerminationReason};
    use crate::turn::ChatTurnRequest;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone)]
    enum Script {
        Open,
        Response(NativeResponse),
        Failure(NativeFailure),
        Closed,
        Stall(Duration),
    }

    /// SDK stand-in that replays callbacks from its own thread.
    struct FakeSdk {
        script: Vec<Script>,
        refuse: Option<NativeFailure>,
        seen: Mutex<Option<NativeRequest>>,
    }

    impl FakeSdk {
        fn new(script: Vec<Script>) -> Self {
            Self {
                script,
                refuse: None,
                seen: Mutex::new(None),
            }
        }
    }

    impl NativeSdkClient for FakeSdk {
        fn stream(
            &self,
            request: NativeRequest,
            mut listener: Box<dyn NativeListener>,
        ) -> Result<(), NativeFailure> {
            if let Some(failure) = &self.refuse {
                return Err(failure.clone());
            }
            *self.seen.lock().expect("lock") = Some(request);
            let script = self.script.clone();
            std::thread::spawn(move || {
                for step in script {
                    match step {
                        Script::Open => listener.on_open(),
                        Script::Response(response) => listener.on_response(response),
                        Script::Failure(failure) => listener.on_failure(failure),
                        Script::Closed => listener.on_closed(),
                        Script::Stall(pause) => std::thread::sleep(pause),
                    }
                }
            });
            Ok(())
        }
    }

    fn request(model: &str) -> ProviderRequest {
        ProviderRequest {
            stream_id: "s1".into(),
            model: ModelRef::new(NATIVE_PROVIDER, model),
            messages: vec![ChatMessage::user("hi")],
            options: RequestOptions::default(),
        }
    }

    fn text(content: &str, is_last: bool) -> Script {
        Script::Response(NativeResponse {
            sid: "sid-1".into(),
            content: Some(content.into()),
            is_last,
            ..NativeResponse::default()
        })
    }

    async fn drain(source: &mut Box<dyn RawSource>) -> Result<Vec<String>, SourceError> {
        let mut lines = Vec::new();
        while let Some(line) = source.next_line().await? {
            lines.push(line);
        }
        Ok(lines)
    }

    #[tokio::test]
    async fn responses_become_data_lines_ending_with_sentinel() {
        let sdk = Arc::new(FakeSdk::new(vec![
            Script::Open,
            text("Hel", false),
            text("lo", true),
            Script::Closed,
        ]));
        let provider = NativeProvider::new(sdk.clone());
        let mut source = provider
            .start(&ChatTurnContext::default(), &request("max"))
            .await
            .expect("start");
        let lines = drain(&mut source).await.expect("lines");
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("data: {"));
        assert!(lines[0].contains("\"content\":\"Hel\""));
        assert_eq!(lines[2], "data: [DONE]");
        let seen = sdk.seen.lock().expect("lock").clone().expect("request");
        assert_eq!(seen.model, NativeModel::Max);
    }

    #[tokio::test]
    async fn unknown_model_name_uses_default() {
        let sdk = Arc::new(FakeSdk::new(vec![Script::Open, text("x", true)]));
        let provider = NativeProvider::new(sdk.clone());
        provider
            .start(&ChatTurnContext::default(), &request("mystery-model"))
            .await
            .expect("start");
        let seen = sdk.seen.lock().expect("lock").clone().expect("request");
        assert_eq!(seen.model, NativeModel::DEFAULT);
    }

    #[tokio::test]
    async fn failure_before_open_maps_to_status_or_connect() {
        let status_sdk = Arc::new(FakeSdk::new(vec![Script::Failure(NativeFailure::new(
            Some(401),
            "unauthorized",
        ))]));
        let err = NativeProvider::new(status_sdk)
            .start(&ChatTurnContext::default(), &request("lite"))
            .await
            .err()
            .expect("status error");
        assert!(matches!(err, UpstreamError::Status { status: 401, .. }));

        let connect_sdk = Arc::new(FakeSdk::new(vec![Script::Failure(NativeFailure::new(
            None,
            "dns failure",
        ))]));
        let err = NativeProvider::new(connect_sdk)
            .start(&ChatTurnContext::default(), &request("lite"))
            .await
            .err()
            .expect("connect error");
        assert!(matches!(err, UpstreamError::Connect { .. }));
    }

    #[tokio::test]
    async fn sdk_refusal_is_connect_fault() {
        let mut sdk = FakeSdk::new(vec![]);
        sdk.refuse = Some(NativeFailure::new(None, "no credentials"));
        let err = NativeProvider::new(Arc::new(sdk))
            .start(&ChatTurnContext::default(), &request("lite"))
            .await
            .err()
            .expect("refused");
        assert!(matches!(err, UpstreamError::Connect { message, .. } if message == "no credentials"));
    }

    #[tokio::test]
    async fn close_before_any_response_is_empty_body() {
        let sdk = Arc::new(FakeSdk::new(vec![Script::Closed]));
        let err = NativeProvider::new(sdk)
            .start(&ChatTurnContext::default(), &request("lite"))
            .await
            .err()
            .expect("empty");
        assert!(matches!(err, UpstreamError::EmptyBody { .. }));
    }

    #[tokio::test]
    async fn failure_after_open_is_read_fault() {
        let sdk = Arc::new(FakeSdk::new(vec![
            Script::Open,
            text("partial", false),
            Script::Failure(NativeFailure::new(None, "socket closed")),
        ]));
        let mut source = NativeProvider::new(sdk)
            .start(&ChatTurnContext::default(), &request("lite"))
            .await
            .expect("start");
        assert!(source.next_line().await.expect("line").is_some());
        let err = source.next_line().await.expect_err("read fault");
        assert_eq!(err.message, "socket closed");
    }

    #[tokio::test]
    async fn silent_sdk_times_out_as_connect_fault() {
        let sdk = Arc::new(FakeSdk::new(vec![Script::Stall(Duration::from_millis(500))]));
        let err = NativeProvider::new(sdk)
            .timeouts(TransportTimeouts::default().connect(Duration::from_millis(20)))
            .start(&ChatTurnContext::default(), &request("lite"))
            .await
            .err()
            .expect("timeout");
        assert!(matches!(err, UpstreamError::Connect { .. }));
    }

    #[tokio::test]
    async fn open_then_close_without_response_is_empty_body() {
        let sdk = Arc::new(FakeSdk::new(vec![Script::Open, Script::Closed]));
        let err = NativeProvider::new(sdk)
            .start(&ChatTurnContext::default(), &request("lite"))
            .await
            .err()
            .expect("empty");
        assert!(matches!(err, UpstreamError::EmptyBody { .. }));
    }

    #[tokio::test]
    async fn failure_between_open_and_first_response_is_read_fault() {
        let sdk = Arc::new(FakeSdk::new(vec![
            Script::Open,
            Script::Failure(NativeFailure::new(Some(500), "engine error")),
        ]));
        let mut source = NativeProvider::new(sdk)
            .start(&ChatTurnContext::default(), &request("lite"))
            .await
            .expect("opened");
        let err = source.next_line().await.expect_err("read fault");
        assert_eq!(err.message, "engine error");
        assert_eq!(source.next_line().await, Ok(None));
    }

    async fn run_turn(
        script: Vec<Script>,
        req_id: &str,
    ) -> (
        crate::service::StreamOutcome,
        Vec<OutboundEvent>,
        Arc<MemoryRecordStore>,
    ) {
        let store = Arc::new(MemoryRecordStore::new());
        let service = ChatStreamService::builder()
            .register_provider(Arc::new(NativeProvider::new(Arc::new(FakeSdk::new(script)))))
            .record_store(store.clone())
            .build()
            .expect("service");
        let (emitter, mut rx) = service.open_channel();
        let turn = ChatTurnRequest::new(ModelRef::new(NATIVE_PROVIDER, "max"))
            .uid("u1")
            .chat_id("c1")
            .req_id(req_id)
            .message(ChatMessage::user("hi"));
        let outcome = service
            .start_stream(turn, emitter)
            .join()
            .await
            .expect("join");
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, events, store)
    }

    fn completes_once(events: &[OutboundEvent]) -> bool {
        events.iter().filter(|e| e.is_terminal()).count() == 1
            && events.last() == Some(&OutboundEvent::Complete)
    }

    #[tokio::test]
    async fn service_streams_native_turn_with_traces() {
        let (outcome, events, store) = run_turn(
            vec![
                Script::Open,
                Script::Response(NativeResponse {
                    sid: "sid-1".into(),
                    reasoning_content: Some("plan".into()),
                    content: Some("Answer".into()),
                    tool_calls: vec![
                        serde_json::json!({"type": "web_search", "url": "https://a"}),
                        serde_json::json!({"type": "citation", "index": 1}),
                    ],
                    ..NativeResponse::default()
                }),
                text(" done", true),
                Script::Closed,
            ],
            "r-native",
        )
        .await;

        assert_eq!(outcome.reason(), Some(TerminationReason::NormalEnd));
        assert_eq!(outcome.persistence(), Persistence::Persisted);
        let kinds: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                OutboundEvent::Trace { kind, .. } => Some(kind.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec!["web_search", "citation"]);
        assert!(completes_once(&events), "events: {events:?}");

        assert_eq!(store.response("r-native").expect("response").answer, "Answer done");
        assert_eq!(store.reasoning("r-native").expect("reasoning").content, "plan");
        let traces = store.traces("r-native");
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[1].payload["index"], 1);
    }

    #[tokio::test]
    async fn service_applies_content_policy_code_from_native_sdk() {
        let (outcome, events, store) = run_turn(
            vec![
                Script::Open,
                text("unsafe", false),
                Script::Response(NativeResponse {
                    code: 10013,
                    sid: "sid-1".into(),
                    content: Some(" rest".into()),
                    ..NativeResponse::default()
                }),
                text(" more", true),
                Script::Closed,
            ],
            "r-policy",
        )
        .await;

        assert_eq!(outcome.reason(), Some(TerminationReason::NormalEnd));
        let fallback = crate::normalizer::fallback_message(10013)
            .expect("row")
            .message;
        let shown: Vec<&OutboundEvent> = events
            .iter()
            .filter(|event| matches!(event, OutboundEvent::Content { .. }))
            .collect();
        assert_eq!(
            shown,
            vec![
                &OutboundEvent::Content {
                    delta: "unsafe".into(),
                    replace: false
                },
                &OutboundEvent::Content {
                    delta: fallback.into(),
                    replace: true
                },
            ]
        );
        assert!(completes_once(&events), "events: {events:?}");
        assert_eq!(store.response("r-policy").expect("response").answer, fallback);
    }

    #[test]
    fn tool_calls_go_to_second_choice_slot() {
        let frame = encode_response(&NativeResponse {
            code: 0,
            sid: "s".into(),
            content: Some("answer".into()),
            tool_calls: vec![serde_json::json!({"type": "web_search", "url": "https://a"})],
            ..NativeResponse::default()
        });
        assert_eq!(frame["choices"][0]["delta"]["content"], "answer");
        assert_eq!(frame["choices"][1]["delta"]["tool_calls"][0]["type"], "web_search");
    }
}
