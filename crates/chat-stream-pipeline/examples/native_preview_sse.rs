//! Preview turn through the native adapter, written as SSE frames to stdout.
//!
//! The SDK here is a canned stand-in that replays a short answer from its
//! own thread, the way the vendor SDK reports progress.

use std::sync::Arc;
use std::time::Duration;

use chat_stream_pipeline::SseEmitter;
use chat_stream_pipeline::observability::init_observability;
use chat_stream_pipeline::prelude::*;
use chat_stream_pipeline::vendors::native::{
    NativeFailure, NativeListener, NativeProvider, NativeRequest, NativeResponse, NativeSdkClient,
};

struct CannedSdk;

impl NativeSdkClient for CannedSdk {
    fn stream(
        &self,
        request: NativeRequest,
        mut listener: Box<dyn NativeListener>,
    ) -> Result<(), NativeFailure> {
        let chunks = [
            format!("Hello from {}", request.model.domain()),
            ", streamed".to_string(),
            " in three parts.".to_string(),
        ];
        std::thread::spawn(move || {
            listener.on_open();
            let last = chunks.len() - 1;
            for (index, chunk) in chunks.into_iter().enumerate() {
                std::thread::sleep(Duration::from_millis(50));
                listener.on_response(NativeResponse {
                    sid: "demo-sid".into(),
                    content: Some(chunk),
                    is_last: index == last,
                    ..NativeResponse::default()
                });
            }
            listener.on_closed();
        });
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ServiceError> {
    let _ = dotenvy::dotenv();
    init_observability();

    let service = ChatStreamService::builder()
        .register_provider(Arc::new(NativeProvider::new(Arc::new(CannedSdk))))
        .record_store(Arc::new(MemoryRecordStore::new()))
        .build()?;

    let request = ChatTurnRequest::new(ModelRef::new("native", "max"))
        .message(ChatMessage::user("Say hello."))
        .preview(true);
    let outcome = service
        .start_stream(request, SseEmitter::new(tokio::io::stdout()))
        .join()
        .await?;

    eprintln!("ended: {:?}, persistence: {:?}", outcome.reason(), outcome.persistence());
    Ok(())
}
