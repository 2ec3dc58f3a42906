use std::sync::Arc;

use chat_stream_pipeline::observability::init_observability;
use chat_stream_pipeline::prelude::*;
use chat_stream_pipeline::vendors::generic::GenericProvider;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ServiceError> {
    let _ = dotenvy::dotenv();
    init_observability();

    let store = Arc::new(MemoryRecordStore::new());
    let service = ChatStreamService::builder()
        .register_provider(Arc::new(GenericProvider::from_env()?))
        .record_store(store.clone())
        .build()?;

    let model = std::env::var("CHAT_STREAM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    let request = ChatTurnRequest::new(ModelRef::new("generic", model))
        .uid("demo-user")
        .chat_id("demo-chat")
        .req_id("demo-req")
        .message(ChatMessage::system("Answer briefly."))
        .message(ChatMessage::user("Stream a greeting."));

    let (emitter, mut events) = service.open_channel();
    let handle = service.start_stream(request, emitter);

    while let Some(event) = events.recv().await {
        match event {
            OutboundEvent::Content { delta, replace: false } => print!("{delta}"),
            OutboundEvent::Content { delta, replace: true } => print!("\n[replaced] {delta}"),
            OutboundEvent::Reasoning { .. } | OutboundEvent::Trace { .. } => {}
            OutboundEvent::Complete => println!(),
            OutboundEvent::Interrupted => println!("\n[interrupted]"),
            OutboundEvent::Error { message } => eprintln!("stream error: {message}"),
        }
    }

    let outcome = handle.join().await?;
    println!("ended: {:?}, persistence: {:?}", outcome.reason(), outcome.persistence());
    if let Some(record) = store.response("demo-req") {
        println!("stored {} chars over {} rounds", record.answer.len(), record.rounds);
    }
    Ok(())
}
