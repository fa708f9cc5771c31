use actix::prelude::*;
use std::sync::Arc;

use crate::event_sourcing::core::Event;
use crate::event_sourcing::store::{DeadLetter, DeadLetterSink, DeadLetterStats};
use crate::event_sourcing::undeliverable::UndeliverableHandler;

// ============================================================================
// Undeliverable Actor
// ============================================================================
//
// Actor front for the dead-letter path:
// - fire-and-forget recording from consumer workers
// - operator queries for inspection and replay tooling
//
// Recording never produces an error result; the handler swallows sink
// failures by contract.
//
// ============================================================================

pub struct UndeliverableActor {
    handler: Arc<UndeliverableHandler>,
    sink: Arc<dyn DeadLetterSink>,
}

impl UndeliverableActor {
    pub fn new(handler: Arc<UndeliverableHandler>, sink: Arc<dyn DeadLetterSink>) -> Self {
        Self { handler, sink }
    }
}

impl Actor for UndeliverableActor {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("UndeliverableActor started - dead-letter channel ready");
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct RecordUndeliverable {
    pub source: String,
    pub error_message: String,
    pub event: Option<Event>,
    pub raw_payload: Option<String>,
}

#[derive(Message)]
#[rtype(result = "Result<Vec<DeadLetter>, String>")]
pub struct GetDeadLetters {
    pub limit: usize,
}

#[derive(Message)]
#[rtype(result = "Result<DeadLetterStats, String>")]
pub struct GetDeadLetterStats;

// ============================================================================
// Handlers
// ============================================================================

impl Handler<RecordUndeliverable> for UndeliverableActor {
    type Result = ResponseFuture<()>;

    fn handle(&mut self, msg: RecordUndeliverable, _: &mut Self::Context) -> Self::Result {
        let handler = self.handler.clone();
        Box::pin(async move {
            handler
                .handle(&msg.source, &msg.error_message, msg.event, msg.raw_payload)
                .await;
        })
    }
}

impl Handler<GetDeadLetters> for UndeliverableActor {
    type Result = ResponseFuture<Result<Vec<DeadLetter>, String>>;

    fn handle(&mut self, msg: GetDeadLetters, _: &mut Self::Context) -> Self::Result {
        let sink = self.sink.clone();
        Box::pin(async move {
            sink.recent(msg.limit)
                .await
                .map_err(|e| format!("failed to query dead letters: {e}"))
        })
    }
}

impl Handler<GetDeadLetterStats> for UndeliverableActor {
    type Result = ResponseFuture<Result<DeadLetterStats, String>>;

    fn handle(&mut self, _msg: GetDeadLetterStats, _: &mut Self::Context) -> Self::Result {
        let sink = self.sink.clone();
        Box::pin(async move {
            sink.stats()
                .await
                .map_err(|e| format!("failed to compute dead-letter stats: {e}"))
        })
    }
}
