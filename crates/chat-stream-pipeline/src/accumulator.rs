/// Tool or citation trace captured during generation.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceEntry {
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Buffers for one stream, owned by the worker that processes it.
///
/// Grows monotonically while streaming and is consumed once at completion.
#[derive(Debug, Default)]
pub struct Accumulator {
    answer: String,
    reasoning: String,
    traces: Vec<TraceEntry>,
    content_override: Option<String>,
    rounds: u32,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_content(&mut self, text: &str) {
        self.answer.push_str(text);
        self.rounds = self.rounds.saturating_add(1);
    }

    pub fn push_reasoning(&mut self, text: &str) {
        self.reasoning.push_str(text);
    }

    pub fn push_trace(&mut self, kind: impl Into<String>, payload: serde_json::Value) {
        self.traces.push(TraceEntry {
            kind: kind.into(),
            payload,
        });
    }

    /// Replaces the final answer with `text`, regardless of what was or will
    /// be streamed for this turn.
    pub fn override_content(&mut self, text: impl Into<String>) {
        self.content_override = Some(text.into());
    }

    pub fn is_overridden(&self) -> bool {
        self.content_override.is_some()
    }

    /// Consumes the buffers, applying any content override.
    pub fn finish(self) -> AccumulatedResult {
        AccumulatedResult {
            answer: self.content_override.unwrap_or(self.answer),
            reasoning: self.reasoning,
            traces: self.traces,
            rounds: self.rounds,
        }
    }
}

/// Final view of a stream's accumulated output.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AccumulatedResult {
    pub answer: String,
    pub reasoning: String,
    pub traces: Vec<TraceEntry>,
    /// Number of content deltas received.
    pub rounds: u32,
}
