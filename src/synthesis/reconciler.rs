use super::events::SynthesisEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    Streaming,
    Done,
    Failed(String),
}

/// Consumer-side fold of a synthesis event stream into the answer text.
#[derive(Debug, Clone)]
pub struct StreamReconciler {
    text: String,
    state: StreamState,
    skipped_lines: usize,
}

impl Default for StreamReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReconciler {
    pub fn new() -> Self {
        Self {
            text: String::new(),
            state: StreamState::Streaming,
            skipped_lines: 0,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state != StreamState::Streaming
    }

    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Applies one event. Returns false when the event was ignored because
    /// the stream had already ended.
    pub fn apply(&mut self, event: &SynthesisEvent) -> bool {
        if self.is_terminal() {
            return false;
        }

        match event {
            SynthesisEvent::Chunk {
                content,
                full_content,
                ..
            } => match full_content {
                Some(full) => self.text.clone_from(full),
                None => self.text.push_str(content),
            },
            SynthesisEvent::Done { content } => {
                if !content.is_empty() {
                    self.text.clone_from(content);
                }
                self.state = StreamState::Done;
            }
            SynthesisEvent::Error { error } => {
                self.state = StreamState::Failed(error.clone());
            }
        }
        true
    }

    /// Parses and applies one NDJSON line. Blank and malformed lines are
    /// skipped without affecting the stream.
    pub fn apply_line(&mut self, line: &str) -> Option<SynthesisEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match serde_json::from_str::<SynthesisEvent>(line) {
            Ok(event) => self.apply(&event).then_some(event),
            Err(err) => {
                self.skipped_lines += 1;
                tracing::warn!(error = %err, "Skipping malformed stream line");
                None
            }
        }
    }
}
