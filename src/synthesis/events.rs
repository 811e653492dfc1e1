use serde::{Deserialize, Serialize};

/// One line of the newline-delimited answer stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SynthesisEvent {
    Chunk {
        content: String,
        /// Character offset of `content` within the accumulated answer.
        #[serde(default)]
        position: usize,
        #[serde(
            rename = "fullContent",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        full_content: Option<String>,
    },
    Done {
        #[serde(default)]
        content: String,
    },
    Error {
        error: String,
    },
}

impl SynthesisEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SynthesisEvent::Chunk { .. })
    }

    /// Serialized event followed by `\n`.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|err| {
            format!(r#"{{"type":"error","error":"failed to encode event: {}"}}"#, err)
        });
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn chunk_line_uses_wire_field_names() {
        let event = SynthesisEvent::Chunk {
            content: "is".into(),
            position: 9,
            full_content: Some("Mysticism is".into()),
        };
        let line = event.to_line();
        assert!(line.ends_with('\n'));

        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(
            value,
            json!({ "type": "chunk", "content": "is", "position": 9, "fullContent": "Mysticism is" })
        );
    }

    #[test]
    fn terminal_events_are_flagged() {
        assert!(SynthesisEvent::Done { content: String::new() }.is_terminal());
        assert!(SynthesisEvent::Error { error: "x".into() }.is_terminal());
        assert!(!SynthesisEvent::Chunk {
            content: "a".into(),
            position: 0,
            full_content: None
        }
        .is_terminal());
    }

    #[test]
    fn chunk_without_full_content_parses() {
        let event: SynthesisEvent =
            serde_json::from_str(r#"{"type":"chunk","content":"hi"}"#).unwrap();
        assert_eq!(
            event,
            SynthesisEvent::Chunk {
                content: "hi".into(),
                position: 0,
                full_content: None
            }
        );
    }
}
