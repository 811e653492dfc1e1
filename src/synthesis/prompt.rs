use crate::llm::ChatMessage;
use crate::rag::sources::source_title;
use crate::rag::Chunk;

const COMPLETION_SYSTEM_PROMPT: &str = "You are Awakened AI, a knowledgeable assistant that prioritizes information from the provided context when available.
When using information from the provided context, cite your sources by referencing the Context Item numbers.
You may also draw on your general knowledge to supplement the provided context when necessary.
Aim to be comprehensive, accurate, and helpful in your responses.";

const STREAM_SYSTEM_PROMPT: &str = "You are a helpful AI assistant that provides accurate and concise information based on the provided context. When answering:

1. Focus on the information present in the context.
2. If the context doesn't provide enough information to answer the question fully, acknowledge the limitations.
3. Always start your response with a complete sentence, using proper capitalization.
4. Use proper punctuation and paragraph breaks for readability.
5. Provide a coherent, well-structured response that fully addresses the query.
6. Maintain continuity with any previous conversation if provided.
7. When using information from the context, cite the Context Item numbers.";

/// Label shown after `Source:` for one context item.
pub fn context_label(chunk: &Chunk) -> &str {
    if chunk.metadata.has_title() {
        return chunk.metadata.title.as_str();
    }
    source_title(chunk)
}

/// Numbers the chunks from 1 in the order given.
pub fn format_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "Context Item {}:\n{}\n\nSource: {}\n",
                i + 1,
                chunk.text,
                context_label(chunk)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prior turns worth replaying: user/assistant only, newest `max_turns`.
pub fn trim_history(history: &[ChatMessage], max_turns: usize) -> Vec<ChatMessage> {
    let relevant: Vec<&ChatMessage> = history
        .iter()
        .filter(|m| m.role == "user" || m.role == "assistant")
        .filter(|m| !m.content.trim().is_empty())
        .collect();
    let skip = relevant.len().saturating_sub(max_turns);
    relevant.into_iter().skip(skip).cloned().collect()
}

pub fn completion_messages(query: &str, context: &[Chunk]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(COMPLETION_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Question: {}\n\nContext:\n{}\n\nPlease answer the question. When using information from the context, cite the specific Context Item numbers.",
            query,
            format_context(context)
        )),
    ]
}

pub fn stream_messages(
    query: &str,
    context: &[Chunk],
    history: &[ChatMessage],
    max_history_turns: usize,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(STREAM_SYSTEM_PROMPT)];
    messages.extend(trim_history(history, max_history_turns));
    messages.push(ChatMessage::user(format!(
        "I need information about the following query: \"{}\"\n\nHere is the relevant context:\n{}",
        query,
        format_context(context)
    )));
    messages
}
