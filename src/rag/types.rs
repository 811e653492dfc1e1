use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Label used wherever a chunk or source has no usable title.
pub const UNKNOWN_DOCUMENT: &str = "Unknown Document";

/// A parent document in the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            author: None,
            creator: None,
            subject: None,
            filename: None,
            path: None,
            created_at: String::new(),
        }
    }

    /// Author, falling back to the PDF-style `creator` field.
    pub fn display_author(&self) -> Option<&str> {
        non_blank(self.author.as_deref()).or_else(|| non_blank(self.creator.as_deref()))
    }

    /// Where the document came from: filename, else path.
    pub fn origin(&self) -> Option<&str> {
        non_blank(self.filename.as_deref()).or_else(|| non_blank(self.path.as_deref()))
    }
}

/// Denormalized copy of parent-document fields carried on every chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default = "unknown_title")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ChunkMetadata {
    fn default() -> Self {
        Self {
            title: unknown_title(),
            author: None,
            subject: None,
            source: None,
            extra: Map::new(),
        }
    }
}

impl ChunkMetadata {
    pub fn from_document(document: &Document) -> Self {
        Self {
            title: non_blank(Some(&document.title))
                .unwrap_or(UNKNOWN_DOCUMENT)
                .to_string(),
            author: document.display_author().map(str::to_string),
            subject: non_blank(document.subject.as_deref()).map(str::to_string),
            source: document.origin().map(str::to_string),
            extra: Map::new(),
        }
    }

    /// True when `title` carries a real value rather than the fallback label.
    pub fn has_title(&self) -> bool {
        non_blank(Some(&self.title)).is_some_and(|t| t != UNKNOWN_DOCUMENT)
    }
}

fn unknown_title() -> String {
    UNKNOWN_DOCUMENT.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f32>,
    #[serde(default)]
    pub metadata: ChunkMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
}

impl Chunk {
    pub fn new(id: impl Into<String>, document_id: Option<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            document_id,
            text: text.into(),
            similarity_score: None,
            metadata: ChunkMetadata::default(),
            document: None,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.similarity_score = Some(score);
        self
    }
}

/// Deduplicated attribution entry for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// Exact-match filters on parent document fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SearchFilters {
    pub author: Option<String>,
    pub title: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// `(column, value)` pairs for the filters that are set and non-blank.
    pub fn fields(&self) -> Vec<(&'static str, &str)> {
        [
            ("author", self.author.as_deref()),
            ("title", self.title.as_deref()),
            ("subject", self.subject.as_deref()),
            ("creator", self.creator.as_deref()),
        ]
        .into_iter()
        .filter_map(|(column, value)| non_blank(value).map(|v| (column, v)))
        .collect()
    }
}

/// Context entry as accepted on the wire: either `text` or `content`
/// carries the passage, and `metadata` is free-form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextItem {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl ContextItem {
    /// Normalizes the wire shape into a corpus-shaped chunk.
    pub fn into_chunk(self, index: usize) -> Chunk {
        let text = self
            .text
            .filter(|t| !t.is_empty())
            .or(self.content)
            .unwrap_or_default();

        let metadata = self
            .metadata
            .and_then(|value| serde_json::from_value::<ChunkMetadata>(value).ok())
            .unwrap_or_default();
        let document_id = metadata
            .extra
            .get("document_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        Chunk {
            id: format!("context-{}", index + 1),
            document_id,
            text,
            similarity_score: None,
            metadata,
            document: None,
        }
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
