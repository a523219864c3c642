use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Keys that may hold the platform-assigned identifier, in priority order
pub const ID_KEYS: &[&str] = &["response_id", "id", "image_id", "request_id"];

const PROMPT_KEYS: &[&str] = &["prompt", "text_prompt", "caption"];
const FULL_URL_KEYS: &[&str] = &["url", "image_url", "full_url", "full_resolution_url"];
const THUMBNAIL_KEYS: &[&str] = &["thumbnail_url", "thumbnail"];

/// One generated image as returned by the feed.
///
/// The complete original object is kept so the metadata file preserves every
/// field, including ones this crate knows nothing about. Accessors read the
/// well-known fields defensively.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    id: String,
    fields: Map<String, Value>,
}

impl ImageRecord {
    /// Builds a record from a feed object. Returns `None` when the object has
    /// no usable identifier, since such a record could not be deduplicated.
    pub fn from_fields(fields: Map<String, Value>) -> Option<Self> {
        let id = ID_KEYS
            .iter()
            .find_map(|key| fields.get(*key).and_then(identifier_string))?;
        Some(Self { id, fields })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn prompt(&self) -> Option<&str> {
        first_str(&self.fields, PROMPT_KEYS)
    }

    /// Full-resolution URL. A direct-download template (with `{id}`) wins over
    /// the URLs embedded in the record.
    pub fn full_resolution_url(&self, template: Option<&str>) -> Option<String> {
        if let Some(template) = template {
            return Some(template.replace("{id}", &self.id));
        }
        first_str(&self.fields, FULL_URL_KEYS).map(str::to_string)
    }

    pub fn thumbnail_url(&self) -> Option<&str> {
        first_str(&self.fields, THUMBNAIL_KEYS)
    }
}

impl Serialize for ImageRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields().serialize(serializer)
    }
}

/// Whether the feed says more results exist after a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    More,
    Done,
    /// No recognizable marker in the body
    Unknown,
}

/// One intercepted feed response
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPage {
    /// URL of the response the page was parsed from
    pub source_url: String,

    /// Records in feed order
    pub records: Vec<ImageRecord>,

    pub continuation: Continuation,
}

impl ResultPage {
    pub fn new(source_url: String, records: Vec<ImageRecord>, continuation: Continuation) -> Self {
        Self {
            source_url,
            records,
            continuation,
        }
    }
}

fn identifier_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_str<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| match fields.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.as_str()),
        _ => None,
    })
}
