pub mod intercept;

#[cfg(test)]
mod tests;

use crate::results::{Continuation, ImageRecord, ResultPage};
use serde_json::{Map, Value};

/// How deep the record search descends into a response body
const MAX_DEPTH: usize = 8;

/// Keys whose presence suggests an object describes an image
const IMAGE_KEYS: &[&str] = &["response_id", "url", "image_url", "thumbnail_url"];

/// Keys under which feeds commonly keep their list of results
const COLLECTION_KEYS: &[&str] = &[
    "responses",
    "results",
    "images",
    "data",
    "items",
    "creations",
    "generations",
];

const HAS_MORE_KEYS: &[&str] = &["has_more", "hasMore", "more_available"];
const CURSOR_KEYS: &[&str] = &["next_cursor", "nextCursor", "cursor", "next_page", "next"];

/// Parser turning decoded feed bodies into result pages
pub struct FeedParser;

impl FeedParser {
    /// Parse a decoded response body into a page.
    ///
    /// Returns `None` for JSON that does not look like a feed page at all
    /// (no records, no continuation marker, no empty result list), so that
    /// unrelated API traffic on matching URLs is not mistaken for an empty,
    /// exhausted feed.
    pub fn parse(source_url: &str, body: &Value) -> Option<ResultPage> {
        let mut objects = Vec::new();
        find_records(body, 0, &mut objects);

        let total = objects.len();
        let records: Vec<ImageRecord> = objects
            .into_iter()
            .filter_map(ImageRecord::from_fields)
            .collect();
        if records.len() < total {
            ::log::debug!(
                "Skipped {} image-like objects without an identifier in {}",
                total - records.len(),
                source_url
            );
        }

        let continuation = continuation(body);
        if records.is_empty() && continuation == Continuation::Unknown && !has_empty_collection(body)
        {
            ::log::debug!("Response from {} is not a feed page", source_url);
            return None;
        }

        ::log::debug!(
            "Feed page from {} has {} records ({:?})",
            source_url,
            records.len(),
            continuation
        );
        Some(ResultPage::new(source_url.to_string(), records, continuation))
    }
}

/// Returns true if the object looks like an image entry
pub fn looks_like_record(map: &Map<String, Value>) -> bool {
    IMAGE_KEYS.iter().any(|key| map.contains_key(*key))
        && (map.contains_key("prompt") || map.contains_key("response_id"))
}

/// Recursively collect image-like objects in document order
fn find_records(value: &Value, depth: usize, out: &mut Vec<Map<String, Value>>) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::Array(items) => {
            for item in items {
                find_records(item, depth + 1, out);
            }
        }
        Value::Object(map) => {
            if looks_like_record(map) {
                out.push(map.clone());
                return;
            }
            for nested in map.values() {
                if nested.is_array() || nested.is_object() {
                    find_records(nested, depth + 1, out);
                }
            }
        }
        _ => {}
    }
}

/// Read the continuation marker from the top level of a body
pub fn continuation(body: &Value) -> Continuation {
    let Some(map) = body.as_object() else {
        return Continuation::Unknown;
    };

    for key in HAS_MORE_KEYS {
        if let Some(Value::Bool(more)) = map.get(*key) {
            return if *more {
                Continuation::More
            } else {
                Continuation::Done
            };
        }
    }

    for key in CURSOR_KEYS {
        if let Some(cursor) = map.get(*key) {
            return match cursor {
                Value::Null | Value::Bool(false) => Continuation::Done,
                Value::String(s) if s.is_empty() => Continuation::Done,
                _ => Continuation::More,
            };
        }
    }

    Continuation::Unknown
}

fn has_empty_collection(body: &Value) -> bool {
    match body {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => COLLECTION_KEYS.iter().any(|key| {
            map.get(*key)
                .and_then(Value::as_array)
                .is_some_and(|items| items.is_empty())
        }),
        _ => false,
    }
}
