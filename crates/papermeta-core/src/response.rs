//! Locate and decode the JSON object embedded in a model reply.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::MetadataRecord;
use crate::normalize;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no JSON object found in response ({0} chars)")]
    NoJsonObject(usize),
}

/// Find the first substring of `raw` that decodes as a JSON object.
///
/// Each `{` is tried as a start position; the streaming deserializer stops at
/// the end of the first complete value, so surrounding prose and markdown
/// fences are tolerated.
pub fn locate_json_object(raw: &str) -> Option<Map<String, Value>> {
    for (start, _) in raw.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&raw[start..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(map))) = stream.next() {
            return Some(map);
        }
    }
    None
}

/// Build a record from a decoded object. Every field is optional.
pub fn record_from_object(obj: &Map<String, Value>) -> MetadataRecord {
    let doi = normalize::text(obj.get("doi"));
    MetadataRecord {
        title: normalize::text(obj.get("title")),
        authors: normalize::authors(obj.get("authors")),
        year: normalize::text(obj.get("year")),
        journal: normalize::text(obj.get("journal")),
        doi: normalize::doi(&doi),
        keywords: normalize::keywords(obj.get("keywords")),
        abstract_text: normalize::text(obj.get("abstract")),
        filename: String::new(),
        relative_path: String::new(),
    }
}

/// Parse a raw model reply into a record (without file identity).
///
/// Fails only when no JSON object can be located at all; missing fields are
/// left empty.
pub fn parse_response(raw: &str) -> Result<MetadataRecord, ParseError> {
    let obj = locate_json_object(raw).ok_or(ParseError::NoJsonObject(raw.len()))?;
    Ok(record_from_object(&obj))
}
