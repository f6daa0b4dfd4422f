//! Snapshots of a session's global values as a JSON document.
//!
//! Only strings, numbers, booleans, byte strings, arrays and maps are taken.
//! Each global is converted on its own through the JSON bridge, so containers
//! shared between globals come back as independent copies, and byte strings
//! come back as (base64) strings.

use std::{
    fmt,
    io::{self, Read, Write},
};

use ahash::AHashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, value::RawValue};

use crate::{
    convert::{ConvertError, from_json, to_json},
    resource::ResourceLimits,
    value::Value,
};

/// Marker stored for every name in [`SnapshotDocument::failed`]; serializes
/// as `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failed {}

/// The on-disk snapshot format. Unknown top-level keys are ignored on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    #[serde(default)]
    pub data: IndexMap<String, Json>,
    #[serde(default)]
    pub failed: IndexMap<String, Failed>,
}

impl SnapshotDocument {
    /// Writes the document as one line of JSON.
    pub fn write_to(&self, mut out: impl Write) -> Result<(), SnapshotError> {
        serde_json::to_writer(&mut out, self)?;
        out.write_all(b"\n")?;
        Ok(())
    }

    /// Reads a document. A `data` entry that is well-formed JSON but does
    /// not decode to a value (a number out of range, say) is dropped and the
    /// rest of the document is kept.
    pub fn read_from(input: impl Read) -> Result<Self, SnapshotError> {
        let raw: RawDocument = serde_json::from_reader(input)?;
        let mut data = IndexMap::with_capacity(raw.data.len());
        for (name, entry) in raw.data {
            match serde_json::from_str::<Json>(entry.get()) {
                Ok(json) => {
                    data.insert(name, json);
                }
                Err(error) => tracing::debug!(%name, %error, "skipping undecodable snapshot entry"),
            }
        }
        Ok(Self { data, failed: raw.failed })
    }
}

/// A document whose `data` entries are still undecoded.
#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    data: IndexMap<String, Box<RawValue>>,
    #[serde(default)]
    failed: IndexMap<String, Failed>,
}

#[derive(Debug)]
pub enum SnapshotError {
    Io(io::Error),
    Json(serde_json::Error),
    Convert(ConvertError),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => write!(f, "{error}"),
            Self::Json(error) => write!(f, "{error}"),
            Self::Convert(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(error) => Some(error),
            Self::Json(error) => Some(error),
            Self::Convert(error) => Some(error),
        }
    }
}

impl From<io::Error> for SnapshotError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(error: serde_json::Error) -> Self {
        if error.is_io() {
            return Self::Io(error.into());
        }
        Self::Json(error)
    }
}

impl From<ConvertError> for SnapshotError {
    fn from(error: ConvertError) -> Self {
        Self::Convert(error)
    }
}

/// Variants a snapshot can hold; everything else is reported as failed.
fn has_snapshot_form(value: &Value) -> bool {
    matches!(
        value,
        Value::Int(_)
            | Value::Float(_)
            | Value::Bool(_)
            | Value::String(_)
            | Value::Bytes(_)
            | Value::Array(_)
            | Value::ImmutableArray(_)
            | Value::Map(_)
            | Value::ImmutableMap(_)
    )
}

/// Walks globals, memoising containers by identity so a container reachable
/// from several names is converted once.
#[derive(Debug, Default)]
struct Walker {
    seen: AHashMap<usize, Option<Json>>,
}

impl Walker {
    fn take_one(&mut self, value: &Value) -> Option<Json> {
        let identity = value.identity();
        if let Some(memo) = identity.and_then(|id| self.seen.get(&id)) {
            return memo.clone();
        }
        if let Some(id) = identity {
            // Sentinel until the conversion finishes.
            self.seen.insert(id, None);
        }
        if !has_snapshot_form(value) {
            return None;
        }
        // Containers go through the bridge as a whole, not through the memo.
        let json = to_json(value).ok();
        if let (Some(id), Some(json)) = (identity, &json) {
            self.seen.insert(id, Some(json.clone()));
        }
        json
    }
}

/// Builds a snapshot of `globals`; names whose values cannot be represented
/// are listed under `failed`.
pub fn take<'a>(globals: impl IntoIterator<Item = (&'a str, &'a Value)>) -> SnapshotDocument {
    let mut walker = Walker::default();
    let mut document = SnapshotDocument::default();
    for (name, value) in globals {
        match walker.take_one(value) {
            Some(json) => {
                document.data.insert(name.to_owned(), json);
            }
            None => {
                document.failed.insert(name.to_owned(), Failed {});
            }
        }
    }
    tracing::debug!(taken = document.data.len(), failed = document.failed.len(), "snapshot taken");
    document
}

/// Converts the `data` entries of a document back to values, in document
/// order.
pub fn restore(document: &SnapshotDocument, limits: &ResourceLimits) -> Result<Vec<(String, Value)>, SnapshotError> {
    document
        .data
        .iter()
        .map(|(name, json)| Ok((name.clone(), from_json(json, limits)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::value::ValueMap;

    #[test]
    fn unsupported_values_are_listed_as_failed() {
        let items = Value::array(vec![Value::Int(1), Value::from("two")]);
        let globals = [
            ("a", Value::Int(1)),
            ("items", items.clone()),
            ("again", items),
            ("missing", Value::Undefined),
            ("nan", Value::Float(f64::NAN)),
        ];
        let document = take(globals.iter().map(|(name, value)| (*name, value)));
        assert_eq!(
            serde_json::to_value(&document).unwrap(),
            json!({
                "data": {"a": 1, "items": [1, "two"], "again": [1, "two"]},
                "failed": {"missing": {}, "nan": {}},
            })
        );
    }

    #[test]
    fn cyclic_container_is_cut() {
        let map = Value::map(ValueMap::new());
        if let Value::Map(entries) = &map {
            entries.borrow_mut().insert("me".to_owned(), map.clone());
        }
        let document = take([("m", &map)]);
        assert_eq!(document.data["m"], json!({"me": null}));
    }

    #[test]
    fn extra_keys_are_ignored_on_read() {
        let text = r#"{"data": {"x": 6}, "failed": {"f": {}}, "version": 2}"#;
        let document = SnapshotDocument::read_from(text.as_bytes()).unwrap();
        let restored = restore(&document, &ResourceLimits::default()).unwrap();
        assert_eq!(restored, vec![("x".to_owned(), Value::Int(6))]);
        assert!(document.failed.contains_key("f"));
    }

    #[test]
    fn undecodable_entry_is_skipped() {
        let text = r#"{"data": {"ok": 1, "bad": 12e999999, "after": "x"}, "failed": {}}"#;
        let document = SnapshotDocument::read_from(text.as_bytes()).unwrap();
        assert_eq!(document.data.keys().collect::<Vec<_>>(), ["ok", "after"]);
    }
}
