//! Codec for the string-encoded `columns` and `metadata` blobs
//!
//! The backend stores both blobs as JSON text and echoes them back with HTML
//! entities applied (`&#34;`, `&quot;`, `&#39;`, `&apos;`, `&amp;`). Decoding
//! accepts either that escaped text or an already structured JSON object.
//! Encoding produces plain JSON text; escaping is left to the backend.
//!
//! Decoding never fails through the caller: a malformed blob yields an empty
//! structure together with the [`CodecError`] describing what went wrong.

use std::borrow::Cow;
use std::collections::HashSet;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::core::error::{BlobKind, CodecError};
use crate::core::schema::{TableColumns, TableMetadata};

/// Entity -> literal replacements, applied in this order. `&amp;` goes last so
/// that `&amp;quot;` unescapes once to `&quot;` and not all the way to `"`.
const ENTITY_TABLE: [(&str, &str); 5] = [
    ("&#34;", "\""),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&apos;", "'"),
    ("&amp;", "&"),
];

/// Result of a fail-soft decode
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub value: T,
    /// Set when the blob was malformed and `value` is the empty fallback
    pub warning: Option<CodecError>,
}

impl<T> Decoded<T> {
    pub fn is_clean(&self) -> bool {
        self.warning.is_none()
    }

    pub fn into_parts(self) -> (T, Option<CodecError>) {
        (self.value, self.warning)
    }
}

/// Replaces the five entities the backend emits with their literal characters
pub fn unescape_entities(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }
    let mut text = raw.to_string();
    for (entity, literal) in ENTITY_TABLE {
        if text.contains(entity) {
            text = text.replace(entity, literal);
        }
    }
    Cow::Owned(text)
}

/// Inverse of [`unescape_entities`], the way the backend renders stored blobs
pub fn escape_entities(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Serializes and deserializes the table blobs
pub struct MetadataCodec;

impl MetadataCodec {
    /// Decodes the `columns` blob, failing on malformed input.
    ///
    /// Stored blobs may carry no ids at all, so fields and indexes with a
    /// missing or repeated id get a fresh one.
    pub fn try_decode_columns(raw: &Value) -> Result<TableColumns, CodecError> {
        let mut columns: TableColumns = decode_blob(raw, BlobKind::Columns)?;
        assign_missing_ids(columns.fields.iter_mut().map(|f| &mut f.id));
        assign_missing_ids(columns.indexes.iter_mut().map(|i| &mut i.id));
        Ok(columns)
    }

    /// Decodes the `columns` blob, falling back to no fields and no indexes
    pub fn decode_columns(raw: &Value) -> Decoded<TableColumns> {
        fail_soft(Self::try_decode_columns(raw), BlobKind::Columns)
    }

    /// Decodes the `metadata` blob, failing on malformed input.
    ///
    /// `dbType` is upper-cased so dialect comparisons elsewhere can be exact.
    pub fn try_decode_table_metadata(raw: &Value) -> Result<TableMetadata, CodecError> {
        let mut metadata: TableMetadata = decode_blob(raw, BlobKind::Metadata)?;
        if let Some(db_type) = metadata.db_type.as_mut() {
            *db_type = db_type.to_uppercase();
        }
        Ok(metadata)
    }

    /// Decodes the `metadata` blob, falling back to an empty metadata object
    pub fn decode_table_metadata(raw: &Value) -> Decoded<TableMetadata> {
        fail_soft(Self::try_decode_table_metadata(raw), BlobKind::Metadata)
    }

    /// Plain JSON text for the `columns` blob. Not entity-escaped.
    pub fn encode_columns(columns: &TableColumns) -> Result<String, CodecError> {
        encode_blob(columns, BlobKind::Columns)
    }

    /// Plain JSON text for the `metadata` blob. Not entity-escaped.
    pub fn encode_table_metadata(metadata: &TableMetadata) -> Result<String, CodecError> {
        encode_blob(metadata, BlobKind::Metadata)
    }
}

fn assign_missing_ids<'a>(ids: impl Iterator<Item = &'a mut String>) {
    let mut seen = HashSet::new();
    for id in ids {
        if id.is_empty() || !seen.insert(id.clone()) {
            *id = Uuid::new_v4().to_string();
            seen.insert(id.clone());
        }
    }
}

fn decode_blob<T>(raw: &Value, blob: BlobKind) -> Result<T, CodecError>
where
    T: DeserializeOwned + Default,
{
    let malformed = |e: serde_json::Error| CodecError::Malformed {
        blob,
        message: e.to_string(),
    };

    match raw {
        Value::Null => Ok(T::default()),
        Value::String(text) if text.trim().is_empty() => Ok(T::default()),
        Value::String(text) => serde_json::from_str(&unescape_entities(text)).map_err(malformed),
        Value::Object(_) => serde_json::from_value(raw.clone()).map_err(malformed),
        Value::Bool(_) => Err(CodecError::UnexpectedShape { blob, found: "boolean" }),
        Value::Number(_) => Err(CodecError::UnexpectedShape { blob, found: "number" }),
        Value::Array(_) => Err(CodecError::UnexpectedShape { blob, found: "array" }),
    }
}

fn fail_soft<T: Default>(result: Result<T, CodecError>, blob: BlobKind) -> Decoded<T> {
    match result {
        Ok(value) => Decoded {
            value,
            warning: None,
        },
        Err(err) => {
            tracing::warn!("Falling back to empty {}: {}", blob, err);
            Decoded {
                value: T::default(),
                warning: Some(err),
            }
        }
    }
}

fn encode_blob<T: Serialize>(value: &T, blob: BlobKind) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError::Encode {
        blob,
        message: e.to_string(),
    })
}
