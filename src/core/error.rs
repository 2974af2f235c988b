//! Error types for the schema design session engine
//!
//! Every error here is scoped to the operation that produced it. Nothing is
//! fatal to the session: the entity model and history stay at their last
//! consistent state whenever one of these is returned.

use std::fmt;

use crate::core::schema::{RelationId, TableId};

/// Which string-encoded blob a codec error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Columns,
    Metadata,
}

impl fmt::Display for BlobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobKind::Columns => write!(f, "columns"),
            BlobKind::Metadata => write!(f, "metadata"),
        }
    }
}

/// Malformed `metadata`/`columns` blobs. Recovered locally with an empty structure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed {blob} blob: {message}")]
    Malformed { blob: BlobKind, message: String },

    #[error("unexpected {blob} shape: expected a JSON string or object, got {found}")]
    UnexpectedShape { blob: BlobKind, found: &'static str },

    #[error("failed to encode {blob}: {message}")]
    Encode { blob: BlobKind, message: String },
}

/// What kind of entity a name or lookup refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Table,
    Field,
    Index,
    Relation,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Table => write!(f, "table"),
            EntityKind::Field => write!(f, "field"),
            EntityKind::Index => write!(f, "index"),
            EntityKind::Relation => write!(f, "relation"),
        }
    }
}

/// Entity model rejections. A rejected operation leaves the model untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} name '{name}' is already in use")]
    DuplicateName { kind: EntityKind, name: String },

    #[error("table {table_id} is referenced by relations {relation_ids:?}")]
    ReferentialIntegrity {
        table_id: TableId,
        relation_ids: Vec<RelationId>,
    },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },
}

impl ModelError {
    pub fn validation(message: impl Into<String>) -> Self {
        ModelError::Validation(message.into())
    }

    pub fn not_found(kind: EntityKind, id: impl fmt::Display) -> Self {
        ModelError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// A remote call made through a persistence collaborator failed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PersistenceError {
    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("{kind} '{id}' not found on the server")]
    NotFound { kind: EntityKind, id: String },

    #[error("server rejected {operation}: {message}")]
    Rejected {
        operation: &'static str,
        message: String,
    },
}

impl PersistenceError {
    pub fn request(operation: &'static str, message: impl Into<String>) -> Self {
        PersistenceError::Request {
            operation,
            message: message.into(),
        }
    }
}

/// Errors surfaced by the session coordinator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("no table is currently active")]
    NoActiveTable,

    #[error("cannot {operation} while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}
