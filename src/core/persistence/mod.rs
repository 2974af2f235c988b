//! Ports to the remote schema-design store
//!
//! The session only sees these traits. Table detail travels in its raw wire
//! shape, with `metadata` and `columns` as escaped JSON text; conversion to
//! and from the typed model goes through [`MetadataCodec`] and nowhere else.

mod memory;

pub use memory::{FailPoint, InMemoryBackend};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::codec::MetadataCodec;
use crate::core::error::{CodecError, PersistenceError};
use crate::core::positions::PositionMap;
use crate::core::schema::{
    ColumnMapping, Position, Relation, RelationId, RelationType, Table, TableDomain, TableId,
    TableKind, TableStatus,
};

/// Row of the project's table list
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub id: TableId,
    pub code: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(rename = "type", default)]
    pub kind: TableKind,
    #[serde(default)]
    pub status: TableStatus,
    #[serde(default)]
    pub synced: bool,
    pub project_id: String,
}

/// Table detail exactly as the backend returns it
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableDetailRaw {
    pub id: TableId,
    pub code: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub comment: String,
    #[serde(rename = "type", default)]
    pub kind: TableKind,
    #[serde(default)]
    pub domain: TableDomain,
    #[serde(default)]
    pub status: TableStatus,
    #[serde(default)]
    pub synced: bool,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub columns: Value,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A decoded table plus whatever the codec had to recover from
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedTable {
    pub table: Table,
    pub warnings: Vec<CodecError>,
}

impl TableDetailRaw {
    /// Decodes the blobs. Malformed blobs become empty structures and are
    /// reported in `warnings`; decoding itself never fails.
    pub fn decode(&self) -> DecodedTable {
        let (columns, columns_warning) = MetadataCodec::decode_columns(&self.columns).into_parts();
        let (metadata, metadata_warning) =
            MetadataCodec::decode_table_metadata(&self.metadata).into_parts();

        let table = Table {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            code: self.code.clone(),
            display_name: self.display_name.clone(),
            comment: self.comment.clone(),
            kind: self.kind,
            domain: self.domain,
            status: self.status,
            synced: self.synced,
            fields: columns.fields,
            indexes: columns.indexes,
            metadata,
        };

        DecodedTable {
            table,
            warnings: columns_warning.into_iter().chain(metadata_warning).collect(),
        }
    }

    pub fn summary(&self) -> TableSummary {
        TableSummary {
            id: self.id.clone(),
            code: self.code.clone(),
            display_name: self.display_name.clone(),
            kind: self.kind,
            status: self.status,
            synced: self.synced,
            project_id: self.project_id.clone(),
        }
    }
}

/// Body of a table create/update request
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TablePayload {
    pub code: String,
    pub display_name: String,
    pub comment: String,
    #[serde(rename = "type")]
    pub kind: TableKind,
    pub domain: TableDomain,
    pub status: TableStatus,
    pub metadata: String,
    pub columns: String,
    pub project_id: String,
}

impl TablePayload {
    pub fn from_table(table: &Table) -> Result<Self, CodecError> {
        Ok(Self {
            code: table.code.clone(),
            display_name: table.display_name.clone(),
            comment: table.comment.clone(),
            kind: table.kind,
            domain: table.domain,
            status: table.status,
            metadata: MetadataCodec::encode_table_metadata(&table.metadata)?,
            columns: MetadataCodec::encode_columns(&table.columns())?,
            project_id: table.project_id.clone(),
        })
    }
}

/// Body of a relation create/update request
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelationPayload {
    pub project_id: String,
    pub source_table_id: TableId,
    pub target_table_id: TableId,
    pub relation_type: RelationType,
    pub column_mappings: Vec<ColumnMapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&Relation> for RelationPayload {
    fn from(relation: &Relation) -> Self {
        Self {
            project_id: relation.project_id.clone(),
            source_table_id: relation.source_table_id.clone(),
            target_table_id: relation.target_table_id.clone(),
            relation_type: relation.relation_type,
            column_mappings: relation.column_mappings.clone(),
            description: relation.description.clone(),
        }
    }
}

impl RelationPayload {
    pub fn into_relation(self, id: RelationId) -> Relation {
        Relation {
            id,
            project_id: self.project_id,
            source_table_id: self.source_table_id,
            target_table_id: self.target_table_id,
            relation_type: self.relation_type,
            column_mappings: self.column_mappings,
            description: self.description,
        }
    }
}

/// One node of a saved graph layout
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NodePosition {
    pub id: TableId,
    pub x: f64,
    pub y: f64,
}

pub fn layout_from_positions(positions: &PositionMap) -> Vec<NodePosition> {
    positions
        .iter()
        .map(|(id, p)| NodePosition {
            id: id.clone(),
            x: p.x,
            y: p.y,
        })
        .collect()
}

pub fn positions_from_layout(layout: &[NodePosition]) -> PositionMap {
    layout
        .iter()
        .map(|node| (node.id.clone(), Position::new(node.x, node.y)))
        .collect()
}

/// Table CRUD against the schema-design store
#[async_trait]
pub trait PersistenceClient: Send + Sync {
    async fn list_tables(&self, project_id: &str) -> Result<Vec<TableSummary>, PersistenceError>;

    async fn get_table(&self, table_id: &TableId) -> Result<TableDetailRaw, PersistenceError>;

    async fn create_table(&self, payload: &TablePayload)
    -> Result<TableDetailRaw, PersistenceError>;

    async fn update_table(
        &self,
        table_id: &TableId,
        payload: &TablePayload,
    ) -> Result<TableDetailRaw, PersistenceError>;

    async fn delete_table(&self, table_id: &TableId) -> Result<(), PersistenceError>;

    /// Pushes the stored design to the live database
    async fn sync_table(&self, table_id: &TableId) -> Result<(), PersistenceError>;
}

#[async_trait]
pub trait RelationClient: Send + Sync {
    async fn list_relations(&self, project_id: &str) -> Result<Vec<Relation>, PersistenceError>;

    async fn create_relation(&self, payload: &RelationPayload)
    -> Result<Relation, PersistenceError>;

    async fn update_relation(
        &self,
        relation_id: &RelationId,
        payload: &RelationPayload,
    ) -> Result<Relation, PersistenceError>;

    async fn delete_relation(&self, relation_id: &RelationId) -> Result<(), PersistenceError>;
}

/// Saved canvas layout per project
#[async_trait]
pub trait LayoutClient: Send + Sync {
    async fn get_layout(&self, project_id: &str) -> Result<Vec<NodePosition>, PersistenceError>;

    async fn save_layout(
        &self,
        project_id: &str,
        positions: &[NodePosition],
    ) -> Result<(), PersistenceError>;
}

/// The collaborators a session talks to
#[derive(Clone)]
pub struct Backends {
    pub tables: Arc<dyn PersistenceClient>,
    pub relations: Arc<dyn RelationClient>,
    pub layout: Arc<dyn LayoutClient>,
}

impl Backends {
    /// Uses one backend for every port
    pub fn shared<B>(backend: Arc<B>) -> Self
    where
        B: PersistenceClient + RelationClient + LayoutClient + 'static,
    {
        Self {
            tables: backend.clone(),
            relations: backend.clone(),
            layout: backend,
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}
