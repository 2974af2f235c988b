use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Prefix for identifiers that have not been assigned by the server yet
pub const DRAFT_PREFIX: &str = "draft-";

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Local identifier for an entity that only exists in this session
            pub fn draft() -> Self {
                Self(format!("{}{}", DRAFT_PREFIX, Uuid::new_v4()))
            }

            pub fn is_draft(&self) -> bool {
                self.0.starts_with(DRAFT_PREFIX)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

entity_id!(
    /// Table identity. Draft until the table is first persisted.
    TableId
);

entity_id!(
    /// Relation identity. Draft until the relation is first persisted.
    RelationId
);

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableKind {
    #[default]
    Table,
    View,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableDomain {
    #[default]
    Business,
    System,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    #[default]
    Draft,
    Active,
    Archived,
}

/// Table column as stored inside the `columns` blob
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Field {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub data_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub comment: String,
}

impl Default for Field {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            display_name: String::new(),
            data_type: String::new(),
            length: None,
            precision: None,
            nullable: true,
            primary_key: false,
            auto_increment: false,
            default_value: None,
            comment: String::new(),
        }
    }
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            data_type: data_type.into(),
            ..Self::default()
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Marks the field auto-increment. Only valid on integral primary keys.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexKind {
    Primary,
    Unique,
    Index,
    Fulltext,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: IndexKind,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Index {
    pub fn new<I, S>(name: impl Into<String>, kind: IndexKind, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            columns: columns.into_iter().map(Into::into).collect(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Decoded form of the `columns` blob
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
#[serde(default)]
pub struct TableColumns {
    pub fields: Vec<Field>,
    pub indexes: Vec<Index>,
}

/// Partitioning settings carried inside table metadata
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PartitionConfig {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitions: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Physical storage options for a table, decoded from the `metadata` blob.
///
/// Every known key is optional so that an empty `{}` decodes to `Default`.
/// Keys the engine does not know about are kept in `extra` and written back
/// unchanged on encode.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct TableMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    #[serde(alias = "collation", skip_serializing_if = "Option::is_none")]
    pub collate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tablespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_increment: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition_config: Option<PartitionConfig>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TableMetadata {
    /// Settings a freshly created table starts with
    pub fn mysql_defaults() -> Self {
        Self {
            db_type: Some("MYSQL".to_string()),
            engine: Some("InnoDB".to_string()),
            charset: Some("utf8mb4".to_string()),
            collate: Some("utf8mb4_general_ci".to_string()),
            tablespace: Some(String::new()),
            auto_increment: Some(1),
            row_format: Some("DEFAULT".to_string()),
            partition_config: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Table node of the design canvas
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: TableId,
    pub project_id: String,
    pub code: String,
    pub display_name: String,
    pub comment: String,
    pub kind: TableKind,
    pub domain: TableDomain,
    pub status: TableStatus,
    pub synced: bool,
    pub fields: Vec<Field>,
    pub indexes: Vec<Index>,
    pub metadata: TableMetadata,
}

impl Table {
    /// A new, not yet persisted table with default storage settings
    pub fn new(project_id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: TableId::draft(),
            project_id: project_id.into(),
            code: code.into(),
            display_name: String::new(),
            comment: String::new(),
            kind: TableKind::default(),
            domain: TableDomain::default(),
            status: TableStatus::default(),
            synced: false,
            fields: Vec::new(),
            indexes: Vec::new(),
            metadata: TableMetadata::mysql_defaults(),
        }
    }

    pub fn with_id(mut self, id: impl Into<TableId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn add_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn add_index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Finds a field by column name, returning its position and the field
    pub fn find_field(&self, name: &str) -> Option<(usize, &Field)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }

    pub fn field_position(&self, field_id: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.id == field_id)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.find_field(name).is_some()
    }

    pub fn primary_index(&self) -> Option<&Index> {
        self.indexes.iter().find(|i| i.kind == IndexKind::Primary)
    }

    /// The `fields`/`indexes` pair as it travels in the `columns` blob
    pub fn columns(&self) -> TableColumns {
        TableColumns {
            fields: self.fields.clone(),
            indexes: self.indexes.clone(),
        }
    }
}

/// Relation cardinality
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationType::OneToOne => write!(f, "1:1"),
            RelationType::OneToMany => write!(f, "1:N"),
            RelationType::ManyToOne => write!(f, "N:1"),
            RelationType::ManyToMany => write!(f, "N:M"),
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingType {
    PrimaryKey,
    ForeignKey,
    Reference,
}

/// Pairing of one source column with one target column
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    #[serde(rename = "sourceColumnName", alias = "sourceColumn")]
    pub source_column: String,
    #[serde(rename = "targetColumnName", alias = "targetColumn")]
    pub target_column: String,
    pub mapping_type: MappingType,
}

impl ColumnMapping {
    pub fn new(
        source_column: impl Into<String>,
        target_column: impl Into<String>,
        mapping_type: MappingType,
    ) -> Self {
        Self {
            source_column: source_column.into(),
            target_column: target_column.into(),
            mapping_type,
        }
    }
}

/// Edge between two tables
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub id: RelationId,
    pub project_id: String,
    pub source_table_id: TableId,
    pub target_table_id: TableId,
    pub relation_type: RelationType,
    #[serde(default)]
    pub column_mappings: Vec<ColumnMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Relation {
    pub fn new(
        project_id: impl Into<String>,
        source_table_id: impl Into<TableId>,
        target_table_id: impl Into<TableId>,
        relation_type: RelationType,
    ) -> Self {
        Self {
            id: RelationId::draft(),
            project_id: project_id.into(),
            source_table_id: source_table_id.into(),
            target_table_id: target_table_id.into(),
            relation_type,
            column_mappings: Vec::new(),
            description: None,
        }
    }

    pub fn with_mapping(mut self, mapping: ColumnMapping) -> Self {
        self.column_mappings.push(mapping);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn touches(&self, table_id: &TableId) -> bool {
        &self.source_table_id == table_id || &self.target_table_id == table_id
    }
}

/// Canvas coordinates of a table
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}
