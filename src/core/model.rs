//! In-memory entity model: tables with their fields and indexes, and the
//! relations between tables.
//!
//! Every operation validates first and mutates second, so a rejected call
//! never leaves a partially applied change behind.

use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;

use crate::core::error::{EntityKind, ModelError};
use crate::core::schema::{
    Field, Index, Relation, RelationId, Table, TableDomain, TableId, TableKind, TableMetadata,
    TableStatus,
};
use crate::core::validation::{ValidationLevel, validate_field, validate_identifier, validate_index};

/// What happens to relations when a table they reference is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// Remove the relations along with the table and report their ids
    #[default]
    Cascade,
    /// Refuse to delete a table that is still referenced
    Reject,
}

impl std::str::FromStr for DeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cascade" => Ok(DeletePolicy::Cascade),
            "reject" => Ok(DeletePolicy::Reject),
            other => Err(format!("unknown delete policy '{}'", other)),
        }
    }
}

/// Rules the model enforces on every mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelRules {
    pub validation_level: ValidationLevel,
    pub delete_policy: DeletePolicy,
    pub allow_relation_cycles: bool,
}

/// Partial update of a table's scalar properties. `None` leaves a value as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableChanges {
    pub code: Option<String>,
    pub display_name: Option<String>,
    pub comment: Option<String>,
    pub kind: Option<TableKind>,
    pub domain: Option<TableDomain>,
    pub status: Option<TableStatus>,
    pub metadata: Option<TableMetadata>,
}

#[derive(Debug, Clone, Default)]
pub struct EntityModel {
    rules: ModelRules,
    tables: Vec<Table>,
    relations: Vec<Relation>,
}

impl EntityModel {
    pub fn new(rules: ModelRules) -> Self {
        Self {
            rules,
            tables: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn rules(&self) -> ModelRules {
        self.rules
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn table(&self, id: &TableId) -> Option<&Table> {
        self.tables.iter().find(|t| &t.id == id)
    }

    pub fn contains_table(&self, id: &TableId) -> bool {
        self.table(id).is_some()
    }

    pub fn relation(&self, id: &RelationId) -> Option<&Relation> {
        self.relations.iter().find(|r| &r.id == id)
    }

    /// Relations where the table is either source or target
    pub fn relations_for_table(&self, id: &TableId) -> Vec<&Relation> {
        self.relations.iter().filter(|r| r.touches(id)).collect()
    }

    /// Relations connecting two tables, in either direction
    pub fn relations_between(&self, a: &TableId, b: &TableId) -> Vec<&Relation> {
        self.relations
            .iter()
            .filter(|r| {
                (&r.source_table_id == a && &r.target_table_id == b)
                    || (&r.source_table_id == b && &r.target_table_id == a)
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------

    pub fn add_table(&mut self, table: Table) -> Result<(), ModelError> {
        if self.contains_table(&table.id) {
            return Err(ModelError::validation(format!(
                "table id '{}' already exists",
                table.id
            )));
        }
        validate_identifier("table", &table.code, self.rules.validation_level)?;
        self.ensure_unique_code(&table.project_id, &table.code, None)?;

        for (i, field) in table.fields.iter().enumerate() {
            validate_field(field, self.rules.validation_level)?;
            if table.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(ModelError::DuplicateName {
                    kind: EntityKind::Field,
                    name: field.name.clone(),
                });
            }
        }
        for (i, index) in table.indexes.iter().enumerate() {
            let preceding = Table {
                indexes: table.indexes[..i].to_vec(),
                ..table.clone()
            };
            validate_index(&preceding, index, self.rules.validation_level)?;
        }

        tracing::debug!("Adding table '{}' ({})", table.code, table.id);
        self.tables.push(table);
        Ok(())
    }

    pub fn update_table(&mut self, id: &TableId, changes: TableChanges) -> Result<(), ModelError> {
        let current = self
            .table(id)
            .ok_or_else(|| ModelError::not_found(EntityKind::Table, id))?;

        if let Some(code) = &changes.code {
            validate_identifier("table", code, self.rules.validation_level)?;
            self.ensure_unique_code(&current.project_id, code, Some(id))?;
        }

        let table = self.table_mut(id)?;
        if let Some(code) = changes.code {
            table.code = code;
        }
        if let Some(display_name) = changes.display_name {
            table.display_name = display_name;
        }
        if let Some(comment) = changes.comment {
            table.comment = comment;
        }
        if let Some(kind) = changes.kind {
            table.kind = kind;
        }
        if let Some(domain) = changes.domain {
            table.domain = domain;
        }
        if let Some(status) = changes.status {
            table.status = status;
        }
        if let Some(metadata) = changes.metadata {
            table.metadata = metadata;
        }
        Ok(())
    }

    /// Deletes a table. Returns the ids of relations removed with it.
    pub fn delete_table(&mut self, id: &TableId) -> Result<Vec<RelationId>, ModelError> {
        if !self.contains_table(id) {
            return Err(ModelError::not_found(EntityKind::Table, id));
        }

        let dependent: Vec<RelationId> = self
            .relations_for_table(id)
            .into_iter()
            .map(|r| r.id.clone())
            .collect();

        if !dependent.is_empty() && self.rules.delete_policy == DeletePolicy::Reject {
            return Err(ModelError::ReferentialIntegrity {
                table_id: id.clone(),
                relation_ids: dependent,
            });
        }

        self.relations.retain(|r| !r.touches(id));
        self.tables.retain(|t| &t.id != id);

        if !dependent.is_empty() {
            tracing::info!(
                "Deleted table {} and {} dependent relation(s)",
                id,
                dependent.len()
            );
        }
        Ok(dependent)
    }

    // ------------------------------------------------------------------
    // Fields
    // ------------------------------------------------------------------

    pub fn add_field(&mut self, table_id: &TableId, field: Field) -> Result<(), ModelError> {
        validate_field(&field, self.rules.validation_level)?;
        let table = self.table_mut(table_id)?;
        if table.has_column(&field.name) {
            return Err(ModelError::DuplicateName {
                kind: EntityKind::Field,
                name: field.name,
            });
        }
        table.fields.push(field);
        Ok(())
    }

    /// Replaces a field. A rename is carried over to the table's indexes and
    /// to the column mappings of relations touching the table.
    pub fn update_field(
        &mut self,
        table_id: &TableId,
        field_id: &str,
        mut field: Field,
    ) -> Result<(), ModelError> {
        validate_field(&field, self.rules.validation_level)?;

        let table = self
            .table(table_id)
            .ok_or_else(|| ModelError::not_found(EntityKind::Table, table_id))?;
        let position = table
            .field_position(field_id)
            .ok_or_else(|| ModelError::not_found(EntityKind::Field, field_id))?;

        if let Some((other, _)) = table.find_field(&field.name)
            && other != position
        {
            return Err(ModelError::DuplicateName {
                kind: EntityKind::Field,
                name: field.name,
            });
        }

        let old_name = table.fields[position].name.clone();
        field.id = field_id.to_string();
        let new_name = field.name.clone();

        let table = self.table_mut(table_id)?;
        table.fields[position] = field;

        if old_name != new_name {
            for index in &mut table.indexes {
                for column in &mut index.columns {
                    if *column == old_name {
                        column.clone_from(&new_name);
                    }
                }
            }
            for relation in &mut self.relations {
                for mapping in &mut relation.column_mappings {
                    if &relation.source_table_id == table_id && mapping.source_column == old_name {
                        mapping.source_column.clone_from(&new_name);
                    }
                    if &relation.target_table_id == table_id && mapping.target_column == old_name {
                        mapping.target_column.clone_from(&new_name);
                    }
                }
            }
        }
        Ok(())
    }

    /// Removes a field that no index or relation still refers to
    pub fn delete_field(&mut self, table_id: &TableId, field_id: &str) -> Result<Field, ModelError> {
        let table = self
            .table(table_id)
            .ok_or_else(|| ModelError::not_found(EntityKind::Table, table_id))?;
        let position = table
            .field_position(field_id)
            .ok_or_else(|| ModelError::not_found(EntityKind::Field, field_id))?;
        let name = &table.fields[position].name;

        if let Some(index) = table.indexes.iter().find(|i| i.columns.contains(name)) {
            return Err(ModelError::validation(format!(
                "field '{}' is used by index '{}'",
                name, index.name
            )));
        }
        if let Some(relation) = self.relations.iter().find(|r| {
            r.column_mappings.iter().any(|m| {
                (&r.source_table_id == table_id && &m.source_column == name)
                    || (&r.target_table_id == table_id && &m.target_column == name)
            })
        }) {
            return Err(ModelError::validation(format!(
                "field '{}' is used by relation {}",
                name, relation.id
            )));
        }

        let table = self.table_mut(table_id)?;
        Ok(table.fields.remove(position))
    }

    /// Moves a field to a new column position
    pub fn move_field(&mut self, table_id: &TableId, from: usize, to: usize) -> Result<(), ModelError> {
        let table = self.table_mut(table_id)?;
        let len = table.fields.len();
        if from >= len || to >= len {
            return Err(ModelError::validation(format!(
                "field position out of bounds (from {}, to {}, {} fields)",
                from, to, len
            )));
        }
        let field = table.fields.remove(from);
        table.fields.insert(to, field);
        Ok(())
    }

    /// Flags a field as (part of) the primary key, or clears the flag.
    ///
    /// Does not touch the PRIMARY index; that is managed separately.
    pub fn set_primary_key(
        &mut self,
        table_id: &TableId,
        field_id: &str,
        primary_key: bool,
    ) -> Result<(), ModelError> {
        let table = self.table_mut(table_id)?;
        let field = table
            .fields
            .iter_mut()
            .find(|f| f.id == field_id)
            .ok_or_else(|| ModelError::not_found(EntityKind::Field, field_id))?;

        if !primary_key && field.auto_increment {
            return Err(ModelError::validation(format!(
                "cannot remove primary key from auto-increment field '{}'",
                field.name
            )));
        }

        field.primary_key = primary_key;
        if primary_key {
            field.nullable = false;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Indexes
    // ------------------------------------------------------------------

    pub fn add_index(&mut self, table_id: &TableId, index: Index) -> Result<(), ModelError> {
        let level = self.rules.validation_level;
        let table = self.table_mut(table_id)?;
        validate_index(table, &index, level)?;
        if table.indexes.iter().any(|i| i.name == index.name) {
            return Err(ModelError::DuplicateName {
                kind: EntityKind::Index,
                name: index.name,
            });
        }
        table.indexes.push(index);
        Ok(())
    }

    pub fn update_index(
        &mut self,
        table_id: &TableId,
        index_id: &str,
        mut index: Index,
    ) -> Result<(), ModelError> {
        let level = self.rules.validation_level;
        let table = self.table_mut(table_id)?;
        let position = table
            .indexes
            .iter()
            .position(|i| i.id == index_id)
            .ok_or_else(|| ModelError::not_found(EntityKind::Index, index_id))?;

        index.id = index_id.to_string();
        validate_index(table, &index, level)?;
        if table
            .indexes
            .iter()
            .any(|i| i.name == index.name && i.id != index_id)
        {
            return Err(ModelError::DuplicateName {
                kind: EntityKind::Index,
                name: index.name,
            });
        }
        table.indexes[position] = index;
        Ok(())
    }

    pub fn delete_index(&mut self, table_id: &TableId, index_id: &str) -> Result<Index, ModelError> {
        let table = self.table_mut(table_id)?;
        let position = table
            .indexes
            .iter()
            .position(|i| i.id == index_id)
            .ok_or_else(|| ModelError::not_found(EntityKind::Index, index_id))?;
        Ok(table.indexes.remove(position))
    }

    // ------------------------------------------------------------------
    // Relations
    // ------------------------------------------------------------------

    /// Adds a relation. `external` supplies tables that are not loaded in the
    /// model but were resolved through the persistence layer.
    pub fn add_relation(&mut self, relation: Relation, external: &[Table]) -> Result<(), ModelError> {
        if self.relation(&relation.id).is_some() {
            return Err(ModelError::validation(format!(
                "relation id '{}' already exists",
                relation.id
            )));
        }
        self.validate_relation(&relation, external)?;
        self.relations.push(relation);
        Ok(())
    }

    pub fn update_relation(
        &mut self,
        relation: Relation,
        external: &[Table],
    ) -> Result<(), ModelError> {
        let position = self
            .relations
            .iter()
            .position(|r| r.id == relation.id)
            .ok_or_else(|| ModelError::not_found(EntityKind::Relation, &relation.id))?;
        self.validate_relation(&relation, external)?;
        self.relations[position] = relation;
        Ok(())
    }

    pub fn delete_relation(&mut self, id: &RelationId) -> Result<Relation, ModelError> {
        let position = self
            .relations
            .iter()
            .position(|r| &r.id == id)
            .ok_or_else(|| ModelError::not_found(EntityKind::Relation, id))?;
        Ok(self.relations.remove(position))
    }

    /// Whether adding (or replacing) `relation` would close a directed cycle
    pub fn would_create_cycle(&self, relation: &Relation) -> bool {
        if relation.source_table_id == relation.target_table_id {
            return true;
        }
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for existing in self.relations.iter().filter(|r| r.id != relation.id) {
            graph.add_edge(
                existing.source_table_id.as_str(),
                existing.target_table_id.as_str(),
                (),
            );
        }
        graph.add_edge(
            relation.source_table_id.as_str(),
            relation.target_table_id.as_str(),
            (),
        );
        is_cyclic_directed(&graph)
    }

    fn validate_relation(&self, relation: &Relation, external: &[Table]) -> Result<(), ModelError> {
        for id in [&relation.source_table_id, &relation.target_table_id] {
            if id.is_draft() {
                return Err(ModelError::validation(format!(
                    "table {} must be saved before it can take part in a relation",
                    id
                )));
            }
        }

        let source = self
            .resolve_table(&relation.source_table_id, external)
            .ok_or_else(|| ModelError::not_found(EntityKind::Table, &relation.source_table_id))?;
        let target = self
            .resolve_table(&relation.target_table_id, external)
            .ok_or_else(|| ModelError::not_found(EntityKind::Table, &relation.target_table_id))?;

        for mapping in &relation.column_mappings {
            if !source.has_column(&mapping.source_column) {
                return Err(ModelError::validation(format!(
                    "column '{}' does not exist on table '{}'",
                    mapping.source_column, source.code
                )));
            }
            if !target.has_column(&mapping.target_column) {
                return Err(ModelError::validation(format!(
                    "column '{}' does not exist on table '{}'",
                    mapping.target_column, target.code
                )));
            }
        }

        if !self.rules.allow_relation_cycles && self.would_create_cycle(relation) {
            return Err(ModelError::validation(format!(
                "relation {} -> {} would create a circular dependency",
                source.code, target.code
            )));
        }
        Ok(())
    }

    fn resolve_table<'a>(&'a self, id: &TableId, external: &'a [Table]) -> Option<&'a Table> {
        self.table(id)
            .or_else(|| external.iter().find(|t| &t.id == id))
    }

    // ------------------------------------------------------------------
    // Loading, restoring and re-keying (not user edits, no validation)
    // ------------------------------------------------------------------

    /// Inserts a table fetched from the server, replacing any loaded copy.
    /// Returns `true` when an existing table was replaced.
    pub fn upsert_loaded(&mut self, table: Table) -> bool {
        match self.tables.iter_mut().find(|t| t.id == table.id) {
            Some(existing) => {
                *existing = table;
                true
            }
            None => {
                self.tables.push(table);
                false
            }
        }
    }

    pub fn set_relations(&mut self, relations: Vec<Relation>) {
        self.relations = relations;
    }

    /// Replaces the whole content, e.g. when a snapshot is restored
    pub fn replace_contents(&mut self, tables: Vec<Table>, relations: Vec<Relation>) {
        self.tables = tables;
        self.relations = relations;
    }

    /// Swaps a table's id (draft -> server id) everywhere it is referenced
    pub fn rekey_table(&mut self, old: &TableId, new: &TableId) {
        if let Some(table) = self.tables.iter_mut().find(|t| &t.id == old) {
            table.id = new.clone();
        }
        for relation in &mut self.relations {
            if &relation.source_table_id == old {
                relation.source_table_id = new.clone();
            }
            if &relation.target_table_id == old {
                relation.target_table_id = new.clone();
            }
        }
    }

    pub fn rekey_relation(&mut self, old: &RelationId, new: &RelationId) {
        if let Some(relation) = self.relations.iter_mut().find(|r| &r.id == old) {
            relation.id = new.clone();
        }
    }

    pub(crate) fn table_mut(&mut self, id: &TableId) -> Result<&mut Table, ModelError> {
        self.tables
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| ModelError::not_found(EntityKind::Table, id))
    }

    fn ensure_unique_code(
        &self,
        project_id: &str,
        code: &str,
        except: Option<&TableId>,
    ) -> Result<(), ModelError> {
        let taken = self.tables.iter().any(|t| {
            t.project_id == project_id
                && Some(&t.id) != except
                && t.code.eq_ignore_ascii_case(code)
        });
        if taken {
            return Err(ModelError::DuplicateName {
                kind: EntityKind::Table,
                name: code.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ColumnMapping, IndexKind, MappingType, RelationType};

    fn users() -> Table {
        Table::new("p1", "users")
            .with_id("t_users")
            .add_field(Field::new("id", "BIGINT").primary_key().auto_increment())
            .add_field(Field::new("name", "VARCHAR").with_length(64))
    }

    fn posts() -> Table {
        Table::new("p1", "posts")
            .with_id("t_posts")
            .add_field(Field::new("id", "BIGINT").primary_key().auto_increment())
            .add_field(Field::new("user_id", "BIGINT").not_null())
    }

    fn model_with(tables: Vec<Table>) -> EntityModel {
        let mut model = EntityModel::new(ModelRules::default());
        for table in tables {
            model.add_table(table).unwrap();
        }
        model
    }

    fn posts_to_users() -> Relation {
        Relation::new("p1", "t_posts", "t_users", RelationType::ManyToOne)
            .with_mapping(ColumnMapping::new("user_id", "id", MappingType::ForeignKey))
    }

    fn field_id(model: &EntityModel, table: &str, name: &str) -> String {
        model
            .table(&TableId::from(table))
            .and_then(|t| t.find_field(name))
            .map(|(_, f)| f.id.clone())
            .unwrap()
    }

    #[test]
    fn test_add_table_rejects_duplicate_code_case_insensitive() {
        let mut model = model_with(vec![users()]);
        let err = model.add_table(Table::new("p1", "USERS")).unwrap_err();
        assert_eq!(
            err,
            ModelError::DuplicateName {
                kind: EntityKind::Table,
                name: "USERS".to_string()
            }
        );
        assert_eq!(model.tables().len(), 1);
    }

    #[test]
    fn test_padded_code_cannot_shadow_existing_table() {
        let mut model = model_with(vec![users()]);
        let err = model.add_table(Table::new("p1", "USERS ")).unwrap_err();
        assert!(matches!(err, ModelError::Validation(_)));

        let padded_field = Field::new("name ", "VARCHAR");
        let users_id = TableId::from("t_users");
        assert!(model.add_field(&users_id, padded_field).is_err());
        assert_eq!(model.tables().len(), 1);
        assert_eq!(model.table(&users_id).unwrap().fields.len(), 2);
    }

    #[test]
    fn test_same_code_in_other_project_is_allowed() {
        let mut model = model_with(vec![users()]);
        assert!(model.add_table(Table::new("p2", "users")).is_ok());
    }

    #[test]
    fn test_add_table_rejects_duplicate_field_names() {
        let mut model = EntityModel::default();
        let table = Table::new("p1", "dupes")
            .add_field(Field::new("a", "INT"))
            .add_field(Field::new("a", "INT"));
        assert!(matches!(
            model.add_table(table),
            Err(ModelError::DuplicateName { kind: EntityKind::Field, .. })
        ));
    }

    #[test]
    fn test_update_table_changes_only_given_values() {
        let mut model = model_with(vec![users()]);
        let id = TableId::from("t_users");
        model
            .update_table(
                &id,
                TableChanges {
                    display_name: Some("Users".to_string()),
                    status: Some(TableStatus::Active),
                    ..TableChanges::default()
                },
            )
            .unwrap();
        let table = model.table(&id).unwrap();
        assert_eq!(table.display_name, "Users");
        assert_eq!(table.status, TableStatus::Active);
        assert_eq!(table.code, "users");
    }

    #[test]
    fn test_rename_table_to_existing_code_is_rejected() {
        let mut model = model_with(vec![users(), posts()]);
        let err = model
            .update_table(
                &TableId::from("t_posts"),
                TableChanges {
                    code: Some("Users".to_string()),
                    ..TableChanges::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateName { .. }));
        assert_eq!(model.table(&TableId::from("t_posts")).unwrap().code, "posts");
    }

    #[test]
    fn test_delete_table_cascades_relations() {
        let mut model = model_with(vec![users(), posts()]);
        let relation = posts_to_users();
        let relation_id = relation.id.clone();
        model.add_relation(relation, &[]).unwrap();

        let removed = model.delete_table(&TableId::from("t_posts")).unwrap();
        assert_eq!(removed, vec![relation_id]);
        assert!(model.relations().is_empty());
        assert_eq!(model.tables().len(), 1);
    }

    #[test]
    fn test_delete_table_rejects_under_reject_policy() {
        let mut model = EntityModel::new(ModelRules {
            delete_policy: DeletePolicy::Reject,
            ..ModelRules::default()
        });
        model.add_table(users()).unwrap();
        model.add_table(posts()).unwrap();
        model.add_relation(posts_to_users(), &[]).unwrap();

        let err = model.delete_table(&TableId::from("t_users")).unwrap_err();
        assert!(matches!(err, ModelError::ReferentialIntegrity { .. }));
        assert_eq!(model.tables().len(), 2);
        assert_eq!(model.relations().len(), 1);
    }

    #[test]
    fn test_add_field_rejects_duplicate_name() {
        let mut model = model_with(vec![users()]);
        let err = model
            .add_field(&TableId::from("t_users"), Field::new("name", "TEXT"))
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::DuplicateName {
                kind: EntityKind::Field,
                name: "name".to_string()
            }
        );
    }

    #[test]
    fn test_add_field_enforces_auto_increment_invariant() {
        let mut model = model_with(vec![users()]);
        let field = Field::new("seq", "INT").auto_increment();
        assert!(matches!(
            model.add_field(&TableId::from("t_users"), field),
            Err(ModelError::Validation(_))
        ));
    }

    #[test]
    fn test_update_field_rename_propagates_to_indexes_and_relations() {
        let mut model = model_with(vec![users(), posts()]);
        let posts_id = TableId::from("t_posts");
        model
            .add_index(
                &posts_id,
                Index::new("idx_user", IndexKind::Index, ["user_id"]),
            )
            .unwrap();
        model.add_relation(posts_to_users(), &[]).unwrap();

        let id = field_id(&model, "t_posts", "user_id");
        model
            .update_field(&posts_id, &id, Field::new("author_id", "BIGINT").not_null())
            .unwrap();

        let table = model.table(&posts_id).unwrap();
        assert_eq!(table.fields[1].name, "author_id");
        assert_eq!(table.fields[1].id, id);
        assert_eq!(table.indexes[0].columns, vec!["author_id"]);
        assert_eq!(model.relations()[0].column_mappings[0].source_column, "author_id");
        assert_eq!(model.relations()[0].column_mappings[0].target_column, "id");
    }

    #[test]
    fn test_update_field_rejects_clearing_primary_key_of_auto_increment() {
        let mut model = model_with(vec![users()]);
        let table_id = TableId::from("t_users");
        let id = field_id(&model, "t_users", "id");
        let mut field = model.table(&table_id).unwrap().fields[0].clone();
        field.primary_key = false;

        assert!(model.update_field(&table_id, &id, field).is_err());
        assert!(model.table(&table_id).unwrap().fields[0].primary_key);
    }

    #[test]
    fn test_update_field_duplicate_name_is_rejected() {
        let mut model = model_with(vec![users()]);
        let table_id = TableId::from("t_users");
        let id = field_id(&model, "t_users", "name");
        let err = model
            .update_field(&table_id, &id, Field::new("id", "INT"))
            .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateName { .. }));
    }

    #[test]
    fn test_delete_field_in_use_by_index_is_rejected() {
        let mut model = model_with(vec![users()]);
        let table_id = TableId::from("t_users");
        model
            .add_index(&table_id, Index::new("idx_name", IndexKind::Index, ["name"]))
            .unwrap();
        let id = field_id(&model, "t_users", "name");
        assert!(model.delete_field(&table_id, &id).is_err());

        let index_id = model.table(&table_id).unwrap().indexes[0].id.clone();
        model.delete_index(&table_id, &index_id).unwrap();
        let removed = model.delete_field(&table_id, &id).unwrap();
        assert_eq!(removed.name, "name");
    }

    #[test]
    fn test_move_field() {
        let mut model = model_with(vec![users()]);
        let table_id = TableId::from("t_users");
        model.move_field(&table_id, 1, 0).unwrap();
        let names: Vec<_> = model
            .table(&table_id)
            .unwrap()
            .fields
            .iter()
            .map(|f| f.name.clone())
            .collect();
        assert_eq!(names, ["name", "id"]);
        assert!(model.move_field(&table_id, 5, 0).is_err());
    }

    #[test]
    fn test_set_primary_key_does_not_create_primary_index() {
        let mut model = model_with(vec![users()]);
        let table_id = TableId::from("t_users");
        let id = field_id(&model, "t_users", "name");
        model.set_primary_key(&table_id, &id, true).unwrap();

        let table = model.table(&table_id).unwrap();
        assert!(table.fields[1].primary_key);
        assert!(!table.fields[1].nullable);
        assert!(table.primary_index().is_none());
    }

    #[test]
    fn test_set_primary_key_refuses_orphaning_auto_increment() {
        let mut model = model_with(vec![users()]);
        let table_id = TableId::from("t_users");
        let id = field_id(&model, "t_users", "id");
        assert!(matches!(
            model.set_primary_key(&table_id, &id, false),
            Err(ModelError::Validation(_))
        ));
    }

    #[test]
    fn test_only_one_primary_index() {
        let mut model = model_with(vec![users()]);
        let table_id = TableId::from("t_users");
        model
            .add_index(&table_id, Index::new("pk_users", IndexKind::Primary, ["id"]))
            .unwrap();
        assert!(model
            .add_index(&table_id, Index::new("pk_other", IndexKind::Primary, ["name"]))
            .is_err());
    }

    #[test]
    fn test_relation_requires_existing_columns() {
        let mut model = model_with(vec![users(), posts()]);
        let bad = Relation::new("p1", "t_posts", "t_users", RelationType::ManyToOne)
            .with_mapping(ColumnMapping::new("owner_id", "id", MappingType::ForeignKey));
        assert!(model.add_relation(bad, &[]).is_err());
        assert!(model.relations().is_empty());
    }

    #[test]
    fn test_relation_resolves_external_tables() {
        let mut model = model_with(vec![posts()]);
        assert!(model.add_relation(posts_to_users(), &[]).is_err());
        assert!(model.add_relation(posts_to_users(), &[users()]).is_ok());
    }

    #[test]
    fn test_relation_rejects_draft_tables() {
        let mut model = EntityModel::default();
        let draft = Table::new("p1", "drafts").add_field(Field::new("id", "INT"));
        let draft_id = draft.id.clone();
        model.add_table(draft).unwrap();
        model.add_table(users()).unwrap();

        let relation = Relation::new("p1", draft_id, "t_users", RelationType::ManyToOne);
        assert!(model.add_relation(relation, &[]).is_err());
    }

    #[test]
    fn test_relation_cycles() {
        let mut model = model_with(vec![users(), posts()]);
        model.add_relation(posts_to_users(), &[]).unwrap();

        let back = Relation::new("p1", "t_users", "t_posts", RelationType::OneToMany);
        assert!(model.would_create_cycle(&back));
        assert!(model.add_relation(back.clone(), &[]).is_err());

        let self_ref = Relation::new("p1", "t_users", "t_users", RelationType::OneToMany);
        assert!(model.would_create_cycle(&self_ref));

        let mut permissive = EntityModel::new(ModelRules {
            allow_relation_cycles: true,
            ..ModelRules::default()
        });
        permissive.add_table(users()).unwrap();
        permissive.add_table(posts()).unwrap();
        permissive.add_relation(posts_to_users(), &[]).unwrap();
        assert!(permissive.add_relation(back, &[]).is_ok());
    }

    #[test]
    fn test_relation_queries() {
        let mut model = model_with(vec![users(), posts()]);
        model.add_relation(posts_to_users(), &[]).unwrap();
        let users_id = TableId::from("t_users");
        let posts_id = TableId::from("t_posts");
        assert_eq!(model.relations_for_table(&users_id).len(), 1);
        assert_eq!(model.relations_between(&users_id, &posts_id).len(), 1);
        assert_eq!(model.relations_between(&posts_id, &users_id).len(), 1);
    }

    #[test]
    fn test_rekey_table_updates_relations() {
        let mut model = model_with(vec![users(), posts()]);
        model.add_relation(posts_to_users(), &[]).unwrap();
        let new_id = TableId::from("srv_users");
        model.rekey_table(&TableId::from("t_users"), &new_id);

        assert!(model.contains_table(&new_id));
        assert_eq!(model.relations()[0].target_table_id, new_id);
    }

    #[test]
    fn test_upsert_loaded_replaces_in_place() {
        let mut model = model_with(vec![users(), posts()]);
        let reloaded = users().with_display_name("Reloaded");
        assert!(model.upsert_loaded(reloaded));
        assert_eq!(model.tables()[0].display_name, "Reloaded");
        assert!(!model.upsert_loaded(Table::new("p1", "tags").with_id("t_tags")));
        assert_eq!(model.tables().len(), 3);
    }

    #[test]
    fn test_delete_policy_from_str() {
        assert_eq!("Reject".parse::<DeletePolicy>(), Ok(DeletePolicy::Reject));
        assert!("drop".parse::<DeletePolicy>().is_err());
    }
}
