//! In-memory schema-design store
//!
//! Behaves like the real backend where the session can tell the difference:
//! ids are assigned on create, stored blobs are echoed back entity-escaped,
//! and every call can be made to fail on demand.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    LayoutClient, NodePosition, PersistenceClient, RelationClient, RelationPayload,
    TableDetailRaw, TablePayload, TableSummary,
};
use crate::core::codec::escape_entities;
use crate::core::error::{CodecError, EntityKind, PersistenceError};
use crate::core::schema::{Relation, RelationId, Table, TableId};

/// Backend call that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    ListTables,
    GetTable,
    CreateTable,
    UpdateTable,
    DeleteTable,
    SyncTable,
    ListRelations,
    CreateRelation,
    UpdateRelation,
    DeleteRelation,
    GetLayout,
    SaveLayout,
}

impl FailPoint {
    fn operation(self) -> &'static str {
        match self {
            FailPoint::ListTables => "list tables",
            FailPoint::GetTable => "get table",
            FailPoint::CreateTable => "create table",
            FailPoint::UpdateTable => "update table",
            FailPoint::DeleteTable => "delete table",
            FailPoint::SyncTable => "sync table",
            FailPoint::ListRelations => "list relations",
            FailPoint::CreateRelation => "create relation",
            FailPoint::UpdateRelation => "update relation",
            FailPoint::DeleteRelation => "delete relation",
            FailPoint::GetLayout => "get layout",
            FailPoint::SaveLayout => "save layout",
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    tables: BTreeMap<TableId, TableDetailRaw>,
    relations: BTreeMap<RelationId, Relation>,
    layouts: HashMap<String, Vec<NodePosition>>,
    failures: HashSet<FailPoint>,
    synced: Vec<TableId>,
}

impl StoreState {
    fn check(&self, point: FailPoint) -> Result<(), PersistenceError> {
        if self.failures.contains(&point) {
            return Err(PersistenceError::request(
                point.operation(),
                "injected failure",
            ));
        }
        Ok(())
    }

    fn ensure_table(&self, id: &TableId) -> Result<(), PersistenceError> {
        if self.tables.contains_key(id) {
            Ok(())
        } else {
            Err(PersistenceError::NotFound {
                kind: EntityKind::Table,
                id: id.to_string(),
            })
        }
    }

    fn check_relation_endpoints(
        &self,
        operation: &'static str,
        payload: &RelationPayload,
    ) -> Result<(), PersistenceError> {
        for id in [&payload.source_table_id, &payload.target_table_id] {
            if !self.tables.contains_key(id) {
                return Err(PersistenceError::Rejected {
                    operation,
                    message: format!("table {} does not exist", id),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<StoreState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call at `point` fail until cleared
    pub async fn fail_on(&self, point: FailPoint) {
        self.state.lock().await.failures.insert(point);
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    /// Seeds a table under its current id, stored the way the backend would
    pub async fn insert_table(&self, table: &Table) -> Result<TableId, CodecError> {
        let payload = TablePayload::from_table(table)?;
        let raw = stored_detail(table.id.clone(), &payload, table.synced);
        self.state.lock().await.tables.insert(table.id.clone(), raw);
        Ok(table.id.clone())
    }

    /// Seeds a raw row as is, e.g. one with a malformed blob
    pub async fn insert_raw(&self, raw: TableDetailRaw) {
        self.state.lock().await.tables.insert(raw.id.clone(), raw);
    }

    pub async fn insert_relation(&self, relation: Relation) {
        self.state
            .lock()
            .await
            .relations
            .insert(relation.id.clone(), relation);
    }

    pub async fn table(&self, id: &TableId) -> Option<TableDetailRaw> {
        self.state.lock().await.tables.get(id).cloned()
    }

    pub async fn table_count(&self) -> usize {
        self.state.lock().await.tables.len()
    }

    pub async fn relations(&self) -> Vec<Relation> {
        self.state.lock().await.relations.values().cloned().collect()
    }

    pub async fn layout(&self, project_id: &str) -> Vec<NodePosition> {
        self.state
            .lock()
            .await
            .layouts
            .get(project_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Tables pushed to the live database, in call order
    pub async fn synced_tables(&self) -> Vec<TableId> {
        self.state.lock().await.synced.clone()
    }
}

fn stored_detail(id: TableId, payload: &TablePayload, synced: bool) -> TableDetailRaw {
    let now = Utc::now();
    TableDetailRaw {
        id,
        code: payload.code.clone(),
        display_name: payload.display_name.clone(),
        comment: payload.comment.clone(),
        kind: payload.kind,
        domain: payload.domain,
        status: payload.status,
        synced,
        metadata: Value::String(escape_entities(&payload.metadata)),
        columns: Value::String(escape_entities(&payload.columns)),
        project_id: payload.project_id.clone(),
        created_at: Some(now),
        updated_at: Some(now),
    }
}

#[async_trait]
impl PersistenceClient for InMemoryBackend {
    async fn list_tables(&self, project_id: &str) -> Result<Vec<TableSummary>, PersistenceError> {
        let state = self.state.lock().await;
        state.check(FailPoint::ListTables)?;
        Ok(state
            .tables
            .values()
            .filter(|t| t.project_id == project_id)
            .map(TableDetailRaw::summary)
            .collect())
    }

    async fn get_table(&self, table_id: &TableId) -> Result<TableDetailRaw, PersistenceError> {
        let state = self.state.lock().await;
        state.check(FailPoint::GetTable)?;
        state.ensure_table(table_id)?;
        Ok(state.tables[table_id].clone())
    }

    async fn create_table(
        &self,
        payload: &TablePayload,
    ) -> Result<TableDetailRaw, PersistenceError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::CreateTable)?;
        let taken = state.tables.values().any(|t| {
            t.project_id == payload.project_id && t.code.eq_ignore_ascii_case(&payload.code)
        });
        if taken {
            return Err(PersistenceError::Rejected {
                operation: "create table",
                message: format!("table code '{}' already exists", payload.code),
            });
        }

        let id = TableId::new(Uuid::new_v4().to_string());
        let raw = stored_detail(id.clone(), payload, false);
        state.tables.insert(id, raw.clone());
        Ok(raw)
    }

    async fn update_table(
        &self,
        table_id: &TableId,
        payload: &TablePayload,
    ) -> Result<TableDetailRaw, PersistenceError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::UpdateTable)?;
        state.ensure_table(table_id)?;

        let created_at = state.tables[table_id].created_at;
        // A changed design is out of sync with the live database again
        let mut raw = stored_detail(table_id.clone(), payload, false);
        raw.created_at = created_at;
        state.tables.insert(table_id.clone(), raw.clone());
        Ok(raw)
    }

    async fn delete_table(&self, table_id: &TableId) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::DeleteTable)?;
        state.ensure_table(table_id)?;
        state.tables.remove(table_id);
        state.relations.retain(|_, r| !r.touches(table_id));
        Ok(())
    }

    async fn sync_table(&self, table_id: &TableId) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::SyncTable)?;
        state.ensure_table(table_id)?;
        if let Some(raw) = state.tables.get_mut(table_id) {
            raw.synced = true;
        }
        state.synced.push(table_id.clone());
        Ok(())
    }
}

#[async_trait]
impl RelationClient for InMemoryBackend {
    async fn list_relations(&self, project_id: &str) -> Result<Vec<Relation>, PersistenceError> {
        let state = self.state.lock().await;
        state.check(FailPoint::ListRelations)?;
        Ok(state
            .relations
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn create_relation(
        &self,
        payload: &RelationPayload,
    ) -> Result<Relation, PersistenceError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::CreateRelation)?;
        state.check_relation_endpoints("create relation", payload)?;

        let relation = payload
            .clone()
            .into_relation(RelationId::new(Uuid::new_v4().to_string()));
        state.relations.insert(relation.id.clone(), relation.clone());
        Ok(relation)
    }

    async fn update_relation(
        &self,
        relation_id: &RelationId,
        payload: &RelationPayload,
    ) -> Result<Relation, PersistenceError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::UpdateRelation)?;
        if !state.relations.contains_key(relation_id) {
            return Err(PersistenceError::NotFound {
                kind: EntityKind::Relation,
                id: relation_id.to_string(),
            });
        }
        state.check_relation_endpoints("update relation", payload)?;

        let relation = payload.clone().into_relation(relation_id.clone());
        state.relations.insert(relation_id.clone(), relation.clone());
        Ok(relation)
    }

    async fn delete_relation(&self, relation_id: &RelationId) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::DeleteRelation)?;
        state
            .relations
            .remove(relation_id)
            .map(|_| ())
            .ok_or_else(|| PersistenceError::NotFound {
                kind: EntityKind::Relation,
                id: relation_id.to_string(),
            })
    }
}

#[async_trait]
impl LayoutClient for InMemoryBackend {
    async fn get_layout(&self, project_id: &str) -> Result<Vec<NodePosition>, PersistenceError> {
        let state = self.state.lock().await;
        state.check(FailPoint::GetLayout)?;
        Ok(state.layouts.get(project_id).cloned().unwrap_or_default())
    }

    async fn save_layout(
        &self,
        project_id: &str,
        positions: &[NodePosition],
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        state.check(FailPoint::SaveLayout)?;
        state
            .layouts
            .insert(project_id.to_string(), positions.to_vec());
        Ok(())
    }
}
