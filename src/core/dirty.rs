//! Structural comparison between the live state and the saved baseline
//!
//! Everything here is pure. Fields compare in order (column order matters),
//! indexes compare by id regardless of order, positions compare exactly.

use crate::core::history::Snapshot;
use crate::core::schema::{Index, Relation, RelationId, Table, TableId};

/// Whether `current` differs from `baseline` in any way a save would persist
pub fn is_dirty(current: &Snapshot, baseline: &Snapshot) -> bool {
    if current.tables().len() != baseline.tables().len()
        || current.relations().len() != baseline.relations().len()
        || current.positions().len() != baseline.positions().len()
    {
        return true;
    }

    let tables_changed = current.tables().iter().any(|table| {
        baseline
            .table(&table.id)
            .is_none_or(|saved| !tables_equal(table, saved))
    });
    if tables_changed {
        return true;
    }

    if current.positions() != baseline.positions() {
        return true;
    }

    current.relations().iter().any(|relation| {
        find_relation(baseline.relations(), &relation.id).is_none_or(|saved| saved != relation)
    })
}

/// Ids of tables that are new or differ from their saved version
pub fn changed_tables(current: &Snapshot, baseline: &Snapshot) -> Vec<TableId> {
    current
        .tables()
        .iter()
        .filter(|table| {
            baseline
                .table(&table.id)
                .is_none_or(|saved| !tables_equal(table, saved))
        })
        .map(|table| table.id.clone())
        .collect()
}

/// Ids of saved tables that no longer exist in the live state
pub fn removed_tables(current: &Snapshot, baseline: &Snapshot) -> Vec<TableId> {
    baseline
        .tables()
        .iter()
        .filter(|saved| current.table(&saved.id).is_none())
        .map(|saved| saved.id.clone())
        .collect()
}

/// Relation changes needed to bring the baseline up to the live state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationDiff {
    pub created: Vec<Relation>,
    pub updated: Vec<Relation>,
    pub deleted: Vec<RelationId>,
}

impl RelationDiff {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

pub fn diff_relations(current: &[Relation], baseline: &[Relation]) -> RelationDiff {
    let mut diff = RelationDiff::default();
    for relation in current {
        match find_relation(baseline, &relation.id) {
            None => diff.created.push(relation.clone()),
            Some(saved) if saved != relation => diff.updated.push(relation.clone()),
            Some(_) => {}
        }
    }
    diff.deleted = baseline
        .iter()
        .filter(|saved| find_relation(current, &saved.id).is_none())
        .map(|saved| saved.id.clone())
        .collect();
    diff
}

fn tables_equal(a: &Table, b: &Table) -> bool {
    a.code == b.code
        && a.display_name == b.display_name
        && a.comment == b.comment
        && a.kind == b.kind
        && a.domain == b.domain
        && a.status == b.status
        && a.synced == b.synced
        && a.project_id == b.project_id
        && a.fields == b.fields
        && indexes_equal(&a.indexes, &b.indexes)
        && a.metadata == b.metadata
}

fn indexes_equal(a: &[Index], b: &[Index]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .all(|index| b.iter().any(|other| other.id == index.id && other == index))
}

fn find_relation<'a>(relations: &'a [Relation], id: &RelationId) -> Option<&'a Relation> {
    relations.iter().find(|r| &r.id == id)
}
