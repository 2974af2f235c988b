//! Snapshot-based undo/redo
//!
//! Every committed mutation pushes a deep copy of the tables, relations and
//! positions. The baseline snapshot is tracked separately: it marks the last
//! saved/loaded state and only moves on save or load, never on undo/redo.

use std::sync::Arc;

use crate::core::model::EntityModel;
use crate::core::positions::{PositionMap, PositionStore};
use crate::core::schema::{Position, Relation, Table, TableId};

/// Immutable copy of the session content at one point in time
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    tables: Vec<Table>,
    relations: Vec<Relation>,
    positions: PositionMap,
}

impl Snapshot {
    pub fn new(tables: Vec<Table>, relations: Vec<Relation>, positions: PositionMap) -> Self {
        Self {
            tables,
            relations,
            positions,
        }
    }

    /// Structural clone of the live state. The snapshot owns all of its
    /// data; later edits to the model or store never reach it.
    pub fn capture(model: &EntityModel, positions: &PositionStore) -> Self {
        Self {
            tables: model.tables().to_vec(),
            relations: model.relations().to_vec(),
            positions: positions.all().clone(),
        }
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn positions(&self) -> &PositionMap {
        &self.positions
    }

    pub fn table(&self, id: &TableId) -> Option<&Table> {
        self.tables.iter().find(|t| &t.id == id)
    }

    /// Owned copies of the content, for restoring into the live stores
    pub fn to_parts(&self) -> (Vec<Table>, Vec<Relation>, PositionMap) {
        (
            self.tables.clone(),
            self.relations.clone(),
            self.positions.clone(),
        )
    }

    /// Inserts a table loaded from the server. Loading is not an edit, so a
    /// loaded table is made part of every recorded state. A copy already
    /// recorded here is never replaced, and neither is its position.
    fn absorb(&mut self, table: &Table, position: Option<Position>) {
        if self.table(&table.id).is_some() {
            return;
        }
        self.tables.push(table.clone());
        if let Some(position) = position {
            self.positions.entry(table.id.clone()).or_insert(position);
        }
    }

    fn rekey(&mut self, old: &TableId, new: &TableId) {
        for table in self.tables.iter_mut().filter(|t| &t.id == old) {
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
        if let Some(position) = self.positions.remove(old) {
            self.positions.insert(new.clone(), position);
        }
    }
}

#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<Arc<Snapshot>>,
    index: usize,
    baseline: Arc<Snapshot>,
    limit: Option<usize>,
    restoring: bool,
}

impl History {
    /// Starts a history whose only entry is also the baseline.
    /// `limit` bounds the number of entries kept; `None` keeps everything.
    pub fn new(initial: Snapshot, limit: Option<usize>) -> Self {
        let initial = Arc::new(initial);
        Self {
            entries: vec![Arc::clone(&initial)],
            index: 0,
            baseline: initial,
            limit: limit.map(|l| l.max(1)),
            restoring: false,
        }
    }

    /// Records a new state after a fully applied mutation.
    ///
    /// Forward history past the current index is discarded. Returns `false`
    /// and records nothing while a snapshot is being restored.
    pub fn commit(&mut self, snapshot: Snapshot) -> bool {
        if self.restoring {
            tracing::warn!("Ignoring commit issued while restoring a snapshot");
            return false;
        }

        self.entries.truncate(self.index + 1);
        self.entries.push(Arc::new(snapshot));

        if let Some(limit) = self.limit
            && self.entries.len() > limit
        {
            let overflow = self.entries.len() - limit;
            self.entries.drain(..overflow);
        }

        self.index = self.entries.len() - 1;
        tracing::debug!("History commit: {} entries, index {}", self.entries.len(), self.index);
        true
    }

    /// Steps back one entry and returns the state to restore, if any
    pub fn undo(&mut self) -> Option<Arc<Snapshot>> {
        if !self.can_undo() {
            return None;
        }
        self.index -= 1;
        tracing::debug!("History undo -> index {}", self.index);
        Some(self.current())
    }

    /// Steps forward one entry and returns the state to restore, if any
    pub fn redo(&mut self) -> Option<Arc<Snapshot>> {
        if !self.can_redo() {
            return None;
        }
        self.index += 1;
        tracing::debug!("History redo -> index {}", self.index);
        Some(self.current())
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    /// Collapses the history to a single entry that is also the new baseline
    pub fn reset(&mut self, baseline: Snapshot) {
        let baseline = Arc::new(baseline);
        self.entries = vec![Arc::clone(&baseline)];
        self.index = 0;
        self.baseline = baseline;
        tracing::debug!("History reset to new baseline");
    }

    /// Whether the baseline or any entry records the table
    pub fn knows_table(&self, table_id: &TableId) -> bool {
        self.baseline.table(table_id).is_some()
            || self.entries.iter().any(|entry| entry.table(table_id).is_some())
    }

    /// Folds a table loaded from the server into the baseline and every entry
    /// that does not record it yet
    pub fn absorb_loaded(&mut self, table: &Table, position: Option<Position>) {
        for entry in &mut self.entries {
            Arc::make_mut(entry).absorb(table, position);
        }
        Arc::make_mut(&mut self.baseline).absorb(table, position);
    }

    /// Flags a table as pushed to the live database in every recorded state
    pub fn mark_synced(&mut self, table_id: &TableId) {
        let mark = |snapshot: &mut Snapshot| {
            for table in snapshot.tables.iter_mut().filter(|t| &t.id == table_id) {
                table.synced = true;
            }
        };
        for entry in &mut self.entries {
            if entry.table(table_id).is_some() {
                mark(Arc::make_mut(entry));
            }
        }
        mark(Arc::make_mut(&mut self.baseline));
    }

    /// Records persisted canvas positions as saved, for tables the baseline knows
    pub fn record_saved_positions(&mut self, positions: &PositionMap) {
        let baseline = Arc::make_mut(&mut self.baseline);
        for (id, position) in positions {
            if baseline.table(id).is_some() {
                baseline.positions.insert(id.clone(), *position);
            }
        }
    }

    /// Replaces a draft table id with its server id in every entry, so undo
    /// never resurrects the draft after the table was created remotely
    pub fn rekey_table(&mut self, old: &TableId, new: &TableId) {
        for entry in &mut self.entries {
            Arc::make_mut(entry).rekey(old, new);
        }
        Arc::make_mut(&mut self.baseline).rekey(old, new);
    }

    /// Runs `f` with the re-entrancy guard raised; commits issued from inside
    /// are ignored.
    pub fn restoring<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = std::mem::replace(&mut self.restoring, true);
        let result = f(self);
        self.restoring = previous;
        result
    }

    pub fn is_restoring(&self) -> bool {
        self.restoring
    }

    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.entries[self.index])
    }

    pub fn baseline(&self) -> &Snapshot {
        &self.baseline
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, index: usize) -> Option<&Snapshot> {
        self.entries.get(index).map(|e| e.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::Field;

    fn snapshot_with(codes: &[&str]) -> Snapshot {
        let tables = codes
            .iter()
            .map(|c| Table::new("p1", *c).with_id(*c))
            .collect();
        Snapshot::new(tables, Vec::new(), PositionMap::new())
    }

    #[test]
    fn test_initial_state() {
        let history = History::new(snapshot_with(&[]), None);
        assert_eq!(history.len(), 1);
        assert_eq!(history.index(), 0);
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert_eq!(*history.current(), *history.baseline());
    }

    #[test]
    fn test_commit_undo_redo() {
        let mut history = History::new(snapshot_with(&[]), None);
        history.commit(snapshot_with(&["a"]));
        history.commit(snapshot_with(&["a", "b"]));
        assert_eq!(history.index(), 2);

        let back = history.undo().unwrap();
        assert_eq!(back.tables().len(), 1);
        let back = history.undo().unwrap();
        assert!(back.tables().is_empty());
        assert!(history.undo().is_none());
        assert_eq!(history.index(), 0);

        let forward = history.redo().unwrap();
        assert_eq!(forward.tables().len(), 1);
        history.redo();
        assert!(history.redo().is_none());
        assert_eq!(history.index(), 2);
    }

    #[test]
    fn test_commit_after_undo_truncates_forward_branch() {
        let mut history = History::new(snapshot_with(&[]), None);
        history.commit(snapshot_with(&["a"]));
        history.commit(snapshot_with(&["a", "b"]));
        history.undo();
        history.commit(snapshot_with(&["a", "c"]));

        assert!(!history.can_redo());
        assert_eq!(history.len(), 3);
        assert!(history.current().table(&TableId::from("c")).is_some());
    }

    #[test]
    fn test_limit_drops_oldest_entries() {
        let mut history = History::new(snapshot_with(&[]), Some(3));
        for code in ["a", "b", "c", "d"] {
            history.commit(snapshot_with(&[code]));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.index(), 2);
        assert!(history.entry(0).unwrap().table(&TableId::from("b")).is_some());
        // Baseline is independent of the bounded stack
        assert!(history.baseline().tables().is_empty());
    }

    #[test]
    fn test_reset_collapses_to_baseline() {
        let mut history = History::new(snapshot_with(&[]), None);
        history.commit(snapshot_with(&["a"]));
        history.commit(snapshot_with(&["a", "b"]));
        history.reset(snapshot_with(&["saved"]));

        assert_eq!(history.len(), 1);
        assert_eq!(history.index(), 0);
        assert!(!history.can_undo());
        assert!(history.baseline().table(&TableId::from("saved")).is_some());
    }

    #[test]
    fn test_undo_does_not_move_baseline() {
        let mut history = History::new(snapshot_with(&["a"]), None);
        history.commit(snapshot_with(&["a", "b"]));
        history.undo();
        history.redo();
        assert_eq!(history.baseline().tables().len(), 1);
    }

    #[test]
    fn test_commit_is_ignored_while_restoring() {
        let mut history = History::new(snapshot_with(&[]), None);
        let recorded = history.restoring(|h| {
            assert!(h.is_restoring());
            h.commit(snapshot_with(&["a"]))
        });
        assert!(!recorded);
        assert!(!history.is_restoring());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_snapshot_capture_is_a_deep_copy() {
        let mut model = EntityModel::default();
        model
            .add_table(
                Table::new("p1", "users")
                    .with_id("t1")
                    .add_field(Field::new("name", "VARCHAR")),
            )
            .unwrap();
        let mut store = PositionStore::default();
        let id = TableId::from("t1");
        store.set(&model, &id, 1.0, 2.0);

        let snapshot = Snapshot::capture(&model, &store);
        let field_id = model.table(&id).unwrap().fields[0].id.clone();
        model
            .update_field(&id, &field_id, Field::new("full_name", "VARCHAR"))
            .unwrap();
        store.set(&model, &id, 9.0, 9.0);

        assert_eq!(snapshot.table(&id).unwrap().fields[0].name, "name");
        assert_eq!(snapshot.positions()[&id], Position::new(1.0, 2.0));
    }

    #[test]
    fn test_absorb_loaded_reaches_every_entry_and_baseline() {
        let mut history = History::new(snapshot_with(&["a"]), None);
        history.commit(snapshot_with(&["a", "b"]));
        let loaded = Table::new("p1", "loaded").with_id("l1");
        history.absorb_loaded(&loaded, Some(Position::new(3.0, 4.0)));

        let id = TableId::from("l1");
        assert!(history.entry(0).unwrap().table(&id).is_some());
        assert!(history.entry(1).unwrap().table(&id).is_some());
        assert!(history.baseline().table(&id).is_some());
        assert_eq!(history.baseline().positions()[&id], Position::new(3.0, 4.0));

        // A second load keeps the recorded copy and position
        let renamed = Table::new("p1", "renamed").with_id("l1");
        history.absorb_loaded(&renamed, Some(Position::new(50.0, 50.0)));
        assert_eq!(history.baseline().positions()[&id], Position::new(3.0, 4.0));
        assert_eq!(history.entry(1).unwrap().table(&id).unwrap().code, "loaded");
        assert_eq!(history.baseline().table(&id).unwrap().code, "loaded");
    }

    #[test]
    fn test_knows_table_covers_entries_and_baseline() {
        let mut history = History::new(snapshot_with(&["a"]), None);
        history.commit(snapshot_with(&["a", "b"]));
        history.commit(snapshot_with(&["b"]));
        assert!(history.knows_table(&TableId::from("a")));
        assert!(history.knows_table(&TableId::from("b")));
        assert!(!history.knows_table(&TableId::from("c")));
    }

    #[test]
    fn test_mark_synced_and_saved_positions() {
        let mut history = History::new(snapshot_with(&["a"]), None);
        history.commit(snapshot_with(&["a", "b"]));
        let a = TableId::from("a");
        history.mark_synced(&a);
        assert!(history.entry(0).unwrap().table(&a).unwrap().synced);
        assert!(history.current().table(&a).unwrap().synced);
        assert!(history.baseline().table(&a).unwrap().synced);

        let mut positions = PositionMap::new();
        positions.insert(a.clone(), Position::new(7.0, 8.0));
        positions.insert(TableId::from("b"), Position::new(1.0, 1.0));
        history.record_saved_positions(&positions);
        assert_eq!(history.baseline().positions().len(), 1);
        assert_eq!(history.baseline().positions()[&a], Position::new(7.0, 8.0));
    }

    #[test]
    fn test_rekey_table_in_all_entries() {
        let draft = Table::new("p1", "orders");
        let draft_id = draft.id.clone();
        let mut positions = PositionMap::new();
        positions.insert(draft_id.clone(), Position::new(1.0, 1.0));
        let mut history = History::new(Snapshot::default(), None);
        history.commit(Snapshot::new(vec![draft], Vec::new(), positions));

        let server_id = TableId::from("srv-1");
        history.rekey_table(&draft_id, &server_id);
        let current = history.current();
        assert!(current.table(&server_id).is_some());
        assert!(current.table(&draft_id).is_none());
        assert!(current.positions().contains_key(&server_id));
    }
}
