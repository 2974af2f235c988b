//! Designer session: one per open schema canvas
//!
//! Owns the entity model, position store and history, and drives them through
//! load, select, edit, save, sync and navigate-away flows. Persistence calls
//! are async; everything else is synchronous and applied in full before the
//! next operation starts.

use crate::core::config::SessionConfig;
use crate::core::dirty;
use crate::core::error::{CodecError, EntityKind, ModelError, PersistenceError, SessionError};
use crate::core::history::{History, Snapshot};
use crate::core::model::{EntityModel, TableChanges};
use crate::core::persistence::{
    Backends, DecodedTable, RelationPayload, TableDetailRaw, TablePayload, TableSummary,
    layout_from_positions, positions_from_layout,
};
use crate::core::positions::{PositionMap, PositionStore};
use crate::core::schema::{Field, Index, Position, Relation, RelationId, Table, TableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Ready,
    /// Ready with unsaved changes
    Editing,
    Saving,
    ConfirmingNavigation,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Loading => "loading",
            SessionState::Ready => "ready",
            SessionState::Editing => "editing",
            SessionState::Saving => "saving",
            SessionState::ConfirmingNavigation => "confirming navigation",
        }
    }
}

/// A user edit. Each one is applied completely or not at all, then committed.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    AddTable(Table),
    UpdateTable {
        table_id: TableId,
        changes: TableChanges,
    },
    DeleteTable(TableId),
    AddField {
        table_id: TableId,
        field: Field,
    },
    UpdateField {
        table_id: TableId,
        field_id: String,
        field: Field,
    },
    DeleteField {
        table_id: TableId,
        field_id: String,
    },
    MoveField {
        table_id: TableId,
        from: usize,
        to: usize,
    },
    SetPrimaryKey {
        table_id: TableId,
        field_id: String,
        primary_key: bool,
    },
    AddIndex {
        table_id: TableId,
        index: Index,
    },
    UpdateIndex {
        table_id: TableId,
        index_id: String,
        index: Index,
    },
    DeleteIndex {
        table_id: TableId,
        index_id: String,
    },
    AddRelation(Relation),
    UpdateRelation(Relation),
    DeleteRelation(RelationId),
    MoveTable {
        table_id: TableId,
        position: Position,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationOutcome {
    /// Relations removed together with a deleted table
    pub removed_relation_ids: Vec<RelationId>,
    /// Whether a history entry was recorded
    pub committed: bool,
}

/// Handle for an in-flight table fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectTicket {
    table_id: TableId,
}

impl SelectTicket {
    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectOutcome {
    Applied {
        table_id: TableId,
        /// Blobs that could not be decoded and were replaced by empty ones
        warnings: Vec<CodecError>,
    },
    /// Another table was selected before the response arrived
    Stale { table_id: TableId },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveOutcome {
    pub saved_tables: Vec<TableId>,
    pub deleted_tables: Vec<TableId>,
    pub saved_relations: Vec<RelationId>,
    pub deleted_relations: Vec<RelationId>,
    pub layout_saved: bool,
    pub warnings: Vec<CodecError>,
}

/// Route-change hook owned by the host application
pub trait NavigationGuard {
    fn proceed(&mut self);
    fn cancel(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationDecision {
    Proceed,
    ConfirmationRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationChoice {
    SaveAndNavigate,
    DiscardAndNavigate,
    Cancel,
}

#[derive(Debug)]
pub struct SessionEngine {
    backends: Backends,
    state: SessionState,
    project_id: Option<String>,
    table_list: Vec<TableSummary>,
    model: EntityModel,
    positions: PositionStore,
    history: History,
    /// Positions from the saved layout, applied when a table is first placed
    layout_hints: PositionMap,
    /// Relation endpoints fetched for validation but not loaded into the model
    resolved: Vec<Table>,
    selection: Option<TableId>,
    active: Option<TableId>,
}

impl SessionEngine {
    pub fn new(config: &SessionConfig, backends: Backends) -> Self {
        let model = EntityModel::new(config.model_rules());
        let positions = PositionStore::new(
            config.viewport,
            config.placement_jitter,
            config.placement_seed,
        );
        let history = History::new(Snapshot::capture(&model, &positions), config.history_limit);

        Self {
            backends,
            state: SessionState::Idle,
            project_id: None,
            table_list: Vec::new(),
            model,
            positions,
            history,
            layout_hints: PositionMap::new(),
            resolved: Vec::new(),
            selection: None,
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn table_list(&self) -> &[TableSummary] {
        &self.table_list
    }

    pub fn model(&self) -> &EntityModel {
        &self.model
    }

    pub fn positions(&self) -> &PositionStore {
        &self.positions
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn active_table_id(&self) -> Option<&TableId> {
        self.active.as_ref()
    }

    pub fn active_table(&self) -> Option<&Table> {
        self.active.as_ref().and_then(|id| self.model.table(id))
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Deep copy of the live state
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.model, &self.positions)
    }

    pub fn is_dirty(&self) -> bool {
        dirty::is_dirty(&self.snapshot(), self.history.baseline())
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Opens a project: fetches its table list, relations and saved layout.
    /// Replaces whatever the session held before.
    pub async fn load_table_list(
        &mut self,
        project_id: &str,
    ) -> Result<&[TableSummary], SessionError> {
        self.require(
            &[SessionState::Idle, SessionState::Ready, SessionState::Editing],
            "load tables",
        )?;
        let previous = self.state;
        self.state = SessionState::Loading;
        tracing::info!("Loading tables for project {}", project_id);

        let listed = self.backends.tables.list_tables(project_id).await;
        let summaries = match listed {
            Ok(summaries) => summaries,
            Err(e) => return Err(self.fail_load(previous, e)),
        };
        let listed = self.backends.relations.list_relations(project_id).await;
        let relations = match listed {
            Ok(relations) => relations,
            Err(e) => return Err(self.fail_load(previous, e)),
        };
        let fetched = self.backends.layout.get_layout(project_id).await;
        let layout = match fetched {
            Ok(layout) => layout,
            Err(e) => {
                tracing::warn!("No saved layout for project {}: {}", project_id, e);
                Vec::new()
            }
        };

        self.model.replace_contents(Vec::new(), relations);
        self.positions.replace_all(PositionMap::new());
        self.layout_hints = positions_from_layout(&layout);
        self.resolved.clear();
        self.selection = None;
        self.active = None;
        self.table_list = summaries;
        self.project_id = Some(project_id.to_string());
        let baseline = self.snapshot();
        self.history.reset(baseline);
        self.state = SessionState::Ready;

        tracing::info!(
            "Project {} loaded: {} table(s), {} relation(s)",
            project_id,
            self.table_list.len(),
            self.model.relations().len()
        );
        Ok(&self.table_list)
    }

    fn fail_load(&mut self, previous: SessionState, error: PersistenceError) -> SessionError {
        tracing::error!("Failed to load project: {}", error);
        self.state = previous;
        error.into()
    }

    /// Marks `table_id` as the table being selected and returns the ticket its
    /// fetched detail must be handed back with.
    pub fn begin_select(
        &mut self,
        table_id: impl Into<TableId>,
    ) -> Result<SelectTicket, SessionError> {
        self.require(&[SessionState::Ready, SessionState::Editing], "select a table")?;
        let table_id = table_id.into();
        tracing::debug!("Selecting table {}", table_id);
        self.selection = Some(table_id.clone());
        Ok(SelectTicket { table_id })
    }

    /// Applies a fetched table unless another selection superseded it.
    ///
    /// A new table is added to the model and placed on the canvas. Loading is
    /// not an edit: nothing is committed and the session does not turn dirty.
    /// A table the session already holds keeps its local copy, unsaved edits
    /// included, and one deleted during the session stays deleted.
    pub fn finish_select(
        &mut self,
        ticket: SelectTicket,
        response: Result<TableDetailRaw, PersistenceError>,
    ) -> Result<SelectOutcome, SessionError> {
        let SelectTicket { table_id } = ticket;
        if self.selection.as_ref() != Some(&table_id) {
            tracing::warn!("Discarding stale response for table {}", table_id);
            return Ok(SelectOutcome::Stale { table_id });
        }

        let raw = match response {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("Failed to load table {}: {}", table_id, e);
                self.selection = self.active.clone();
                return Err(e.into());
            }
        };
        if raw.id != table_id {
            tracing::warn!(
                "Discarding response for table {} while {} is selected",
                raw.id,
                table_id
            );
            return Ok(SelectOutcome::Stale { table_id });
        }

        if self.model.contains_table(&table_id) {
            tracing::debug!("Table {} already loaded, keeping the local copy", table_id);
            return self.activate_local(table_id);
        }
        if self.history.knows_table(&table_id) {
            tracing::warn!("Table {} was deleted in this session", table_id);
            self.selection = self.active.clone();
            return Err(ModelError::not_found(EntityKind::Table, &table_id).into());
        }

        let DecodedTable { table, warnings } = raw.decode();
        for warning in &warnings {
            tracing::warn!("Table {} loaded with a damaged blob: {}", table_id, warning);
        }
        self.apply_loaded(table);
        self.active = Some(table_id.clone());
        self.refresh_state();

        tracing::info!("Table {} is now active", table_id);
        Ok(SelectOutcome::Applied { table_id, warnings })
    }

    /// Fetches and activates a table. Drafts and tables that are already
    /// loaded are activated without a fetch.
    pub async fn select_table(
        &mut self,
        table_id: impl Into<TableId>,
    ) -> Result<SelectOutcome, SessionError> {
        let table_id = table_id.into();
        if table_id.is_draft() || self.model.contains_table(&table_id) {
            return self.activate_local(table_id);
        }
        let ticket = self.begin_select(table_id)?;
        let response = self.backends.tables.get_table(ticket.table_id()).await;
        self.finish_select(ticket, response)
    }

    fn activate_local(&mut self, table_id: TableId) -> Result<SelectOutcome, SessionError> {
        self.require(&[SessionState::Ready, SessionState::Editing], "select a table")?;
        if !self.model.contains_table(&table_id) {
            return Err(ModelError::not_found(EntityKind::Table, &table_id).into());
        }
        self.selection = Some(table_id.clone());
        self.active = Some(table_id.clone());
        Ok(SelectOutcome::Applied {
            table_id,
            warnings: Vec::new(),
        })
    }

    fn apply_loaded(&mut self, table: Table) {
        let id = table.id.clone();
        self.resolved.retain(|t| t.id != id);
        let hint = self.layout_hints.get(&id).copied();
        self.model.upsert_loaded(table.clone());
        let position = self.positions.ensure(&self.model, &id, hint);
        self.history.absorb_loaded(&table, position);
    }

    /// Makes the tables a relation points at available for validation,
    /// fetching the ones that are not loaded.
    pub async fn resolve_relation_tables(
        &mut self,
        relation: &Relation,
    ) -> Result<(), SessionError> {
        for id in [&relation.source_table_id, &relation.target_table_id] {
            if id.is_draft()
                || self.model.contains_table(id)
                || self.resolved.iter().any(|t| &t.id == id)
            {
                continue;
            }
            let raw = self.backends.tables.get_table(id).await?;
            let DecodedTable { table, warnings } = raw.decode();
            for warning in &warnings {
                tracing::warn!("Related table {} has a damaged blob: {}", id, warning);
            }
            self.resolved.push(table);
        }
        Ok(())
    }

    /// Resolves the relation's tables, then adds it as a regular edit
    pub async fn add_relation(
        &mut self,
        relation: Relation,
    ) -> Result<MutationOutcome, SessionError> {
        self.require(&[SessionState::Ready, SessionState::Editing], "edit")?;
        self.resolve_relation_tables(&relation).await?;
        self.mutate(Operation::AddRelation(relation))
    }

    // ------------------------------------------------------------------
    // Editing
    // ------------------------------------------------------------------

    /// Applies an edit and records it in history
    pub fn mutate(&mut self, operation: Operation) -> Result<MutationOutcome, SessionError> {
        self.require(&[SessionState::Ready, SessionState::Editing], "edit")?;

        let mut outcome = match self.apply(operation) {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return Ok(MutationOutcome::default()),
            Err(e) => {
                tracing::debug!("Edit rejected: {}", e);
                return Err(e.into());
            }
        };

        let snapshot = self.snapshot();
        outcome.committed = self.history.commit(snapshot);
        self.refresh_state();
        Ok(outcome)
    }

    /// `Ok(None)` means the operation was a no-op and nothing is committed
    fn apply(&mut self, operation: Operation) -> Result<Option<MutationOutcome>, ModelError> {
        let mut outcome = MutationOutcome::default();
        match operation {
            Operation::AddTable(table) => {
                self.check_listed_code(&table.id, &table.code)?;
                let id = table.id.clone();
                self.model.add_table(table)?;
                let hint = self.layout_hints.get(&id).copied();
                self.positions.ensure(&self.model, &id, hint);
                self.selection = Some(id.clone());
                self.active = Some(id);
            }
            Operation::UpdateTable { table_id, changes } => {
                if let Some(code) = &changes.code {
                    self.check_listed_code(&table_id, code)?;
                }
                self.model.update_table(&table_id, changes)?;
            }
            Operation::DeleteTable(table_id) => {
                outcome.removed_relation_ids = self.model.delete_table(&table_id)?;
                self.positions.remove(&table_id);
                if self.active.as_ref() == Some(&table_id) {
                    self.active = None;
                    self.selection = None;
                }
            }
            Operation::AddField { table_id, field } => {
                self.model.add_field(&table_id, field)?;
            }
            Operation::UpdateField {
                table_id,
                field_id,
                field,
            } => {
                self.model.update_field(&table_id, &field_id, field)?;
            }
            Operation::DeleteField { table_id, field_id } => {
                self.model.delete_field(&table_id, &field_id)?;
            }
            Operation::MoveField { table_id, from, to } => {
                self.model.move_field(&table_id, from, to)?;
            }
            Operation::SetPrimaryKey {
                table_id,
                field_id,
                primary_key,
            } => {
                self.model.set_primary_key(&table_id, &field_id, primary_key)?;
            }
            Operation::AddIndex { table_id, index } => {
                self.model.add_index(&table_id, index)?;
            }
            Operation::UpdateIndex {
                table_id,
                index_id,
                index,
            } => {
                self.model.update_index(&table_id, &index_id, index)?;
            }
            Operation::DeleteIndex { table_id, index_id } => {
                self.model.delete_index(&table_id, &index_id)?;
            }
            Operation::AddRelation(relation) => {
                self.model.add_relation(relation, &self.resolved)?;
            }
            Operation::UpdateRelation(relation) => {
                self.model.update_relation(relation, &self.resolved)?;
            }
            Operation::DeleteRelation(relation_id) => {
                self.model.delete_relation(&relation_id)?;
            }
            Operation::MoveTable { table_id, position } => {
                if !self
                    .positions
                    .set(&self.model, &table_id, position.x, position.y)
                {
                    return Ok(None);
                }
            }
        }
        Ok(Some(outcome))
    }

    /// Table codes must also stay unique against listed tables not yet loaded
    fn check_listed_code(&self, table_id: &TableId, code: &str) -> Result<(), ModelError> {
        let taken = self.table_list.iter().any(|summary| {
            &summary.id != table_id
                && !self.model.contains_table(&summary.id)
                && summary.code.eq_ignore_ascii_case(code)
        });
        if taken {
            return Err(ModelError::DuplicateName {
                kind: EntityKind::Table,
                name: code.to_string(),
            });
        }
        Ok(())
    }

    /// Steps back one edit. Returns `false` when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, SessionError> {
        self.require(&[SessionState::Ready, SessionState::Editing], "undo")?;
        let Some(snapshot) = self.history.undo() else {
            return Ok(false);
        };
        self.restore(&snapshot);
        Ok(true)
    }

    /// Re-applies an undone edit. Returns `false` when there is nothing to redo.
    pub fn redo(&mut self) -> Result<bool, SessionError> {
        self.require(&[SessionState::Ready, SessionState::Editing], "redo")?;
        let Some(snapshot) = self.history.redo() else {
            return Ok(false);
        };
        self.restore(&snapshot);
        Ok(true)
    }

    fn restore(&mut self, snapshot: &Snapshot) {
        let (tables, relations, positions) = snapshot.to_parts();
        let model = &mut self.model;
        let store = &mut self.positions;
        self.history.restoring(|_| {
            model.replace_contents(tables, relations);
            store.replace_all(positions);
        });

        if let Some(active) = &self.active
            && !self.model.contains_table(active)
        {
            self.active = None;
        }
        if let Some(selection) = &self.selection
            && selection.is_draft()
            && !self.model.contains_table(selection)
        {
            self.selection = None;
        }
        self.refresh_state();
    }

    /// Throws away every unsaved edit, going back to the baseline
    pub fn discard_changes(&mut self) {
        let baseline = self.history.baseline().clone();
        self.restore(&baseline);
        self.history.reset(baseline);
        tracing::info!("Discarded unsaved changes");
    }

    // ------------------------------------------------------------------
    // Saving
    // ------------------------------------------------------------------

    /// Persists every change since the baseline, then makes the saved state
    /// the new baseline and the only history entry.
    ///
    /// On failure the edits stay in memory, the session stays dirty and the
    /// error is returned. Nothing is retried.
    pub async fn save(&mut self) -> Result<SaveOutcome, SessionError> {
        self.require(&[SessionState::Ready, SessionState::Editing], "save")?;
        self.state = SessionState::Saving;

        match self.persist().await {
            Ok(outcome) => {
                let saved = self.snapshot();
                self.history.reset(saved);
                self.state = SessionState::Ready;
                tracing::info!(
                    "Saved {} table(s), deleted {}, {} relation change(s)",
                    outcome.saved_tables.len(),
                    outcome.deleted_tables.len(),
                    outcome.saved_relations.len() + outcome.deleted_relations.len()
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!("Save failed: {}", e);
                self.state = SessionState::Editing;
                self.refresh_state();
                Err(e)
            }
        }
    }

    async fn persist(&mut self) -> Result<SaveOutcome, SessionError> {
        let current = self.snapshot();
        let baseline = self.history.baseline().clone();
        let relation_diff = dirty::diff_relations(current.relations(), baseline.relations());
        let mut outcome = SaveOutcome::default();

        for relation_id in &relation_diff.deleted {
            ignore_missing(self.backends.relations.delete_relation(relation_id).await)?;
            outcome.deleted_relations.push(relation_id.clone());
        }

        for table_id in dirty::removed_tables(&current, &baseline) {
            if !table_id.is_draft() {
                ignore_missing(self.backends.tables.delete_table(&table_id).await)?;
            }
            self.table_list.retain(|s| s.id != table_id);
            outcome.deleted_tables.push(table_id);
        }

        for table_id in dirty::changed_tables(&current, &baseline) {
            let Some(table) = self.model.table(&table_id) else {
                continue;
            };
            let payload = TablePayload::from_table(table)?;
            let raw = if table_id.is_draft() {
                self.backends.tables.create_table(&payload).await?
            } else {
                self.backends.tables.update_table(&table_id, &payload).await?
            };

            let summary = raw.summary();
            let DecodedTable { table, warnings } = raw.decode();
            if table.id != table_id {
                self.rekey_table(&table_id, &table.id);
            }
            outcome.saved_tables.push(table.id.clone());
            outcome.warnings.extend(warnings);
            self.model.upsert_loaded(table);
            self.upsert_summary(summary);
        }

        for relation in relation_diff.created.iter().chain(&relation_diff.updated) {
            let payload = RelationPayload::from(relation);
            let saved = if relation.id.is_draft() {
                self.backends.relations.create_relation(&payload).await?
            } else {
                self.backends
                    .relations
                    .update_relation(&relation.id, &payload)
                    .await?
            };
            if saved.id != relation.id {
                self.model.rekey_relation(&relation.id, &saved.id);
            }
            outcome.saved_relations.push(saved.id);
        }

        if self.positions.all() != baseline.positions() {
            self.push_layout("save").await?;
            outcome.layout_saved = true;
        }

        Ok(outcome)
    }

    /// Pushes the current canvas positions as the project's saved layout.
    /// Table content is not saved.
    pub async fn save_layout(&mut self) -> Result<(), SessionError> {
        self.require(
            &[SessionState::Ready, SessionState::Editing],
            "save the layout",
        )?;
        self.push_layout("save the layout").await?;
        self.history.record_saved_positions(self.positions.all());
        self.refresh_state();
        Ok(())
    }

    async fn push_layout(&mut self, operation: &'static str) -> Result<(), SessionError> {
        let project_id = self.require_project(operation)?;
        let layout = layout_from_positions(self.positions.all());
        self.backends
            .layout
            .save_layout(&project_id, &layout)
            .await?;
        self.layout_hints.extend(positions_from_layout(&layout));
        tracing::debug!("Saved layout with {} node(s)", layout.len());
        Ok(())
    }

    /// Pushes the active table to the live database, saving first if needed.
    ///
    /// Marking the table synced is not an edit and leaves the session clean.
    pub async fn sync_active(&mut self) -> Result<(), SessionError> {
        self.require(&[SessionState::Ready, SessionState::Editing], "sync")?;
        if self.active.is_none() {
            return Err(SessionError::NoActiveTable);
        }
        if self.is_dirty() {
            self.save().await?;
        }

        let table_id = self.active.clone().ok_or(SessionError::NoActiveTable)?;
        if let Err(e) = self.backends.tables.sync_table(&table_id).await {
            tracing::error!("Failed to sync table {}: {}", table_id, e);
            return Err(e.into());
        }

        self.model.table_mut(&table_id)?.synced = true;
        self.history.mark_synced(&table_id);
        if let Some(summary) = self.table_list.iter_mut().find(|s| s.id == table_id) {
            summary.synced = true;
        }
        tracing::info!("Table {} synced to the database", table_id);
        Ok(())
    }

    fn rekey_table(&mut self, old: &TableId, new: &TableId) {
        tracing::debug!("Table {} persisted as {}", old, new);
        self.model.rekey_table(old, new);
        self.positions.rekey(old, new);
        self.history.rekey_table(old, new);
        for id in [&mut self.active, &mut self.selection].into_iter().flatten() {
            if id == old {
                *id = new.clone();
            }
        }
    }

    fn upsert_summary(&mut self, summary: TableSummary) {
        match self.table_list.iter_mut().find(|s| s.id == summary.id) {
            Some(existing) => *existing = summary,
            None => self.table_list.push(summary),
        }
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// Decides whether the user may leave. With unsaved changes the session
    /// moves to `ConfirmingNavigation` until [`Self::resolve_navigation`].
    pub fn navigate_away_guard(&mut self) -> Result<NavigationDecision, SessionError> {
        match self.state {
            SessionState::Idle | SessionState::Loading => return Ok(NavigationDecision::Proceed),
            SessionState::ConfirmingNavigation => {
                return Ok(NavigationDecision::ConfirmationRequired);
            }
            SessionState::Saving => {
                return Err(SessionError::InvalidState {
                    operation: "navigate away",
                    state: self.state.name(),
                });
            }
            SessionState::Ready | SessionState::Editing => {}
        }

        if self.is_dirty() {
            tracing::info!("Unsaved changes, asking before navigating away");
            self.state = SessionState::ConfirmingNavigation;
            Ok(NavigationDecision::ConfirmationRequired)
        } else {
            Ok(NavigationDecision::Proceed)
        }
    }

    /// Lets a clean session navigate right away; a dirty one waits for a choice
    pub fn attempt_navigate<G>(&mut self, guard: &mut G) -> Result<NavigationDecision, SessionError>
    where
        G: NavigationGuard + ?Sized,
    {
        let decision = self.navigate_away_guard()?;
        if decision == NavigationDecision::Proceed {
            guard.proceed();
        }
        Ok(decision)
    }

    pub async fn resolve_navigation<G>(
        &mut self,
        choice: NavigationChoice,
        guard: &mut G,
    ) -> Result<(), SessionError>
    where
        G: NavigationGuard + ?Sized,
    {
        self.require(&[SessionState::ConfirmingNavigation], "resolve navigation")?;
        match choice {
            NavigationChoice::SaveAndNavigate => {
                self.state = SessionState::Editing;
                if let Err(e) = self.save().await {
                    guard.cancel();
                    return Err(e);
                }
                guard.proceed();
            }
            NavigationChoice::DiscardAndNavigate => {
                self.state = SessionState::Editing;
                self.discard_changes();
                guard.proceed();
            }
            NavigationChoice::Cancel => {
                self.state = SessionState::Editing;
                self.refresh_state();
                guard.cancel();
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn require(&self, allowed: &[SessionState], operation: &'static str) -> Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    fn require_project(&self, operation: &'static str) -> Result<String, SessionError> {
        self.project_id.clone().ok_or(SessionError::InvalidState {
            operation,
            state: self.state.name(),
        })
    }

    /// Ready <-> Editing follows the dirty flag
    fn refresh_state(&mut self) {
        if matches!(self.state, SessionState::Ready | SessionState::Editing) {
            self.state = if self.is_dirty() {
                SessionState::Editing
            } else {
                SessionState::Ready
            };
        }
    }
}

/// A delete that finds nothing already has the desired effect
fn ignore_missing(result: Result<(), PersistenceError>) -> Result<(), PersistenceError> {
    match result {
        Err(PersistenceError::NotFound { kind, id }) => {
            tracing::debug!("{} {} already gone on the server", kind, id);
            Ok(())
        }
        other => other,
    }
}
