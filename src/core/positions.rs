//! Canvas coordinates per table, kept apart from entity content
//!
//! A table can exist without a position; one is assigned on first placement
//! around the viewport center with seeded jitter, so layouts are reproducible
//! in tests.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::model::EntityModel;
use crate::core::schema::{Position, TableId};

/// Attempts at finding a free jittered spot before falling back to stepping
const PLACEMENT_ATTEMPTS: usize = 8;

/// Offset applied when every jittered attempt landed on an occupied spot
const PLACEMENT_STEP: f64 = 24.0;

/// Visible area of the canvas
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
        }
    }

    /// Both extents finite and positive
    pub fn is_usable(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn center(&self) -> Position {
        Position::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1200.0, 800.0)
    }
}

pub type PositionMap = BTreeMap<TableId, Position>;

#[derive(Debug, Clone)]
pub struct PositionStore {
    positions: PositionMap,
    viewport: Viewport,
    jitter: f64,
    rng: StdRng,
}

impl PositionStore {
    pub fn new(viewport: Viewport, jitter: f64, seed: u64) -> Self {
        let jitter = if jitter.is_finite() { jitter.max(0.0) } else { 0.0 };
        Self {
            positions: PositionMap::new(),
            viewport: usable_or_default(viewport),
            jitter,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn get(&self, table_id: &TableId) -> Option<Position> {
        self.positions.get(table_id).copied()
    }

    pub fn all(&self) -> &PositionMap {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Moves a table. A table unknown to the model is ignored, since canvas
    /// events can arrive after the table was deleted. Returns whether the
    /// position was stored.
    pub fn set(&mut self, model: &EntityModel, table_id: &TableId, x: f64, y: f64) -> bool {
        if !model.contains_table(table_id) {
            tracing::warn!("Ignoring position for unknown table {}", table_id);
            return false;
        }
        if !x.is_finite() || !y.is_finite() {
            tracing::warn!("Ignoring non-finite position ({}, {}) for {}", x, y, table_id);
            return false;
        }
        self.positions.insert(table_id.clone(), Position::new(x, y));
        true
    }

    pub fn remove(&mut self, table_id: &TableId) -> Option<Position> {
        self.positions.remove(table_id)
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = usable_or_default(viewport);
    }

    /// Returns the table's position, placing it first if it has none.
    ///
    /// `hint` (e.g. from a saved layout) wins over the default placement.
    pub fn ensure(
        &mut self,
        model: &EntityModel,
        table_id: &TableId,
        hint: Option<Position>,
    ) -> Option<Position> {
        if let Some(existing) = self.get(table_id) {
            return Some(existing);
        }
        if !model.contains_table(table_id) {
            tracing::warn!("Cannot place unknown table {}", table_id);
            return None;
        }
        let position = hint.unwrap_or_else(|| self.next_default_position());
        self.positions.insert(table_id.clone(), position);
        Some(position)
    }

    /// Replaces every position, e.g. when a snapshot is restored
    pub fn replace_all(&mut self, positions: PositionMap) {
        self.positions = positions;
    }

    pub fn rekey(&mut self, old: &TableId, new: &TableId) {
        if let Some(position) = self.positions.remove(old) {
            self.positions.insert(new.clone(), position);
        }
    }

    /// Drops positions whose table no longer exists in the model
    pub fn prune(&mut self, model: &EntityModel) -> usize {
        let before = self.positions.len();
        self.positions.retain(|id, _| model.contains_table(id));
        before - self.positions.len()
    }

    fn next_default_position(&mut self) -> Position {
        let center = self.viewport.center();
        let mut candidate = center;
        for _ in 0..PLACEMENT_ATTEMPTS {
            candidate = if self.jitter > 0.0 {
                Position::new(
                    center.x + self.rng.gen_range(-self.jitter..=self.jitter),
                    center.y + self.rng.gen_range(-self.jitter..=self.jitter),
                )
            } else {
                center
            };
            if !self.is_occupied(candidate) {
                return candidate;
            }
        }
        while self.is_occupied(candidate) {
            candidate = Position::new(candidate.x + PLACEMENT_STEP, candidate.y + PLACEMENT_STEP);
        }
        candidate
    }

    fn is_occupied(&self, position: Position) -> bool {
        self.positions.values().any(|p| *p == position)
    }
}

fn usable_or_default(viewport: Viewport) -> Viewport {
    if viewport.is_usable() {
        viewport
    } else {
        tracing::warn!("Ignoring unusable viewport {:?}", viewport);
        Viewport::default()
    }
}

impl Default for PositionStore {
    fn default() -> Self {
        Self::new(Viewport::default(), 120.0, 42)
    }
}
