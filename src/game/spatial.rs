//! Spatial hash grid broad-phase
//!
//! Divides the arena into square cells and files every entity's bounding box
//! under each cell it overlaps. The grid is a cache derived from position and
//! physics groups; the scheduler refreshes it once per tick after physics.
//! Queries return candidates only, callers still run exact tests.

use hashbrown::HashMap;

use crate::game::entity::EntityId;
use crate::util::aabb::Aabb;
use crate::util::vec2::Vec2;

/// Default cell size in world units
pub const DEFAULT_CELL_SIZE: f32 = 256.0;

/// Initial capacity for the cell map (number of expected non-empty cells)
const GRID_INITIAL_CAPACITY: usize = 256;

/// Initial capacity for entity vectors within cells
const CELL_INITIAL_CAPACITY: usize = 8;

/// Grid cell key - (x, y) cell coordinates
pub type CellKey = (i32, i32);

/// Spatial hash grid keyed by generational entity ids
pub struct SpatialGrid {
    cell_size: f32,
    /// Inverse cell size for fast position-to-cell conversion
    inv_cell_size: f32,
    /// Entities overlapping each cell
    cells: HashMap<CellKey, Vec<EntityId>>,
    /// Current box of every indexed entity
    boxes: HashMap<EntityId, Aabb>,
}

impl SpatialGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            cells: HashMap::with_capacity(GRID_INITIAL_CAPACITY),
            boxes: HashMap::with_capacity(GRID_INITIAL_CAPACITY),
        }
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Clear all entries. The maps keep their capacity, the cells go.
    pub fn clear(&mut self) {
        self.cells.clear();
        self.boxes.clear();
    }

    #[inline]
    fn position_to_cell(&self, position: Vec2) -> CellKey {
        (
            (position.x * self.inv_cell_size).floor() as i32,
            (position.y * self.inv_cell_size).floor() as i32,
        )
    }

    /// Inclusive cell range covered by a box
    #[inline]
    fn cell_range(&self, bounds: &Aabb) -> (CellKey, CellKey) {
        (self.position_to_cell(bounds.min), self.position_to_cell(bounds.max))
    }

    /// Store or replace an entity's box
    pub fn update(&mut self, entity: EntityId, bounds: Aabb) {
        if let Some(previous) = self.boxes.get(&entity).copied() {
            if previous == bounds {
                return;
            }
            self.unlink(entity, &previous);
        }

        let ((x0, y0), (x1, y1)) = self.cell_range(&bounds);
        for cx in x0..=x1 {
            for cy in y0..=y1 {
                self.cells
                    .entry((cx, cy))
                    .or_insert_with(|| Vec::with_capacity(CELL_INITIAL_CAPACITY))
                    .push(entity);
            }
        }
        self.boxes.insert(entity, bounds);
    }

    /// Drop an entity from the grid. Returns true if it was indexed.
    pub fn remove(&mut self, entity: EntityId) -> bool {
        match self.boxes.remove(&entity) {
            Some(previous) => {
                self.unlink(entity, &previous);
                true
            }
            None => false,
        }
    }

    fn unlink(&mut self, entity: EntityId, bounds: &Aabb) {
        let ((x0, y0), (x1, y1)) = self.cell_range(bounds);
        for cx in x0..=x1 {
            for cy in y0..=y1 {
                let Some(cell) = self.cells.get_mut(&(cx, cy)) else {
                    continue;
                };
                if let Some(idx) = cell.iter().position(|&id| id == entity) {
                    cell.swap_remove(idx);
                }
                // Only occupied cells stay in the map
                if cell.is_empty() {
                    self.cells.remove(&(cx, cy));
                }
            }
        }
    }

    /// Stored box for an entity
    #[inline]
    pub fn bounds_of(&self, entity: EntityId) -> Option<Aabb> {
        self.boxes.get(&entity).copied()
    }

    #[inline]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.boxes.contains_key(&entity)
    }

    /// Entities whose box intersects the rectangle centered on (x, y)
    /// extending `half_width` / `half_height` each way
    ///
    /// Results are deduplicated and sorted by ascending id.
    pub fn retrieve(&self, x: f32, y: f32, half_width: f32, half_height: f32) -> Vec<EntityId> {
        let query = Aabb::from_center(Vec2::new(x, y), half_width, half_height);
        self.retrieve_box(&query)
    }

    /// Entities whose box intersects `query`, sorted by ascending id
    pub fn retrieve_box(&self, query: &Aabb) -> Vec<EntityId> {
        let ((x0, y0), (x1, y1)) = self.cell_range(query);
        let mut found = Vec::new();
        for cx in x0..=x1 {
            for cy in y0..=y1 {
                let Some(cell) = self.cells.get(&(cx, cy)) else {
                    continue;
                };
                for &entity in cell {
                    let hit = self
                        .boxes
                        .get(&entity)
                        .is_some_and(|bounds| bounds.intersects(query));
                    if hit {
                        found.push(entity);
                    }
                }
            }
        }
        found.sort_unstable();
        found.dedup();
        found
    }

    /// Every pair of entities sharing a cell with overlapping boxes
    ///
    /// Pairs are (lower id, higher id), deduplicated and sorted, so the
    /// order is independent of hash iteration.
    pub fn potential_collisions(&self) -> Vec<(EntityId, EntityId)> {
        let mut pairs = Vec::new();
        for entities in self.cells.values() {
            for i in 0..entities.len() {
                for j in (i + 1)..entities.len() {
                    let (a, b) = if entities[i] < entities[j] {
                        (entities[i], entities[j])
                    } else {
                        (entities[j], entities[i])
                    };
                    let overlap = match (self.boxes.get(&a), self.boxes.get(&b)) {
                        (Some(box_a), Some(box_b)) => box_a.intersects(box_b),
                        _ => false,
                    };
                    if overlap {
                        pairs.push((a, b));
                    }
                }
            }
        }
        pairs.sort_unstable();
        pairs.dedup();
        pairs
    }

    /// Get statistics about the grid
    pub fn stats(&self) -> SpatialGridStats {
        let non_empty_cells = self.cells.values().filter(|c| !c.is_empty()).count();
        let max_per_cell = self.cells.values().map(|c| c.len()).max().unwrap_or(0);

        SpatialGridStats {
            cells: self.cells.len(),
            non_empty_cells,
            total_entities: self.boxes.len(),
            max_per_cell,
        }
    }
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

/// Statistics about the spatial grid
#[derive(Debug, Clone)]
pub struct SpatialGridStats {
    /// Cells held by the map, empty or not
    pub cells: usize,
    pub non_empty_cells: usize,
    pub total_entities: usize,
    pub max_per_cell: usize,
}
