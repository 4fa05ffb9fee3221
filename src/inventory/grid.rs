use std::sync::Arc;

use crate::entities::item::ItemDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridPosition {
    pub x: i32,
    pub y: i32,
}

impl GridPosition {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// One grid cell. Only an anchor cell carries the item handle and count;
/// the rest of a multi-cell footprint is marked `covered` and stays empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub item: Option<Arc<ItemDefinition>>,
    pub count: u32,
    pub position: GridPosition,
    pub covered: bool,
}

impl Slot {
    fn vacant(position: GridPosition) -> Self {
        Self {
            item: None,
            count: 0,
            position,
            covered: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.item.is_none() || self.count == 0
    }
}

/// Fixed-size 2D container. Items occupy a rectangle of cells anchored at
/// their top-left corner; all addressing is by anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct GridStore {
    width: i32,
    height: i32,
    slots: Vec<Slot>,
}

impl GridStore {
    pub fn new(width: u8, height: u8) -> Self {
        let width = i32::from(width);
        let height = i32::from(height);
        let mut slots = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                slots.push(Slot::vacant(GridPosition::new(x, y)));
            }
        }
        Self {
            width,
            height,
            slots,
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn in_bounds(&self, pos: GridPosition) -> bool {
        pos.x >= 0 && pos.x < self.width && pos.y >= 0 && pos.y < self.height
    }

    fn index(&self, pos: GridPosition) -> usize {
        (pos.y * self.width + pos.x) as usize
    }

    /// Slot contents verbatim; covered cells report as empty.
    pub fn slot_at(&self, pos: GridPosition) -> Option<&Slot> {
        if !self.in_bounds(pos) {
            return None;
        }
        Some(&self.slots[self.index(pos)])
    }

    fn area_blocked(&self, item: &ItemDefinition, pos: GridPosition) -> bool {
        for dy in 0..i32::from(item.footprint.height) {
            for dx in 0..i32::from(item.footprint.width) {
                let cell = GridPosition::new(pos.x + dx, pos.y + dy);
                let Some(slot) = self.slot_at(cell) else {
                    // out of bounds counts as blocked
                    return true;
                };
                if !slot.is_empty() || slot.covered {
                    return true;
                }
            }
        }
        false
    }

    pub fn can_place(&self, item: &ItemDefinition, pos: GridPosition) -> bool {
        !self.area_blocked(item, pos)
    }

    pub fn place(&mut self, item: &Arc<ItemDefinition>, count: u32, pos: GridPosition) -> bool {
        if count == 0 || count > item.stack_max {
            return false;
        }
        if !self.can_place(item, pos) {
            return false;
        }
        for dy in 0..i32::from(item.footprint.height) {
            for dx in 0..i32::from(item.footprint.width) {
                let cell = GridPosition::new(pos.x + dx, pos.y + dy);
                let index = self.index(cell);
                let slot = &mut self.slots[index];
                if dx == 0 && dy == 0 {
                    slot.item = Some(Arc::clone(item));
                    slot.count = count;
                    slot.covered = false;
                } else {
                    slot.item = None;
                    slot.count = 0;
                    slot.covered = true;
                }
            }
        }
        true
    }

    /// Removes the item anchored at `pos`, clearing its whole footprint.
    /// Returns a copy of the anchor slot as it was before removal. Covered
    /// cells and empty cells are not anchors and yield `None`.
    pub fn remove(&mut self, pos: GridPosition) -> Option<Slot> {
        let removed = match self.slot_at(pos) {
            Some(slot) if !slot.is_empty() => slot.clone(),
            _ => return None,
        };
        let item = removed.item.clone()?;
        for dy in 0..i32::from(item.footprint.height) {
            for dx in 0..i32::from(item.footprint.width) {
                let cell = GridPosition::new(pos.x + dx, pos.y + dy);
                if self.in_bounds(cell) {
                    let index = self.index(cell);
                    let slot = &mut self.slots[index];
                    slot.item = None;
                    slot.count = 0;
                    slot.covered = false;
                }
            }
        }
        Some(removed)
    }

    /// Anchor slots in row-major order, copied at call time.
    pub fn all_anchors(&self) -> Vec<Slot> {
        self.slots
            .iter()
            .filter(|slot| !slot.is_empty())
            .cloned()
            .collect()
    }

    /// First anchor position where the item would fit, scanning row-major.
    pub fn first_fit(&self, item: &ItemDefinition) -> Option<GridPosition> {
        for y in 0..self.height {
            for x in 0..self.width {
                let pos = GridPosition::new(x, y);
                if self.can_place(item, pos) {
                    return Some(pos);
                }
            }
        }
        None
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.item = None;
            slot.count = 0;
            slot.covered = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::item::ItemDefId;

    fn orb() -> Arc<ItemDefinition> {
        Arc::new(ItemDefinition::new(1, "Chaos Orb", 1, 1, 20))
    }

    fn sword() -> Arc<ItemDefinition> {
        Arc::new(ItemDefinition::new(6, "Starforge", 2, 4, 1))
    }

    #[test]
    fn place_single_cell_item() {
        let mut grid = GridStore::new(12, 5);
        assert!(grid.place(&orb(), 5, GridPosition::new(3, 2)));

        let slot = grid.slot_at(GridPosition::new(3, 2)).expect("slot");
        assert!(!slot.is_empty());
        assert_eq!(slot.count, 5);
        assert_eq!(
            slot.item.as_ref().map(|item| item.id),
            Some(ItemDefId(1))
        );
    }

    #[test]
    fn place_rejects_zero_count_and_over_limit() {
        let mut grid = GridStore::new(12, 5);
        assert!(!grid.place(&orb(), 0, GridPosition::new(0, 0)));
        assert!(!grid.place(&orb(), 21, GridPosition::new(0, 0)));
        assert!(grid.slot_at(GridPosition::new(0, 0)).expect("slot").is_empty());
    }

    #[test]
    fn footprint_covers_cells_and_anchor_holds_item() {
        let mut grid = GridStore::new(12, 12);
        assert!(grid.place(&sword(), 1, GridPosition::new(4, 1)));

        let anchor = grid.slot_at(GridPosition::new(4, 1)).expect("anchor");
        assert!(!anchor.is_empty());
        assert!(!anchor.covered);

        for (x, y) in [(5, 1), (4, 2), (5, 2), (4, 3), (5, 3), (4, 4), (5, 4)] {
            let slot = grid.slot_at(GridPosition::new(x, y)).expect("covered slot");
            assert!(slot.covered, "({x},{y}) should be covered");
            assert!(slot.is_empty(), "({x},{y}) should report empty");
        }
    }

    #[test]
    fn covered_cell_is_not_an_anchor() {
        let mut grid = GridStore::new(12, 12);
        assert!(grid.place(&sword(), 1, GridPosition::new(4, 1)));

        // remove addressed at a covered cell must not touch the item
        assert!(grid.remove(GridPosition::new(5, 2)).is_none());
        assert!(!grid.slot_at(GridPosition::new(4, 1)).expect("anchor").is_empty());
    }

    #[test]
    fn can_place_rejects_out_of_bounds_box() {
        let grid = GridStore::new(12, 5);
        // 2x4 anchored on the bottom row extends past the edge
        assert!(!grid.can_place(&sword(), GridPosition::new(0, 4)));
        assert!(!grid.can_place(&sword(), GridPosition::new(11, 0)));
        assert!(!grid.can_place(&orb(), GridPosition::new(-1, 0)));
        assert!(!grid.can_place(&orb(), GridPosition::new(12, 0)));
    }

    #[test]
    fn can_place_rejects_overlap_with_covered_cells() {
        let mut grid = GridStore::new(12, 12);
        assert!(grid.place(&sword(), 1, GridPosition::new(0, 0)));
        // (1,1) is covered by the sword
        assert!(!grid.can_place(&orb(), GridPosition::new(1, 1)));
        assert!(grid.can_place(&orb(), GridPosition::new(2, 0)));
    }

    #[test]
    fn remove_clears_whole_footprint() {
        let mut grid = GridStore::new(12, 12);
        assert!(grid.place(&sword(), 1, GridPosition::new(4, 1)));

        let removed = grid.remove(GridPosition::new(4, 1)).expect("removed");
        assert_eq!(removed.count, 1);
        assert_eq!(removed.position, GridPosition::new(4, 1));

        for y in 0..12 {
            for x in 0..12 {
                let slot = grid.slot_at(GridPosition::new(x, y)).expect("slot");
                assert!(slot.is_empty());
                assert!(!slot.covered);
            }
        }
        // the vacated area accepts a new placement
        assert!(grid.can_place(&sword(), GridPosition::new(4, 1)));
    }

    #[test]
    fn remove_from_empty_or_invalid_position() {
        let mut grid = GridStore::new(12, 5);
        assert!(grid.remove(GridPosition::new(0, 0)).is_none());
        assert!(grid.remove(GridPosition::new(40, 40)).is_none());
    }

    #[test]
    fn all_anchors_scans_row_major() {
        let mut grid = GridStore::new(12, 5);
        assert!(grid.place(&orb(), 3, GridPosition::new(7, 0)));
        assert!(grid.place(&orb(), 9, GridPosition::new(1, 2)));
        assert!(grid.place(&orb(), 1, GridPosition::new(0, 4)));

        let anchors = grid.all_anchors();
        let positions: Vec<GridPosition> = anchors.iter().map(|slot| slot.position).collect();
        assert_eq!(
            positions,
            vec![
                GridPosition::new(7, 0),
                GridPosition::new(1, 2),
                GridPosition::new(0, 4)
            ]
        );
    }

    #[test]
    fn first_fit_skips_blocked_cells() {
        let mut grid = GridStore::new(12, 5);
        assert!(grid.place(&orb(), 1, GridPosition::new(0, 0)));
        assert_eq!(grid.first_fit(&orb()), Some(GridPosition::new(1, 0)));

        let wide = Arc::new(ItemDefinition::new(10, "Volls Protector", 2, 3, 1));
        assert_eq!(grid.first_fit(&wide), Some(GridPosition::new(1, 0)));
    }

    #[test]
    fn clear_resets_every_cell() {
        let mut grid = GridStore::new(12, 12);
        assert!(grid.place(&sword(), 1, GridPosition::new(0, 0)));
        assert!(grid.place(&orb(), 7, GridPosition::new(5, 5)));

        grid.clear();
        assert!(grid.all_anchors().is_empty());
        assert!(grid.can_place(&sword(), GridPosition::new(0, 0)));
    }
}
