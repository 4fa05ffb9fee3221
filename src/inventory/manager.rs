use std::collections::BTreeMap;
use std::sync::Arc;

use crate::entities::catalog::ItemCatalog;
use crate::entities::item::{ItemDefId, ItemDefinition};
use crate::inventory::grid::{GridPosition, GridStore, Slot};

pub const PERSONAL_WIDTH: u8 = 12;
pub const PERSONAL_HEIGHT: u8 = 5;
pub const STASH_WIDTH: u8 = 12;
pub const STASH_HEIGHT: u8 = 12;
pub const SHARED_STASH_COUNT: u8 = 3;

/// Outcome of a move or split. The discriminant order is the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Success,
    InvalidSource,
    InvalidDestination,
    ItemNotFound,
    NoSpace,
    InvalidStackSize,
    ConcurrentModification,
}

impl OperationResult {
    pub fn code(self) -> u8 {
        match self {
            OperationResult::Success => 0,
            OperationResult::InvalidSource => 1,
            OperationResult::InvalidDestination => 2,
            OperationResult::ItemNotFound => 3,
            OperationResult::NoSpace => 4,
            OperationResult::InvalidStackSize => 5,
            OperationResult::ConcurrentModification => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(OperationResult::Success),
            1 => Some(OperationResult::InvalidSource),
            2 => Some(OperationResult::InvalidDestination),
            3 => Some(OperationResult::ItemNotFound),
            4 => Some(OperationResult::NoSpace),
            5 => Some(OperationResult::InvalidStackSize),
            6 => Some(OperationResult::ConcurrentModification),
            _ => None,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            OperationResult::Success => "success",
            OperationResult::InvalidSource => "invalid source container",
            OperationResult::InvalidDestination => "invalid destination container",
            OperationResult::ItemNotFound => "item not found",
            OperationResult::NoSpace => "no space",
            OperationResult::InvalidStackSize => "invalid stack size",
            OperationResult::ConcurrentModification => "concurrent modification",
        }
    }
}

/// Wire container codes: 0 is the requester's personal grid, 1..=3 are the
/// shared stashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRef {
    Personal,
    Stash(u8),
}

impl ContainerRef {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ContainerRef::Personal),
            1..=SHARED_STASH_COUNT => Some(ContainerRef::Stash(code - 1)),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ContainerRef::Personal => 0,
            ContainerRef::Stash(index) => index + 1,
        }
    }

    pub fn stash_index(self) -> Option<u8> {
        match self {
            ContainerRef::Personal => None,
            ContainerRef::Stash(index) => Some(index),
        }
    }
}

/// Owns every grid in the process: the three shared stashes plus one
/// personal grid per identity, created on first access. All mutation goes
/// through `move_item`, `split_stack` and `give_item`, each of which either
/// completes or restores the touched grids to their prior state.
#[derive(Debug, Clone)]
pub struct InventoryManager {
    catalog: Arc<ItemCatalog>,
    stores: Vec<GridStore>,
    personal_index: BTreeMap<String, usize>,
}

enum StorePair<'a> {
    Same(&'a mut GridStore),
    Split {
        source: &'a mut GridStore,
        dest: &'a mut GridStore,
    },
}

impl StorePair<'_> {
    fn same_store(&self) -> bool {
        matches!(self, StorePair::Same(_))
    }

    fn source(&mut self) -> &mut GridStore {
        match self {
            StorePair::Same(store) => store,
            StorePair::Split { source, .. } => source,
        }
    }

    fn dest(&mut self) -> &mut GridStore {
        match self {
            StorePair::Same(store) => store,
            StorePair::Split { dest, .. } => dest,
        }
    }
}

impl InventoryManager {
    pub fn new(catalog: Arc<ItemCatalog>) -> Self {
        let stores = (0..SHARED_STASH_COUNT)
            .map(|_| GridStore::new(STASH_WIDTH, STASH_HEIGHT))
            .collect();
        Self {
            catalog,
            stores,
            personal_index: BTreeMap::new(),
        }
    }

    pub fn personal(&self, identity: &str) -> Option<&GridStore> {
        self.personal_index
            .get(identity)
            .map(|index| &self.stores[*index])
    }

    pub fn personal_or_create(&mut self, identity: &str) -> &GridStore {
        let index = self.personal_store_index(identity);
        &self.stores[index]
    }

    pub fn stash(&self, index: u8) -> Option<&GridStore> {
        if index >= SHARED_STASH_COUNT {
            return None;
        }
        Some(&self.stores[usize::from(index)])
    }

    pub fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }

    fn personal_store_index(&mut self, identity: &str) -> usize {
        if let Some(index) = self.personal_index.get(identity) {
            return *index;
        }
        let index = self.stores.len();
        self.stores
            .push(GridStore::new(PERSONAL_WIDTH, PERSONAL_HEIGHT));
        self.personal_index.insert(identity.to_string(), index);
        index
    }

    fn store_index(&mut self, identity: &str, container: ContainerRef) -> usize {
        match container {
            ContainerRef::Personal => self.personal_store_index(identity),
            ContainerRef::Stash(index) => usize::from(index),
        }
    }

    fn store_pair(&mut self, source: usize, dest: usize) -> StorePair<'_> {
        if source == dest {
            StorePair::Same(&mut self.stores[source])
        } else if source < dest {
            let (left, right) = self.stores.split_at_mut(dest);
            StorePair::Split {
                source: &mut left[source],
                dest: &mut right[0],
            }
        } else {
            let (left, right) = self.stores.split_at_mut(source);
            StorePair::Split {
                source: &mut right[0],
                dest: &mut left[dest],
            }
        }
    }

    pub fn move_item(
        &mut self,
        identity: &str,
        source_container: u8,
        source_pos: GridPosition,
        dest_container: u8,
        dest_pos: GridPosition,
    ) -> OperationResult {
        let Some(source) = ContainerRef::from_code(source_container) else {
            return OperationResult::InvalidSource;
        };
        let Some(dest) = ContainerRef::from_code(dest_container) else {
            return OperationResult::InvalidDestination;
        };
        let source_index = self.store_index(identity, source);
        let dest_index = self.store_index(identity, dest);
        let mut pair = self.store_pair(source_index, dest_index);

        let (item, count) = match pair.source().slot_at(source_pos) {
            Some(Slot {
                item: Some(item),
                count,
                ..
            }) => (Arc::clone(item), *count),
            _ => return OperationResult::ItemNotFound,
        };

        // a multi-cell item shifted within its own footprint must be lifted
        // out before the fit check, or it blocks itself
        let overlaps = pair.same_store() && boxes_overlap(&item, source_pos, dest_pos);
        let mut lifted = false;
        if overlaps {
            if pair.source().remove(source_pos).is_none() {
                return OperationResult::ConcurrentModification;
            }
            lifted = true;
        }

        if !pair.dest().can_place(&item, dest_pos) {
            if lifted {
                pair.source().place(&item, count, source_pos);
            }
            return self.finish_blocked_move(source_index, dest_index, &item, count, source_pos, dest_pos);
        }

        if !lifted && pair.source().remove(source_pos).is_none() {
            return OperationResult::ConcurrentModification;
        }
        if !pair.dest().place(&item, count, dest_pos) {
            pair.source().place(&item, count, source_pos);
            return OperationResult::NoSpace;
        }
        OperationResult::Success
    }

    /// Destination did not fit as-is: merge into a same-item anchor with
    /// spare capacity, or report why nothing moved.
    fn finish_blocked_move(
        &mut self,
        source_index: usize,
        dest_index: usize,
        item: &Arc<ItemDefinition>,
        count: u32,
        source_pos: GridPosition,
        dest_pos: GridPosition,
    ) -> OperationResult {
        let mut pair = self.store_pair(source_index, dest_index);

        let merge_count = match pair.dest().slot_at(dest_pos) {
            Some(Slot {
                item: Some(dest_item),
                count: dest_count,
                ..
            }) if dest_item.id == item.id
                && item.is_stackable()
                && *dest_count < item.stack_max =>
            {
                Some(*dest_count)
            }
            _ => None,
        };

        let Some(dest_count) = merge_count else {
            let dest_anchored = pair
                .dest()
                .slot_at(dest_pos)
                .map(|slot| slot.item.is_some())
                .unwrap_or(false);
            if !dest_anchored && !box_in_bounds(pair.dest(), item, dest_pos) {
                return OperationResult::ItemNotFound;
            }
            return OperationResult::NoSpace;
        };

        let space = item.stack_max - dest_count;
        let moved = count.min(space);

        if pair.source().remove(source_pos).is_none() {
            return OperationResult::ConcurrentModification;
        }
        if pair.dest().remove(dest_pos).is_none() {
            pair.source().place(item, count, source_pos);
            return OperationResult::ConcurrentModification;
        }
        if !pair.dest().place(item, dest_count + moved, dest_pos) {
            pair.source().place(item, count, source_pos);
            pair.dest().place(item, dest_count, dest_pos);
            return OperationResult::NoSpace;
        }
        let remaining = count - moved;
        if remaining > 0 && !pair.source().place(item, remaining, source_pos) {
            pair.dest().remove(dest_pos);
            pair.dest().place(item, dest_count, dest_pos);
            pair.source().place(item, count, source_pos);
            return OperationResult::ConcurrentModification;
        }
        OperationResult::Success
    }

    pub fn split_stack(
        &mut self,
        identity: &str,
        container: u8,
        pos: GridPosition,
        amount: u32,
        dest_pos: GridPosition,
    ) -> OperationResult {
        let Some(container) = ContainerRef::from_code(container) else {
            return OperationResult::InvalidSource;
        };
        if amount == 0 {
            return OperationResult::InvalidStackSize;
        }
        let index = self.store_index(identity, container);
        let store = &mut self.stores[index];

        let (item, current) = match store.slot_at(pos) {
            Some(Slot {
                item: Some(item),
                count,
                ..
            }) => (Arc::clone(item), *count),
            _ => return OperationResult::ItemNotFound,
        };
        // the split must leave at least one unit in the source stack
        if amount >= current {
            return OperationResult::InvalidStackSize;
        }

        // fit-check before touching anything; the source still occupies its
        // own cells here, so splitting onto the source footprint fails
        if !store.can_place(&item, dest_pos) {
            return OperationResult::NoSpace;
        }

        if store.remove(pos).is_none() {
            return OperationResult::ConcurrentModification;
        }
        if !store.place(&item, amount, dest_pos) {
            store.place(&item, current, pos);
            return OperationResult::NoSpace;
        }
        let remaining = current - amount;
        if !store.place(&item, remaining, pos) {
            store.remove(dest_pos);
            store.place(&item, current, pos);
            return OperationResult::NoSpace;
        }
        OperationResult::Success
    }

    /// Force-places a stack into an identity's personal grid at the first
    /// row-major fit. Creates the grid if the identity has none yet.
    pub fn give_item(
        &mut self,
        identity: &str,
        item_id: u32,
        count: u32,
    ) -> Result<GridPosition, String> {
        let item = self
            .catalog
            .find(ItemDefId(item_id))
            .ok_or_else(|| format!("unknown item id {item_id}"))?;
        if count == 0 {
            return Err("count must be at least 1".to_string());
        }
        if count > item.stack_max {
            return Err(format!(
                "count {} exceeds stack maximum {} for {}",
                count, item.stack_max, item.name
            ));
        }
        let index = self.personal_store_index(identity);
        let store = &mut self.stores[index];
        let pos = store
            .first_fit(&item)
            .ok_or_else(|| format!("no space in {identity}'s inventory for {}", item.name))?;
        if !store.place(&item, count, pos) {
            return Err(format!("placing {} at {},{} failed", item.name, pos.x, pos.y));
        }
        Ok(pos)
    }

    /// Discards an identity's personal grid with everything in it. Shared
    /// stashes are untouched. Returns false if the identity has no grid.
    pub fn remove_personal(&mut self, identity: &str) -> bool {
        let Some(index) = self.personal_index.remove(identity) else {
            return false;
        };
        self.stores.swap_remove(index);
        // swap_remove moved the last store into the hole; repoint its owner
        let moved = self.stores.len();
        if index < moved {
            for slot in self.personal_index.values_mut() {
                if *slot == moved {
                    *slot = index;
                    break;
                }
            }
        }
        true
    }

    #[cfg(test)]
    fn total_count(&self, id: ItemDefId) -> u64 {
        self.stores
            .iter()
            .flat_map(|store| store.all_anchors())
            .filter(|slot| slot.item.as_ref().map(|item| item.id) == Some(id))
            .map(|slot| u64::from(slot.count))
            .sum()
    }
}

fn boxes_overlap(item: &ItemDefinition, a: GridPosition, b: GridPosition) -> bool {
    let width = i32::from(item.footprint.width);
    let height = i32::from(item.footprint.height);
    a.x < b.x + width && b.x < a.x + width && a.y < b.y + height && b.y < a.y + height
}

fn box_in_bounds(store: &GridStore, item: &ItemDefinition, pos: GridPosition) -> bool {
    let far = GridPosition::new(
        pos.x + i32::from(item.footprint.width) - 1,
        pos.y + i32::from(item.footprint.height) - 1,
    );
    store.in_bounds(pos) && store.in_bounds(far)
}
