#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemDefId(pub u32);

/// Cell extent of an item, anchored at its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    pub width: u8,
    pub height: u8,
}

impl Footprint {
    pub const fn new(width: u8, height: u8) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDefinition {
    pub id: ItemDefId,
    pub name: String,
    pub footprint: Footprint,
    pub stack_max: u32,
}

impl ItemDefinition {
    pub fn new(id: u32, name: &str, width: u8, height: u8, stack_max: u32) -> Self {
        Self {
            id: ItemDefId(id),
            name: name.to_string(),
            footprint: Footprint::new(width, height),
            stack_max,
        }
    }

    pub fn is_stackable(&self) -> bool {
        self.stack_max > 1
    }
}
