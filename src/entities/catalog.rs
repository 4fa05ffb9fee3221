use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::entities::item::{ItemDefId, ItemDefinition};

/// Immutable id-to-definition table. Built once at startup and handed
/// around as `Arc<ItemCatalog>`; grids keep `Arc<ItemDefinition>` handles
/// into it rather than copies.
#[derive(Debug)]
pub struct ItemCatalog {
    definitions: BTreeMap<u32, Arc<ItemDefinition>>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: u32,
    name: String,
    width: u8,
    height: u8,
    #[serde(default = "default_stack_max")]
    stack_max: u32,
}

fn default_stack_max() -> u32 {
    1
}

impl ItemCatalog {
    pub fn builtin() -> Self {
        let defaults = [
            ItemDefinition::new(1, "Chaos Orb", 1, 1, 20),
            ItemDefinition::new(2, "Divine Orb", 1, 1, 20),
            ItemDefinition::new(3, "Exalted Orb", 1, 1, 20),
            ItemDefinition::new(4, "Orb of Alteration", 1, 1, 20),
            ItemDefinition::new(5, "Scroll of Wisdom", 1, 1, 40),
            ItemDefinition::new(6, "Starforge", 2, 4, 1),
            ItemDefinition::new(7, "Voltaxic Rift", 2, 4, 1),
            ItemDefinition::new(8, "Starkonja", 2, 2, 1),
            ItemDefinition::new(9, "Facebreaker", 2, 2, 1),
            ItemDefinition::new(10, "Volls Protector", 2, 3, 1),
            ItemDefinition::new(11, "Blood Dance", 2, 2, 1),
            ItemDefinition::new(12, "Call of the Brotherhood", 1, 1, 1),
        ];
        let mut definitions = BTreeMap::new();
        for definition in defaults {
            definitions.insert(definition.id.0, Arc::new(definition));
        }
        Self { definitions }
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, String> {
        let text = fs::read_to_string(path)
            .map_err(|err| format!("catalog read {} failed: {}", path.display(), err))?;
        let entries: Vec<CatalogEntry> = serde_yaml::from_str(&text)
            .map_err(|err| format!("catalog parse {} failed: {}", path.display(), err))?;

        let mut definitions = BTreeMap::new();
        for entry in entries {
            if entry.width == 0 || entry.height == 0 {
                return Err(format!(
                    "catalog entry {} has a degenerate {}x{} footprint",
                    entry.id, entry.width, entry.height
                ));
            }
            if entry.stack_max == 0 {
                return Err(format!("catalog entry {} has a zero stack maximum", entry.id));
            }
            let definition = ItemDefinition::new(
                entry.id,
                &entry.name,
                entry.width,
                entry.height,
                entry.stack_max,
            );
            if definitions.insert(entry.id, Arc::new(definition)).is_some() {
                return Err(format!("catalog entry {} is defined twice", entry.id));
            }
        }
        if definitions.is_empty() {
            return Err(format!("catalog {} contains no entries", path.display()));
        }
        Ok(Self { definitions })
    }

    pub fn find(&self, id: ItemDefId) -> Option<Arc<ItemDefinition>> {
        self.definitions.get(&id.0).map(Arc::clone)
    }

    /// Definitions in ascending id order.
    pub fn definitions(&self) -> impl Iterator<Item = &Arc<ItemDefinition>> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
