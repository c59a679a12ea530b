//! Read-only item catalog loaded from `data/seeds/items.json`.
//!
//! Each item's behaviour family is resolved into an [`ItemCategory`] once at
//! load time, so dispatch never depends on item-name prefixes.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::info;
use serde::Deserialize;

use super::errors::EconomyError;
use super::types::{Item, ItemId};

pub trait ItemCatalog: Send + Sync {
    fn get_item_by_name(&self, name: &str) -> Option<&Item>;
    fn get_item_by_id(&self, id: ItemId) -> Option<&Item>;

    /// Items for `ids`, skipping unknown ids, in request order.
    fn get_items_by_ids(&self, ids: &[ItemId]) -> Vec<&Item> {
        ids.iter().filter_map(|id| self.get_item_by_id(*id)).collect()
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    items: Vec<Item>,
}

/// Catalog backed by seed JSON; lookups by internal name are case-insensitive.
#[derive(Debug, Default, Clone)]
pub struct SeedCatalog {
    items: Vec<Item>,
    by_id: HashMap<ItemId, usize>,
    by_name: HashMap<String, usize>,
}

impl SeedCatalog {
    pub fn from_items(items: Vec<Item>) -> Result<Self, EconomyError> {
        let mut by_id = HashMap::with_capacity(items.len());
        let mut by_name = HashMap::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let name = item.internal_name.trim().to_ascii_lowercase();
            if name.is_empty() {
                return Err(EconomyError::InvalidInput(format!(
                    "item {} has an empty internal_name",
                    item.id
                )));
            }
            if by_id.insert(item.id, index).is_some() {
                return Err(EconomyError::InvalidInput(format!(
                    "duplicate item id {}",
                    item.id
                )));
            }
            if by_name.insert(name, index).is_some() {
                return Err(EconomyError::InvalidInput(format!(
                    "duplicate item name '{}'",
                    item.internal_name
                )));
            }
        }
        Ok(Self {
            items,
            by_id,
            by_name,
        })
    }

    pub fn from_json_str(contents: &str) -> Result<Self, EconomyError> {
        let file: CatalogFile = serde_json::from_str(contents)?;
        Self::from_items(file.items)
    }

    /// Load items from data/seeds/items.json
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EconomyError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let catalog = Self::from_json_str(&contents)?;
        info!("loaded {} items from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }
}

impl ItemCatalog for SeedCatalog {
    fn get_item_by_name(&self, name: &str) -> Option<&Item> {
        self.by_name
            .get(&name.trim().to_ascii_lowercase())
            .map(|index| &self.items[*index])
    }

    fn get_item_by_id(&self, id: ItemId) -> Option<&Item> {
        self.by_id.get(&id).map(|index| &self.items[*index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economy::types::ItemCategory;

    const SAMPLE: &str = r#"{
        "items": [
            {"id": 1, "internal_name": "money", "public_name": "Coins",
             "category": {"kind": "currency"}, "base_value": 1},
            {"id": 5, "internal_name": "weapon_tnt", "public_name": "TNT",
             "category": {"kind": "random_weapon", "min_targets": 5, "max_targets": 9, "timeout_secs": 60}}
        ]
    }"#;

    #[test]
    fn categories_resolve_at_load() {
        let catalog = SeedCatalog::from_json_str(SAMPLE).expect("catalog");
        let tnt = catalog.get_item_by_name("Weapon_TNT").expect("tnt");
        assert_eq!(
            tnt.category,
            ItemCategory::RandomWeapon {
                min_targets: 5,
                max_targets: 9,
                timeout_secs: 60
            }
        );
        assert_eq!(tnt.base_value, 0);
        assert_eq!(catalog.get_item_by_id(1).unwrap().public_name, "Coins");
        let batch = catalog.get_items_by_ids(&[5, 99, 1]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, 5);
    }

    #[test]
    fn duplicate_names_fail_load() {
        let dup = r#"{"items": [
            {"id": 1, "internal_name": "money", "public_name": "a", "category": {"kind": "currency"}},
            {"id": 2, "internal_name": "MONEY", "public_name": "b", "category": {"kind": "material"}}
        ]}"#;
        assert!(matches!(
            SeedCatalog::from_json_str(dup),
            Err(EconomyError::InvalidInput(_))
        ));
    }
}
