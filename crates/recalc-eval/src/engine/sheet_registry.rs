//! Bidirectional sheet-name <-> sheet-id registry.

use recalc_common::SheetId;
use rustc_hash::FxHashMap;

/// Sheet ids are dense and never reused within one engine lifetime, so a
/// formula that captured an id of a removed sheet stays dangling instead of
/// silently pointing at a newer sheet.
#[derive(Debug, Default)]
pub struct SheetRegistry {
    // keyed by lowercased name; display casing preserved in `names`
    id_by_name: FxHashMap<String, SheetId>,
    names: Vec<Option<String>>,
}

impl SheetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new sheet. Returns `None` when the name is taken
    /// (case-insensitively).
    pub fn add(&mut self, name: &str) -> Option<SheetId> {
        let key = name.to_lowercase();
        if self.id_by_name.contains_key(&key) {
            return None;
        }
        let id = self.names.len() as SheetId;
        self.names.push(Some(name.to_string()));
        self.id_by_name.insert(key, id);
        Some(id)
    }

    pub fn remove(&mut self, id: SheetId) -> Option<String> {
        let name = self.names.get_mut(id as usize)?.take()?;
        self.id_by_name.remove(&name.to_lowercase());
        Some(name)
    }

    /// Renames `id`; fails when the target name is taken by another sheet.
    pub fn rename(&mut self, id: SheetId, new_name: &str) -> bool {
        let key = new_name.to_lowercase();
        if let Some(&other) = self.id_by_name.get(&key) {
            if other != id {
                return false;
            }
        }
        let Some(slot) = self.names.get_mut(id as usize) else {
            return false;
        };
        let Some(old) = slot.take() else {
            return false;
        };
        self.id_by_name.remove(&old.to_lowercase());
        *slot = Some(new_name.to_string());
        self.id_by_name.insert(key, id);
        true
    }

    pub fn id_for(&self, name: &str) -> Option<SheetId> {
        self.id_by_name.get(&name.to_lowercase()).copied()
    }

    pub fn name_of(&self, id: SheetId) -> Option<&str> {
        self.names.get(id as usize)?.as_deref()
    }

    pub fn contains(&self, id: SheetId) -> bool {
        self.name_of(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SheetId, &str)> + '_ {
        self.names
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_deref().map(|n| (i as SheetId, n)))
    }

    pub fn len(&self) -> usize {
        self.id_by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_by_name.is_empty()
    }
}
