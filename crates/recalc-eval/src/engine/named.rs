//! Named expression registry.

use recalc_common::SheetId;
use rustc_hash::FxHashMap;

use super::vertex::VertexId;

/// Scope of a named expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameScope {
    /// Available throughout the workbook.
    Workbook,
    /// Only available in a specific sheet.
    Sheet(SheetId),
}

#[derive(Debug, Clone)]
pub struct NamedExpression {
    /// Display casing as supplied by the caller.
    pub name: String,
    pub scope: NameScope,
    pub vertex: VertexId,
}

/// Uniqueness is per scope and case-insensitive; resolution prefers the
/// sheet scope over the workbook scope.
#[derive(Debug, Default)]
pub struct NamedExpressionStore {
    workbook: FxHashMap<String, NamedExpression>,
    sheet: FxHashMap<(SheetId, String), NamedExpression>,
}

impl NamedExpressionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str, scope: NameScope) -> bool {
        let key = name.to_lowercase();
        match scope {
            NameScope::Workbook => self.workbook.contains_key(&key),
            NameScope::Sheet(sheet) => self.sheet.contains_key(&(sheet, key)),
        }
    }

    /// Registers a named expression; returns false on a per-scope
    /// collision.
    pub fn add(&mut self, expr: NamedExpression) -> bool {
        let key = expr.name.to_lowercase();
        match expr.scope {
            NameScope::Workbook => {
                if self.workbook.contains_key(&key) {
                    return false;
                }
                self.workbook.insert(key, expr);
            }
            NameScope::Sheet(sheet) => {
                if self.sheet.contains_key(&(sheet, key.clone())) {
                    return false;
                }
                self.sheet.insert((sheet, key), expr);
            }
        }
        true
    }

    pub fn remove(&mut self, name: &str, scope: NameScope) -> Option<NamedExpression> {
        let key = name.to_lowercase();
        match scope {
            NameScope::Workbook => self.workbook.remove(&key),
            NameScope::Sheet(sheet) => self.sheet.remove(&(sheet, key)),
        }
    }

    /// Resolves `name` as seen from `sheet`: sheet scope first, then
    /// workbook.
    pub fn resolve(&self, name: &str, sheet: SheetId) -> Option<&NamedExpression> {
        let key = name.to_lowercase();
        self.sheet
            .get(&(sheet, key.clone()))
            .or_else(|| self.workbook.get(&key))
    }

    /// Looks a name up in exactly one scope.
    pub fn resolve_scope(&self, name: &str, scope: NameScope) -> Option<&NamedExpression> {
        let key = name.to_lowercase();
        match scope {
            NameScope::Workbook => self.workbook.get(&key),
            NameScope::Sheet(sheet) => self.sheet.get(&(sheet, key)),
        }
    }

    /// Drops every name scoped to a removed sheet, returning them for
    /// vertex cleanup.
    pub fn remove_sheet_scope(&mut self, sheet: SheetId) -> Vec<NamedExpression> {
        let keys: Vec<_> = self
            .sheet
            .keys()
            .filter(|(s, _)| *s == sheet)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|k| self.sheet.remove(&k))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedExpression> + '_ {
        self.workbook.values().chain(self.sheet.values())
    }

    pub fn len(&self) -> usize {
        self.workbook.len() + self.sheet.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workbook.is_empty() && self.sheet.is_empty()
    }
}
