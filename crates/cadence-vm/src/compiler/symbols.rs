//! Symbol table for block-scoped locals

use cadence_types::ValueType;
use std::collections::HashMap;

/// A bound local. `ty` is `None` when the initializer failed to type-check;
/// references to such a local are accepted silently so one mistake reports
/// one error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Local {
    pub(crate) slot: u16,
    pub(crate) ty: Option<ValueType>,
}

/// Stack of lexical scopes
///
/// Slots are never reused: every binding in the document gets its own
/// range, so flows that call each other cannot clobber each other's locals.
#[derive(Debug)]
pub(crate) struct SymbolTable {
    scopes: Vec<HashMap<String, Local>>,
    next_slot: usize,
}

impl SymbolTable {
    pub(crate) fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
            next_slot: 0,
        }
    }

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub(crate) fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Reserve `width` consecutive slots
    pub(crate) fn allocate(&mut self, width: usize) -> usize {
        let slot = self.next_slot;
        self.next_slot += width;
        slot
    }

    /// Define a new variable in the innermost scope, shadowing outer ones
    pub(crate) fn define(&mut self, name: &str, local: Local) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), local);
        }
    }

    /// Get the innermost binding for a name
    pub(crate) fn get(&self, name: &str) -> Option<Local> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    /// Number of slots handed out so far
    pub(crate) fn slot_count(&self) -> usize {
        self.next_slot
    }
}
