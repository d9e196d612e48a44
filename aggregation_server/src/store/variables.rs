use std::collections::HashMap;

use super::{Result, StoreErr, Tensor};

/// A named mapping of declared variable slots to their tensor values.
///
/// Only names declared up front can be written, every round works on a child of the last
/// consolidated store so that the consolidated values carry over into the next round.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    vars: HashMap<String, Tensor>,
}

impl VariableStore {
    /// Creates a new, empty `VariableStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a new variable slot, replacing the value if it was already declared.
    ///
    /// # Arguments
    /// * `name` - The name of the variable.
    /// * `value` - Its initial value.
    ///
    /// # Returns
    /// The previous value if the slot already existed.
    pub fn declare(&mut self, name: impl Into<String>, value: Tensor) -> Option<Tensor> {
        self.vars.insert(name.into(), value)
    }

    /// Writes the value of a declared variable, the last write wins.
    ///
    /// # Arguments
    /// * `name` - The name of the variable.
    /// * `value` - Its new value.
    ///
    /// # Returns
    /// `StoreErr::UnknownVariable` if `name` wasn't declared.
    pub fn set(&mut self, name: &str, value: Tensor) -> Result<()> {
        let slot = self
            .vars
            .get_mut(name)
            .ok_or_else(|| StoreErr::UnknownVariable(name.to_string()))?;

        *slot = value;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.vars.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        self.vars.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Returns an iterator over the declared names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Creates the store for a new round.
    ///
    /// # Returns
    /// A new store with the same declared slots and this store's current values.
    pub fn create_child(&self) -> Self {
        self.clone()
    }
}
